use anyhow::Context;
use clap::{Parser, Subcommand};
use dinkes_core::{
    config::{collaborator_timeout_from_env_value, resolve_catalogue_path},
    constants::{DEFAULT_COLLABORATOR_MODEL, DEFAULT_DATA_DIR, MERGED_DIR_NAME},
    CollaboratorConfig, DatasetCatalogue, FileMergeSink, InMemoryIdentityIndex, MemoryMergeSink,
    MergeService, MergeSink, OllamaReconciler, Proposal, ReconciliationCollaborator, Reconciler,
    SearchQuery, SessionState,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "dinkes")]
#[command(about = "Dinkes record merge CLI")]
struct Cli {
    /// Dataset catalogue (defaults to data/datasets.yaml)
    #[arg(long, global = true)]
    catalogue: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured datasets
    Datasets,
    /// Search a NIK across datasets and propose a merged record
    Merge {
        /// National identity number
        nik: String,
        /// Dataset to search (repeatable; all datasets when omitted)
        #[arg(long = "dataset")]
        datasets: Vec<String>,
        /// Store the proposed record
        #[arg(long)]
        confirm: bool,
        /// Where confirmed records are written
        #[arg(long, default_value = DEFAULT_DATA_DIR)]
        data_dir: PathBuf,
        /// Ollama-compatible collaborator base URL (rule-based merge when omitted)
        #[arg(long)]
        collaborator_url: Option<String>,
        /// Collaborator model name
        #[arg(long, default_value = DEFAULT_COLLABORATOR_MODEL)]
        model: String,
        /// Collaborator timeout in seconds
        #[arg(long)]
        timeout_secs: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dinkes_core=warn".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Datasets) => {
            let catalogue = load_catalogue(cli.catalogue)?;
            if catalogue.datasets().is_empty() {
                println!("No datasets configured.");
            }
            for dataset in catalogue.datasets() {
                println!(
                    "{}: {} ({} records)",
                    dataset.info.id,
                    dataset.info.name,
                    dataset.records.len()
                );
            }
        }
        Some(Commands::Merge {
            nik,
            datasets,
            confirm,
            data_dir,
            collaborator_url,
            model,
            timeout_secs,
        }) => {
            let catalogue = load_catalogue(cli.catalogue)?;
            let timeout = collaborator_timeout_from_env_value(timeout_secs.as_deref())?;

            let collaborator: Option<Arc<dyn ReconciliationCollaborator>> = match collaborator_url
            {
                Some(url) => {
                    let cfg = CollaboratorConfig::new(&url, &model)?;
                    Some(Arc::new(OllamaReconciler::new(
                        cfg.base_url(),
                        cfg.model(),
                        timeout,
                    )?))
                }
                None => None,
            };

            let sink: Arc<dyn MergeSink> = if confirm {
                Arc::new(FileMergeSink::new(data_dir.join(MERGED_DIR_NAME)))
            } else {
                Arc::new(MemoryMergeSink::new())
            };

            let service = MergeService::new(
                Arc::new(InMemoryIdentityIndex::from_catalogue(catalogue)),
                Reconciler::new(collaborator, timeout),
                sink,
            );

            let query = if datasets.is_empty() {
                let all: Vec<String> = service
                    .datasets()
                    .into_iter()
                    .map(|d| d.id.to_string())
                    .collect();
                SearchQuery::parse(&nik, &all)?
            } else {
                SearchQuery::parse(&nik, &datasets)?
            };

            let mut session = service.session();
            match session.search(query).await? {
                SessionState::NotFound { failures, .. } => {
                    println!("No records found for NIK {}.", nik.trim());
                    for failure in failures {
                        eprintln!("  {} unavailable: {}", failure.dataset_id, failure.reason);
                    }
                    return Ok(());
                }
                SessionState::Proposed(proposal) => print_proposal(proposal),
                SessionState::Failed { error, .. } => {
                    anyhow::bail!("merge failed: {error}");
                }
                other => anyhow::bail!("search ended in unexpected phase {:?}", other.phase()),
            }

            if confirm {
                let receipt = session.confirm().await?;
                println!();
                println!(
                    "Confirmed as {} at {}",
                    receipt.id,
                    receipt.confirmed_at.to_rfc3339()
                );
                println!(
                    "Written to {}",
                    FileMergeSink::new(data_dir.join(MERGED_DIR_NAME))
                        .record_path(&receipt.id)
                        .display()
                );
            } else {
                println!();
                println!("Dry run: re-run with --confirm to store this record.");
            }
        }
        None => {
            println!("Use 'dinkes --help' for commands");
        }
    }

    Ok(())
}

fn load_catalogue(path: Option<PathBuf>) -> anyhow::Result<DatasetCatalogue> {
    let path = resolve_catalogue_path(path)?;
    DatasetCatalogue::load(&path)
        .with_context(|| format!("loading catalogue {}", path.display()))
}

fn print_proposal(proposal: &Proposal) {
    println!("Records for NIK {}:", proposal.query.nik());
    for candidate in proposal.candidates.iter() {
        let r = &candidate.record;
        println!(
            "  [{}] {} | {} | dob {} | phone {} | last visit {}",
            candidate.dataset_name,
            r.name,
            r.address,
            r.date_of_birth.as_deref().unwrap_or("-"),
            r.phone.as_deref().unwrap_or("-"),
            r.last_visit.as_deref().unwrap_or("-"),
        );
    }
    for failure in &proposal.failures {
        eprintln!("  {} unavailable: {}", failure.dataset_id, failure.reason);
    }

    let conflicting = proposal.report.conflicting_fields();
    if !conflicting.is_empty() {
        let labels: Vec<_> = conflicting.iter().map(|f| f.label()).collect();
        println!("Conflicting fields: {}", labels.join(", "));
    }

    let m = &proposal.merged;
    println!();
    println!("Proposed record ({}):", m.method.as_str());
    println!("  id:         {}", m.id);
    println!("  name:       {}", m.name);
    println!("  address:    {}", m.address);
    println!("  dob:        {}", m.date_of_birth.as_deref().unwrap_or("-"));
    println!("  phone:      {}", m.phone.as_deref().unwrap_or("-"));
    println!("  last visit: {}", m.last_visit.as_deref().unwrap_or("-"));
    println!("  confidence: {:.2}", m.confidence_score);
    println!();
    println!("{}", m.explanation);
}
