use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api_rest::AppState;
use dinkes_core::config::{collaborator_timeout_from_env_value, resolve_catalogue_path};
use dinkes_core::constants::{DEFAULT_COLLABORATOR_MODEL, DEFAULT_DATA_DIR};
use dinkes_core::{CollaboratorConfig, CoreConfig, MergeService};

/// Main entry point for the Dinkes merge server
///
/// Loads `.env`, resolves configuration once, and serves the REST API.
///
/// # Environment Variables
/// - `DINKES_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `DINKES_DATA_DIR`: where confirmed merged records are written (default: "dinkes_data")
/// - `DINKES_CATALOGUE`: dataset catalogue file (default: `data/datasets.yaml`)
/// - `DINKES_COLLABORATOR_URL`: Ollama-compatible base URL; unset means rule-based merges only
/// - `DINKES_COLLABORATOR_MODEL`: model name (default: "llama3.1")
/// - `DINKES_COLLABORATOR_TIMEOUT_SECS`: collaborator call ceiling (default: 30)
/// - `API_KEY`: when set, required as `x-api-key` on every route except `/health` and the docs
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - configuration is invalid or the catalogue cannot be loaded,
/// - the server address cannot be bound, or
/// - the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dinkes_run=info".parse()?)
                .add_directive("dinkes_core=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr = std::env::var("DINKES_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    let data_dir = std::env::var("DINKES_DATA_DIR").unwrap_or_else(|_| DEFAULT_DATA_DIR.into());
    let catalogue_path =
        resolve_catalogue_path(std::env::var("DINKES_CATALOGUE").ok().map(PathBuf::from))?;

    let collaborator = match std::env::var("DINKES_COLLABORATOR_URL") {
        Ok(url) if !url.trim().is_empty() => {
            let model = std::env::var("DINKES_COLLABORATOR_MODEL")
                .unwrap_or_else(|_| DEFAULT_COLLABORATOR_MODEL.into());
            Some(CollaboratorConfig::new(&url, &model)?)
        }
        _ => None,
    };
    let timeout = collaborator_timeout_from_env_value(
        std::env::var("DINKES_COLLABORATOR_TIMEOUT_SECS")
            .ok()
            .as_deref(),
    )?;

    let cfg = CoreConfig::new(PathBuf::from(data_dir), catalogue_path, collaborator, timeout)?;
    tracing::info!(
        "++ Using catalogue {} and data directory {}",
        cfg.catalogue_path().display(),
        cfg.data_dir().display()
    );

    let service = MergeService::from_config(&cfg)?;
    let api_key = std::env::var("API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty());
    if api_key.is_none() {
        tracing::warn!("API_KEY is not set; REST routes are open");
    }

    let app = api_rest::router(AppState::new(service, api_key));

    tracing::info!("++ Starting Dinkes REST on {}", rest_addr);
    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
