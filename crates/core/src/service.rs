//! Service wiring for the merge workflow.

use crate::catalogue::DatasetCatalogue;
use crate::collaborator::{OllamaReconciler, ReconciliationCollaborator};
use crate::collector::{CandidateCollector, Collection};
use crate::config::CoreConfig;
use crate::error::MergeResult;
use crate::index::{IdentityIndex, InMemoryIdentityIndex};
use crate::reconcile::Reconciler;
use crate::record::DatasetInfo;
use crate::session::{MergeSession, SearchQuery};
use crate::sink::{FileMergeSink, MergeSink};
use std::sync::Arc;

/// Shared, read-only wiring from which merge sessions are created.
///
/// Cloning is cheap; every clone shares the same index, collaborator, and sink.
#[derive(Clone)]
pub struct MergeService {
    collector: CandidateCollector,
    reconciler: Reconciler,
    sink: Arc<dyn MergeSink>,
}

impl MergeService {
    pub fn new(
        index: Arc<dyn IdentityIndex>,
        reconciler: Reconciler,
        sink: Arc<dyn MergeSink>,
    ) -> Self {
        Self {
            collector: CandidateCollector::new(index),
            reconciler,
            sink,
        }
    }

    /// Builds the service described by `cfg`: the catalogue-backed index, the configured
    /// collaborator (if any), and a file sink under the data directory.
    ///
    /// # Errors
    ///
    /// - any error from [`DatasetCatalogue::load`]
    /// - [`MergeError::CollaboratorUnavailable`](crate::MergeError::CollaboratorUnavailable)
    ///   if the HTTP client cannot be built
    pub fn from_config(cfg: &CoreConfig) -> MergeResult<Self> {
        let catalogue = DatasetCatalogue::load(cfg.catalogue_path())?;
        let index = InMemoryIdentityIndex::from_catalogue(catalogue);
        tracing::info!("indexed {} records", index.record_count());

        let collaborator: Option<Arc<dyn ReconciliationCollaborator>> = match cfg.collaborator() {
            Some(collab) => {
                let reconciler = OllamaReconciler::new(
                    collab.base_url(),
                    collab.model(),
                    cfg.collaborator_timeout(),
                )?;
                tracing::info!(
                    "using reconciliation collaborator at {} ({})",
                    collab.base_url(),
                    reconciler.model()
                );
                Some(Arc::new(reconciler))
            }
            None => {
                tracing::info!("no reconciliation collaborator configured; using rule-based merge");
                None
            }
        };

        Ok(Self::new(
            Arc::new(index),
            Reconciler::new(collaborator, cfg.collaborator_timeout()),
            Arc::new(FileMergeSink::new(cfg.merged_dir())),
        ))
    }

    pub fn datasets(&self) -> Vec<DatasetInfo> {
        self.collector.datasets()
    }

    /// Stateless search: the candidates for `query`, no reconciliation.
    pub async fn search(&self, query: &SearchQuery) -> MergeResult<Collection> {
        self.collector
            .collect(query.nik(), query.dataset_ids())
            .await
    }

    /// Starts a new, idle merge session.
    pub fn session(&self) -> MergeSession {
        MergeSession::new(
            self.collector.clone(),
            self.reconciler.clone(),
            Arc::clone(&self.sink),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollaboratorConfig;
    use crate::record::MergeMethod;
    use crate::session::SessionPhase;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    const CATALOGUE: &str = r#"
datasets:
  - id: seksi-p2p
    name: Seksi P2P
    records:
      - id: rec-001
        nik: "3171234567890001"
        name: Budi Santoso
        address: Jl. Merdeka No. 1, Jakarta
        lastVisit: "2024-05-20"
  - id: seksi-kesmas
    name: Seksi Kesmas
    records:
      - id: rec-004
        nik: "3171234567890001"
        name: Budi S.
        address: Jl. Merdeka No. 1, Jakarta Pusat
        lastVisit: "2023-12-01"
"#;

    fn config(temp: &TempDir, collaborator: Option<CollaboratorConfig>) -> CoreConfig {
        let catalogue = temp.path().join("datasets.yaml");
        std::fs::write(&catalogue, CATALOGUE).expect("write catalogue");
        CoreConfig::new(
            temp.path().join("data"),
            catalogue,
            collaborator,
            Duration::from_secs(5),
        )
        .expect("config should be valid")
    }

    #[tokio::test]
    async fn from_config_wires_catalogue_and_file_sink() {
        let temp = TempDir::new().expect("temp dir");
        let cfg = config(&temp, None);
        let service = MergeService::from_config(&cfg).expect("service should build");

        let ids: Vec<_> = service.datasets().into_iter().map(|d| d.id.to_string()).collect();
        assert_eq!(ids, vec!["seksi-p2p", "seksi-kesmas"]);

        let query = SearchQuery::parse("3171234567890001", ["seksi-p2p", "seksi-kesmas"]).unwrap();
        let collection = service.search(&query).await.unwrap();
        assert_eq!(collection.candidates.len(), 2);

        let mut session = service.session();
        session.search(query).await.unwrap();
        assert_eq!(session.phase(), SessionPhase::Proposed);
        let receipt = session.confirm().await.unwrap();

        let stored = FileMergeSink::new(cfg.merged_dir())
            .load(&receipt.id)
            .expect("stored merge should load");
        assert_eq!(stored.record.address, "Jl. Merdeka No. 1, Jakarta");
    }

    #[tokio::test]
    async fn unreachable_collaborator_still_produces_proposal() {
        let temp = TempDir::new().expect("temp dir");
        let collab = CollaboratorConfig::new("http://127.0.0.1:9", "test-model").unwrap();
        let service = MergeService::from_config(&config(&temp, Some(collab))).unwrap();

        let mut session = service.session();
        session
            .search(SearchQuery::parse("3171234567890001", ["seksi-p2p", "seksi-kesmas"]).unwrap())
            .await
            .unwrap();

        let proposal = session.proposal().expect("fallback proposal expected");
        assert_eq!(proposal.merged.method, MergeMethod::Fallback);
    }

    #[test]
    fn missing_catalogue_fails() {
        let cfg = CoreConfig::new(
            PathBuf::from("data"),
            PathBuf::from("/nonexistent/datasets.yaml"),
            None,
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(matches!(
            MergeService::from_config(&cfg),
            Err(crate::MergeError::FileRead(_))
        ));
    }
}
