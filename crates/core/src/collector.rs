//! Candidate collection across datasets.
//!
//! Lookups for the requested datasets run concurrently and are all joined before the
//! candidate set is built. A failing dataset does not abort the search; its failure is
//! reported next to whatever the other datasets returned.

use crate::error::{LookupFailure, MergeError, MergeResult};
use crate::index::IdentityIndex;
use crate::record::{Candidate, CandidateSet, DatasetInfo};
use dinkes_types::{DatasetId, Nik};
use futures::future::join_all;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Result of a collection: the candidates found plus any per-dataset failures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Collection {
    pub candidates: CandidateSet,
    pub failures: Vec<LookupFailure>,
}

/// Assembles candidate sets from an injected identity index.
#[derive(Clone)]
pub struct CandidateCollector {
    index: Arc<dyn IdentityIndex>,
}

impl CandidateCollector {
    pub fn new(index: Arc<dyn IdentityIndex>) -> Self {
        Self { index }
    }

    /// Datasets that may be searched.
    pub fn datasets(&self) -> Vec<DatasetInfo> {
        self.index.datasets()
    }

    /// Checks that `dataset_ids` is non-empty and every id is known to the index.
    ///
    /// # Errors
    ///
    /// - [`MergeError::InvalidInput`] if no dataset was selected
    /// - [`MergeError::NotConfigured`] for the first unknown dataset id
    pub fn ensure_configured(&self, dataset_ids: &BTreeSet<DatasetId>) -> MergeResult<()> {
        if dataset_ids.is_empty() {
            return Err(MergeError::InvalidInput(
                "at least one dataset must be selected".into(),
            ));
        }

        let known: BTreeSet<DatasetId> = self.index.datasets().into_iter().map(|d| d.id).collect();
        match dataset_ids.iter().find(|id| !known.contains(*id)) {
            Some(unknown) => Err(MergeError::NotConfigured(unknown.clone())),
            None => Ok(()),
        }
    }

    /// Looks up `nik` in each of `dataset_ids` and returns the matches, one per dataset.
    ///
    /// Candidates are ordered by dataset id. A miss is simply omitted.
    ///
    /// # Errors
    ///
    /// - [`MergeError::InvalidInput`] / [`MergeError::NotConfigured`] as for
    ///   [`ensure_configured`](Self::ensure_configured)
    /// - [`MergeError::NoDataAvailable`] if every lookup failed
    pub async fn collect(
        &self,
        nik: &Nik,
        dataset_ids: &BTreeSet<DatasetId>,
    ) -> MergeResult<Collection> {
        self.ensure_configured(dataset_ids)?;

        let names: HashMap<DatasetId, String> = self
            .index
            .datasets()
            .into_iter()
            .map(|d| (d.id, d.name))
            .collect();

        let lookups = dataset_ids.iter().map(|dataset_id| {
            let index = Arc::clone(&self.index);
            async move { (dataset_id, index.lookup(nik, dataset_id).await) }
        });
        let results = join_all(lookups).await;

        let mut candidates = Vec::new();
        let mut failures = Vec::new();
        for (dataset_id, result) in results {
            match result {
                Ok(Some(record)) if &record.nik == nik => {
                    let dataset_name = names
                        .get(dataset_id)
                        .cloned()
                        .unwrap_or_else(|| dataset_id.to_string());
                    candidates.push(Candidate {
                        dataset_id: dataset_id.clone(),
                        dataset_name,
                        record,
                    });
                }
                Ok(Some(record)) => {
                    tracing::warn!(
                        "dataset '{}' returned record '{}' with NIK {} for query {}; discarding",
                        dataset_id,
                        record.id,
                        record.nik,
                        nik
                    );
                }
                Ok(None) => {}
                Err(MergeError::NotConfigured(id)) => return Err(MergeError::NotConfigured(id)),
                Err(err) => {
                    let reason = match err {
                        MergeError::LookupFailed { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    tracing::warn!("lookup in dataset '{}' failed: {}", dataset_id, reason);
                    failures.push(LookupFailure {
                        dataset_id: dataset_id.clone(),
                        reason,
                    });
                }
            }
        }

        if failures.len() == dataset_ids.len() {
            return Err(MergeError::NoDataAvailable { failures });
        }

        tracing::info!(
            "collected {} candidate(s) for NIK {} from {} dataset(s), {} failed",
            candidates.len(),
            nik,
            dataset_ids.len(),
            failures.len()
        );

        Ok(Collection {
            candidates: CandidateSet::new(nik.clone(), candidates)?,
            failures,
        })
    }
}
