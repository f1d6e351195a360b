//! Identity index: NIK lookups per dataset.
//!
//! [`IdentityIndex`] is the read contract the collector needs. The concrete store (a document
//! database, the YAML catalogue) is injected at startup; nothing in the core holds a
//! process-wide table.

use crate::catalogue::DatasetCatalogue;
use crate::error::{MergeError, MergeResult};
use crate::record::{DatasetInfo, Record};
use async_trait::async_trait;
use dinkes_types::{DatasetId, Nik};
use std::collections::HashMap;

/// Read-only NIK lookup across named datasets.
///
/// Implementations must be safe to share between concurrent sessions.
#[async_trait]
pub trait IdentityIndex: Send + Sync {
    /// Datasets this index can answer for, in display order.
    fn datasets(&self) -> Vec<DatasetInfo>;

    /// Returns the record for `nik` in `dataset`, if any.
    ///
    /// # Errors
    ///
    /// - [`MergeError::NotConfigured`] if `dataset` is unknown
    /// - [`MergeError::LookupFailed`] if the backing store could not be read
    async fn lookup(&self, nik: &Nik, dataset: &DatasetId) -> MergeResult<Option<Record>>;
}

/// Identity index held entirely in memory and immutable after construction.
#[derive(Debug, Default)]
pub struct InMemoryIdentityIndex {
    datasets: Vec<DatasetInfo>,
    tables: HashMap<DatasetId, HashMap<Nik, Record>>,
}

impl InMemoryIdentityIndex {
    /// Builds the index from a catalogue.
    ///
    /// When a dataset lists the same NIK twice, the first record wins and the rest are
    /// ignored with a warning (one match per dataset per NIK).
    pub fn from_catalogue(catalogue: DatasetCatalogue) -> Self {
        let mut datasets = Vec::new();
        let mut tables = HashMap::new();

        for dataset in catalogue.into_datasets() {
            let mut table: HashMap<Nik, Record> = HashMap::with_capacity(dataset.records.len());
            for record in dataset.records {
                if let Some(existing) = table.get(&record.nik) {
                    tracing::warn!(
                        "dataset '{}' has duplicate NIK {}: keeping record '{}', ignoring '{}'",
                        dataset.info.id,
                        record.nik,
                        existing.id,
                        record.id
                    );
                    continue;
                }
                table.insert(record.nik.clone(), record);
            }
            tables.insert(dataset.info.id.clone(), table);
            datasets.push(dataset.info);
        }

        Self { datasets, tables }
    }

    /// Total number of indexed records across all datasets.
    pub fn record_count(&self) -> usize {
        self.tables.values().map(HashMap::len).sum()
    }
}

#[async_trait]
impl IdentityIndex for InMemoryIdentityIndex {
    fn datasets(&self) -> Vec<DatasetInfo> {
        self.datasets.clone()
    }

    async fn lookup(&self, nik: &Nik, dataset: &DatasetId) -> MergeResult<Option<Record>> {
        let table = self
            .tables
            .get(dataset)
            .ok_or_else(|| MergeError::NotConfigured(dataset.clone()))?;
        Ok(table.get(nik).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::CatalogueDataset;
    use crate::record::test_support::*;

    fn index() -> InMemoryIdentityIndex {
        InMemoryIdentityIndex::from_catalogue(DatasetCatalogue::new(vec![
            CatalogueDataset {
                info: DatasetInfo {
                    id: dataset("seksi-p2p"),
                    name: "Seksi P2P".into(),
                },
                records: vec![
                    record("rec-001", "123", "Budi Santoso", "Jl. Merdeka 1"),
                    record("rec-dup", "123", "Budi Duplicate", "Elsewhere"),
                ],
            },
            CatalogueDataset {
                info: DatasetInfo {
                    id: dataset("seksi-sdk"),
                    name: "Seksi SDK".into(),
                },
                records: vec![record("rec-003", "456", "Agus Wijaya", "Bandung")],
            },
        ]))
    }

    #[tokio::test]
    async fn lookup_finds_first_record_for_nik() {
        let index = index();
        let found = index
            .lookup(&nik("123"), &dataset("seksi-p2p"))
            .await
            .expect("lookup should succeed");

        assert_eq!(found.map(|r| r.id), Some("rec-001".to_string()));
        assert_eq!(index.record_count(), 2);
    }

    #[tokio::test]
    async fn lookup_miss_is_none() {
        let found = index()
            .lookup(&nik("123"), &dataset("seksi-sdk"))
            .await
            .expect("lookup should succeed");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn lookup_unknown_dataset_is_not_configured() {
        let err = index()
            .lookup(&nik("123"), &dataset("seksi-kesmas"))
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::NotConfigured(id) if id.as_str() == "seksi-kesmas"));
    }

    #[test]
    fn datasets_keep_catalogue_order() {
        let ids: Vec<_> = index()
            .datasets()
            .into_iter()
            .map(|d| d.id.to_string())
            .collect();
        assert_eq!(ids, vec!["seksi-p2p", "seksi-sdk"]);
    }
}
