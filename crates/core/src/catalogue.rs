//! Dataset catalogue loading.
//!
//! The catalogue is a YAML document listing each health-office section and the person records
//! it holds:
//!
//! ```yaml
//! datasets:
//!   - id: seksi-p2p
//!     name: Seksi Pencegahan dan Penanggulangan Penyakit
//!     records:
//!       - id: rec-001
//!         nik: "3171234567890001"
//!         name: Budi Santoso
//!         address: Jl. Merdeka No. 1, Jakarta
//!         dob: "1985-08-17"
//!         phone: "081234567890"
//!         lastVisit: "2024-05-20"
//! ```
//!
//! It stands in for the document database the dashboard reads from and is loaded once at
//! startup into an [`InMemoryIdentityIndex`](crate::index::InMemoryIdentityIndex).

use crate::error::{MergeError, MergeResult};
use crate::record::{DatasetInfo, Record};
use dinkes_types::{DatasetId, Nik};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;

/// One dataset with its records, validated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogueDataset {
    pub info: DatasetInfo,
    pub records: Vec<Record>,
}

/// All datasets known to the deployment, in file order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DatasetCatalogue {
    datasets: Vec<CatalogueDataset>,
}

impl DatasetCatalogue {
    pub fn new(datasets: Vec<CatalogueDataset>) -> Self {
        Self { datasets }
    }

    pub fn datasets(&self) -> &[CatalogueDataset] {
        &self.datasets
    }

    pub fn into_datasets(self) -> Vec<CatalogueDataset> {
        self.datasets
    }

    /// Reads and parses the catalogue at `path`.
    ///
    /// # Errors
    ///
    /// - [`MergeError::FileRead`] if the file cannot be read
    /// - any error from [`DatasetCatalogue::parse`]
    pub fn load(path: &Path) -> MergeResult<Self> {
        let text = std::fs::read_to_string(path).map_err(MergeError::FileRead)?;
        let catalogue = Self::parse(&text)?;
        tracing::info!(
            "loaded {} datasets from {}",
            catalogue.datasets.len(),
            path.display()
        );
        Ok(catalogue)
    }

    /// Parses catalogue YAML.
    ///
    /// Records with a missing or malformed NIK are skipped with a warning rather than failing
    /// the whole catalogue, since ingested section data is not under this service's control.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError::Catalogue`] if:
    /// - the YAML does not match the catalogue schema (the failing path is reported),
    /// - a dataset id is invalid or appears twice.
    pub fn parse(yaml_text: &str) -> MergeResult<Self> {
        let deserializer = serde_yaml::Deserializer::from_str(yaml_text);
        let wire = match serde_path_to_error::deserialize::<_, CatalogueWire>(deserializer) {
            Ok(parsed) => parsed,
            Err(err) => {
                let path = err.path().to_string();
                let source = err.into_inner();
                let path = if path.is_empty() || path == "." {
                    "<root>".to_string()
                } else {
                    path
                };
                return Err(MergeError::Catalogue(format!(
                    "schema mismatch at {path}: {source}"
                )));
            }
        };

        let mut seen = BTreeSet::new();
        let mut datasets = Vec::with_capacity(wire.datasets.len());
        for dataset in wire.datasets {
            let id = DatasetId::parse(&dataset.id).map_err(|e| {
                MergeError::Catalogue(format!("invalid dataset id '{}': {e}", dataset.id))
            })?;
            if !seen.insert(id.clone()) {
                return Err(MergeError::Catalogue(format!(
                    "dataset '{id}' is defined more than once"
                )));
            }

            let name = if dataset.name.trim().is_empty() {
                id.to_string()
            } else {
                dataset.name.trim().to_string()
            };

            let records = dataset
                .records
                .into_iter()
                .filter_map(|r| match Nik::parse(&r.nik) {
                    Ok(nik) => Some(Record {
                        id: r.id,
                        nik,
                        name: r.name,
                        address: r.address,
                        date_of_birth: r.dob,
                        phone: r.phone,
                        last_visit: r.last_visit,
                    }),
                    Err(e) => {
                        tracing::warn!(
                            "skipping record '{}' in dataset '{}': {}",
                            r.id,
                            id,
                            e
                        );
                        None
                    }
                })
                .collect();

            datasets.push(CatalogueDataset {
                info: DatasetInfo { id, name },
                records,
            });
        }

        Ok(Self { datasets })
    }
}

// ============================================================================
// Wire types (internal)
// ============================================================================

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogueWire {
    #[serde(default)]
    datasets: Vec<DatasetWire>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DatasetWire {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    records: Vec<RecordWire>,
}

/// Ingested records may carry extra columns; only the tracked ones are read.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordWire {
    id: String,
    #[serde(default)]
    nik: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    address: String,
    #[serde(default, alias = "dateOfBirth")]
    dob: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    last_visit: Option<String>,
}
