//! Persistence of confirmed merges.
//!
//! A [`MergeSink`] receives a merged record only after the user has confirmed it; nothing
//! earlier in a session writes anywhere. [`FileMergeSink`] stores each confirmation as a YAML
//! file in its own sharded directory:
//!
//! ```text
//! <data_dir>/merged/<s1>/<s2>/<uuid>/merged-record.yaml
//! ```

use crate::constants::MERGED_RECORD_FILENAME;
use crate::error::{MergeError, MergeResult};
use crate::record::{MergeMethod, MergedRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dinkes_types::{DatasetId, Nik};
use dinkes_uuid::ShardableUuid;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Acknowledgement that a merged record was stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReceipt {
    pub id: ShardableUuid,
    pub nik: Nik,
    pub confirmed_at: DateTime<Utc>,
}

/// A confirmed merge as stored.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredMerge {
    pub receipt: MergeReceipt,
    pub record: MergedRecord,
}

/// Destination for confirmed merged records.
#[async_trait]
pub trait MergeSink: Send + Sync {
    /// Stores `record` verbatim, provenance fields included.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError::Persistence`] if the record could not be stored.
    async fn store(&self, record: &MergedRecord) -> MergeResult<MergeReceipt>;
}

// ============================================================================
// File sink
// ============================================================================

/// Writes confirmed merges under a `merged/` directory.
#[derive(Clone, Debug)]
pub struct FileMergeSink {
    merged_dir: PathBuf,
}

impl FileMergeSink {
    pub fn new(merged_dir: impl Into<PathBuf>) -> Self {
        Self {
            merged_dir: merged_dir.into(),
        }
    }

    pub fn merged_dir(&self) -> &Path {
        &self.merged_dir
    }

    /// Path of the stored file for `id`.
    pub fn record_path(&self, id: &ShardableUuid) -> PathBuf {
        id.sharded_dir(&self.merged_dir).join(MERGED_RECORD_FILENAME)
    }

    /// Reads back a stored merge.
    ///
    /// # Errors
    ///
    /// - [`MergeError::FileRead`] if the file cannot be read
    /// - [`MergeError::StoredMerge`] if its contents do not match the stored schema
    pub fn load(&self, id: &ShardableUuid) -> MergeResult<StoredMerge> {
        let text = fs::read_to_string(self.record_path(id)).map_err(MergeError::FileRead)?;
        MergedRecordFile::parse(&text)
    }

    fn write(&self, record: &MergedRecord) -> MergeResult<MergeReceipt> {
        let receipt = write_in_fresh_dir(&self.merged_dir, ShardableUuid::new, |id, dir| {
            let stored = StoredMerge {
                receipt: MergeReceipt {
                    id,
                    nik: record.nik.clone(),
                    confirmed_at: Utc::now(),
                },
                record: record.clone(),
            };
            let yaml = MergedRecordFile::render(&stored)?;
            fs::write(dir.join(MERGED_RECORD_FILENAME), yaml).map_err(MergeError::FileWrite)?;
            Ok(stored.receipt)
        })?;

        tracing::info!(
            "stored merged record for NIK {} as {}",
            receipt.nik,
            receipt.id
        );
        Ok(receipt)
    }
}

#[async_trait]
impl MergeSink for FileMergeSink {
    async fn store(&self, record: &MergedRecord) -> MergeResult<MergeReceipt> {
        self.write(record)
            .map_err(|e| MergeError::Persistence(e.to_string()))
    }
}

/// Allocates a fresh sharded directory and fills it with `fill`.
///
/// If `fill` fails the directory is removed again, so a failed store leaves nothing behind.
fn write_in_fresh_dir<T>(
    base_dir: &Path,
    uuid_source: impl FnMut() -> ShardableUuid,
    fill: impl FnOnce(ShardableUuid, &Path) -> MergeResult<T>,
) -> MergeResult<T> {
    let (id, dir) = create_unique_merge_dir(base_dir, uuid_source)?;
    fill(id, &dir).inspect_err(|_| {
        if let Err(cleanup) = fs::remove_dir_all(&dir) {
            tracing::warn!(
                "could not remove incomplete merge directory {}: {}",
                dir.display(),
                cleanup
            );
        }
    })
}

/// Creates a fresh sharded directory under `base_dir`.
///
/// Retries with a new UUID up to 5 times if the directory already exists.
///
/// # Errors
///
/// Returns [`MergeError::DirCreation`] if a parent cannot be created or no unique directory
/// could be allocated.
fn create_unique_merge_dir(
    base_dir: &Path,
    mut uuid_source: impl FnMut() -> ShardableUuid,
) -> MergeResult<(ShardableUuid, PathBuf)> {
    for _attempt in 0..5 {
        let uuid = uuid_source();
        let candidate = uuid.sharded_dir(base_dir);

        if candidate.exists() {
            continue;
        }

        if let Some(parent) = candidate.parent() {
            fs::create_dir_all(parent).map_err(MergeError::DirCreation)?;
        }

        match fs::create_dir(&candidate) {
            Ok(()) => return Ok((uuid, candidate)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(MergeError::DirCreation(e)),
        }
    }

    Err(MergeError::DirCreation(io::Error::new(
        ErrorKind::AlreadyExists,
        "failed to allocate a unique merge directory after 5 attempts",
    )))
}

// ============================================================================
// Memory sink
// ============================================================================

/// Keeps confirmed merges in memory.
#[derive(Debug, Default)]
pub struct MemoryMergeSink {
    stored: Mutex<Vec<StoredMerge>>,
}

impl MemoryMergeSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything stored so far, oldest first.
    pub fn stored(&self) -> MergeResult<Vec<StoredMerge>> {
        self.stored
            .lock()
            .map(|stored| stored.clone())
            .map_err(|_| MergeError::Persistence("memory sink lock poisoned".into()))
    }
}

#[async_trait]
impl MergeSink for MemoryMergeSink {
    async fn store(&self, record: &MergedRecord) -> MergeResult<MergeReceipt> {
        let receipt = MergeReceipt {
            id: ShardableUuid::new(),
            nik: record.nik.clone(),
            confirmed_at: Utc::now(),
        };
        let mut stored = self
            .stored
            .lock()
            .map_err(|_| MergeError::Persistence("memory sink lock poisoned".into()))?;
        stored.push(StoredMerge {
            receipt: receipt.clone(),
            record: record.clone(),
        });
        Ok(receipt)
    }
}

// ============================================================================
// Stored file format
// ============================================================================

/// YAML format of a stored merge.
pub struct MergedRecordFile;

impl MergedRecordFile {
    /// Parses a stored merge file.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError::StoredMerge`] if:
    /// - the YAML does not match the schema (unknown keys included),
    /// - the id, NIK, dataset ids, or method are invalid,
    /// - the confidence score is outside `[0, 1]`.
    pub fn parse(yaml_text: &str) -> MergeResult<StoredMerge> {
        let deserializer = serde_yaml::Deserializer::from_str(yaml_text);
        let wire = match serde_path_to_error::deserialize::<_, StoredMergeWire>(deserializer) {
            Ok(parsed) => parsed,
            Err(err) => {
                let path = err.path().to_string();
                let source = err.into_inner();
                let path = if path.is_empty() || path == "." {
                    "<root>".to_string()
                } else {
                    path
                };
                return Err(MergeError::StoredMerge(format!(
                    "schema mismatch at {path}: {source}"
                )));
            }
        };
        wire_to_domain(wire)
    }

    /// Renders a stored merge as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError::YamlSerialization`] if serialisation fails.
    pub fn render(stored: &StoredMerge) -> MergeResult<String> {
        serde_yaml::to_string(&domain_to_wire(stored)).map_err(MergeError::YamlSerialization)
    }
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct StoredMergeWire {
    merge: ReceiptWire,
    record: RecordWire,
    provenance: ProvenanceWire,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReceiptWire {
    id: String,
    confirmed_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RecordWire {
    id: String,
    nik: String,
    name: String,
    address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dob: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_visit: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProvenanceWire {
    method: String,
    confidence_score: f64,
    explanation: String,
    sources: Vec<String>,
}

fn domain_to_wire(stored: &StoredMerge) -> StoredMergeWire {
    let record = &stored.record;
    StoredMergeWire {
        merge: ReceiptWire {
            id: stored.receipt.id.to_string(),
            confirmed_at: stored.receipt.confirmed_at,
        },
        record: RecordWire {
            id: record.id.clone(),
            nik: record.nik.to_string(),
            name: record.name.clone(),
            address: record.address.clone(),
            dob: record.date_of_birth.clone(),
            phone: record.phone.clone(),
            last_visit: record.last_visit.clone(),
        },
        provenance: ProvenanceWire {
            method: record.method.as_str().to_string(),
            confidence_score: record.confidence_score,
            explanation: record.explanation.clone(),
            sources: record.sources.iter().map(ToString::to_string).collect(),
        },
    }
}

fn wire_to_domain(wire: StoredMergeWire) -> MergeResult<StoredMerge> {
    let id = ShardableUuid::parse(&wire.merge.id)
        .map_err(|e| MergeError::StoredMerge(format!("merge.id: {e}")))?;
    let nik = Nik::parse(&wire.record.nik)
        .map_err(|e| MergeError::StoredMerge(format!("record.nik: {e}")))?;

    let method = match wire.provenance.method.as_str() {
        "singleRecord" => MergeMethod::SingleRecord,
        "collaborator" => MergeMethod::Collaborator,
        "fallback" => MergeMethod::Fallback,
        other => {
            return Err(MergeError::StoredMerge(format!(
                "provenance.method: unknown method '{other}'"
            )))
        }
    };

    let score = wire.provenance.confidence_score;
    if !(0.0..=1.0).contains(&score) {
        return Err(MergeError::StoredMerge(format!(
            "provenance.confidence_score: {score} is outside [0, 1]"
        )));
    }

    let sources = wire
        .provenance
        .sources
        .iter()
        .map(|s| DatasetId::parse(s))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| MergeError::StoredMerge(format!("provenance.sources: {e}")))?;

    Ok(StoredMerge {
        receipt: MergeReceipt {
            id,
            nik: nik.clone(),
            confirmed_at: wire.merge.confirmed_at,
        },
        record: MergedRecord {
            nik,
            id: wire.record.id,
            name: wire.record.name,
            address: wire.record.address,
            date_of_birth: wire.record.dob,
            phone: wire.record.phone,
            last_visit: wire.record.last_visit,
            explanation: wire.provenance.explanation,
            confidence_score: score,
            method,
            sources,
        },
    })
}
