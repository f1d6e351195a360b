use crate::session::SessionPhase;
use dinkes_types::DatasetId;
use serde::Serialize;
use std::time::Duration;

/// A single dataset lookup that could not be completed.
///
/// Collected alongside partial results so callers can show which sections were unreachable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupFailure {
    pub dataset_id: DatasetId,
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("invalid text: {0}")]
    Text(#[from] dinkes_types::TextError),
    #[error("invalid UUID: {0}")]
    Uuid(#[from] dinkes_uuid::UuidError),

    #[error("dataset '{0}' is not configured")]
    NotConfigured(DatasetId),
    #[error("lookup failed for dataset '{dataset_id}': {reason}")]
    LookupFailed { dataset_id: DatasetId, reason: String },
    #[error("search failed: no dataset could be read ({} lookups failed)", .failures.len())]
    NoDataAvailable { failures: Vec<LookupFailure> },

    #[error("reconcile requires at least one candidate record")]
    NoCandidates,
    #[error("candidate set is inconsistent: {0}")]
    InconsistentCandidates(String),
    #[error("reconciliation collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),
    #[error("invalid collaborator response: {0}")]
    InvalidCollaboratorResponse(String),
    #[error("reconciliation collaborator timed out after {0:?}")]
    CollaboratorTimeout(Duration),

    #[error("cannot {operation} while session is {state:?}")]
    InvalidTransition {
        operation: &'static str,
        state: SessionPhase,
    },
    #[error("failed to persist merged record: {0}")]
    Persistence(String),

    #[error("failed to read file: {0}")]
    FileRead(std::io::Error),
    #[error("failed to write file: {0}")]
    FileWrite(std::io::Error),
    #[error("failed to create directory: {0}")]
    DirCreation(std::io::Error),
    #[error("dataset catalogue is invalid: {0}")]
    Catalogue(String),
    #[error("stored merge file is invalid: {0}")]
    StoredMerge(String),
    #[error("failed to serialize YAML: {0}")]
    YamlSerialization(serde_yaml::Error),
}

pub type MergeResult<T> = std::result::Result<T, MergeError>;
