//! Constants used throughout the dinkes core crate.

/// Default directory for merge output when no explicit directory is configured.
pub const DEFAULT_DATA_DIR: &str = "dinkes_data";

/// Default location of the dataset catalogue, relative to the workspace root.
pub const DEFAULT_CATALOGUE_PATH: &str = "data/datasets.yaml";

/// Directory name (under the data directory) for confirmed merged records.
pub const MERGED_DIR_NAME: &str = "merged";

/// Filename of a stored merged record inside its sharded directory.
pub const MERGED_RECORD_FILENAME: &str = "merged-record.yaml";

/// Ceiling applied to a reconciliation collaborator call unless configured otherwise.
pub const DEFAULT_COLLABORATOR_TIMEOUT_SECS: u64 = 30;

/// Largest collaborator timeout accepted from configuration.
pub const MAX_COLLABORATOR_TIMEOUT_SECS: u64 = 600;

/// Model requested from an Ollama-compatible collaborator when none is configured.
pub const DEFAULT_COLLABORATOR_MODEL: &str = "llama3.1";

/// Explanation attached to a merge of exactly one candidate.
pub const SINGLE_RECORD_EXPLANATION: &str =
    "Only one record was found, so no merge was necessary.";

