//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and passed into the core. Nothing below
//! reads environment variables while handling a request.

use crate::constants::{
    DEFAULT_CATALOGUE_PATH, DEFAULT_COLLABORATOR_TIMEOUT_SECS, MAX_COLLABORATOR_TIMEOUT_SECS,
    MERGED_DIR_NAME,
};
use crate::error::{MergeError, MergeResult};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where the reconciliation collaborator lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollaboratorConfig {
    base_url: String,
    model: String,
}

impl CollaboratorConfig {
    /// # Errors
    ///
    /// Returns [`MergeError::InvalidInput`] if `base_url` is not an http(s) URL or `model` is
    /// blank.
    pub fn new(base_url: &str, model: &str) -> MergeResult<Self> {
        let base_url = base_url.trim();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(MergeError::InvalidInput(format!(
                "collaborator URL must start with http:// or https://, got '{base_url}'"
            )));
        }
        let model = model.trim();
        if model.is_empty() {
            return Err(MergeError::InvalidInput(
                "collaborator model cannot be empty".into(),
            ));
        }
        Ok(Self {
            base_url: base_url.to_string(),
            model: model.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    data_dir: PathBuf,
    catalogue_path: PathBuf,
    collaborator: Option<CollaboratorConfig>,
    collaborator_timeout: Duration,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError::InvalidInput`] if the collaborator timeout is zero or longer than
    /// [`MAX_COLLABORATOR_TIMEOUT_SECS`].
    pub fn new(
        data_dir: PathBuf,
        catalogue_path: PathBuf,
        collaborator: Option<CollaboratorConfig>,
        collaborator_timeout: Duration,
    ) -> MergeResult<Self> {
        if collaborator_timeout.is_zero() {
            return Err(MergeError::InvalidInput(
                "collaborator timeout must be greater than zero".into(),
            ));
        }
        if collaborator_timeout > Duration::from_secs(MAX_COLLABORATOR_TIMEOUT_SECS) {
            return Err(MergeError::InvalidInput(format!(
                "collaborator timeout cannot exceed {MAX_COLLABORATOR_TIMEOUT_SECS}s"
            )));
        }

        Ok(Self {
            data_dir,
            catalogue_path,
            collaborator,
            collaborator_timeout,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn merged_dir(&self) -> PathBuf {
        self.data_dir.join(MERGED_DIR_NAME)
    }

    pub fn catalogue_path(&self) -> &Path {
        &self.catalogue_path
    }

    pub fn collaborator(&self) -> Option<&CollaboratorConfig> {
        self.collaborator.as_ref()
    }

    pub fn collaborator_timeout(&self) -> Duration {
        self.collaborator_timeout
    }
}

/// Parse a collaborator timeout (whole seconds) from a raw environment value.
///
/// A missing or blank value yields the default of [`DEFAULT_COLLABORATOR_TIMEOUT_SECS`].
pub fn collaborator_timeout_from_env_value(value: Option<&str>) -> MergeResult<Duration> {
    let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(Duration::from_secs(DEFAULT_COLLABORATOR_TIMEOUT_SECS));
    };
    raw.parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| {
            MergeError::InvalidInput(format!(
                "collaborator timeout must be a whole number of seconds, got '{raw}'"
            ))
        })
}

/// Resolve the dataset catalogue path without reading environment variables.
///
/// If `override_path` is provided, it must be an existing file. Otherwise this looks for
/// `data/datasets.yaml` relative to the current working directory and then walks up from
/// `CARGO_MANIFEST_DIR`.
pub fn resolve_catalogue_path(override_path: Option<PathBuf>) -> MergeResult<PathBuf> {
    if let Some(path) = override_path {
        if path.is_file() {
            return Ok(path);
        }
        return Err(MergeError::InvalidInput(format!(
            "catalogue file {} does not exist",
            path.display()
        )));
    }

    let cwd_relative = PathBuf::from(DEFAULT_CATALOGUE_PATH);
    if cwd_relative.is_file() {
        return Ok(cwd_relative);
    }

    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    for ancestor in manifest_dir.ancestors() {
        let candidate = ancestor.join(DEFAULT_CATALOGUE_PATH);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    Err(MergeError::InvalidInput(format!(
        "could not locate {DEFAULT_CATALOGUE_PATH}"
    )))
}
