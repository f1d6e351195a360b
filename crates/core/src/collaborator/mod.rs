//! Boundary to the external reconciliation collaborator.
//!
//! The collaborator is a generative-language capability: given two or more candidate records
//! it returns a merged record, an explanation, and a confidence score. Nothing it returns is
//! trusted until [`validate_response`] has checked it, and any failure here is recoverable:
//! the [`Reconciler`](crate::reconcile::Reconciler) falls back to its rule-based policy.

mod ollama;

pub use ollama::{parse_model_output, OllamaReconciler};

use crate::error::MergeError;
use crate::record::{CandidateSet, Record};
use async_trait::async_trait;
use dinkes_types::Nik;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A capability that can merge candidate records.
#[async_trait]
pub trait ReconciliationCollaborator: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Asks the collaborator to merge `request.candidates`.
    ///
    /// The response is unvalidated.
    async fn reconcile(
        &self,
        request: &CollaboratorRequest,
    ) -> Result<CollaboratorResponse, CollaboratorError>;
}

#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
    #[error("collaborator timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid collaborator response: {0}")]
    InvalidResponse(String),
    #[error("collaborator returned NIK '{actual}', expected '{expected}'")]
    NikMismatch { expected: String, actual: String },
}

impl From<CollaboratorError> for MergeError {
    fn from(err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::Unavailable(reason) => MergeError::CollaboratorUnavailable(reason),
            CollaboratorError::Timeout(after) => MergeError::CollaboratorTimeout(after),
            other @ (CollaboratorError::InvalidResponse(_)
            | CollaboratorError::NikMismatch { .. }) => {
                MergeError::InvalidCollaboratorResponse(other.to_string())
            }
        }
    }
}

/// Payload sent to the collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaboratorRequest {
    pub nik: Nik,
    pub candidates: Vec<CollaboratorCandidate>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaboratorCandidate {
    pub dataset_name: String,
    pub record: Record,
}

impl CollaboratorRequest {
    pub fn from_candidates(set: &CandidateSet) -> Self {
        Self {
            nik: set.nik().clone(),
            candidates: set
                .iter()
                .map(|c| CollaboratorCandidate {
                    dataset_name: c.dataset_name.clone(),
                    record: c.record.clone(),
                })
                .collect(),
        }
    }
}

/// Collaborator output, as received.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaboratorResponse {
    pub merged_record: CollaboratorRecord,
    #[serde(rename = "mergeExplanation", alias = "explanation")]
    pub explanation: String,
    pub confidence_score: f64,
}

/// The merged record inside a collaborator response.
///
/// The NIK stays a plain string here; it is only compared against the query once the
/// response is validated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaboratorRecord {
    #[serde(default)]
    pub id: String,
    pub nik: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default, rename = "dob", alias = "dateOfBirth")]
    pub date_of_birth: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub last_visit: Option<String>,
}

/// Checks a collaborator response against the query NIK.
///
/// A confidence score outside `[0, 1]` is clamped with a warning.
///
/// # Errors
///
/// - [`CollaboratorError::NikMismatch`] if the merged NIK differs from `query_nik`
/// - [`CollaboratorError::InvalidResponse`] for a non-finite score, or a blank name, address or
///   explanation
pub fn validate_response(
    query_nik: &Nik,
    mut response: CollaboratorResponse,
) -> Result<CollaboratorResponse, CollaboratorError> {
    let returned_nik = response.merged_record.nik.trim().to_string();
    if returned_nik != query_nik.as_str() {
        return Err(CollaboratorError::NikMismatch {
            expected: query_nik.to_string(),
            actual: returned_nik,
        });
    }
    response.merged_record.nik = returned_nik;

    if response.merged_record.name.trim().is_empty() {
        return Err(CollaboratorError::InvalidResponse(
            "merged record name is blank".into(),
        ));
    }
    if response.merged_record.address.trim().is_empty() {
        return Err(CollaboratorError::InvalidResponse(
            "merged record address is blank".into(),
        ));
    }

    if !response.confidence_score.is_finite() {
        return Err(CollaboratorError::InvalidResponse(format!(
            "confidence score {} is not a number in [0, 1]",
            response.confidence_score
        )));
    }
    if !(0.0..=1.0).contains(&response.confidence_score) {
        let clamped = response.confidence_score.clamp(0.0, 1.0);
        tracing::warn!(
            "collaborator confidence score {} out of range, clamped to {}",
            response.confidence_score,
            clamped
        );
        response.confidence_score = clamped;
    }

    if response.explanation.trim().is_empty() {
        return Err(CollaboratorError::InvalidResponse(
            "explanation is empty".into(),
        ));
    }

    Ok(response)
}
