//! Reconciliation engine.
//!
//! Produces exactly one [`MergedRecord`] from a non-empty [`CandidateSet`]:
//! - one candidate is copied verbatim with confidence `1.0`, without calling anyone
//! - several candidates go to the collaborator, bounded by a timeout
//! - any collaborator failure falls back to [`fallback_merge`]

mod fallback;

pub use fallback::fallback_merge;

use crate::collaborator::{
    validate_response, CollaboratorError, CollaboratorRequest, ReconciliationCollaborator,
};
use crate::constants::{DEFAULT_COLLABORATOR_TIMEOUT_SECS, SINGLE_RECORD_EXPLANATION};
use crate::error::{MergeError, MergeResult};
use crate::record::{CandidateSet, MergeMethod, MergedRecord};
use std::sync::Arc;
use std::time::Duration;

/// Turns candidate sets into merged records.
#[derive(Clone)]
pub struct Reconciler {
    collaborator: Option<Arc<dyn ReconciliationCollaborator>>,
    timeout: Duration,
}

impl Reconciler {
    /// Creates a reconciler. `timeout` bounds each collaborator call.
    pub fn new(
        collaborator: Option<Arc<dyn ReconciliationCollaborator>>,
        timeout: Duration,
    ) -> Self {
        Self {
            collaborator,
            timeout,
        }
    }

    /// A reconciler that always uses the rule-based policy.
    pub fn rule_based() -> Self {
        Self::new(None, Duration::from_secs(DEFAULT_COLLABORATOR_TIMEOUT_SECS))
    }

    pub fn has_collaborator(&self) -> bool {
        self.collaborator.is_some()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Merges `set` into one record.
    ///
    /// # Errors
    ///
    /// - [`MergeError::NoCandidates`] if `set` is empty
    pub async fn reconcile(&self, set: &CandidateSet) -> MergeResult<MergedRecord> {
        match set.len() {
            0 => Err(MergeError::NoCandidates),
            1 => single_merge(set),
            _ => {
                if self.collaborator.is_none() {
                    tracing::debug!("no collaborator configured, using rule-based merge");
                    return fallback_merge(set);
                }
                match self.reconcile_via_collaborator(set).await {
                    Ok(merged) => Ok(merged),
                    Err(err) => {
                        let err = MergeError::from(err);
                        tracing::warn!(
                            "collaborator merge for NIK {} failed, using rule-based merge: {}",
                            set.nik(),
                            err
                        );
                        fallback_merge(set)
                    }
                }
            }
        }
    }

    /// Asks the collaborator to merge `set` and validates its answer.
    ///
    /// A blank `id` in the answer is replaced by the most-trusted candidate's id.
    ///
    /// # Errors
    ///
    /// - [`CollaboratorError::Unavailable`] if no collaborator is configured or it cannot be
    ///   reached
    /// - [`CollaboratorError::Timeout`] if it does not answer within the timeout
    /// - [`CollaboratorError::InvalidResponse`] / [`CollaboratorError::NikMismatch`] if its
    ///   answer fails validation
    pub async fn reconcile_via_collaborator(
        &self,
        set: &CandidateSet,
    ) -> Result<MergedRecord, CollaboratorError> {
        let collaborator = self
            .collaborator
            .as_ref()
            .ok_or_else(|| CollaboratorError::Unavailable("no collaborator configured".into()))?;
        let trusted = fallback::most_trusted(set).ok_or_else(|| {
            CollaboratorError::InvalidResponse("no candidates to merge".into())
        })?;

        let request = CollaboratorRequest::from_candidates(set);
        let response = tokio::time::timeout(self.timeout, collaborator.reconcile(&request))
            .await
            .map_err(|_| CollaboratorError::Timeout(self.timeout))??;
        let response = validate_response(set.nik(), response)?;

        tracing::info!(
            "{} merged {} records for NIK {} (confidence {:.2})",
            collaborator.name(),
            set.len(),
            set.nik(),
            response.confidence_score
        );

        let record = response.merged_record;
        let id = if record.id.trim().is_empty() {
            trusted.record.id.clone()
        } else {
            record.id.trim().to_string()
        };

        Ok(MergedRecord {
            nik: set.nik().clone(),
            id,
            name: record.name,
            address: record.address,
            date_of_birth: non_blank(record.date_of_birth),
            phone: non_blank(record.phone),
            last_visit: non_blank(record.last_visit),
            explanation: response.explanation,
            confidence_score: response.confidence_score,
            method: MergeMethod::Collaborator,
            sources: set.dataset_ids(),
        })
    }
}

fn single_merge(set: &CandidateSet) -> MergeResult<MergedRecord> {
    let only = set.candidates().first().ok_or(MergeError::NoCandidates)?;
    let record = &only.record;
    Ok(MergedRecord {
        nik: set.nik().clone(),
        id: record.id.clone(),
        name: record.name.clone(),
        address: record.address.clone(),
        date_of_birth: record.date_of_birth.clone(),
        phone: record.phone.clone(),
        last_visit: record.last_visit.clone(),
        explanation: SINGLE_RECORD_EXPLANATION.to_string(),
        confidence_score: 1.0,
        method: MergeMethod::SingleRecord,
        sources: vec![only.dataset_id.clone()],
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::test_support::{response, Script, ScriptedCollaborator};
    use crate::record::test_support::*;

    fn scenario_b() -> CandidateSet {
        let mut first = record("rec-001", "123", "Budi Santoso", "Jl. Merdeka No.1, Jakarta");
        first.last_visit = Some("2023-12-01".into());
        let mut second = record(
            "rec-004",
            "123",
            "Budi Santoso",
            "Jl. Merdeka No.1, Jakarta Pusat",
        );
        second.last_visit = Some("2024-05-20".into());
        CandidateSet::new(
            nik("123"),
            vec![candidate("seksi-p2p", first), candidate("seksi-kesmas", second)],
        )
        .unwrap()
    }

    fn with(script: Script) -> (Reconciler, Arc<ScriptedCollaborator>) {
        let collaborator = Arc::new(ScriptedCollaborator::new(script));
        let reconciler = Reconciler::new(
            Some(collaborator.clone() as Arc<dyn ReconciliationCollaborator>),
            Duration::from_secs(5),
        );
        (reconciler, collaborator)
    }

    #[tokio::test]
    async fn single_candidate_is_copied_without_collaborator() {
        let mut only = record("rec-x", "123", "Budi S.", "Jl. Merdeka 1");
        only.last_visit = Some("2023-12-01".into());
        let set = CandidateSet::new(nik("123"), vec![candidate("seksi-p2p", only.clone())]).unwrap();
        let (reconciler, collaborator) = with(Script::Respond(response("123", "ignored", 0.1)));

        let merged = reconciler.reconcile(&set).await.unwrap();

        assert_eq!(merged.to_record(), only);
        assert_eq!(merged.confidence_score, 1.0);
        assert_eq!(merged.explanation, SINGLE_RECORD_EXPLANATION);
        assert_eq!(merged.method, MergeMethod::SingleRecord);
        assert_eq!(collaborator.calls(), 0);
    }

    #[tokio::test]
    async fn empty_set_is_rejected() {
        let err = Reconciler::rule_based()
            .reconcile(&CandidateSet::empty(nik("123")))
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::NoCandidates));
    }

    #[tokio::test]
    async fn collaborator_answer_is_adopted() {
        let (reconciler, collaborator) =
            with(Script::Respond(response("123", "Jl. Merdeka No.1, Jakarta Pusat", 0.87)));

        let merged = reconciler.reconcile(&scenario_b()).await.unwrap();

        assert_eq!(collaborator.calls(), 1);
        assert_eq!(merged.method, MergeMethod::Collaborator);
        assert_eq!(merged.id, "merged-1");
        assert_eq!(merged.confidence_score, 0.87);
        assert_eq!(merged.explanation, "Chose the longer address.");
        assert_eq!(merged.sources.len(), 2);
    }

    #[tokio::test]
    async fn blank_collaborator_id_uses_trusted_source() {
        let mut answer = response("123", "Jakarta Pusat", 0.9);
        answer.merged_record.id = " ".into();
        let (reconciler, _) = with(Script::Respond(answer));

        let merged = reconciler.reconcile(&scenario_b()).await.unwrap();
        assert_eq!(merged.id, "rec-004");
    }

    #[tokio::test]
    async fn out_of_range_score_is_clamped() {
        let (reconciler, _) = with(Script::Respond(response("123", "Jakarta", 3.5)));
        let merged = reconciler.reconcile(&scenario_b()).await.unwrap();
        assert_eq!(merged.confidence_score, 1.0);
        assert_eq!(merged.method, MergeMethod::Collaborator);
    }

    #[tokio::test]
    async fn nik_mismatch_falls_back() {
        let (reconciler, _) = with(Script::Respond(response("999", "Jakarta", 0.9)));

        let merged = reconciler.reconcile(&scenario_b()).await.unwrap();
        assert_eq!(merged.method, MergeMethod::Fallback);
        assert_eq!(merged, fallback_merge(&scenario_b()).unwrap());
    }

    #[tokio::test]
    async fn answer_without_name_or_address_falls_back() {
        let mut answer = response("123", " ", 0.95);
        answer.merged_record.name = String::new();
        let (reconciler, collaborator) = with(Script::Respond(answer));

        let merged = reconciler.reconcile(&scenario_b()).await.unwrap();
        assert_eq!(collaborator.calls(), 1);
        assert_eq!(merged.method, MergeMethod::Fallback);
        assert!(!merged.name.trim().is_empty());
        assert_eq!(merged.address, "Jl. Merdeka No.1, Jakarta Pusat");
    }

    #[tokio::test]
    async fn unavailable_collaborator_falls_back() {
        let (reconciler, _) = with(Script::Fail(CollaboratorError::Unavailable(
            "connection refused".into(),
        )));

        let merged = reconciler.reconcile(&scenario_b()).await.unwrap();
        assert_eq!(merged.method, MergeMethod::Fallback);
        assert_eq!(merged.address, "Jl. Merdeka No.1, Jakarta Pusat");
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_collaborator_times_out_into_fallback() {
        let (reconciler, collaborator) = with(Script::Hang);

        let merged = reconciler.reconcile(&scenario_b()).await.unwrap();
        assert_eq!(collaborator.calls(), 1);
        assert_eq!(merged.method, MergeMethod::Fallback);

        let err = reconciler
            .reconcile_via_collaborator(&scenario_b())
            .await
            .unwrap_err();
        assert_eq!(err, CollaboratorError::Timeout(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn fallback_path_is_reproducible() {
        let (reconciler, _) = with(Script::Fail(CollaboratorError::InvalidResponse("junk".into())));
        let set = scenario_b();

        let first = reconciler.reconcile(&set).await.unwrap();
        let second = reconciler.reconcile(&set).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn rule_based_reconciler_never_needs_collaborator() {
        let reconciler = Reconciler::rule_based();
        assert!(!reconciler.has_collaborator());

        let merged = reconciler.reconcile(&scenario_b()).await.unwrap();
        assert_eq!(merged.method, MergeMethod::Fallback);
        assert!(matches!(
            reconciler.reconcile_via_collaborator(&scenario_b()).await,
            Err(CollaboratorError::Unavailable(_))
        ));
    }
}
