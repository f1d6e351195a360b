//! REST wire types.
//!
//! JSON keys are camelCase and match what the dashboard front end already sends and reads
//! (`datasetIds`, `datasetName`, `lastVisit`, `mergeExplanation`, `confidenceScore`).

use dinkes_core::{
    Candidate, Collection, DatasetInfo, FieldConflict, LookupFailure, MergeError, MergeResult,
    MergeSession, MergedRecord, Record, SearchQuery, SessionState, ShardableUuid,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorRes {
    pub error: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DatasetRes {
    pub id: String,
    pub name: String,
}

impl From<DatasetInfo> for DatasetRes {
    fn from(info: DatasetInfo) -> Self {
        Self {
            id: info.id.to_string(),
            name: info.name,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ListDatasetsRes {
    pub datasets: Vec<DatasetRes>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchReq {
    pub nik: String,
    #[serde(default)]
    pub dataset_ids: Vec<String>,
}

impl SearchReq {
    /// Validates the request into a search query.
    pub fn to_query(&self) -> MergeResult<SearchQuery> {
        SearchQuery::parse(&self.nik, &self.dataset_ids)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecordDto {
    pub id: String,
    pub nik: String,
    pub name: String,
    pub address: String,
    pub dob: Option<String>,
    pub phone: Option<String>,
    pub last_visit: Option<String>,
}

impl From<&Record> for RecordDto {
    fn from(record: &Record) -> Self {
        Self {
            id: record.id.clone(),
            nik: record.nik.to_string(),
            name: record.name.clone(),
            address: record.address.clone(),
            dob: record.date_of_birth.clone(),
            phone: record.phone.clone(),
            last_visit: record.last_visit.clone(),
        }
    }
}

/// One dataset's record for the searched NIK.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchHitDto {
    pub dataset_id: String,
    pub dataset_name: String,
    pub record: RecordDto,
}

impl From<&Candidate> for SearchHitDto {
    fn from(candidate: &Candidate) -> Self {
        Self {
            dataset_id: candidate.dataset_id.to_string(),
            dataset_name: candidate.dataset_name.clone(),
            record: RecordDto::from(&candidate.record),
        }
    }
}

/// Stateless search results, one entry per dataset with a hit.
pub fn search_hits(collection: &Collection) -> Vec<SearchHitDto> {
    collection.candidates.iter().map(SearchHitDto::from).collect()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LookupFailureDto {
    pub dataset_id: String,
    pub reason: String,
}

impl From<&LookupFailure> for LookupFailureDto {
    fn from(failure: &LookupFailure) -> Self {
        Self {
            dataset_id: failure.dataset_id.to_string(),
            reason: failure.reason.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FieldConflictDto {
    pub field: String,
    pub status: String,
    pub values: Vec<String>,
}

impl From<&FieldConflict> for FieldConflictDto {
    fn from(conflict: &FieldConflict) -> Self {
        Self {
            field: conflict.field.as_str().to_string(),
            status: conflict.status.as_str().to_string(),
            values: conflict.values.iter().cloned().collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MergedRecordDto {
    pub id: String,
    pub nik: String,
    pub name: String,
    pub address: String,
    pub dob: Option<String>,
    pub phone: Option<String>,
    pub last_visit: Option<String>,
    pub merge_explanation: String,
    pub confidence_score: f64,
    /// `singleRecord`, `collaborator`, or `fallback`.
    pub method: String,
    pub sources: Vec<String>,
}

impl From<&MergedRecord> for MergedRecordDto {
    fn from(merged: &MergedRecord) -> Self {
        Self {
            id: merged.id.clone(),
            nik: merged.nik.to_string(),
            name: merged.name.clone(),
            address: merged.address.clone(),
            dob: merged.date_of_birth.clone(),
            phone: merged.phone.clone(),
            last_visit: merged.last_visit.clone(),
            merge_explanation: merged.explanation.clone(),
            confidence_score: merged.confidence_score,
            method: merged.method.as_str().to_string(),
            sources: merged.sources.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationDto {
    pub receipt_id: String,
    /// RFC 3339 timestamp.
    pub confirmed_at: String,
    pub record: MergedRecordDto,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRes {
    pub session_id: String,
    pub phase: String,
}

/// Snapshot of a merge session.
///
/// Only the parts that belong to the current phase are filled; a fresh search never carries
/// data from an earlier one.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionRes {
    pub session_id: String,
    pub phase: String,
    /// Phases entered during the current search.
    pub trail: Vec<String>,
    pub nik: Option<String>,
    pub dataset_ids: Vec<String>,
    pub candidates: Vec<SearchHitDto>,
    pub conflicts: Vec<FieldConflictDto>,
    pub proposal: Option<MergedRecordDto>,
    pub confirmation: Option<ConfirmationDto>,
    pub failures: Vec<LookupFailureDto>,
    pub error: Option<String>,
}

impl SessionRes {
    pub fn from_session(session_id: &ShardableUuid, session: &MergeSession) -> Self {
        let state = session.state();
        let mut res = SessionRes {
            session_id: session_id.to_string(),
            phase: state.phase().as_str().to_string(),
            trail: session
                .trail()
                .iter()
                .map(|p| p.as_str().to_string())
                .collect(),
            ..SessionRes::default()
        };

        if let Some(query) = state.query() {
            res.nik = Some(query.nik().to_string());
            res.dataset_ids = query.dataset_ids().iter().map(ToString::to_string).collect();
        }

        match state {
            SessionState::Idle | SessionState::Searching { .. } => {}
            SessionState::NotFound { failures, .. } => {
                res.failures = failures.iter().map(LookupFailureDto::from).collect();
            }
            SessionState::SingleMatch { candidates, .. }
            | SessionState::MultipleMatchesMerging { candidates, .. } => {
                res.candidates = candidates.iter().map(SearchHitDto::from).collect();
            }
            SessionState::Proposed(proposal) => {
                res.candidates = proposal.candidates.iter().map(SearchHitDto::from).collect();
                res.conflicts = proposal
                    .report
                    .fields()
                    .iter()
                    .map(FieldConflictDto::from)
                    .collect();
                res.proposal = Some(MergedRecordDto::from(&proposal.merged));
                res.failures = proposal.failures.iter().map(LookupFailureDto::from).collect();
            }
            SessionState::Confirmed {
                merged, receipt, ..
            } => {
                res.confirmation = Some(ConfirmationDto {
                    receipt_id: receipt.id.to_string(),
                    confirmed_at: receipt.confirmed_at.to_rfc3339(),
                    record: MergedRecordDto::from(merged),
                });
            }
            SessionState::Failed { error, .. } => {
                if let MergeError::NoDataAvailable { failures } = error.as_ref() {
                    res.failures = failures.iter().map(LookupFailureDto::from).collect();
                }
                res.error = Some(error.to_string());
            }
        }

        res
    }
}
