//! Person records, candidate sets, and merged records.
//!
//! A [`Record`] is one dataset's view of a person. The core never mutates a record in place:
//! collection wraps records into a [`CandidateSet`] and reconciliation produces a new
//! [`MergedRecord`].

use crate::error::{MergeError, MergeResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use dinkes_types::{DatasetId, Nik};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A person-record as known to one dataset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Source-scoped identifier.
    pub id: String,
    pub nik: Nik,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default, rename = "dob", alias = "dateOfBirth")]
    pub date_of_birth: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    /// Date (`YYYY-MM-DD`) or timestamp of the most recent visit.
    #[serde(default)]
    pub last_visit: Option<String>,
}

impl Record {
    /// Returns the trimmed value of `field`, or `None` when it is absent or blank.
    pub fn field(&self, field: TrackedField) -> Option<&str> {
        let raw = match field {
            TrackedField::Name => Some(self.name.as_str()),
            TrackedField::Address => Some(self.address.as_str()),
            TrackedField::DateOfBirth => self.date_of_birth.as_deref(),
            TrackedField::Phone => self.phone.as_deref(),
            TrackedField::LastVisit => self.last_visit.as_deref(),
        };
        raw.map(str::trim).filter(|v| !v.is_empty())
    }

    /// Number of tracked fields carrying a non-blank value.
    pub fn filled_field_count(&self) -> usize {
        TrackedField::ALL
            .iter()
            .filter(|f| self.field(**f).is_some())
            .count()
    }

    /// Parsed `last_visit`, if present and in a recognised format.
    pub fn last_visit_at(&self) -> Option<DateTime<Utc>> {
        self.field(TrackedField::LastVisit).and_then(parse_visit)
    }
}

/// Parses a visit value as `YYYY-MM-DD`, `YYYY-MM-DDTHH:MM:SS`, or RFC 3339.
///
/// Every value lands on the UTC timeline. Values without an offset are read as UTC, and a date
/// without a time is midnight UTC. RFC 3339 values are converted from their offset.
pub fn parse_visit(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt.and_utc());
        }
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// The fields compared across candidates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackedField {
    Name,
    Address,
    DateOfBirth,
    Phone,
    LastVisit,
}

impl TrackedField {
    pub const ALL: [TrackedField; 5] = [
        TrackedField::Name,
        TrackedField::Address,
        TrackedField::DateOfBirth,
        TrackedField::Phone,
        TrackedField::LastVisit,
    ];

    /// Wire name of the field (matches the JSON key).
    pub fn as_str(self) -> &'static str {
        match self {
            TrackedField::Name => "name",
            TrackedField::Address => "address",
            TrackedField::DateOfBirth => "dob",
            TrackedField::Phone => "phone",
            TrackedField::LastVisit => "lastVisit",
        }
    }

    /// Human-readable label used in explanations.
    pub fn label(self) -> &'static str {
        match self {
            TrackedField::Name => "name",
            TrackedField::Address => "address",
            TrackedField::DateOfBirth => "date of birth",
            TrackedField::Phone => "phone",
            TrackedField::LastVisit => "last visit",
        }
    }
}

/// A dataset as presented to users: its identifier and display name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub id: DatasetId,
    pub name: String,
}

/// One dataset's record matching a queried NIK.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub dataset_id: DatasetId,
    pub dataset_name: String,
    pub record: Record,
}

/// The records found for one NIK across the requested datasets.
///
/// Invariants, checked by [`CandidateSet::new`]:
/// - every record's NIK equals the set's NIK
/// - each dataset contributes at most one record
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CandidateSet {
    nik: Nik,
    candidates: Vec<Candidate>,
}

impl CandidateSet {
    /// Builds a candidate set, enforcing its invariants.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError::InconsistentCandidates`] on a NIK mismatch or a repeated dataset.
    pub fn new(nik: Nik, candidates: Vec<Candidate>) -> MergeResult<Self> {
        let mut seen = BTreeSet::new();
        for candidate in &candidates {
            if candidate.record.nik != nik {
                return Err(MergeError::InconsistentCandidates(format!(
                    "record '{}' from dataset '{}' has NIK '{}', expected '{}'",
                    candidate.record.id, candidate.dataset_id, candidate.record.nik, nik
                )));
            }
            if !seen.insert(&candidate.dataset_id) {
                return Err(MergeError::InconsistentCandidates(format!(
                    "dataset '{}' contributed more than one record",
                    candidate.dataset_id
                )));
            }
        }
        Ok(Self { nik, candidates })
    }

    pub fn empty(nik: Nik) -> Self {
        Self {
            nik,
            candidates: Vec::new(),
        }
    }

    pub fn nik(&self) -> &Nik {
        &self.nik
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Candidate> {
        self.candidates.iter()
    }

    /// Dataset ids in set order.
    pub fn dataset_ids(&self) -> Vec<DatasetId> {
        self.candidates
            .iter()
            .map(|c| c.dataset_id.clone())
            .collect()
    }
}

/// Which path produced a merged record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeMethod {
    /// Exactly one candidate; copied verbatim.
    SingleRecord,
    /// Field choices made by the reconciliation collaborator.
    Collaborator,
    /// Field choices made by the rule-based policy.
    Fallback,
}

impl MergeMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            MergeMethod::SingleRecord => "singleRecord",
            MergeMethod::Collaborator => "collaborator",
            MergeMethod::Fallback => "fallback",
        }
    }
}

/// The reconciliation result for one NIK.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedRecord {
    pub nik: Nik,
    pub id: String,
    pub name: String,
    pub address: String,
    #[serde(rename = "dob")]
    pub date_of_birth: Option<String>,
    pub phone: Option<String>,
    pub last_visit: Option<String>,
    pub explanation: String,
    /// Always within `[0, 1]`.
    pub confidence_score: f64,
    pub method: MergeMethod,
    /// Datasets whose records were merged, in candidate order.
    pub sources: Vec<DatasetId>,
}

impl MergedRecord {
    /// The merged fields as a plain record.
    pub fn to_record(&self) -> Record {
        Record {
            id: self.id.clone(),
            nik: self.nik.clone(),
            name: self.name.clone(),
            address: self.address.clone(),
            date_of_birth: self.date_of_birth.clone(),
            phone: self.phone.clone(),
            last_visit: self.last_visit.clone(),
        }
    }
}
