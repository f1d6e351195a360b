//! Field-by-field comparison of a candidate set.
//!
//! Values are compared after trimming, case-sensitively. Observed values are kept in an
//! ordered set, so the report for any permutation of the same candidates is identical.

use crate::record::{CandidateSet, TrackedField};
use serde::Serialize;
use std::collections::BTreeSet;

/// Classification of one tracked field across all candidates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldStatus {
    /// Every candidate has the same non-empty value.
    Unanimous,
    /// At least two distinct non-empty values were observed.
    Conflicting,
    /// One distinct value, but some candidates lack it.
    PartiallyMissing,
    /// No candidate has a value.
    WhollyMissing,
}

impl FieldStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldStatus::Unanimous => "unanimous",
            FieldStatus::Conflicting => "conflicting",
            FieldStatus::PartiallyMissing => "partiallyMissing",
            FieldStatus::WhollyMissing => "whollyMissing",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldConflict {
    pub field: TrackedField,
    pub status: FieldStatus,
    /// Distinct non-empty values, sorted.
    pub values: BTreeSet<String>,
}

/// Per-field classification for a candidate set, in [`TrackedField::ALL`] order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FieldConflictReport {
    fields: Vec<FieldConflict>,
}

impl FieldConflictReport {
    pub fn fields(&self) -> &[FieldConflict] {
        &self.fields
    }

    pub fn get(&self, field: TrackedField) -> Option<&FieldConflict> {
        self.fields.iter().find(|f| f.field == field)
    }

    /// Status of `field`; every tracked field is always present in a report.
    pub fn status(&self, field: TrackedField) -> FieldStatus {
        self.get(field)
            .map(|f| f.status)
            .unwrap_or(FieldStatus::WhollyMissing)
    }

    pub fn unanimous_count(&self) -> usize {
        self.fields
            .iter()
            .filter(|f| f.status == FieldStatus::Unanimous)
            .count()
    }

    pub fn conflicting_fields(&self) -> Vec<TrackedField> {
        self.fields
            .iter()
            .filter(|f| f.status == FieldStatus::Conflicting)
            .map(|f| f.field)
            .collect()
    }
}

/// Classifies every tracked field of `set`.
pub fn detect(set: &CandidateSet) -> FieldConflictReport {
    let fields = TrackedField::ALL
        .iter()
        .map(|&field| {
            let mut values = BTreeSet::new();
            let mut present = 0usize;
            for candidate in set.iter() {
                if let Some(value) = candidate.record.field(field) {
                    values.insert(value.to_owned());
                    present += 1;
                }
            }

            let status = match values.len() {
                0 => FieldStatus::WhollyMissing,
                1 if present == set.len() => FieldStatus::Unanimous,
                1 => FieldStatus::PartiallyMissing,
                _ => FieldStatus::Conflicting,
            };

            FieldConflict {
                field,
                status,
                values,
            }
        })
        .collect();

    FieldConflictReport { fields }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::test_support::*;
    use crate::record::{Candidate, Record};

    fn scenario_b() -> Vec<Candidate> {
        let mut first = record("rec-001", "123", "Budi Santoso", "Jl. Merdeka No.1, Jakarta");
        first.last_visit = Some("2023-12-01".into());
        first.phone = Some("081234567890".into());

        let mut second = record(
            "rec-004",
            "123",
            "Budi Santoso",
            "Jl. Merdeka No.1, Jakarta Pusat",
        );
        second.last_visit = Some("2024-05-20".into());

        vec![candidate("seksi-p2p", first), candidate("seksi-kesmas", second)]
    }

    fn set_of(candidates: Vec<Candidate>) -> CandidateSet {
        CandidateSet::new(nik("123"), candidates).unwrap()
    }

    #[test]
    fn classifies_each_status() {
        let report = detect(&set_of(scenario_b()));

        assert_eq!(report.status(TrackedField::Name), FieldStatus::Unanimous);
        assert_eq!(report.status(TrackedField::Address), FieldStatus::Conflicting);
        assert_eq!(
            report.status(TrackedField::Phone),
            FieldStatus::PartiallyMissing
        );
        assert_eq!(
            report.status(TrackedField::DateOfBirth),
            FieldStatus::WhollyMissing
        );
        assert_eq!(report.status(TrackedField::LastVisit), FieldStatus::Conflicting);
        assert_eq!(report.unanimous_count(), 1);
        assert_eq!(
            report.conflicting_fields(),
            vec![TrackedField::Address, TrackedField::LastVisit]
        );
    }

    #[test]
    fn comparison_trims_but_keeps_case() {
        let a = record("a", "123", " Budi ", "X");
        let b = record("b", "123", "Budi", "x");
        let report = detect(&set_of(vec![
            candidate("seksi-p2p", a),
            candidate("seksi-sdk", b),
        ]));

        assert_eq!(report.status(TrackedField::Name), FieldStatus::Unanimous);
        assert_eq!(report.status(TrackedField::Address), FieldStatus::Conflicting);
    }

    #[test]
    fn report_is_independent_of_candidate_order() {
        let mut third: Record = record("rec-009", "123", "Budi S.", "");
        third.date_of_birth = Some("1985-08-17".into());
        let mut candidates = scenario_b();
        candidates.push(candidate("seksi-sdk", third));

        let baseline = detect(&set_of(candidates.clone()));

        // All 6 permutations of three candidates.
        let orders = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for order in orders {
            let permuted = order.iter().map(|&i| candidates[i].clone()).collect();
            let report = detect(&set_of(permuted));
            assert_eq!(report, baseline, "order {order:?} changed the report");
            assert_eq!(detect(&set_of(candidates.clone())), report);
        }
    }

    #[test]
    fn empty_set_reports_everything_missing() {
        let report = detect(&CandidateSet::empty(nik("999")));

        assert!(report
            .fields()
            .iter()
            .all(|f| f.status == FieldStatus::WhollyMissing));
        assert_eq!(report.fields().len(), TrackedField::ALL.len());
    }
}
