//! Rule-based merge used when no collaborator answer can be trusted.
//!
//! Field choice:
//! - a unanimous value is taken as is
//! - otherwise the value comes from the candidate with the most recent `lastVisit`, ties going
//!   to the longer value and then to the earlier candidate
//! - a field no candidate carries stays empty
//!
//! The confidence score is the share of tracked fields that are unanimous. Output depends only
//! on the candidate set, so repeated calls give identical records.

use crate::conflict::{self, FieldStatus};
use crate::error::{MergeError, MergeResult};
use crate::record::{Candidate, CandidateSet, MergeMethod, MergedRecord, TrackedField};
use chrono::{DateTime, Utc};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChoiceReason {
    Unanimous,
    /// Only one distinct value exists; `missing` candidates lack it.
    OnlyValue { missing: usize },
    Recency,
    Completeness,
    FirstSeen,
    Missing,
}

struct FieldChoice<'a> {
    field: TrackedField,
    value: Option<String>,
    source: Option<&'a Candidate>,
    reason: ChoiceReason,
}

/// Ranking key: later visit first, then longer value.
fn rank(candidate: &Candidate, value: &str) -> (Option<DateTime<Utc>>, usize) {
    (candidate.record.last_visit_at(), value.chars().count())
}

/// Merges `set` with the rule-based policy.
///
/// # Errors
///
/// Returns [`MergeError::NoCandidates`] if `set` is empty.
pub fn fallback_merge(set: &CandidateSet) -> MergeResult<MergedRecord> {
    let trusted = most_trusted(set).ok_or(MergeError::NoCandidates)?;
    let report = conflict::detect(set);

    let choices: Vec<FieldChoice<'_>> = TrackedField::ALL
        .iter()
        .map(|&field| choose(set, field, report.status(field)))
        .collect();

    let unanimous = report.unanimous_count();
    let confidence_score =
        (unanimous as f64 / TrackedField::ALL.len() as f64).clamp(0.0, 1.0);

    let value_of = |field: TrackedField| -> Option<String> {
        choices
            .iter()
            .find(|c| c.field == field)
            .and_then(|c| c.value.clone())
    };

    Ok(MergedRecord {
        nik: set.nik().clone(),
        id: trusted.record.id.clone(),
        name: value_of(TrackedField::Name).unwrap_or_default(),
        address: value_of(TrackedField::Address).unwrap_or_default(),
        date_of_birth: value_of(TrackedField::DateOfBirth),
        phone: value_of(TrackedField::Phone),
        last_visit: value_of(TrackedField::LastVisit),
        explanation: explain(set, trusted, &choices, unanimous, confidence_score),
        confidence_score,
        method: MergeMethod::Fallback,
        sources: set.dataset_ids(),
    })
}

/// The candidate whose record is trusted most: latest visit, then most filled fields, then
/// earliest in the set.
pub(crate) fn most_trusted(set: &CandidateSet) -> Option<&Candidate> {
    let mut best: Option<(&Candidate, (Option<DateTime<Utc>>, usize))> = None;
    for candidate in set.iter() {
        let key = (
            candidate.record.last_visit_at(),
            candidate.record.filled_field_count(),
        );
        match &best {
            Some((_, best_key)) if key <= *best_key => {}
            _ => best = Some((candidate, key)),
        }
    }
    best.map(|(candidate, _)| candidate)
}

fn choose(set: &CandidateSet, field: TrackedField, status: FieldStatus) -> FieldChoice<'_> {
    let holders: Vec<(&Candidate, &str)> = set
        .iter()
        .filter_map(|c| c.record.field(field).map(|v| (c, v)))
        .collect();

    // Highest rank wins; strict comparison keeps the first-seen candidate on ties.
    let mut winner: Option<(&Candidate, &str)> = None;
    for &(candidate, value) in &holders {
        match winner {
            Some((best, best_value)) if rank(candidate, value) <= rank(best, best_value) => {}
            _ => winner = Some((candidate, value)),
        }
    }

    let Some((source, value)) = winner else {
        return FieldChoice {
            field,
            value: None,
            source: None,
            reason: ChoiceReason::Missing,
        };
    };

    let reason = match status {
        FieldStatus::Unanimous => ChoiceReason::Unanimous,
        FieldStatus::PartiallyMissing | FieldStatus::WhollyMissing => ChoiceReason::OnlyValue {
            missing: set.len() - holders.len(),
        },
        FieldStatus::Conflicting => {
            // Compare against the strongest candidate offering a different value.
            let runner_up = holders
                .iter()
                .filter(|(_, v)| *v != value)
                .map(|&(c, v)| rank(c, v))
                .max();
            let (visit, len) = rank(source, value);
            match runner_up {
                Some((other_visit, _)) if visit > other_visit => ChoiceReason::Recency,
                Some((_, other_len)) if len > other_len => ChoiceReason::Completeness,
                _ => ChoiceReason::FirstSeen,
            }
        }
    };

    FieldChoice {
        field,
        value: Some(value.to_string()),
        source: Some(source),
        reason,
    }
}

fn explain(
    set: &CandidateSet,
    trusted: &Candidate,
    choices: &[FieldChoice<'_>],
    unanimous: usize,
    confidence_score: f64,
) -> String {
    let names: Vec<&str> = set.iter().map(|c| c.dataset_name.as_str()).collect();
    let mut lines = vec![format!(
        "Rule-based merge of {} records for NIK {} from {}.",
        set.len(),
        set.nik(),
        names.join(", ")
    )];

    for choice in choices {
        let label = choice.field.label();
        let line = match (&choice.value, choice.source, choice.reason) {
            (None, _, _) | (_, None, _) | (_, _, ChoiceReason::Missing) => {
                format!("- {label}: no source has a value.")
            }
            (Some(value), Some(_), ChoiceReason::Unanimous) => {
                format!("- {label}: \"{value}\" agreed by all sources.")
            }
            (Some(value), Some(source), ChoiceReason::OnlyValue { missing }) => format!(
                "- {label}: \"{value}\" from {} (only value present; missing in {missing} source(s)).",
                source.dataset_name
            ),
            (Some(value), Some(source), ChoiceReason::Recency) => format!(
                "- {label}: \"{value}\" from {} (most recent visit).",
                source.dataset_name
            ),
            (Some(value), Some(source), ChoiceReason::Completeness) => format!(
                "- {label}: \"{value}\" from {} (most complete value).",
                source.dataset_name
            ),
            (Some(value), Some(source), ChoiceReason::FirstSeen) => format!(
                "- {label}: \"{value}\" from {} (first listed source).",
                source.dataset_name
            ),
        };
        lines.push(line);
    }

    lines.push(format!(
        "Record id '{}' taken from {}.",
        trusted.record.id, trusted.dataset_name
    ));
    lines.push(format!(
        "Confidence {confidence_score:.2}: {unanimous} of {} fields agree across all sources.",
        TrackedField::ALL.len()
    ));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::test_support::*;
    use crate::record::Record;

    fn scenario_b() -> CandidateSet {
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

        CandidateSet::new(
            nik("123"),
            vec![candidate("seksi-p2p", first), candidate("seksi-kesmas", second)],
        )
        .unwrap()
    }

    #[test]
    fn recent_visit_wins_conflicting_field() {
        let merged = fallback_merge(&scenario_b()).unwrap();

        assert_eq!(merged.address, "Jl. Merdeka No.1, Jakarta Pusat");
        assert_eq!(merged.name, "Budi Santoso");
        assert_eq!(merged.phone.as_deref(), Some("081234567890"));
        assert_eq!(merged.date_of_birth, None);
        assert_eq!(merged.last_visit.as_deref(), Some("2024-05-20"));
        assert_eq!(merged.id, "rec-004");
        assert_eq!(merged.method, MergeMethod::Fallback);
        assert_eq!(merged.confidence_score, 0.2);
        assert!(merged
            .explanation
            .contains("- name: \"Budi Santoso\" agreed by all sources."));
        assert!(merged
            .explanation
            .contains("from Section seksi-kesmas (most recent visit)"));
    }

    #[test]
    fn equal_visits_prefer_longer_then_first_seen() {
        let a = record("a", "123", "Budi", "Jl. Merdeka");
        let b = record("b", "123", "Budi Santoso", "Jl. Merdeka");
        let mut c = record("c", "123", "Budi Santosa", "Jl. Merdeka");
        c.phone = Some("0812".into());
        let set = CandidateSet::new(
            nik("123"),
            vec![
                candidate("seksi-p2p", a),
                candidate("seksi-sdk", b),
                candidate("seksi-kesmas", c),
            ],
        )
        .unwrap();

        let merged = fallback_merge(&set).unwrap();
        // "Budi Santoso" and "Budi Santosa" tie on length; the earlier candidate wins.
        assert_eq!(merged.name, "Budi Santoso");
        assert!(merged.explanation.contains("(first listed source)"));
        // No visits anywhere: the record with most filled fields provides the id.
        assert_eq!(merged.id, "c");
    }

    #[test]
    fn longer_value_explained_as_completeness() {
        let a = record("a", "123", "Budi", "Jl. Merdeka");
        let b = record("b", "123", "Budi", "Jl. Merdeka No. 1, Jakarta");
        let set = CandidateSet::new(
            nik("123"),
            vec![candidate("seksi-p2p", a), candidate("seksi-sdk", b)],
        )
        .unwrap();

        let merged = fallback_merge(&set).unwrap();
        assert_eq!(merged.address, "Jl. Merdeka No. 1, Jakarta");
        assert!(merged.explanation.contains("(most complete value)"));
    }

    #[test]
    fn fallback_is_reproducible() {
        let set = scenario_b();
        let first = fallback_merge(&set).unwrap();
        let second = fallback_merge(&set).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn score_stays_in_unit_interval() {
        let identical: Vec<Record> = (0..3)
            .map(|i| {
                let mut r = record(&format!("r{i}"), "123", "Budi", "Jakarta");
                r.date_of_birth = Some("1985-08-17".into());
                r.phone = Some("0812".into());
                r.last_visit = Some("2024-01-01".into());
                r
            })
            .collect();
        let datasets = ["seksi-p2p", "seksi-sdk", "seksi-kesmas"];
        let all_agree = CandidateSet::new(
            nik("123"),
            identical
                .into_iter()
                .zip(datasets)
                .map(|(r, d)| candidate(d, r))
                .collect(),
        )
        .unwrap();

        let all_differ = CandidateSet::new(
            nik("123"),
            vec![
                candidate("seksi-p2p", record("a", "123", "A", "X")),
                candidate("seksi-sdk", record("b", "123", "B", "Y")),
            ],
        )
        .unwrap();

        for set in [all_agree, all_differ, scenario_b()] {
            let score = fallback_merge(&set).unwrap().confidence_score;
            assert!((0.0..=1.0).contains(&score), "score {score} out of range");
        }
    }

    #[test]
    fn empty_set_has_no_candidates() {
        assert!(matches!(
            fallback_merge(&CandidateSet::empty(nik("123"))),
            Err(MergeError::NoCandidates)
        ));
    }
}
