//! Merge session: one search, merge, and confirm interaction.
//!
//! ```text
//! Idle -> Searching -> NotFound
//!                   -> SingleMatch ------------> Proposed -> Confirmed
//!                   -> MultipleMatchesMerging -> Proposed
//!      (any search) -> Failed -> (retry) -> Idle
//! ```
//!
//! `SingleMatch` and `MultipleMatchesMerging` are transient: a completed search always ends in
//! `NotFound`, `Proposed`, or `Failed`. Only [`MergeSession::confirm`] writes anything, and only
//! from `Proposed`.
//!
//! A session is owned by one interaction; every operation takes `&mut self`, so searches on
//! the same session cannot overlap. Dropping a search future part-way (the caller went away)
//! leaves a transient phase behind, which the next search replaces.

use crate::collector::CandidateCollector;
use crate::conflict::{self, FieldConflictReport};
use crate::error::{LookupFailure, MergeError, MergeResult};
use crate::reconcile::Reconciler;
use crate::record::{CandidateSet, MergedRecord};
use crate::sink::{MergeReceipt, MergeSink};
use dinkes_types::{DatasetId, Nik};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Name of a session state, without its data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    Idle,
    Searching,
    NotFound,
    SingleMatch,
    MultipleMatchesMerging,
    Proposed,
    Confirmed,
    Failed,
}

impl SessionPhase {
    /// Wire name of the phase (matches its serialised form).
    pub fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Searching => "searching",
            SessionPhase::NotFound => "notFound",
            SessionPhase::SingleMatch => "singleMatch",
            SessionPhase::MultipleMatchesMerging => "multipleMatchesMerging",
            SessionPhase::Proposed => "proposed",
            SessionPhase::Confirmed => "confirmed",
            SessionPhase::Failed => "failed",
        }
    }
}

/// A validated search request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchQuery {
    nik: Nik,
    dataset_ids: BTreeSet<DatasetId>,
}

impl SearchQuery {
    /// # Errors
    ///
    /// Returns [`MergeError::InvalidInput`] if `dataset_ids` is empty.
    pub fn new(nik: Nik, dataset_ids: BTreeSet<DatasetId>) -> MergeResult<Self> {
        if dataset_ids.is_empty() {
            return Err(MergeError::InvalidInput(
                "at least one dataset must be selected".into(),
            ));
        }
        Ok(Self { nik, dataset_ids })
    }

    /// Parses a NIK and dataset ids from raw strings. Repeated dataset ids collapse.
    ///
    /// # Errors
    ///
    /// - [`MergeError::Text`] for a blank NIK or a malformed dataset id
    /// - [`MergeError::InvalidInput`] if no dataset id was given
    pub fn parse<I, S>(nik: &str, dataset_ids: I) -> MergeResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let nik = Nik::parse(nik)?;
        let dataset_ids = dataset_ids
            .into_iter()
            .map(|id| DatasetId::parse(id.as_ref()))
            .collect::<Result<BTreeSet<_>, _>>()?;
        Self::new(nik, dataset_ids)
    }

    pub fn nik(&self) -> &Nik {
        &self.nik
    }

    pub fn dataset_ids(&self) -> &BTreeSet<DatasetId> {
        &self.dataset_ids
    }
}

/// A merged record awaiting confirmation, with what it was built from.
#[derive(Clone, Debug, PartialEq)]
pub struct Proposal {
    pub query: SearchQuery,
    pub candidates: CandidateSet,
    pub report: FieldConflictReport,
    pub merged: MergedRecord,
    /// Datasets that could not be read during the search.
    pub failures: Vec<LookupFailure>,
}

#[derive(Clone, Debug)]
pub enum SessionState {
    Idle,
    Searching {
        query: SearchQuery,
    },
    NotFound {
        query: SearchQuery,
        failures: Vec<LookupFailure>,
    },
    SingleMatch {
        query: SearchQuery,
        candidates: CandidateSet,
    },
    MultipleMatchesMerging {
        query: SearchQuery,
        candidates: CandidateSet,
    },
    Proposed(Proposal),
    Confirmed {
        query: SearchQuery,
        merged: MergedRecord,
        receipt: MergeReceipt,
    },
    Failed {
        query: SearchQuery,
        error: Arc<MergeError>,
    },
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        match self {
            SessionState::Idle => SessionPhase::Idle,
            SessionState::Searching { .. } => SessionPhase::Searching,
            SessionState::NotFound { .. } => SessionPhase::NotFound,
            SessionState::SingleMatch { .. } => SessionPhase::SingleMatch,
            SessionState::MultipleMatchesMerging { .. } => SessionPhase::MultipleMatchesMerging,
            SessionState::Proposed(_) => SessionPhase::Proposed,
            SessionState::Confirmed { .. } => SessionPhase::Confirmed,
            SessionState::Failed { .. } => SessionPhase::Failed,
        }
    }

    /// The query this state belongs to; `None` only when idle.
    pub fn query(&self) -> Option<&SearchQuery> {
        match self {
            SessionState::Idle => None,
            SessionState::Searching { query }
            | SessionState::NotFound { query, .. }
            | SessionState::SingleMatch { query, .. }
            | SessionState::MultipleMatchesMerging { query, .. }
            | SessionState::Confirmed { query, .. }
            | SessionState::Failed { query, .. } => Some(query),
            SessionState::Proposed(proposal) => Some(&proposal.query),
        }
    }
}

pub struct MergeSession {
    collector: CandidateCollector,
    reconciler: Reconciler,
    sink: Arc<dyn MergeSink>,
    state: SessionState,
    trail: Vec<SessionPhase>,
}

impl MergeSession {
    pub fn new(
        collector: CandidateCollector,
        reconciler: Reconciler,
        sink: Arc<dyn MergeSink>,
    ) -> Self {
        Self {
            collector,
            reconciler,
            sink,
            state: SessionState::Idle,
            trail: Vec::new(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    /// Phases entered since the last search started (or since the last retry).
    pub fn trail(&self) -> &[SessionPhase] {
        &self.trail
    }

    pub fn proposal(&self) -> Option<&Proposal> {
        match &self.state {
            SessionState::Proposed(proposal) => Some(proposal),
            _ => None,
        }
    }

    /// Runs a search and, when records are found, reconciles them into a proposal.
    ///
    /// Any previous query, candidates, or proposal are discarded first. Failures while
    /// searching move the session to `Failed` and are reported through the returned state.
    ///
    /// # Errors
    ///
    /// Rejected requests leave the state untouched:
    /// - [`MergeError::InvalidTransition`] if the session is `Failed` (call [`retry`](Self::retry))
    /// - [`MergeError::NotConfigured`] if a dataset id is unknown
    pub async fn search(&mut self, query: SearchQuery) -> MergeResult<&SessionState> {
        if self.phase() == SessionPhase::Failed {
            return Err(MergeError::InvalidTransition {
                operation: "search",
                state: SessionPhase::Failed,
            });
        }
        self.collector.ensure_configured(query.dataset_ids())?;

        self.trail.clear();
        self.enter(SessionState::Searching {
            query: query.clone(),
        });

        let collected = self
            .collector
            .collect(query.nik(), query.dataset_ids())
            .await;
        let collection = match collected {
            Ok(collection) => collection,
            Err(err) => return Ok(self.fail(query, err)),
        };

        let candidates = collection.candidates;
        let failures = collection.failures;
        match candidates.len() {
            0 => {
                self.enter(SessionState::NotFound { query, failures });
                return Ok(&self.state);
            }
            1 => self.enter(SessionState::SingleMatch {
                query: query.clone(),
                candidates: candidates.clone(),
            }),
            _ => self.enter(SessionState::MultipleMatchesMerging {
                query: query.clone(),
                candidates: candidates.clone(),
            }),
        }

        let reconciled = self.reconciler.reconcile(&candidates).await;
        let merged = match reconciled {
            Ok(merged) => merged,
            Err(err) => return Ok(self.fail(query, err)),
        };

        let report = conflict::detect(&candidates);
        self.enter(SessionState::Proposed(Proposal {
            query,
            candidates,
            report,
            merged,
            failures,
        }));
        Ok(&self.state)
    }

    /// Stores the proposed merged record through the sink and moves to `Confirmed`.
    ///
    /// # Errors
    ///
    /// - [`MergeError::InvalidTransition`] unless the session is `Proposed`
    /// - [`MergeError::Persistence`] if the sink fails; the proposal is kept
    pub async fn confirm(&mut self) -> MergeResult<MergeReceipt> {
        let (query, merged) = match &self.state {
            SessionState::Proposed(proposal) => (proposal.query.clone(), proposal.merged.clone()),
            other => {
                return Err(MergeError::InvalidTransition {
                    operation: "confirm",
                    state: other.phase(),
                })
            }
        };

        let receipt = self.sink.store(&merged).await.map_err(|err| match err {
            MergeError::Persistence(_) => err,
            other => MergeError::Persistence(other.to_string()),
        })?;

        tracing::info!(
            "merge for NIK {} confirmed as {}",
            receipt.nik,
            receipt.id
        );
        self.enter(SessionState::Confirmed {
            query,
            merged,
            receipt: receipt.clone(),
        });
        Ok(receipt)
    }

    /// Clears a failed session back to `Idle`.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError::InvalidTransition`] unless the session is `Failed`.
    pub fn retry(&mut self) -> MergeResult<&SessionState> {
        if self.phase() != SessionPhase::Failed {
            return Err(MergeError::InvalidTransition {
                operation: "retry",
                state: self.phase(),
            });
        }
        self.trail.clear();
        self.enter(SessionState::Idle);
        Ok(&self.state)
    }

    fn fail(&mut self, query: SearchQuery, error: MergeError) -> &SessionState {
        tracing::warn!("search for NIK {} failed: {}", query.nik(), error);
        self.enter(SessionState::Failed {
            query,
            error: Arc::new(error),
        });
        &self.state
    }

    fn enter(&mut self, next: SessionState) {
        let from = self.state.phase();
        let to = next.phase();
        tracing::debug!("merge session {:?} -> {:?}", from, to);
        self.state = next;
        self.trail.push(to);
    }
}
