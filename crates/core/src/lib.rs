//! # Dinkes Core
//!
//! Record deduplication and reconciliation for the health-office dashboard.
//!
//! Given a national identity number (NIK) and a set of section datasets, the core:
//! - collects one candidate record per dataset that knows the NIK ([`CandidateCollector`])
//! - classifies every tracked field across the candidates ([`conflict::detect`])
//! - merges the candidates into one record with an explanation and a confidence score
//!   ([`Reconciler`]), asking an external collaborator when one is configured and falling back
//!   to a deterministic rule-based policy otherwise
//! - holds the result in a [`MergeSession`] until the user confirms it, and only then hands it
//!   to a [`MergeSink`]
//!
//! **No API concerns**: HTTP routing, authentication, and CLI parsing belong in `api-rest`,
//! `api-shared`, and `dinkes-cli`.

pub mod catalogue;
pub mod collaborator;
pub mod collector;
pub mod config;
pub mod conflict;
pub mod constants;
pub mod error;
pub mod index;
pub mod reconcile;
pub mod record;
pub mod service;
pub mod session;
pub mod sink;

pub use catalogue::{CatalogueDataset, DatasetCatalogue};
pub use collaborator::{
    CollaboratorError, CollaboratorRequest, CollaboratorResponse, OllamaReconciler,
    ReconciliationCollaborator,
};
pub use collector::{CandidateCollector, Collection};
pub use config::{CollaboratorConfig, CoreConfig};
pub use conflict::{FieldConflict, FieldConflictReport, FieldStatus};
pub use error::{LookupFailure, MergeError, MergeResult};
pub use index::{IdentityIndex, InMemoryIdentityIndex};
pub use reconcile::Reconciler;
pub use record::{
    Candidate, CandidateSet, DatasetInfo, MergeMethod, MergedRecord, Record, TrackedField,
};
pub use service::MergeService;
pub use session::{MergeSession, Proposal, SearchQuery, SessionPhase, SessionState};
pub use sink::{FileMergeSink, MemoryMergeSink, MergeReceipt, MergeSink, StoredMerge};

pub use dinkes_types::{DatasetId, Nik, TextError};
pub use dinkes_uuid::ShardableUuid;
