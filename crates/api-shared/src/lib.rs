//! # API Shared
//!
//! Shared utilities and definitions for the Dinkes merge APIs.
//!
//! Contains:
//! - REST wire types (`dto` module) with OpenAPI schemas
//! - Shared services like `HealthService`
//! - API-key validation
//!
//! Used by `api-rest` and the `dinkes-run` server binary.

pub mod auth;
pub mod dto;
pub mod health;

pub use auth::{validate_api_key, AuthError, API_KEY_HEADER};
pub use dto::*;
pub use health::HealthService;
