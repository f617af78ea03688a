//! Pulse actions trigger service client adapter.
//!
//! Implements the [`actions::TriggerService`] trait over the trigger
//! service's JSON HTTP API:
//!
//! | Call | Request |
//! |------|---------|
//! | builder list | `GET {base}/builders` |
//! | revision lookup | `GET {base}/builders/{builder}/revisions/{revision}` |
//! | schedule jobs | `POST {base}/builders/{builder}/jobs` |
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP transport, status-code classification, and the
//! process-wide caches live here. The [`actions`] crate sees only
//! [`actions::TriggerService`] and [`actions::TriggerError`].
//!
//! ## Caches
//!
//! The builder list is fetched once and kept for the process lifetime.
//! Resolved revisions are cached until [`actions::TriggerService::reset_caches`]
//! is called, which handlers do before every message.

mod client;
mod errors;

pub use client::{HttpTriggerClient, TriggerApiConfig};
pub use errors::TriggerApiError;
