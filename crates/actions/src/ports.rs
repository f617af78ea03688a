//! Port traits implemented by infrastructure crates.
//!
//! - [`MessageSource`] is implemented by `listener` over the Pulse AMQP bus.
//! - [`TriggerService`] is implemented by `trigger-api` over HTTP.
//!
//! Both are object-safe so the composition root can inject them as trait
//! objects and tests can substitute in-memory doubles.

use async_trait::async_trait;

use crate::{BuilderName, BusError, Delivery, DryRun, Revision, TriggerError};

// ---------------------------------------------------------------------------
// Message bus
// ---------------------------------------------------------------------------

/// A durable subscription on the message bus.
#[async_trait]
pub trait MessageSource: Send {
    /// Human-readable description of the subscription for logs.
    fn describe(&self) -> String;

    /// Authenticates and opens the subscription, replacing any previous
    /// connection.
    ///
    /// [`BusError::Authentication`] is fatal; any other error is retried by
    /// the caller.
    async fn connect(&mut self) -> Result<(), BusError>;

    /// Waits for the next delivery. There is no timeout.
    ///
    /// Returns [`BusError::Closed`] when the subscription ends and
    /// [`BusError::Transport`] on connection failure; the caller reconnects
    /// in both cases.
    async fn next_delivery(&mut self) -> Result<Delivery, BusError>;
}

// ---------------------------------------------------------------------------
// Trigger service
// ---------------------------------------------------------------------------

/// A request to schedule a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRequest {
    /// Revision the build runs against.
    pub revision: Revision,
    /// Builder to schedule.
    pub builder: BuilderName,
    /// How many times to schedule the build.
    pub times: u32,
    /// When enabled, the service logs the request instead of performing it.
    pub dry_run: DryRun,
    /// Whether the service may also schedule a missing parent build.
    pub trigger_missing_parent: bool,
}

/// The external CI trigger service.
#[async_trait]
pub trait TriggerService: Send + Sync {
    /// Normalises a builder name reported by a producer.
    ///
    /// Returns `Ok(None)` when the name is not a known builder.
    async fn validate_builder(
        &self,
        builder: &BuilderName,
    ) -> Result<Option<BuilderName>, TriggerError>;

    /// Schedules `request.builder` `request.times` times on `request.revision`.
    async fn trigger_job(&self, request: &TriggerRequest) -> Result<(), TriggerError>;

    /// Drops process-wide caches of build and job state.
    ///
    /// Handlers call this before use so duplicate detection never works
    /// from stale data.
    fn reset_caches(&self);
}
