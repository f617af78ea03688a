//! The contract every message handler implements.
//!
//! A handler receives the decoded message body, the ack capability of the
//! delivery, and the process-wide dry-run flag. It decides whether anything
//! needs doing, calls the trigger service if so, and acknowledges the
//! delivery itself according to the outcome:
//!
//! | Outcome | Ack (live) | Ack (dry run) |
//! |---------|-----------|---------------|
//! | [`Outcome::Success`] | yes | no |
//! | [`Outcome::Skip`] | yes | no |
//! | [`Outcome::Rejected`] | yes | no |
//! | [`Outcome::TransientFailure`] | no | no |
//! | `Err(`[`HandlerError`]`)` | no | no |
//!
//! Handlers must be idempotent: a redelivered message that was already
//! handled must produce the same outcome without accumulating side effects.

use async_trait::async_trait;
use serde_json::Value;

use crate::{AckHandle, DryRun, HandlerError};

/// What a handler did with a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The requested action was performed.
    Success,
    /// Nothing needed doing.
    Skip {
        /// Why the message was ignored.
        reason: String,
    },
    /// A well-known domain failure that redelivery cannot fix; acknowledged.
    Rejected {
        /// The domain failure.
        reason: String,
    },
    /// A transport failure; left unacked for redelivery.
    TransientFailure {
        /// The transport failure.
        reason: String,
    },
}

impl Outcome {
    /// Creates a [`Outcome::Skip`].
    pub fn skip(reason: impl Into<String>) -> Self {
        Outcome::Skip {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this outcome asks for the delivery to be acknowledged.
    pub fn wants_ack(&self) -> bool {
        !matches!(self, Outcome::TransientFailure { .. })
    }

    /// Short label used in structured log fields.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Skip { .. } => "skip",
            Outcome::Rejected { .. } => "rejected",
            Outcome::TransientFailure { .. } => "transient_failure",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Skip { reason } => write!(f, "skip: {reason}"),
            Outcome::Rejected { reason } => write!(f, "rejected: {reason}"),
            Outcome::TransientFailure { reason } => write!(f, "transient failure: {reason}"),
        }
    }
}

/// A message handler.
///
/// Implementations are registered against an [`crate::ExchangeTopic`] in the
/// [`crate::HandlerRegistry`].
#[async_trait]
pub trait Handler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Handles one delivery.
    ///
    /// Returning `Err` is a permanent, unclassified failure: the delivery is
    /// left unacked and the dispatch loop logs the error.
    async fn handle(
        &self,
        body: &Value,
        ack: &AckHandle,
        dry_run: DryRun,
    ) -> Result<Outcome, HandlerError>;
}
