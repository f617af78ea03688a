//! Maps trigger service failures onto the acknowledgement decision.
//!
//! Shared by every handler that calls the trigger service so the mapping is
//! decided in one place.

use actions::{AckHandle, DryRun, FailureClass, HandlerError, Outcome, TriggerError};
use tracing::warn;

/// Settles a delivery whose trigger call failed.
///
/// - transient failures are left unacked for redelivery;
/// - domain failures are acknowledged (unless dry-run) since redelivery
///   cannot fix them;
/// - anything else is returned as an error for the dispatch loop to log,
///   leaving the delivery unacked.
pub async fn settle_trigger_failure(
    err: TriggerError,
    ack: &AckHandle,
    dry_run: DryRun,
) -> Result<Outcome, HandlerError> {
    match err.class() {
        FailureClass::Transient => {
            warn!(error = %err, "Connection error. Trying again");
            Ok(Outcome::TransientFailure {
                reason: err.to_string(),
            })
        }
        FailureClass::Domain => {
            warn!(error = %err, "Not retrying");
            ack.ack_unless(dry_run).await?;
            Ok(Outcome::Rejected {
                reason: err.to_string(),
            })
        }
        FailureClass::Unclassified => {
            warn!(error = %err, "Unexpected trigger service failure");
            Err(HandlerError::Trigger(err))
        }
    }
}
