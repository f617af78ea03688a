//! Double-triggers talos jobs of PGO builds.
//!
//! Talos results on PGO builds are noisy, so every talos job reported on a
//! PGO builder of an integration branch is scheduled twice more on the same
//! revision. The PGO build itself already exists; the trigger service is
//! told not to schedule a missing parent build.

use std::sync::Arc;

use actions::{
    AckHandle, BuilderName, DryRun, Handler, HandlerError, Outcome, PulseMessage, Revision,
    TriggerRequest, TriggerService,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::settle::settle_trigger_failure;

/// Marker identifying a PGO builder.
pub const PGO_MARKER: &str = "pgo";

/// Integration branches whose PGO builders are eligible.
pub const BRANCH_MARKERS: [&str; 2] = ["mozilla-inbound", "fx-team"];

/// How many times an eligible job is scheduled.
pub const TRIGGER_TIMES: u32 = 2;

/// Payload published on the normalized build exchange.
#[derive(Debug, Clone, Deserialize)]
struct BuildPayload {
    buildername: String,
    status: i64,
    #[serde(default)]
    revision: Option<String>,
}

/// Returns `true` if `buildername` is a PGO builder of an eligible branch.
pub fn is_eligible(buildername: &str) -> bool {
    buildername.contains(PGO_MARKER)
        && BRANCH_MARKERS
            .iter()
            .any(|branch| buildername.contains(branch))
}

/// Handler scheduling talos jobs of PGO builds twice.
pub struct PgoDoubleTrigger {
    trigger: Arc<dyn TriggerService>,
}

impl PgoDoubleTrigger {
    /// Creates the handler over a trigger service.
    pub fn new(trigger: Arc<dyn TriggerService>) -> Self {
        Self { trigger }
    }
}

#[async_trait]
impl Handler for PgoDoubleTrigger {
    fn name(&self) -> &str {
        "pgo-double-trigger"
    }

    async fn handle(
        &self,
        body: &Value,
        ack: &AckHandle,
        dry_run: DryRun,
    ) -> Result<Outcome, HandlerError> {
        // Build and job state may have changed since the previous message.
        self.trigger.reset_caches();

        let message: PulseMessage<BuildPayload> = serde_json::from_value(body.clone())?;
        let build = message.payload;

        let builder = match BuilderName::new(build.buildername.as_str()) {
            Some(builder) if is_eligible(builder.as_str()) => builder,
            _ => {
                ack.ack_unless(dry_run).await?;
                debug!(
                    buildername = %build.buildername,
                    status = build.status,
                    "'{}' with status {}. Nothing to be done.",
                    build.buildername,
                    build.status
                );
                return Ok(Outcome::skip("nothing to be done"));
            }
        };

        // Producers sometimes report builder names that do not exist.
        let builder = match self.trigger.validate_builder(&builder).await {
            Ok(Some(valid)) => valid,
            Ok(None) => {
                info!(buildername = %builder, "Ignoring unknown builder");
                ack.ack_unless(dry_run).await?;
                return Ok(Outcome::skip(format!("unknown builder '{builder}'")));
            }
            Err(err) => return settle_trigger_failure(err, ack, dry_run).await,
        };

        let revision = build
            .revision
            .and_then(Revision::new)
            .ok_or_else(|| HandlerError::MalformedPayload {
                message: format!("no revision reported for '{builder}'"),
            })?;

        let request = TriggerRequest {
            revision,
            builder,
            times: TRIGGER_TIMES,
            dry_run,
            trigger_missing_parent: false,
        };

        match self.trigger.trigger_job(&request).await {
            Ok(()) => {
                ack.ack_unless(dry_run).await?;
                info!(
                    buildername = %request.builder,
                    revision = %request.revision,
                    times = request.times,
                    %dry_run,
                    "Triggered PGO talos job"
                );
                Ok(Outcome::Success)
            }
            Err(err) => settle_trigger_failure(err, ack, dry_run).await,
        }
    }
}
