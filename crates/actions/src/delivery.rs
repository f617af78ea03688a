//! Delivery envelope: one message received from the bus plus the capability
//! to acknowledge it.
//!
//! A delivery that is never acknowledged is redelivered by the bus later.
//! That redelivery is the only retry mechanism in the system, so the ack
//! capability is deliberately narrow: it can be used once, and the dry-run
//! helper never reaches the bus at all.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{BusError, DryRun, ExchangeName, RoutingKey, Timestamp};

/// Maximum number of characters of a payload rendered into log lines.
pub const PAYLOAD_SUMMARY_LIMIT: usize = 256;

// ---------------------------------------------------------------------------
// Ack capability
// ---------------------------------------------------------------------------

/// Transport-side acknowledgement of a single delivery.
///
/// Implemented by bus clients. Acking removes the message from the durable
/// queue.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Acknowledges the delivery this acknowledger was issued for.
    async fn ack(&self) -> Result<(), BusError>;
}

/// Result of an ack attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    /// The bus acknowledged the delivery.
    Acked,
    /// The delivery had already been acknowledged; nothing was sent.
    AlreadyAcked,
    /// Dry-run mode; nothing was sent.
    Suppressed,
}

/// Exactly-once acknowledgement capability handed to handlers.
pub struct AckHandle {
    acker: Box<dyn Acknowledger>,
    acked: AtomicBool,
}

impl AckHandle {
    /// Wraps a transport acknowledger.
    pub fn new(acker: impl Acknowledger + 'static) -> Self {
        Self {
            acker: Box::new(acker),
            acked: AtomicBool::new(false),
        }
    }

    /// Acknowledges the delivery.
    ///
    /// A second call is a no-op returning [`AckStatus::AlreadyAcked`]. If the
    /// transport fails the handle stays unacked so a later attempt may succeed.
    pub async fn ack(&self) -> Result<AckStatus, BusError> {
        if self.acked.swap(true, Ordering::SeqCst) {
            warn!("Delivery already acknowledged; ignoring repeated ack");
            return Ok(AckStatus::AlreadyAcked);
        }

        match self.acker.ack().await {
            Ok(()) => Ok(AckStatus::Acked),
            Err(err) => {
                self.acked.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    /// Acknowledges the delivery unless `dry_run` is enabled.
    pub async fn ack_unless(&self, dry_run: DryRun) -> Result<AckStatus, BusError> {
        if dry_run.is_enabled() {
            debug!("Dry run: leaving delivery unacknowledged");
            return Ok(AckStatus::Suppressed);
        }
        self.ack().await
    }

    /// Returns `true` once the bus has acknowledged the delivery.
    pub fn is_acked(&self) -> bool {
        self.acked.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckHandle")
            .field("acked", &self.is_acked())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Delivery
// ---------------------------------------------------------------------------

/// Transport metadata of a delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryInfo {
    /// Exchange the message was published on.
    pub exchange: ExchangeName,
    /// Concrete routing key the message was published with.
    pub routing_key: RoutingKey,
    /// `true` if the bus has delivered this message before.
    pub redelivered: bool,
    /// When the message was received by this process.
    pub received_at: Timestamp,
}

/// One message instance received from the bus.
#[derive(Debug)]
pub struct Delivery {
    /// Transport metadata.
    pub info: DeliveryInfo,
    /// Decoded message body.
    pub payload: Value,
    /// Exactly-once ack capability.
    pub ack: AckHandle,
}

impl Delivery {
    /// Returns a compact, length-limited rendering of the payload for logs.
    pub fn summary(&self) -> String {
        summarize(&self.payload)
    }

    /// Time the message spent on the bus, from the producer's `_meta.sent`
    /// stamp to receipt.
    pub fn bus_latency(&self) -> Option<Duration> {
        let sent = PulseMeta::from_body(&self.payload)?.sent_at()?;
        Some(self.info.received_at.since(sent))
    }
}

/// Renders `payload` as compact JSON, truncated to [`PAYLOAD_SUMMARY_LIMIT`] characters.
pub fn summarize(payload: &Value) -> String {
    let rendered = payload.to_string();
    match rendered.char_indices().nth(PAYLOAD_SUMMARY_LIMIT) {
        Some((cut, _)) => format!("{}…", &rendered[..cut]),
        None => rendered,
    }
}

// ---------------------------------------------------------------------------
// Pulse message envelope
// ---------------------------------------------------------------------------

/// The body of a message published on Pulse.
///
/// The producer's data lives under `payload`; the bus stamps routing
/// metadata under `_meta`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulseMessage<T> {
    /// Producer-defined payload.
    pub payload: T,
    /// Routing metadata stamped by the bus.
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<PulseMeta>,
}

/// Routing metadata carried inside a Pulse message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulseMeta {
    /// Exchange the message was published on.
    pub exchange: String,
    /// Concrete routing key the message was published with.
    pub routing_key: String,
    /// Publication time as reported by the producer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent: Option<String>,
}

impl PulseMeta {
    /// Extracts the `_meta` block from a raw message body, if present.
    pub fn from_body(body: &Value) -> Option<Self> {
        body.get("_meta")
            .and_then(|meta| serde_json::from_value(meta.clone()).ok())
    }

    /// Publication time, if present and parseable.
    pub fn sent_at(&self) -> Option<Timestamp> {
        self.sent.as_deref().and_then(Timestamp::parse)
    }
}
