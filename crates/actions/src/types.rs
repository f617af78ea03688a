//! Shared value types for the dispatch domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! behaviour: subscription targets know how to match concrete routing keys,
//! and the dry-run flag decides whether side effects may happen.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ExchangeName, RoutingKey};

// ---------------------------------------------------------------------------
// Subscription targets
// ---------------------------------------------------------------------------

/// A subscription target: one exchange plus the routing-key pattern bound on it.
///
/// Immutable once a subscription starts. Used as the key of the handler
/// registry, so two targets are equal only if both parts are equal verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExchangeTopic {
    /// The exchange the subscription is bound to.
    pub exchange: ExchangeName,
    /// The routing-key pattern of the binding.
    #[serde(rename = "topic")]
    pub routing_key: RoutingKey,
}

impl ExchangeTopic {
    /// Creates a new [`ExchangeTopic`].
    pub fn new(exchange: ExchangeName, routing_key: RoutingKey) -> Self {
        Self {
            exchange,
            routing_key,
        }
    }

    /// Returns `true` if a message published on `exchange` with the concrete
    /// `routing_key` would be delivered through this binding.
    ///
    /// Follows AMQP topic semantics: `*` matches exactly one dot-separated
    /// word and `#` matches zero or more words.
    pub fn matches(&self, exchange: &str, routing_key: &str) -> bool {
        if self.exchange.as_str() != exchange {
            return false;
        }
        let pattern: Vec<&str> = self.routing_key.as_str().split('.').collect();
        let key: Vec<&str> = routing_key.split('.').collect();
        topic_matches(&pattern, &key)
    }
}

impl std::fmt::Display for ExchangeTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.exchange, self.routing_key)
    }
}

fn topic_matches(pattern: &[&str], key: &[&str]) -> bool {
    match (pattern.split_first(), key.split_first()) {
        (None, None) => true,
        (Some((&"#", rest)), _) => {
            topic_matches(rest, key) || (!key.is_empty() && topic_matches(pattern, &key[1..]))
        }
        (Some((&"*", rest)), Some((_, key_rest))) => topic_matches(rest, key_rest),
        (Some((word, rest)), Some((key_word, key_rest))) => {
            word == key_word && topic_matches(rest, key_rest)
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Dry run
// ---------------------------------------------------------------------------

/// Process-wide dry-run flag, fixed at startup.
///
/// When enabled no delivery is ever acknowledged and no call that mutates CI
/// state is made; handlers only log what they would have done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DryRun(bool);

impl DryRun {
    /// Side effects are performed.
    pub const DISABLED: DryRun = DryRun(false);
    /// Side effects are suppressed.
    pub const ENABLED: DryRun = DryRun(true);

    /// Creates a [`DryRun`] from a command-line flag.
    pub fn new(enabled: bool) -> Self {
        Self(enabled)
    }

    /// Returns `true` if side effects must be suppressed.
    pub fn is_enabled(self) -> bool {
        self.0
    }
}

impl std::fmt::Display for DryRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 {
            write!(f, "dry-run")
        } else {
            write!(f, "live")
        }
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Parses an ISO 8601 timestamp as stamped by Pulse producers.
    ///
    /// Values without an offset are taken to be UTC.
    pub fn parse(value: &str) -> Option<Self> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
            return Some(Self(dt.with_timezone(&Utc)));
        }
        NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| Self(naive.and_utc()))
    }

    /// Time from `earlier` to `self`, or zero if `earlier` is later
    /// (producer clock skew).
    pub fn since(self, earlier: Timestamp) -> Duration {
        (self.0 - earlier.0).to_std().unwrap_or_default()
    }
}
