//! Error taxonomy for the dispatch domain.
//!
//! | Error | When | Effect on the delivery | Effect on the process |
//! |-------|------|------------------------|-----------------------|
//! | [`ConfigurationError`] | startup | n/a | exit 1 |
//! | [`BusError::Authentication`] | connecting | n/a | exit 1 |
//! | [`BusError::Transport`] | connecting, listening, acking | left unacked | reconnect |
//! | [`TriggerError`] classed [`FailureClass::Transient`] | handling | left unacked | none |
//! | [`TriggerError`] classed [`FailureClass::Domain`] | handling | acked | none |
//! | [`HandlerError`] | handling | left unacked | logged at the loop boundary |
//!
//! No error type here drives an in-process retry. Everything left unacked is
//! redelivered by the bus.

use thiserror::Error;

use crate::{ExchangeTopic, Revision, TopicBase};

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

/// Configuration problems detected while building routes at startup.
///
/// Always fatal: the dispatch loop never starts with an unresolvable route.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A requested topic-base has no `{exchange, topic}` entry in the route table.
    #[error("No route configured for topic base '{topic_base}'")]
    UnknownTopicBase {
        /// The topic-base that was requested.
        topic_base: TopicBase,
    },

    /// A configured route has no registered handler.
    #[error("We don't have an event handler for {route}")]
    MissingHandler {
        /// The route that could not be resolved.
        route: ExchangeTopic,
    },

    /// Two handlers were registered for the same route.
    #[error("More than one event handler registered for {route}")]
    DuplicateHandler {
        /// The route registered twice.
        route: ExchangeTopic,
    },

    /// No topic-base was selected.
    #[error("At least one topic base must be selected")]
    NoSubscriptions,

    /// Any other invalid setting.
    #[error("Configuration error: {message}")]
    Invalid {
        /// Description of the problem.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// A registry lookup that found nothing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// No handler is registered for the exchange and routing key.
    #[error("No handler for exchange '{exchange}' with routing key '{routing_key}'")]
    NotFound {
        /// Exchange the lookup was made for.
        exchange: String,
        /// Routing key (or pattern) the lookup was made for.
        routing_key: String,
    },

    /// A message carried no routing metadata to derive a handler from.
    #[error("Message carries no routing metadata")]
    MissingMetadata,
}

// ---------------------------------------------------------------------------
// Message bus
// ---------------------------------------------------------------------------

/// Failures reported by a message bus client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The bus refused the credentials. Fatal.
    #[error("Authentication with the message bus failed: {message}")]
    Authentication {
        /// Description reported by the bus client.
        message: String,
    },

    /// Connection-level failure. The loop reconnects.
    #[error("Message bus transport error: {message}")]
    Transport {
        /// Description reported by the bus client.
        message: String,
    },

    /// The subscription stream ended. The loop reconnects.
    #[error("Message bus subscription closed")]
    Closed,
}

impl BusError {
    /// Returns `true` if the process must stop instead of reconnecting.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BusError::Authentication { .. })
    }
}

// ---------------------------------------------------------------------------
// Trigger service
// ---------------------------------------------------------------------------

/// How a collaborator failure maps onto the acknowledgement decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Network or transport failure. Leave unacked; redelivery retries it.
    Transient,
    /// Well-known domain failure that redelivery cannot fix. Ack and move on.
    Domain,
    /// Anything else. Surface to the dispatch loop; leave unacked.
    Unclassified,
}

/// Failures reported by the trigger service collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TriggerError {
    /// The service could not be reached or the connection failed mid-request.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the transport failure.
        message: String,
    },

    /// The referenced revision cannot be resolved against the pushlog.
    #[error("Unable to retrieve pushlog data for revision {revision}: {message}")]
    RevisionNotFound {
        /// The revision that could not be resolved.
        revision: Revision,
        /// Description reported by the service.
        message: String,
    },

    /// Any other failure.
    #[error("Trigger service error: {message}")]
    Unexpected {
        /// Description of the failure.
        message: String,
    },
}

impl TriggerError {
    /// Classifies this failure for the acknowledgement decision.
    pub fn class(&self) -> FailureClass {
        match self {
            TriggerError::Connection { .. } => FailureClass::Transient,
            TriggerError::RevisionNotFound { .. } => FailureClass::Domain,
            TriggerError::Unexpected { .. } => FailureClass::Unclassified,
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// A permanent handler failure surfaced to the dispatch loop.
///
/// Returning this leaves the delivery unacked. The loop logs it and moves on
/// to the next delivery.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The payload did not have the shape the handler expects.
    #[error("Malformed payload: {message}")]
    MalformedPayload {
        /// Decoder error message.
        message: String,
    },

    /// The trigger service failed in a way no handler knows how to classify.
    #[error(transparent)]
    Trigger(#[from] TriggerError),

    /// Acknowledging the delivery failed.
    #[error("Failed to acknowledge delivery: {0}")]
    Ack(#[from] BusError),

    /// The handler panicked.
    #[error("Handler panicked: {message}")]
    Panicked {
        /// Panic payload, when it was a string.
        message: String,
    },
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::MalformedPayload {
            message: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch loop
// ---------------------------------------------------------------------------

/// Conditions that stop the dispatch loop.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A route could not be resolved at startup.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The bus refused the credentials.
    #[error(transparent)]
    Authentication(BusError),
}
