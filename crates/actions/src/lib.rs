//! Core dispatch domain for pulse-actions.
//!
//! This crate contains every domain concept shared by the handlers, the
//! dispatch loop, and the infrastructure adapters: newtype identifiers, the
//! delivery envelope, the handler contract, the handler registry, the error
//! taxonomy, and the port traits infrastructure crates implement.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`ExchangeName`, `RoutingKey`, `BuilderName`, etc.) |
//! | [`types`] | Value types (`ExchangeTopic`, `DryRun`, `Timestamp`) |
//! | [`errors`] | Error taxonomy and failure classification |
//! | [`delivery`] | Delivery envelope and the exactly-once ack capability |
//! | [`handler`] | The `Handler` contract and its `Outcome` |
//! | [`registry`] | The static route table |
//! | [`ports`] | `MessageSource` and `TriggerService` |

pub mod delivery;
pub mod errors;
pub mod handler;
pub mod identifiers;
pub mod ports;
pub mod registry;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use delivery::{
    summarize, AckHandle, AckStatus, Acknowledger, Delivery, DeliveryInfo, PulseMessage,
    PulseMeta,
};
pub use errors::{
    BusError, ConfigurationError, DispatchError, FailureClass, HandlerError, RoutingError,
    TriggerError,
};
pub use handler::{Handler, Outcome};
pub use identifiers::{BuilderName, ExchangeName, Revision, RoutingKey, TopicBase};
pub use ports::{MessageSource, TriggerRequest, TriggerService};
pub use registry::{HandlerEntry, HandlerRegistry};
pub use types::{DryRun, ExchangeTopic, Timestamp};
