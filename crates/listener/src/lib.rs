//! Pulse actions event source infrastructure.
//!
//! Implements the [`actions::MessageSource`] trait over Pulse, Mozilla's
//! AMQP 0-9-1 message bus, using `lapin`.
//!
//! Each subscription owns one durable queue named `queue/<user>/<label>`,
//! bound to every configured `(exchange, topic)` pair. Messages stay on the
//! queue until acknowledged, so a consumer that restarts (or never acks)
//! sees them again. The channel sets no prefetch limit, so an unacked
//! delivery never holds back the ones behind it; the dispatch loop still
//! handles deliveries strictly one at a time.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Connection handling, queue topology, and message
//! decoding all live here. The [`actions`] crate sees only
//! [`actions::MessageSource`], [`actions::Delivery`] and [`actions::BusError`].

mod consumer;
mod settings;

pub use consumer::PulseConsumer;
pub use settings::{PulseConfig, PulseCredentials, Subscription};
