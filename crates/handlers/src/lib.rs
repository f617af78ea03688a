//! Pulse actions message handlers and the dispatch loop.
//!
//! This crate provides the message handlers shipped with the binary, the
//! router used when several routes share one subscription, the built-in
//! route table, and the [`Dispatcher`] that drives a subscription.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** Handlers sequence calls between the domain types
//! in the [`actions`] crate and the infrastructure ports (`MessageSource`,
//! `TriggerService`). They contain no transport or HTTP details.
//!
//! ## Handlers
//!
//! | Handler | Route | Action |
//! |---------|-------|--------|
//! | [`PgoDoubleTrigger`] | `exchange/build/normalized` `#.talos.#` | schedules talos jobs of PGO builds twice |
//! | [`CombinedRouter`] | any combination of routes | re-derives the handler per message |

pub mod dispatcher;
pub mod pgo;
pub mod router;
pub mod routes;
pub mod settle;

#[cfg(test)]
mod testing;

pub use dispatcher::{Dispatcher, DEFAULT_RECONNECT_DELAY};
pub use pgo::PgoDoubleTrigger;
pub use router::{select_handler, CombinedRouter};
pub use routes::builtin_registry;
pub use settle::settle_trigger_failure;
