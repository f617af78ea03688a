//! Static mapping from subscription target to handler.
//!
//! The registry is assembled once at startup and never mutated afterwards.
//! Two lookups are offered:
//!
//! - [`HandlerRegistry::resolve`] matches a configured route verbatim. Used
//!   at startup; a miss is a fatal configuration error.
//! - [`HandlerRegistry::resolve_message`] matches the exchange and concrete
//!   routing key a message was published with against the registered topic
//!   patterns. Used per message by combined subscriptions; a miss is a
//!   per-message error.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{ConfigurationError, ExchangeTopic, Handler, RoutingError};

/// A registered route and its handler.
#[derive(Clone)]
pub struct HandlerEntry {
    /// The route the handler serves.
    pub route: ExchangeTopic,
    /// The handler.
    pub handler: Arc<dyn Handler>,
}

impl std::fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("route", &self.route)
            .field("handler", &self.handler.name())
            .finish()
    }
}

/// Immutable route table.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    entries: BTreeMap<ExchangeTopic, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler for `route`.
    ///
    /// Every route resolves to exactly one handler, so registering a route
    /// twice is a configuration error.
    pub fn with_handler(
        mut self,
        route: ExchangeTopic,
        handler: Arc<dyn Handler>,
    ) -> Result<Self, ConfigurationError> {
        if self.entries.contains_key(&route) {
            return Err(ConfigurationError::DuplicateHandler { route });
        }
        self.entries.insert(route, handler);
        Ok(self)
    }

    /// Returns the handler registered for exactly this route.
    pub fn resolve(&self, route: &ExchangeTopic) -> Result<Arc<dyn Handler>, RoutingError> {
        self.entries
            .get(route)
            .cloned()
            .ok_or_else(|| RoutingError::NotFound {
                exchange: route.exchange.to_string(),
                routing_key: route.routing_key.to_string(),
            })
    }

    /// Returns the first handler whose route pattern would have delivered a
    /// message published on `exchange` with the concrete `routing_key`.
    ///
    /// Routes are tried in their sorted order so the result is deterministic
    /// when patterns overlap.
    pub fn resolve_message(
        &self,
        exchange: &str,
        routing_key: &str,
    ) -> Result<HandlerEntry, RoutingError> {
        self.entries
            .iter()
            .find(|(route, _)| route.matches(exchange, routing_key))
            .map(|(route, handler)| HandlerEntry {
                route: route.clone(),
                handler: Arc::clone(handler),
            })
            .ok_or_else(|| RoutingError::NotFound {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
            })
    }

    /// Returns a registry holding only `routes`.
    ///
    /// Fails with [`ConfigurationError::MissingHandler`] naming the first
    /// route that has no handler.
    pub fn restrict(&self, routes: &[ExchangeTopic]) -> Result<Self, ConfigurationError> {
        let mut restricted = HandlerRegistry::new();
        for route in routes {
            let handler = self
                .resolve(route)
                .map_err(|_| ConfigurationError::MissingHandler {
                    route: route.clone(),
                })?;
            if !restricted.entries.contains_key(route) {
                restricted.entries.insert(route.clone(), handler);
            }
        }
        Ok(restricted)
    }

    /// Iterates over the registered routes in sorted order.
    pub fn routes(&self) -> impl Iterator<Item = &ExchangeTopic> {
        self.entries.keys()
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no route is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, v)| (k, v.name())))
            .finish()
    }
}
