//! The built-in route table.

use std::sync::Arc;

use actions::{
    ConfigurationError, ExchangeName, ExchangeTopic, HandlerRegistry, RoutingKey, TriggerService,
};

use crate::PgoDoubleTrigger;

/// Exchange carrying normalized build results.
pub const NORMALIZED_BUILD_EXCHANGE: &str = "exchange/build/normalized";

/// Topic pattern selecting talos jobs on the normalized build exchange.
pub const TALOS_TOPIC: &str = "#.talos.#";

/// Builds the registry of every handler this binary ships.
pub fn builtin_registry(
    trigger: Arc<dyn TriggerService>,
) -> Result<HandlerRegistry, ConfigurationError> {
    HandlerRegistry::new().with_handler(
        route(NORMALIZED_BUILD_EXCHANGE, TALOS_TOPIC)?,
        Arc::new(PgoDoubleTrigger::new(trigger)),
    )
}

fn route(exchange: &str, topic: &str) -> Result<ExchangeTopic, ConfigurationError> {
    let invalid = || ConfigurationError::Invalid {
        message: format!("empty exchange or topic in route '{exchange}' [{topic}]"),
    };
    Ok(ExchangeTopic::new(
        ExchangeName::new(exchange).ok_or_else(invalid)?,
        RoutingKey::new(topic).ok_or_else(invalid)?,
    ))
}
