//! Routing for subscriptions that combine several routes.
//!
//! A single-route subscription is bound straight to its handler. When
//! several routes share one durable queue, the subscription key no longer
//! identifies the handler, so [`CombinedRouter`] re-derives it for every
//! message from the routing metadata the bus stamps into the body.

use std::sync::Arc;

use actions::{
    AckHandle, ConfigurationError, DryRun, ExchangeTopic, Handler, HandlerError, HandlerRegistry,
    Outcome, PulseMeta, RoutingError,
};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error};

/// Selects the handler serving `routes`.
///
/// Every route must be registered; the first missing one is reported as a
/// [`ConfigurationError::MissingHandler`].
pub fn select_handler(
    registry: &HandlerRegistry,
    routes: &[ExchangeTopic],
) -> Result<Arc<dyn Handler>, ConfigurationError> {
    match routes {
        [] => Err(ConfigurationError::NoSubscriptions),
        [route] => registry
            .resolve(route)
            .map_err(|_| ConfigurationError::MissingHandler {
                route: route.clone(),
            }),
        many => Ok(Arc::new(CombinedRouter::new(registry.restrict(many)?))),
    }
}

/// Per-message dispatcher for combined subscriptions.
pub struct CombinedRouter {
    registry: HandlerRegistry,
}

impl CombinedRouter {
    /// Creates a router over the routes of one combined subscription.
    pub fn new(registry: HandlerRegistry) -> Self {
        Self { registry }
    }

    async fn drop_unroutable(
        &self,
        err: RoutingError,
        ack: &AckHandle,
        dry_run: DryRun,
    ) -> Result<Outcome, HandlerError> {
        error!(error = %err, "Unroutable message; dropping it");
        ack.ack_unless(dry_run).await?;
        Ok(Outcome::skip(format!("unroutable: {err}")))
    }
}

#[async_trait]
impl Handler for CombinedRouter {
    fn name(&self) -> &str {
        "combined-router"
    }

    async fn handle(
        &self,
        body: &Value,
        ack: &AckHandle,
        dry_run: DryRun,
    ) -> Result<Outcome, HandlerError> {
        let Some(meta) = PulseMeta::from_body(body) else {
            return self
                .drop_unroutable(RoutingError::MissingMetadata, ack, dry_run)
                .await;
        };

        match self
            .registry
            .resolve_message(&meta.exchange, &meta.routing_key)
        {
            Ok(entry) => {
                debug!(
                    handler = entry.handler.name(),
                    route = %entry.route,
                    "Routing message"
                );
                entry.handler.handle(body, ack, dry_run).await
            }
            Err(err) => self.drop_unroutable(err, ack, dry_run).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::counting_ack;
    use actions::{ExchangeName, RoutingKey};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        name: &'static str,
        calls: AtomicUsize,
    }

    impl Counting {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Handler for Counting {
        fn name(&self) -> &str {
            self.name
        }

        async fn handle(
            &self,
            _body: &Value,
            ack: &AckHandle,
            dry_run: DryRun,
        ) -> Result<Outcome, HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ack.ack_unless(dry_run).await?;
            Ok(Outcome::Success)
        }
    }

    fn route(exchange: &str, topic: &str) -> ExchangeTopic {
        ExchangeTopic::new(
            ExchangeName::new(exchange).unwrap(),
            RoutingKey::new(topic).unwrap(),
        )
    }

    fn message(exchange: &str, routing_key: &str) -> Value {
        serde_json::json!({
            "payload": {},
            "_meta": { "exchange": exchange, "routing_key": routing_key }
        })
    }

    #[tokio::test]
    async fn routes_by_exchange_carried_in_the_body() {
        let talos = Counting::new("talos");
        let backfill = Counting::new("backfill");
        let registry = HandlerRegistry::new()
            .with_handler(route("exchange/build/normalized", "#.talos.#"), talos.clone())
            .unwrap()
            .with_handler(
                route("exchange/treeherder/v1/job-actions", "buildbot.#.#"),
                backfill.clone(),
            )
            .unwrap();
        let router = CombinedRouter::new(registry);

        let (ack, acks) = counting_ack();
        let outcome = router
            .handle(
                &message("exchange/treeherder/v1/job-actions", "buildbot.try.backfill"),
                &ack,
                DryRun::DISABLED,
            )
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Success);
        assert_eq!(backfill.calls.load(Ordering::SeqCst), 1);
        assert_eq!(talos.calls.load(Ordering::SeqCst), 0);
        assert_eq!(acks.count(), 1);
    }

    #[tokio::test]
    async fn unroutable_message_is_dropped() {
        let router = CombinedRouter::new(HandlerRegistry::new());

        let (ack, acks) = counting_ack();
        let outcome = router
            .handle(&message("exchange/unknown", "a.b"), &ack, DryRun::DISABLED)
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Skip { .. }));
        assert_eq!(acks.count(), 1);

        let (ack, acks) = counting_ack();
        router
            .handle(&serde_json::json!({ "payload": {} }), &ack, DryRun::DISABLED)
            .await
            .unwrap();
        assert_eq!(acks.count(), 1);
    }

    #[tokio::test]
    async fn unroutable_message_is_kept_in_dry_run() {
        let router = CombinedRouter::new(HandlerRegistry::new());
        let (ack, acks) = counting_ack();
        router
            .handle(&message("exchange/unknown", "a.b"), &ack, DryRun::ENABLED)
            .await
            .unwrap();
        assert_eq!(acks.count(), 0);
    }

    #[test]
    fn select_handler_resolves_single_and_combined_routes() {
        let talos_route = route("exchange/build/normalized", "#.talos.#");
        let other_route = route("exchange/treeherder/v1/job-actions", "buildbot.#.#");
        let registry = HandlerRegistry::new()
            .with_handler(talos_route.clone(), Counting::new("talos"))
            .unwrap()
            .with_handler(other_route.clone(), Counting::new("backfill"))
            .unwrap();

        let single = select_handler(&registry, std::slice::from_ref(&talos_route)).unwrap();
        assert_eq!(single.name(), "talos");

        let combined = select_handler(&registry, &[talos_route, other_route]).unwrap();
        assert_eq!(combined.name(), "combined-router");

        let missing = route("exchange/treeherder/v1/resultset-actions", "#");
        let err = select_handler(&registry, std::slice::from_ref(&missing))
            .err()
            .unwrap();
        assert_eq!(err, ConfigurationError::MissingHandler { route: missing });

        let err = select_handler(&registry, &[]).err().unwrap();
        assert_eq!(err, ConfigurationError::NoSubscriptions);
    }
}
