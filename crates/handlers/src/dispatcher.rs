//! The dispatch loop.
//!
//! ```text
//!            ┌──────────────── transport error ───────────────┐
//!            ▼                                                 │
//!      Connecting ──ok──▶ Listening ──delivery──▶ Handling ────┤
//!            │                ▲                       │        │
//!   auth failure              └──────── done ─────────┘        │
//!            ▼                                                 │
//!         (fatal)          Stopped ◀── shutdown signal (any state but Handling)
//! ```
//!
//! One delivery is handled at a time. A handler runs to completion before
//! the next delivery is received, so the shutdown signal is only observed
//! while connecting or listening.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use actions::{Delivery, DispatchError, DryRun, Handler, HandlerError, MessageSource, Outcome};
use futures::FutureExt;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Default pause between failed connection attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Drives one subscription: receives deliveries and hands them to a handler.
pub struct Dispatcher {
    handler: Arc<dyn Handler>,
    dry_run: DryRun,
    reconnect_delay: Duration,
}

impl Dispatcher {
    /// Creates a dispatcher invoking `handler` for every delivery.
    pub fn new(handler: Arc<dyn Handler>, dry_run: DryRun) -> Self {
        Self {
            handler,
            dry_run,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    /// Overrides the pause between failed connection attempts.
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Runs until `shutdown` resolves or the bus refuses the credentials.
    ///
    /// Returns `Ok(())` when stopped by `shutdown`. Transport failures never
    /// end the loop; it reconnects, waiting `reconnect_delay` between failed
    /// attempts, without limit.
    pub async fn run<S, F>(&self, source: &mut S, shutdown: F) -> Result<(), DispatchError>
    where
        S: MessageSource + ?Sized,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            debug!(subscription = %source.describe(), "Connecting to the message bus");
            let connected = tokio::select! {
                _ = &mut shutdown => return Ok(stopped()),
                connected = source.connect() => connected,
            };

            if let Err(err) = connected {
                if err.is_fatal() {
                    error!(error = %err, "Cannot authenticate with the message bus");
                    return Err(DispatchError::Authentication(err));
                }
                warn!(
                    error = %err,
                    retry_in_secs = self.reconnect_delay.as_secs_f64(),
                    "Failed to connect to the message bus"
                );
                tokio::select! {
                    _ = &mut shutdown => return Ok(stopped()),
                    _ = tokio::time::sleep(self.reconnect_delay) => {}
                }
                continue;
            }

            info!(
                subscription = %source.describe(),
                handler = self.handler.name(),
                dry_run = %self.dry_run,
                "Listening"
            );

            loop {
                let next = tokio::select! {
                    _ = &mut shutdown => return Ok(stopped()),
                    next = source.next_delivery() => next,
                };

                match next {
                    Ok(delivery) => {
                        let _ = self.dispatch(delivery).await;
                    }
                    Err(err) if err.is_fatal() => {
                        error!(error = %err, "Cannot authenticate with the message bus");
                        return Err(DispatchError::Authentication(err));
                    }
                    Err(err) => {
                        warn!(error = %err, "Lost the subscription; reconnecting");
                        break;
                    }
                }
            }
        }
    }

    /// Hands one delivery to the handler and logs the result.
    ///
    /// Errors and panics raised by the handler are logged here and never
    /// propagate further; the delivery is left unacked.
    pub async fn dispatch(&self, delivery: Delivery) -> Result<Outcome, HandlerError> {
        let summary = delivery.summary();
        let bus_latency_ms = delivery
            .bus_latency()
            .map(|latency| latency.as_millis() as u64);
        let span = info_span!(
            "delivery",
            exchange = %delivery.info.exchange,
            routing_key = %delivery.info.routing_key,
            redelivered = delivery.info.redelivered,
            bus_latency_ms,
        );

        let start = Instant::now();
        let result = AssertUnwindSafe(
            self.handler
                .handle(&delivery.payload, &delivery.ack, self.dry_run)
                .instrument(span.clone()),
        )
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            Err(HandlerError::Panicked {
                message: panic_message(panic.as_ref()),
            })
        });
        let elapsed = start.elapsed();

        span.in_scope(|| match &result {
            Ok(outcome) => {
                info!(
                    handler = self.handler.name(),
                    outcome = outcome.label(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Message {}, took {:.3} seconds to execute",
                    summary,
                    elapsed.as_secs_f64()
                );
                if outcome.wants_ack() && !self.dry_run.is_enabled() && !delivery.ack.is_acked() {
                    warn!(
                        handler = self.handler.name(),
                        %outcome,
                        "Handler finished without acknowledging; the message will be redelivered"
                    );
                }
            }
            Err(err) => {
                error!(
                    handler = self.handler.name(),
                    error = ?err,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Message {} failed after {:.3} seconds: {}; leaving it unacknowledged",
                    summary,
                    elapsed.as_secs_f64(),
                    err
                );
            }
        });

        result
    }
}

fn stopped() {
    info!("Shutdown requested; stopping");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        build_message, delivery, AckCounter, BoundedBroker, RecordingTrigger, ScriptedSource,
    };
    use crate::PgoDoubleTrigger;
    use actions::{AckHandle, BusError, TriggerError, TriggerService};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    enum Behaviour {
        Succeed,
        Transient,
        Fail,
        Panic,
    }

    struct Scripted {
        script: Mutex<VecDeque<Behaviour>>,
        handled: Mutex<Vec<Value>>,
    }

    impl Scripted {
        fn new(script: Vec<Behaviour>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                handled: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Handler for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn handle(
            &self,
            body: &Value,
            ack: &AckHandle,
            dry_run: DryRun,
        ) -> Result<Outcome, HandlerError> {
            self.handled.lock().unwrap().push(body.clone());
            let behaviour = self.script.lock().unwrap().pop_front();
            match behaviour {
                Some(Behaviour::Transient) => Ok(Outcome::TransientFailure {
                    reason: "connection reset".into(),
                }),
                Some(Behaviour::Fail) => Err(HandlerError::MalformedPayload {
                    message: "bad".into(),
                }),
                Some(Behaviour::Panic) => panic!("handler bug"),
                Some(Behaviour::Succeed) | None => {
                    ack.ack_unless(dry_run).await?;
                    Ok(Outcome::Success)
                }
            }
        }
    }

    fn numbered(n: i64) -> (Delivery, AckCounter) {
        delivery(serde_json::json!({ "payload": { "n": n } }))
    }

    #[tokio::test]
    async fn loop_survives_failing_and_panicking_handlers() {
        let handler = Scripted::new(vec![
            Behaviour::Transient,
            Behaviour::Fail,
            Behaviour::Panic,
            Behaviour::Succeed,
        ]);
        let mut deliveries = Vec::new();
        let mut counters = Vec::new();
        for n in 0..4 {
            let (d, c) = numbered(n);
            deliveries.push(Ok(d));
            counters.push(c);
        }
        let (mut source, drained) = ScriptedSource::new(deliveries);

        let dispatcher = Dispatcher::new(handler.clone(), DryRun::DISABLED);
        let result = dispatcher
            .run(&mut source, async {
                let _ = drained.await;
            })
            .await;

        assert!(result.is_ok());
        let handled = handler.handled.lock().unwrap();
        let order: Vec<i64> = handled
            .iter()
            .map(|body| body["payload"]["n"].as_i64().unwrap())
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
        let acks: Vec<usize> = counters.iter().map(AckCounter::count).collect();
        assert_eq!(acks, vec![0, 0, 0, 1]);
    }

    #[tokio::test]
    async fn reconnects_after_transport_errors() {
        let (first, _) = numbered(1);
        let (second, _) = numbered(2);
        let (mut source, drained) = ScriptedSource::new(vec![
            Ok(first),
            Err(BusError::Transport {
                message: "connection reset".into(),
            }),
            Ok(second),
        ]);
        source.connects.push_back(Err(BusError::Transport {
            message: "connection refused".into(),
        }));

        let handler = Scripted::new(Vec::new());
        let dispatcher = Dispatcher::new(handler.clone(), DryRun::DISABLED)
            .with_reconnect_delay(Duration::from_millis(1));
        dispatcher
            .run(&mut source, async {
                let _ = drained.await;
            })
            .await
            .unwrap();

        // refused, connected, connected again after the reset
        assert_eq!(source.connect_calls, 3);
        assert_eq!(handler.handled.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn authentication_failure_is_fatal() {
        let (mut source, _drained) = ScriptedSource::new(Vec::new());
        source.connects.push_back(Err(BusError::Authentication {
            message: "ACCESS_REFUSED".into(),
        }));

        let dispatcher = Dispatcher::new(Scripted::new(Vec::new()), DryRun::DISABLED);
        let result = dispatcher
            .run(&mut source, std::future::pending::<()>())
            .await;

        assert!(matches!(result, Err(DispatchError::Authentication(_))));
        assert_eq!(source.connect_calls, 1);
    }

    #[tokio::test]
    async fn shutdown_stops_an_idle_loop() {
        let (mut source, _drained) = ScriptedSource::new(Vec::new());
        let dispatcher = Dispatcher::new(Scripted::new(Vec::new()), DryRun::DISABLED);
        let result = dispatcher.run(&mut source, async {}).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn transient_trigger_failure_does_not_stop_the_next_delivery() {
        let trigger = Arc::new(RecordingTrigger::failing_with(TriggerError::Connection {
            message: "connection reset".into(),
        }));
        let handler = Arc::new(PgoDoubleTrigger::new(
            Arc::clone(&trigger) as Arc<dyn TriggerService>
        ));

        let (first, first_acks) = delivery(build_message("mozilla-inbound-pgo-opt", 0, "abc123"));
        let (second, second_acks) = delivery(build_message("fx-team-pgo-talos", 0, "def456"));
        let (mut source, drained) = ScriptedSource::new(vec![Ok(first), Ok(second)]);

        Dispatcher::new(handler, DryRun::DISABLED)
            .run(&mut source, async {
                let _ = drained.await;
            })
            .await
            .unwrap();

        assert_eq!(first_acks.count(), 0);
        assert_eq!(second_acks.count(), 1);
        assert_eq!(trigger.requests().len(), 2);
    }

    async fn run_until_drained(
        dispatcher: &Dispatcher,
        broker: &mut BoundedBroker,
        drained: tokio::sync::oneshot::Receiver<()>,
    ) {
        dispatcher
            .run(broker, async {
                let _ = drained.await;
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unacked_deliveries_do_not_hold_back_later_ones() {
        let handler = Scripted::new(vec![
            Behaviour::Transient,
            Behaviour::Fail,
            Behaviour::Succeed,
        ]);
        let deliveries: Vec<_> = (0..3).map(numbered).collect();
        let (mut broker, drained) = BoundedBroker::new(deliveries, None);

        let dispatcher = Dispatcher::new(handler.clone(), DryRun::DISABLED);
        run_until_drained(&dispatcher, &mut broker, drained).await;

        assert_eq!(handler.handled.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn dry_run_sees_every_delivery() {
        let handler = Scripted::new(Vec::new());
        let deliveries: Vec<_> = (0..3).map(numbered).collect();
        let counters: Vec<AckCounter> = deliveries.iter().map(|(_, c)| c.clone()).collect();
        let (mut broker, drained) = BoundedBroker::new(deliveries, None);

        let dispatcher = Dispatcher::new(handler.clone(), DryRun::ENABLED);
        run_until_drained(&dispatcher, &mut broker, drained).await;

        assert_eq!(handler.handled.lock().unwrap().len(), 3);
        assert!(counters.iter().all(|c| c.count() == 0));
    }

    #[tokio::test]
    async fn a_prefetch_limit_of_one_stalls_behind_an_unacked_delivery() {
        let handler = Scripted::new(vec![Behaviour::Transient, Behaviour::Succeed]);
        let deliveries: Vec<_> = (0..2).map(numbered).collect();
        let (mut broker, drained) = BoundedBroker::new(deliveries, Some(1));

        let dispatcher = Dispatcher::new(handler.clone(), DryRun::DISABLED);
        run_until_drained(&dispatcher, &mut broker, drained).await;

        assert_eq!(handler.handled.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dispatch_reports_panics_as_errors() {
        let dispatcher = Dispatcher::new(Scripted::new(vec![Behaviour::Panic]), DryRun::DISABLED);
        let (d, acks) = numbered(7);
        let result = dispatcher.dispatch(d).await;
        match result {
            Err(HandlerError::Panicked { message }) => assert_eq!(message, "handler bug"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(acks.count(), 0);
    }
}
