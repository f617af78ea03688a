//! In-memory test doubles for the port traits.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use actions::{
    AckHandle, Acknowledger, BuilderName, BusError, Delivery, DeliveryInfo, ExchangeName,
    MessageSource, RoutingKey, Timestamp, TriggerError, TriggerRequest, TriggerService,
};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;

// ---------------------------------------------------------------------------
// Ack
// ---------------------------------------------------------------------------

/// Shared view of how many times the bus was asked to ack.
#[derive(Clone, Default)]
pub struct AckCounter(Arc<AtomicUsize>);

impl AckCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

struct CountingAcker(AckCounter);

#[async_trait]
impl Acknowledger for CountingAcker {
    async fn ack(&self) -> Result<(), BusError> {
        self.0 .0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn counting_ack() -> (AckHandle, AckCounter) {
    let counter = AckCounter::default();
    (AckHandle::new(CountingAcker(counter.clone())), counter)
}

pub fn delivery(body: Value) -> (Delivery, AckCounter) {
    let (ack, counter) = counting_ack();
    let delivery = Delivery {
        info: DeliveryInfo {
            exchange: ExchangeName::new("exchange/build/normalized").unwrap(),
            routing_key: RoutingKey::new("build.mozilla-inbound.talos").unwrap(),
            redelivered: false,
            received_at: Timestamp::now(),
        },
        payload: body,
        ack,
    };
    (delivery, counter)
}

pub fn build_message(buildername: &str, status: i64, revision: &str) -> Value {
    serde_json::json!({
        "payload": {
            "buildername": buildername,
            "status": status,
            "revision": revision,
        },
        "_meta": {
            "exchange": "exchange/build/normalized",
            "routing_key": "build.mozilla-inbound.talos",
        }
    })
}

// ---------------------------------------------------------------------------
// Trigger service
// ---------------------------------------------------------------------------

/// Records every call and replays scripted results.
#[derive(Default)]
pub struct RecordingTrigger {
    pub requests: Mutex<Vec<TriggerRequest>>,
    pub validations: Mutex<Vec<BuilderName>>,
    pub resets: AtomicUsize,
    pub unknown_builders: bool,
    pub validate_error: Mutex<Option<TriggerError>>,
    pub trigger_errors: Mutex<VecDeque<TriggerError>>,
}

impl RecordingTrigger {
    pub fn failing_with(err: TriggerError) -> Self {
        let trigger = Self::default();
        trigger.trigger_errors.lock().unwrap().push_back(err);
        trigger
    }

    pub fn requests(&self) -> Vec<TriggerRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TriggerService for RecordingTrigger {
    async fn validate_builder(
        &self,
        builder: &BuilderName,
    ) -> Result<Option<BuilderName>, TriggerError> {
        self.validations.lock().unwrap().push(builder.clone());
        if let Some(err) = self.validate_error.lock().unwrap().take() {
            return Err(err);
        }
        if self.unknown_builders {
            Ok(None)
        } else {
            Ok(Some(builder.clone()))
        }
    }

    async fn trigger_job(&self, request: &TriggerRequest) -> Result<(), TriggerError> {
        self.requests.lock().unwrap().push(request.clone());
        match self.trigger_errors.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn reset_caches(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Message source
// ---------------------------------------------------------------------------

/// Replays scripted connection results and deliveries, then signals
/// `drained` and waits forever.
pub struct ScriptedSource {
    pub connects: VecDeque<Result<(), BusError>>,
    pub events: VecDeque<Result<Delivery, BusError>>,
    pub connect_calls: usize,
    drained: Option<oneshot::Sender<()>>,
}

impl ScriptedSource {
    pub fn new(events: Vec<Result<Delivery, BusError>>) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let source = Self {
            connects: VecDeque::new(),
            events: events.into(),
            connect_calls: 0,
            drained: Some(tx),
        };
        (source, rx)
    }
}

#[async_trait]
impl MessageSource for ScriptedSource {
    fn describe(&self) -> String {
        "scripted".to_string()
    }

    async fn connect(&mut self) -> Result<(), BusError> {
        self.connect_calls += 1;
        self.connects.pop_front().unwrap_or(Ok(()))
    }

    async fn next_delivery(&mut self) -> Result<Delivery, BusError> {
        match self.events.pop_front() {
            Some(event) => event,
            None => {
                if let Some(tx) = self.drained.take() {
                    let _ = tx.send(());
                }
                std::future::pending().await
            }
        }
    }
}

/// Hands out deliveries the way an AMQP broker does under `basic.qos`:
/// with a `limit`, nothing more is pushed while that many deliveries are
/// unacked. Signals `drained` once it stops handing out deliveries.
pub struct BoundedBroker {
    queue: VecDeque<(Delivery, AckCounter)>,
    outstanding: Vec<AckCounter>,
    limit: Option<usize>,
    drained: Option<oneshot::Sender<()>>,
}

impl BoundedBroker {
    pub fn new(
        deliveries: Vec<(Delivery, AckCounter)>,
        limit: Option<usize>,
    ) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let broker = Self {
            queue: deliveries.into(),
            outstanding: Vec::new(),
            limit,
            drained: Some(tx),
        };
        (broker, rx)
    }

    fn unacked(&self) -> usize {
        self.outstanding.iter().filter(|acks| acks.count() == 0).count()
    }
}

#[async_trait]
impl MessageSource for BoundedBroker {
    fn describe(&self) -> String {
        "bounded broker".to_string()
    }

    async fn connect(&mut self) -> Result<(), BusError> {
        Ok(())
    }

    async fn next_delivery(&mut self) -> Result<Delivery, BusError> {
        let blocked = self.limit.is_some_and(|limit| self.unacked() >= limit);
        if !blocked {
            if let Some((delivery, acks)) = self.queue.pop_front() {
                self.outstanding.push(acks);
                return Ok(delivery);
            }
        }
        if let Some(tx) = self.drained.take() {
            let _ = tx.send(());
        }
        std::future::pending().await
    }
}
