use actions::{
    AckHandle, Acknowledger, BusError, Delivery, DeliveryInfo, ExchangeName, ExchangeTopic,
    MessageSource, RoutingKey, Timestamp,
};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::uri::{AMQPAuthority, AMQPScheme, AMQPUri, AMQPUserInfo};
use lapin::{Channel, Connection, ConnectionProperties, Consumer};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{PulseConfig, PulseCredentials, Subscription};

struct Live {
    // Dropping the connection closes the channel and consumer.
    _connection: Connection,
    _channel: Channel,
    consumer: Consumer,
}

/// [`MessageSource`] reading one durable Pulse queue.
pub struct PulseConsumer {
    config: PulseConfig,
    credentials: PulseCredentials,
    subscription: Subscription,
    live: Option<Live>,
}

impl PulseConsumer {
    /// Creates a consumer; nothing is opened until [`MessageSource::connect`].
    pub fn new(
        config: PulseConfig,
        credentials: PulseCredentials,
        subscription: Subscription,
    ) -> Self {
        Self {
            config,
            credentials,
            subscription,
            live: None,
        }
    }

    fn uri(&self) -> AMQPUri {
        AMQPUri {
            scheme: if self.config.tls {
                AMQPScheme::AMQPS
            } else {
                AMQPScheme::AMQP
            },
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.credentials.user.clone(),
                    password: self.credentials.password.clone(),
                },
                host: self.config.host.clone(),
                port: self.config.port,
            },
            vhost: self.config.vhost.clone(),
            ..Default::default()
        }
    }

    fn to_delivery(&self, delivery: lapin::message::Delivery) -> Delivery {
        // Bindings are never empty (checked by Subscription::new).
        let fallback = &self.subscription.bindings()[0];
        let exchange = ExchangeName::new(delivery.exchange.as_str())
            .unwrap_or_else(|| fallback.exchange.clone());
        let routing_key = RoutingKey::new(delivery.routing_key.as_str())
            .unwrap_or_else(|| fallback.routing_key.clone());

        Delivery {
            info: DeliveryInfo {
                exchange,
                routing_key,
                redelivered: delivery.redelivered,
                received_at: Timestamp::now(),
            },
            payload: decode_body(&delivery.data),
            ack: AckHandle::new(LapinAcker(delivery.acker)),
        }
    }
}

#[async_trait]
impl MessageSource for PulseConsumer {
    fn describe(&self) -> String {
        let bindings: Vec<String> = self
            .subscription
            .bindings()
            .iter()
            .map(ToString::to_string)
            .collect();
        format!(
            "{} on {}:{} ({})",
            self.subscription.queue_name(&self.credentials.user),
            self.config.host,
            self.config.port,
            bindings.join(", ")
        )
    }

    async fn connect(&mut self) -> Result<(), BusError> {
        self.live = None;
        let live = open(
            self.uri(),
            self.subscription.queue_name(&self.credentials.user),
            self.subscription.bindings().to_vec(),
        )
        .await
        .map_err(bus_error)?;
        self.live = Some(live);
        Ok(())
    }

    async fn next_delivery(&mut self) -> Result<Delivery, BusError> {
        let live = self.live.as_mut().ok_or(BusError::Closed)?;
        match live.consumer.next().await {
            Some(Ok(delivery)) => Ok(self.to_delivery(delivery)),
            Some(Err(err)) => {
                self.live = None;
                Err(bus_error(err))
            }
            None => {
                self.live = None;
                Err(BusError::Closed)
            }
        }
    }
}

async fn open(
    uri: AMQPUri,
    queue: String,
    bindings: Vec<ExchangeTopic>,
) -> Result<Live, lapin::Error> {
    let connection = Connection::connect_uri(uri, ConnectionProperties::default()).await?;
    // No basic.qos limit: unacked deliveries must not hold back later ones.
    let channel = connection.create_channel().await?;

    channel
        .queue_declare(
            &queue,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;

    for binding in &bindings {
        channel
            .queue_bind(
                &queue,
                binding.exchange.as_str(),
                binding.routing_key.as_str(),
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        debug!(%queue, %binding, "Bound queue");
    }

    let consumer_tag = format!("pulse-actions-{}", uuid::Uuid::new_v4());
    let consumer = channel
        .basic_consume(
            &queue,
            &consumer_tag,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await?;

    info!(%queue, %consumer_tag, "Subscribed");
    Ok(Live {
        _connection: connection,
        _channel: channel,
        consumer,
    })
}

struct LapinAcker(Acker);

#[async_trait]
impl Acknowledger for LapinAcker {
    async fn ack(&self) -> Result<(), BusError> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(bus_error)
    }
}

/// Decodes a message body as JSON.
///
/// Bodies that are not JSON are passed on as a JSON string so the handler
/// can reject them; they are never acked here.
fn decode_body(data: &[u8]) -> Value {
    serde_json::from_slice(data).unwrap_or_else(|err| {
        warn!(error = %err, "Message body is not JSON");
        Value::String(String::from_utf8_lossy(data).into_owned())
    })
}

fn bus_error(err: lapin::Error) -> BusError {
    classify(err.to_string())
}

/// RabbitMQ rejects bad credentials with reply code 403 `ACCESS_REFUSED`;
/// every other failure is treated as transport-level.
fn classify(message: String) -> BusError {
    if message.contains("ACCESS_REFUSED") || message.contains("ACCESS-REFUSED") {
        BusError::Authentication { message }
    } else {
        BusError::Transport { message }
    }
}
