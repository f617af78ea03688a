use actions::{ConfigurationError, ExchangeTopic, TopicBase};
use serde::{Deserialize, Serialize};

/// Where the Pulse broker lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulseConfig {
    /// Broker host name.
    #[serde(default = "default_host")]
    pub host: String,
    /// Broker port; 5671 is AMQPS.
    #[serde(default = "default_port")]
    pub port: u16,
    /// AMQP virtual host.
    #[serde(default = "default_vhost")]
    pub vhost: String,
    /// Connect over TLS (`amqps`).
    #[serde(default = "default_tls")]
    pub tls: bool,
}

fn default_host() -> String {
    "pulse.mozilla.org".to_string()
}

fn default_port() -> u16 {
    5671
}

fn default_vhost() -> String {
    "/".to_string()
}

fn default_tls() -> bool {
    true
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            vhost: default_vhost(),
            tls: default_tls(),
        }
    }
}

/// Pulse account used to authenticate.
#[derive(Clone, PartialEq, Eq)]
pub struct PulseCredentials {
    /// Account name; also the owner segment of queue names.
    pub user: String,
    /// Never logged.
    pub password: String,
}

impl std::fmt::Debug for PulseCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PulseCredentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The topic-bases and bindings of one durable queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    topic_bases: Vec<TopicBase>,
    bindings: Vec<ExchangeTopic>,
}

impl Subscription {
    /// Creates a subscription binding each of `bindings` to one queue.
    pub fn new(
        topic_bases: Vec<TopicBase>,
        bindings: Vec<ExchangeTopic>,
    ) -> Result<Self, ConfigurationError> {
        if topic_bases.is_empty() || bindings.is_empty() {
            return Err(ConfigurationError::NoSubscriptions);
        }
        Ok(Self {
            topic_bases,
            bindings,
        })
    }

    /// Application label: the topic-base, or the list of topic-bases of a
    /// combined subscription.
    pub fn label(&self) -> String {
        match self.topic_bases.as_slice() {
            [single] => single.to_string(),
            many => {
                let names: Vec<&str> = many.iter().map(TopicBase::as_str).collect();
                format!("[{}]", names.join(","))
            }
        }
    }

    /// Durable queue name for `user`.
    pub fn queue_name(&self, user: &str) -> String {
        format!("queue/{}/{}", user, self.label())
    }

    /// `(exchange, topic)` pairs bound to the queue, in configuration order.
    pub fn bindings(&self) -> &[ExchangeTopic] {
        &self.bindings
    }
}
