//! Startup configuration.
//!
//! Layered with the `config` crate, later sources overriding earlier ones:
//!
//! 1. the built-in `run_time_config.json`;
//! 2. the JSON file named by `PULSE_ACTIONS_CONFIG`, if set;
//! 3. `PULSE_ACTIONS__<SECTION>__<KEY>` environment variables
//!    (e.g. `PULSE_ACTIONS__PULSE__HOST`).
//!
//! Loaded once; read-only afterwards.

use std::collections::BTreeMap;
use std::time::Duration;

use actions::{BusError, ConfigurationError, ExchangeTopic, TopicBase};
use config::{Config, ConfigError, Environment, File, FileFormat};
use listener::{PulseConfig, PulseCredentials};
use serde::Deserialize;
use trigger_api::TriggerApiConfig;

const DEFAULTS: &str = include_str!("../run_time_config.json");

/// Names a JSON file overriding the built-in configuration.
pub const CONFIG_PATH_VAR: &str = "PULSE_ACTIONS_CONFIG";
pub const USERNAME_VAR: &str = "PULSE_USERNAME";
pub const PASSWORD_VAR: &str = "PULSE_PASSWORD";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Topic-base → `{exchange, topic}`.
    pub routes: BTreeMap<String, ExchangeTopic>,
    /// Broker location.
    #[serde(default)]
    pub pulse: PulseConfig,
    /// Trigger service endpoint.
    pub trigger_api: TriggerApiConfig,
    /// Seconds between failed connection attempts.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

impl Settings {
    /// Loads the layered configuration.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder =
            Config::builder().add_source(File::from_str(DEFAULTS, FileFormat::Json));
        if let Ok(path) = std::env::var(CONFIG_PATH_VAR) {
            builder = builder.add_source(File::new(&path, FileFormat::Json));
        }
        builder
            .add_source(
                Environment::with_prefix("PULSE_ACTIONS")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Parses the built-in configuration only.
    pub fn builtin() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(DEFAULTS, FileFormat::Json))
            .build()?
            .try_deserialize()
    }

    /// Resolves every topic-base to its route, in the order given.
    pub fn routes_for(
        &self,
        topic_bases: &[TopicBase],
    ) -> Result<Vec<ExchangeTopic>, ConfigurationError> {
        if topic_bases.is_empty() {
            return Err(ConfigurationError::NoSubscriptions);
        }
        topic_bases
            .iter()
            .map(|topic_base| {
                self.routes.get(topic_base.as_str()).cloned().ok_or_else(|| {
                    ConfigurationError::UnknownTopicBase {
                        topic_base: topic_base.clone(),
                    }
                })
            })
            .collect()
    }

    /// Pause between failed connection attempts.
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

/// Parses `--topic-base` values, dropping surrounding whitespace.
pub fn parse_topic_bases(values: &[String]) -> Result<Vec<TopicBase>, ConfigurationError> {
    let topic_bases: Vec<TopicBase> = values
        .iter()
        .filter_map(|value| TopicBase::new(value.trim()))
        .collect();
    if topic_bases.is_empty() {
        return Err(ConfigurationError::NoSubscriptions);
    }
    Ok(topic_bases)
}

/// Reads the Pulse account from `lookup` (the process environment in production).
pub fn credentials(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<PulseCredentials, BusError> {
    let user = lookup(USERNAME_VAR).filter(|v| !v.is_empty());
    let password = lookup(PASSWORD_VAR).filter(|v| !v.is_empty());
    match (user, password) {
        (Some(user), Some(password)) => Ok(PulseCredentials { user, password }),
        _ => Err(BusError::Authentication {
            message: format!(
                "Pulse credentials not found. Set {USERNAME_VAR} and {PASSWORD_VAR}."
            ),
        }),
    }
}
