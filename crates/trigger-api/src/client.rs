use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use actions::{BuilderName, Revision, TriggerError, TriggerRequest, TriggerService};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::errors::{request_error, status_error, TriggerApiError};

/// Connection settings for the trigger service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerApiConfig {
    /// Base URL of the trigger service API.
    pub base_url: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Serialize)]
struct JobsRequest<'a> {
    revision: &'a str,
    times: u32,
    trigger_build_if_missing: bool,
}

/// [`TriggerService`] over HTTP.
pub struct HttpTriggerClient {
    http: Client,
    base_url: Url,
    builders: RwLock<Option<Arc<HashSet<String>>>>,
    revisions: Mutex<HashSet<(String, String)>>,
}

impl HttpTriggerClient {
    /// Creates a client from `config`.
    pub fn new(config: &TriggerApiConfig) -> Result<Self, TriggerApiError> {
        let base_url =
            Url::parse(&config.base_url).map_err(|err| TriggerApiError::InvalidBaseUrl {
                url: config.base_url.clone(),
                message: err.to_string(),
            })?;
        if base_url.cannot_be_a_base() {
            return Err(TriggerApiError::InvalidBaseUrl {
                url: config.base_url.clone(),
                message: "not a hierarchical URL".to_string(),
            });
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("pulse-actions/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url,
            builders: RwLock::new(None),
            revisions: Mutex::new(HashSet::new()),
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // Checked in new(): the base URL is hierarchical.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn builders(&self) -> Result<Arc<HashSet<String>>, TriggerError> {
        if let Some(builders) = self.builders.read().await.as_ref() {
            return Ok(Arc::clone(builders));
        }

        let mut cached = self.builders.write().await;
        if let Some(builders) = cached.as_ref() {
            return Ok(Arc::clone(builders));
        }

        let response = self
            .http
            .get(self.url(&["builders"]))
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, None, &body));
        }
        let names: Vec<String> = response.json().await.map_err(request_error)?;
        debug!(count = names.len(), "Fetched builder list");

        let builders = Arc::new(names.into_iter().collect::<HashSet<_>>());
        *cached = Some(Arc::clone(&builders));
        Ok(builders)
    }

    async fn resolve_revision(
        &self,
        builder: &BuilderName,
        revision: &Revision,
    ) -> Result<(), TriggerError> {
        let key = (builder.to_string(), revision.to_string());
        if self.revision_cache().contains(&key) {
            return Ok(());
        }

        let response = self
            .http
            .get(self.url(&["builders", builder.as_str(), "revisions", revision.as_str()]))
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, Some(revision), &body));
        }

        self.revision_cache().insert(key);
        Ok(())
    }

    fn revision_cache(&self) -> std::sync::MutexGuard<'_, HashSet<(String, String)>> {
        self.revisions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TriggerService for HttpTriggerClient {
    async fn validate_builder(
        &self,
        builder: &BuilderName,
    ) -> Result<Option<BuilderName>, TriggerError> {
        let builders = self.builders().await?;
        let normalized = builder.as_str().trim();
        if builders.contains(normalized) {
            Ok(BuilderName::new(normalized))
        } else {
            debug!(buildername = %builder, "Builder not in the builder list");
            Ok(None)
        }
    }

    async fn trigger_job(&self, request: &TriggerRequest) -> Result<(), TriggerError> {
        self.resolve_revision(&request.builder, &request.revision)
            .await?;

        if request.dry_run.is_enabled() {
            info!(
                buildername = %request.builder,
                revision = %request.revision,
                times = request.times,
                "Dry run: would trigger {} {} time(s) on {}",
                request.builder,
                request.times,
                request.revision
            );
            return Ok(());
        }

        let body = JobsRequest {
            revision: request.revision.as_str(),
            times: request.times,
            trigger_build_if_missing: request.trigger_missing_parent,
        };
        let response = self
            .http
            .post(self.url(&["builders", request.builder.as_str(), "jobs"]))
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, None, &body));
        }

        info!(
            buildername = %request.builder,
            revision = %request.revision,
            times = request.times,
            "Scheduled jobs"
        );
        Ok(())
    }

    fn reset_caches(&self) {
        self.revision_cache().clear();
    }
}
