use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use super::bridge::Bridge;
use super::errors::Result;
use super::event::{Action, Source};
use super::sinks::{BroadcastSink, DiscardSink, EventQueue, HttpSink, IgnoredSink, RetryingSink, Sink};

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_millis")]
    pub backoff_millis: u64,
    #[serde(default)]
    pub ignore: IgnoreConfig,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct IgnoreConfig {
    #[serde(default, rename = "mediatypes")]
    pub media_types: Vec<String>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_backoff_millis() -> u64 {
    1000
}

impl Config {
    /// Build the sink fan-out: per endpoint, events flow through the ignore
    /// filter, into the endpoint's queue, and from its drain worker through
    /// the retrying HTTP sink.
    pub fn new_bridge(&self, source: Source) -> Result<Bridge> {
        if self.endpoints.is_empty() {
            return Ok(Bridge::new(source, Arc::new(DiscardSink)));
        }

        let mut sinks: Vec<Arc<dyn Sink>> = Vec::with_capacity(self.endpoints.len());
        for endpoint in &self.endpoints {
            tracing::info!("configuring notification endpoint {}", endpoint.name);
            let http = HttpSink::new(
                endpoint.url.clone(),
                Duration::from_secs(endpoint.timeout_secs),
            )?;
            let retrying = RetryingSink::new(
                Arc::new(http),
                Duration::from_millis(endpoint.backoff_millis),
            );
            let queue = EventQueue::new(Arc::new(retrying));
            let ignored = IgnoredSink::new(
                Arc::new(queue),
                endpoint.ignore.media_types.iter().cloned(),
                endpoint.ignore.actions.iter().cloned(),
            );
            sinks.push(Arc::new(ignored));
        }

        Ok(Bridge::new(source, Arc::new(BroadcastSink::new(sinks))))
    }
}
