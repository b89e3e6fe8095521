use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::errors::{Error, Result};
use super::event::{Action, Envelope, Event, EVENTS_MEDIA_TYPE};

/// Downstream consumer of repository events.
#[async_trait]
pub trait Sink: Send + Sync + 'static {
    async fn write(&self, event: Event) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Swallows every event. Used when no endpoints are configured.
pub struct DiscardSink;

#[async_trait]
impl Sink for DiscardSink {
    async fn write(&self, _event: Event) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Fans an event out to several independent sinks.
pub struct BroadcastSink {
    sinks: Vec<Arc<dyn Sink>>,
}

impl BroadcastSink {
    pub fn new(sinks: Vec<Arc<dyn Sink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl Sink for BroadcastSink {
    async fn write(&self, event: Event) -> Result<()> {
        for sink in &self.sinks {
            if let Err(e) = sink.write(event.clone()).await {
                tracing::warn!("failed to hand event to sink: {e}");
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        for sink in &self.sinks {
            sink.close().await?;
        }
        Ok(())
    }
}

/// Unbounded in-memory queue in front of a slower downstream sink.
///
/// `write` returns as soon as the event is enqueued; a single background
/// worker drains the queue into the downstream sink, so the request path
/// never blocks on endpoint availability. `close` waits until the queue is
/// empty, then closes the downstream. The queue is volatile: unwritten
/// events are lost on crash.
pub struct EventQueue {
    tx: Mutex<Option<mpsc::UnboundedSender<Event>>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl EventQueue {
    /// Must be called from within a tokio runtime; the drain worker is
    /// spawned immediately.
    pub fn new(downstream: Arc<dyn Sink>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = downstream.write(event).await {
                    tracing::warn!("event sink write failed: {e}");
                }
            }
            if let Err(e) = downstream.close().await {
                tracing::warn!("event sink close failed: {e}");
            }
        });
        Self {
            tx: Mutex::new(Some(tx)),
            worker: tokio::sync::Mutex::new(Some(worker)),
        }
    }
}

#[async_trait]
impl Sink for EventQueue {
    async fn write(&self, event: Event) -> Result<()> {
        let guard = self.tx.lock().expect("event queue sender lock poisoned");
        match guard.as_ref() {
            Some(tx) => tx.send(event).map_err(|_| Error::SinkClosed),
            None => Err(Error::SinkClosed),
        }
    }

    async fn close(&self) -> Result<()> {
        // dropping the sender lets the worker drain the queue and stop
        let tx = self
            .tx
            .lock()
            .expect("event queue sender lock poisoned")
            .take();
        if tx.is_none() {
            return Err(Error::SinkClosed);
        }
        drop(tx);

        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::warn!("event queue worker ended abnormally: {e}");
            }
        }
        Ok(())
    }
}

/// Drops events whose target media type or action matches a filter, passing
/// the rest through. This is the operator's rate-control knob in front of an
/// unbounded queue.
pub struct IgnoredSink {
    downstream: Arc<dyn Sink>,
    ignore_media_types: HashSet<String>,
    ignore_actions: HashSet<Action>,
}

impl IgnoredSink {
    pub fn new(
        downstream: Arc<dyn Sink>,
        ignore_media_types: impl IntoIterator<Item = String>,
        ignore_actions: impl IntoIterator<Item = Action>,
    ) -> Self {
        Self {
            downstream,
            ignore_media_types: ignore_media_types.into_iter().collect(),
            ignore_actions: ignore_actions.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Sink for IgnoredSink {
    async fn write(&self, event: Event) -> Result<()> {
        if self.ignore_media_types.contains(&event.target.media_type)
            || self.ignore_actions.contains(&event.action)
        {
            tracing::debug!(
                action = ?event.action,
                media_type = %event.target.media_type,
                "ignoring filtered event",
            );
            return Ok(());
        }
        self.downstream.write(event).await
    }

    async fn close(&self) -> Result<()> {
        self.downstream.close().await
    }
}

const DEFAULT_GIVE_UP_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Retries failed downstream writes with exponential backoff and jitter.
///
/// Once the give-up window elapses the event is dropped and counted under
/// [`RetryingSink::failures`].
pub struct RetryingSink {
    downstream: Arc<dyn Sink>,
    initial_backoff: Duration,
    max_backoff: Duration,
    give_up_after: Duration,
    failures: AtomicU64,
}

impl RetryingSink {
    pub fn new(downstream: Arc<dyn Sink>, initial_backoff: Duration) -> Self {
        Self {
            downstream,
            initial_backoff,
            max_backoff: Duration::from_secs(60 * 5),
            give_up_after: DEFAULT_GIVE_UP_AFTER,
            failures: AtomicU64::new(0),
        }
    }

    pub fn with_give_up_after(mut self, give_up_after: Duration) -> Self {
        self.give_up_after = give_up_after;
        self
    }

    /// Events dropped after exhausting the retry window.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Sink for RetryingSink {
    async fn write(&self, event: Event) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.give_up_after;
        let mut backoff = self.initial_backoff;
        loop {
            match self.downstream.write(event.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if tokio::time::Instant::now() >= deadline {
                        self.failures.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!("dropping event {} after retry window: {e}", event.id);
                        return Ok(());
                    }
                    let jitter = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64 / 2);
                    tracing::debug!(
                        "event {} delivery failed, retrying in {:?}: {e}",
                        event.id,
                        backoff,
                    );
                    tokio::time::sleep(backoff + Duration::from_millis(jitter)).await;
                    backoff = std::cmp::min(backoff * 2, self.max_backoff);
                }
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.downstream.close().await
    }
}

/// Serializes events to JSON and POSTs them to a webhook endpoint, one
/// envelope per event.
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
}

impl HttpSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Sink for HttpSink {
    async fn write(&self, event: Event) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .header(http::header::CONTENT_TYPE, EVENTS_MEDIA_TYPE)
            .json(&Envelope {
                events: vec![event],
            })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Error::HttpStatus(response.status()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::sync::Mutex as StdMutex;

    use chrono::Utc;

    use super::*;
    use crate::event::Target;

    struct RecordingSink {
        events: StdMutex<Vec<Event>>,
        fail_first: AtomicU64,
        closed: AtomicU64,
    }

    impl RecordingSink {
        fn new(fail_first: u64) -> Arc<Self> {
            Arc::new(Self {
                events: StdMutex::new(Vec::new()),
                fail_first: AtomicU64::new(fail_first),
                closed: AtomicU64::new(0),
            })
        }

        fn recorded(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Sink for RecordingSink {
        async fn write(&self, event: Event) -> Result<()> {
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                return Err(Error::HttpStatus(http::StatusCode::BAD_GATEWAY));
            }
            self.events.lock().unwrap().push(event);
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn event(id: &str, action: Action, media_type: &str) -> Event {
        Event {
            id: id.to_string(),
            timestamp: Utc::now(),
            action,
            target: Target {
                media_type: media_type.to_string(),
                repository: "repo".to_string(),
                ..Target::default()
            },
            source: Default::default(),
            actor: Default::default(),
            request: Default::default(),
        }
    }

    #[tokio::test]
    async fn queue_drains_in_order_on_close() {
        let recording = RecordingSink::new(0);
        let queue = EventQueue::new(recording.clone());
        for i in 0..10 {
            queue
                .write(event(&format!("e{i}"), Action::Push, "m"))
                .await
                .unwrap();
        }
        queue.close().await.unwrap();

        let ids: Vec<String> = recording.recorded().iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, (0..10).map(|i| format!("e{i}")).collect::<Vec<_>>());
        assert_eq!(recording.closed.load(Ordering::SeqCst), 1);

        // writes after close fail
        assert!(matches!(
            queue.write(event("late", Action::Push, "m")).await,
            Err(Error::SinkClosed)
        ));
    }

    #[tokio::test]
    async fn ignored_sink_filters() {
        let recording = RecordingSink::new(0);
        let sink = IgnoredSink::new(
            recording.clone(),
            vec!["application/octet-stream".to_string()],
            vec![Action::Pull],
        );
        sink.write(event("keep", Action::Push, "m")).await.unwrap();
        sink.write(event("drop-media", Action::Push, "application/octet-stream"))
            .await
            .unwrap();
        sink.write(event("drop-action", Action::Pull, "m")).await.unwrap();

        let ids: Vec<String> = recording.recorded().iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec!["keep"]);
    }

    #[tokio::test]
    async fn retrying_sink_retries_until_success() {
        let recording = RecordingSink::new(2);
        let sink = RetryingSink::new(recording.clone(), Duration::from_millis(1));
        sink.write(event("e", Action::Push, "m")).await.unwrap();
        assert_eq!(recording.recorded().len(), 1);
        assert_eq!(sink.failures(), 0);
    }

    #[tokio::test]
    async fn retrying_sink_drops_after_window() {
        let recording = RecordingSink::new(u64::MAX);
        let sink = RetryingSink::new(recording.clone(), Duration::from_millis(1))
            .with_give_up_after(Duration::from_millis(5));
        sink.write(event("e", Action::Push, "m")).await.unwrap();
        assert_eq!(recording.recorded().len(), 0);
        assert_eq!(sink.failures(), 1);
    }
}
