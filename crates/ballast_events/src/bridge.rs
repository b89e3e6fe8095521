use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use ballast_core::{Descriptor, OciDigest, TagName};

use super::event::{Action, Actor, Event, RequestRecord, Source, Target};
use super::sinks::{DiscardSink, Sink};

/// Builds events out of repository operations and hands them to the
/// configured sink. One bridge serves a whole registry instance; request
/// handling obtains a per-request [`Listener`] from it.
pub struct Bridge {
    sink: Arc<dyn Sink>,
    source: Source,
}

impl Bridge {
    pub fn new(source: Source, sink: Arc<dyn Sink>) -> Self {
        Self { sink, source }
    }

    /// A bridge that drops every event, for registries without notification
    /// endpoints.
    pub fn discard() -> Self {
        Self {
            sink: Arc::new(DiscardSink),
            source: Source::default(),
        }
    }

    /// Scope the bridge to one repository and one request.
    pub fn listener(
        &self,
        repository: impl Into<String>,
        actor: Actor,
        request: RequestRecord,
    ) -> Listener {
        Listener {
            sink: self.sink.clone(),
            source: self.source.clone(),
            repository: repository.into(),
            actor,
            request,
        }
    }

    /// Flush and shut down the sink chain.
    pub async fn close(&self) {
        if let Err(e) = self.sink.close().await {
            tracing::warn!("failed to close event sink: {e}");
        }
    }
}

/// Emits the nine repository events. Delivery failures are logged and never
/// propagate to the operation that triggered them.
#[derive(Clone)]
pub struct Listener {
    sink: Arc<dyn Sink>,
    source: Source,
    repository: String,
    actor: Actor,
    request: RequestRecord,
}

impl Listener {
    fn event(&self, action: Action, target: Target) -> Event {
        Event {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            action,
            target,
            source: self.source.clone(),
            actor: self.actor.clone(),
            request: self.request.clone(),
        }
    }

    fn descriptor_target(&self, desc: &Descriptor) -> Target {
        Target {
            media_type: desc.media_type.clone(),
            repository: self.repository.clone(),
            size: Some(desc.size),
            length: Some(desc.size),
            digest: Some(String::from(&desc.digest)),
            ..Target::default()
        }
    }

    async fn emit(&self, event: Event) {
        if let Err(e) = self.sink.write(event).await {
            tracing::warn!("failed to enqueue repository event: {e}");
        }
    }

    pub async fn manifest_pushed(
        &self,
        desc: &Descriptor,
        tag: Option<&TagName>,
        references: Vec<Descriptor>,
    ) {
        let mut target = self.descriptor_target(desc);
        target.tag = tag.map(|t| t.as_str().to_string());
        target.references = Some(references);
        self.emit(self.event(Action::Push, target)).await;
    }

    pub async fn manifest_pulled(&self, desc: &Descriptor) {
        let target = self.descriptor_target(desc);
        self.emit(self.event(Action::Pull, target)).await;
    }

    pub async fn manifest_deleted(&self, digest: &OciDigest) {
        let target = Target {
            repository: self.repository.clone(),
            digest: Some(String::from(digest)),
            ..Target::default()
        };
        self.emit(self.event(Action::Delete, target)).await;
    }

    pub async fn blob_pushed(&self, desc: &Descriptor) {
        let target = self.descriptor_target(desc);
        self.emit(self.event(Action::Push, target)).await;
    }

    pub async fn blob_pulled(&self, desc: &Descriptor) {
        let target = self.descriptor_target(desc);
        self.emit(self.event(Action::Pull, target)).await;
    }

    pub async fn blob_mounted(&self, desc: &Descriptor, from: &str) {
        let mut target = self.descriptor_target(desc);
        target.from_repository = Some(from.to_string());
        self.emit(self.event(Action::Mount, target)).await;
    }

    pub async fn blob_deleted(&self, digest: &OciDigest) {
        let target = Target {
            repository: self.repository.clone(),
            digest: Some(String::from(digest)),
            ..Target::default()
        };
        self.emit(self.event(Action::Delete, target)).await;
    }

    pub async fn tag_deleted(&self, tag: &TagName, digest: Option<&OciDigest>) {
        let target = Target {
            repository: self.repository.clone(),
            tag: Some(tag.as_str().to_string()),
            digest: digest.map(String::from),
            ..Target::default()
        };
        self.emit(self.event(Action::Delete, target)).await;
    }

    pub async fn repository_deleted(&self) {
        let target = Target {
            repository: self.repository.clone(),
            ..Target::default()
        };
        self.emit(self.event(Action::Delete, target)).await;
    }
}

#[cfg(test)]
mod test {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::errors::Result;

    struct RecordingSink {
        events: Mutex<Vec<Event>>,
    }

    #[async_trait]
    impl Sink for RecordingSink {
        async fn write(&self, event: Event) -> Result<()> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn tag_delete_event_shape() {
        let sink = Arc::new(RecordingSink {
            events: Mutex::new(Vec::new()),
        });
        let bridge = Bridge::new(
            Source {
                addr: "registry:5000".to_string(),
                instance_id: "i-1".to_string(),
            },
            sink.clone(),
        );
        let listener = bridge.listener(
            "library/ubuntu",
            Actor {
                name: "alice".to_string(),
            },
            RequestRecord::default(),
        );

        let tag: TagName = "latest".parse().unwrap();
        listener.tag_deleted(&tag, None).await;

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.action, Action::Delete);
        assert_eq!(event.target.repository, "library/ubuntu");
        assert_eq!(event.target.tag.as_deref(), Some("latest"));
        assert_eq!(event.actor.name, "alice");
        assert!(!event.id.is_empty());
    }
}
