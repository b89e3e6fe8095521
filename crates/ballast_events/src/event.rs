use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ballast_core::Descriptor;

/// Content type of webhook bodies carrying an [`Envelope`].
pub const EVENTS_MEDIA_TYPE: &str = "application/vnd.ballast.events.v1+json";

/// What happened to the target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Push,
    Pull,
    Mount,
    Delete,
}

/// A single repository event as delivered to sinks and webhook endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub action: Action,
    pub target: Target,
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub actor: Actor,
    #[serde(default)]
    pub request: RequestRecord,
}

/// The object an event describes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Target {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub repository: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<Vec<Descriptor>>,
    #[serde(
        rename = "fromRepository",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub from_repository: Option<String>,
}

/// The registry instance that produced an event.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Source {
    pub addr: String,
    #[serde(rename = "instanceID")]
    pub instance_id: String,
}

/// The authenticated user behind the request, if any.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Actor {
    pub name: String,
}

/// The client request that triggered an event.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: String,
    pub addr: String,
    pub host: String,
    pub method: String,
    pub useragent: String,
}

/// Webhook payload: `{"events": [...]}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub events: Vec<Event>,
}
