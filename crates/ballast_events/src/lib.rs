//! Repository event notifications.
//!
//! Repository operations in [`ballast_registry`] report to a [`Bridge`],
//! which builds [`Event`]s and fans them out to configured [`Sink`]s. The
//! provided sink chain (queue, ignore filter, retrying HTTP delivery) keeps
//! event delivery off the request path: writers only ever block on the queue
//! itself, never on a webhook endpoint.
pub mod errors;
pub use errors::{Error, Result};

mod event;
pub use event::{
    Action, Actor, Envelope, Event, RequestRecord, Source, Target, EVENTS_MEDIA_TYPE,
};

mod sinks;
pub use sinks::{
    BroadcastSink, DiscardSink, EventQueue, HttpSink, IgnoredSink, RetryingSink, Sink,
};

mod bridge;
pub use bridge::{Bridge, Listener};

pub mod config;
pub use config::Config;
