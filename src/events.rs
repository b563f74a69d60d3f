//! Messages sent from an embedded browser context to its host screen

use crate::{FlightRecord, Platform};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// Description of one input element, reported when no field could be filled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDescriptor {
    #[serde(rename = "type", default)]
    pub input_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub placeholder: String,
    #[serde(default)]
    pub visible: bool,
}

/// Tagged browser-to-host message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusEvent {
    /// Replaces the single status line
    Status { message: String },
    /// Appended to the host's log, timestamped on arrival
    Log { message: String },
    Debug { message: String },
    DomInfo {
        inputs: Vec<InputDescriptor>,
        url: String,
        html: String,
    },
    Progress {
        platform: Platform,
        attempt: u32,
        max: u32,
    },
    Flights {
        platform: Platform,
        data: Vec<FlightRecord>,
    },
    #[serde(rename = "notfound")]
    NotFound { platform: Platform },
    Error {
        #[serde(default)]
        platform: Option<Platform>,
        message: String,
    },
}

impl StatusEvent {
    pub fn status(message: impl Into<String>) -> Self {
        StatusEvent::Status { message: message.into() }
    }

    pub fn log(message: impl Into<String>) -> Self {
        StatusEvent::Log { message: message.into() }
    }

    pub fn debug(message: impl Into<String>) -> Self {
        StatusEvent::Debug { message: message.into() }
    }

    /// Platform namespace of the message, when it carries one
    pub fn platform(&self) -> Option<Platform> {
        match self {
            StatusEvent::Progress { platform, .. }
            | StatusEvent::Flights { platform, .. }
            | StatusEvent::NotFound { platform } => Some(*platform),
            StatusEvent::Error { platform, .. } => *platform,
            _ => None,
        }
    }

    pub fn to_json(&self) -> String {
        // Every variant is plain data; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Parse one raw channel message. Malformed payloads are dropped.
pub fn decode_message(raw: &str) -> Option<StatusEvent> {
    match serde_json::from_str::<StatusEvent>(raw) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!(error = %e, raw_length = raw.len(), "Discarding malformed browser message");
            None
        }
    }
}

/// Sending half of the browser-to-host channel
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<UnboundedSender<StatusEvent>>,
}

impl EventSink {
    pub fn new(tx: UnboundedSender<StatusEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that drops everything
    pub fn disconnected() -> Self {
        Self { tx: None }
    }

    /// Emit an event. A host that already went away is not an error.
    pub fn emit(&self, event: StatusEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                debug!("Host receiver dropped, event discarded");
            }
        }
    }
}

/// Create a connected sink and its receiver
pub fn channel() -> (EventSink, tokio::sync::mpsc::UnboundedReceiver<StatusEvent>) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    (EventSink::new(tx), rx)
}
