//! Server-sent event values and their wire framing.

use std::time::Duration;

use axum::response::sse::Event;
use serde::Serialize;
use serde_json::Value;

/// Kind tag written on the `event:` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Start,
    Data,
    Done,
    Error,
    Ping,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Data => "data",
            EventKind::Done => "done",
            EventKind::Error => "error",
            EventKind::Ping => "ping",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event payload. Strings are written verbatim, structured values as JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum EventData {
    Text(String),
    Json(Value),
}

impl From<String> for EventData {
    fn from(text: String) -> Self {
        EventData::Text(text)
    }
}

impl From<&str> for EventData {
    fn from(text: &str) -> Self {
        EventData::Text(text.to_string())
    }
}

impl From<Value> for EventData {
    fn from(value: Value) -> Self {
        EventData::Json(value)
    }
}

/// A single event destined for the client.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub kind: EventKind,
    pub data: Option<EventData>,
    pub id: Option<String>,
    pub retry_ms: Option<u64>,
}

impl StreamEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            data: None,
            id: None,
            retry_ms: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<EventData>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Serialize `value` as the payload.
    pub fn with_json<T: Serialize>(mut self, value: &T) -> Result<Self, serde_json::Error> {
        self.data = Some(EventData::Json(serde_json::to_value(value)?));
        Ok(self)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_retry(mut self, retry_ms: u64) -> Self {
        self.retry_ms = Some(retry_ms);
        self
    }

    /// Build the axum event, writing `id`, `event`, `data` and `retry` in
    /// that order. Multi-line text becomes one `data:` line per line.
    pub fn to_event(&self) -> Result<Event, serde_json::Error> {
        let mut event = Event::default();
        if let Some(id) = &self.id {
            event = event.id(id.replace(['\n', '\r', '\0'], ""));
        }
        event = event.event(self.kind.as_str());

        if let Some(data) = &self.data {
            let payload = match data {
                EventData::Text(text) => text.replace("\r\n", "\n").replace('\r', "\n"),
                EventData::Json(value) => serde_json::to_string(value)?,
            };
            event = event.data(payload);
        }

        if let Some(retry) = self.retry_ms {
            event = event.retry(Duration::from_millis(retry));
        }
        Ok(event)
    }
}
