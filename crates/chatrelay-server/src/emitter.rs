//! Single-client event stream with guarded lifecycle.
//!
//! [`EventEmitter::channel`] returns the emitter, driven by the request
//! task, and an [`EventBody`], handed to the HTTP transport as the
//! response body. The emitter is `Idle` until the transport first polls
//! the body, `Open` while frames can be written, and `Closed` forever
//! after. Dropping the body (client disconnect) cancels the emitter.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use axum::http::{HeaderValue, header};
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response, Sse};
use chrono::Utc;
use futures::Stream;
use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use chatrelay_core::config::RelayConfig;

use crate::sse::{EventKind, StreamEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitterState {
    Idle,
    Open,
    Closed,
}

#[derive(Debug, Clone)]
pub struct EmitterOptions {
    /// Delay between writing `done` and closing the stream.
    pub close_delay: Duration,
    /// Reconnection hint attached to the `start` frame.
    pub retry_ms: Option<u64>,
}

impl Default for EmitterOptions {
    fn default() -> Self {
        Self {
            close_delay: Duration::from_millis(100),
            retry_ms: None,
        }
    }
}

impl From<&RelayConfig> for EmitterOptions {
    fn from(config: &RelayConfig) -> Self {
        Self {
            close_delay: config.close_delay,
            retry_ms: config.retry_hint_ms,
        }
    }
}

pub struct EventEmitter {
    state: EmitterState,
    sink: Option<mpsc::UnboundedSender<Event>>,
    pending: Option<(mpsc::UnboundedSender<Event>, oneshot::Receiver<()>)>,
    cancelled: Arc<AtomicBool>,
    options: EmitterOptions,
}

/// Transport side of an emitter: the stream served as the SSE response.
pub struct EventBody {
    frames: mpsc::UnboundedReceiver<Event>,
    activate: Option<oneshot::Sender<()>>,
    cancelled: Arc<AtomicBool>,
}

impl EventEmitter {
    pub fn channel(options: EmitterOptions) -> (Self, EventBody) {
        let (sink, frames) = mpsc::unbounded_channel();
        let (activate, activated) = oneshot::channel();
        let cancelled = Arc::new(AtomicBool::new(false));

        let emitter = Self {
            state: EmitterState::Idle,
            sink: None,
            pending: Some((sink, activated)),
            cancelled: cancelled.clone(),
            options,
        };
        let body = EventBody {
            frames,
            activate: Some(activate),
            cancelled,
        };
        (emitter, body)
    }

    pub fn state(&self) -> EmitterState {
        self.state
    }

    /// Whether frames can currently be written.
    pub fn is_open(&self) -> bool {
        self.state == EmitterState::Open && !self.cancelled.load(Ordering::Acquire)
    }

    /// Wait until the client starts reading, then attach the sink.
    ///
    /// Returns `false` if the body was dropped without ever being read or
    /// the emitter is already closed.
    pub async fn open(&mut self) -> bool {
        match self.state {
            EmitterState::Open => return true,
            EmitterState::Closed => return false,
            EmitterState::Idle => {}
        }
        let Some((sink, activated)) = self.pending.take() else {
            self.state = EmitterState::Closed;
            return false;
        };
        match activated.await {
            Ok(()) => {
                self.sink = Some(sink);
                self.state = EmitterState::Open;
                true
            }
            Err(_) => {
                debug!("client went away before reading the stream");
                self.state = EmitterState::Closed;
                false
            }
        }
    }

    /// Write one event. Never fails: any problem closes the emitter.
    ///
    /// Returns whether the frame was handed to the transport.
    pub fn send(&mut self, event: StreamEvent) -> bool {
        match self.state {
            EmitterState::Idle => {
                debug!(kind = %event.kind, "send before the stream opened ignored");
                return false;
            }
            EmitterState::Closed => {
                debug!(kind = %event.kind, "send after close ignored");
                return false;
            }
            EmitterState::Open => {}
        }

        if self.cancelled.load(Ordering::Acquire) {
            debug!(kind = %event.kind, "client disconnected; closing stream");
            self.close();
            return false;
        }

        let frame = match event.to_event() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(kind = %event.kind, error = %e, "failed to encode event; closing stream");
                self.close();
                return false;
            }
        };

        let written = self
            .sink
            .as_ref()
            .is_some_and(|sink| sink.send(frame).is_ok());
        if !written {
            warn!(kind = %event.kind, "stream write failed; closing stream");
            self.close();
        }
        written
    }

    pub fn send_start<T: Serialize>(&mut self, payload: &T) -> bool {
        let Some(mut event) = self.payload_event(EventKind::Start, payload) else {
            return false;
        };
        if let Some(retry) = self.options.retry_ms {
            event = event.with_retry(retry);
        }
        self.send(event)
    }

    /// Send a `data` event carrying `text` and the time it was captured.
    pub fn send_fragment(&mut self, text: &str, id: Option<String>) -> bool {
        let payload = json!({
            "text": text,
            "timestamp": Utc::now().to_rfc3339(),
        });
        let mut event = StreamEvent::new(EventKind::Data).with_data(payload);
        if let Some(id) = id {
            event = event.with_id(id);
        }
        self.send(event)
    }

    /// Send an `error` event. The stream stays open.
    pub fn send_error(&mut self, message: &str) -> bool {
        self.send(StreamEvent::new(EventKind::Error).with_data(json!({ "message": message })))
    }

    pub fn send_ping(&mut self) -> bool {
        self.send(StreamEvent::new(EventKind::Ping).with_data(Utc::now().to_rfc3339()))
    }

    /// Send the terminal `done` event, then close after `close_delay`.
    ///
    /// The emitter is held for the whole delay, so nothing can follow the
    /// `done` frame.
    pub async fn send_done<T: Serialize>(&mut self, payload: Option<&T>) -> bool {
        let event = match payload {
            Some(payload) => self.payload_event(EventKind::Done, payload),
            None => Some(StreamEvent::new(EventKind::Done)),
        };
        let sent = event.is_some_and(|event| self.send(event));
        if sent && !self.options.close_delay.is_zero() {
            tokio::time::sleep(self.options.close_delay).await;
        }
        self.close();
        sent
    }

    /// Event of `kind` carrying `payload` as JSON. An unserializable
    /// payload closes the stream.
    fn payload_event<T: Serialize>(&mut self, kind: EventKind, payload: &T) -> Option<StreamEvent> {
        match StreamEvent::new(kind).with_json(payload) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(%kind, error = %e, "failed to serialize payload; closing stream");
                self.close();
                None
            }
        }
    }

    /// Close the stream. Idempotent.
    pub fn close(&mut self) {
        if self.state == EmitterState::Closed {
            return;
        }
        self.state = EmitterState::Closed;
        self.sink = None;
        self.pending = None;
        debug!("event stream closed");
    }
}

impl Stream for EventBody {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(activate) = self.activate.take() {
            let _ = activate.send(());
        }
        self.frames.poll_recv(cx).map(|frame| frame.map(Ok))
    }
}

impl Drop for EventBody {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

impl IntoResponse for EventBody {
    fn into_response(self) -> Response {
        let mut response = Sse::new(self).into_response();
        let headers = response.headers_mut();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tokio::time::Instant;

    fn options(close_delay_ms: u64) -> EmitterOptions {
        EmitterOptions {
            close_delay: Duration::from_millis(close_delay_ms),
            retry_ms: None,
        }
    }

    /// Read the whole response body into a string on a separate task.
    fn spawn_reader(body: EventBody) -> tokio::task::JoinHandle<String> {
        tokio::spawn(async move {
            let bytes = body
                .into_response()
                .into_body()
                .collect()
                .await
                .unwrap()
                .to_bytes();
            String::from_utf8(bytes.to_vec()).unwrap()
        })
    }

    #[tokio::test]
    async fn idle_until_body_is_polled() {
        let (mut emitter, body) = EventEmitter::channel(options(0));
        assert_eq!(emitter.state(), EmitterState::Idle);
        assert!(!emitter.send_error("too early"));
        assert_eq!(emitter.state(), EmitterState::Idle);

        let reader = spawn_reader(body);
        assert!(emitter.open().await);
        assert_eq!(emitter.state(), EmitterState::Open);
        assert!(emitter.send_ping());
        emitter.close();

        let text = reader.await.unwrap();
        assert!(text.starts_with("event: ping\ndata: "));
    }

    #[tokio::test]
    async fn body_dropped_before_read_closes() {
        let (mut emitter, body) = EventEmitter::channel(options(0));
        drop(body);
        assert!(!emitter.open().await);
        assert_eq!(emitter.state(), EmitterState::Closed);
        assert!(!emitter.send_fragment("x", None));
    }

    #[tokio::test]
    async fn frames_arrive_in_order() {
        let (mut emitter, body) = EventEmitter::channel(EmitterOptions {
            close_delay: Duration::ZERO,
            retry_ms: Some(2000),
        });
        let reader = spawn_reader(body);
        assert!(emitter.open().await);

        assert!(emitter.send_start(&json!({"conversation_id": "c1"})));
        assert!(emitter.send_fragment("ab", Some("0".into())));
        assert!(emitter.send_fragment("cd", Some("1".into())));
        assert!(emitter.send_done(None::<&Value>).await);

        let text = reader.await.unwrap();
        assert!(text.starts_with(
            "event: start\ndata: {\"conversation_id\":\"c1\"}\nretry: 2000\n\n"
        ));
        let ab = text.find("id: 0\nevent: data\ndata: {\"text\":\"ab\"").unwrap();
        let cd = text.find("id: 1\nevent: data\ndata: {\"text\":\"cd\"").unwrap();
        assert!(ab < cd);
        assert!(text.ends_with("event: done\n\n"));
    }

    #[tokio::test]
    async fn sends_after_close_are_noops() {
        let (mut emitter, body) = EventEmitter::channel(options(0));
        let reader = spawn_reader(body);
        assert!(emitter.open().await);
        emitter.close();

        assert!(!emitter.send(StreamEvent::new(EventKind::Data).with_data("x")));
        assert!(!emitter.send_fragment("x", None));
        assert!(!emitter.send_error("x"));
        assert!(!emitter.send_done(Some(&json!({"length": 0}))).await);
        emitter.close();
        assert_eq!(emitter.state(), EmitterState::Closed);
        assert!(!emitter.open().await);

        assert_eq!(reader.await.unwrap(), "");
    }

    #[tokio::test]
    async fn unserializable_payload_closes_stream() {
        use std::collections::HashMap;

        let (mut emitter, body) = EventEmitter::channel(options(0));
        let reader = spawn_reader(body);
        assert!(emitter.open().await);

        // Non-string map keys cannot be written as JSON.
        let payload: HashMap<(u8, u8), u8> = HashMap::from([((1, 2), 3)]);
        assert!(!emitter.send_start(&payload));
        assert_eq!(emitter.state(), EmitterState::Closed);
        assert_eq!(reader.await.unwrap(), "");
    }

    #[tokio::test]
    async fn send_error_keeps_stream_open() {
        let (mut emitter, body) = EventEmitter::channel(options(0));
        let reader = spawn_reader(body);
        assert!(emitter.open().await);
        assert!(emitter.send_error("upstream failed"));
        assert!(emitter.is_open());
        emitter.close();

        assert_eq!(
            reader.await.unwrap(),
            "event: error\ndata: {\"message\":\"upstream failed\"}\n\n"
        );
    }

    #[tokio::test]
    async fn client_disconnect_cancels() {
        let (mut emitter, mut body) = EventEmitter::channel(options(0));
        let first = tokio::spawn(async move {
            let frame = body.next().await;
            (frame, body)
        });
        assert!(emitter.open().await);
        assert!(emitter.send_ping());

        let (frame, body) = first.await.unwrap();
        assert!(frame.is_some());
        drop(body);

        assert!(!emitter.is_open());
        assert!(!emitter.send_fragment("late", None));
        assert_eq!(emitter.state(), EmitterState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn done_is_flushed_before_close() {
        let (mut emitter, body) = EventEmitter::channel(options(100));
        let reader = tokio::spawn(async move {
            let mut body = body.into_response().into_body();
            let mut done_at = None;
            while let Some(Ok(frame)) = body.frame().await {
                if frame
                    .data_ref()
                    .is_some_and(|data| data.starts_with(b"event: done"))
                {
                    done_at = Some(Instant::now());
                }
            }
            (done_at, Instant::now())
        });
        assert!(emitter.open().await);

        assert!(emitter.send_done(Some(&json!({"finish_reason": "STOP"}))).await);
        assert_eq!(emitter.state(), EmitterState::Closed);

        let (done_at, ended_at) = reader.await.unwrap();
        let done_at = done_at.expect("done frame received");
        assert!(ended_at.duration_since(done_at) >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn into_response_sets_stream_headers() {
        let (_emitter, body) = EventEmitter::channel(options(0));
        let response = body.into_response();
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        assert_eq!(headers["x-accel-buffering"], "no");
    }
}
