use std::time::Instant;

use tracing::info;
use uuid::Uuid;

/// Per-request log context.
///
/// Entries are buffered in memory and written as a single `info!` line
/// when [`RequestLog::flush`] is called at the end of the request.
#[derive(Debug)]
pub struct RequestLog {
    request_id: Uuid,
    started: Instant,
    entries: Vec<(u128, String)>,
}

impl Default for RequestLog {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestLog {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    pub fn with_id(request_id: Uuid) -> Self {
        Self {
            request_id,
            started: Instant::now(),
            entries: Vec::new(),
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Append an entry stamped with the elapsed milliseconds.
    pub fn record(&mut self, message: impl Into<String>) {
        let elapsed = self.started.elapsed().as_millis();
        self.entries.push((elapsed, message.into()));
    }

    /// Render the buffered entries as `+<ms>ms <message>` joined by `; `.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(ms, msg)| format!("+{ms}ms {msg}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Emit the buffered entries and consume the log.
    pub fn flush(self) {
        info!(
            request_id = %self.request_id,
            events = self.entries.len(),
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "{}",
            self.render()
        );
    }
}
