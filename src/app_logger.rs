//! Centralized application log ring buffer.
//!
//! Every `tracing` event is captured by [`RingBufferLayer`] into a
//! fixed-capacity circular buffer, alongside the stderr formatter. The
//! frontend reads it through `get_logs` and empties it with `clear_logs`.

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A single log entry stored in the ring buffer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: u64,
    pub timestamp_ms: i64,
    pub level: String,
    /// The event's target, usually the module path.
    pub source: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Map<String, Value>>,
}

// ---------------------------------------------------------------------------
// Ring buffer
// ---------------------------------------------------------------------------

pub const LOG_RING_CAPACITY: usize = 1000;

struct Ring {
    entries: VecDeque<LogEntry>,
    /// Monotonic across `clear`.
    next_id: u64,
}

/// Fixed-capacity circular buffer of log entries. Oldest entries drop first.
pub struct LogRingBuffer {
    capacity: usize,
    ring: Mutex<Ring>,
}

impl LogRingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            ring: Mutex::new(Ring {
                entries: VecDeque::with_capacity(capacity),
                next_id: 1,
            }),
        }
    }

    /// Push a new entry. Returns the assigned entry ID.
    pub fn push(
        &self,
        level: impl Into<String>,
        source: impl Into<String>,
        message: impl Into<String>,
        fields: Option<Map<String, Value>>,
    ) -> u64 {
        let mut ring = self.ring.lock();
        let id = ring.next_id;
        ring.next_id += 1;

        if ring.entries.len() == self.capacity {
            ring.entries.pop_front();
        }
        ring.entries.push_back(LogEntry {
            id,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            level: level.into(),
            source: source.into(),
            message: message.into(),
            fields,
        });
        id
    }

    /// Entries oldest first. With a limit, only the most recent `limit`.
    pub fn get_entries(&self, limit: Option<usize>) -> Vec<LogEntry> {
        let ring = self.ring.lock();
        let limit = limit.filter(|&n| n > 0).unwrap_or(ring.entries.len());
        let skip = ring.entries.len().saturating_sub(limit);
        ring.entries.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&self) {
        self.ring.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.ring.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LogRingBuffer {
    fn default() -> Self {
        Self::new(LOG_RING_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tracing layer
// ---------------------------------------------------------------------------

#[derive(Default)]
struct EventVisitor {
    message: String,
    fields: Map<String, Value>,
}

impl Visit for EventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.insert(field.name().to_string(), Value::from(value));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields
                .insert(field.name().to_string(), Value::from(format!("{value:?}")));
        }
    }
}

/// Copies every event it sees into a [`LogRingBuffer`].
pub struct RingBufferLayer {
    buffer: Arc<LogRingBuffer>,
}

impl RingBufferLayer {
    pub fn new(buffer: Arc<LogRingBuffer>) -> Self {
        Self { buffer }
    }
}

impl<S: Subscriber> Layer<S> for RingBufferLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);

        let meta = event.metadata();
        let fields = (!visitor.fields.is_empty()).then_some(visitor.fields);
        self.buffer.push(
            meta.level().as_str().to_ascii_lowercase(),
            meta.target(),
            visitor.message,
            fields,
        );
    }
}

/// Install the global subscriber: `RUST_LOG` if set, else `level`; stderr
/// output plus the ring buffer.
pub fn init_logging(level: &str, buffer: Arc<LogRingBuffer>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(RingBufferLayer::new(buffer))
        .try_init()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tauri commands
// ---------------------------------------------------------------------------

/// Up to `limit` most recent entries (0 or absent = all).
#[cfg(feature = "desktop")]
#[tauri::command]
pub(crate) fn get_logs(
    state: tauri::State<'_, Arc<crate::state::AppState>>,
    limit: Option<usize>,
) -> Vec<LogEntry> {
    state.log_buffer.get_entries(limit)
}

#[cfg(feature = "desktop")]
#[tauri::command]
pub(crate) fn clear_logs(state: tauri::State<'_, Arc<crate::state::AppState>>) {
    state.log_buffer.clear();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
