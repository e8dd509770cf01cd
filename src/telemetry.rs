use std::path::PathBuf;
use std::sync::Arc;

/// Structured, in-process event hook for observability.
///
/// This crate is a library; emitting logs directly (e.g. `println!`) is not acceptable.
/// Callers that want diagnostics provide an implementation that forwards these events to
/// `tracing`, `log`, or a custom sink. The `ratingpack` binary ships a `tracing` forwarder.
pub trait PackEventListener: std::fmt::Debug + Send + Sync + 'static {
    fn on_event(&self, event: PackEvent);
}

/// Structured events emitted by the store, the pack codec and the validator.
#[derive(Debug, Clone, PartialEq)]
pub enum PackEvent {
    StoreBuilt {
        ratings: usize,
        users: usize,
        items: usize,
    },

    PackCreated {
        path: PathBuf,
        ratings: u64,
        users: usize,
        items: usize,
        compression: String,
    },
    PackOpened {
        path: PathBuf,
        ratings: u64,
        compressed: bool,
    },
    /// The writer saw out-of-order timestamps and re-sorted the ratings before finishing.
    RatingsResorted { path: PathBuf, ratings: u64 },
    /// A writer was dropped before `finish`; its partial output was removed.
    WriterAbandoned { path: PathBuf, ratings: u64 },

    SnapshotWritten { path: PathBuf, bytes: u64 },

    ValidationFinished { path: PathBuf, violations: usize },
}

#[derive(Debug)]
pub struct NoopEventListener;

impl PackEventListener for NoopEventListener {
    #[inline]
    fn on_event(&self, _event: PackEvent) {}
}

pub fn noop_event_listener() -> Arc<dyn PackEventListener> {
    Arc::new(NoopEventListener)
}

/// Collects events in memory; handy for assertions.
#[derive(Debug, Default)]
pub struct RecordingEventListener {
    events: std::sync::Mutex<Vec<PackEvent>>,
}

impl RecordingEventListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Drains and returns the recorded events.
    pub fn take(&self) -> Vec<PackEvent> {
        match self.events.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl PackEventListener for RecordingEventListener {
    fn on_event(&self, event: PackEvent) {
        match self.events.lock() {
            Ok(mut guard) => guard.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
