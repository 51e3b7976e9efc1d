//! Diagnostic line sinks
//!
//! Handshake diagnostics are plain text lines. They go to a [`LogSink`]
//! chosen when the context is configured, and the context keeps a bounded
//! ring of the most recent ones.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::Level;

/// Destination for diagnostic lines
pub trait LogSink: Send + Sync {
    fn log(&self, level: Level, line: &str);
}

/// Forwards lines to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: Level, line: &str) {
        match level {
            Level::ERROR => tracing::error!(target: "tls_session::diag", "{}", line),
            Level::WARN => tracing::warn!(target: "tls_session::diag", "{}", line),
            Level::INFO => tracing::info!(target: "tls_session::diag", "{}", line),
            Level::DEBUG => tracing::debug!(target: "tls_session::diag", "{}", line),
            Level::TRACE => tracing::trace!(target: "tls_session::diag", "{}", line),
        }
    }
}

/// Bounded in-memory queue of lines
///
/// When full, the oldest line is dropped to make room.
#[derive(Debug)]
pub struct MemorySink {
    capacity: usize,
    lines: Mutex<VecDeque<String>>,
}

impl MemorySink {
    pub fn with_capacity(capacity: usize) -> Self {
        MemorySink {
            capacity,
            lines: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy of the queued lines, oldest first
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }

    /// Remove and return every queued line
    pub fn drain(&self) -> Vec<String> {
        self.lines.lock().drain(..).collect()
    }
}

impl LogSink for MemorySink {
    fn log(&self, _level: Level, line: &str) {
        if self.capacity == 0 {
            return;
        }
        let mut lines = self.lines.lock();
        while lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.to_string());
    }
}

/// Level-filtered fan-out to the configured sink and the recent-lines ring
#[derive(Clone)]
pub(crate) struct Diagnostics {
    sink: Arc<dyn LogSink>,
    recent: Arc<MemorySink>,
    level: Level,
}

impl Diagnostics {
    pub(crate) fn new(sink: Arc<dyn LogSink>, level: Level, queue_capacity: usize) -> Self {
        Diagnostics {
            sink,
            recent: Arc::new(MemorySink::with_capacity(queue_capacity)),
            level,
        }
    }

    /// `tracing` orders levels by verbosity, so a line passes when it is
    /// no more verbose than the configured level.
    pub(crate) fn enabled(&self, level: Level) -> bool {
        level <= self.level
    }

    pub(crate) fn emit(&self, level: Level, line: &str) {
        if !self.enabled(level) {
            return;
        }
        self.recent.log(level, line);
        self.sink.log(level, line);
    }

    pub(crate) fn recent(&self) -> Vec<String> {
        self.recent.lines()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_drops_oldest() {
        let sink = MemorySink::with_capacity(2);
        sink.log(Level::INFO, "one");
        sink.log(Level::INFO, "two");
        sink.log(Level::INFO, "three");
        assert_eq!(sink.lines(), vec!["two", "three"]);
        assert_eq!(sink.drain().len(), 2);
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let sink = MemorySink::with_capacity(0);
        sink.log(Level::ERROR, "lost");
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn test_level_filter() {
        let sink = Arc::new(MemorySink::with_capacity(8));
        let diag = Diagnostics::new(sink.clone(), Level::INFO, 8);

        diag.emit(Level::DEBUG, "too verbose");
        diag.emit(Level::WARN, "kept");
        diag.emit(Level::INFO, "also kept");

        assert_eq!(sink.lines(), vec!["kept", "also kept"]);
        assert_eq!(diag.recent(), vec!["kept", "also kept"]);
    }

    #[tracing_test::traced_test]
    #[test]
    fn test_tracing_sink_emits_event() {
        TracingSink.log(Level::INFO, "sent CLIENT HELLO");
        assert!(logs_contain("sent CLIENT HELLO"));
    }
}
