//! Routing of routine log messages into the host's logging sink.
//!
//! [`LogBridge`] owns the validated [`LevelMap`], the active verbosity
//! threshold and the host sink. Every message a routine emits passes through
//! it, so host and routine messages share one severity ordering.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::levels::{HostLevel, Level, LevelMap, LevelMapError, ManagedLevel, Severity};

/// The host's write-only logging sink.
pub trait HostLogSink: Send + Sync {
    /// Write one message at the given host level.
    fn write(&self, level: HostLevel, message: &str);
}

/// A sink that keeps every message in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<(HostLevel, String)>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the captured messages, oldest first.
    pub fn entries(&self) -> Vec<(HostLevel, String)> {
        self.entries.lock().clone()
    }

    /// Number of captured messages.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl HostLogSink for MemorySink {
    fn write(&self, level: HostLevel, message: &str) {
        self.entries.lock().push((level, message.to_string()));
    }
}

/// Default threshold before host configuration is applied.
const DEFAULT_THRESHOLD: Severity = Severity::Warning;

/// Translator plus threshold plus sink.
pub struct LogBridge {
    map: LevelMap,
    threshold: AtomicUsize,
    sink: Arc<dyn HostLogSink>,
}

impl LogBridge {
    /// Create a bridge with the standard level tables.
    pub fn new(sink: Arc<dyn HostLogSink>) -> Result<Self, LevelMapError> {
        Ok(Self::with_map(LevelMap::standard()?, sink))
    }

    /// Create a bridge with an already validated map.
    pub fn with_map(map: LevelMap, sink: Arc<dyn HostLogSink>) -> Self {
        Self {
            map,
            threshold: AtomicUsize::new(DEFAULT_THRESHOLD.index()),
            sink,
        }
    }

    /// The level tables.
    pub fn map(&self) -> &LevelMap {
        &self.map
    }

    /// The threshold currently in force.
    pub fn active_level(&self) -> Severity {
        Severity::from_index(self.threshold.load(Ordering::Acquire)).unwrap_or(DEFAULT_THRESHOLD)
    }

    /// Install a new threshold and return the previous one.
    pub fn set_active_level(&self, level: Severity) -> Severity {
        let previous = self.threshold.swap(level.index(), Ordering::AcqRel);
        Severity::from_index(previous).unwrap_or(DEFAULT_THRESHOLD)
    }

    /// Install a threshold expressed as a host level.
    pub fn set_active_host_level(&self, level: HostLevel) -> Severity {
        self.set_active_level(self.map.host_to_common(level))
    }

    /// Returns `true` if a routine message at `level` would reach the host.
    pub fn is_enabled(&self, level: ManagedLevel) -> bool {
        self.map.managed_to_common(level) >= self.active_level()
    }

    /// Route a routine message to the host sink.
    ///
    /// Returns `true` if the message passed the threshold and was written.
    pub fn emit_managed(&self, level: ManagedLevel, message: &str) -> bool {
        let common = self.map.managed_to_common(level);
        if common < self.active_level() {
            return false;
        }
        self.sink.write(self.map.common_to_host(common), message);
        true
    }
}

impl std::fmt::Debug for LogBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogBridge")
            .field("active_level", &self.active_level())
            .finish_non_exhaustive()
    }
}
