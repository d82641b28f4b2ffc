//! Routine logging, both directions.
//!
//! - [`LoggingHost`]: the host side of the guest `log` import
//! - [`TracingSink`]: a [`HostLogSink`] that writes host messages as
//!   `tracing` events, used when the host process is the `plwasm` binary

use plwasm_common::{HostLevel, HostLogSink, ManagedLevel};
use plwasm_core::RoutineContext;
use tracing::{debug, error, info, trace, warn};

/// Host implementation for the guest logging imports.
///
/// Messages are:
/// 1. Routed through the context's log bridge, which applies the threshold
///    and the level tables before the host sink sees them
/// 2. Stored in the [`RoutineContext`] for later inspection
pub struct LoggingHost;

impl LoggingHost {
    /// Log a message at the specified routine level.
    pub fn log(ctx: &mut RoutineContext, level: ManagedLevel, message: &str) {
        let forwarded = ctx.log(level, message.to_string());
        trace!(
            call_id = %ctx.call_id,
            level = ?level,
            forwarded,
            "Routine log"
        );
    }

    /// Returns `true` if a message at `level` would reach the host.
    pub fn is_enabled(ctx: &RoutineContext, level: ManagedLevel) -> bool {
        ctx.log_bridge().is_enabled(level)
    }
}

/// Host log sink backed by `tracing`.
///
/// Host levels collapse onto tracing's five levels; the original level name
/// is kept in the `host_level` field.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TracingSink {
    /// Create a new sink.
    pub fn new() -> Self {
        Self
    }
}

impl HostLogSink for TracingSink {
    fn write(&self, level: HostLevel, message: &str) {
        let host_level = level.name();
        match level {
            HostLevel::Debug5 | HostLevel::Debug4 | HostLevel::Debug3 => {
                trace!(target: "plwasm::routine", host_level, "{message}");
            }
            HostLevel::Debug2 | HostLevel::Debug1 => {
                debug!(target: "plwasm::routine", host_level, "{message}");
            }
            HostLevel::Log | HostLevel::Info | HostLevel::Notice => {
                info!(target: "plwasm::routine", host_level, "{message}");
            }
            HostLevel::Warning => warn!(target: "plwasm::routine", host_level, "{message}"),
            HostLevel::Error | HostLevel::Fatal | HostLevel::Panic => {
                error!(target: "plwasm::routine", host_level, "{message}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use plwasm_common::{LogBridge, MemorySink, Severity};
    use wasmtime::StoreLimits;
    use wasmtime_wasi::WasiCtxBuilder;

    fn context(sink: Arc<MemorySink>) -> RoutineContext {
        let log = Arc::new(LogBridge::new(sink).unwrap());
        log.set_active_level(Severity::Info);
        RoutineContext::new(
            "test-123".into(),
            Vec::new(),
            WasiCtxBuilder::new().build_p1(),
            log,
            StoreLimits::default(),
        )
    }

    #[test]
    fn test_logging_stores_in_context() {
        let sink = Arc::new(MemorySink::new());
        let mut ctx = context(sink.clone());

        LoggingHost::log(&mut ctx, ManagedLevel::Info, "Hello");
        LoggingHost::log(&mut ctx, ManagedLevel::Error, "World");
        LoggingHost::log(&mut ctx, ManagedLevel::Debug, "Hidden");

        assert_eq!(ctx.logs.len(), 3);
        assert_eq!(ctx.logs[0].message, "Hello");
        assert_eq!(ctx.logs[0].level, ManagedLevel::Info);
        assert!(!ctx.logs[2].forwarded);

        assert_eq!(
            sink.entries(),
            vec![
                (HostLevel::Notice, "Hello".to_string()),
                (HostLevel::Error, "World".to_string()),
            ]
        );
    }

    #[test]
    fn test_is_enabled_follows_threshold() {
        let ctx = context(Arc::new(MemorySink::new()));

        assert!(LoggingHost::is_enabled(&ctx, ManagedLevel::Warn));
        assert!(LoggingHost::is_enabled(&ctx, ManagedLevel::Info));
        assert!(!LoggingHost::is_enabled(&ctx, ManagedLevel::Debug));

        ctx.log_bridge().set_active_level(Severity::Error);
        assert!(!LoggingHost::is_enabled(&ctx, ManagedLevel::Warn));
    }

    #[test]
    fn test_tracing_sink_accepts_every_level() {
        let sink = TracingSink::new();
        for level in [
            HostLevel::Debug5,
            HostLevel::Debug1,
            HostLevel::Notice,
            HostLevel::Warning,
            HostLevel::Panic,
        ] {
            sink.write(level, "message");
        }
    }
}
