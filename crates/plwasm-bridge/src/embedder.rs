//! Lifecycle of the embedded runtime inside the host process.
//!
//! A [`RuntimeEmbedder`] starts the runtime lazily, at most once per
//! process, and remembers how that went:
//!
//! ```text
//! Uninitialized ──ensure_ready──► Initializing ──► Ready
//!       │                              │             │
//!       │                              └──► Failed   │
//!       └──────────────teardown───────────────┴──────┴──► ShuttingDown
//! ```
//!
//! A failed startup is never retried. Every later call gets the original
//! error back, so a misconfigured host fails the same way on every call
//! instead of paying the startup cost again.

use std::fmt;
use std::mem;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use plwasm_common::{
    ConfigBridge, ConfigValue, HostConfig, HostLevel, LogBridge, MisuseError, RuntimeConfig,
    Severity, StartupError, keys,
};
use plwasm_host::{TrustSwitch, TrustTier};

use crate::runtime::{ManagedRuntime, RuntimeLauncher, StartupParams};

/// Host level used when `plwasm.log_min_messages` is not set.
const DEFAULT_LOG_MIN_MESSAGES: HostLevel = HostLevel::Warning;

/// Observable lifecycle state of the embedded runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessRuntimeState {
    /// No startup has been attempted.
    Uninitialized,
    /// A startup is in progress, or unwound without finishing.
    Initializing,
    /// The runtime is live and accepts calls.
    Ready,
    /// Startup failed; the error is kept for the life of the process.
    Failed,
    /// The runtime was torn down.
    ShuttingDown,
}

impl fmt::Display for ProcessRuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::ShuttingDown => "shutting down",
        };
        f.write_str(name)
    }
}

/// A running runtime and the parameters it was started with.
struct Live {
    params: StartupParams,
    runtime: Box<dyn ManagedRuntime>,
}

enum Lifecycle {
    Uninitialized { trust: TrustSwitch },
    Initializing { tier: TrustTier },
    Ready(Live),
    Failed { error: StartupError, tier: TrustTier },
    ShuttingDown { tier: TrustTier },
}

impl Lifecycle {
    fn state(&self) -> ProcessRuntimeState {
        match self {
            Self::Uninitialized { .. } => ProcessRuntimeState::Uninitialized,
            Self::Initializing { .. } => ProcessRuntimeState::Initializing,
            Self::Ready(_) => ProcessRuntimeState::Ready,
            Self::Failed { .. } => ProcessRuntimeState::Failed,
            Self::ShuttingDown { .. } => ProcessRuntimeState::ShuttingDown,
        }
    }

    fn tier(&self) -> TrustTier {
        match self {
            Self::Uninitialized { trust } => trust.current_posture(),
            Self::Ready(live) => live.params.trust.tier(),
            Self::Initializing { tier } | Self::Failed { tier, .. } | Self::ShuttingDown { tier } => {
                *tier
            }
        }
    }
}

/// Owns the embedded runtime for one host process.
pub struct RuntimeEmbedder {
    config: ConfigBridge,
    log: Arc<LogBridge>,
    launcher: Box<dyn RuntimeLauncher>,
    lifecycle: Lifecycle,
    startup_attempts: u32,
}

impl RuntimeEmbedder {
    /// Create an embedder. Nothing is started until [`Self::ensure_ready`].
    pub fn new(
        config: Arc<dyn HostConfig>,
        log: Arc<LogBridge>,
        launcher: Box<dyn RuntimeLauncher>,
    ) -> Self {
        Self {
            config: ConfigBridge::new(config),
            log,
            launcher,
            lifecycle: Lifecycle::Uninitialized {
                trust: TrustSwitch::new(),
            },
            startup_attempts: 0,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProcessRuntimeState {
        self.lifecycle.state()
    }

    /// How many times startup has been attempted. Never more than one.
    pub fn startup_attempts(&self) -> u32 {
        self.startup_attempts
    }

    /// The trust tier selected, or sealed once the runtime has started.
    pub fn current_posture(&self) -> TrustTier {
        self.lifecycle.tier()
    }

    /// The log bridge routine messages go through.
    pub fn log(&self) -> &Arc<LogBridge> {
        &self.log
    }

    /// The parameters the live runtime was started with.
    pub fn live_params(&self) -> Option<&StartupParams> {
        match &self.lifecycle {
            Lifecycle::Ready(live) => Some(&live.params),
            _ => None,
        }
    }

    /// The live runtime, if startup succeeded and teardown has not run.
    pub fn runtime(&self) -> Option<&dyn ManagedRuntime> {
        match &self.lifecycle {
            Lifecycle::Ready(live) => Some(live.runtime.as_ref()),
            _ => None,
        }
    }

    /// The error the failed startup produced.
    pub fn startup_error(&self) -> Option<&StartupError> {
        match &self.lifecycle {
            Lifecycle::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Select the trust tier the runtime will start with.
    ///
    /// Returns the previously selected tier.
    ///
    /// # Errors
    ///
    /// Returns [`MisuseError`] once startup has been attempted. The tier is
    /// left unchanged.
    pub fn set_posture(&mut self, tier: TrustTier) -> Result<TrustTier, MisuseError> {
        match &mut self.lifecycle {
            Lifecycle::Uninitialized { trust } => {
                let previous = trust.set_posture(tier);
                info!(%previous, current = %tier, "Trust posture selected");
                Ok(previous)
            }
            other => {
                let state = other.state();
                warn!(%state, requested = %tier, "Rejected trust posture change");
                Err(MisuseError::new(format!(
                    "trust posture cannot change once the runtime is {state}"
                )))
            }
        }
    }

    /// Start the runtime if no startup has been attempted yet.
    ///
    /// # Errors
    ///
    /// Returns the [`StartupError`] of the one startup attempt, if it
    /// failed, on this and every later call. After teardown the error is
    /// [`StartupError::ShutDown`].
    pub fn ensure_ready(&mut self) -> Result<(), StartupError> {
        if !matches!(self.lifecycle, Lifecycle::Uninitialized { .. }) {
            return self.settled();
        }

        let tier = self.lifecycle.tier();
        let trust = match mem::replace(&mut self.lifecycle, Lifecycle::Initializing { tier }) {
            Lifecycle::Uninitialized { trust } => trust,
            other => {
                self.lifecycle = other;
                return self.settled();
            }
        };

        self.startup_attempts += 1;

        match self.start(trust) {
            Ok(live) => {
                self.lifecycle = Lifecycle::Ready(live);
                Ok(())
            }
            Err(error) => {
                error!(%error, "Embedded runtime failed to start");
                self.lifecycle = Lifecycle::Failed {
                    error: error.clone(),
                    tier,
                };
                Err(error)
            }
        }
    }

    /// Result of [`Self::ensure_ready`] for every state but Uninitialized.
    fn settled(&self) -> Result<(), StartupError> {
        match &self.lifecycle {
            Lifecycle::Ready(_) | Lifecycle::Uninitialized { .. } => Ok(()),
            Lifecycle::Failed { error, .. } => Err(error.clone()),
            Lifecycle::Initializing { .. } => Err(StartupError::Interrupted),
            Lifecycle::ShuttingDown { .. } => Err(StartupError::ShutDown),
        }
    }

    #[instrument(skip_all, fields(trust = %trust.current_posture()))]
    fn start(&self, trust: TrustSwitch) -> Result<Live, StartupError> {
        let module_path = self.config.require(keys::MODULE_PATH)?.as_paths()?;
        let host_level = self.read_log_min_messages()?;
        let runtime = RuntimeConfig::from_bridge(&self.config)?;

        let log_threshold = self.log.map().host_to_common(host_level);
        let params = StartupParams {
            trust: trust.seal(),
            module_path,
            log_threshold,
            runtime,
            log: self.log.clone(),
        };

        let previous = self.log.set_active_level(log_threshold);

        let runtime = match self.launcher.launch(&params) {
            Ok(runtime) => runtime,
            Err(err) => {
                self.log.set_active_level(previous);
                return Err(err);
            }
        };

        info!(
            trust = %params.trust.tier(),
            module_path = ?params.module_path,
            log_threshold = %params.log_threshold,
            "Embedded runtime ready"
        );

        Ok(Live { params, runtime })
    }

    fn read_log_min_messages(&self) -> Result<HostLevel, StartupError> {
        self.config.read_or(
            keys::LOG_MIN_MESSAGES,
            DEFAULT_LOG_MIN_MESSAGES,
            ConfigValue::as_host_level,
        )
    }

    /// Re-read `plwasm.log_min_messages` and install it as the threshold.
    ///
    /// Returns the threshold now in force.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError::ConfigInvalid`] if the value does not name a
    /// host level. The threshold is left unchanged.
    pub fn refresh_log_level(&self) -> Result<Severity, StartupError> {
        let host_level = self.read_log_min_messages()?;
        let previous = self.log.set_active_host_level(host_level);
        let current = self.log.active_level();
        if previous != current {
            info!(%previous, %current, "Log threshold changed");
        }
        Ok(current)
    }

    /// Shut the runtime down.
    ///
    /// Safe to call in any state and more than once; only the first call
    /// from Ready releases anything.
    pub fn teardown(&mut self) {
        let tier = self.lifecycle.tier();
        match mem::replace(&mut self.lifecycle, Lifecycle::ShuttingDown { tier }) {
            Lifecycle::Ready(mut live) => {
                live.runtime.shutdown();
                info!(attempts = self.startup_attempts, "Embedded runtime torn down");
            }
            Lifecycle::ShuttingDown { .. } => debug!("Teardown already ran"),
            previous => debug!(state = %previous.state(), "Teardown with nothing to release"),
        }
    }
}

impl Drop for RuntimeEmbedder {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for RuntimeEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeEmbedder")
            .field("state", &self.state())
            .field("trust", &self.current_posture())
            .field("startup_attempts", &self.startup_attempts)
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}
