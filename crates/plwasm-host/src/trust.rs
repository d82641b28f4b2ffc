//! Trust posture for routine execution.
//!
//! The posture is chosen once, before the runtime starts:
//! - [`TrustSwitch`]: the mutable pre-start builder
//! - [`TrustPolicy`]: the sealed value the runtime is started with
//!
//! Sealing consumes the switch, so nothing holding a [`TrustPolicy`] can
//! change the tier of a live runtime.
//!
//! # Tiers
//!
//! | Tier | Filesystem | Environment | Network | Stdio |
//! |------|------------|-------------|---------|-------|
//! | Trusted | none | none | none | none |
//! | Untrusted | host root | inherited | inherited | inherited |
//!
//! "Trusted" follows the database convention: the language is trusted to be
//! safe for any user because routines are sandboxed.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use wasmtime_wasi::preview1::WasiP1Ctx;
use wasmtime_wasi::{DirPerms, FilePerms, WasiCtxBuilder};

use plwasm_common::RuntimeError;

/// Sandboxing posture applied to every routine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustTier {
    /// Sandboxed: no filesystem, network, environment or stdio.
    #[default]
    Trusted,
    /// Full access to the host process's capabilities.
    Untrusted,
}

impl TrustTier {
    /// Map the host's boolean trust flag to a tier.
    pub fn from_trusted(trusted: bool) -> Self {
        if trusted { Self::Trusted } else { Self::Untrusted }
    }

    /// Capabilities granted at this tier.
    pub fn capabilities(self) -> Capabilities {
        match self {
            Self::Trusted => Capabilities::none(),
            Self::Untrusted => Capabilities::all(),
        }
    }
}

impl fmt::Display for TrustTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trusted => f.write_str("trusted"),
            Self::Untrusted => f.write_str("untrusted"),
        }
    }
}

impl FromStr for TrustTier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trusted" => Ok(Self::Trusted),
            "untrusted" => Ok(Self::Untrusted),
            _ => Err(UnknownTier(s.to_string())),
        }
    }
}

/// A tier name that is neither `trusted` nor `untrusted`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown trust tier '{0}'")]
pub struct UnknownTier(pub String);

/// What routines may reach outside their sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// The host root directory is preopened read/write.
    pub filesystem: bool,
    /// The host process environment is visible.
    pub environment: bool,
    /// Sockets and name lookup are allowed.
    pub network: bool,
    /// Stdin, stdout and stderr are inherited from the host.
    pub stdio: bool,
}

impl Capabilities {
    /// Nothing outside the sandbox.
    pub const fn none() -> Self {
        Self {
            filesystem: false,
            environment: false,
            network: false,
            stdio: false,
        }
    }

    /// Everything the host process can do.
    pub const fn all() -> Self {
        Self {
            filesystem: true,
            environment: true,
            network: true,
            stdio: true,
        }
    }
}

/// Pre-start trust builder.
///
/// # Example
///
/// ```ignore
/// let mut switch = TrustSwitch::new();
/// switch.set_posture(TrustTier::Untrusted);
/// let policy = switch.seal();
/// assert_eq!(policy.tier(), TrustTier::Untrusted);
/// ```
#[derive(Debug, Clone, Default)]
pub struct TrustSwitch {
    tier: TrustTier,
}

impl TrustSwitch {
    /// Create a switch in the default (trusted) posture.
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the posture. Returns the previous one.
    pub fn set_posture(&mut self, tier: TrustTier) -> TrustTier {
        std::mem::replace(&mut self.tier, tier)
    }

    /// The posture currently selected.
    pub fn current_posture(&self) -> TrustTier {
        self.tier
    }

    /// Fix the posture for the life of the runtime.
    pub fn seal(self) -> TrustPolicy {
        TrustPolicy {
            tier: self.tier,
            capabilities: self.tier.capabilities(),
        }
    }
}

/// Sealed trust posture of a live runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrustPolicy {
    tier: TrustTier,
    capabilities: Capabilities,
}

impl TrustPolicy {
    /// The sealed tier.
    pub fn tier(&self) -> TrustTier {
        self.tier
    }

    /// Capabilities granted to routines.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Build the WASI context for one call.
    ///
    /// # Errors
    ///
    /// Returns an error if the host root cannot be preopened.
    pub fn wasi_context(&self) -> Result<WasiP1Ctx, RuntimeError> {
        let caps = self.capabilities;
        let mut builder = WasiCtxBuilder::new();

        if caps.network {
            builder.inherit_network();
            builder.allow_ip_name_lookup(true);
        } else {
            builder.allow_tcp(false);
            builder.allow_udp(false);
            builder.allow_ip_name_lookup(false);
        }

        if caps.environment {
            builder.inherit_env();
        }

        if caps.stdio {
            builder.inherit_stdio();
        }

        if caps.filesystem {
            builder
                .preopened_dir("/", "/", DirPerms::all(), FilePerms::all())
                .map_err(|e| {
                    RuntimeError::invalid_config(format!("Failed to preopen host root: {e}"))
                })?;
        }

        Ok(builder.build_p1())
    }
}
