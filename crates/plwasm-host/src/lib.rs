//! Host side of the plwasm guest ABI.
//!
//! This crate provides the host-side implementations routines link
//! against, plus the trust posture that limits what they can reach.
//!
//! # Modules
//!
//! - [`linker`]: Guest ABI registration (`env` imports and WASI preview1)
//! - [`logging`]: Routine log routing and the `tracing`-backed host sink
//! - [`trust`]: The one-shot trust switch and the sealed trust policy
//!
//! # Security Model
//!
//! 1. **Trust policy**: the sealed [`TrustPolicy`] builds each call's WASI
//!    context; a trusted runtime gets no filesystem, network, environment
//!    or stdio.
//! 2. **Bounds checks**: every guest pointer is checked against the guest's
//!    exported memory before the host touches it.
//! 3. **Resource limits**: fuel, epoch deadlines and memory limits are set
//!    on each store by `plwasm-core`.

pub mod linker;
pub mod logging;
pub mod trust;

pub use linker::{create_instance_runner, register_all};
pub use logging::{LoggingHost, TracingSink};
pub use trust::{Capabilities, TrustPolicy, TrustSwitch, TrustTier, UnknownTier};
