//! Bridge between a host database server and the embedded WebAssembly
//! runtime.
//!
//! # Architecture
//!
//! ```text
//! host ──► call_handler ──► CallDispatcher ──► RuntimeEmbedder ──► ManagedRuntime
//!              │                  │                  │                  │
//!          HostError         CallOutcome       ensure_ready         WasmRuntime
//!       (level, SQLSTATE)   (3-way result)    (start once)   (catalog, store, runner)
//! ```
//!
//! # Modules
//!
//! - [`embedder`]: Runtime lifecycle and the trust switch
//! - [`dispatcher`]: Per-call resolution, invocation and classification
//! - [`handler`]: Host entry points and host error mapping
//! - [`runtime`]: The launcher and runtime traits
//! - [`wasm`]: The Wasmtime implementation of those traits

pub mod dispatcher;
pub mod embedder;
pub mod handler;
pub mod runtime;
pub mod wasm;

pub use dispatcher::{CallContext, CallDispatcher, CallError, CallOutcome, DispatchStats};
pub use embedder::{ProcessRuntimeState, RuntimeEmbedder};
pub use handler::{BridgeContext, HostError, SqlState, call_handler, set_trust};
pub use runtime::{
    InvalidRoutineId, ManagedRuntime, RoutineHandle, RoutineId, RuntimeLauncher, StartupParams,
};
pub use wasm::{WasmLauncher, WasmRuntime};
