//! Core Wasmtime runtime for plwasm.
//!
//! This crate provides the WebAssembly execution capabilities the bridge
//! embeds in the host process:
//! - [`WasmEngine`]: Configured Wasmtime engine, one per process
//! - [`ModuleCatalog`]: Routine modules loaded from the module path
//! - [`RoutineContext`]: Per-call execution context
//! - [`InstanceRunner`]: Instantiation, execution and outcome classification
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     WasmEngine                          │
//! │  (One per process, shared by every call)                │
//! │  - Fuel metering and epoch interruption                 │
//! │  - Optional pooling allocator                           │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                   ModuleCatalog                         │
//! │  (Compiled once per module name)                        │
//! │  - Search path lookup, name.wasm then name.wat          │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │            Store<RoutineContext> + Instance             │
//! │  (Per call, isolated)                                   │
//! │  - Arguments, result slot, WASI context                 │
//! │  - Fuel budget, epoch deadline, memory limit            │
//! │  - Routine logs and metrics                             │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod abi;
pub mod catalog;
pub mod engine;
pub mod instance;
pub mod module;
pub mod store;

pub use abi::{AbiViolation, GuestRaise};
pub use catalog::ModuleCatalog;
pub use engine::WasmEngine;
pub use instance::InstanceRunner;
pub use module::CompiledModule;
pub use store::{CallSetup, ExecutionMetrics, LogEntry, RoutineContext, create_store};
