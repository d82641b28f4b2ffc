//! Wasmtime implementation of the runtime boundary.
//!
//! [`WasmLauncher`] builds the engine, the guest ABI linker, the module
//! catalog and a small tokio runtime; [`WasmRuntime`] serves calls on them.
//!
//! Calls are blocking: each one runs the async Wasmtime call to completion
//! with `block_on` on the runtime's tokio scheduler. The scheduler's only
//! background task is the epoch ticker that enforces call timeouts.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use plwasm_common::{
    HostValue, ManagedError, ManagedErrorKind, NativeFault, RoutineOutcome, RuntimeError,
    StartupError, keys,
};
use plwasm_core::{CallSetup, InstanceRunner, ModuleCatalog, WasmEngine, create_store};
use plwasm_host::{TrustPolicy, create_instance_runner};

use crate::runtime::{ManagedRuntime, RoutineHandle, RoutineId, RuntimeLauncher, StartupParams};

/// How long shutdown waits for runtime threads.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Launches [`WasmRuntime`]s.
///
/// Modules registered on the launcher are compiled into the catalog at
/// startup, ahead of anything on the module path.
#[derive(Debug, Clone, Default)]
pub struct WasmLauncher {
    inline_modules: Vec<(String, String)>,
}

impl WasmLauncher {
    /// Create a launcher that only loads modules from the module path.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a WAT module to compile at startup.
    #[must_use]
    pub fn with_wat(mut self, name: impl Into<String>, wat: impl Into<String>) -> Self {
        self.inline_modules.push((name.into(), wat.into()));
        self
    }
}

impl RuntimeLauncher for WasmLauncher {
    #[instrument(skip_all, fields(trust = %params.trust.tier()))]
    fn launch(&self, params: &StartupParams) -> Result<Box<dyn ManagedRuntime>, StartupError> {
        for dir in &params.module_path {
            if !dir.is_dir() {
                return Err(StartupError::config_invalid(
                    keys::MODULE_PATH,
                    format!("'{}' is not a directory", dir.display()),
                ));
            }
        }

        // Fail now rather than on the first call if the sandbox cannot be built.
        params.trust.wasi_context()?;

        let engine = WasmEngine::new(&params.runtime)?;
        let runner = create_instance_runner(engine.inner())?;
        let catalog = ModuleCatalog::new(engine.clone(), params.module_path.clone());

        for (name, wat) in &self.inline_modules {
            catalog.register_wat(name, wat)?;
        }

        let scheduler = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("plwasm-runtime")
            .enable_all()
            .build()
            .map_err(|e| StartupError::startup_failure(format!("tokio runtime: {e}")))?;

        let ticker = engine.start_epoch_ticker(scheduler.handle());

        info!(
            modules = catalog.len(),
            search_dirs = params.module_path.len(),
            epoch_ticker = ticker.is_some(),
            "WebAssembly runtime started"
        );

        Ok(Box::new(WasmRuntime {
            engine,
            runner,
            catalog,
            params: params.clone(),
            scheduler: Some(scheduler),
            ticker,
        }))
    }
}

/// A live Wasmtime runtime.
pub struct WasmRuntime {
    engine: WasmEngine,
    runner: InstanceRunner,
    catalog: ModuleCatalog,
    params: StartupParams,
    scheduler: Option<tokio::runtime::Runtime>,
    ticker: Option<JoinHandle<()>>,
}

impl WasmRuntime {
    /// The module catalog.
    pub fn catalog(&self) -> &ModuleCatalog {
        &self.catalog
    }

    /// The trust policy every call runs under.
    pub fn trust(&self) -> &TrustPolicy {
        &self.params.trust
    }

    fn prepare_and_run(
        &self,
        scheduler: &tokio::runtime::Runtime,
        call_id: &str,
        id: &RoutineId,
        args: &[HostValue],
    ) -> RoutineOutcome {
        let module = match self.catalog.get_or_load(id.module()) {
            Ok(module) => module,
            Err(e) => {
                return RoutineOutcome::RecoverableError(ManagedError::new(
                    ManagedErrorKind::LoadFailed,
                    format!("failed to load module '{}': {e}", id.module()),
                ));
            }
        };

        let wasi = match self.params.trust.wasi_context() {
            Ok(wasi) => wasi,
            Err(e) => return RoutineOutcome::FatalFault(NativeFault::new(e.to_string())),
        };

        let setup = CallSetup {
            call_id: call_id.to_string(),
            args: args.iter().map(HostValue::to_arg_bytes).collect(),
            wasi,
            log: self.params.log.clone(),
        };

        let mut store = match create_store(&self.engine, &self.params.runtime.execution, setup) {
            Ok(store) => store,
            Err(e) => return RoutineOutcome::FatalFault(NativeFault::new(e.to_string())),
        };

        scheduler.block_on(
            self.runner
                .execute_routine(&module, &mut store, id.export()),
        )
    }
}

impl ManagedRuntime for WasmRuntime {
    fn resolve(&self, id: &RoutineId) -> Result<RoutineHandle, RuntimeError> {
        let module = self.catalog.get_or_load(id.module())?;

        if !module.exports_function(id.export()) {
            debug!(routine = %id, "Module has no such export");
            return Err(RuntimeError::module_not_found(id.to_string()));
        }

        Ok(RoutineHandle::new(id.clone()).with_fingerprint(module.content_hash()))
    }

    fn call(&self, call_id: &str, handle: &RoutineHandle, args: &[HostValue]) -> RoutineOutcome {
        let Some(scheduler) = self.scheduler.as_ref() else {
            return RoutineOutcome::FatalFault(NativeFault::new("runtime has been shut down"));
        };

        let result = catch_unwind(AssertUnwindSafe(|| {
            self.prepare_and_run(scheduler, call_id, handle.id(), args)
        }));

        result.unwrap_or_else(|panic| {
            let message = panic_message(panic.as_ref());
            error!(call_id, routine = %handle.id(), %message, "Panic inside the embedded runtime");
            RoutineOutcome::FatalFault(NativeFault::new(format!(
                "panic inside the embedded runtime: {message}"
            )))
        })
    }

    fn shutdown(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }

        match self.scheduler.take() {
            Some(scheduler) => {
                scheduler.shutdown_timeout(SHUTDOWN_TIMEOUT);
                info!(modules = self.catalog.len(), "WebAssembly runtime shut down");
            }
            None => warn!("WebAssembly runtime was already shut down"),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl Drop for WasmRuntime {
    fn drop(&mut self) {
        if self.scheduler.is_some() {
            self.shutdown();
        }
    }
}

impl std::fmt::Debug for WasmRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmRuntime")
            .field("engine", &self.engine)
            .field("catalog", &self.catalog)
            .field("live", &self.scheduler.is_some())
            .finish_non_exhaustive()
    }
}
