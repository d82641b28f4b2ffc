//! Routine instance lifecycle.
//!
//! [`InstanceRunner`] drives one routine call end to end:
//!
//! 1. Instantiate the module against the linker's host functions
//! 2. Resolve the routine export
//! 3. Run it under the store's fuel and epoch limits
//! 4. Classify the result into a [`RoutineOutcome`]
//!
//! Classification is the only place routine failures are inspected. Guest
//! raises, ABI violations and Wasm traps become recoverable
//! [`ManagedError`]s; anything else that escapes the engine is a
//! [`NativeFault`].

use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};
use wasmtime::{Engine, Linker, Store, Trap};

use crate::CompiledModule;
use crate::abi::{AbiViolation, GuestRaise};
use crate::store::{RoutineContext, calculate_fuel_consumed, get_remaining_fuel};
use plwasm_common::{HostValue, ManagedError, ManagedErrorKind, NativeFault, RoutineOutcome};

/// Where in the call a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Instantiate,
    Run,
}

/// Instance lifecycle manager.
///
/// Holds the linker with every host function registered. Each call uses
/// its own [`Store`], so one runner serves any number of calls.
pub struct InstanceRunner {
    linker: Linker<RoutineContext>,
}

impl InstanceRunner {
    /// Create a runner with an empty linker.
    pub fn new(engine: &Engine) -> Self {
        Self {
            linker: Linker::new(engine),
        }
    }

    /// Get a mutable reference to the linker, to register host functions.
    pub fn linker_mut(&mut self) -> &mut Linker<RoutineContext> {
        &mut self.linker
    }

    /// Run the routine exported as `export` from `module`.
    ///
    /// The export must have the signature `() -> ()`; arguments and the
    /// result travel through the host functions.
    #[instrument(skip(self, module, store), fields(export = %export, call_id = %store.data().call_id))]
    pub async fn execute_routine(
        &self,
        module: &CompiledModule,
        store: &mut Store<RoutineContext>,
        export: &str,
    ) -> RoutineOutcome {
        let start = Instant::now();
        let initial_fuel = get_remaining_fuel(store).unwrap_or(0);

        debug!("Instantiating routine module");

        let instance = match self
            .linker
            .instantiate_async(&mut *store, module.as_module())
            .await
        {
            Ok(instance) => instance,
            Err(e) => {
                finish_metrics(store, initial_fuel);
                return classify(&e, Phase::Instantiate);
            }
        };

        let func = match instance.get_typed_func::<(), ()>(&mut *store, export) {
            Ok(func) => func,
            Err(_) => {
                let message = if instance.get_func(&mut *store, export).is_some() {
                    format!("export '{export}' must have the signature () -> ()")
                } else {
                    format!("module has no routine named '{export}'")
                };
                warn!(%message, "Routine export unusable");
                return RoutineOutcome::RecoverableError(ManagedError::new(
                    ManagedErrorKind::MissingExport,
                    message,
                ));
            }
        };

        debug!("Executing routine");

        let result = func.call_async(&mut *store, ()).await;

        let fuel_consumed = finish_metrics(store, initial_fuel);
        let duration = start.elapsed();

        match result {
            Ok(()) => {
                info!(
                    duration_ms = duration.as_millis(),
                    fuel_consumed = fuel_consumed,
                    "Routine completed successfully"
                );
                let value = HostValue::from_result_bytes(store.data_mut().take_result());
                RoutineOutcome::Success(value)
            }
            Err(e) => {
                let outcome = classify(&e, Phase::Run);
                match &outcome {
                    RoutineOutcome::FatalFault(fault) => error!(
                        duration_ms = duration.as_millis(),
                        fault = %fault,
                        "Routine hit a native fault"
                    ),
                    RoutineOutcome::RecoverableError(err) => warn!(
                        duration_ms = duration.as_millis(),
                        fuel_consumed = fuel_consumed,
                        kind = %err.kind,
                        message = %err.message,
                        "Routine failed"
                    ),
                    RoutineOutcome::Success(_) => {}
                }
                outcome
            }
        }
    }
}

/// Record fuel and duration on the context. Returns fuel consumed.
fn finish_metrics(store: &mut Store<RoutineContext>, initial_fuel: u64) -> u64 {
    let fuel_consumed = calculate_fuel_consumed(initial_fuel, store);
    let ctx = store.data_mut();
    ctx.metrics.fuel_consumed = fuel_consumed;
    ctx.finalize_metrics();
    fuel_consumed
}

/// Turn an engine error into a routine outcome.
fn classify(error: &wasmtime::Error, phase: Phase) -> RoutineOutcome {
    if let Some(raise) = error.downcast_ref::<GuestRaise>() {
        return RoutineOutcome::RecoverableError(ManagedError::raised(raise.message.clone()));
    }

    if let Some(violation) = error.downcast_ref::<AbiViolation>() {
        return RoutineOutcome::RecoverableError(ManagedError::new(
            ManagedErrorKind::AbiViolation,
            violation.reason.clone(),
        ));
    }

    if let Some(trap) = error.downcast_ref::<Trap>() {
        let err = match *trap {
            Trap::OutOfFuel => ManagedError::new(
                ManagedErrorKind::FuelExhausted,
                "routine exhausted its fuel budget",
            ),
            Trap::Interrupt => ManagedError::new(
                ManagedErrorKind::Timeout,
                "routine exceeded its time limit",
            ),
            _ => ManagedError::new(ManagedErrorKind::Trap, trap.to_string()),
        };
        return RoutineOutcome::RecoverableError(err.with_code(format!("{trap:?}")));
    }

    match phase {
        // Unresolved imports and failed memory reservations surface here.
        Phase::Instantiate => RoutineOutcome::RecoverableError(ManagedError::new(
            ManagedErrorKind::AbiViolation,
            format!("instantiation failed: {error:#}"),
        )),
        Phase::Run => RoutineOutcome::FatalFault(NativeFault::new(format!("{error:#}"))),
    }
}

impl std::fmt::Debug for InstanceRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRunner").finish_non_exhaustive()
    }
}
