//! Guest ABI registration for Wasmtime linkers.
//!
//! Routines import these functions from module `env`:
//!
//! | Import | Signature | Meaning |
//! |--------|-----------|---------|
//! | `log` | `(level, ptr, len)` | log at level 0 (trace) to 5 (fatal) |
//! | `log_enabled` | `(level) -> i32` | 1 if the level reaches the host |
//! | `arg_count` | `() -> i32` | number of arguments |
//! | `arg_len` | `(index) -> i32` | byte length, -1 for NULL |
//! | `arg_read` | `(index, ptr)` | copy argument bytes into guest memory |
//! | `set_result` | `(ptr, len)` | set the return value |
//! | `raise` | `(ptr, len)` | raise an error and unwind |
//!
//! WASI preview1 is linked as well; the trust policy decides what the WASI
//! context in each store can reach.
//!
//! Every pointer is bounds-checked against the guest's exported `memory`. A
//! bad pointer, length or index ends the call with an [`AbiViolation`].

use plwasm_common::{ManagedLevel, RuntimeError};
use plwasm_core::{AbiViolation, GuestRaise, InstanceRunner, RoutineContext};
use tracing::warn;
use wasmtime::{Caller, Engine, Extern, Linker, Memory};

use crate::logging::LoggingHost;

/// Module name all guest ABI functions are imported from.
pub const ABI_MODULE: &str = "env";

/// Create an instance runner with the full guest ABI registered.
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn create_instance_runner(engine: &Engine) -> Result<InstanceRunner, RuntimeError> {
    let mut runner = InstanceRunner::new(engine);
    register_all(runner.linker_mut())?;
    Ok(runner)
}

/// Register every guest ABI function and WASI preview1 on a linker.
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn register_all(linker: &mut Linker<RoutineContext>) -> Result<(), RuntimeError> {
    register_logging(linker)?;
    register_arguments(linker)?;
    register_result(linker)?;
    register_wasi(linker)?;
    Ok(())
}

/// Register `env::log` and `env::log_enabled`.
pub fn register_logging(linker: &mut Linker<RoutineContext>) -> Result<(), RuntimeError> {
    linker
        .func_wrap(
            ABI_MODULE,
            "log",
            |mut caller: Caller<'_, RoutineContext>,
             level: i32,
             ptr: i32,
             len: i32|
             -> wasmtime::Result<()> {
                let bytes = read_guest(&mut caller, ptr, len)?;
                let message = String::from_utf8(bytes)
                    .map_err(|_| AbiViolation::new("log message is not valid UTF-8"))?;
                LoggingHost::log(caller.data_mut(), ManagedLevel::from_code(level), &message);
                Ok(())
            },
        )
        .map_err(|e| registration_failed("log", &e))?;

    linker
        .func_wrap(
            ABI_MODULE,
            "log_enabled",
            |caller: Caller<'_, RoutineContext>, level: i32| -> i32 {
                i32::from(LoggingHost::is_enabled(
                    caller.data(),
                    ManagedLevel::from_code(level),
                ))
            },
        )
        .map_err(|e| registration_failed("log_enabled", &e))?;

    Ok(())
}

/// Register `env::arg_count`, `env::arg_len` and `env::arg_read`.
pub fn register_arguments(linker: &mut Linker<RoutineContext>) -> Result<(), RuntimeError> {
    linker
        .func_wrap(
            ABI_MODULE,
            "arg_count",
            |caller: Caller<'_, RoutineContext>| -> wasmtime::Result<i32> {
                let count = i32::try_from(caller.data().arg_count())
                    .map_err(|_| AbiViolation::new("too many arguments"))?;
                Ok(count)
            },
        )
        .map_err(|e| registration_failed("arg_count", &e))?;

    linker
        .func_wrap(
            ABI_MODULE,
            "arg_len",
            |caller: Caller<'_, RoutineContext>, index: i32| -> wasmtime::Result<i32> {
                let index = guest_index(index)?;
                match caller.data().arg(index)? {
                    None => Ok(-1),
                    Some(bytes) => Ok(i32::try_from(bytes.len()).map_err(|_| {
                        AbiViolation::new(format!("argument {index} exceeds guest address space"))
                    })?),
                }
            },
        )
        .map_err(|e| registration_failed("arg_len", &e))?;

    linker
        .func_wrap(
            ABI_MODULE,
            "arg_read",
            |mut caller: Caller<'_, RoutineContext>,
             index: i32,
             ptr: i32|
             -> wasmtime::Result<()> {
                let index = guest_index(index)?;
                let bytes = caller
                    .data()
                    .arg(index)?
                    .ok_or_else(|| AbiViolation::new(format!("argument {index} is NULL")))?
                    .to_vec();
                write_guest(&mut caller, ptr, &bytes)?;
                Ok(())
            },
        )
        .map_err(|e| registration_failed("arg_read", &e))?;

    Ok(())
}

/// Register `env::set_result` and `env::raise`.
pub fn register_result(linker: &mut Linker<RoutineContext>) -> Result<(), RuntimeError> {
    linker
        .func_wrap(
            ABI_MODULE,
            "set_result",
            |mut caller: Caller<'_, RoutineContext>, ptr: i32, len: i32| -> wasmtime::Result<()> {
                let bytes = read_guest(&mut caller, ptr, len)?;
                caller.data_mut().set_result(bytes);
                Ok(())
            },
        )
        .map_err(|e| registration_failed("set_result", &e))?;

    linker
        .func_wrap(
            ABI_MODULE,
            "raise",
            |mut caller: Caller<'_, RoutineContext>, ptr: i32, len: i32| -> wasmtime::Result<()> {
                let bytes = read_guest(&mut caller, ptr, len)?;
                let message = String::from_utf8_lossy(&bytes).into_owned();
                Err(GuestRaise::new(message).into())
            },
        )
        .map_err(|e| registration_failed("raise", &e))?;

    Ok(())
}

/// Link WASI preview1 against each store's context.
pub fn register_wasi(linker: &mut Linker<RoutineContext>) -> Result<(), RuntimeError> {
    wasmtime_wasi::preview1::add_to_linker_async(linker, RoutineContext::wasi_mut)
        .map_err(|e| registration_failed("wasi_snapshot_preview1", &e))
}

fn registration_failed(name: &str, error: &wasmtime::Error) -> RuntimeError {
    RuntimeError::invalid_config(format!("Failed to register host function '{name}': {error}"))
}

fn guest_index(index: i32) -> Result<usize, AbiViolation> {
    usize::try_from(index).map_err(|_| AbiViolation::new(format!("negative argument index {index}")))
}

/// The guest's exported linear memory.
fn guest_memory(caller: &mut Caller<'_, RoutineContext>) -> Result<Memory, AbiViolation> {
    caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or_else(|| {
            warn!("Memory export not found in routine module");
            AbiViolation::new("routine module does not export 'memory'")
        })
}

/// Validate a guest pointer/length pair and return the offset and length.
fn guest_range(ptr: i32, len: i32) -> Result<(usize, usize), AbiViolation> {
    match (usize::try_from(ptr), usize::try_from(len)) {
        (Ok(start), Ok(len)) => Ok((start, len)),
        _ => Err(AbiViolation::new(format!(
            "negative pointer or length (ptr={ptr}, len={len})"
        ))),
    }
}

/// Copy `len` bytes out of guest memory.
fn read_guest(
    caller: &mut Caller<'_, RoutineContext>,
    ptr: i32,
    len: i32,
) -> Result<Vec<u8>, AbiViolation> {
    let (start, len) = guest_range(ptr, len)?;
    let memory = guest_memory(caller)?;
    guest_slice(memory.data(&*caller), start, len).map(<[u8]>::to_vec)
}

/// Borrow `len` bytes at `start`, checking bounds before anything is copied.
fn guest_slice(data: &[u8], start: usize, len: usize) -> Result<&[u8], AbiViolation> {
    start
        .checked_add(len)
        .and_then(|end| data.get(start..end))
        .ok_or_else(|| {
            AbiViolation::new(format!(
                "read of {len} bytes at {start} is outside guest memory"
            ))
        })
}

/// Copy `bytes` into guest memory at `ptr`.
fn write_guest(
    caller: &mut Caller<'_, RoutineContext>,
    ptr: i32,
    bytes: &[u8],
) -> Result<(), AbiViolation> {
    let start = usize::try_from(ptr)
        .map_err(|_| AbiViolation::new(format!("negative pointer {ptr}")))?;
    let memory = guest_memory(caller)?;
    memory.write(&mut *caller, start, bytes).map_err(|_| {
        AbiViolation::new(format!(
            "write of {} bytes at {start} is outside guest memory",
            bytes.len()
        ))
    })
}
