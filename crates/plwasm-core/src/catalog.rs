//! Compiled routine modules, loaded on demand from the module path.
//!
//! A module named `name` is looked up in each search directory in order as
//! `name.wasm` and then `name.wat`. The first hit is compiled once and kept
//! for the life of the runtime.

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use tracing::{debug, info};

use crate::{CompiledModule, WasmEngine};
use plwasm_common::RuntimeError;

/// File extensions tried for each module name, in order.
const EXTENSIONS: [&str; 2] = ["wasm", "wat"];

/// Cache of compiled modules keyed by module name.
pub struct ModuleCatalog {
    engine: WasmEngine,
    search_path: Vec<PathBuf>,
    modules: DashMap<String, CompiledModule>,
}

impl ModuleCatalog {
    /// Create an empty catalog over the given search directories.
    pub fn new(engine: WasmEngine, search_path: Vec<PathBuf>) -> Self {
        Self {
            engine,
            search_path,
            modules: DashMap::new(),
        }
    }

    /// Returns `true` if `name` can be used as a module name.
    ///
    /// Names are non-empty and limited to ASCII letters, digits, `_` and `-`,
    /// so they can never escape the search directories.
    pub fn is_valid_name(name: &str) -> bool {
        !name.is_empty()
            && name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    }

    /// The directories searched for module files.
    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    /// Compile WAT source and cache it under `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or compilation fails.
    pub fn register_wat(&self, name: &str, wat: &str) -> Result<CompiledModule, RuntimeError> {
        Self::check_name(name)?;
        let compiled = CompiledModule::from_wat(self.engine.inner(), wat)?;
        self.modules.insert(name.to_string(), compiled.clone());
        Ok(compiled)
    }

    /// Find the file that would be loaded for `name`.
    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        if !Self::is_valid_name(name) {
            return None;
        }
        self.search_path.iter().find_map(|dir| find_in(dir, name))
    }

    /// Get a cached module, loading it from the search path on first use.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::ModuleNotFound`] if no file matches and a
    /// compilation or I/O error if the file cannot be loaded.
    pub fn get_or_load(&self, name: &str) -> Result<CompiledModule, RuntimeError> {
        if let Some(module) = self.modules.get(name) {
            return Ok(module.clone());
        }

        Self::check_name(name)?;
        let path = self
            .locate(name)
            .ok_or_else(|| RuntimeError::module_not_found(name))?;

        debug!(module = name, path = %path.display(), "Loading routine module");
        let compiled = CompiledModule::from_file(self.engine.inner(), &path)?;

        // Another thread may have loaded the same module meanwhile; keep theirs.
        let entry = self
            .modules
            .entry(name.to_string())
            .or_insert(compiled)
            .clone();

        info!(module = name, content_hash = entry.content_hash(), "Routine module cached");
        Ok(entry)
    }

    /// Get a cached module without touching the file system.
    pub fn get(&self, name: &str) -> Option<CompiledModule> {
        self.modules.get(name).map(|m| m.clone())
    }

    /// Drop a module from the cache. The next call reloads it from disk.
    pub fn remove(&self, name: &str) -> bool {
        self.modules.remove(name).is_some()
    }

    /// Names of all cached modules, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of cached modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns `true` if no module is cached.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    fn check_name(name: &str) -> Result<(), RuntimeError> {
        if Self::is_valid_name(name) {
            Ok(())
        } else {
            Err(RuntimeError::module_not_found(name))
        }
    }
}

fn find_in(dir: &Path, name: &str) -> Option<PathBuf> {
    EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{name}.{ext}")))
        .find(|candidate| candidate.is_file())
}

impl std::fmt::Debug for ModuleCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCatalog")
            .field("search_path", &self.search_path)
            .field("modules_count", &self.modules.len())
            .finish_non_exhaustive()
    }
}
