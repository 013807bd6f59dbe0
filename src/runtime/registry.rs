use crate::error::{MendError, Result};
use crate::script::{CallArgs, CompiledUnit, Interpreter, Natives, ScriptError, Value};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// One version of a module as it was parsed.
#[derive(Debug)]
pub struct LoadedModule {
    pub unit: CompiledUnit,
    /// Backing file; `None` for modules loaded from memory.
    pub path: Option<PathBuf>,
    pub version: u64,
    pub loaded_at: DateTime<Utc>,
}

impl LoadedModule {
    pub fn name(&self) -> &str {
        &self.unit.name
    }

    /// Frame label of the module's file.
    pub fn file_label(&self) -> &str {
        &self.unit.file
    }

    pub fn has_function(&self, function: &str) -> bool {
        self.unit.definition(function).is_some()
    }
}

/// Live set of loaded modules.
///
/// Callers resolve a module at every call and keep the `Arc` they got, so a
/// reload swaps the entry for later calls while in-flight calls finish on the
/// version they started with.
pub struct ModuleRegistry {
    modules: RwLock<HashMap<String, Arc<LoadedModule>>>,
    natives: Natives,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::with_natives(Natives::with_builtins())
    }

    pub fn with_natives(natives: Natives) -> Self {
        Self {
            modules: RwLock::new(HashMap::new()),
            natives,
        }
    }

    pub fn natives(&self) -> &Natives {
        &self.natives
    }

    /// Module name for a file: its stem.
    pub fn module_name_for(path: &Path) -> Result<String> {
        path.file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .ok_or_else(|| MendError::Configuration(format!("cannot derive a module name from {}", path.display())))
    }

    /// Load (or replace) the module backed by `path`.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Arc<LoadedModule>> {
        let path = path.as_ref();
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let name = Self::module_name_for(&path)?;
        let source = std::fs::read_to_string(&path)?;
        self.install(name, Some(path), source)
    }

    /// Load a module that has no file on disk. Such modules run normally but
    /// cannot be patched.
    pub fn load_source(&self, name: impl Into<String>, source: impl Into<String>) -> Result<Arc<LoadedModule>> {
        self.install(name.into(), None, source.into())
    }

    /// Re-read and re-parse a module's file, swapping in version N+1.
    pub fn reload(&self, name: &str) -> Result<Arc<LoadedModule>> {
        let current = self
            .get(name)
            .ok_or_else(|| MendError::ModuleNotLoaded(name.to_string()))?;
        let path = current
            .path
            .clone()
            .ok_or_else(|| MendError::NoBackingFile(name.to_string()))?;
        let source = std::fs::read_to_string(&path)?;
        self.install(name.to_string(), Some(path), source)
    }

    fn install(&self, name: String, path: Option<PathBuf>, source: String) -> Result<Arc<LoadedModule>> {
        let file = match &path {
            Some(p) => p.display().to_string(),
            None => format!("<memory:{}>", name),
        };
        let unit = CompiledUnit::compile(name.clone(), file.clone(), source)
            .map_err(|source| MendError::Syntax { file, source })?;

        let mut modules = self
            .modules
            .write()
            .map_err(|_| MendError::LockPoisoned("module registry".to_string()))?;
        let version = modules.get(&name).map(|m| m.version + 1).unwrap_or(1);
        let module = Arc::new(LoadedModule {
            unit,
            path,
            version,
            loaded_at: Utc::now(),
        });
        modules.insert(name.clone(), Arc::clone(&module));

        if version == 1 {
            debug!(module = %name, functions = module.unit.definitions().len(), "Loaded module");
        } else {
            info!(module = %name, version, "Reloaded module");
        }
        Ok(module)
    }

    pub fn get(&self, name: &str) -> Option<Arc<LoadedModule>> {
        self.modules.read().ok()?.get(name).cloned()
    }

    pub fn module_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .modules
            .read()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Run `function` on a specific module version.
    pub fn invoke(&self, module: &LoadedModule, function: &str, args: CallArgs) -> std::result::Result<Value, ScriptError> {
        Interpreter::new(&module.unit, &self.natives).call(function, args)
    }

    /// Resolve the current version of `module` and run `function` on it.
    pub fn call(&self, module: &str, function: &str, args: CallArgs) -> Result<std::result::Result<Value, ScriptError>> {
        let loaded = self
            .get(module)
            .ok_or_else(|| MendError::ModuleNotLoaded(module.to_string()))?;
        Ok(self.invoke(&loaded, function, args))
    }

    /// Bind call arguments against a definition without running it.
    pub fn bind_arguments(
        &self,
        module: &LoadedModule,
        function: &str,
        args: CallArgs,
    ) -> std::result::Result<Vec<(String, Value)>, ScriptError> {
        let mut interpreter = Interpreter::new(&module.unit, &self.natives);
        match module.unit.definition(function) {
            Some(def) => interpreter.bind(def, args),
            None => interpreter.call(function, args).map(|_| Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reload_bumps_version_and_keeps_old_arc() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("calc.mend");
        std::fs::write(&path, "fn f() { return 1; }").unwrap();

        let registry = ModuleRegistry::new();
        let first = registry.load_file(&path).unwrap();
        assert_eq!(first.name(), "calc");
        assert_eq!(first.version, 1);

        std::fs::write(&path, "fn f() { return 2; }").unwrap();
        let second = registry.reload("calc").unwrap();
        assert_eq!(second.version, 2);

        assert_eq!(registry.invoke(&first, "f", CallArgs::new()).unwrap(), Value::Int(1));
        assert_eq!(registry.call("calc", "f", CallArgs::new()).unwrap().unwrap(), Value::Int(2));
    }

    #[test]
    fn test_reload_failure_keeps_previous_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("calc.mend");
        std::fs::write(&path, "fn f() { return 1; }").unwrap();

        let registry = ModuleRegistry::new();
        registry.load_file(&path).unwrap();
        std::fs::write(&path, "fn f( {").unwrap();

        assert!(matches!(registry.reload("calc"), Err(MendError::Syntax { .. })));
        let current = registry.get("calc").unwrap();
        assert_eq!(current.version, 1);
    }

    #[test]
    fn test_memory_modules_cannot_reload() {
        let registry = ModuleRegistry::new();
        let module = registry.load_source("scratch", "fn f() { return nil; }").unwrap();
        assert!(module.path.is_none());
        assert_eq!(module.file_label(), "<memory:scratch>");
        assert!(matches!(registry.reload("scratch"), Err(MendError::NoBackingFile(_))));
        assert!(matches!(registry.reload("missing"), Err(MendError::ModuleNotLoaded(_))));
    }

    #[test]
    fn test_host_natives_are_callable() {
        let mut natives = Natives::with_builtins();
        natives.register("double", |args| match args {
            [Value::Int(n)] => Ok(Value::Int(n * 2)),
            _ => Ok(Value::Nil),
        });
        let registry = ModuleRegistry::with_natives(natives);
        registry.load_source("m", "fn f(x) { return double(x); }").unwrap();

        let result = registry.call("m", "f", CallArgs::new().arg(21)).unwrap();
        assert_eq!(result.unwrap(), Value::Int(42));
    }
}
