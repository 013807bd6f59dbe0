//! Execution context capture.
//!
//! Turns a failed call into an [`ExecutionContext`]: which error, where it was
//! raised, the exact source text of the failing definition and the values its
//! parameters were bound to. Capture never fails outright; missing pieces are
//! recorded in `source_error` and the pipeline carries on with what it has.

pub mod source;
pub mod store;
pub mod taxonomy;

pub use source::{DefinitionSpan, LocateError, LocateMethod, locate_definition};
pub use store::ExceptionStore;
pub use taxonomy::{ErrorDetail, classify, hint};

use crate::config::MendConfig;
use crate::runtime::{LoadedModule, ModuleRegistry};
use crate::script::{CallArgs, Frame, ScriptError, Value};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Placeholder value for parameters a failed binding never reached.
pub const UNBOUND: &str = "<unbound>";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub event_id: String,
    pub timestamp: DateTime<Local>,
    pub environment: Environment,
    pub error: ErrorInfo,
    pub function_info: FunctionInfo,
    pub function_arguments: Vec<ArgumentRecord>,
    pub ai_hint: Option<String>,
    pub fixed_code: Option<String>,
    pub backup_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub platform: String,
    pub arch: String,
    pub runtime: String,
}

impl Environment {
    pub fn current() -> Self {
        Self {
            platform: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            runtime: format!("mend {}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
    pub raw_traceback: String,
    pub originating_file: Option<String>,
    pub originating_line: Option<usize>,
    pub originating_function: Option<String>,
    pub source_line_text: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub details: Vec<ErrorDetail>,
    pub frames: Vec<Frame>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    pub qualified_name: String,
    pub module: String,
    pub file_path: Option<PathBuf>,
    pub start_line: Option<usize>,
    pub source_text: Option<String>,
    pub signature: Option<String>,
    /// Why the source could not be recovered, if it could not.
    pub source_error: Option<String>,
}

impl FunctionInfo {
    pub fn has_source(&self) -> bool {
        self.source_text.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentRecord {
    pub name: String,
    pub value: String,
    pub type_name: String,
}

impl ArgumentRecord {
    fn from_value(name: impl Into<String>, value: &Value) -> Self {
        Self {
            name: name.into(),
            value: value.repr(),
            type_name: value.type_name().to_string(),
        }
    }

    fn unbound(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: UNBOUND.to_string(),
            type_name: "unbound".to_string(),
        }
    }
}

pub struct ContextCapturer {
    debug: bool,
    store: Option<ExceptionStore>,
}

impl ContextCapturer {
    pub fn new(config: &MendConfig) -> Self {
        Self {
            debug: config.debug,
            store: config
                .save_exceptions
                .then(|| ExceptionStore::new(config.exceptions_folder.clone())),
        }
    }

    pub fn capture(
        &self,
        event_id: &str,
        registry: &ModuleRegistry,
        module: &LoadedModule,
        function: &str,
        args: &CallArgs,
        error: &ScriptError,
    ) -> ExecutionContext {
        let frame = error.frame_in(module.file_label());
        let function_info = self.function_info(module, function);
        let function_arguments = bind_arguments(registry, module, function, args);

        let context = ExecutionContext {
            event_id: event_id.to_string(),
            timestamp: Local::now(),
            environment: Environment::current(),
            error: ErrorInfo {
                kind: error.kind.name().to_string(),
                message: error.kind.to_string(),
                raw_traceback: error.format_traceback(),
                originating_file: frame.map(|f| f.file.clone()),
                originating_line: frame.map(|f| f.line),
                originating_function: frame.map(|f| f.function.clone()),
                source_line_text: frame.and_then(|f| f.code_text.clone()),
                attributes: error.kind.attributes(),
                details: classify(&error.kind),
                frames: error.trace.clone(),
            },
            function_info,
            function_arguments,
            ai_hint: hint(&error.kind),
            fixed_code: None,
            backup_path: None,
        };

        debug!(
            event_id,
            module = module.name(),
            function,
            kind = %context.error.kind,
            line = ?context.error.originating_line,
            "Captured execution context"
        );

        if let Some(store) = &self.store {
            match store.save(&context) {
                Ok(path) => debug!(path = %path.display(), "Saved exception record"),
                Err(e) => warn!(function, error = %e, "Failed to save exception record"),
            }
        }

        context
    }

    fn function_info(&self, module: &LoadedModule, function: &str) -> FunctionInfo {
        let mut info = FunctionInfo {
            name: function.to_string(),
            qualified_name: format!("{}::{}", module.name(), function),
            module: module.name().to_string(),
            file_path: module.path.clone(),
            start_line: None,
            source_text: None,
            signature: None,
            source_error: None,
        };

        let Some(path) = &module.path else {
            info.source_error = Some(format!("module `{}` has no backing file", module.name()));
            warn!(function, module = module.name(), "No source file, capture degraded");
            return info;
        };

        // Read fresh: the file may already differ from the loaded version.
        let source = match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(e) => {
                info.source_error = Some(format!("cannot read {}: {}", path.display(), e));
                warn!(function, file = %path.display(), error = %e, "Source unreadable, capture degraded");
                return info;
            }
        };

        match locate_definition(&source, function) {
            Ok(span) => {
                if self.debug {
                    info!(function, method = ?span.method, "Original source:\n{}", span.text(&source));
                } else {
                    debug!(function, method = ?span.method, "Original source located");
                }
                info.start_line = Some(span.start_line);
                info.source_text = Some(span.text(&source).to_string());
                info.signature = span.signature.clone();
            }
            Err(e) => {
                info.source_error = Some(e.to_string());
                warn!(function, file = %path.display(), error = %e, "Definition not located, capture degraded");
            }
        }

        info
    }
}

/// Record each parameter with the value it was bound to.
///
/// Uses the interpreter's binder so defaults show up evaluated. When the call
/// itself could not bind, supplied values are matched to the declared names
/// they reach and the rest are marked unbound.
pub fn bind_arguments(
    registry: &ModuleRegistry,
    module: &LoadedModule,
    function: &str,
    args: &CallArgs,
) -> Vec<ArgumentRecord> {
    match registry.bind_arguments(module, function, args.clone()) {
        Ok(bound) => {
            return bound
                .iter()
                .map(|(name, value)| ArgumentRecord::from_value(name.clone(), value))
                .collect();
        }
        Err(e) if e.kind.is_binding_error() => {
            debug!(function, error = %e.kind, "Arguments do not bind, recording them as supplied");
        }
        Err(e) => debug!(function, error = %e.kind, "Could not bind arguments"),
    }

    let params = module
        .unit
        .definition(function)
        .map(|def| def.param_names())
        .unwrap_or_default();

    let mut records = Vec::new();
    for (i, param) in params.iter().enumerate() {
        let supplied = args
            .positional
            .get(i)
            .or_else(|| args.keyword.iter().find(|(k, _)| k == param).map(|(_, v)| v));
        records.push(match supplied {
            Some(value) => ArgumentRecord::from_value(param.clone(), value),
            None => ArgumentRecord::unbound(param.clone()),
        });
    }

    for (i, value) in args.positional.iter().enumerate().skip(params.len()) {
        records.push(ArgumentRecord::from_value(format!("arg{}", i), value));
    }
    for (name, value) in &args.keyword {
        if !params.contains(name) {
            records.push(ArgumentRecord::from_value(name.clone(), value));
        }
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigManager;
    use tempfile::TempDir;

    const CALC: &str = "@heal\nfn divide(a, b, scale = 2) {\n    return a / b * scale;\n}\n\nfn outer(x) {\n    return divide(x, 0);\n}\n";

    fn config(dir: &TempDir, save: bool) -> MendConfig {
        let text = format!(
            r#"
ai_provider = "ollama"
max_attempts = 2
debug = false
auto_fix = true
backup_enabled = true
save_exceptions = {}
exceptions_folder = "{}"

[system_prompts]
code_fixer = "fix"
analyzer = "analyze"
report = "report"
"#,
            save,
            dir.path().join("exceptions").display()
        );
        ConfigManager::from_toml_str(&text).unwrap()
    }

    fn failing_call(registry: &ModuleRegistry, module: &str, function: &str, args: &CallArgs) -> ScriptError {
        registry.call(module, function, args.clone()).unwrap().unwrap_err()
    }

    #[test]
    fn test_capture_from_file_module() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("calc.mend");
        std::fs::write(&path, CALC).unwrap();

        let registry = ModuleRegistry::new();
        let module = registry.load_file(&path).unwrap();
        let args = CallArgs::new().arg(10);
        let error = failing_call(&registry, "calc", "outer", &args);

        let capturer = ContextCapturer::new(&config(&dir, false));
        let ctx = capturer.capture("heal_1", &registry, &module, "divide", &CallArgs::new().arg(10).arg(0), &error);

        assert_eq!(ctx.error.kind, "DivisionByZero");
        assert_eq!(ctx.error.originating_function.as_deref(), Some("divide"));
        assert_eq!(ctx.error.originating_line, Some(3));
        assert_eq!(ctx.error.source_line_text.as_deref(), Some("return a / b * scale;"));
        assert_eq!(ctx.error.frames.len(), 2);
        assert!(matches!(ctx.error.details[0], ErrorDetail::Arithmetic { .. }));
        assert!(ctx.ai_hint.is_some());

        assert_eq!(ctx.function_info.qualified_name, "calc::divide");
        assert_eq!(ctx.function_info.start_line, Some(1));
        assert_eq!(ctx.function_info.signature.as_deref(), Some("fn divide(a, b, scale = 2)"));
        assert!(ctx.function_info.source_text.as_deref().unwrap().starts_with("@heal\nfn divide"));
        assert!(ctx.function_info.source_error.is_none());

        let names: Vec<_> = ctx.function_arguments.iter().map(|a| (a.name.as_str(), a.value.as_str())).collect();
        assert_eq!(names, vec![("a", "10"), ("b", "0"), ("scale", "2")]);
    }

    #[test]
    fn test_binding_failure_records_reached_params() {
        let registry = ModuleRegistry::new();
        let module = registry.load_source("calc", CALC).unwrap();

        let args = CallArgs::new().arg("x").kwarg("scale", 3).kwarg("extra", true);
        let records = bind_arguments(&registry, &module, "divide", &args);

        let got: Vec<_> = records
            .iter()
            .map(|r| (r.name.as_str(), r.value.as_str(), r.type_name.as_str()))
            .collect();
        assert_eq!(
            got,
            vec![
                ("a", "\"x\"", "str"),
                ("b", UNBOUND, "unbound"),
                ("scale", "3", "int"),
                ("extra", "true", "bool"),
            ]
        );
    }

    #[test]
    fn test_memory_module_degrades() {
        let dir = TempDir::new().unwrap();
        let registry = ModuleRegistry::new();
        let module = registry.load_source("calc", CALC).unwrap();
        let args = CallArgs::new().arg(1).arg(0);
        let error = failing_call(&registry, "calc", "divide", &args);

        let ctx = ContextCapturer::new(&config(&dir, false)).capture("heal_2", &registry, &module, "divide", &args, &error);
        assert!(!ctx.function_info.has_source());
        assert!(ctx.function_info.source_error.as_deref().unwrap().contains("no backing file"));
        assert_eq!(ctx.error.originating_file.as_deref(), Some("<memory:calc>"));
    }

    #[test]
    fn test_saved_record_loads_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("calc.mend");
        std::fs::write(&path, CALC).unwrap();

        let registry = ModuleRegistry::new();
        let module = registry.load_file(&path).unwrap();
        let args = CallArgs::new().arg(4).arg(0);
        let error = failing_call(&registry, "calc", "divide", &args);

        ContextCapturer::new(&config(&dir, true)).capture("heal_3", &registry, &module, "divide", &args, &error);

        let records: Vec<_> = std::fs::read_dir(dir.path().join("exceptions"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(records.len(), 1);
        let name = records[0].file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with("_divide.json"));

        let loaded = ExceptionStore::load(&records[0]).unwrap();
        assert_eq!(loaded.event_id, "heal_3");
        assert_eq!(loaded.error.kind, "DivisionByZero");
    }
}
