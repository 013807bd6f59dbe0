//! Splices a replacement definition into a source file.

use crate::capture::{LocateError, LocateMethod, locate_definition};
use crate::error::{MendError, Result};
use crate::fsutil::write_atomic;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchReport {
    pub path: PathBuf,
    pub function: String,
    pub start_line: usize,
    pub end_line: usize,
    pub method: LocateMethod,
    /// False when the replacement equals the current text.
    pub changed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SourcePatcher;

impl SourcePatcher {
    pub fn new() -> Self {
        Self
    }

    /// Replace the definition of `function` in `path` with `replacement`.
    ///
    /// The file is re-read here, not taken from the loaded module, so edits
    /// made since loading are kept. Every byte outside the definition span is
    /// left as it was.
    pub fn replace_function(&self, path: &Path, function: &str, replacement: &str) -> Result<PatchReport> {
        let source = fs::read_to_string(path)?;
        let span = locate_definition(&source, function).map_err(|e| match e {
            LocateError::NotFound(_) => MendError::DefinitionNotFound {
                file: path.display().to_string(),
                function: function.to_string(),
            },
            other => MendError::Persist {
                path: path.display().to_string(),
                reason: other.to_string(),
            },
        })?;

        let changed = span.text(&source) != replacement;
        if changed {
            let mut patched = String::with_capacity(source.len() + replacement.len());
            patched.push_str(&source[..span.start]);
            patched.push_str(replacement);
            patched.push_str(&source[span.end..]);
            write_atomic(path, patched.as_bytes())?;
        }

        info!(
            file = %path.display(),
            function,
            start_line = span.start_line,
            end_line = span.end_line,
            changed,
            "Patched definition"
        );

        Ok(PatchReport {
            path: path.to_path_buf(),
            function: function.to_string(),
            start_line: span.start_line,
            end_line: span.end_line,
            method: span.method,
            changed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SOURCE: &str = "# calculator\n\n@heal\nfn divide(a, b) {\n    return a / b;\n}\n\nfn double(x) {\n    return x * 2;\n}\n";

    fn write(dir: &TempDir, text: &str) -> PathBuf {
        let path = dir.path().join("calc.mend");
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_replaces_only_the_definition() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, SOURCE);

        let fixed = "@heal\nfn divide(a, b) {\n    if b == 0 { return 0; }\n    return a / b;\n}";
        let report = SourcePatcher::new().replace_function(&path, "divide", fixed).unwrap();

        assert!(report.changed);
        assert_eq!((report.start_line, report.end_line), (3, 6));
        assert_eq!(report.method, LocateMethod::Structural);

        let expected = SOURCE.replace("@heal\nfn divide(a, b) {\n    return a / b;\n}", fixed);
        assert_eq!(fs::read_to_string(&path).unwrap(), expected);
    }

    #[test]
    fn test_noop_patch_is_byte_identical() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, SOURCE);
        let current = "@heal\nfn divide(a, b) {\n    return a / b;\n}";

        let report = SourcePatcher::new().replace_function(&path, "divide", current).unwrap();
        assert!(!report.changed);
        assert_eq!(fs::read(&path).unwrap(), SOURCE.as_bytes());
    }

    #[test]
    fn test_missing_definition_fails_without_writing() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, SOURCE);

        let err = SourcePatcher::new().replace_function(&path, "gone", "fn gone() {}").unwrap_err();
        assert!(matches!(err, MendError::DefinitionNotFound { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), SOURCE);
    }

    #[test]
    fn test_patches_file_that_no_longer_parses() {
        let dir = TempDir::new().unwrap();
        let broken = format!("{}fn half( {{\n", SOURCE);
        let path = write(&dir, &broken);

        let report = SourcePatcher::new()
            .replace_function(&path, "double", "fn double(x) { return x + x; }")
            .unwrap();
        assert_eq!(report.method, LocateMethod::Heuristic);
        assert!(fs::read_to_string(&path).unwrap().contains("fn double(x) { return x + x; }\nfn half( {"));
    }
}
