use crate::script::ast::FunctionDef;
use crate::script::fault::SyntaxError;
use crate::script::parser::parse_source;
use std::collections::HashMap;
use std::sync::Arc;

/// A parsed source file: its text plus addressable definitions.
#[derive(Debug)]
pub struct CompiledUnit {
    pub name: String,
    /// Label used in frames; the file path for disk-backed units.
    pub file: String,
    pub source: String,
    definitions: Vec<Arc<FunctionDef>>,
    index: HashMap<String, usize>,
}

impl CompiledUnit {
    pub fn compile(
        name: impl Into<String>,
        file: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<Self, SyntaxError> {
        let source = source.into();
        let parsed = parse_source(&source)?;
        let definitions: Vec<Arc<FunctionDef>> = parsed.definitions.into_iter().map(Arc::new).collect();
        let index = definitions
            .iter()
            .enumerate()
            .map(|(i, def)| (def.name.clone(), i))
            .collect();

        Ok(Self {
            name: name.into(),
            file: file.into(),
            source,
            definitions,
            index,
        })
    }

    pub fn definition(&self, name: &str) -> Option<&Arc<FunctionDef>> {
        self.index.get(name).map(|i| &self.definitions[*i])
    }

    pub fn definitions(&self) -> &[Arc<FunctionDef>] {
        &self.definitions
    }

    pub fn definition_names(&self) -> Vec<String> {
        self.definitions.iter().map(|d| d.name.clone()).collect()
    }

    pub fn marked_definitions(&self) -> impl Iterator<Item = &Arc<FunctionDef>> {
        self.definitions.iter().filter(|d| d.is_marked())
    }

    /// Trimmed text of a 1-based line.
    pub fn line_text(&self, line: usize) -> Option<String> {
        line.checked_sub(1)
            .and_then(|i| self.source.lines().nth(i))
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
    }
}
