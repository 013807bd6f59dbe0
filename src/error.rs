use crate::script::SyntaxError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MendError {
    #[error("API request failed: {0}")]
    ApiRequest(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(String),

    #[error("Syntax error in {file}: {source}")]
    Syntax {
        file: String,
        #[source]
        source: SyntaxError,
    },

    #[error("Module `{0}` is not loaded")]
    ModuleNotLoaded(String),

    #[error("Module `{0}` has no backing file")]
    NoBackingFile(String),

    #[error("Function `{function}` not found in {file}")]
    DefinitionNotFound { file: String, function: String },

    #[error("Failed to write {path}: {reason}")]
    Persist { path: String, reason: String },

    #[error("Timed out after {secs}s waiting for the lock on {path}")]
    LockTimeout { path: String, secs: u64 },

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

pub type Result<T> = std::result::Result<T, MendError>;

/// Why a failure event ended without a usable result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HealFailure {
    #[error("function unavailable: {0}")]
    Unresolvable(String),

    #[error("oracle unavailable: {0}")]
    OracleUnavailable(String),

    #[error("fix rejected: {0}")]
    ValidationRejected(String),

    #[error("all {attempts} fix attempts failed (last: {last})")]
    AttemptsExhausted { attempts: u32, last: String },

    #[error("auto-fix disabled, fix was not applied")]
    AutoFixDisabled,

    #[error("backup failed: {0}")]
    BackupFailed(String),

    #[error("patch failed: {0}")]
    PatchFailed(String),

    #[error("reload of module `{module}` from {path} failed: {reason}")]
    ReloadFailed {
        module: String,
        path: String,
        reason: String,
    },

    #[error("fixed function still fails: {0}")]
    ReinvokeFailed(String),
}

impl HealFailure {
    /// Pipeline stage the failure belongs to, used as a structured log field.
    pub fn stage(&self) -> &'static str {
        match self {
            HealFailure::Unresolvable(_) => "resolve",
            HealFailure::OracleUnavailable(_) => "oracle",
            HealFailure::ValidationRejected(_) => "validate",
            HealFailure::AttemptsExhausted { .. } => "attempts",
            HealFailure::AutoFixDisabled => "auto_fix",
            HealFailure::BackupFailed(_) => "backup",
            HealFailure::PatchFailed(_) => "patch",
            HealFailure::ReloadFailed { .. } => "reload",
            HealFailure::ReinvokeFailed(_) => "reinvoke",
        }
    }
}
