//! The fix oracle: an external service asked to rewrite a failing definition.

pub mod prompt;
pub mod provider;

pub use prompt::{LANGUAGE_PRIMER, build_analysis_prompt, build_fix_prompt};
pub use provider::ProviderOracle;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// One request for a replacement definition.
#[derive(Debug, Clone)]
pub struct FixRequest {
    pub system_prompt: String,
    pub prompt: String,
    pub function_name: String,
    pub attempt: u32,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum OracleError {
    #[error("oracle unavailable: {0}")]
    Unavailable(String),

    #[error("oracle did not answer within {0:?}")]
    Timeout(Duration),

    #[error("oracle returned an empty response")]
    EmptyResponse,
}

/// Anything that can propose replacement source text for a failing function.
///
/// The returned text is untrusted and goes through validation before use.
#[async_trait]
pub trait FixOracle: Send + Sync {
    async fn propose_fix(&self, request: &FixRequest) -> Result<String, OracleError>;
}
