use crate::config::{MendConfig, PromptRole, SystemPrompts};
use crate::error::{MendError, Result};
use crate::oracle::{FixOracle, FixRequest, OracleError};
use crate::providers::retry::retry_with_backoff;
use crate::providers::{CompletionRequest, Message, Provider, create_provider};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_MAX_RETRIES: u32 = 2;
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(500);
const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_TEMPERATURE: f32 = 0.2;

/// Oracle backed by one of the configured AI providers.
pub struct ProviderOracle {
    provider: Arc<dyn Provider>,
    model: String,
    prompts: SystemPrompts,
    timeout: Duration,
    max_retries: u32,
    max_tokens: u32,
    temperature: f32,
}

impl ProviderOracle {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, prompts: SystemPrompts, timeout: Duration) -> Self {
        Self {
            provider,
            model: model.into(),
            prompts,
            timeout,
            max_retries: DEFAULT_MAX_RETRIES,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn from_config(config: &MendConfig) -> Result<Self> {
        config.validate_provider()?;
        let settings = config.provider_config();
        let provider = create_provider(config.ai_provider, &settings)?;
        let model = settings
            .model
            .clone()
            .unwrap_or_else(|| provider.info().default_model);

        info!(provider = %config.ai_provider, model = %model, "Using fix oracle");

        let mut oracle = Self::new(provider, model, config.system_prompts.clone(), config.oracle_timeout());
        if let Some(max_tokens) = settings.max_tokens {
            oracle.max_tokens = max_tokens;
        }
        if let Some(temperature) = settings.temperature {
            oracle.temperature = temperature;
        }
        Ok(oracle)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send `prompt` with the system prompt of `role`, bounded by the oracle timeout.
    pub async fn ask(&self, role: PromptRole, prompt: &str) -> std::result::Result<String, OracleError> {
        self.send(self.prompts.for_role(role), prompt).await
    }

    async fn send(&self, system_prompt: &str, prompt: &str) -> std::result::Result<String, OracleError> {
        let request = CompletionRequest {
            model: self.model.clone(),
            messages: vec![Message::system(system_prompt), Message::user(prompt)],
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
        };

        let call = retry_with_backoff(self.max_retries, INITIAL_RETRY_DELAY, || {
            self.provider.complete(request.clone())
        });

        let response = match tokio::time::timeout(self.timeout, call).await {
            Err(_) => return Err(OracleError::Timeout(self.timeout)),
            Ok(Err(e)) => return Err(oracle_error(e)),
            Ok(Ok(response)) => response,
        };

        if let Some(usage) = &response.usage {
            debug!(
                model = %response.model,
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Oracle responded"
            );
        }

        if response.content.trim().is_empty() {
            return Err(OracleError::EmptyResponse);
        }
        Ok(response.content)
    }
}

fn oracle_error(err: MendError) -> OracleError {
    OracleError::Unavailable(err.to_string())
}

#[async_trait]
impl FixOracle for ProviderOracle {
    async fn propose_fix(&self, request: &FixRequest) -> std::result::Result<String, OracleError> {
        debug!(function = %request.function_name, attempt = request.attempt, "Requesting fix");
        self.send(&request.system_prompt, &request.prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{CompletionResponse, ProviderInfo};
    use std::sync::Mutex;

    struct ScriptedProvider {
        replies: Mutex<Vec<Result<String>>>,
        delay: Duration,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                delay: Duration::ZERO,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                name: "scripted".into(),
                display_name: "Scripted".into(),
                default_model: "test-model".into(),
            }
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
            self.seen.lock().unwrap().push(request.clone());
            tokio::time::sleep(self.delay).await;
            let reply = self.replies.lock().unwrap().remove(0)?;
            Ok(CompletionResponse {
                id: "1".into(),
                model: request.model,
                content: reply,
                finish_reason: None,
                usage: None,
            })
        }

        fn is_authenticated(&self) -> bool {
            true
        }
    }

    fn prompts() -> SystemPrompts {
        SystemPrompts {
            code_fixer: "You fix code.".into(),
            analyzer: "You analyze.".into(),
            report: "You report.".into(),
        }
    }

    fn request() -> FixRequest {
        FixRequest {
            system_prompt: "You fix code.".into(),
            prompt: "fix divide".into(),
            function_name: "divide".into(),
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn test_propose_fix_sends_system_and_user_messages() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok("fn divide() {}".into())]));
        let oracle = ProviderOracle::new(provider.clone(), "m", prompts(), Duration::from_secs(5));

        let reply = oracle.propose_fix(&request()).await.unwrap();
        assert_eq!(reply, "fn divide() {}");

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen[0].messages[0].content, "You fix code.");
        assert_eq!(seen[0].messages[1].content, "fix divide");
        assert_eq!(seen[0].model, "m");
    }

    #[tokio::test]
    async fn test_blank_reply_is_empty_response() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok("  \n".into())]));
        let oracle = ProviderOracle::new(provider, "m", prompts(), Duration::from_secs(5));
        assert_eq!(oracle.propose_fix(&request()).await, Err(OracleError::EmptyResponse));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(MendError::ApiRequest("503 Service Unavailable".into())),
            Ok("fn divide() {}".into()),
        ]));
        let oracle = ProviderOracle::new(provider.clone(), "m", prompts(), Duration::from_secs(5));
        assert!(oracle.propose_fix(&request()).await.is_ok());
        assert_eq!(provider.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_retries_can_be_disabled() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(MendError::ApiRequest("503 Service Unavailable".into())),
            Ok("fn divide() {}".into()),
        ]));
        let oracle =
            ProviderOracle::new(provider.clone(), "m", prompts(), Duration::from_secs(5)).with_max_retries(0);
        assert!(matches!(oracle.propose_fix(&request()).await, Err(OracleError::Unavailable(_))));
        assert_eq!(provider.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_auth_error_maps_to_unavailable() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(MendError::Authentication("no key".into()))]));
        let oracle = ProviderOracle::new(provider, "m", prompts(), Duration::from_secs(5));
        assert!(matches!(oracle.propose_fix(&request()).await, Err(OracleError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_slow_provider_times_out() {
        let mut provider = ScriptedProvider::new(vec![Ok("late".into())]);
        provider.delay = Duration::from_millis(200);
        let oracle = ProviderOracle::new(Arc::new(provider), "m", prompts(), Duration::from_millis(20));
        assert!(matches!(oracle.propose_fix(&request()).await, Err(OracleError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_ask_uses_role_prompt() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok("root cause".into())]));
        let oracle = ProviderOracle::new(provider.clone(), "m", prompts(), Duration::from_secs(5));
        assert_eq!(oracle.ask(PromptRole::Analyzer, "why").await.unwrap(), "root cause");
        assert_eq!(provider.seen.lock().unwrap()[0].messages[0].content, "You analyze.");
    }
}
