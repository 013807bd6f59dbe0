use crate::error::{MendError, Result};
use config::{Config, Environment, File, FileFormat};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "mend.toml";
pub const CONFIG_ENV_VAR: &str = "MEND_CONFIG";

/// Settings for one run of the healer.
///
/// The first block of fields has no serde default on purpose: a config file
/// that omits any of them fails to load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MendConfig {
    pub ai_provider: ProviderType,
    pub max_attempts: u32,
    pub debug: bool,
    pub auto_fix: bool,
    pub backup_enabled: bool,
    pub save_exceptions: bool,
    pub system_prompts: SystemPrompts,

    #[serde(default = "default_backup_folder")]
    pub backup_folder: PathBuf,

    #[serde(default = "default_exceptions_folder")]
    pub exceptions_folder: PathBuf,

    /// Where accepted fixes are saved; `_mend_fixes/` next to the source file when unset.
    #[serde(default)]
    pub fixes_folder: Option<PathBuf>,

    #[serde(default = "default_oracle_timeout")]
    pub oracle_timeout_secs: u64,

    #[serde(default)]
    pub require_backup: bool,

    #[serde(default)]
    pub save_rejected_fixes: bool,

    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemPrompts {
    pub code_fixer: String,
    pub analyzer: String,
    pub report: String,
}

/// Which system prompt a request is sent with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptRole {
    CodeFixer,
    Analyzer,
    Report,
}

impl SystemPrompts {
    pub fn for_role(&self, role: PromptRole) -> &str {
        match role {
            PromptRole::CodeFixer => &self.code_fixer,
            PromptRole::Analyzer => &self.analyzer,
            PromptRole::Report => &self.report,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    /// Endpoint root: API base for OpenAI-compatible servers, resource
    /// endpoint for Azure, host for Ollama.
    pub base_url: Option<String>,
    pub model: Option<String>,
    /// Azure deployment name.
    pub deployment: Option<String>,
    pub api_version: Option<String>,
    pub organization: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    Anthropic,
    Openai,
    Azure,
    Litellm,
    Ollama,
}

impl ProviderType {
    pub fn key(&self) -> &'static str {
        match self {
            ProviderType::Anthropic => "anthropic",
            ProviderType::Openai => "openai",
            ProviderType::Azure => "azure",
            ProviderType::Litellm => "litellm",
            ProviderType::Ollama => "ollama",
        }
    }

    /// Environment variables consulted, in order, when no api_key is configured.
    pub fn api_key_vars(&self) -> &'static [&'static str] {
        match self {
            ProviderType::Anthropic => &["ANTHROPIC_API_KEY"],
            ProviderType::Openai => &["OPENAI_API_KEY"],
            ProviderType::Azure => &["AZURE_OPENAI_API_KEY", "AZURE_API_KEY"],
            ProviderType::Litellm => &["LITELLM_API_KEY"],
            ProviderType::Ollama => &[],
        }
    }

    fn base_url_var(&self) -> Option<&'static str> {
        match self {
            ProviderType::Azure => Some("AZURE_OPENAI_ENDPOINT"),
            ProviderType::Litellm => Some("LITELLM_API_BASE"),
            ProviderType::Ollama => Some("OLLAMA_HOST"),
            ProviderType::Anthropic | ProviderType::Openai => None,
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

fn default_backup_folder() -> PathBuf {
    PathBuf::from("./mend_backups")
}

fn default_exceptions_folder() -> PathBuf {
    PathBuf::from("./mend_exceptions")
}

fn default_oracle_timeout() -> u64 {
    120
}

impl MendConfig {
    /// Check the core settings. Runs before any function is wrapped.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(MendError::Configuration(
                "max_attempts must be a positive integer".to_string(),
            ));
        }

        for (key, prompt) in [
            ("code_fixer", &self.system_prompts.code_fixer),
            ("analyzer", &self.system_prompts.analyzer),
            ("report", &self.system_prompts.report),
        ] {
            if prompt.trim().is_empty() {
                return Err(MendError::Configuration(format!(
                    "system_prompts.{} must not be empty",
                    key
                )));
            }
        }

        if self.oracle_timeout_secs == 0 {
            return Err(MendError::Configuration(
                "oracle_timeout_secs must be greater than zero".to_string(),
            ));
        }

        for (key, folder) in [
            ("backup_folder", &self.backup_folder),
            ("exceptions_folder", &self.exceptions_folder),
        ] {
            if folder.as_os_str().is_empty() {
                return Err(MendError::Configuration(format!("{} must not be empty", key)));
            }
        }

        Ok(())
    }

    /// Check that the selected provider has what it needs to make requests.
    pub fn validate_provider(&self) -> Result<()> {
        let provider = self.provider_config();
        let name = self.ai_provider.key();
        let missing = |field: &str, hint: String| {
            MendError::ProviderNotConfigured(format!(
                "{}: {} is missing (set providers.{}.{}{})",
                name, field, name, field, hint
            ))
        };
        let key_hint = match self.ai_provider.api_key_vars() {
            [] => String::new(),
            vars => format!(" or {}", vars.join("/")),
        };

        match self.ai_provider {
            ProviderType::Anthropic | ProviderType::Openai => {
                if provider.api_key.is_none() {
                    return Err(missing("api_key", key_hint));
                }
            }
            ProviderType::Azure => {
                if provider.api_key.is_none() {
                    return Err(missing("api_key", key_hint));
                }
                if provider.base_url.is_none() {
                    return Err(missing("base_url", " or AZURE_OPENAI_ENDPOINT".to_string()));
                }
                if provider.deployment.is_none() {
                    return Err(missing("deployment", String::new()));
                }
            }
            ProviderType::Litellm => {
                if provider.model.is_none() {
                    return Err(missing("model", String::new()));
                }
            }
            ProviderType::Ollama => {}
        }

        Ok(())
    }

    /// Settings of the selected provider, empty when the table is absent.
    pub fn provider_config(&self) -> ProviderConfig {
        self.providers
            .get(self.ai_provider.key())
            .cloned()
            .unwrap_or_default()
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle_timeout_secs)
    }

    /// Fill unset secrets of the selected provider from well-known environment variables.
    pub fn apply_env_secrets(&mut self) {
        self.apply_secrets_from(|var| std::env::var(var).ok().filter(|v| !v.is_empty()));
    }

    fn apply_secrets_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let provider = self.ai_provider;
        let entry = self.providers.entry(provider.key().to_string()).or_default();

        if entry.api_key.is_none() {
            entry.api_key = provider.api_key_vars().iter().find_map(|var| lookup(var));
        }
        if entry.base_url.is_none() {
            entry.base_url = provider.base_url_var().and_then(|var| lookup(var));
        }
    }

    /// Copy with secrets masked, for display.
    pub fn redacted(&self) -> MendConfig {
        let mut copy = self.clone();
        for provider in copy.providers.values_mut() {
            if provider.api_key.is_some() {
                provider.api_key = Some("********".to_string());
            }
        }
        copy
    }
}

pub struct ConfigManager {
    config: MendConfig,
    config_path: PathBuf,
}

impl ConfigManager {
    /// Load from `explicit`, else `$MEND_CONFIG`, else `./mend.toml`, else the
    /// platform config directory.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config_path = Self::resolve_path(explicit)?;
        if !config_path.exists() {
            return Err(MendError::Configuration(format!(
                "no configuration found at {} (run `mend config init` to create one)",
                config_path.display()
            )));
        }
        let config = Self::from_path(&config_path)?;

        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn get(&self) -> &MendConfig {
        &self.config
    }

    pub fn into_config(self) -> MendConfig {
        self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Ok(local);
        }
        Self::default_config_path()
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("com", "mend", "mend").ok_or_else(|| {
            MendError::Configuration("Could not determine config directory".to_string())
        })?;

        Ok(project_dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Read a config file, apply `MEND_*` environment overrides and secret
    /// fallbacks, then validate.
    pub fn from_path(path: &Path) -> Result<MendConfig> {
        let settings = Config::builder()
            .add_source(File::from(path.to_path_buf()).format(FileFormat::Toml))
            .add_source(
                Environment::with_prefix("MEND")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| MendError::Configuration(format!("Failed to build config: {}", e)))?;

        Self::finish(settings)
    }

    /// Parse TOML text without consulting the environment for overrides.
    pub fn from_toml_str(text: &str) -> Result<MendConfig> {
        let settings = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()
            .map_err(|e| MendError::Configuration(format!("Failed to build config: {}", e)))?;

        let config: MendConfig = settings
            .try_deserialize()
            .map_err(|e| MendError::Configuration(format!("Failed to deserialize config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn finish(settings: Config) -> Result<MendConfig> {
        let mut config: MendConfig = settings
            .try_deserialize()
            .map_err(|e| MendError::Configuration(format!("Failed to deserialize config: {}", e)))?;
        config.apply_env_secrets();
        config.validate()?;
        Ok(config)
    }

    /// Write the template to `path`, refusing to overwrite an existing file.
    pub fn write_template(path: &Path) -> Result<()> {
        if path.exists() {
            return Err(MendError::Configuration(format!(
                "{} already exists",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, TEMPLATE)?;
        Ok(())
    }
}

pub const TEMPLATE: &str = r#"# mend configuration
#
# Every key in the first block is required.

# One of: anthropic, openai, azure, litellm, ollama
ai_provider = "anthropic"
max_attempts = 3
debug = false
auto_fix = true
backup_enabled = true
save_exceptions = true

# Optional settings (defaults shown)
# backup_folder = "./mend_backups"
# exceptions_folder = "./mend_exceptions"
# fixes_folder = "./mend_fixes"      # default: _mend_fixes/ next to the source file
# oracle_timeout_secs = 120
# require_backup = false
# save_rejected_fixes = false

[system_prompts]
code_fixer = "You are a code fixing assistant for the mend scripting language. Reply with only the corrected function definition, without explanations."
analyzer = "You are an error analysis assistant. Explain the error clearly and concisely and suggest how to fix it."
report = "You are an error reporting assistant. Write a detailed report of the error, its cause and the applied fix."

[providers.anthropic]
model = "claude-3-5-sonnet-20241022"
# api_key = "..."            # or ANTHROPIC_API_KEY

[providers.openai]
model = "gpt-4o"
# api_key = "..."            # or OPENAI_API_KEY
# organization = "..."

[providers.azure]
# base_url = "https://<resource>.openai.azure.com"   # or AZURE_OPENAI_ENDPOINT
# deployment = "gpt-4o-mini"
api_version = "2024-02-01"
# api_key = "..."            # or AZURE_OPENAI_API_KEY / AZURE_API_KEY

[providers.litellm]
model = "gpt-4"
# base_url = "http://localhost:4000"   # or LITELLM_API_BASE
# api_key = "..."            # or LITELLM_API_KEY

[providers.ollama]
base_url = "http://localhost:11434"
model = "llama3"
timeout_secs = 120
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
ai_provider = "ollama"
max_attempts = 3
debug = false
auto_fix = true
backup_enabled = true
save_exceptions = false

[system_prompts]
code_fixer = "fix"
analyzer = "analyze"
report = "report"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = ConfigManager::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.ai_provider, ProviderType::Ollama);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.backup_folder, PathBuf::from("./mend_backups"));
        assert_eq!(config.exceptions_folder, PathBuf::from("./mend_exceptions"));
        assert_eq!(config.fixes_folder, None);
        assert_eq!(config.oracle_timeout(), Duration::from_secs(120));
        assert!(!config.require_backup);
        assert!(!config.save_rejected_fixes);
    }

    #[test]
    fn test_template_is_loadable() {
        let config = ConfigManager::from_toml_str(TEMPLATE).unwrap();
        assert_eq!(config.ai_provider, ProviderType::Anthropic);
        assert_eq!(
            config.provider_config().model.as_deref(),
            Some("claude-3-5-sonnet-20241022")
        );
    }

    #[test]
    fn test_missing_required_key_is_rejected() {
        let text = MINIMAL.replace("auto_fix = true\n", "");
        let err = ConfigManager::from_toml_str(&text).unwrap_err();
        assert!(err.to_string().contains("auto_fix"), "{}", err);
    }

    #[test]
    fn test_max_attempts_must_be_positive_integer() {
        let zero = MINIMAL.replace("max_attempts = 3", "max_attempts = 0");
        assert!(matches!(
            ConfigManager::from_toml_str(&zero),
            Err(MendError::Configuration(_))
        ));

        let word = MINIMAL.replace("max_attempts = 3", "max_attempts = \"three\"");
        assert!(ConfigManager::from_toml_str(&word).is_err());
    }

    #[test]
    fn test_system_prompt_keys_are_required() {
        let text = MINIMAL.replace("report = \"report\"\n", "");
        assert!(ConfigManager::from_toml_str(&text).is_err());

        let blank = MINIMAL.replace("report = \"report\"", "report = \"  \"");
        let err = ConfigManager::from_toml_str(&blank).unwrap_err();
        assert!(err.to_string().contains("system_prompts.report"));
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        let text = MINIMAL.replace("\"ollama\"", "\"gemini\"");
        assert!(ConfigManager::from_toml_str(&text).is_err());
    }

    #[test]
    fn test_secret_fallback_and_provider_validation() {
        let text = MINIMAL.replace("\"ollama\"", "\"azure\"");
        let mut config = ConfigManager::from_toml_str(&text).unwrap();
        assert!(matches!(
            config.validate_provider(),
            Err(MendError::ProviderNotConfigured(_))
        ));

        config.apply_secrets_from(|var| match var {
            "AZURE_API_KEY" => Some("secret".to_string()),
            "AZURE_OPENAI_ENDPOINT" => Some("https://example.openai.azure.com".to_string()),
            _ => None,
        });
        let provider = config.provider_config();
        assert_eq!(provider.api_key.as_deref(), Some("secret"));
        assert_eq!(provider.base_url.as_deref(), Some("https://example.openai.azure.com"));

        let err = config.validate_provider().unwrap_err();
        assert!(err.to_string().contains("deployment"));

        config
            .providers
            .get_mut("azure")
            .unwrap()
            .deployment = Some("gpt-4o-mini".to_string());
        config.validate_provider().unwrap();
        assert_eq!(
            config.redacted().provider_config().api_key.as_deref(),
            Some("********")
        );
    }

    #[test]
    fn test_write_template_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
        ConfigManager::write_template(&path).unwrap();
        assert!(ConfigManager::write_template(&path).is_err());

        let config = ConfigManager::from_path(&path).unwrap();
        assert_eq!(config.max_attempts, 3);
    }
}
