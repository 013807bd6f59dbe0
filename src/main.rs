use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use mend::capture::ExceptionStore;
use mend::config::{ConfigManager, PromptRole};
use mend::oracle::{ProviderOracle, build_analysis_prompt};
use mend::repair::BackupManager;
use mend::script::parse_source;
use mend::{CallArgs, CallOutcome, Healer, ModuleRegistry, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ============================================================================
// CLI Argument Parsing
// ============================================================================

#[derive(Parser)]
#[command(name = "mend", version, about = "mend - self-repairing script functions")]
struct Cli {
    /// Output JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (defaults to $MEND_CONFIG, ./mend.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a function from a script, repairing it if it fails
    Run {
        /// Script file
        file: PathBuf,
        /// Function to call
        function: String,
        /// Positional arguments (JSON literals; anything else is a string)
        args: Vec<String>,
        /// Keyword argument as name=value (repeatable)
        #[arg(long = "kw", value_name = "NAME=VALUE")]
        kwargs: Vec<String>,
    },
    /// Parse a script and list its definitions
    Check {
        file: PathBuf,
    },
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Copy a backup back over a source file
    Restore {
        backup: PathBuf,
        target: PathBuf,
    },
    /// Ask the oracle to explain a saved exception record
    Explain {
        record: PathBuf,
        /// Write an incident report instead of a root-cause analysis
        #[arg(long)]
        report: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a configuration template
    Init,
    /// Validate the configuration, including provider credentials
    Check,
    /// Print the effective configuration with secrets masked
    Show,
}

/// JSON envelope for non-interactive output
fn json_output(success: bool, data: serde_json::Value, error: Option<&str>) -> String {
    serde_json::json!({
        "success": success,
        "data": data,
        "error": error,
    })
    .to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Check for --json flag before initializing logging
    let json_mode = std::env::args().any(|arg| arg == "--json");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mend=info"));

    if json_mode {
        // Keep stdout for the JSON envelope
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_ansi(false)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    } else if std::env::var("MEND_LOG_JSON").is_ok() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    }

    let cli = Cli::parse();
    let json = cli.json;

    if let Err(e) = run_command(cli).await {
        if json {
            println!("{}", json_output(false, serde_json::Value::Null, Some(&format!("{:#}", e))));
            std::process::exit(1);
        }
        return Err(e);
    }
    Ok(())
}

// ============================================================================
// Command Runner
// ============================================================================

async fn run_command(cli: Cli) -> Result<()> {
    let json_mode = cli.json;
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Run {
            file,
            function,
            args,
            kwargs,
        } => run_function(config_path, &file, &function, &args, &kwargs, json_mode).await,
        Commands::Check { file } => check_script(&file, json_mode),
        Commands::Config { action } => config_command(action, config_path, json_mode),
        Commands::Restore { backup, target } => {
            BackupManager::restore(&backup, &target)
                .with_context(|| format!("restoring {} from {}", target.display(), backup.display()))?;
            if json_mode {
                println!(
                    "{}",
                    json_output(
                        true,
                        serde_json::json!({
                            "backup": backup.display().to_string(),
                            "target": target.display().to_string(),
                        }),
                        None
                    )
                );
            } else {
                println!("Restored {} from {}", target.display(), backup.display());
            }
            Ok(())
        }
        Commands::Explain { record, report } => explain_record(config_path, &record, report, json_mode).await,
    }
}

fn parse_call_args(args: &[String], kwargs: &[String]) -> Result<CallArgs> {
    let mut call = CallArgs::positional(args.iter().map(|a| Value::parse_literal(a)));
    for pair in kwargs {
        let Some((name, value)) = pair.split_once('=') else {
            bail!("keyword argument `{}` must look like name=value", pair);
        };
        call = call.kwarg(name.trim(), Value::parse_literal(value));
    }
    Ok(call)
}

async fn run_function(
    config_path: Option<&Path>,
    file: &Path,
    function: &str,
    args: &[String],
    kwargs: &[String],
    json_mode: bool,
) -> Result<()> {
    let manager = ConfigManager::load(config_path)?;
    let config = manager.into_config();

    let registry = Arc::new(ModuleRegistry::new());
    let module = registry
        .load_file(file)
        .with_context(|| format!("loading {}", file.display()))?;

    let oracle = Arc::new(ProviderOracle::from_config(&config)?);
    let healer = Arc::new(Healer::new(config, registry, oracle)?);
    let healed = healer.wrap(module.name(), function)?;

    let call_args = parse_call_args(args, kwargs)?;
    let outcome = healed.call(call_args).await;

    match &outcome {
        CallOutcome::Completed(value) => {
            if json_mode {
                println!(
                    "{}",
                    json_output(true, serde_json::json!({ "result": value.to_json(), "recovered": false }), None)
                );
            } else {
                println!("{}", value.repr());
            }
        }
        CallOutcome::Recovered { value, fix } => {
            if json_mode {
                println!(
                    "{}",
                    json_output(
                        true,
                        serde_json::json!({
                            "result": value.to_json(),
                            "recovered": true,
                            "event_id": fix.event_id,
                            "file": fix.file.display().to_string(),
                            "backup": fix.backup_path.as_ref().map(|p| p.display().to_string()),
                            "attempts": fix.attempts,
                            "module_version": fix.module_version,
                        }),
                        None
                    )
                );
            } else {
                println!("{}", value.repr());
                eprintln!(
                    "Recovered: {} was patched in {} (attempt {})",
                    healed.qualified_name(),
                    fix.file.display(),
                    fix.attempts
                );
                if let Some(backup) = &fix.backup_path {
                    eprintln!("Backup: {}", backup.display());
                }
            }
        }
        CallOutcome::Unrecovered { failure } => {
            if json_mode {
                println!(
                    "{}",
                    json_output(
                        false,
                        serde_json::json!({ "result": null, "stage": failure.stage() }),
                        Some(&failure.to_string())
                    )
                );
            } else {
                eprintln!("Unrecovered ({}): {}", failure.stage(), failure);
            }
            std::process::exit(1);
        }
    }
    Ok(())
}

fn check_script(file: &Path, json_mode: bool) -> Result<()> {
    let source = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let parsed = parse_source(&source).with_context(|| format!("parsing {}", file.display()))?;

    if json_mode {
        let definitions: Vec<serde_json::Value> = parsed
            .definitions
            .iter()
            .map(|def| {
                serde_json::json!({
                    "name": def.name,
                    "line": def.header_line,
                    "params": def.param_names(),
                    "healed": def.is_marked(),
                })
            })
            .collect();
        println!("{}", json_output(true, serde_json::json!({ "definitions": definitions }), None));
    } else {
        println!("{}: {} definition(s)", file.display(), parsed.definitions.len());
        for def in &parsed.definitions {
            let marker = if def.is_marked() { " @heal" } else { "" };
            println!("  line {:>4}  {}{}", def.header_line, def.signature(&source), marker);
        }
    }
    Ok(())
}

fn config_command(action: ConfigAction, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    match action {
        ConfigAction::Init => {
            let path = match config_path {
                Some(p) => p.to_path_buf(),
                None => ConfigManager::default_config_path()?,
            };
            ConfigManager::write_template(&path)?;
            if json_mode {
                println!("{}", json_output(true, serde_json::json!({ "path": path.display().to_string() }), None));
            } else {
                println!("Wrote configuration template to {}", path.display());
            }
        }
        ConfigAction::Check => {
            let manager = ConfigManager::load(config_path)?;
            manager.get().validate_provider()?;
            if json_mode {
                println!(
                    "{}",
                    json_output(
                        true,
                        serde_json::json!({
                            "path": manager.config_path().display().to_string(),
                            "provider": manager.get().ai_provider.key(),
                        }),
                        None
                    )
                );
            } else {
                println!(
                    "{} is valid (provider: {})",
                    manager.config_path().display(),
                    manager.get().ai_provider
                );
            }
        }
        ConfigAction::Show => {
            let manager = ConfigManager::load(config_path)?;
            let redacted = manager.get().redacted();
            if json_mode {
                println!("{}", json_output(true, serde_json::to_value(&redacted)?, None));
            } else {
                println!("# {}", manager.config_path().display());
                print!("{}", toml::to_string_pretty(&redacted)?);
            }
        }
    }
    Ok(())
}

async fn explain_record(config_path: Option<&Path>, record: &Path, report: bool, json_mode: bool) -> Result<()> {
    let context = ExceptionStore::load(record).with_context(|| format!("reading {}", record.display()))?;
    let config = ConfigManager::load(config_path)?.into_config();
    let oracle = ProviderOracle::from_config(&config)?;

    let role = if report { PromptRole::Report } else { PromptRole::Analyzer };
    let prompt = build_analysis_prompt(&context, role);
    let answer = oracle.ask(role, &prompt).await?;

    if json_mode {
        println!(
            "{}",
            json_output(
                true,
                serde_json::json!({
                    "event_id": context.event_id,
                    "function": context.function_info.qualified_name,
                    "explanation": answer,
                }),
                None
            )
        );
    } else {
        println!("{}", answer);
    }
    Ok(())
}
