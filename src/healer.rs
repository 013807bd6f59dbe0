//! Healer - runs instrumented functions and repairs them when they fail
//!
//! A failing call goes through capture, oracle, validation, backup, patch and
//! reload, then the original call is retried against the new definition. Any
//! stage that fails ends the event with a neutral result; nothing is raised
//! past the healer.

use crate::capture::{ContextCapturer, ExecutionContext};
use crate::config::MendConfig;
use crate::error::{HealFailure, MendError, Result};
use crate::oracle::{FixOracle, FixRequest, build_fix_prompt};
use crate::repair::{AcceptedFix, BackupManager, FileLocks, FixSaver, FixValidator, SourcePatcher};
use crate::runtime::{LoadedModule, ModuleRegistry};
use crate::script::{CallArgs, ScriptError, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Status of a failure event as it moves through the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum HealingStatus {
    Running,
    Failed,
    ContextCaptured,
    FixProposed { attempt: u32 },
    FixRejected { attempt: u32, reason: String },
    FixAccepted { attempt: u32 },
    BackedUp,
    Patched,
    Reloaded,
    Recovered,
    ReloadFailed,
    Unrecovered,
}

/// Events emitted by the healer
#[derive(Debug, Clone)]
pub enum HealerEvent {
    StatusChanged {
        event_id: String,
        function: String,
        status: HealingStatus,
    },
    FixApplied {
        event_id: String,
        fix: AppliedFix,
    },
}

/// A fix that was written to disk and loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedFix {
    pub event_id: String,
    pub file: PathBuf,
    pub function: String,
    pub code: String,
    pub backup_path: Option<PathBuf>,
    pub module_version: u64,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// The call succeeded without help.
    Completed(Value),
    /// The call failed, was fixed, and the retry succeeded.
    Recovered { value: Value, fix: AppliedFix },
    /// The call failed and no usable result exists.
    Unrecovered { failure: HealFailure },
}

impl CallOutcome {
    /// The call's value; `None` is the neutral result.
    pub fn value(&self) -> Option<&Value> {
        match self {
            CallOutcome::Completed(value) | CallOutcome::Recovered { value, .. } => Some(value),
            CallOutcome::Unrecovered { .. } => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            CallOutcome::Completed(value) | CallOutcome::Recovered { value, .. } => Some(value),
            CallOutcome::Unrecovered { .. } => None,
        }
    }

    pub fn is_recovered(&self) -> bool {
        matches!(self, CallOutcome::Recovered { .. })
    }

    pub fn failure(&self) -> Option<&HealFailure> {
        match self {
            CallOutcome::Unrecovered { failure } => Some(failure),
            _ => None,
        }
    }
}

pub struct Healer {
    config: MendConfig,
    registry: Arc<ModuleRegistry>,
    oracle: Arc<dyn FixOracle>,
    capturer: ContextCapturer,
    validator: FixValidator,
    backups: BackupManager,
    patcher: SourcePatcher,
    locks: &'static FileLocks,
    fix_saver: FixSaver,
    event_tx: Option<mpsc::Sender<HealerEvent>>,
}

impl Healer {
    /// Build a healer. The configuration is validated here, before anything
    /// can be wrapped.
    pub fn new(config: MendConfig, registry: Arc<ModuleRegistry>, oracle: Arc<dyn FixOracle>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            capturer: ContextCapturer::new(&config),
            validator: FixValidator::new(),
            backups: BackupManager::new(config.backup_folder.clone()),
            patcher: SourcePatcher::new(),
            locks: FileLocks::global(),
            fix_saver: FixSaver::new(config.fixes_folder.clone()),
            event_tx: None,
            config,
            registry,
            oracle,
        })
    }

    /// Send status events to `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<HealerEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &MendConfig {
        &self.config
    }

    /// Wrap one function. Fails if the module or function does not exist.
    pub fn wrap(self: &Arc<Self>, module: &str, function: &str) -> Result<Healed> {
        let loaded = self
            .registry
            .get(module)
            .ok_or_else(|| MendError::ModuleNotLoaded(module.to_string()))?;
        if !loaded.has_function(function) {
            return Err(MendError::DefinitionNotFound {
                file: loaded.file_label().to_string(),
                function: function.to_string(),
            });
        }
        debug!(module, function, "Wrapped function");
        Ok(Healed {
            healer: Arc::clone(self),
            module: module.to_string(),
            function: function.to_string(),
        })
    }

    /// Wrap every definition of `module` that carries the `@heal` marker.
    pub fn wrap_marked(self: &Arc<Self>, module: &str) -> Result<Vec<Healed>> {
        let loaded = self
            .registry
            .get(module)
            .ok_or_else(|| MendError::ModuleNotLoaded(module.to_string()))?;
        loaded
            .unit
            .marked_definitions()
            .map(|def| self.wrap(module, &def.name))
            .collect()
    }

    /// Call `function`, repairing it if it fails.
    ///
    /// The module is resolved at every call, so a call after a reload runs
    /// the new version.
    pub async fn call(&self, module: &str, function: &str, args: CallArgs) -> CallOutcome {
        let Some(loaded) = self.registry.get(module) else {
            let failure = HealFailure::Unresolvable(format!("module `{}` is not loaded", module));
            error!(stage = failure.stage(), module, function, reason = %failure, "Call could not start");
            return CallOutcome::Unrecovered { failure };
        };

        let error = match self.registry.invoke(&loaded, function, args.clone()) {
            Ok(value) => return CallOutcome::Completed(value),
            Err(error) => error,
        };

        let event_id = format!("heal_{}", Uuid::new_v4());
        self.emit(&event_id, function, HealingStatus::Running).await;
        self.emit(&event_id, function, HealingStatus::Failed).await;
        warn!(
            event_id = %event_id,
            module,
            function,
            kind = error.kind.name(),
            error = %error.kind,
            "Call failed, starting repair"
        );

        match self.heal(&event_id, &loaded, function, &args, &error).await {
            Ok((value, fix)) => {
                self.emit(&event_id, function, HealingStatus::Recovered).await;
                info!(event_id = %event_id, module, function, version = fix.module_version, "Function recovered");
                if let Some(tx) = &self.event_tx {
                    tx.send(HealerEvent::FixApplied {
                        event_id: event_id.clone(),
                        fix: fix.clone(),
                    })
                    .await
                    .ok();
                }
                CallOutcome::Recovered { value, fix }
            }
            Err(failure) => {
                self.emit(&event_id, function, HealingStatus::Unrecovered).await;
                error!(
                    event_id = %event_id,
                    stage = failure.stage(),
                    module,
                    function,
                    file = loaded.file_label(),
                    reason = %failure,
                    "Repair failed"
                );
                CallOutcome::Unrecovered { failure }
            }
        }
    }

    async fn heal(
        &self,
        event_id: &str,
        loaded: &Arc<LoadedModule>,
        function: &str,
        args: &CallArgs,
        error: &ScriptError,
    ) -> std::result::Result<(Value, AppliedFix), HealFailure> {
        let mut context = self
            .capturer
            .capture(event_id, &self.registry, loaded, function, args, error);
        self.emit(event_id, function, HealingStatus::ContextCaptured).await;

        let (fix, attempts) = self.request_fix(event_id, loaded, function, &context).await?;
        context.fixed_code = Some(fix.code.clone());

        match self.fix_saver.save_accepted(&context, &fix.code) {
            Ok(path) => debug!(path = %path.display(), "Saved accepted fix"),
            Err(e) => warn!(function, error = %e, "Failed to save accepted fix"),
        }

        if !self.config.auto_fix {
            info!(function, "Auto-fix disabled, leaving source untouched");
            return Err(HealFailure::AutoFixDisabled);
        }

        let path = loaded
            .path
            .clone()
            .ok_or_else(|| HealFailure::PatchFailed(format!("module `{}` has no backing file", loaded.name())))?;

        // Held until the new version is loaded.
        let guard = self
            .locks
            .acquire(&path)
            .await
            .map_err(|e| HealFailure::PatchFailed(e.to_string()))?;

        if self.config.backup_enabled {
            match self.backups.backup(&path) {
                Ok(backup) => {
                    context.backup_path = Some(backup);
                    self.emit(event_id, function, HealingStatus::BackedUp).await;
                }
                Err(e) if self.config.require_backup => return Err(HealFailure::BackupFailed(e.to_string())),
                Err(e) => warn!(file = %path.display(), error = %e, "Backup failed, patching without one"),
            }
        }

        self.patcher
            .replace_function(&path, function, &fix.code)
            .map_err(|e| HealFailure::PatchFailed(e.to_string()))?;
        self.emit(event_id, function, HealingStatus::Patched).await;

        let reloaded = match self.registry.reload(loaded.name()) {
            Ok(module) => module,
            Err(e) => {
                self.emit(event_id, function, HealingStatus::ReloadFailed).await;
                error!(module = loaded.name(), file = %path.display(), error = %e, "Reload failed");
                return Err(HealFailure::ReloadFailed {
                    module: loaded.name().to_string(),
                    path: path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        };
        self.emit(event_id, function, HealingStatus::Reloaded).await;
        drop(guard);

        let value = self
            .registry
            .invoke(&reloaded, function, args.clone())
            .map_err(|e| HealFailure::ReinvokeFailed(e.to_string()))?;

        Ok((
            value,
            AppliedFix {
                event_id: event_id.to_string(),
                file: path,
                function: function.to_string(),
                code: fix.code,
                backup_path: context.backup_path,
                module_version: reloaded.version,
                attempts,
            },
        ))
    }

    /// Ask the oracle until a candidate passes validation or attempts run out.
    async fn request_fix(
        &self,
        event_id: &str,
        loaded: &LoadedModule,
        function: &str,
        context: &ExecutionContext,
    ) -> std::result::Result<(AcceptedFix, u32), HealFailure> {
        let max_attempts = self.config.max_attempts;
        let original_params = loaded
            .unit
            .definition(function)
            .map(|def| def.param_names())
            .unwrap_or_default();

        let mut previous_rejection: Option<String> = None;
        let mut last_failure = None;

        for attempt in 1..=max_attempts {
            let request = FixRequest {
                system_prompt: self.config.system_prompts.code_fixer.clone(),
                prompt: build_fix_prompt(context, previous_rejection.as_deref()),
                function_name: function.to_string(),
                attempt,
            };

            let candidate = match self.oracle.propose_fix(&request).await {
                Ok(candidate) => candidate,
                Err(e) => {
                    warn!(stage = "oracle", function, attempt, max_attempts, error = %e, "No fix from oracle");
                    last_failure = Some(HealFailure::OracleUnavailable(e.to_string()));
                    continue;
                }
            };
            self.emit(event_id, function, HealingStatus::FixProposed { attempt }).await;

            if self.config.debug {
                info!(function, attempt, "Proposed fix:\n{}", candidate);
            } else {
                debug!(function, attempt, "Proposed fix:\n{}", candidate);
            }

            match self.validator.validate(&candidate, function, &original_params) {
                Ok(fix) => {
                    info!(function, attempt, "Fix accepted");
                    self.emit(event_id, function, HealingStatus::FixAccepted { attempt }).await;
                    return Ok((fix, attempt));
                }
                Err(rejection) => {
                    let reason = rejection.to_string();
                    warn!(stage = "validate", function, attempt, max_attempts, reason = %reason, "Fix rejected");
                    self.emit(
                        event_id,
                        function,
                        HealingStatus::FixRejected {
                            attempt,
                            reason: reason.clone(),
                        },
                    )
                    .await;

                    if self.config.save_rejected_fixes {
                        if let Err(e) = self.fix_saver.save_rejected(context, &candidate, &reason) {
                            warn!(function, error = %e, "Failed to save rejected fix");
                        }
                    }

                    last_failure = Some(HealFailure::ValidationRejected(reason.clone()));
                    previous_rejection = Some(reason);
                }
            }
        }

        Err(match last_failure {
            Some(failure) if max_attempts == 1 => failure,
            last => HealFailure::AttemptsExhausted {
                attempts: max_attempts,
                last: last.map(|f| f.to_string()).unwrap_or_default(),
            },
        })
    }

    async fn emit(&self, event_id: &str, function: &str, status: HealingStatus) {
        debug!(event_id, function, status = ?status, "Healing status changed");
        if let Some(tx) = &self.event_tx {
            tx.send(HealerEvent::StatusChanged {
                event_id: event_id.to_string(),
                function: function.to_string(),
                status,
            })
            .await
            .ok();
        }
    }
}

/// A function registered with a healer. Calling it behaves like calling the
/// function directly, except that failures are repaired.
#[derive(Clone)]
pub struct Healed {
    healer: Arc<Healer>,
    module: String,
    function: String,
}

impl Healed {
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn qualified_name(&self) -> String {
        format!("{}::{}", self.module, self.function)
    }

    pub async fn call(&self, args: CallArgs) -> CallOutcome {
        self.healer.call(&self.module, &self.function, args).await
    }
}

impl std::fmt::Debug for Healed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Healed")
            .field("module", &self.module)
            .field("function", &self.function)
            .finish()
    }
}
