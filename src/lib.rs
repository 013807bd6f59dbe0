//! mend - self-repairing functions for `.mend` scripts.
//!
//! Functions marked `@heal` are run through a [`healer::Healer`]. When one
//! raises, its execution context is captured, an AI oracle proposes a fixed
//! definition, and the fix is validated, backed up, patched into the source
//! file and hot-reloaded before the call is retried.

pub mod capture;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod healer;
pub mod oracle;
pub mod providers;
pub mod repair;
pub mod runtime;
pub mod script;

pub use config::{ConfigManager, MendConfig};
pub use error::{HealFailure, MendError, Result};
pub use healer::{AppliedFix, CallOutcome, Healed, Healer, HealerEvent, HealingStatus};
pub use runtime::{LoadedModule, ModuleRegistry};
pub use script::{CallArgs, Value};
