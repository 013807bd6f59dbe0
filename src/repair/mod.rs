//! Turning an oracle reply into a patched, backed-up source file.

pub mod backup;
pub mod fix_saver;
pub mod locks;
pub mod patcher;
pub mod validator;

pub use backup::BackupManager;
pub use fix_saver::FixSaver;
pub use locks::{FileGuard, FileLocks};
pub use patcher::{PatchReport, SourcePatcher};
pub use validator::{AcceptedFix, FixValidator, Rejection};
