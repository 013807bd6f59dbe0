pub mod registry;

pub use registry::{LoadedModule, ModuleRegistry};
