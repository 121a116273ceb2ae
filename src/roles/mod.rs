//! Agent roles and the registry that routes them to backends

pub mod presets;
pub mod registry;
pub mod role;

pub use presets::{devops_roster, ide_roster, PresetError};
pub use registry::{RegistryError, RoleRegistry};
pub use role::{ExecutionPolicy, Role};
