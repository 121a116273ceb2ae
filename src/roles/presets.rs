//! Built-in role rosters
//!
//! Two rosters ship with the crate:
//! - `ide_roster`: every assistant role on the general model
//! - `devops_roster`: coder and refactorer on the code model, reviewer and
//!   tester on the general model
//!
//! Both include a `user-proxy` role that initiates sessions and owns the
//! sandboxed working directory.

use crate::backend::ConfigError;
use crate::config::Settings;

use super::registry::{RegistryError, RoleRegistry};
use super::role::{ExecutionPolicy, Role};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PresetError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub const CODER: &str = "coder";
pub const TESTER: &str = "tester";
pub const REVIEWER: &str = "reviewer";
pub const REFACTORER: &str = "refactorer";
pub const USER_PROXY: &str = "user-proxy";

pub const CODER_PROMPT: &str = "You are an experienced software engineer. Write clean, \
typed, documented code that follows the project's conventions. Put the code in fenced \
blocks tagged with their language. Reply TERMINATE when the task is done.";

pub const TESTER_PROMPT: &str = "You are a QA engineer. Write unit and integration tests \
for the code under discussion, cover edge cases and report gaps in coverage. \
Reply TERMINATE when the task is done.";

pub const REVIEWER_PROMPT: &str = "You are a code reviewer. Check the code for correctness, \
security, performance and adherence to the project's standards. Give concrete, \
constructive feedback. Reply TERMINATE when the review is complete.";

pub const REFACTORER_PROMPT: &str = "You are a refactoring specialist. Improve existing code \
for readability, performance and maintainability without changing its behaviour. \
Reply TERMINATE when the task is done.";

pub const USER_PROXY_PROMPT: &str = "You relay the developer's task and report the output \
of executed code back to the other participants.";

/// All assistant roles on the general model
pub fn ide_roster(settings: &Settings) -> Result<RoleRegistry, PresetError> {
    let general = settings.backend("general", settings.model.clone())?;

    let roles = vec![
        Role::new(CODER, CODER_PROMPT, general.clone()),
        Role::new(TESTER, TESTER_PROMPT, general.clone()),
        Role::new(REVIEWER, REVIEWER_PROMPT, general.clone()),
        user_proxy(settings, general)?,
    ];
    Ok(build(roles)?)
}

/// Code roles on the code model, analysis roles on the general model
pub fn devops_roster(settings: &Settings) -> Result<RoleRegistry, PresetError> {
    let code = settings.backend("code", settings.code_model.clone())?;
    let general = settings.backend("general", settings.model.clone())?;

    let roles = vec![
        Role::new(CODER, CODER_PROMPT, code.clone()),
        Role::new(REFACTORER, REFACTORER_PROMPT, code),
        Role::new(REVIEWER, REVIEWER_PROMPT, general.clone()),
        Role::new(TESTER, TESTER_PROMPT, general.clone()),
        user_proxy(settings, general)?,
    ];
    Ok(build(roles)?)
}

fn user_proxy(
    settings: &Settings,
    backend: std::sync::Arc<crate::backend::BackendConfig>,
) -> Result<Role, ConfigError> {
    if settings.work_dir.as_os_str().is_empty() {
        return Err(ConfigError::Empty { field: "work_dir" });
    }
    Ok(Role::new(USER_PROXY, USER_PROXY_PROMPT, backend)
        .with_execution_policy(ExecutionPolicy::SandboxedWorkdir(settings.work_dir.clone())))
}

fn build(roles: Vec<Role>) -> Result<RoleRegistry, RegistryError> {
    let mut registry = RoleRegistry::new();
    for role in roles {
        registry.register(role)?;
    }
    Ok(registry)
}
