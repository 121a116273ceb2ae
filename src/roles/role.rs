//! Role definitions

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::BackendConfig;

/// Whether code emitted in a session may be executed, and where
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionPolicy {
    NoExecution,
    /// Fragments run through the execution collaborator, scoped to this directory
    SandboxedWorkdir(PathBuf),
}

impl ExecutionPolicy {
    pub fn workdir(&self) -> Option<&Path> {
        match self {
            ExecutionPolicy::NoExecution => None,
            ExecutionPolicy::SandboxedWorkdir(path) => Some(path),
        }
    }
}

/// A named participant: system prompt, backend route and execution policy
///
/// Fields are private so a registered role cannot be changed in place;
/// cloning is cheap because the backend is shared.
#[derive(Debug, Clone, PartialEq)]
pub struct Role {
    name: String,
    system_prompt: String,
    backend: Arc<BackendConfig>,
    execution_policy: ExecutionPolicy,
}

impl Role {
    pub fn new(
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        backend: Arc<BackendConfig>,
    ) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            backend,
            execution_policy: ExecutionPolicy::NoExecution,
        }
    }

    pub fn with_execution_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.execution_policy = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn backend(&self) -> &Arc<BackendConfig> {
        &self.backend
    }

    pub fn execution_policy(&self) -> &ExecutionPolicy {
        &self.execution_policy
    }
}
