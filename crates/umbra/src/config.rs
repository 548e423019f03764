//! Sandbox configuration.
//!
//! Loaded from YAML or built in code:
//!
//! ```yaml
//! api_level: 28
//! unbound_policy: permissive
//! permissive_methods:
//!   - android.view.View#invalidate
//!   - android.util.Log#*
//! contexts: [main, background]
//! max_tasks_per_drain: 5000
//! ```

use crate::class::RealClass;
use crate::result::{UmbraError, UmbraResult};
use crate::scheduler::{ContextId, DEFAULT_MAX_TASKS_PER_DRAIN};
use crate::signature::MethodRef;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default platform API level
pub const DEFAULT_API_LEVEL: u32 = 34;

/// What happens when a call has no shadow method and no real body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnboundPolicy {
    /// Fail with `UnboundShadowMethod`
    #[default]
    Strict,
    /// Return the type default for allow-listed methods, with a warning
    Permissive,
}

/// Environment configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxConfig {
    /// Platform API level used for SDK gating
    pub api_level: u32,
    pub unbound_policy: UnboundPolicy,
    /// Methods allowed to return defaults under the permissive policy
    pub permissive_methods: Vec<MethodRef>,
    /// Scheduler contexts created up front (`main` always exists)
    pub contexts: Vec<String>,
    /// Runaway guard for a single scheduler drain
    pub max_tasks_per_drain: usize,
    /// Install the system clock interceptors
    pub install_default_interceptors: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            api_level: DEFAULT_API_LEVEL,
            unbound_policy: UnboundPolicy::Strict,
            permissive_methods: Vec::new(),
            contexts: vec![ContextId::MAIN.to_string()],
            max_tasks_per_drain: DEFAULT_MAX_TASKS_PER_DRAIN,
            install_default_interceptors: true,
        }
    }
}

impl SandboxConfig {
    /// Parse and validate YAML
    pub fn from_yaml(yaml: &str) -> UmbraResult<Self> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> UmbraResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn to_yaml(&self) -> UmbraResult<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    /// Check value ranges
    pub fn validate(&self) -> UmbraResult<()> {
        if self.api_level == 0 {
            return Err(UmbraError::config("api_level must be positive"));
        }
        if self.max_tasks_per_drain == 0 {
            return Err(UmbraError::config("max_tasks_per_drain must be positive"));
        }
        if let Some(blank) = self.contexts.iter().find(|c| c.trim().is_empty()) {
            return Err(UmbraError::config(format!(
                "context names must not be blank (got {blank:?})"
            )));
        }
        Ok(())
    }

    /// Contexts to pre-create, `main` first
    #[must_use]
    pub fn context_ids(&self) -> Vec<ContextId> {
        let mut ids = vec![ContextId::MAIN];
        for name in &self.contexts {
            let id = ContextId::from(name.clone());
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    /// Whether an unbound `method` on `class` may return a default
    #[must_use]
    pub fn permits_unbound(&self, class: RealClass, method: &str) -> bool {
        self.unbound_policy == UnboundPolicy::Permissive
            && self
                .permissive_methods
                .iter()
                .any(|r| class.ancestors().any(|c| r.matches(c.name(), method)))
    }

    #[must_use]
    pub fn with_api_level(mut self, level: u32) -> Self {
        self.api_level = level;
        self
    }

    #[must_use]
    pub fn with_unbound_policy(mut self, policy: UnboundPolicy) -> Self {
        self.unbound_policy = policy;
        self
    }

    /// Allow-list `method` under the permissive policy
    #[must_use]
    pub fn permit(mut self, method: MethodRef) -> Self {
        self.permissive_methods.push(method);
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.contexts.push(context.into());
        self
    }

    #[must_use]
    pub fn with_max_tasks_per_drain(mut self, limit: usize) -> Self {
        self.max_tasks_per_drain = limit;
        self
    }

    #[must_use]
    pub fn without_default_interceptors(mut self) -> Self {
        self.install_default_interceptors = false;
        self
    }
}
