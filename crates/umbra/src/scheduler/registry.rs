//! Scheduler Registry: one shared scheduler per execution context.

use super::{Scheduler, DEFAULT_MAX_TASKS_PER_DRAIN};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::debug;

/// Name of a logical execution context
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(Cow<'static, str>);

impl ContextId {
    /// The main (UI) context
    pub const MAIN: Self = Self(Cow::Borrowed("main"));
    /// The default background context
    pub const BACKGROUND: Self = Self(Cow::Borrowed("background"));

    #[must_use]
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_main(&self) -> bool {
        *self == Self::MAIN
    }
}

impl From<&'static str> for ContextId {
    fn from(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }
}

impl From<String> for ContextId {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

impl From<&ContextId> for ContextId {
    fn from(id: &ContextId) -> Self {
        id.clone()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maps context ids to their scheduler, creating schedulers on demand
pub struct SchedulerRegistry {
    schedulers: DashMap<ContextId, Arc<Scheduler>>,
    owner: ThreadId,
    max_tasks_per_drain: usize,
}

impl SchedulerRegistry {
    /// Registry with only the main scheduler, owned by the calling thread
    #[must_use]
    pub fn new() -> Self {
        Self::with_contexts(&[], DEFAULT_MAX_TASKS_PER_DRAIN)
    }

    /// Registry with `main` plus `contexts` pre-created
    #[must_use]
    pub fn with_contexts(contexts: &[ContextId], max_tasks_per_drain: usize) -> Self {
        let registry = Self {
            schedulers: DashMap::new(),
            owner: thread::current().id(),
            max_tasks_per_drain,
        };
        registry.get_scheduler(ContextId::MAIN);
        for context in contexts {
            registry.get_scheduler(context);
        }
        registry
    }

    /// Scheduler for `context`; the same instance on every call
    pub fn get_scheduler(&self, context: impl Into<ContextId>) -> Arc<Scheduler> {
        let context = context.into();
        let scheduler = self.schedulers.entry(context.clone()).or_insert_with(|| {
            debug!(context = %context, "creating scheduler");
            Arc::new(Scheduler::with_owner(
                context.clone(),
                self.owner,
                self.max_tasks_per_drain,
            ))
        });
        Arc::clone(scheduler.value())
    }

    /// The main-context scheduler
    #[must_use]
    pub fn main(&self) -> Arc<Scheduler> {
        self.get_scheduler(ContextId::MAIN)
    }

    /// Known contexts, sorted
    #[must_use]
    pub fn contexts(&self) -> Vec<ContextId> {
        let mut contexts: Vec<_> = self.schedulers.iter().map(|e| e.key().clone()).collect();
        contexts.sort();
        contexts
    }

    /// Reset every scheduler, keeping their identities
    pub fn reset_all(&self) {
        let schedulers: Vec<_> = self.schedulers.iter().map(|e| Arc::clone(e.value())).collect();
        for scheduler in schedulers {
            scheduler.reset();
        }
    }
}

impl Default for SchedulerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SchedulerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerRegistry")
            .field("contexts", &self.contexts())
            .field("max_tasks_per_drain", &self.max_tasks_per_drain)
            .finish()
    }
}
