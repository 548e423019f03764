//! Result and error types for Umbra.

use thiserror::Error;

/// Result type for Umbra operations
pub type UmbraResult<T> = Result<T, UmbraError>;

/// Error produced by a scheduled task body
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur in Umbra
#[derive(Debug, Error)]
pub enum UmbraError {
    /// Intercepted call with neither a shadow method nor a fallback body
    #[error("No shadow method or fallback for {method}")]
    UnboundShadowMethod {
        /// Method signature
        method: String,
    },

    /// Two shadow methods are equally good candidates for one call
    #[error("Ambiguous shadow methods for {method} in {shadow}: {}", .candidates.join(", "))]
    DuplicateBindingConflict {
        /// Shadow class name
        shadow: String,
        /// Method signature
        method: String,
        /// Conflicting declarations
        candidates: Vec<String>,
    },

    /// Shadow class cannot shadow the requested real class
    #[error("Cannot bind {shadow} to {real_class}: {message}")]
    InvalidBinding {
        /// Real class name
        real_class: String,
        /// Shadow class name
        shadow: String,
        /// Error message
        message: String,
    },

    /// Real instance was constructed without a shadow binding
    #[error("No shadow bound for instance of {class}")]
    NoShadowBound {
        /// Real class name
        class: String,
    },

    /// Shadow state accessed as the wrong type
    #[error("Shadow state type mismatch: expected {expected}, found {found}")]
    ShadowTypeMismatch {
        /// Requested state type
        expected: String,
        /// Actual state type
        found: String,
    },

    /// Shadow class declaration is malformed
    #[error("Invalid shadow class {shadow}: {message}")]
    ShadowDefinition {
        /// Shadow class name
        shadow: String,
        /// Error message
        message: String,
    },

    /// Shadow method re-entered the shadow instance it is running on
    #[error("Re-entrant call into shadow {shadow} while handling {method}")]
    ReentrantShadowCall {
        /// Shadow class name
        shadow: String,
        /// Method being invoked
        method: String,
    },

    /// Static call resolved to an instance shadow method
    #[error("Static call {method} resolved to an instance shadow method")]
    StaticShadowMismatch {
        /// Method signature
        method: String,
    },

    /// Value has a different dynamic type than requested
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Expected type
        expected: String,
        /// Actual type
        found: String,
    },

    /// No environment entered on the current thread
    #[error("No shadow environment entered on this thread")]
    NoActiveEnvironment,

    /// Scheduled task returned an error
    #[error("Task {task} on scheduler '{context}' failed: {source}")]
    SchedulerTaskFailed {
        /// Scheduler context
        context: String,
        /// Task identifier
        task: u64,
        /// Error returned by the task
        #[source]
        source: TaskError,
    },

    /// Work posted to a scheduler that has quit
    #[error("Scheduler '{context}' has quit")]
    SchedulerQuit {
        /// Scheduler context
        context: String,
    },

    /// A single drain ran more tasks than allowed
    #[error("Scheduler '{context}' ran more than {limit} tasks in one drain")]
    RunawayScheduler {
        /// Scheduler context
        context: String,
        /// Configured task limit
        limit: usize,
    },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UmbraError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a type mismatch error
    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Whether this error came out of a scheduled task
    #[must_use]
    pub const fn is_task_failure(&self) -> bool {
        matches!(self, Self::SchedulerTaskFailed { .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_unbound_message() {
        let err = UmbraError::UnboundShadowMethod {
            method: "android.view.View#getWidth()".into(),
        };
        assert_eq!(
            err.to_string(),
            "No shadow method or fallback for android.view.View#getWidth()"
        );
    }

    #[test]
    fn test_conflict_lists_candidates() {
        let err = UmbraError::DuplicateBindingConflict {
            shadow: "ShadowView".into(),
            method: "setX(int)".into(),
            candidates: vec!["setX(long)".into(), "setX(java.lang.Integer)".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("setX(long), setX(java.lang.Integer)"));
    }

    #[test]
    fn test_task_failure_keeps_source() {
        let err = UmbraError::SchedulerTaskFailed {
            context: "main".into(),
            task: 7,
            source: "boom".into(),
        };
        assert!(err.is_task_failure());
        assert_eq!(err.source().unwrap().to_string(), "boom");
        assert!(err.to_string().contains("Task 7 on scheduler 'main'"));
    }

    #[test]
    fn test_config_helper() {
        let err = UmbraError::config("bad level");
        assert!(matches!(err, UmbraError::Config { ref message } if message == "bad level"));
        assert!(!err.is_task_failure());
    }

    #[test]
    fn test_io_from() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: UmbraError = io.into();
        assert!(err.to_string().starts_with("I/O error"));
    }
}
