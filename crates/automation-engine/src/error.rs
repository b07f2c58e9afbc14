//! Error types for the automation engine

use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by user supplied commands and fallible conditions
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur in the automation engine
#[derive(Error, Debug)]
pub enum AutomationError {
    /// Automation not found
    #[error("Automation not found: {0}")]
    NotFound(String),

    /// Invalid trigger configuration
    #[error("Invalid trigger: {0}")]
    InvalidTrigger(String),

    /// Invalid condition configuration
    #[error("Invalid condition: {0}")]
    InvalidCondition(String),

    /// Invalid action configuration
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    /// No executor registered for an action kind
    #[error("No executor registered for action kind: {0}")]
    ExecutorNotRegistered(String),

    /// No strategy registered for a condition operator
    #[error("No strategy registered for condition operator: {0}")]
    OperatorNotRegistered(String),

    /// Write attempted through an accessor without a setter
    #[error("Property is read-only: {0}")]
    ReadOnlyProperty(String),

    /// An observable was written from one of its own watchers
    #[error("Observable updated while notifying its watchers: {0}")]
    ReentrantUpdate(String),

    /// Circular automation reference detected
    #[error("Circular automation reference detected: {0}")]
    CircularReference(String),

    /// Nested automations went deeper than the configured limit
    #[error("Automation nesting exceeds {limit} levels at '{automation_id}'")]
    NestingTooDeep { automation_id: String, limit: usize },

    /// A condition could not be evaluated
    #[error("Condition '{condition}' failed: {source}")]
    ConditionFailed {
        condition: String,
        #[source]
        source: BoxError,
    },

    /// A command action failed
    #[error("Command '{command}' failed: {source}")]
    CommandFailed {
        command: String,
        #[source]
        source: BoxError,
    },

    /// A nested automation failed
    #[error("Nested automation '{automation_id}' failed: {source}")]
    NestedFailed {
        automation_id: String,
        #[source]
        source: Box<AutomationError>,
    },

    /// Execution was cancelled by the caller
    #[error("Automation '{0}' was cancelled")]
    Cancelled(String),

    /// Execution ran past its timeout
    #[error("Automation '{automation_id}' timed out after {timeout:?}")]
    TimedOut {
        automation_id: String,
        timeout: Duration,
    },

    /// IO error (options loading)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AutomationError {
    /// Whether this error is a cancellation or timeout signal
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_) | Self::TimedOut { .. })
    }

    /// Whether this error stems from a malformed definition.
    ///
    /// Configuration errors are never captured into an `ActionResult`; they
    /// are returned to the caller as-is and should not be retried.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::InvalidTrigger(_)
                | Self::InvalidCondition(_)
                | Self::InvalidAction(_)
                | Self::ExecutorNotRegistered(_)
                | Self::OperatorNotRegistered(_)
                | Self::ReadOnlyProperty(_)
                | Self::ReentrantUpdate(_)
                | Self::CircularReference(_)
                | Self::NestingTooDeep { .. }
        )
    }

    /// Whether this error must escape the pipeline instead of being
    /// recorded as a failed result
    pub(crate) fn escapes_pipeline(&self) -> bool {
        self.is_cancellation() || self.is_configuration()
    }
}
