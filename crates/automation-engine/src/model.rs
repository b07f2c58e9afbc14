//! Data models for the automation engine

use crate::command::Command;
use crate::error::AutomationError;
use crate::evaluator::{Condition, ConditionOperator};
use crate::trigger::Trigger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Predicate over an execution context
pub type Predicate<C> = Arc<dyn Fn(&C) -> bool + Send + Sync>;

/// A complete automation: what starts it, what gates it and what it does
pub struct Automation<C> {
    /// Unique identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Optional description
    pub description: Option<String>,
    /// Whether the automation may run
    pub is_active: bool,
    /// Upper bound on one execution. `Some(Duration::ZERO)` means unbounded,
    /// `None` defers to the engine default.
    pub execution_timeout: Option<Duration>,
    /// How conditions are combined
    pub condition_operator: ConditionOperator,
    /// What initiates the automation
    pub triggers: Vec<Box<dyn Trigger>>,
    /// Conditions that gate the actions
    pub conditions: Vec<Condition<C>>,
    /// Actions in execution order
    pub actions: Vec<Action<C>>,
    /// Creation timestamp (RFC 3339)
    pub created_at: String,
}

impl<C> Automation<C> {
    /// Create an active automation with a generated id
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), name)
    }

    /// Create an active automation with a known id
    pub fn with_id(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            is_active: true,
            execution_timeout: None,
            condition_operator: ConditionOperator::default(),
            triggers: Vec::new(),
            conditions: Vec::new(),
            actions: Vec::new(),
            created_at: Utc::now().to_rfc3339(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_operator(mut self, operator: ConditionOperator) -> Self {
        self.condition_operator = operator;
        self
    }

    #[must_use]
    pub fn with_trigger(mut self, trigger: impl Trigger + 'static) -> Self {
        self.triggers.push(Box::new(trigger));
        self
    }

    #[must_use]
    pub fn with_condition(mut self, condition: Condition<C>) -> Self {
        self.conditions.push(condition);
        self
    }

    #[must_use]
    pub fn with_action(mut self, action: Action<C>) -> Self {
        self.actions.push(action);
        self
    }

    /// Check that every part is bound to this automation and that the
    /// action list can be queued
    pub fn validate(&self) -> Result<(), AutomationError> {
        if let Some(trigger) = self
            .triggers
            .iter()
            .find(|t| t.automation_id() != self.id)
        {
            return Err(AutomationError::InvalidTrigger(format!(
                "{:?} trigger bound to automation {} is attached to {}",
                trigger.kind(),
                trigger.automation_id(),
                self.id
            )));
        }

        if let Some(condition) = self
            .conditions
            .iter()
            .find(|c| c.automation_id() != self.id)
        {
            return Err(AutomationError::InvalidCondition(format!(
                "condition '{}' bound to automation {} is attached to {}",
                condition.name(),
                condition.automation_id(),
                self.id
            )));
        }

        if let Some(Action::RepeatPrevious { .. }) = self.actions.first() {
            return Err(AutomationError::InvalidAction(format!(
                "automation {} starts with a repeat action that has nothing to repeat",
                self.id
            )));
        }

        Ok(())
    }
}

impl<C> fmt::Debug for Automation<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Automation")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("is_active", &self.is_active)
            .field("execution_timeout", &self.execution_timeout)
            .field("condition_operator", &self.condition_operator)
            .field("triggers", &self.triggers.len())
            .field("conditions", &self.conditions.len())
            .field("actions", &self.actions)
            .finish()
    }
}

/// Loop policy for [`Action::RepeatPrevious`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatKind {
    /// Repeat while the predicate holds
    While,
    /// Repeat until the predicate holds
    Until,
}

impl RepeatKind {
    /// Whether another repetition should run given the predicate's verdict
    #[must_use]
    pub fn should_continue(self, predicate_holds: bool) -> bool {
        match self {
            Self::While => predicate_holds,
            Self::Until => !predicate_holds,
        }
    }
}

/// Tag identifying an action variant, used to resolve its executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Delay,
    Command,
    Automation,
    RepeatPrevious,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Delay => "delay",
            Self::Command => "command",
            Self::Automation => "automation",
            Self::RepeatPrevious => "repeat_previous",
        };
        f.write_str(name)
    }
}

/// Actions to perform when an automation runs
pub enum Action<C> {
    /// Wait before the next action
    Delay { duration: Duration },
    /// Invoke a command against the context
    Command { command: Arc<dyn Command<C>> },
    /// Run another automation with the current context
    Automation { automation_id: String },
    /// Re-run the preceding action under a loop policy
    RepeatPrevious {
        kind: RepeatKind,
        predicate: Predicate<C>,
        max_iterations: u32,
    },
}

impl<C> Action<C> {
    pub fn delay(duration: Duration) -> Self {
        Self::Delay { duration }
    }

    pub fn command(command: impl Command<C> + 'static) -> Self {
        Self::Command {
            command: Arc::new(command),
        }
    }

    pub fn automation(automation_id: impl Into<String>) -> Self {
        Self::Automation {
            automation_id: automation_id.into(),
        }
    }

    pub fn repeat_while(
        predicate: impl Fn(&C) -> bool + Send + Sync + 'static,
        max_iterations: u32,
    ) -> Self {
        Self::RepeatPrevious {
            kind: RepeatKind::While,
            predicate: Arc::new(predicate),
            max_iterations,
        }
    }

    pub fn repeat_until(
        predicate: impl Fn(&C) -> bool + Send + Sync + 'static,
        max_iterations: u32,
    ) -> Self {
        Self::RepeatPrevious {
            kind: RepeatKind::Until,
            predicate: Arc::new(predicate),
            max_iterations,
        }
    }

    /// Variant tag
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Delay { .. } => ActionKind::Delay,
            Self::Command { .. } => ActionKind::Command,
            Self::Automation { .. } => ActionKind::Automation,
            Self::RepeatPrevious { .. } => ActionKind::RepeatPrevious,
        }
    }
}

impl<C> fmt::Debug for Action<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delay { duration } => {
                f.debug_struct("Delay").field("duration", duration).finish()
            }
            Self::Command { command } => f
                .debug_struct("Command")
                .field("name", &command.name())
                .finish(),
            Self::Automation { automation_id } => f
                .debug_struct("Automation")
                .field("automation_id", automation_id)
                .finish(),
            Self::RepeatPrevious {
                kind,
                max_iterations,
                ..
            } => f
                .debug_struct("RepeatPrevious")
                .field("kind", kind)
                .field("max_iterations", max_iterations)
                .finish(),
        }
    }
}

/// Outcome of one execution
#[derive(Debug)]
pub struct ActionResult<C> {
    /// Automation that ran
    pub automation_id: String,
    /// Whether every queued action completed
    pub succeeded: bool,
    /// Context after the last action that ran
    pub result: C,
    /// Failure that stopped the queue, if any
    pub error: Option<AutomationError>,
    /// Number of executor invocations, repetitions included
    pub actions_executed: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl<C> ActionResult<C> {
    /// Whether the automation was stopped by its condition gate or inactivity
    #[must_use]
    pub fn was_skipped(&self) -> bool {
        !self.succeeded && self.error.is_none()
    }
}
