//! Action executors for automations
//!
//! Every action variant except `RepeatPrevious` has exactly one executor,
//! looked up by [`ActionKind`] in an [`ActionExecutorFactory`]. Repeat actions
//! are expanded by the queue builder instead.

use crate::engine::AutomationService;
use crate::error::AutomationError;
use crate::model::{Action, ActionKind};
use crate::registry::AutomationManager;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything an executor may touch during one invocation
pub struct Invocation<'a, C> {
    /// Automation whose queue is running
    pub automation_id: &'a str,
    /// Context, mutated in place
    pub context: &'a mut C,
    /// Cancellation scope of the running automation
    pub cancel: &'a CancellationToken,
    /// Service to re-enter for nested automations
    pub service: &'a AutomationService<C>,
    /// Ids of the automations currently executing, outermost first
    pub chain: &'a [String],
}

/// Executes one kind of action
#[async_trait]
pub trait ActionExecutor<C>: Send + Sync {
    async fn execute(
        &self,
        action: &Action<C>,
        invocation: Invocation<'_, C>,
    ) -> Result<(), AutomationError>;
}

fn unexpected_action<C>(expected: ActionKind, action: &Action<C>) -> AutomationError {
    AutomationError::InvalidAction(format!(
        "{expected} executor cannot run a {} action",
        action.kind()
    ))
}

/// Waits for the declared duration
pub struct DelayExecutor;

#[async_trait]
impl<C: Send + Sync + 'static> ActionExecutor<C> for DelayExecutor {
    async fn execute(
        &self,
        action: &Action<C>,
        invocation: Invocation<'_, C>,
    ) -> Result<(), AutomationError> {
        let Action::Delay { duration } = action else {
            return Err(unexpected_action(ActionKind::Delay, action));
        };

        tracing::debug!("Delaying for {:?}", duration);
        tokio::select! {
            () = invocation.cancel.cancelled() => {
                Err(AutomationError::Cancelled(invocation.automation_id.to_string()))
            }
            () = tokio::time::sleep(*duration) => Ok(()),
        }
    }
}

/// Invokes a command against the context
pub struct CommandExecutor;

#[async_trait]
impl<C: Send + Sync + 'static> ActionExecutor<C> for CommandExecutor {
    async fn execute(
        &self,
        action: &Action<C>,
        invocation: Invocation<'_, C>,
    ) -> Result<(), AutomationError> {
        let Action::Command { command } = action else {
            return Err(unexpected_action(ActionKind::Command, action));
        };

        if !command.can_execute(invocation.context) {
            tracing::debug!(
                "Command '{}' cannot execute for automation {}, skipping",
                command.name(),
                invocation.automation_id
            );
            return Ok(());
        }

        command
            .execute(invocation.context)
            .await
            .map_err(|source| AutomationError::CommandFailed {
                command: command.name().to_string(),
                source,
            })
    }
}

/// Runs another automation with the current context
pub struct AutomationExecutor<C> {
    manager: Arc<dyn AutomationManager<C>>,
}

impl<C> AutomationExecutor<C> {
    pub fn new(manager: Arc<dyn AutomationManager<C>>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl<C: Send + Sync + 'static> ActionExecutor<C> for AutomationExecutor<C> {
    async fn execute(
        &self,
        action: &Action<C>,
        invocation: Invocation<'_, C>,
    ) -> Result<(), AutomationError> {
        let Action::Automation { automation_id } = action else {
            return Err(unexpected_action(ActionKind::Automation, action));
        };

        let nested = self.manager.resolve(automation_id)?;
        invocation
            .service
            .execute_nested(
                &nested,
                invocation.context,
                invocation.cancel,
                invocation.chain,
            )
            .await
    }
}

/// Registry of executors keyed by action kind
pub struct ActionExecutorFactory<C> {
    executors: HashMap<ActionKind, Arc<dyn ActionExecutor<C>>>,
}

impl<C: Send + Sync + 'static> ActionExecutorFactory<C> {
    /// Factory with no executors registered
    #[must_use]
    pub fn empty() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Factory with the built-in delay, command and nested automation executors
    #[must_use]
    pub fn with_defaults(manager: Arc<dyn AutomationManager<C>>) -> Self {
        Self::empty()
            .with_executor(ActionKind::Delay, DelayExecutor)
            .with_executor(ActionKind::Command, CommandExecutor)
            .with_executor(ActionKind::Automation, AutomationExecutor::new(manager))
    }

    /// Register or replace the executor for `kind`
    #[must_use]
    pub fn with_executor(
        mut self,
        kind: ActionKind,
        executor: impl ActionExecutor<C> + 'static,
    ) -> Self {
        self.executors.insert(kind, Arc::new(executor));
        self
    }

    /// Look up the executor for `kind`
    pub fn resolve(&self, kind: ActionKind) -> Result<Arc<dyn ActionExecutor<C>>, AutomationError> {
        self.executors
            .get(&kind)
            .cloned()
            .ok_or_else(|| AutomationError::ExecutorNotRegistered(kind.to_string()))
    }

    /// Whether an executor is registered for `kind`
    #[must_use]
    pub fn supports(&self, kind: ActionKind) -> bool {
        self.executors.contains_key(&kind)
    }
}
