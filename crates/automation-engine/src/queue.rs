//! Expansion of an automation's action list into an execution plan

use crate::error::AutomationError;
use crate::executor::{ActionExecutor, ActionExecutorFactory};
use crate::model::{Action, Predicate, RepeatKind};
use std::sync::Arc;

/// Loop bound to a queue entry produced from a `RepeatPrevious` action
pub struct RepeatPolicy<'a, C> {
    pub kind: RepeatKind,
    pub predicate: &'a Predicate<C>,
    pub max_iterations: u32,
}

impl<C> RepeatPolicy<'_, C> {
    /// Whether another repetition should start given the current context
    pub fn should_continue(&self, ctx: &C) -> bool {
        self.kind.should_continue((self.predicate)(ctx))
    }
}

/// One step of the plan: an action, its executor and an optional loop
pub struct QueueEntry<'a, C> {
    /// Declaration index of `action`
    pub index: usize,
    pub action: &'a Action<C>,
    pub executor: Arc<dyn ActionExecutor<C>>,
    /// Present when this entry re-runs an earlier action
    pub repeat: Option<RepeatPolicy<'a, C>>,
}

/// Ordered, repeat-expanded plan for one execution
pub struct ActionQueue<'a, C> {
    entries: Vec<QueueEntry<'a, C>>,
}

impl<'a, C: Send + Sync + 'static> ActionQueue<'a, C> {
    /// Resolve executors for `actions` and bind repeat actions to the action
    /// before them.
    ///
    /// A repeat following another repeat binds to the same underlying action.
    pub fn build(
        actions: &'a [Action<C>],
        executors: &ActionExecutorFactory<C>,
    ) -> Result<Self, AutomationError> {
        let mut entries = Vec::with_capacity(actions.len());
        let mut previous: Option<(usize, &'a Action<C>, Arc<dyn ActionExecutor<C>>)> = None;

        for (index, action) in actions.iter().enumerate() {
            if let Action::RepeatPrevious {
                kind,
                predicate,
                max_iterations,
            } = action
            {
                let (target_index, target, executor) = previous.clone().ok_or_else(|| {
                    AutomationError::InvalidAction(format!(
                        "repeat action at position {index} has no preceding action"
                    ))
                })?;
                entries.push(QueueEntry {
                    index: target_index,
                    action: target,
                    executor,
                    repeat: Some(RepeatPolicy {
                        kind: *kind,
                        predicate,
                        max_iterations: *max_iterations,
                    }),
                });
                continue;
            }

            let executor = executors.resolve(action.kind())?;
            previous = Some((index, action, Arc::clone(&executor)));
            entries.push(QueueEntry {
                index,
                action,
                executor,
                repeat: None,
            });
        }

        Ok(Self { entries })
    }
}

impl<'a, C> ActionQueue<'a, C> {
    pub fn entries(&self) -> &[QueueEntry<'a, C>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
