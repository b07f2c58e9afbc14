//! Condition evaluation for automations

use crate::error::{AutomationError, BoxError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type ConditionFn<C> = Arc<dyn Fn(&C) -> Result<bool, BoxError> + Send + Sync>;

/// A predicate over the execution context that gates an automation
pub struct Condition<C> {
    automation_id: String,
    name: String,
    predicate: ConditionFn<C>,
}

impl<C> Condition<C> {
    /// Create a condition from an infallible predicate
    pub fn new(
        automation_id: impl Into<String>,
        name: impl Into<String>,
        predicate: impl Fn(&C) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::fallible(automation_id, name, move |ctx| Ok(predicate(ctx)))
    }

    /// Create a condition whose predicate can report malformed state
    pub fn fallible(
        automation_id: impl Into<String>,
        name: impl Into<String>,
        predicate: impl Fn(&C) -> Result<bool, BoxError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            automation_id: automation_id.into(),
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn automation_id(&self) -> &str {
        &self.automation_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluate against `ctx`. A `false` verdict is never an error.
    pub fn evaluate(&self, ctx: &C) -> Result<bool, AutomationError> {
        (self.predicate)(ctx).map_err(|source| AutomationError::ConditionFailed {
            condition: self.name.clone(),
            source,
        })
    }
}

impl<C> fmt::Debug for Condition<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("automation_id", &self.automation_id)
            .field("name", &self.name)
            .finish()
    }
}

/// How an automation combines its conditions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    #[default]
    And,
    Or,
}

impl fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => f.write_str("and"),
            Self::Or => f.write_str("or"),
        }
    }
}

/// Strategy combining a list of conditions into one verdict
pub trait OperatorStrategy<C>: Send + Sync {
    fn combine(&self, conditions: &[Condition<C>], ctx: &C) -> Result<bool, AutomationError>;
}

/// All conditions must hold; stops at the first `false`
pub struct AndStrategy;

impl<C> OperatorStrategy<C> for AndStrategy {
    fn combine(&self, conditions: &[Condition<C>], ctx: &C) -> Result<bool, AutomationError> {
        for condition in conditions {
            if !condition.evaluate(ctx)? {
                tracing::debug!("Condition '{}' not met", condition.name());
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Any condition must hold; stops at the first `true`
pub struct OrStrategy;

impl<C> OperatorStrategy<C> for OrStrategy {
    fn combine(&self, conditions: &[Condition<C>], ctx: &C) -> Result<bool, AutomationError> {
        for condition in conditions {
            if condition.evaluate(ctx)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Registry of operator strategies keyed by [`ConditionOperator`]
pub struct OperatorStrategyFactory<C> {
    strategies: HashMap<ConditionOperator, Arc<dyn OperatorStrategy<C>>>,
}

impl<C> OperatorStrategyFactory<C> {
    /// Factory with no strategies registered
    #[must_use]
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    /// Register or replace the strategy for `operator`
    #[must_use]
    pub fn with_strategy(
        mut self,
        operator: ConditionOperator,
        strategy: impl OperatorStrategy<C> + 'static,
    ) -> Self {
        self.strategies.insert(operator, Arc::new(strategy));
        self
    }

    /// Look up the strategy for `operator`
    pub fn resolve(
        &self,
        operator: ConditionOperator,
    ) -> Result<Arc<dyn OperatorStrategy<C>>, AutomationError> {
        self.strategies
            .get(&operator)
            .cloned()
            .ok_or_else(|| AutomationError::OperatorNotRegistered(operator.to_string()))
    }

    /// Evaluate `conditions` with the strategy for `operator`.
    ///
    /// An empty list always passes.
    pub fn evaluate_all(
        &self,
        operator: ConditionOperator,
        conditions: &[Condition<C>],
        ctx: &C,
    ) -> Result<bool, AutomationError> {
        let strategy = self.resolve(operator)?;
        if conditions.is_empty() {
            return Ok(true);
        }
        strategy.combine(conditions, ctx)
    }
}

impl<C> Default for OperatorStrategyFactory<C> {
    fn default() -> Self {
        Self::empty()
            .with_strategy(ConditionOperator::And, AndStrategy)
            .with_strategy(ConditionOperator::Or, OrStrategy)
    }
}
