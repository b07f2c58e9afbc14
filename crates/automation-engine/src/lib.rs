//! Automation execution engine
//!
//! Watches observable state and events through triggers, gates execution
//! behind composable conditions and runs an ordered, cancellable queue of
//! actions.

pub mod accessor;
pub mod command;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod model;
pub mod options;
pub mod queue;
pub mod registry;
pub mod trigger;

pub use accessor::{EventSource, Observable, PropertyAccessor, Subscription};
pub use command::{Command, FnCommand};
pub use engine::{AutomationService, ExecutionEvent, ExecutionOutcome};
pub use error::{AutomationError, BoxError};
pub use evaluator::{Condition, ConditionOperator, OperatorStrategy, OperatorStrategyFactory};
pub use executor::{ActionExecutor, ActionExecutorFactory, Invocation};
pub use model::*;
pub use options::EngineOptions;
pub use registry::{AutomationManager, AutomationRegistry};
pub use trigger::{
    BooleanStateTrigger, EventTrigger, IntegerStateTrigger, StateTrigger, StringStateTrigger,
    Trigger, TriggerKind,
};

// Re-export CancellationToken for callers of `AutomationService::execute`
pub use tokio_util::sync::CancellationToken;
