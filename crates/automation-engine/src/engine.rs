//! Automation service: gate, queue and run an automation
//!
//! One call to [`AutomationService::execute`] moves through
//! `Validating -> Queuing -> Executing` and ends `Succeeded`, `Failed` or
//! cancelled. The service keeps no per-automation state between calls, so
//! any number of executions may run concurrently.

use crate::error::AutomationError;
use crate::evaluator::OperatorStrategyFactory;
use crate::executor::{ActionExecutorFactory, Invocation};
use crate::model::{ActionResult, Automation};
use crate::options::EngineOptions;
use crate::queue::{ActionQueue, QueueEntry};
use crate::registry::AutomationManager;
use chrono::Utc;
use futures::future::BoxFuture;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How an execution ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Succeeded,
    /// Inactive automation or conditions not met
    Skipped,
    Failed,
    Cancelled,
    TimedOut,
}

/// Events emitted during execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// An automation started validating
    Started { automation_id: String, depth: usize },
    /// An action invocation started
    ActionStarted {
        automation_id: String,
        action_index: usize,
    },
    /// An action invocation completed
    ActionCompleted {
        automation_id: String,
        action_index: usize,
    },
    /// An action invocation failed
    ActionFailed {
        automation_id: String,
        action_index: usize,
        error: String,
    },
    /// An automation finished
    Finished {
        automation_id: String,
        outcome: ExecutionOutcome,
    },
}

enum RunOutcome {
    Succeeded,
    Skipped,
    Failed(AutomationError),
}

struct RunReport {
    outcome: RunOutcome,
    executed: usize,
}

impl RunReport {
    fn skipped() -> Self {
        Self {
            outcome: RunOutcome::Skipped,
            executed: 0,
        }
    }
}

/// Orchestrates condition checks, queue building and execution
pub struct AutomationService<C> {
    executors: ActionExecutorFactory<C>,
    operators: OperatorStrategyFactory<C>,
    options: EngineOptions,
    event_tx: broadcast::Sender<ExecutionEvent>,
}

impl<C: Send + Sync + 'static> AutomationService<C> {
    /// Create a service from explicit collaborators
    pub fn new(
        executors: ActionExecutorFactory<C>,
        operators: OperatorStrategyFactory<C>,
        options: EngineOptions,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(options.event_capacity.max(1));
        Self {
            executors,
            operators,
            options,
            event_tx,
        }
    }

    /// Create a service with the built-in executors and AND/OR strategies
    pub fn with_manager(manager: Arc<dyn AutomationManager<C>>, options: EngineOptions) -> Self {
        Self::new(
            ActionExecutorFactory::with_defaults(manager),
            OperatorStrategyFactory::default(),
            options,
        )
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Subscribe to execution events
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_tx.subscribe()
    }

    /// Run an automation against `context`.
    ///
    /// Business failures come back as `Ok` with `succeeded == false` and the
    /// error recorded. Cancellation, timeout and configuration errors come
    /// back as `Err`.
    pub async fn execute(
        &self,
        automation: &Automation<C>,
        context: C,
        cancel: &CancellationToken,
    ) -> Result<ActionResult<C>, AutomationError> {
        let started_at = Utc::now();
        let mut context = context;

        let report = self.run(automation, &mut context, cancel, &[]).await?;
        let (succeeded, error) = match report.outcome {
            RunOutcome::Succeeded => (true, None),
            RunOutcome::Skipped => (false, None),
            RunOutcome::Failed(e) => (false, Some(e)),
        };

        Ok(ActionResult {
            automation_id: automation.id.clone(),
            succeeded,
            result: context,
            error,
            actions_executed: report.executed,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Run an automation on a new task, for use from trigger callbacks
    pub fn spawn_execute(
        self: &Arc<Self>,
        automation: Arc<Automation<C>>,
        context: C,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<ActionResult<C>, AutomationError>> {
        let service = Arc::clone(self);
        tokio::spawn(async move { service.execute(&automation, context, &cancel).await })
    }

    /// Run a nested automation in place on the caller's context
    pub(crate) async fn execute_nested(
        &self,
        automation: &Automation<C>,
        context: &mut C,
        cancel: &CancellationToken,
        chain: &[String],
    ) -> Result<(), AutomationError> {
        let report = self.run(automation, context, cancel, chain).await?;
        match report.outcome {
            RunOutcome::Succeeded => Ok(()),
            RunOutcome::Skipped => {
                tracing::info!(
                    "Nested automation '{}' skipped, continuing",
                    automation.name
                );
                Ok(())
            }
            RunOutcome::Failed(source) => Err(AutomationError::NestedFailed {
                automation_id: automation.id.clone(),
                source: Box::new(source),
            }),
        }
    }

    /// Timeout for one run: the automation's own, else the engine default.
    /// Zero means unbounded.
    fn effective_timeout(&self, automation: &Automation<C>) -> Option<Duration> {
        automation
            .execution_timeout
            .or_else(|| self.options.default_timeout())
            .filter(|timeout| !timeout.is_zero())
    }

    fn check_chain(
        &self,
        automation: &Automation<C>,
        chain: &[String],
    ) -> Result<(), AutomationError> {
        if chain.contains(&automation.id) {
            let path: Vec<&str> = chain
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(automation.id.as_str()))
                .collect();
            return Err(AutomationError::CircularReference(path.join(" -> ")));
        }
        // Top-level runs are never rejected, only nested ones
        if !chain.is_empty() && chain.len() >= self.options.max_nesting_depth {
            return Err(AutomationError::NestingTooDeep {
                automation_id: automation.id.clone(),
                limit: self.options.max_nesting_depth,
            });
        }
        Ok(())
    }

    fn finish(&self, automation_id: &str, outcome: ExecutionOutcome) {
        let _ = self.event_tx.send(ExecutionEvent::Finished {
            automation_id: automation_id.to_string(),
            outcome,
        });
    }

    /// Boxed so nested automation actions can recurse through it
    fn run<'a>(
        &'a self,
        automation: &'a Automation<C>,
        context: &'a mut C,
        cancel: &'a CancellationToken,
        parent_chain: &'a [String],
    ) -> BoxFuture<'a, Result<RunReport, AutomationError>> {
        Box::pin(async move {
            self.check_chain(automation, parent_chain)?;

            let _ = self.event_tx.send(ExecutionEvent::Started {
                automation_id: automation.id.clone(),
                depth: parent_chain.len(),
            });

            // Validating
            if !automation.is_active {
                tracing::debug!("Automation '{}' is inactive, skipping", automation.name);
                self.finish(&automation.id, ExecutionOutcome::Skipped);
                return Ok(RunReport::skipped());
            }

            let gate = self.operators.evaluate_all(
                automation.condition_operator,
                &automation.conditions,
                context,
            );
            match gate {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(
                        "Automation '{}' conditions not met, skipping",
                        automation.name
                    );
                    self.finish(&automation.id, ExecutionOutcome::Skipped);
                    return Ok(RunReport::skipped());
                }
                Err(e) if e.escapes_pipeline() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        "Automation '{}' conditions could not be evaluated: {}",
                        automation.name,
                        e
                    );
                    self.finish(&automation.id, ExecutionOutcome::Failed);
                    return Ok(RunReport {
                        outcome: RunOutcome::Failed(e),
                        executed: 0,
                    });
                }
            }

            // Queuing
            let queue = ActionQueue::build(&automation.actions, &self.executors)?;

            // Executing
            let mut chain = parent_chain.to_vec();
            chain.push(automation.id.clone());
            let scope = cancel.child_token();
            let timeout = self.effective_timeout(automation);
            let deadline = async move {
                match timeout {
                    Some(limit) => tokio::time::sleep(limit).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tracing::info!(
                "Executing automation '{}' ({} queued action(s), timeout {:?})",
                automation.name,
                queue.len(),
                timeout
            );

            let mut executed = 0;
            let result = tokio::select! {
                biased;
                () = scope.cancelled() => {
                    Err(AutomationError::Cancelled(automation.id.clone()))
                }
                () = deadline => {
                    scope.cancel();
                    Err(AutomationError::TimedOut {
                        automation_id: automation.id.clone(),
                        timeout: timeout.unwrap_or_default(),
                    })
                }
                result = self.run_queue(
                    automation,
                    &queue,
                    context,
                    &scope,
                    &chain,
                    &mut executed,
                ) => result,
            };

            match result {
                Ok(()) => {
                    tracing::info!(
                        "Automation '{}' succeeded after {} action(s)",
                        automation.name,
                        executed
                    );
                    self.finish(&automation.id, ExecutionOutcome::Succeeded);
                    Ok(RunReport {
                        outcome: RunOutcome::Succeeded,
                        executed,
                    })
                }
                Err(e) if e.escapes_pipeline() => {
                    let outcome = match &e {
                        AutomationError::TimedOut { .. } => ExecutionOutcome::TimedOut,
                        AutomationError::Cancelled(_) => ExecutionOutcome::Cancelled,
                        _ => ExecutionOutcome::Failed,
                    };
                    tracing::warn!("Automation '{}' stopped: {}", automation.name, e);
                    self.finish(&automation.id, outcome);
                    Err(e)
                }
                Err(e) => {
                    tracing::warn!("Automation '{}' failed: {}", automation.name, e);
                    self.finish(&automation.id, ExecutionOutcome::Failed);
                    Ok(RunReport {
                        outcome: RunOutcome::Failed(e),
                        executed,
                    })
                }
            }
        })
    }

    /// Execute queue entries strictly in order, stopping at the first error
    async fn run_queue(
        &self,
        automation: &Automation<C>,
        queue: &ActionQueue<'_, C>,
        context: &mut C,
        scope: &CancellationToken,
        chain: &[String],
        executed: &mut usize,
    ) -> Result<(), AutomationError> {
        for entry in queue.entries() {
            let Some(policy) = &entry.repeat else {
                self.invoke(automation, entry, context, scope, chain).await?;
                *executed += 1;
                continue;
            };

            let mut iterations = 0;
            while iterations < policy.max_iterations && policy.should_continue(context) {
                self.invoke(automation, entry, context, scope, chain).await?;
                *executed += 1;
                iterations += 1;
            }
            if iterations == policy.max_iterations && policy.should_continue(context) {
                tracing::debug!(
                    "Repeat of action {} in '{}' stopped at cap of {} iteration(s)",
                    entry.index,
                    automation.name,
                    policy.max_iterations
                );
            }
        }
        Ok(())
    }

    async fn invoke(
        &self,
        automation: &Automation<C>,
        entry: &QueueEntry<'_, C>,
        context: &mut C,
        scope: &CancellationToken,
        chain: &[String],
    ) -> Result<(), AutomationError> {
        if scope.is_cancelled() {
            return Err(AutomationError::Cancelled(automation.id.clone()));
        }

        let _ = self.event_tx.send(ExecutionEvent::ActionStarted {
            automation_id: automation.id.clone(),
            action_index: entry.index,
        });

        let invocation = Invocation {
            automation_id: &automation.id,
            context,
            cancel: scope,
            service: self,
            chain,
        };

        match entry.executor.execute(entry.action, invocation).await {
            Ok(()) => {
                let _ = self.event_tx.send(ExecutionEvent::ActionCompleted {
                    automation_id: automation.id.clone(),
                    action_index: entry.index,
                });
                Ok(())
            }
            Err(e) => {
                let _ = self.event_tx.send(ExecutionEvent::ActionFailed {
                    automation_id: automation.id.clone(),
                    action_index: entry.index,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::{Observable, PropertyAccessor};
    use crate::command::FnCommand;
    use crate::evaluator::{Condition, ConditionOperator};
    use crate::model::Action;
    use crate::registry::AutomationRegistry;
    use crate::trigger::BooleanStateTrigger;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Clone, Default)]
    struct Person {
        name: String,
        email: String,
        age: i64,
        log: Vec<String>,
    }

    fn person(age: i64) -> Person {
        Person {
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            age,
            log: Vec::new(),
        }
    }

    fn setup() -> (Arc<AutomationRegistry<Person>>, AutomationService<Person>) {
        setup_with(EngineOptions::default())
    }

    fn setup_with(
        options: EngineOptions,
    ) -> (Arc<AutomationRegistry<Person>>, AutomationService<Person>) {
        let registry = Arc::new(AutomationRegistry::new());
        let manager: Arc<dyn AutomationManager<Person>> = registry.clone();
        (registry, AutomationService::with_manager(manager, options))
    }

    fn note(text: &'static str) -> Action<Person> {
        Action::command(FnCommand::new(text, move |p: &mut Person| {
            p.log.push(text.to_string());
        }))
    }

    fn flag(name: &'static str, flag: &Arc<AtomicBool>) -> Action<Person> {
        let flag = Arc::clone(flag);
        Action::command(FnCommand::new(name, move |_: &mut Person| {
            flag.store(true, Ordering::SeqCst);
        }))
    }

    fn birthday() -> Action<Person> {
        Action::command(FnCommand::new("birthday", |p: &mut Person| p.age += 1))
    }

    fn signup_automation() -> Automation<Person> {
        Automation::with_id("signup", "welcome adults")
            .with_condition(Condition::new("signup", "name", |p: &Person| !p.name.is_empty()))
            .with_condition(Condition::new("signup", "email", |p: &Person| !p.email.is_empty()))
            .with_condition(Condition::new("signup", "adult", |p: &Person| p.age >= 18))
            .with_action(note("welcome"))
            .with_action(note("send newsletter"))
    }

    #[tokio::test]
    async fn test_repeat_until_stops_at_target() {
        let (_, service) = setup();
        let automation = Automation::with_id("age", "age up")
            .with_action(birthday())
            .with_action(Action::repeat_until(|p: &Person| p.age >= 30, 100));

        let result = service
            .execute(&automation, person(20), &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.succeeded);
        assert_eq!(result.result.age, 30);
        assert_eq!(result.actions_executed, 10);
    }

    #[tokio::test]
    async fn test_repeat_cap_is_not_failure() {
        let (_, service) = setup();
        let automation = Automation::with_id("age", "age up")
            .with_action(birthday())
            .with_action(Action::repeat_while(|_: &Person| true, 3))
            .with_action(note("done"));

        let result = service
            .execute(&automation, person(0), &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.succeeded);
        assert_eq!(result.result.age, 4);
        assert_eq!(result.result.log, vec!["done".to_string()]);
    }

    #[tokio::test]
    async fn test_repeat_while_skips_when_predicate_false() {
        let (_, service) = setup();
        let automation = Automation::with_id("age", "age up")
            .with_action(birthday())
            .with_action(Action::repeat_while(|p: &Person| p.age < 5, 10));

        let result = service
            .execute(&automation, person(10), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.result.age, 11);
        assert_eq!(result.actions_executed, 1);
    }

    #[tokio::test]
    async fn test_condition_gate() {
        let (_, service) = setup();
        let automation = signup_automation();

        let minor = service
            .execute(&automation, person(16), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!minor.succeeded);
        assert!(minor.was_skipped());
        assert_eq!(minor.actions_executed, 0);
        assert!(minor.result.log.is_empty());

        let adult = service
            .execute(&automation, person(25), &CancellationToken::new())
            .await
            .unwrap();
        assert!(adult.succeeded);
        assert_eq!(adult.actions_executed, 2);
        assert_eq!(adult.result.log, vec!["welcome", "send newsletter"]);
    }

    #[tokio::test]
    async fn test_or_operator_gate() {
        let (_, service) = setup();
        let automation = Automation::with_id("either", "either")
            .with_operator(ConditionOperator::Or)
            .with_condition(Condition::new("either", "minor", |p: &Person| p.age < 18))
            .with_condition(Condition::new("either", "senior", |p: &Person| p.age >= 65))
            .with_action(note("discount"));

        let worker = service
            .execute(&automation, person(40), &CancellationToken::new())
            .await
            .unwrap();
        assert!(worker.was_skipped());

        let senior = service
            .execute(&automation, person(70), &CancellationToken::new())
            .await
            .unwrap();
        assert!(senior.succeeded);
    }

    #[tokio::test]
    async fn test_inactive_automation_runs_nothing() {
        let (_, service) = setup();
        let automation = signup_automation().with_active(false);
        let result = service
            .execute(&automation, person(30), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.was_skipped());
        assert!(result.result.log.is_empty());
    }

    #[tokio::test]
    async fn test_command_failure_stops_queue() {
        let (_, service) = setup();
        let after = Arc::new(AtomicBool::new(false));
        let automation = Automation::with_id("fail", "fails")
            .with_action(note("before"))
            .with_action(Action::command(FnCommand::fallible(
                "charge card",
                |_: &mut Person| Err("card declined".into()),
            )))
            .with_action(flag("after", &after));

        let result = service
            .execute(&automation, person(30), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!result.succeeded);
        assert_eq!(result.actions_executed, 1);
        assert_eq!(result.result.log, vec!["before"]);
        assert!(matches!(
            result.error,
            Some(AutomationError::CommandFailed { ref command, .. }) if command == "charge card"
        ));
        assert!(!after.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_cancellation_not_failure() {
        let (_, service) = setup();
        let first = Arc::new(AtomicBool::new(false));
        let second = Arc::new(AtomicBool::new(false));
        let automation = Automation::with_id("slow", "slow chain")
            .with_timeout(Duration::from_millis(50))
            .with_action(Action::delay(Duration::from_millis(20)))
            .with_action(flag("first", &first))
            .with_action(Action::delay(Duration::from_millis(100)))
            .with_action(flag("second", &second));

        let err = service
            .execute(&automation, person(30), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_cancellation());
        assert!(matches!(
            err,
            AutomationError::TimedOut { ref automation_id, .. } if automation_id == "slow"
        ));
        assert!(first.load(Ordering::SeqCst));
        assert!(!second.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_timeout_from_options() {
        let (_, service) = setup_with(EngineOptions {
            default_timeout_ms: Some(10),
            ..EngineOptions::default()
        });
        let automation =
            Automation::with_id("slow", "slow").with_action(Action::delay(Duration::from_secs(1)));
        let err = service
            .execute(&automation, person(30), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::TimedOut { .. }));

        let unbounded = Automation::with_id("slow", "slow")
            .with_timeout(Duration::ZERO)
            .with_action(Action::delay(Duration::from_secs(1)));
        let result = service
            .execute(&unbounded, person(30), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_cancellation() {
        let (_, service) = setup();
        let after = Arc::new(AtomicBool::new(false));
        let automation = Automation::with_id("wait", "long wait")
            .with_action(Action::delay(Duration::from_secs(3600)))
            .with_action(flag("after", &after));

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let err = service
            .execute(&automation, person(30), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::Cancelled(ref id) if id == "wait"));
        assert!(!after.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_nested_automation_shares_context() {
        let (registry, service) = setup();
        registry
            .register(
                Automation::with_id("inner", "inner")
                    .with_action(birthday())
                    .with_action(note("inner")),
            )
            .unwrap();
        let outer = Automation::with_id("outer", "outer")
            .with_action(note("outer start"))
            .with_action(Action::automation("inner"))
            .with_action(note("outer end"));

        let result = service
            .execute(&outer, person(40), &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.succeeded);
        assert_eq!(result.result.age, 41);
        assert_eq!(result.result.log, vec!["outer start", "inner", "outer end"]);
    }

    #[tokio::test]
    async fn test_nested_gate_does_not_fail_parent() {
        let (registry, service) = setup();
        registry
            .register(
                Automation::with_id("seniors", "seniors only")
                    .with_condition(Condition::new("seniors", "senior", |p: &Person| p.age >= 65))
                    .with_action(note("senior perk")),
            )
            .unwrap();
        let outer = Automation::with_id("outer", "outer")
            .with_action(Action::automation("seniors"))
            .with_action(note("outer end"));

        let result = service
            .execute(&outer, person(30), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.succeeded);
        assert_eq!(result.result.log, vec!["outer end"]);
    }

    #[tokio::test]
    async fn test_nested_failure_is_wrapped() {
        let (registry, service) = setup();
        registry
            .register(Automation::with_id("inner", "inner").with_action(Action::command(
                FnCommand::fallible("explode", |_: &mut Person| Err("boom".into())),
            )))
            .unwrap();
        let outer = Automation::with_id("outer", "outer").with_action(Action::automation("inner"));

        let result = service
            .execute(&outer, person(30), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.succeeded);
        assert!(matches!(
            result.error,
            Some(AutomationError::NestedFailed { ref automation_id, .. })
                if automation_id == "inner"
        ));
    }

    #[tokio::test]
    async fn test_cycle_is_configuration_error() {
        let (registry, service) = setup();
        registry
            .register(Automation::with_id("a", "a").with_action(Action::automation("b")))
            .unwrap();
        registry
            .register(Automation::with_id("b", "b").with_action(Action::automation("a")))
            .unwrap();
        let a = registry.get("a").unwrap();

        let err = service
            .execute(&a, person(30), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AutomationError::CircularReference(ref path) if path == "a -> b -> a"
        ));
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_missing_nested_automation() {
        let (_, service) = setup();
        let outer = Automation::with_id("outer", "outer").with_action(Action::automation("ghost"));
        let err = service
            .execute(&outer, person(30), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::NotFound(ref id) if id == "ghost"));
    }

    #[tokio::test]
    async fn test_nesting_depth_limit() {
        let (registry, service) = setup_with(EngineOptions {
            max_nesting_depth: 2,
            ..EngineOptions::default()
        });
        registry
            .register(Automation::with_id("c", "c").with_action(note("c")))
            .unwrap();
        registry
            .register(Automation::with_id("b", "b").with_action(Action::automation("c")))
            .unwrap();
        let a = Automation::with_id("a", "a").with_action(Action::automation("b"));

        let err = service
            .execute(&a, person(30), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::NestingTooDeep { limit: 2, .. }));
    }

    #[tokio::test]
    async fn test_zero_nesting_depth_still_runs_top_level() {
        let (registry, service) = setup_with(EngineOptions {
            max_nesting_depth: 0,
            ..EngineOptions::default()
        });
        registry
            .register(Automation::with_id("b", "b").with_action(note("b")))
            .unwrap();

        let plain = Automation::with_id("a", "a").with_action(note("a"));
        let result = service
            .execute(&plain, person(30), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.succeeded);

        let nesting = Automation::with_id("a", "a").with_action(Action::automation("b"));
        let err = service
            .execute(&nesting, person(30), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::NestingTooDeep { limit: 0, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_executions_are_independent() {
        let (_, service) = setup();
        let slow = Automation::with_id("slow", "slow")
            .with_timeout(Duration::from_millis(50))
            .with_action(birthday())
            .with_action(Action::delay(Duration::from_millis(100)))
            .with_action(note("slow done"));
        let quick = Automation::with_id("quick", "quick")
            .with_timeout(Duration::from_millis(500))
            .with_action(Action::delay(Duration::from_millis(80)))
            .with_action(birthday())
            .with_action(note("quick done"));
        let token = CancellationToken::new();

        let (slow_result, first, second) = tokio::join!(
            service.execute(&slow, person(30), &token),
            service.execute(&quick, person(40), &token),
            service.execute(&quick, person(60), &token),
        );

        assert!(matches!(
            slow_result,
            Err(AutomationError::TimedOut { ref automation_id, .. }) if automation_id == "slow"
        ));
        assert!(!token.is_cancelled());

        let first = first.unwrap();
        assert!(first.succeeded);
        assert_eq!(first.result.age, 41);
        assert_eq!(first.result.log, vec!["quick done"]);

        let second = second.unwrap();
        assert!(second.succeeded);
        assert_eq!(second.result.age, 61);
        assert_eq!(second.result.log, vec!["quick done"]);
    }

    #[tokio::test]
    async fn test_unregistered_executor_surfaces() {
        let service = AutomationService::new(
            ActionExecutorFactory::empty(),
            OperatorStrategyFactory::default(),
            EngineOptions::default(),
        );
        let automation = Automation::with_id("a", "a").with_action(note("never"));
        let err = service
            .execute(&automation, person(30), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::ExecutorNotRegistered(_)));
    }

    #[tokio::test]
    async fn test_events_follow_execution() {
        let (_, service) = setup();
        let mut rx = service.subscribe();
        let automation = Automation::with_id("evt", "events").with_action(note("only"));

        service
            .execute(&automation, person(30), &CancellationToken::new())
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], ExecutionEvent::Started { depth: 0, .. }));
        assert!(matches!(events[1], ExecutionEvent::ActionStarted { action_index: 0, .. }));
        assert!(matches!(events[2], ExecutionEvent::ActionCompleted { action_index: 0, .. }));
        assert!(matches!(
            events[3],
            ExecutionEvent::Finished {
                outcome: ExecutionOutcome::Succeeded,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_trigger_callback_spawns_execution() {
        let (registry, service) = setup();
        let service = Arc::new(service);
        let profile = Arc::new(Observable::new(person(17)));
        let adult = PropertyAccessor::new(Arc::clone(&profile), "adult", |p: &Person| p.age >= 18);
        let age = PropertyAccessor::new(Arc::clone(&profile), "age", |p: &Person| p.age)
            .with_setter(|p, v| p.age = v);

        let handles = Arc::new(Mutex::new(Vec::new()));
        let trigger = {
            let registry = Arc::clone(&registry);
            let service = Arc::clone(&service);
            let profile = Arc::clone(&profile);
            let handles = Arc::clone(&handles);
            BooleanStateTrigger::new("signup", adult, false, true, move |_| {
                if let Some(automation) = registry.get("signup") {
                    let context = profile.snapshot();
                    handles.lock().push(service.spawn_execute(
                        automation,
                        context,
                        CancellationToken::new(),
                    ));
                }
            })
            .unwrap()
        };

        registry
            .register(signup_automation().with_trigger(trigger))
            .unwrap();
        registry.activate("signup").unwrap();

        age.set(18).unwrap();
        age.set(19).unwrap();

        let spawned: Vec<_> = handles.lock().drain(..).collect();
        assert_eq!(spawned.len(), 1);
        for handle in spawned {
            let result = handle.await.unwrap().unwrap();
            assert!(result.succeeded);
            assert_eq!(result.result.age, 18);
        }
    }
}
