//! Automation demo - wires triggers, conditions and actions around a
//! member profile and runs them end to end

use automation_engine::{
    Action, ActionResult, Automation, AutomationError, AutomationRegistry, AutomationService,
    BooleanStateTrigger, CancellationToken, Condition, EngineOptions, EventSource, EventTrigger,
    FnCommand, IntegerStateTrigger, Observable, PropertyAccessor,
};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Execution context shared by every automation in the demo
#[derive(Debug, Clone, Default)]
struct Member {
    name: String,
    email: String,
    age: i64,
    adult: bool,
    notes: Vec<String>,
}

/// Payload of the sign-up event
#[derive(Debug, Clone)]
struct SignUp {
    name: String,
    email: String,
    age: i64,
}

/// Shared pieces a trigger callback needs to start an execution
#[derive(Clone)]
struct Launcher {
    registry: Weak<AutomationRegistry<Member>>,
    service: Arc<AutomationService<Member>>,
    shutdown: CancellationToken,
    /// Spawned executions, awaited before shutdown
    running: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Launcher {
    /// Run automation `id` with `context`, logging the outcome
    fn launch(&self, id: &str, context: Member) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let Some(automation) = registry.get(id) else {
            tracing::warn!("Trigger fired for unknown automation {}", id);
            return;
        };

        let handle = self
            .service
            .spawn_execute(automation, context, self.shutdown.child_token());
        self.running
            .lock()
            .push(tokio::spawn(report(id.to_string(), handle)));
    }
}

async fn report(id: String, handle: JoinHandle<Result<ActionResult<Member>, AutomationError>>) {
    match handle.await {
        Ok(Ok(result)) if result.succeeded => tracing::info!(
            "Automation {} succeeded after {} action(s): {:?}",
            id,
            result.actions_executed,
            result.result
        ),
        Ok(Ok(result)) => match result.error {
            Some(e) => tracing::error!("Automation {} failed: {}", id, e),
            None => tracing::info!("Automation {} skipped: conditions not met", id),
        },
        Ok(Err(e)) if e.is_cancellation() => tracing::warn!("Automation {} stopped: {}", id, e),
        Ok(Err(e)) => tracing::error!("Automation {} misconfigured: {}", id, e),
        Err(e) => tracing::error!("Automation {} task panicked: {}", id, e),
    }
}

fn note(text: &'static str) -> Action<Member> {
    Action::command(FnCommand::new(text, move |m: &mut Member| {
        tracing::info!(target: "automation", "{} ({})", text, m.name);
        m.notes.push(text.to_string());
    }))
}

fn member_conditions(id: &str) -> Vec<Condition<Member>> {
    vec![
        Condition::new(id, "name present", |m: &Member| !m.name.is_empty()),
        Condition::new(id, "email present", |m: &Member| !m.email.is_empty()),
        Condition::new(id, "adult", |m: &Member| m.age >= 18),
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "automation_demo=debug,automation_engine=debug,info".into()),
        )
        .init();

    let options = EngineOptions::from_env();
    tracing::info!("Starting automation demo with {:?}", options);

    let registry = Arc::new(AutomationRegistry::<Member>::new());
    let service = Arc::new(AutomationService::with_manager(registry.clone(), options));
    let launcher = Launcher {
        registry: Arc::downgrade(&registry),
        service: Arc::clone(&service),
        shutdown: CancellationToken::new(),
        running: Arc::new(Mutex::new(Vec::new())),
    };

    let profile = Arc::new(Observable::new(Member {
        name: "Ada".to_string(),
        email: "ada@example.com".to_string(),
        age: 17,
        ..Member::default()
    }));
    let adult = PropertyAccessor::new(Arc::clone(&profile), "adult", |m: &Member| m.adult)
        .with_setter(|m, v| m.adult = v);
    let age = PropertyAccessor::new(Arc::clone(&profile), "age", |m: &Member| m.age)
        .with_setter(|m, v| m.age = v);
    let sign_ups = Arc::new(EventSource::<SignUp>::new("sign_up"));

    // Welcome adults as soon as they come of age
    let welcome_trigger = {
        let launcher = launcher.clone();
        let profile = Arc::clone(&profile);
        BooleanStateTrigger::new("welcome", adult.clone(), false, true, move |_| {
            launcher.launch("welcome", profile.snapshot());
        })?
    };
    let mut welcome = Automation::with_id("welcome", "welcome new adults")
        .with_trigger(welcome_trigger)
        .with_timeout(Duration::from_secs(5))
        .with_action(note("welcome email"))
        .with_action(Action::delay(Duration::from_millis(200)))
        .with_action(note("grant membership"));
    welcome.conditions = member_conditions("welcome");
    registry.register(welcome)?;

    // Age the member up to thirty once they reach eighteen
    let age_up_trigger = {
        let launcher = launcher.clone();
        let profile = Arc::clone(&profile);
        IntegerStateTrigger::new("age-up", age.clone(), 17, 18, move |_| {
            launcher.launch("age-up", profile.snapshot());
        })?
    };
    registry.register(
        Automation::with_id("age-up", "fast forward to thirty")
            .with_trigger(age_up_trigger)
            .with_action(Action::command(FnCommand::new("birthday", |m: &mut Member| {
                m.age += 1;
            })))
            .with_action(Action::repeat_until(|m: &Member| m.age >= 30, 100))
            .with_action(note("turned thirty")),
    )?;

    // Every sign-up event runs the welcome flow on the new member
    let sign_up_trigger = {
        let launcher = launcher.clone();
        EventTrigger::new("sign-up", Arc::clone(&sign_ups), move |event: SignUp| {
            launcher.launch(
                "sign-up",
                Member {
                    name: event.name,
                    email: event.email,
                    age: event.age,
                    adult: event.age >= 18,
                    notes: Vec::new(),
                },
            );
        })
    };
    registry.register(
        Automation::with_id("sign-up", "onboard sign-ups")
            .with_trigger(sign_up_trigger)
            .with_action(note("account created"))
            .with_action(Action::automation("welcome")),
    )?;

    let live = registry.activate_all();
    tracing::info!("Activated {} automation(s), {} trigger(s) live", registry.len(), live);

    let mut events = service.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::debug!("Execution event: {:?}", event);
        }
    });

    // Drive the triggers
    age.set(18)?;
    adult.set(true)?;
    adult.set(true)?;
    sign_ups.raise(&SignUp {
        name: "Grace".to_string(),
        email: "grace@example.com".to_string(),
        age: 42,
    });
    sign_ups.raise(&SignUp {
        name: "Tim".to_string(),
        email: "tim@example.com".to_string(),
        age: 15,
    });

    let tasks: Vec<JoinHandle<()>> = launcher.running.lock().drain(..).collect();
    for task in tasks {
        task.await?;
    }

    launcher.shutdown.cancel();
    for automation in registry.list() {
        registry.deactivate(&automation.id);
    }
    tracing::info!("Automation demo finished");
    Ok(())
}
