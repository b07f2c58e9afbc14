//! Triggers that start automations
//!
//! State triggers are edge-triggered: they remember the previous sample of
//! the watched property and fire only when it moves from `from` to `to`.
//! Event triggers fire on every raised event.

use crate::accessor::{EventSource, PropertyAccessor, Subscription};
use crate::error::AutomationError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Callback invoked when a trigger fires
pub type TriggerCallback<V> = Arc<dyn Fn(V) + Send + Sync>;

/// Trigger variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    BooleanState,
    IntegerState,
    StringState,
    Event,
}

/// Something that can start an automation
pub trait Trigger: Send + Sync {
    /// The automation this trigger belongs to
    fn automation_id(&self) -> &str;

    /// Trigger variant
    fn kind(&self) -> TriggerKind;

    /// Start observing the source. Observation stops when the guard drops.
    fn subscribe(&self) -> Subscription;
}

/// Value types a state trigger can watch
pub trait StateValue: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    const KIND: TriggerKind;
}

impl StateValue for bool {
    const KIND: TriggerKind = TriggerKind::BooleanState;
}

impl StateValue for i64 {
    const KIND: TriggerKind = TriggerKind::IntegerState;
}

impl StateValue for String {
    const KIND: TriggerKind = TriggerKind::StringState;
}

/// Edge detector shared between a trigger and its watcher
struct StateEdge<V> {
    from: V,
    to: V,
    previous: Mutex<Option<V>>,
    callback: TriggerCallback<V>,
}

impl<V: StateValue> StateEdge<V> {
    fn observe(&self, current: V) -> bool {
        let fire = {
            let mut previous = self.previous.lock();
            let fire = previous.as_ref() == Some(&self.from) && current == self.to;
            *previous = Some(current.clone());
            fire
        };
        if fire {
            (self.callback)(current);
        }
        fire
    }
}

/// Trigger on a `from -> to` transition of a property
pub struct StateTrigger<O, V> {
    automation_id: String,
    accessor: PropertyAccessor<O, V>,
    edge: Arc<StateEdge<V>>,
}

/// Trigger on a boolean property
pub type BooleanStateTrigger<O> = StateTrigger<O, bool>;

/// Trigger on an integer property
pub type IntegerStateTrigger<O> = StateTrigger<O, i64>;

/// Trigger on a string property
pub type StringStateTrigger<O> = StateTrigger<O, String>;

impl<O: Send + Sync + 'static, V: StateValue> StateTrigger<O, V> {
    /// Create a state trigger.
    ///
    /// Fails with [`AutomationError::InvalidTrigger`] when `from == to`, since
    /// entering the state could not be told apart from already being in it.
    pub fn new(
        automation_id: impl Into<String>,
        accessor: PropertyAccessor<O, V>,
        from: V,
        to: V,
        callback: impl Fn(V) + Send + Sync + 'static,
    ) -> Result<Self, AutomationError> {
        let automation_id = automation_id.into();
        if from == to {
            return Err(AutomationError::InvalidTrigger(format!(
                "{:?} trigger on '{}' for automation {} has identical from/to value {:?}",
                V::KIND,
                accessor.name(),
                automation_id,
                from
            )));
        }

        Ok(Self {
            automation_id,
            accessor,
            edge: Arc::new(StateEdge {
                from,
                to,
                previous: Mutex::new(None),
                callback: Arc::new(callback),
            }),
        })
    }

    /// Value the property must leave
    pub fn from_value(&self) -> &V {
        &self.edge.from
    }

    /// Value the property must enter
    pub fn to_value(&self) -> &V {
        &self.edge.to
    }

    /// Feed one sample, returning whether the trigger fired
    pub fn observe(&self, current: V) -> bool {
        self.edge.observe(current)
    }
}

impl<O: Send + Sync + 'static, V: StateValue> Trigger for StateTrigger<O, V> {
    fn automation_id(&self) -> &str {
        &self.automation_id
    }

    fn kind(&self) -> TriggerKind {
        V::KIND
    }

    fn subscribe(&self) -> Subscription {
        let source = self.accessor.source();
        let edge = Arc::clone(&self.edge);
        let accessor = self.accessor.clone();
        let automation_id = self.automation_id.clone();

        // Prime and register under one read lock so no update slips between
        source.read(|object| {
            *self.edge.previous.lock() = Some(self.accessor.sample(object));
            tracing::debug!(
                "Subscribed {:?} trigger on '{}' for automation {}",
                V::KIND,
                self.accessor.name(),
                automation_id
            );
            source.subscribe(move |object| {
                if edge.observe(accessor.sample(object)) {
                    tracing::debug!(
                        "Trigger on '{}' fired for automation {}",
                        accessor.name(),
                        automation_id
                    );
                }
            })
        })
    }
}

/// Trigger on every event raised by a source
pub struct EventTrigger<T> {
    automation_id: String,
    source: Arc<EventSource<T>>,
    callback: TriggerCallback<T>,
}

impl<T: Clone + Send + Sync + 'static> EventTrigger<T> {
    /// Create an event trigger
    pub fn new(
        automation_id: impl Into<String>,
        source: Arc<EventSource<T>>,
        callback: impl Fn(T) + Send + Sync + 'static,
    ) -> Self {
        Self {
            automation_id: automation_id.into(),
            source,
            callback: Arc::new(callback),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Trigger for EventTrigger<T> {
    fn automation_id(&self) -> &str {
        &self.automation_id
    }

    fn kind(&self) -> TriggerKind {
        TriggerKind::Event
    }

    fn subscribe(&self) -> Subscription {
        let callback = Arc::clone(&self.callback);
        tracing::debug!(
            "Subscribed event trigger on '{}' for automation {}",
            self.source.name(),
            self.automation_id
        );
        self.source
            .subscribe(move |payload: &T| callback(payload.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::Observable;

    #[derive(Debug, Clone, Default)]
    struct Person {
        name: String,
        age: i64,
        adult: bool,
    }

    fn person() -> Arc<Observable<Person>> {
        Arc::new(Observable::new(Person::default()))
    }

    fn recorder<V: Send + 'static>() -> (Arc<Mutex<Vec<V>>>, impl Fn(V) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |v| sink.lock().push(v))
    }

    #[test]
    fn test_equal_bounds_rejected() {
        let source = person();
        let adult = PropertyAccessor::new(source, "adult", |p: &Person| p.adult);
        let result = BooleanStateTrigger::new("a1", adult, true, true, |_| {});
        assert!(matches!(result, Err(AutomationError::InvalidTrigger(_))));
    }

    #[test]
    fn test_boolean_fires_once_on_edge() {
        let source = person();
        let adult = PropertyAccessor::new(Arc::clone(&source), "adult", |p: &Person| p.adult)
            .with_setter(|p, v| p.adult = v);
        let (seen, callback) = recorder();
        let trigger = BooleanStateTrigger::new("a1", adult.clone(), false, true, callback).unwrap();
        let _sub = trigger.subscribe();

        adult.set(true).unwrap();
        adult.set(true).unwrap();
        source.update(|p| p.name = "Ada".to_string()).unwrap();

        assert_eq!(*seen.lock(), vec![true]);
    }

    #[test]
    fn test_boolean_refires_after_leaving_state() {
        let source = person();
        let adult = PropertyAccessor::new(Arc::clone(&source), "adult", |p: &Person| p.adult)
            .with_setter(|p, v| p.adult = v);
        let (seen, callback) = recorder();
        let trigger = BooleanStateTrigger::new("a1", adult.clone(), false, true, callback).unwrap();
        let _sub = trigger.subscribe();

        adult.set(true).unwrap();
        adult.set(false).unwrap();
        adult.set(true).unwrap();

        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn test_integer_fires_on_crossing_into_target() {
        let source = person();
        let age = PropertyAccessor::new(Arc::clone(&source), "age", |p: &Person| p.age)
            .with_setter(|p, v| p.age = v);
        let (seen, callback) = recorder();
        let trigger = IntegerStateTrigger::new("a1", age.clone(), 18, 65, callback).unwrap();
        let _sub = trigger.subscribe();

        age.set(18).unwrap();
        assert!(seen.lock().is_empty());
        age.set(65).unwrap();
        assert_eq!(*seen.lock(), vec![65]);
        age.set(65).unwrap();
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_integer_ignores_jump_from_other_value() {
        let source = person();
        let age = PropertyAccessor::new(Arc::clone(&source), "age", |p: &Person| p.age)
            .with_setter(|p, v| p.age = v);
        let (seen, callback) = recorder();
        let trigger = IntegerStateTrigger::new("a1", age.clone(), 18, 65, callback).unwrap();
        let _sub = trigger.subscribe();

        age.set(40).unwrap();
        age.set(65).unwrap();
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_string_delivers_new_value() {
        let source = person();
        let name = PropertyAccessor::new(Arc::clone(&source), "name", |p: &Person| p.name.clone())
            .with_setter(|p, v| p.name = v);
        name.set("draft".to_string()).unwrap();

        let (seen, callback) = recorder();
        let trigger = StringStateTrigger::new(
            "a1",
            name.clone(),
            "draft".to_string(),
            "final".to_string(),
            callback,
        )
        .unwrap();
        let _sub = trigger.subscribe();

        name.set("final".to_string()).unwrap();
        assert_eq!(*seen.lock(), vec!["final".to_string()]);
    }

    #[test]
    fn test_dropped_subscription_stops_firing() {
        let source = person();
        let adult = PropertyAccessor::new(Arc::clone(&source), "adult", |p: &Person| p.adult)
            .with_setter(|p, v| p.adult = v);
        let (seen, callback) = recorder();
        let trigger = BooleanStateTrigger::new("a1", adult.clone(), false, true, callback).unwrap();

        let sub = trigger.subscribe();
        drop(sub);
        adult.set(true).unwrap();

        assert!(seen.lock().is_empty());
        assert_eq!(source.watcher_count(), 0);
    }

    #[test]
    fn test_observe_without_prior_sample_does_not_fire() {
        let source = person();
        let adult = PropertyAccessor::new(source, "adult", |p: &Person| p.adult);
        let (seen, callback) = recorder();
        let trigger = BooleanStateTrigger::new("a1", adult, false, true, callback).unwrap();

        assert!(!trigger.observe(true));
        assert!(!trigger.observe(false));
        assert!(trigger.observe(true));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_event_trigger_delivers_payload() {
        #[derive(Debug, Clone, PartialEq)]
        struct Registered {
            email: String,
            age: i64,
        }

        let source = Arc::new(EventSource::<Registered>::new("registered"));
        let (seen, callback) = recorder();
        let trigger = EventTrigger::new("a1", Arc::clone(&source), callback);
        assert_eq!(trigger.kind(), TriggerKind::Event);
        let _sub = trigger.subscribe();

        let event = Registered {
            email: "ada@example.com".to_string(),
            age: 36,
        };
        source.raise(&event);
        source.raise(&event);

        assert_eq!(*seen.lock(), vec![event.clone(), event]);
    }
}
