//! Invocable commands run by command actions

use crate::error::BoxError;
use async_trait::async_trait;

/// A unit of work invoked against an execution context
#[async_trait]
pub trait Command<C>: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Whether the command applies to `target` right now
    fn can_execute(&self, _target: &C) -> bool {
        true
    }

    /// Run the command, mutating `target` in place
    async fn execute(&self, target: &mut C) -> Result<(), BoxError>;
}

/// Command backed by a synchronous closure
pub struct FnCommand<C> {
    name: String,
    guard: Option<Box<dyn Fn(&C) -> bool + Send + Sync>>,
    run: Box<dyn Fn(&mut C) -> Result<(), BoxError> + Send + Sync>,
}

impl<C> FnCommand<C> {
    /// Wrap an infallible closure
    pub fn new(name: impl Into<String>, run: impl Fn(&mut C) + Send + Sync + 'static) -> Self {
        Self::fallible(name, move |target| {
            run(target);
            Ok(())
        })
    }

    /// Wrap a closure that can fail
    pub fn fallible(
        name: impl Into<String>,
        run: impl Fn(&mut C) -> Result<(), BoxError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            guard: None,
            run: Box::new(run),
        }
    }

    /// Only execute when `guard` holds for the target
    #[must_use]
    pub fn when(mut self, guard: impl Fn(&C) -> bool + Send + Sync + 'static) -> Self {
        self.guard = Some(Box::new(guard));
        self
    }
}

#[async_trait]
impl<C: Send + Sync> Command<C> for FnCommand<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_execute(&self, target: &C) -> bool {
        self.guard.as_ref().map_or(true, |guard| guard(target))
    }

    async fn execute(&self, target: &mut C) -> Result<(), BoxError> {
        (self.run)(target)
    }
}
