//! In-memory automation manager
//!
//! Holds loaded automations by id and owns the trigger subscriptions of the
//! ones that are activated.

use crate::accessor::Subscription;
use crate::error::AutomationError;
use crate::model::Automation;
use dashmap::DashMap;
use std::sync::Arc;

/// Lookup of automations by id, used by nested automation actions
pub trait AutomationManager<C>: Send + Sync {
    fn resolve(&self, automation_id: &str) -> Result<Arc<Automation<C>>, AutomationError>;
}

/// Registry of loaded automations
pub struct AutomationRegistry<C> {
    automations: DashMap<String, Arc<Automation<C>>>,
    /// Trigger guards of activated automations
    subscriptions: DashMap<String, Vec<Subscription>>,
}

impl<C: Send + Sync + 'static> Default for AutomationRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Send + Sync + 'static> AutomationRegistry<C> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            automations: DashMap::new(),
            subscriptions: DashMap::new(),
        }
    }

    /// Validate and store an automation, replacing any with the same id.
    ///
    /// A replaced automation is deactivated first.
    pub fn register(
        &self,
        automation: Automation<C>,
    ) -> Result<Arc<Automation<C>>, AutomationError> {
        automation.validate()?;

        let id = automation.id.clone();
        self.deactivate(&id);

        let automation = Arc::new(automation);
        let replaced = self
            .automations
            .insert(id.clone(), Arc::clone(&automation))
            .is_some();

        if replaced {
            tracing::info!("Replaced automation: {} ({})", automation.name, id);
        } else {
            tracing::info!("Registered automation: {} ({})", automation.name, id);
        }
        Ok(automation)
    }

    /// Get automation by ID
    pub fn get(&self, id: &str) -> Option<Arc<Automation<C>>> {
        self.automations.get(id).map(|r| Arc::clone(r.value()))
    }

    /// Get all automations
    pub fn list(&self) -> Vec<Arc<Automation<C>>> {
        self.automations
            .iter()
            .map(|r| Arc::clone(r.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.automations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.automations.is_empty()
    }

    /// Deactivate and drop an automation
    pub fn remove(&self, id: &str) -> Result<Arc<Automation<C>>, AutomationError> {
        self.deactivate(id);
        let (_, automation) = self
            .automations
            .remove(id)
            .ok_or_else(|| AutomationError::NotFound(id.to_string()))?;

        tracing::info!("Removed automation: {} ({})", automation.name, id);
        Ok(automation)
    }

    /// Subscribe the triggers of an automation, returning how many are live.
    ///
    /// Inactive automations are left unsubscribed. Activating twice is a no-op.
    pub fn activate(&self, id: &str) -> Result<usize, AutomationError> {
        let automation = self
            .get(id)
            .ok_or_else(|| AutomationError::NotFound(id.to_string()))?;

        if !automation.is_active {
            tracing::debug!(
                "Automation '{}' is inactive, not subscribing triggers",
                automation.name
            );
            return Ok(0);
        }

        let guards = self
            .subscriptions
            .entry(id.to_string())
            .or_insert_with(|| {
                tracing::info!(
                    "Activating automation '{}' with {} trigger(s)",
                    automation.name,
                    automation.triggers.len()
                );
                automation
                    .triggers
                    .iter()
                    .map(|trigger| trigger.subscribe())
                    .collect()
            });
        Ok(guards.len())
    }

    /// Activate every registered automation, returning the number of live
    /// trigger subscriptions
    pub fn activate_all(&self) -> usize {
        let ids: Vec<String> = self.automations.iter().map(|r| r.key().clone()).collect();
        ids.iter()
            .filter_map(|id| match self.activate(id) {
                Ok(count) => Some(count),
                Err(e) => {
                    tracing::warn!("Failed to activate automation {}: {}", id, e);
                    None
                }
            })
            .sum()
    }

    /// Release the trigger subscriptions of an automation
    pub fn deactivate(&self, id: &str) -> bool {
        match self.subscriptions.remove(id) {
            Some((_, guards)) => {
                tracing::debug!(
                    "Deactivated automation {} ({} trigger(s) released)",
                    id,
                    guards.len()
                );
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_activated(&self, id: &str) -> bool {
        self.subscriptions.contains_key(id)
    }
}

impl<C: Send + Sync + 'static> AutomationManager<C> for AutomationRegistry<C> {
    fn resolve(&self, automation_id: &str) -> Result<Arc<Automation<C>>, AutomationError> {
        self.get(automation_id)
            .ok_or_else(|| AutomationError::NotFound(automation_id.to_string()))
    }
}
