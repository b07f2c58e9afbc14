//! Engine-wide options, read once when the service is built

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::fs;

/// Defaults applied to every execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Timeout for automations that do not declare one. `None` or `0` means
    /// unbounded.
    pub default_timeout_ms: Option<u64>,
    /// Maximum depth of nested automation actions
    pub max_nesting_depth: usize,
    /// Capacity of the execution event channel
    pub event_capacity: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            default_timeout_ms: None,
            max_nesting_depth: 16,
            event_capacity: 64,
        }
    }
}

impl EngineOptions {
    /// Default timeout as a duration, `None` when unbounded
    #[must_use]
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Read options from `AUTOMATION_*` environment variables
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read options through `lookup`, keeping defaults for absent or
    /// unparsable values
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            default_timeout_ms: parse_var(&lookup, "AUTOMATION_DEFAULT_TIMEOUT_MS")
                .or(defaults.default_timeout_ms),
            max_nesting_depth: parse_var(&lookup, "AUTOMATION_MAX_NESTING_DEPTH")
                .filter(|depth: &usize| {
                    if *depth == 0 {
                        tracing::warn!(
                            "Ignoring AUTOMATION_MAX_NESTING_DEPTH=0, must be at least 1"
                        );
                    }
                    *depth > 0
                })
                .unwrap_or(defaults.max_nesting_depth),
            event_capacity: parse_var(&lookup, "AUTOMATION_EVENT_CAPACITY")
                .unwrap_or(defaults.event_capacity),
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid value {:?} for {}", raw, key);
            None
        }
    }
}

/// Load options from a JSON file, falling back to defaults
pub async fn load_options(path: &Path) -> EngineOptions {
    match fs::read_to_string(path).await {
        Ok(contents) => match serde_json::from_str::<EngineOptions>(&contents) {
            Ok(options) => {
                tracing::info!("Loaded engine options from {:?}", path);
                options
            }
            Err(e) => {
                tracing::warn!("Failed to parse engine options {:?}: {}", path, e);
                EngineOptions::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No engine options at {:?}, using defaults", path);
            EngineOptions::default()
        }
        Err(e) => {
            tracing::warn!("Failed to read engine options {:?}: {}", path, e);
            EngineOptions::default()
        }
    }
}

/// Save options to a JSON file atomically
pub async fn save_options(
    path: &Path,
    options: &EngineOptions,
) -> Result<(), crate::error::AutomationError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let json = serde_json::to_string_pretty(options)?;

    // Write to a temp file, then rename
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &json).await?;
    fs::rename(&tmp_path, path).await?;

    tracing::debug!("Saved engine options to {:?}", path);
    Ok(())
}
