//! preemptor.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::priority::{PriorityClass, PriorityClassError, PriorityClassRegistry};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub priority_classes: Vec<PriorityClassConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Whether pending workloads may evict lower-priority ones.
    #[serde(default = "default_enable_preemption")]
    pub enable_preemption: bool,
    /// Delay between scheduling passes of the background loop.
    #[serde(default = "default_pass_interval_ms")]
    pub pass_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityClassConfig {
    pub name: String,
    pub value: i32,
    #[serde(default)]
    pub global_default: bool,
    pub description: Option<String>,
}

fn default_enable_preemption() -> bool {
    true
}

fn default_pass_interval_ms() -> u64 {
    1000
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enable_preemption: default_enable_preemption(),
            pass_interval_ms: default_pass_interval_ms(),
        }
    }
}

impl SchedulerSettings {
    pub fn pass_interval(&self) -> Duration {
        Duration::from_millis(self.pass_interval_ms)
    }
}

impl From<&PriorityClassConfig> for PriorityClass {
    fn from(c: &PriorityClassConfig) -> Self {
        PriorityClass {
            name: c.name.clone(),
            value: c.value,
            global_default: c.global_default,
            description: c.description.clone(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SchedulerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configured classes and build a registry from them.
    pub fn priority_registry(&self) -> Result<PriorityClassRegistry, PriorityClassError> {
        PriorityClassRegistry::from_classes(self.priority_classes.iter().map(PriorityClass::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::priority::{Priority, PriorityResolver};

    #[test]
    fn test_defaults() {
        let config: SchedulerConfig = toml::from_str("").unwrap();
        assert!(config.scheduler.enable_preemption);
        assert_eq!(config.scheduler.pass_interval(), Duration::from_secs(1));
        assert!(config.priority_classes.is_empty());
    }

    #[test]
    fn test_parse_classes() {
        let toml_str = r#"
[scheduler]
enable_preemption = false
pass_interval_ms = 250

[[priority_classes]]
name = "low"
value = 1

[[priority_classes]]
name = "standard"
value = 10
global_default = true
description = "applied when no class is named"
"#;
        let config: SchedulerConfig = toml::from_str(toml_str).unwrap();
        assert!(!config.scheduler.enable_preemption);
        assert_eq!(config.scheduler.pass_interval_ms, 250);

        let registry = config.priority_registry().unwrap();
        assert_eq!(registry.resolve(Some("low")), Some(Priority::Value(1)));
        assert_eq!(registry.resolve(None), Some(Priority::Value(10)));
    }

    #[test]
    fn test_invalid_class_rejected() {
        let toml_str = r#"
[[priority_classes]]
name = "system-mine"
value = 5
"#;
        let config: SchedulerConfig = toml::from_str(toml_str).unwrap();
        assert!(config.priority_registry().is_err());
    }

    #[test]
    fn test_round_trip_through_toml() {
        let mut config = SchedulerConfig::default();
        config.priority_classes.push(PriorityClassConfig {
            name: "high".to_string(),
            value: 1000,
            global_default: false,
            description: None,
        });
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("high"));
        let parsed: SchedulerConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.priority_classes.len(), 1);
    }
}
