// Session configuration
//
// Loaded from JSON; every field has a default so a bare `{}` is a valid settings object.

use crate::error::DebuggerResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where to attach and how the session behaves once attached
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub settings: DebuggerSettings,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            settings: DebuggerSettings::default(),
        }
    }

    pub fn from_json(json: &str) -> DebuggerResult<Self> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.settings.validate()?;
        Ok(config)
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

/// Stepping and scheduling preferences
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebuggerSettings {
    /// Step only the current thread, leaving the rest of an all-thread suspension in place
    pub resume_only_current_thread: bool,
    pub skip_synthetic_methods: bool,
    pub skip_constructors: bool,
    pub skip_class_initializers: bool,
    pub class_filters: Vec<ClassFilter>,
    /// How long a running command may take before `terminate_and_invoke` interrupts it
    pub terminate_timeout_ms: u64,
    /// Capacity of the transport's event channel
    pub event_buffer: usize,
}

impl Default for DebuggerSettings {
    fn default() -> Self {
        Self {
            resume_only_current_thread: false,
            skip_synthetic_methods: true,
            skip_constructors: false,
            skip_class_initializers: true,
            class_filters: ["java.*", "javax.*", "sun.*", "jdk.internal.*"]
                .into_iter()
                .map(ClassFilter::new)
                .collect(),
            terminate_timeout_ms: 2_000,
            event_buffer: jdwp_client::connection::DEFAULT_EVENT_BUFFER,
        }
    }
}

impl DebuggerSettings {
    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_millis(self.terminate_timeout_ms)
    }

    /// Patterns of enabled filters, in the form step requests exclude them
    pub fn exclusion_patterns(&self) -> Vec<String> {
        self.class_filters
            .iter()
            .filter(|filter| filter.enabled)
            .map(|filter| filter.pattern.clone())
            .collect()
    }

    /// True when an enabled class filter matches `class_name`
    pub fn is_filtered(&self, class_name: &str) -> bool {
        self.class_filters
            .iter()
            .any(|filter| filter.enabled && filter.matches(class_name))
    }

    pub fn validate(&self) -> DebuggerResult<()> {
        if self.event_buffer == 0 {
            return Err(crate::DebuggerError::Config(
                "event_buffer must be at least 1".to_string(),
            ));
        }
        if let Some(filter) = self.class_filters.iter().find(|f| !f.is_valid()) {
            return Err(crate::DebuggerError::Config(format!(
                "Invalid class filter pattern: {:?}",
                filter.pattern
            )));
        }
        Ok(())
    }
}

/// Class name pattern with an optional single leading or trailing `*`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassFilter {
    pub pattern: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl ClassFilter {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    fn is_valid(&self) -> bool {
        let inner = self.pattern.trim_start_matches('*').trim_end_matches('*');
        !inner.contains('*') && self.pattern.matches('*').count() <= 1
    }

    pub fn matches(&self, class_name: &str) -> bool {
        let pattern = self.pattern.as_str();
        if pattern == "*" {
            true
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            class_name.starts_with(prefix)
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            class_name.ends_with(suffix)
        } else {
            class_name == pattern
        }
    }
}
