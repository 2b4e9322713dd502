//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Require human approval before applying designed actions ("safe mode").
    pub approval_enabled: bool,
    /// Maximum number of handler branches running at once within one fan-out.
    pub max_concurrency: usize,
    /// Per-invocation handler timeout.
    pub handler_timeout: Duration,
    /// Base graph-step budget for one run/resume call; each planned action
    /// adds three more.
    pub max_steps: usize,
    /// Checkpoint database path (`None` = in-memory store).
    pub db_path: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            approval_enabled: true,
            max_concurrency: 3,
            handler_timeout: Duration::from_secs(60),
            max_steps: 64,
            db_path: None,
        }
    }
}

impl OrchestratorConfig {
    /// Build a config from `ORCHESTRATOR_*` environment variables, falling
    /// back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = lookup("ORCHESTRATOR_SAFE_MODE") {
            config.approval_enabled = parse_bool("ORCHESTRATOR_SAFE_MODE", &raw)?;
        }
        if let Some(raw) = lookup("ORCHESTRATOR_MAX_CONCURRENCY") {
            let n: usize = parse_number("ORCHESTRATOR_MAX_CONCURRENCY", &raw)?;
            if n == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "ORCHESTRATOR_MAX_CONCURRENCY".into(),
                    message: "must be at least 1".into(),
                });
            }
            config.max_concurrency = n;
        }
        if let Some(raw) = lookup("ORCHESTRATOR_HANDLER_TIMEOUT_SECS") {
            let secs: u64 = parse_number("ORCHESTRATOR_HANDLER_TIMEOUT_SECS", &raw)?;
            config.handler_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup("ORCHESTRATOR_MAX_STEPS") {
            config.max_steps = parse_number("ORCHESTRATOR_MAX_STEPS", &raw)?;
        }
        if let Some(raw) = lookup("ORCHESTRATOR_DB_PATH")
            && !raw.trim().is_empty()
        {
            config.db_path = Some(PathBuf::from(raw.trim()));
        }

        Ok(config)
    }

    /// Builder-style toggle for the approval gate.
    pub fn with_approval(mut self, enabled: bool) -> Self {
        self.approval_enabled = enabled;
        self
    }

    /// Builder-style concurrency ceiling (clamped to at least 1).
    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_safe_mode_with_three_branches() {
        let config = OrchestratorConfig::default();
        assert!(config.approval_enabled);
        assert_eq!(config.max_concurrency, 3);
        assert!(config.db_path.is_none());
    }

    #[test]
    fn env_overrides() {
        let config = OrchestratorConfig::from_lookup(lookup_from(&[
            ("ORCHESTRATOR_SAFE_MODE", "off"),
            ("ORCHESTRATOR_MAX_CONCURRENCY", "8"),
            ("ORCHESTRATOR_HANDLER_TIMEOUT_SECS", "5"),
            ("ORCHESTRATOR_DB_PATH", "/tmp/orch.db"),
        ]))
        .unwrap();
        assert!(!config.approval_enabled);
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.handler_timeout, Duration::from_secs(5));
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/orch.db")));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = OrchestratorConfig::from_lookup(lookup_from(&[(
            "ORCHESTRATOR_SAFE_MODE",
            "maybe",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = OrchestratorConfig::from_lookup(lookup_from(&[(
            "ORCHESTRATOR_MAX_CONCURRENCY",
            "0",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
