//! Realm construction options, loadable from JSON.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::host::{HostOptions, HostProfile};

pub const DEFAULT_MAX_CALL_DEPTH: usize = 64;
/// Deepest call nesting that fits a 2 MiB native stack together with
/// `MAX_EVALUATION_DEPTH` statement and expression levels.
pub const MAX_CALL_DEPTH_LIMIT: usize = 64;
pub const DEFAULT_TRACE_ID: &str = "franken-realm";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RealmConfig {
    /// Make the stable shared globals writable and configurable. The frozen
    /// tier (`Infinity`, `NaN`, `undefined`) stays read-only either way.
    pub configurable_globals: bool,
    /// Let assignment to an undeclared name create a property on the realm
    /// global instead of throwing.
    pub sloppy_globals: bool,
    /// Put the html-comment / import-expression rejection pass in front of
    /// every evaluation.
    pub reject_dangerous_sources: bool,
    pub host_profile: HostProfile,
    /// Identifiers of extensions applied to realms built from this config.
    pub shims: Vec<String>,
    pub max_call_depth: usize,
    pub trace_id: String,
}

impl Default for RealmConfig {
    fn default() -> Self {
        Self {
            configurable_globals: false,
            sloppy_globals: false,
            reject_dangerous_sources: true,
            host_profile: HostProfile::default(),
            shims: Vec::new(),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            trace_id: DEFAULT_TRACE_ID.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid realm config json: {0}")]
    Parse(String),
    #[error("max_call_depth must be in 1..={max}, got {value}")]
    MaxCallDepth { value: usize, max: usize },
    #[error("trace_id must not be empty")]
    EmptyTraceId,
    #[error("shim `{name}` listed more than once")]
    DuplicateShim { name: String },
    #[error("shim identifiers must not be empty")]
    EmptyShim,
}

impl RealmConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_call_depth == 0 || self.max_call_depth > MAX_CALL_DEPTH_LIMIT {
            return Err(ConfigError::MaxCallDepth {
                value: self.max_call_depth,
                max: MAX_CALL_DEPTH_LIMIT,
            });
        }
        if self.trace_id.trim().is_empty() {
            return Err(ConfigError::EmptyTraceId);
        }
        let mut seen = BTreeSet::new();
        for shim in &self.shims {
            if shim.trim().is_empty() {
                return Err(ConfigError::EmptyShim);
            }
            if !seen.insert(shim.as_str()) {
                return Err(ConfigError::DuplicateShim { name: shim.clone() });
            }
        }
        Ok(())
    }

    pub fn host_options(&self) -> HostOptions {
        HostOptions {
            profile: self.host_profile,
            max_call_depth: self.max_call_depth,
            trace_id: self.trace_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        let config = RealmConfig::from_json_str("{}").unwrap();
        assert_eq!(config, RealmConfig::default());
        assert!(config.reject_dangerous_sources);
        assert_eq!(config.host_profile, HostProfile::Legacy);
    }

    #[test]
    fn parses_all_fields() {
        let config = RealmConfig::from_json_str(
            r#"{
                "configurable_globals": true,
                "sloppy_globals": true,
                "reject_dangerous_sources": false,
                "host_profile": "hardened",
                "shims": ["ses"],
                "max_call_depth": 32,
                "trace_id": "t-9"
            }"#,
        )
        .unwrap();
        assert!(config.configurable_globals);
        assert!(config.sloppy_globals);
        assert!(!config.reject_dangerous_sources);
        assert_eq!(config.host_profile, HostProfile::Hardened);
        assert_eq!(config.shims, vec!["ses".to_string()]);
        assert_eq!(config.host_options().max_call_depth, 32);
        assert_eq!(config.host_options().trace_id, "t-9");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = RealmConfig::from_json_str(r#"{"sloppy": true}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn call_depth_above_the_native_stack_budget_is_rejected() {
        let err = RealmConfig::from_json_str(r#"{"max_call_depth": 1024}"#).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MaxCallDepth {
                value: 1024,
                max: MAX_CALL_DEPTH_LIMIT
            }
        );
        assert_eq!(err.to_string(), "max_call_depth must be in 1..=64, got 1024");
        let at_limit = RealmConfig {
            max_call_depth: MAX_CALL_DEPTH_LIMIT,
            ..RealmConfig::default()
        };
        assert_eq!(at_limit.validate(), Ok(()));
    }

    #[test]
    fn validation_failures() {
        let zero_depth = RealmConfig {
            max_call_depth: 0,
            ..RealmConfig::default()
        };
        assert_eq!(
            zero_depth.validate(),
            Err(ConfigError::MaxCallDepth {
                value: 0,
                max: MAX_CALL_DEPTH_LIMIT
            })
        );

        let blank_trace = RealmConfig {
            trace_id: "  ".into(),
            ..RealmConfig::default()
        };
        assert_eq!(blank_trace.validate(), Err(ConfigError::EmptyTraceId));

        let dup = RealmConfig {
            shims: vec!["a".into(), "a".into()],
            ..RealmConfig::default()
        };
        assert_eq!(
            dup.validate(),
            Err(ConfigError::DuplicateShim { name: "a".into() })
        );
    }
}
