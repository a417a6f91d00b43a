//! Environment contract for gate executions.
//!
//! The gate reads a small set of variables once at startup and hands the
//! relevant ones through to its subprocesses untouched. Invalid values are
//! configuration errors, not silent fallbacks; empty values are treated as
//! unset, which is how CI templating usually leaves optional knobs.

use std::collections::BTreeMap;
use std::env;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::baseline::BaselineLabel;

/// Color toggle forwarded to runner and generator subprocesses.
pub const ENV_TERM_COLOR: &str = "CARGO_TERM_COLOR";
/// Baseline label override.
pub const ENV_BASELINE_LABEL: &str = "BENCHGATE_BASELINE";
/// Runner-selection identifier resolved against the runner catalog.
pub const ENV_RUNNER_ID: &str = "BENCHGATE_RUNNER";

// ---------------------------------------------------------------------------
// ColorChoice
// ---------------------------------------------------------------------------

/// Terminal color behaviour for subprocess output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorChoice {
    Always,
    Never,
    Auto,
}

impl ColorChoice {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::Never => "never",
            Self::Auto => "auto",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, EnvConfigError> {
        match raw {
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            "auto" => Ok(Self::Auto),
            other => Err(EnvConfigError::Invalid {
                name: ENV_TERM_COLOR.to_string(),
                value: other.to_string(),
                detail: "expected one of: always, never, auto".to_string(),
            }),
        }
    }
}

impl fmt::Display for ColorChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// GateEnv
// ---------------------------------------------------------------------------

/// The captured environment contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateEnv {
    pub color: ColorChoice,
    pub baseline_label: Option<BaselineLabel>,
    pub runner_id: Option<String>,
}

impl Default for GateEnv {
    fn default() -> Self {
        Self {
            // CI logs keep color on unless told otherwise.
            color: ColorChoice::Always,
            baseline_label: None,
            runner_id: None,
        }
    }
}

impl GateEnv {
    /// Build the contract from an explicit variable map.
    pub fn from_map(vars: &BTreeMap<String, String>) -> Result<Self, EnvConfigError> {
        let mut resolved = Self::default();
        if let Some(value) = non_empty(vars, ENV_TERM_COLOR) {
            resolved.color = ColorChoice::parse(value)?;
        }
        if let Some(value) = non_empty(vars, ENV_BASELINE_LABEL) {
            let label =
                BaselineLabel::new(value.to_string()).map_err(|error| EnvConfigError::Invalid {
                    name: ENV_BASELINE_LABEL.to_string(),
                    value: value.to_string(),
                    detail: error.to_string(),
                })?;
            resolved.baseline_label = Some(label);
        }
        if let Some(value) = non_empty(vars, ENV_RUNNER_ID) {
            resolved.runner_id = Some(value.to_string());
        }
        Ok(resolved)
    }

    /// Capture the contract from the process environment.
    pub fn capture() -> Result<Self, EnvConfigError> {
        let vars: BTreeMap<String, String> = env::vars()
            .filter(|(name, _)| {
                matches!(name.as_str(), ENV_TERM_COLOR | ENV_BASELINE_LABEL | ENV_RUNNER_ID)
            })
            .collect();
        Self::from_map(&vars)
    }

    /// Variables handed through to every subprocess the gate spawns.
    pub fn runner_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert(ENV_TERM_COLOR.to_string(), self.color.as_str().to_string());
        env
    }
}

fn non_empty<'a>(vars: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    vars.get(name).map(String::as_str).filter(|value| !value.is_empty())
}

/// Environment contract violations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvConfigError {
    #[error("environment variable {name} has invalid value `{value}`: {detail}")]
    Invalid {
        name: String,
        value: String,
        detail: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let env = GateEnv::from_map(&BTreeMap::new()).expect("defaults");
        assert_eq!(env.color, ColorChoice::Always);
        assert!(env.baseline_label.is_none());
        assert!(env.runner_id.is_none());
    }

    #[test]
    fn color_values_parse() {
        for (raw, expected) in [
            ("always", ColorChoice::Always),
            ("never", ColorChoice::Never),
            ("auto", ColorChoice::Auto),
        ] {
            let env = GateEnv::from_map(&map(&[(ENV_TERM_COLOR, raw)])).expect(raw);
            assert_eq!(env.color, expected);
        }
    }

    #[test]
    fn invalid_color_is_rejected() {
        let err = GateEnv::from_map(&map(&[(ENV_TERM_COLOR, "rainbow")])).unwrap_err();
        let EnvConfigError::Invalid { name, value, .. } = err;
        assert_eq!(name, ENV_TERM_COLOR);
        assert_eq!(value, "rainbow");
    }

    #[test]
    fn baseline_label_override_is_validated() {
        let env = GateEnv::from_map(&map(&[(ENV_BASELINE_LABEL, "base-main")])).expect("valid");
        assert_eq!(
            env.baseline_label.as_ref().map(BaselineLabel::as_str),
            Some("base-main")
        );

        let err = GateEnv::from_map(&map(&[(ENV_BASELINE_LABEL, "Not Valid")])).unwrap_err();
        assert!(matches!(err, EnvConfigError::Invalid { .. }));
    }

    #[test]
    fn empty_values_are_treated_as_unset() {
        let env = GateEnv::from_map(&map(&[
            (ENV_TERM_COLOR, ""),
            (ENV_BASELINE_LABEL, ""),
            (ENV_RUNNER_ID, ""),
        ]))
        .expect("all unset");
        assert_eq!(env, GateEnv::default());
    }

    #[test]
    fn runner_id_is_passed_through_opaque() {
        let env = GateEnv::from_map(&map(&[(ENV_RUNNER_ID, "callgrind")])).expect("valid");
        assert_eq!(env.runner_id.as_deref(), Some("callgrind"));
    }

    #[test]
    fn runner_env_forwards_color() {
        let env = GateEnv {
            color: ColorChoice::Never,
            ..GateEnv::default()
        };
        let forwarded = env.runner_env();
        assert_eq!(forwarded.get(ENV_TERM_COLOR).map(String::as_str), Some("never"));
        assert_eq!(forwarded.len(), 1);
    }

    #[test]
    fn gate_env_roundtrips() {
        let env = GateEnv {
            color: ColorChoice::Auto,
            baseline_label: Some(BaselineLabel::default_label()),
            runner_id: Some("cargo-bench".to_string()),
        };
        let encoded = serde_json::to_string(&env).expect("encode");
        let decoded: GateEnv = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, env);
    }
}
