//! Environment configuration and operator overrides.
//!
//! Two environment surfaces affect the core: the policy location variables
//! (`POLICY_FILE`, `POLICY_NAME`, `POLICY_ROOT`) and plugin-option override
//! variables of the form `PLUGIN_<STEP>_<PLUGIN>_<OPTION>`.  Operator values
//! layer as CLI > environment > fmf > built-in default; the winning layer is
//! recorded in the key's source tag (CLI and environment both count as the
//! operator-supplied `cli` layer).

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_yaml::Value;

/// Policy location, as configured through the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyEnv {
    pub file: Option<PathBuf>,
    pub name: Option<String>,
    pub root: Option<PathBuf>,
}

/// Read policy location from the process environment.
pub fn policy_env() -> PolicyEnv {
    policy_env_from(env_lookup)
}

/// Same, with an injectable lookup for tests.
pub fn policy_env_from(lookup: impl Fn(&str) -> Option<String>) -> PolicyEnv {
    PolicyEnv {
        file: lookup("POLICY_FILE").map(PathBuf::from),
        name: lookup("POLICY_NAME"),
        root: lookup("POLICY_ROOT").map(PathBuf::from),
    }
}

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

// ---------------------------------------------------------------------------
// Plugin option overrides
// ---------------------------------------------------------------------------

/// A default injected through `PLUGIN_<STEP>_<PLUGIN>_<OPTION>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginOverride {
    pub step: String,
    pub plugin: String,
    pub option: String,
    pub value: String,
}

/// Collect plugin option overrides from the process environment.
pub fn plugin_overrides() -> Vec<PluginOverride> {
    plugin_overrides_from(std::env::vars())
}

/// Parse `PLUGIN_<STEP>_<PLUGIN>_<OPTION>=value` variables.
///
/// Step and plugin are single identifiers; everything after the third
/// underscore is the option name.  Names are lowercased, with option
/// underscores mapped to dashes.
pub fn plugin_overrides_from(
    vars: impl IntoIterator<Item = (String, String)>,
) -> Vec<PluginOverride> {
    let mut overrides = Vec::new();
    for (name, value) in vars {
        let Some(rest) = name.strip_prefix("PLUGIN_") else {
            continue;
        };
        let mut parts = rest.splitn(3, '_');
        let (Some(step), Some(plugin), Some(option)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        if step.is_empty() || plugin.is_empty() || option.is_empty() {
            continue;
        }
        overrides.push(PluginOverride {
            step: step.to_lowercase(),
            plugin: plugin.to_lowercase(),
            option: option.to_lowercase().replace('_', "-"),
            value,
        });
    }
    overrides.sort_by(|a, b| (&a.step, &a.plugin, &a.option).cmp(&(&b.step, &b.plugin, &b.option)));
    overrides
}

// ---------------------------------------------------------------------------
// Layered key overrides
// ---------------------------------------------------------------------------

/// Operator-supplied key values: an explicit CLI layer over an environment
/// layer.  Both beat fmf data during normalization.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    cli: BTreeMap<String, Value>,
    env: BTreeMap<String, Value>,
}

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.cli.is_empty() && self.env.is_empty()
    }

    /// Record a CLI-supplied value.
    pub fn set_cli(&mut self, key: impl Into<String>, value: Value) {
        self.cli.insert(key.into(), value);
    }

    /// Record an environment-supplied value.
    pub fn set_env(&mut self, key: impl Into<String>, value: Value) {
        self.env.insert(key.into(), value);
    }

    /// The winning override for a key: CLI first, then environment.
    pub fn lookup(&self, key: &str) -> Option<&Value> {
        self.cli.get(key).or_else(|| self.env.get(key))
    }

    /// Fold matching plugin overrides into the environment layer.
    ///
    /// The override's option name is the key; the value string is parsed as
    /// a YAML scalar so `false` and `8` arrive typed.
    pub fn absorb_plugin_overrides(
        &mut self,
        overrides: &[PluginOverride],
        step: &str,
        plugin: &str,
    ) {
        for o in overrides {
            if o.step == step && o.plugin == plugin {
                self.set_env(o.option.clone(), parse_scalar(&o.value));
            }
        }
    }
}

/// Parse an override string as a YAML scalar, falling back to a plain string.
pub fn parse_scalar(raw: &str) -> Value {
    match serde_yaml::from_str::<Value>(raw) {
        Ok(value @ (Value::Bool(_) | Value::Number(_) | Value::String(_))) => value,
        _ => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_env_reads_all_three() {
        let env = policy_env_from(|name| match name {
            "POLICY_FILE" => Some("/etc/policy.yaml".to_string()),
            "POLICY_NAME" => Some("ci.checks".to_string()),
            "POLICY_ROOT" => Some("/etc/policies".to_string()),
            _ => None,
        });
        assert_eq!(env.file, Some(PathBuf::from("/etc/policy.yaml")));
        assert_eq!(env.name.as_deref(), Some("ci.checks"));
        assert_eq!(env.root, Some(PathBuf::from("/etc/policies")));
    }

    #[test]
    fn policy_env_absent_is_none() {
        let env = policy_env_from(|_| None);
        assert_eq!(env, PolicyEnv::default());
    }

    #[test]
    fn plugin_override_parsing() {
        let vars = vec![
            ("PLUGIN_PROVISION_VIRTUAL_MEMORY".to_string(), "8 GB".to_string()),
            ("PLUGIN_EXECUTE_SHELL_EXIT_FIRST".to_string(), "true".to_string()),
            ("UNRELATED".to_string(), "x".to_string()),
            ("PLUGIN_TOOSHORT".to_string(), "x".to_string()),
        ];
        let overrides = plugin_overrides_from(vars);
        assert_eq!(overrides.len(), 2);
        assert_eq!(overrides[0].step, "execute");
        assert_eq!(overrides[0].plugin, "shell");
        assert_eq!(overrides[0].option, "exit-first");
        assert_eq!(overrides[1].step, "provision");
        assert_eq!(overrides[1].option, "memory");
    }

    #[test]
    fn cli_beats_env() {
        let mut overrides = Overrides::new();
        overrides.set_env("duration", Value::from("10m"));
        overrides.set_cli("duration", Value::from("1h"));
        assert_eq!(overrides.lookup("duration"), Some(&Value::from("1h")));
    }

    #[test]
    fn env_used_when_no_cli() {
        let mut overrides = Overrides::new();
        overrides.set_env("duration", Value::from("10m"));
        assert_eq!(overrides.lookup("duration"), Some(&Value::from("10m")));
        assert_eq!(overrides.lookup("enabled"), None);
    }

    #[test]
    fn absorb_plugin_overrides_parses_scalars() {
        let plugin = plugin_overrides_from(vec![(
            "PLUGIN_DISCOVER_FMF_ENABLED".to_string(),
            "false".to_string(),
        )]);
        let mut overrides = Overrides::new();
        overrides.absorb_plugin_overrides(&plugin, "discover", "fmf");
        assert_eq!(overrides.lookup("enabled"), Some(&Value::Bool(false)));
    }

    #[test]
    fn parse_scalar_types() {
        assert_eq!(parse_scalar("true"), Value::Bool(true));
        assert_eq!(parse_scalar("8"), Value::from(8));
        assert_eq!(parse_scalar("plain text"), Value::from("plain text"));
    }
}
