//! The policy engine: a template-driven metadata rewrite pass.
//!
//! A policy document carries a `test-policy` sequence of rules; each rule
//! maps test keys to templates.  For every `(key, template)` pair the
//! template is rendered against the post-adjustment test, the output is
//! re-parsed as structured data, normalized per the key's schema and
//! substituted into the test with the `policy` source tag.
//!
//! Templates see three bindings, all plain structured data:
//! `VALUE` (the key's current value), `VALUE_SOURCE` (its source tag) and
//! `TEST` (a read-only view of the whole test).

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use minijinja::{context, Environment, ErrorKind};
use serde_yaml::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::metadata::{SourceTag, Test};
use crate::patterns;

// ---------------------------------------------------------------------------
// Document model
// ---------------------------------------------------------------------------

/// One policy rule: an ordered list of key rewrites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRule {
    pub rewrites: Vec<(String, String)>,
}

/// A parsed policy document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Policy {
    pub rules: Vec<PolicyRule>,
}

impl Policy {
    /// Parse a policy document from YAML text.
    pub fn parse(content: &str) -> Result<Self> {
        let document: Value = serde_yaml::from_str(content)
            .map_err(|e| Error::syntax(format!("failed to parse policy document: {e}")))?;
        let mapping = document
            .as_mapping()
            .ok_or_else(|| Error::schema("policy document must be a mapping"))?;
        let rules_value = mapping
            .get(&Value::from("test-policy"))
            .ok_or_else(|| Error::schema("policy document is missing 'test-policy'"))?;
        let rules_seq = rules_value
            .as_sequence()
            .ok_or_else(|| Error::schema("'test-policy' must be a sequence of rules"))?;

        let mut rules = Vec::new();
        for rule in rules_seq {
            let rule_mapping = rule
                .as_mapping()
                .ok_or_else(|| Error::schema("each policy rule must be a mapping"))?;
            let mut rewrites = Vec::new();
            for (key, template) in rule_mapping {
                let key = key
                    .as_str()
                    .ok_or_else(|| Error::schema("policy rule keys must be strings"))?;
                let template = template
                    .as_str()
                    .ok_or_else(|| {
                        Error::schema(format!("policy template for key '{key}' must be a string"))
                    })?;
                rewrites.push((key.to_string(), template.to_string()));
            }
            rules.push(PolicyRule { rewrites });
        }

        Ok(Self { rules })
    }

    /// Load a policy document from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::resolution(format!("cannot read policy file {}: {e}", path.display()))
        })?;
        Self::parse(&content)
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve a policy location to a file path.
///
/// A filepath is used as given; when a policy root is configured it must lie
/// under it.  A symbolic name requires a root and maps to
/// `<root>/<name>.yaml` with dots as directory separators.
pub fn resolve(
    file: Option<&Path>,
    name: Option<&str>,
    root: Option<&Path>,
) -> Result<PathBuf> {
    match (file, name) {
        (Some(_), Some(_)) => Err(Error::resolution(
            "policy file and policy name are mutually exclusive",
        )),
        (Some(file), None) => {
            let Some(root) = root else {
                return Ok(file.to_path_buf());
            };
            let canonical = file.canonicalize().map_err(|e| {
                Error::resolution(format!("cannot resolve policy file {}: {e}", file.display()))
            })?;
            let root = root.canonicalize().map_err(|e| {
                Error::resolution(format!("cannot resolve policy root {}: {e}", root.display()))
            })?;
            if !canonical.starts_with(&root) {
                return Err(Error::resolution(format!(
                    "policy file {} lies outside the policy root {}",
                    canonical.display(),
                    root.display()
                )));
            }
            Ok(canonical)
        }
        (None, Some(name)) => {
            let Some(root) = root else {
                return Err(Error::resolution(
                    "a policy root is required to resolve a policy name",
                ));
            };
            let mut path = root.to_path_buf();
            for segment in name.split('.') {
                if segment.is_empty() || segment == ".." {
                    return Err(Error::resolution(format!("invalid policy name '{name}'")));
                }
                path.push(segment);
            }
            path.set_extension("yaml");
            if !path.is_file() {
                return Err(Error::resolution(format!(
                    "policy '{name}' not found under {}",
                    root.display()
                )));
            }
            Ok(path)
        }
        (None, None) => Err(Error::resolution("no policy file or name given")),
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// The template environment: control flow, built-in pure filters, plus the
/// regex filters routed through the shared helper.  No I/O, no environment
/// access, no command execution.
fn template_environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_keep_trailing_newline(true);

    env.add_filter("regex_search", |value: String, pattern: String| {
        patterns::search(&pattern, &value)
            .map_err(|e| minijinja::Error::new(ErrorKind::InvalidOperation, e.to_string()))
    });
    env.add_filter("regex_match", |value: String, pattern: String| {
        patterns::match_start(&pattern, &value)
            .map_err(|e| minijinja::Error::new(ErrorKind::InvalidOperation, e.to_string()))
    });
    env.add_filter(
        "regex_replace",
        |value: String, pattern: String, replacement: String| {
            patterns::compile(&pattern)
                .map(|re| re.replace_all(&value, replacement.as_str()).into_owned())
                .map_err(|e| minijinja::Error::new(ErrorKind::InvalidOperation, e.to_string()))
        },
    );
    env.add_filter("enumerate", |value: minijinja::Value| {
        let iter = value.try_iter().map_err(|e| {
            minijinja::Error::new(ErrorKind::InvalidOperation, e.to_string())
        })?;
        let pairs: Vec<minijinja::Value> = iter
            .enumerate()
            .map(|(i, item)| minijinja::Value::from(vec![minijinja::Value::from(i), item]))
            .collect();
        Ok(minijinja::Value::from(pairs))
    });

    env
}

/// Apply a policy to a normalized test.
///
/// Rules apply in order; within a rule, key rewrites apply in declaration
/// order.  The rendered value replaces the original; templates desiring
/// accumulation interpolate `VALUE` themselves.  Output that re-parses to
/// YAML null leaves the key untouched.  An optional cooperative time budget
/// bounds the whole pass; exceeding it is fatal for the test.
pub fn apply(policy: &Policy, test: &mut Test, budget: Option<Duration>) -> Result<()> {
    let env = template_environment();
    let started = Instant::now();

    for (rule_index, rule) in policy.rules.iter().enumerate() {
        for (key, template) in &rule.rewrites {
            if let Some(budget) = budget {
                if started.elapsed() >= budget {
                    return Err(Error::render(
                        rule_index,
                        key.clone(),
                        "render time budget exceeded",
                    ));
                }
            }

            let value = plain(test.plain_key(key), rule_index, key)?;
            let test_view = plain(test.to_value(), rule_index, key)?;
            let source = test.source(key).to_string();

            let rendered = env
                .render_str(
                    template,
                    context! {
                        VALUE => minijinja::Value::from_serialize(&value),
                        VALUE_SOURCE => source,
                        TEST => minijinja::Value::from_serialize(&test_view),
                    },
                )
                .map_err(|e| Error::render(rule_index, key.clone(), e.to_string()))?;

            let parsed: Value = serde_yaml::from_str(&rendered).map_err(|e| {
                Error::render(
                    rule_index,
                    key.clone(),
                    format!("re-parsing rendered value failed: {e}"),
                )
            })?;

            if parsed.is_null() {
                debug!(rule = rule_index, key = key.as_str(), "policy rendered empty, key untouched");
                continue;
            }

            test.set_key(key, &parsed, SourceTag::Policy)
                .map_err(|e| Error::render(rule_index, key.clone(), e.to_string()))?;
            debug!(rule = rule_index, key = key.as_str(), "policy rewrote key");
        }
    }

    Ok(())
}

/// Project a structured value into plain JSON data for the template scope.
fn plain(value: Value, rule: usize, key: &str) -> Result<serde_json::Value> {
    serde_json::to_value(&value)
        .map_err(|e| Error::render(rule, key.to_string(), format!("projection failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::ResultInterpret;
    use crate::tree::Node;

    fn test_from(yaml: &str) -> Test {
        let node = Node::from_data("/t", serde_yaml::from_str(yaml).unwrap()).unwrap();
        Test::normalize(&node, None).unwrap()
    }

    fn policy_from(rules: &str) -> Policy {
        Policy::parse(&format!("test-policy:\n{rules}")).unwrap()
    }

    #[test]
    fn parse_preserves_rule_and_key_order() {
        let policy = Policy::parse(
            "test-policy:\n  - duration: 'a'\n    enabled: 'b'\n  - tag: 'c'\n",
        )
        .unwrap();
        assert_eq!(policy.rules.len(), 2);
        assert_eq!(policy.rules[0].rewrites[0].0, "duration");
        assert_eq!(policy.rules[0].rewrites[1].0, "enabled");
        assert_eq!(policy.rules[1].rewrites[0].0, "tag");
    }

    #[test]
    fn parse_rejects_missing_test_policy() {
        assert!(Policy::parse("other: []").is_err());
        assert!(Policy::parse("test-policy: nope").is_err());
    }

    #[test]
    fn identity_template_is_a_noop() {
        // A rule rendering exactly `{{ VALUE }}` leaves the test unchanged
        // regardless of key type.
        let policy = policy_from("  - duration: '{{ VALUE }}'\n    enabled: '{{ VALUE }}'\n    tag: '{{ VALUE }}'\n");
        let mut test = test_from("test: ./run.sh\nduration: 10m\nenabled: false\ntag: [a, b]\n");
        let before_duration = test.duration().unwrap().seconds;
        apply(&policy, &mut test, None).unwrap();
        assert_eq!(test.duration().unwrap().seconds, before_duration);
        assert!(!test.enabled());
        assert_eq!(test.tags(), ["a", "b"]);
        assert_eq!(test.source("duration"), SourceTag::Policy);
    }

    #[test]
    fn replacement_not_accumulation() {
        let policy = policy_from("  - tag: '[replaced]'\n");
        let mut test = test_from("test: ./run.sh\ntag: [original]\n");
        apply(&policy, &mut test, None).unwrap();
        assert_eq!(test.tags(), ["replaced"]);
    }

    #[test]
    fn default_check_injection() {
        // Inject an avc check unless one is already present.
        let rule = "  - check: \"{% if 'avc' not in VALUE | map(attribute='how') %}- how: avc\\n  result: respect\\n{% endif %}\"\n";
        let policy = policy_from(rule);

        let mut bare = test_from("test: ./run.sh\ncheck: []\n");
        apply(&policy, &mut bare, None).unwrap();
        assert_eq!(bare.checks().len(), 1);
        assert_eq!(bare.checks()[0].how, "avc");
        assert_eq!(bare.checks()[0].result, ResultInterpret::Respect);

        let mut existing = test_from("test: ./run.sh\ncheck:\n  - how: avc\n    result: xfail\n");
        apply(&policy, &mut existing, None).unwrap();
        assert_eq!(existing.checks().len(), 1);
        assert_eq!(existing.checks()[0].result, ResultInterpret::Xfail);
    }

    #[test]
    fn value_source_binding() {
        let policy = policy_from("  - id: '\"was-{{ VALUE_SOURCE }}\"'\n");
        let mut test = test_from("test: ./run.sh\n");
        apply(&policy, &mut test, None).unwrap();
        let id = test.plain_key("id");
        assert_eq!(id, Value::from("was-default"));
        assert_eq!(test.source("id"), SourceTag::Policy);
    }

    #[test]
    fn test_binding_reads_other_keys() {
        let policy = policy_from("  - id: '\"{{ TEST.name }}\"'\n");
        let mut test = test_from("test: ./run.sh\n");
        apply(&policy, &mut test, None).unwrap();
        assert_eq!(test.plain_key("id"), Value::from("/t"));
    }

    #[test]
    fn rules_apply_in_order_later_sees_earlier() {
        let policy = policy_from("  - tag: '[first]'\n  - tag: '[{{ VALUE[0] }}, second]'\n");
        let mut test = test_from("test: ./run.sh\n");
        apply(&policy, &mut test, None).unwrap();
        assert_eq!(test.tags(), ["first", "second"]);
    }

    #[test]
    fn render_error_names_rule_and_key() {
        let policy = policy_from("  - duration: '{{ VALUE | bogus_filter }}'\n");
        let mut test = test_from("test: ./run.sh\n");
        let err = apply(&policy, &mut test, None).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("rule #0"));
        assert!(message.contains("'duration'"));
    }

    #[test]
    fn reparse_error_is_fatal() {
        let policy = policy_from("  - check: '{: not yaml'\n");
        let mut test = test_from("test: ./run.sh\n");
        let err = apply(&policy, &mut test, None).unwrap_err();
        assert!(err.to_string().contains("re-parsing"));
    }

    #[test]
    fn schema_violation_after_reparse_is_fatal() {
        let policy = policy_from("  - enabled: '\"not a boolean\"'\n");
        let mut test = test_from("test: ./run.sh\n");
        assert!(apply(&policy, &mut test, None).is_err());
    }

    #[test]
    fn unknown_keys_can_be_written() {
        let policy = policy_from("  - custom: '[1, 2]'\n");
        let mut test = test_from("test: ./run.sh\n");
        apply(&policy, &mut test, None).unwrap();
        let value = test.plain_key("custom");
        assert_eq!(value, serde_yaml::from_str::<Value>("[1, 2]").unwrap());
    }

    #[test]
    fn exhausted_budget_is_fatal() {
        let policy = policy_from("  - tag: '[a]'\n");
        let mut test = test_from("test: ./run.sh\n");
        let err = apply(&policy, &mut test, Some(Duration::ZERO)).unwrap_err();
        assert!(err.to_string().contains("budget"));
    }

    #[test]
    fn regex_filters_available() {
        let policy = policy_from(
            "  - id: \"{% if TEST.name | regex_search('^/t') %}'matched'{% endif %}\"\n",
        );
        let mut test = test_from("test: ./run.sh\n");
        apply(&policy, &mut test, None).unwrap();
        assert_eq!(test.plain_key("id"), Value::from("matched"));
    }

    #[test]
    fn resolve_plain_file_without_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("p.yaml");
        std::fs::write(&file, "test-policy: []\n").unwrap();
        let resolved = resolve(Some(&file), None, None).unwrap();
        assert_eq!(resolved, file);
    }

    #[test]
    fn resolve_file_must_live_under_root() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let inside_file = root.path().join("p.yaml");
        std::fs::write(&inside_file, "test-policy: []\n").unwrap();
        let outside_file = outside.path().join("p.yaml");
        std::fs::write(&outside_file, "test-policy: []\n").unwrap();

        assert!(resolve(Some(&inside_file), None, Some(root.path())).is_ok());
        let err = resolve(Some(&outside_file), None, Some(root.path())).unwrap_err();
        assert!(err.to_string().contains("outside the policy root"));
    }

    #[test]
    fn resolve_name_maps_dots_to_directories() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("ci").join("checks.yaml");
        std::fs::create_dir_all(nested.parent().unwrap()).unwrap();
        std::fs::write(&nested, "test-policy: []\n").unwrap();

        let resolved = resolve(None, Some("ci.checks"), Some(root.path())).unwrap();
        assert_eq!(resolved, nested);
    }

    #[test]
    fn resolve_name_requires_root() {
        let err = resolve(None, Some("ci.checks"), None).unwrap_err();
        assert!(err.to_string().contains("policy root is required"));
    }

    #[test]
    fn resolve_missing_name_is_resolution_error() {
        let root = tempfile::tempdir().unwrap();
        assert!(resolve(None, Some("absent"), Some(root.path())).is_err());
    }

    #[test]
    fn load_then_apply_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("p.yaml");
        std::fs::write(&file, "test-policy:\n  - tag: '[from-disk]'\n").unwrap();
        let policy = Policy::load(&file).unwrap();
        let mut test = test_from("test: ./run.sh\n");
        apply(&policy, &mut test, None).unwrap();
        assert_eq!(test.tags(), ["from-disk"]);
    }
}
