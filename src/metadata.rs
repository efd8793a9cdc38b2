//! Typed test and plan metadata.
//!
//! Raw nodes become typed objects here: every well-known key is normalized
//! to its canonical shape (scalar-to-list shorthand expanded, closed string
//! sets parsed, durations converted to seconds) and annotated with the
//! source its value came from.  Unknown top-level keys are preserved as an
//! opaque sidecar so re-emission is lossless.

use std::collections::BTreeMap;

use serde_yaml::{Mapping, Value};

use crate::config::Overrides;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::tree::{merge_into, Node};

// ---------------------------------------------------------------------------
// Source tags
// ---------------------------------------------------------------------------

/// Where a key's value came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SourceTag {
    #[default]
    Default,
    Fmf,
    Cli,
    Policy,
}

impl std::fmt::Display for SourceTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Default => "default",
            Self::Fmf => "fmf",
            Self::Cli => "cli",
            Self::Policy => "policy",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Closed string sets
// ---------------------------------------------------------------------------

/// Test framework.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Framework {
    #[default]
    Shell,
    Beakerlib,
    /// Forward compatibility: frameworks we do not know yet.
    Other(String),
}

impl std::str::FromStr for Framework {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "shell" => Self::Shell,
            "beakerlib" => Self::Beakerlib,
            other => Self::Other(other.to_string()),
        })
    }
}

impl std::fmt::Display for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shell => write!(f, "shell"),
            Self::Beakerlib => write!(f, "beakerlib"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}

/// Outcome-interpretation policy carried by a test's `result` key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResultInterpret {
    #[default]
    Respect,
    Xfail,
    Pass,
    Fail,
    Info,
}

impl std::str::FromStr for ResultInterpret {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "respect" => Ok(Self::Respect),
            "xfail" => Ok(Self::Xfail),
            "pass" => Ok(Self::Pass),
            "fail" => Ok(Self::Fail),
            "info" => Ok(Self::Info),
            other => Err(Error::schema(format!(
                "invalid result interpretation '{other}', expected respect, xfail, pass, fail or info"
            ))),
        }
    }
}

impl std::fmt::Display for ResultInterpret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Respect => "respect",
            Self::Xfail => "xfail",
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Info => "info",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Structured key values
// ---------------------------------------------------------------------------

/// A parsed test duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurationSpec {
    /// Original spelling, kept for re-emission.
    pub raw: String,
    pub seconds: u64,
}

impl DurationSpec {
    /// Parse a duration string: whitespace-separated `<number><unit>` terms
    /// with units `s`, `m`, `h`, `d`.  A bare number means seconds.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::schema("duration must not be empty"));
        }
        let mut seconds: u64 = 0;
        for term in trimmed.split_whitespace() {
            let digits_end = term
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(term.len());
            let (number, unit) = term.split_at(digits_end);
            let number: u64 = number
                .parse()
                .map_err(|_| Error::schema(format!("invalid duration term '{term}'")))?;
            let multiplier = match unit {
                "" | "s" => 1,
                "m" => 60,
                "h" => 3600,
                "d" => 86400,
                _ => {
                    return Err(Error::schema(format!(
                        "invalid duration unit '{unit}' in '{term}'"
                    )))
                }
            };
            seconds = seconds.saturating_add(number.saturating_mul(multiplier));
        }
        Ok(Self {
            raw: trimmed.to_string(),
            seconds,
        })
    }
}

/// A single check record: `how`, its interpretation, arbitrary extra keys.
#[derive(Debug, Clone, PartialEq)]
pub struct Check {
    pub how: String,
    pub result: ResultInterpret,
    pub extra: Mapping,
}

/// Known link relation names.
pub const LINK_RELATIONS: &[&str] = &[
    "verifies",
    "verified-by",
    "implements",
    "implemented-by",
    "documents",
    "documented-by",
    "blocks",
    "blocked-by",
    "duplicates",
    "duplicated-by",
    "parent",
    "child",
    "relates",
];

/// A link to a related resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub relation: String,
    pub target: String,
    pub note: Option<String>,
}

/// Declared shape of a well-known key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Str,
    Bool,
    StrList,
    StrMap,
    Duration,
    Framework,
    ResultPolicy,
    Checks,
    Links,
}

/// A normalized key value; one variant per schema slot.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    Str(String),
    Bool(bool),
    StrList(Vec<String>),
    StrMap(BTreeMap<String, String>),
    Duration(DurationSpec),
    Framework(Framework),
    ResultPolicy(ResultInterpret),
    Checks(Vec<Check>),
    Links(Vec<Link>),
}

impl KeyValue {
    /// Project into plain structured data.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Str(s) => Value::String(s.clone()),
            Self::Bool(b) => Value::Bool(*b),
            Self::StrList(items) => Value::Sequence(
                items.iter().map(|s| Value::String(s.clone())).collect(),
            ),
            Self::StrMap(map) => {
                let mut mapping = Mapping::new();
                for (k, v) in map {
                    mapping.insert(Value::String(k.clone()), Value::String(v.clone()));
                }
                Value::Mapping(mapping)
            }
            Self::Duration(d) => Value::String(d.raw.clone()),
            Self::Framework(f) => Value::String(f.to_string()),
            Self::ResultPolicy(r) => Value::String(r.to_string()),
            Self::Checks(checks) => Value::Sequence(
                checks
                    .iter()
                    .map(|c| {
                        let mut mapping = Mapping::new();
                        mapping.insert(Value::from("how"), Value::String(c.how.clone()));
                        mapping.insert(Value::from("result"), Value::String(c.result.to_string()));
                        for (k, v) in &c.extra {
                            mapping.insert(k.clone(), v.clone());
                        }
                        Value::Mapping(mapping)
                    })
                    .collect(),
            ),
            Self::Links(links) => Value::Sequence(
                links
                    .iter()
                    .map(|l| {
                        let mut mapping = Mapping::new();
                        mapping.insert(Value::from("relation"), Value::String(l.relation.clone()));
                        mapping.insert(Value::from("target"), Value::String(l.target.clone()));
                        if let Some(note) = &l.note {
                            mapping.insert(Value::from("note"), Value::String(note.clone()));
                        }
                        Value::Mapping(mapping)
                    })
                    .collect(),
            ),
        }
    }
}

/// A normalized key with its source tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub value: KeyValue,
    pub source: SourceTag,
}

// ---------------------------------------------------------------------------
// Key registry
// ---------------------------------------------------------------------------

/// Well-known test keys with their declared kinds, in emission order.
pub const TEST_KEYS: &[(&str, KeyKind)] = &[
    ("summary", KeyKind::Str),
    ("description", KeyKind::Str),
    ("test", KeyKind::Str),
    ("path", KeyKind::Str),
    ("framework", KeyKind::Framework),
    ("duration", KeyKind::Duration),
    ("tag", KeyKind::StrList),
    ("component", KeyKind::StrList),
    ("contact", KeyKind::StrList),
    ("require", KeyKind::StrList),
    ("recommend", KeyKind::StrList),
    ("environment", KeyKind::StrMap),
    ("enabled", KeyKind::Bool),
    ("result", KeyKind::ResultPolicy),
    ("check", KeyKind::Checks),
    ("link", KeyKind::Links),
    ("id", KeyKind::Str),
];

/// Declared kind of a well-known key, if any.
pub fn key_kind(key: &str) -> Option<KeyKind> {
    TEST_KEYS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, kind)| *kind)
}

/// Built-in default value of a key, if it has one.
fn key_default(key: &str, kind: KeyKind) -> Option<KeyValue> {
    match kind {
        KeyKind::Bool => Some(KeyValue::Bool(true)),
        KeyKind::Framework => Some(KeyValue::Framework(Framework::Shell)),
        KeyKind::ResultPolicy => Some(KeyValue::ResultPolicy(ResultInterpret::Respect)),
        KeyKind::Duration => Some(KeyValue::Duration(DurationSpec {
            raw: "5m".to_string(),
            seconds: 300,
        })),
        KeyKind::StrList => Some(KeyValue::StrList(Vec::new())),
        KeyKind::StrMap => Some(KeyValue::StrMap(BTreeMap::new())),
        KeyKind::Checks => Some(KeyValue::Checks(Vec::new())),
        KeyKind::Links => Some(KeyValue::Links(Vec::new())),
        KeyKind::Str => {
            if key == "path" {
                Some(KeyValue::Str("/".to_string()))
            } else {
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Value normalization
// ---------------------------------------------------------------------------

fn expect_string(key: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => Err(Error::schema(format!(
            "key '{key}': expected a string, got {}",
            type_name(other)
        ))),
    }
}

fn scalar_string(key: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(Error::schema(format!(
            "key '{key}': expected a scalar, got {}",
            type_name(other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

/// Expand the list-of-one shorthand.
fn sequence_items(value: &Value) -> Vec<Value> {
    match value {
        Value::Sequence(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

fn normalize_check(key: &str, value: &Value) -> Result<Check> {
    match value {
        Value::String(how) => Ok(Check {
            how: how.clone(),
            result: ResultInterpret::Respect,
            extra: Mapping::new(),
        }),
        Value::Mapping(mapping) => {
            let mut how = None;
            let mut result = ResultInterpret::Respect;
            let mut extra = Mapping::new();
            for (k, v) in mapping {
                match k.as_str() {
                    Some("how") => how = Some(expect_string(key, v)?),
                    Some("result") => result = expect_string(key, v)?.parse()?,
                    _ => {
                        extra.insert(k.clone(), v.clone());
                    }
                }
            }
            let how = how.ok_or_else(|| {
                Error::schema(format!("key '{key}': check record is missing 'how'"))
            })?;
            Ok(Check { how, result, extra })
        }
        other => Err(Error::schema(format!(
            "key '{key}': check must be a string or a mapping, got {}",
            type_name(other)
        ))),
    }
}

fn normalize_link(key: &str, value: &Value) -> Result<Link> {
    match value {
        Value::String(target) => Ok(Link {
            relation: "relates".to_string(),
            target: target.clone(),
            note: None,
        }),
        Value::Mapping(mapping) => {
            let mut relation = None;
            let mut target = None;
            let mut note = None;
            for (k, v) in mapping {
                match k.as_str() {
                    Some("relation") => relation = Some(expect_string(key, v)?),
                    Some("target") => target = Some(expect_string(key, v)?),
                    Some("note") => note = Some(expect_string(key, v)?),
                    Some(name) if LINK_RELATIONS.contains(&name) => {
                        relation = Some(name.to_string());
                        target = Some(expect_string(key, v)?);
                    }
                    Some(name) => {
                        return Err(Error::schema(format!(
                            "key '{key}': unknown link relation '{name}'"
                        )))
                    }
                    None => {
                        return Err(Error::schema(format!(
                            "key '{key}': link keys must be strings"
                        )))
                    }
                }
            }
            let target = target.ok_or_else(|| {
                Error::schema(format!("key '{key}': link record is missing a target"))
            })?;
            Ok(Link {
                relation: relation.unwrap_or_else(|| "relates".to_string()),
                target,
                note,
            })
        }
        other => Err(Error::schema(format!(
            "key '{key}': link must be a string or a mapping, got {}",
            type_name(other)
        ))),
    }
}

/// Normalize a raw value to the canonical shape of `kind`.
pub fn normalize_value(key: &str, kind: KeyKind, raw: &Value) -> Result<KeyValue> {
    match kind {
        KeyKind::Str => Ok(KeyValue::Str(expect_string(key, raw)?)),
        KeyKind::Bool => match raw {
            Value::Bool(b) => Ok(KeyValue::Bool(*b)),
            other => Err(Error::schema(format!(
                "key '{key}': expected a boolean, got {}",
                type_name(other)
            ))),
        },
        KeyKind::StrList => sequence_items(raw)
            .iter()
            .map(|item| scalar_string(key, item))
            .collect::<Result<Vec<_>>>()
            .map(KeyValue::StrList),
        KeyKind::StrMap => match raw {
            Value::Mapping(mapping) => {
                let mut map = BTreeMap::new();
                for (k, v) in mapping {
                    let name = k.as_str().ok_or_else(|| {
                        Error::schema(format!("key '{key}': mapping keys must be strings"))
                    })?;
                    map.insert(name.to_string(), scalar_string(key, v)?);
                }
                Ok(KeyValue::StrMap(map))
            }
            Value::Null => Ok(KeyValue::StrMap(BTreeMap::new())),
            other => Err(Error::schema(format!(
                "key '{key}': expected a mapping, got {}",
                type_name(other)
            ))),
        },
        KeyKind::Duration => match raw {
            Value::String(s) => Ok(KeyValue::Duration(DurationSpec::parse(s)?)),
            Value::Number(n) => {
                let seconds = n.as_u64().ok_or_else(|| {
                    Error::schema(format!("key '{key}': duration must be a positive number"))
                })?;
                Ok(KeyValue::Duration(DurationSpec {
                    raw: seconds.to_string(),
                    seconds,
                }))
            }
            other => Err(Error::schema(format!(
                "key '{key}': expected a duration string, got {}",
                type_name(other)
            ))),
        },
        KeyKind::Framework => Ok(KeyValue::Framework(expect_string(key, raw)?.parse()?)),
        KeyKind::ResultPolicy => Ok(KeyValue::ResultPolicy(expect_string(key, raw)?.parse()?)),
        KeyKind::Checks => sequence_items(raw)
            .iter()
            .map(|item| normalize_check(key, item))
            .collect::<Result<Vec<_>>>()
            .map(KeyValue::Checks),
        KeyKind::Links => sequence_items(raw)
            .iter()
            .map(|item| normalize_link(key, item))
            .collect::<Result<Vec<_>>>()
            .map(KeyValue::Links),
    }
}

// ---------------------------------------------------------------------------
// Test
// ---------------------------------------------------------------------------

/// A fully normalized test object.
#[derive(Debug, Clone, PartialEq)]
pub struct Test {
    name: String,
    entries: BTreeMap<String, Entry>,
    /// Unknown top-level keys, preserved verbatim.
    pub extra: Mapping,
}

impl Test {
    /// Normalize a raw node into a typed test.
    ///
    /// `overrides` supplies operator values (CLI flags, environment) that
    /// take precedence over the node data.
    pub fn normalize(node: &Node, overrides: Option<&Overrides>) -> Result<Self> {
        // Resolve any leftover merge markers; for nodes built straight from
        // a mapping the marker resolves against nothing and is stripped.
        let mut data = Mapping::new();
        merge_into(&mut data, &node.data)?;

        let mut entries = BTreeMap::new();
        for (key, kind) in TEST_KEYS {
            let raw = overrides
                .and_then(|o| o.lookup(key))
                .map(|v| (v.clone(), SourceTag::Cli))
                .or_else(|| {
                    data.get(&Value::String((*key).to_string()))
                        .map(|v| (v.clone(), SourceTag::Fmf))
                });
            let entry = match raw {
                Some((value, source)) => Entry {
                    value: normalize_value(key, *kind, &value)
                        .map_err(|e| Error::schema(format!("test '{}': {e}", node.name)))?,
                    source,
                },
                None => match key_default(key, *kind) {
                    Some(value) => Entry {
                        value,
                        source: SourceTag::Default,
                    },
                    None => continue,
                },
            };
            entries.insert((*key).to_string(), entry);
        }

        let mut extra = Mapping::new();
        for (k, v) in &data {
            let known = k
                .as_str()
                .is_some_and(|name| name == "adjust" || key_kind(name).is_some());
            if !known {
                extra.insert(k.clone(), v.clone());
            }
        }

        Ok(Self {
            name: node.name.clone(),
            entries,
            extra,
        })
    }

    /// The test's immutable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    /// Source tag of a key; keys never set report `default`.
    pub fn source(&self, key: &str) -> SourceTag {
        self.entries.get(key).map_or(SourceTag::Default, |e| e.source)
    }

    pub fn enabled(&self) -> bool {
        matches!(
            self.entries.get("enabled").map(|e| &e.value),
            Some(KeyValue::Bool(true)) | None
        )
    }

    pub fn duration(&self) -> Option<&DurationSpec> {
        match self.entries.get("duration").map(|e| &e.value) {
            Some(KeyValue::Duration(d)) => Some(d),
            _ => None,
        }
    }

    pub fn framework(&self) -> Framework {
        match self.entries.get("framework").map(|e| &e.value) {
            Some(KeyValue::Framework(f)) => f.clone(),
            _ => Framework::default(),
        }
    }

    pub fn result_policy(&self) -> ResultInterpret {
        match self.entries.get("result").map(|e| &e.value) {
            Some(KeyValue::ResultPolicy(r)) => *r,
            _ => ResultInterpret::default(),
        }
    }

    pub fn checks(&self) -> &[Check] {
        match self.entries.get("check").map(|e| &e.value) {
            Some(KeyValue::Checks(checks)) => checks,
            _ => &[],
        }
    }

    pub fn links(&self) -> &[Link] {
        match self.entries.get("link").map(|e| &e.value) {
            Some(KeyValue::Links(links)) => links,
            _ => &[],
        }
    }

    pub fn tags(&self) -> &[String] {
        match self.entries.get("tag").map(|e| &e.value) {
            Some(KeyValue::StrList(items)) => items,
            _ => &[],
        }
    }

    pub fn environment(&self) -> Option<&BTreeMap<String, String>> {
        match self.entries.get("environment").map(|e| &e.value) {
            Some(KeyValue::StrMap(map)) => Some(map),
            _ => None,
        }
    }

    /// The command of the `test` key.
    pub fn script(&self) -> Option<&str> {
        match self.entries.get("test").map(|e| &e.value) {
            Some(KeyValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// Replace a key with a raw value, normalizing it per the key's schema.
    ///
    /// Unknown keys land in the opaque sidecar.  A YAML null resets a known
    /// key to its built-in default.
    pub fn set_key(&mut self, key: &str, raw: &Value, source: SourceTag) -> Result<()> {
        match key_kind(key) {
            Some(kind) => {
                let value = match raw {
                    Value::Null => key_default(key, kind),
                    other => Some(normalize_value(key, kind, other)?),
                };
                match value {
                    Some(value) => {
                        self.entries.insert(key.to_string(), Entry { value, source });
                    }
                    None => {
                        self.entries.remove(key);
                    }
                }
            }
            None => {
                self.extra
                    .insert(Value::String(key.to_string()), raw.clone());
            }
        }
        Ok(())
    }

    /// Current value of a key as plain structured data (null when unset).
    pub fn plain_key(&self, key: &str) -> Value {
        if let Some(entry) = self.entries.get(key) {
            return entry.value.to_value();
        }
        self.extra
            .get(&Value::String(key.to_string()))
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Project the whole test into plain structured data.
    pub fn to_value(&self) -> Value {
        let mut mapping = Mapping::new();
        mapping.insert(Value::from("name"), Value::String(self.name.clone()));
        for (key, _) in TEST_KEYS {
            if let Some(entry) = self.entries.get(*key) {
                mapping.insert(Value::String((*key).to_string()), entry.value.to_value());
            }
        }
        for (k, v) in &self.extra {
            mapping.insert(k.clone(), v.clone());
        }
        Value::Mapping(mapping)
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Step names a plan may carry; their data is opaque to the core.
pub const PLAN_STEPS: &[&str] = &[
    "discover",
    "provision",
    "prepare",
    "execute",
    "finish",
    "report",
];

/// A normalized plan: a lighter schema next to [`Test`].
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    name: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub enabled: bool,
    pub environment: BTreeMap<String, String>,
    pub tag: Vec<String>,
    pub link: Vec<Link>,
    /// Per-plan context dimension overrides.
    pub context: Context,
    /// Raw step data (`discover`, `execute`, ...), consumed downstream.
    pub steps: Mapping,
    pub extra: Mapping,
}

impl Plan {
    pub fn normalize(node: &Node) -> Result<Self> {
        let mut data = Mapping::new();
        merge_into(&mut data, &node.data)?;

        let mut plan = Self {
            name: node.name.clone(),
            summary: None,
            description: None,
            enabled: true,
            environment: BTreeMap::new(),
            tag: Vec::new(),
            link: Vec::new(),
            context: Context::new(),
            steps: Mapping::new(),
            extra: Mapping::new(),
        };

        for (k, v) in &data {
            let Some(name) = k.as_str() else {
                plan.extra.insert(k.clone(), v.clone());
                continue;
            };
            match name {
                "summary" => plan.summary = Some(expect_string(name, v)?),
                "description" => plan.description = Some(expect_string(name, v)?),
                "enabled" => match v {
                    Value::Bool(b) => plan.enabled = *b,
                    other => {
                        return Err(Error::schema(format!(
                            "plan '{}': key 'enabled': expected a boolean, got {}",
                            node.name,
                            type_name(other)
                        )))
                    }
                },
                "environment" => {
                    if let KeyValue::StrMap(map) = normalize_value(name, KeyKind::StrMap, v)? {
                        plan.environment = map;
                    }
                }
                "tag" => {
                    if let KeyValue::StrList(items) = normalize_value(name, KeyKind::StrList, v)? {
                        plan.tag = items;
                    }
                }
                "link" => {
                    if let KeyValue::Links(links) = normalize_value(name, KeyKind::Links, v)? {
                        plan.link = links;
                    }
                }
                "context" => plan.context = Context::from_value(v)?,
                "adjust" => {}
                step if PLAN_STEPS.contains(&step) => {
                    plan.steps.insert(k.clone(), v.clone());
                }
                _ => {
                    plan.extra.insert(k.clone(), v.clone());
                }
            }
        }

        Ok(plan)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(yaml: &str) -> Node {
        Node::from_data("/t", serde_yaml::from_str(yaml).unwrap()).unwrap()
    }

    #[test]
    fn scalar_to_list_shorthand_expands() {
        let test = Test::normalize(&node("test: ./run.sh\ntag: smoke\n"), None).unwrap();
        assert_eq!(test.tags(), ["smoke"]);
    }

    #[test]
    fn sequences_stay_sequences() {
        let test = Test::normalize(&node("test: ./run.sh\ntag: [a, b]\n"), None).unwrap();
        assert_eq!(test.tags(), ["a", "b"]);
    }

    #[test]
    fn defaults_carry_default_source() {
        let test = Test::normalize(&node("test: ./run.sh\n"), None).unwrap();
        assert!(test.enabled());
        assert_eq!(test.source("enabled"), SourceTag::Default);
        assert_eq!(test.source("test"), SourceTag::Fmf);
        assert_eq!(test.framework(), Framework::Shell);
        assert_eq!(test.result_policy(), ResultInterpret::Respect);
        assert_eq!(test.duration().unwrap().seconds, 300);
    }

    #[test]
    fn non_boolean_enabled_is_fatal() {
        let err = Test::normalize(&node("test: ./run.sh\nenabled: yes please\n"), None).unwrap_err();
        assert!(err.to_string().contains("expected a boolean"));
    }

    #[test]
    fn unknown_keys_are_preserved() {
        let test = Test::normalize(&node("test: ./run.sh\ncustom-key: [1, 2]\n"), None).unwrap();
        assert!(test.extra.contains_key(&Value::from("custom-key")));
        let emitted = test.to_value();
        assert!(emitted
            .as_mapping()
            .unwrap()
            .contains_key(&Value::from("custom-key")));
    }

    #[test]
    fn duration_parsing() {
        assert_eq!(DurationSpec::parse("5m").unwrap().seconds, 300);
        assert_eq!(DurationSpec::parse("1h").unwrap().seconds, 3600);
        assert_eq!(DurationSpec::parse("1h 30m").unwrap().seconds, 5400);
        assert_eq!(DurationSpec::parse("90").unwrap().seconds, 90);
        assert_eq!(DurationSpec::parse("2d").unwrap().seconds, 172_800);
        assert!(DurationSpec::parse("").is_err());
        assert!(DurationSpec::parse("5x").is_err());
        assert!(DurationSpec::parse("m").is_err());
    }

    #[test]
    fn check_shorthand_and_records() {
        let test = Test::normalize(
            &node("test: ./run.sh\ncheck:\n  - avc\n  - how: dmesg\n    result: xfail\n    pattern: oops\n"),
            None,
        )
        .unwrap();
        let checks = test.checks();
        assert_eq!(checks.len(), 2);
        assert_eq!(checks[0].how, "avc");
        assert_eq!(checks[0].result, ResultInterpret::Respect);
        assert_eq!(checks[1].how, "dmesg");
        assert_eq!(checks[1].result, ResultInterpret::Xfail);
        assert!(checks[1].extra.contains_key(&Value::from("pattern")));
    }

    #[test]
    fn link_shorthands() {
        let test = Test::normalize(
            &node(
                "test: ./run.sh\nlink:\n  - /some/feature\n  - verifies: /bugs/123\n  - relation: documents\n    target: https://docs\n    note: manual\n",
            ),
            None,
        )
        .unwrap();
        let links = test.links();
        assert_eq!(links[0].relation, "relates");
        assert_eq!(links[0].target, "/some/feature");
        assert_eq!(links[1].relation, "verifies");
        assert_eq!(links[1].target, "/bugs/123");
        assert_eq!(links[2].relation, "documents");
        assert_eq!(links[2].note.as_deref(), Some("manual"));
    }

    #[test]
    fn unknown_link_relation_is_fatal() {
        let err = Test::normalize(&node("test: ./run.sh\nlink:\n  - explodes: /x\n"), None).unwrap_err();
        assert!(err.to_string().contains("unknown link relation"));
    }

    #[test]
    fn invalid_result_policy_is_fatal() {
        let err = Test::normalize(&node("test: ./run.sh\nresult: maybe\n"), None).unwrap_err();
        assert!(err.to_string().contains("invalid result interpretation"));
    }

    #[test]
    fn environment_coerces_scalars() {
        let test = Test::normalize(
            &node("test: ./run.sh\nenvironment:\n  COUNT: 3\n  DEBUG: true\n  NAME: x\n"),
            None,
        )
        .unwrap();
        let env = test.environment().unwrap();
        assert_eq!(env.get("COUNT").map(String::as_str), Some("3"));
        assert_eq!(env.get("DEBUG").map(String::as_str), Some("true"));
        assert_eq!(env.get("NAME").map(String::as_str), Some("x"));
    }

    #[test]
    fn set_key_from_policy_tags_policy() {
        let mut test = Test::normalize(&node("test: ./run.sh\n"), None).unwrap();
        let value: Value = serde_yaml::from_str("[a, b]").unwrap();
        test.set_key("tag", &value, SourceTag::Policy).unwrap();
        assert_eq!(test.tags(), ["a", "b"]);
        assert_eq!(test.source("tag"), SourceTag::Policy);
    }

    #[test]
    fn set_key_null_resets_to_default() {
        let mut test = Test::normalize(&node("test: ./run.sh\nenabled: false\n"), None).unwrap();
        test.set_key("enabled", &Value::Null, SourceTag::Policy).unwrap();
        assert!(test.enabled());
    }

    #[test]
    fn plan_normalization() {
        let plan = Plan::normalize(&node(
            "summary: CI plan\ncontext:\n  distro: fedora-40\nexecute:\n  how: shell\ndiscover:\n  how: fmf\n",
        ))
        .unwrap();
        assert_eq!(plan.summary.as_deref(), Some("CI plan"));
        assert!(plan.enabled);
        assert!(plan.context.is_defined("distro"));
        assert_eq!(plan.steps.len(), 2);
    }

    #[test]
    fn framework_forward_compatible() {
        let test = Test::normalize(&node("test: ./run.sh\nframework: avocado\n"), None).unwrap();
        assert_eq!(test.framework(), Framework::Other("avocado".to_string()));
    }
}
