//! The hardware-requirement constraint language.
//!
//! A constraint document is a nested boolean tree: a mapping either holds
//! leaf constraints (`memory: '>= 8 GB'`, `cpu.cores: '4'`) or exactly one
//! of `and` / `or` over a list of sub-documents.  Leaves carry an operator,
//! a typed right-hand side (unit-aware quantities, booleans, strings,
//! version-like values) and evaluate against a hardware description with
//! three-valued logic: missing facts yield `unknown`, not `no`.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde_yaml::Value;

use crate::context::{compare_values, ValueOrder};
use crate::error::{Error, Result};
use crate::patterns;

// ---------------------------------------------------------------------------
// Operators and leaf typing
// ---------------------------------------------------------------------------

/// Constraint operators.  `=` is the default when none is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Match,
    NotMatch,
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Match => "~",
            Self::NotMatch => "!~",
        };
        write!(f, "{s}")
    }
}

/// Semantic family of a leaf path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafKind {
    /// Numeric with an optional size unit (`memory`, `disk[n].size`).
    Quantity,
    /// Dimensionless numeric (`cpu.cores`).
    Count,
    /// Boolean flag (`virtualization.is-virtualized`).
    Flag,
    /// Free-form string with regex operators (`cpu.model-name`).
    Text,
    /// Version-like string with ordered comparison (`tpm.version`).
    Version,
    /// Leaf families we do not know; kept opaque for forward compatibility.
    Unknown,
}

impl LeafKind {
    fn allows(self, op: Operator) -> bool {
        match self {
            Self::Quantity | Self::Count | Self::Version => !matches!(op, Operator::Match | Operator::NotMatch),
            Self::Flag => matches!(op, Operator::Eq | Operator::Ne),
            Self::Text => matches!(
                op,
                Operator::Eq | Operator::Ne | Operator::Match | Operator::NotMatch
            ),
            Self::Unknown => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Leaf paths
// ---------------------------------------------------------------------------

/// One segment of a dotted leaf path, optionally indexed (`disk[0]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub name: String,
    pub index: Option<usize>,
}

/// A dotted leaf path such as `cpu.model-name` or `disk[0].size`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafPath {
    pub segments: Vec<PathSegment>,
}

impl LeafPath {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::syntax("empty constraint path"));
        }
        let segments = raw
            .split('.')
            .map(|part| {
                if let Some((name, rest)) = part.split_once('[') {
                    let index = rest
                        .strip_suffix(']')
                        .and_then(|n| n.parse::<usize>().ok())
                        .ok_or_else(|| {
                            Error::syntax(format!("invalid index in constraint path '{raw}'"))
                        })?;
                    if name.is_empty() {
                        return Err(Error::syntax(format!("invalid constraint path '{raw}'")));
                    }
                    Ok(PathSegment {
                        name: name.to_string(),
                        index: Some(index),
                    })
                } else {
                    if part.is_empty() {
                        return Err(Error::syntax(format!("invalid constraint path '{raw}'")));
                    }
                    Ok(PathSegment {
                        name: part.to_string(),
                        index: None,
                    })
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { segments })
    }

    /// Semantic family of this path.
    pub fn kind(&self) -> LeafKind {
        let names: Vec<&str> = self.segments.iter().map(|s| s.name.as_str()).collect();
        match names.as_slice() {
            ["memory"] | ["disk", "size"] => LeafKind::Quantity,
            ["cpu", "cores" | "threads" | "family" | "model" | "stepping"] => LeafKind::Count,
            ["virtualization", "is-virtualized" | "is-supported"] => LeafKind::Flag,
            ["arch"]
            | ["hostname"]
            | ["cpu", "model-name" | "flag"]
            | ["virtualization", "hypervisor"]
            | ["disk", "model-name"]
            | ["network", "type"]
            | ["compatible", "distro"]
            | ["boot", "method"] => LeafKind::Text,
            ["tpm", "version"] => LeafKind::Version,
            _ => LeafKind::Unknown,
        }
    }
}

impl std::fmt::Display for LeafPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", segment.name)?;
            if let Some(index) = segment.index {
                write!(f, "[{index}]")?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Quantities
// ---------------------------------------------------------------------------

/// Multiplier of a size unit; decimal SI and binary units are both known.
fn unit_multiplier(unit: &str) -> Option<f64> {
    Some(match unit {
        "B" => 1.0,
        "kB" | "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        "PB" => 1e15,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TiB" => 1024.0f64.powi(4),
        "PiB" => 1024.0f64.powi(5),
        _ => return None,
    })
}

/// Parse a quantity: a number with an optional unit, normalized to base
/// units.  Underscores in the number are ignored for readability.
fn parse_quantity(raw: &str, allow_unit: bool) -> Result<f64> {
    let s = raw.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '_' || c == '-' || c == '+'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let number: f64 = number
        .replace('_', "")
        .parse()
        .map_err(|_| Error::syntax(format!("invalid quantity '{raw}'")))?;
    let unit = unit.trim();
    if unit.is_empty() {
        return Ok(number);
    }
    if !allow_unit {
        return Err(Error::semantic(format!(
            "unit '{unit}' not allowed for a dimensionless value"
        )));
    }
    let multiplier = unit_multiplier(unit)
        .ok_or_else(|| Error::syntax(format!("unknown unit '{unit}' in '{raw}'")))?;
    Ok(number * multiplier)
}

// ---------------------------------------------------------------------------
// Constraints
// ---------------------------------------------------------------------------

/// Typed right-hand side of a leaf constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum LeafValue {
    /// Normalized to base units.
    Quantity(f64),
    Number(f64),
    Flag(bool),
    Text(String),
    Version(String),
    /// Unknown leaf family; kept verbatim.
    Opaque(String),
}

/// A single leaf constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafConstraint {
    pub path: LeafPath,
    pub op: Operator,
    pub value: LeafValue,
    /// RHS exactly as written (trimmed), for canonical re-serialization.
    raw: String,
}

/// A parsed constraint tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    And(Vec<Constraint>),
    Or(Vec<Constraint>),
    Leaf(LeafConstraint),
}

fn split_operator(raw: &str) -> (Operator, &str) {
    let s = raw.trim();
    for (prefix, op) in [
        ("!=", Operator::Ne),
        ("!~", Operator::NotMatch),
        (">=", Operator::Ge),
        ("<=", Operator::Le),
        (">", Operator::Gt),
        ("<", Operator::Lt),
        ("=", Operator::Eq),
        ("~", Operator::Match),
    ] {
        if let Some(rest) = s.strip_prefix(prefix) {
            return (op, rest.trim());
        }
    }
    (Operator::Eq, s)
}

fn parse_leaf(path_raw: &str, value_raw: &str) -> Result<LeafConstraint> {
    let path = LeafPath::parse(path_raw)?;
    let kind = path.kind();
    let (op, rhs) = split_operator(value_raw);

    if !kind.allows(op) {
        return Err(Error::semantic(format!(
            "operator '{op}' is not supported for '{path}'"
        )));
    }

    let value = match kind {
        LeafKind::Quantity => LeafValue::Quantity(parse_quantity(rhs, true)?),
        LeafKind::Count => LeafValue::Number(parse_quantity(rhs, false)?),
        LeafKind::Flag => match rhs {
            "true" => LeafValue::Flag(true),
            "false" => LeafValue::Flag(false),
            other => {
                return Err(Error::syntax(format!(
                    "invalid flag value '{other}' for '{path}', expected true or false"
                )))
            }
        },
        LeafKind::Text => {
            if matches!(op, Operator::Match | Operator::NotMatch) {
                // Validate the pattern up front so evaluation cannot fail.
                patterns::compile(rhs)?;
            }
            LeafValue::Text(rhs.to_string())
        }
        LeafKind::Version => LeafValue::Version(rhs.to_string()),
        LeafKind::Unknown => LeafValue::Opaque(rhs.to_string()),
    };

    Ok(LeafConstraint {
        path,
        op,
        value,
        raw: rhs.to_string(),
    })
}

impl Constraint {
    /// Parse a constraint document.
    pub fn parse(value: &Value) -> Result<Self> {
        let mapping = value
            .as_mapping()
            .ok_or_else(|| Error::schema("hardware constraint document must be a mapping"))?;

        let has_and = mapping.contains_key(&Value::from("and"));
        let has_or = mapping.contains_key(&Value::from("or"));

        if has_and || has_or {
            if mapping.len() != 1 {
                return Err(Error::semantic(
                    "'and'/'or' may not be mixed with other constraints at the same level",
                ));
            }
            let word = if has_and { "and" } else { "or" };
            let children_value = mapping
                .get(&Value::from(word))
                .ok_or_else(|| Error::schema(format!("'{word}' must hold a sequence")))?;
            let children = children_value
                .as_sequence()
                .ok_or_else(|| Error::schema(format!("'{word}' must hold a sequence")))?
                .iter()
                .map(Self::parse)
                .collect::<Result<Vec<_>>>()?;
            return Ok(if has_and {
                Self::And(children)
            } else {
                Self::Or(children)
            });
        }

        let mut leaves = Vec::new();
        for (key, value) in mapping {
            let path = key
                .as_str()
                .ok_or_else(|| Error::schema("constraint paths must be strings"))?;
            let raw = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(Error::schema(format!(
                        "constraint '{path}' must be a scalar, got {other:?}"
                    )))
                }
            };
            leaves.push(Self::Leaf(parse_leaf(path, &raw)?));
        }

        Ok(unwrap_single(leaves, Self::And))
    }

    /// Parse a constraint document from YAML text.
    pub fn parse_str(yaml: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(yaml)
            .map_err(|e| Error::syntax(format!("failed to parse hardware document: {e}")))?;
        Self::parse(&value)
    }

    /// Flatten trivially-nested boolean nodes.
    ///
    /// `and: [x]` reduces to `x`, nested nodes of the same operator are
    /// flattened, and the degenerate empty forms are kept as written.
    pub fn simplify(self) -> Self {
        match self {
            Self::Leaf(leaf) => Self::Leaf(leaf),
            Self::And(children) => {
                let mut flat = Vec::new();
                for child in children {
                    match child.simplify() {
                        Self::And(sub) => flat.extend(sub),
                        other => flat.push(other),
                    }
                }
                unwrap_single(flat, Self::And)
            }
            Self::Or(children) => {
                let mut flat = Vec::new();
                for child in children {
                    match child.simplify() {
                        Self::Or(sub) => flat.extend(sub),
                        other => flat.push(other),
                    }
                }
                unwrap_single(flat, Self::Or)
            }
        }
    }

    /// Canonical textual re-serialization.
    ///
    /// Leaves come out as `key: 'OP RHS'` with the operator explicit, and
    /// composites as an `and:`/`or:` list.  Output already in canonical form
    /// round-trips byte-exactly through parse and serialize.
    pub fn to_spec(&self) -> String {
        let mut out = String::new();
        match self {
            Self::Leaf(leaf) => {
                let _ = writeln!(out, "{}", leaf_spec(leaf));
            }
            Self::And(children) => write_composite("and", children, 0, &mut out),
            Self::Or(children) => write_composite("or", children, 0, &mut out),
        }
        out
    }

    /// Dotted paths of leaves whose family is unknown to this build.
    ///
    /// Whether such constraints should be dropped or kept is a caller
    /// policy; the tree itself preserves them.
    pub fn unknown_leaves(&self) -> Vec<String> {
        let mut found = Vec::new();
        self.collect_unknown(&mut found);
        found
    }

    fn collect_unknown(&self, found: &mut Vec<String>) {
        match self {
            Self::Leaf(leaf) => {
                if leaf.path.kind() == LeafKind::Unknown {
                    found.push(leaf.path.to_string());
                }
            }
            Self::And(children) | Self::Or(children) => {
                for child in children {
                    child.collect_unknown(found);
                }
            }
        }
    }

    /// Evaluate against a hardware description with three-valued logic.
    pub fn satisfies(&self, hardware: &HardwareDescription) -> Truth {
        match self {
            Self::Leaf(leaf) => leaf.satisfies(hardware),
            Self::And(children) => {
                let mut result = Truth::Yes;
                for child in children {
                    match child.satisfies(hardware) {
                        Truth::No => return Truth::No,
                        Truth::Unknown => result = Truth::Unknown,
                        Truth::Yes => {}
                    }
                }
                result
            }
            Self::Or(children) => {
                let mut result = Truth::No;
                for child in children {
                    match child.satisfies(hardware) {
                        Truth::Yes => return Truth::Yes,
                        Truth::Unknown => result = Truth::Unknown,
                        Truth::No => {}
                    }
                }
                result
            }
        }
    }
}

/// A single-node tree stands alone; anything else keeps its wrapper.
fn unwrap_single(mut nodes: Vec<Constraint>, wrap: fn(Vec<Constraint>) -> Constraint) -> Constraint {
    if nodes.len() == 1 {
        nodes.pop().unwrap_or_else(|| wrap(Vec::new()))
    } else {
        wrap(nodes)
    }
}

fn leaf_spec(leaf: &LeafConstraint) -> String {
    format!("{}: '{} {}'", leaf.path, leaf.op, leaf.raw)
}

fn write_composite(word: &str, children: &[Constraint], indent: usize, out: &mut String) {
    if children.is_empty() {
        let _ = writeln!(out, "{:indent$}{word}: []", "");
        return;
    }
    let _ = writeln!(out, "{:indent$}{word}:", "");
    for child in children {
        write_item(child, indent + 2, out);
    }
}

fn write_item(child: &Constraint, indent: usize, out: &mut String) {
    match child {
        Constraint::Leaf(leaf) => {
            let _ = writeln!(out, "{:indent$}- {}", "", leaf_spec(leaf));
        }
        Constraint::And(children) => write_composite_item("and", children, indent, out),
        Constraint::Or(children) => write_composite_item("or", children, indent, out),
    }
}

fn write_composite_item(word: &str, children: &[Constraint], indent: usize, out: &mut String) {
    if children.is_empty() {
        let _ = writeln!(out, "{:indent$}- {word}: []", "");
        return;
    }
    let _ = writeln!(out, "{:indent$}- {word}:", "");
    for child in children {
        write_item(child, indent + 4, out);
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Three-valued truth for constraint evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truth {
    Yes,
    No,
    Unknown,
}

/// Concrete hardware facts, keyed by canonical dotted path.
#[derive(Debug, Clone, Default)]
pub struct HardwareDescription {
    facts: BTreeMap<String, Value>,
}

impl HardwareDescription {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, path: impl Into<String>, value: Value) {
        self.facts.insert(path.into(), value);
    }

    /// Build from a flat mapping of dotted paths to values.
    pub fn from_value(value: &Value) -> Result<Self> {
        let mapping = value
            .as_mapping()
            .ok_or_else(|| Error::schema("hardware description must be a mapping"))?;
        let mut description = Self::new();
        for (key, value) in mapping {
            let path = key
                .as_str()
                .ok_or_else(|| Error::schema("hardware description paths must be strings"))?;
            description.set(path, value.clone());
        }
        Ok(description)
    }

    fn get(&self, path: &str) -> Option<&Value> {
        self.facts.get(path)
    }
}

impl LeafConstraint {
    fn satisfies(&self, hardware: &HardwareDescription) -> Truth {
        let Some(fact) = hardware.get(&self.path.to_string()) else {
            return Truth::Unknown;
        };

        match &self.value {
            LeafValue::Opaque(_) => Truth::Unknown,
            LeafValue::Quantity(rhs) => match fact_number(fact, true) {
                Some(lhs) => compare_numbers(lhs, self.op, *rhs),
                None => Truth::Unknown,
            },
            LeafValue::Number(rhs) => match fact_number(fact, false) {
                Some(lhs) => compare_numbers(lhs, self.op, *rhs),
                None => Truth::Unknown,
            },
            LeafValue::Flag(rhs) => match fact_bool(fact) {
                Some(lhs) => truth(match self.op {
                    Operator::Eq => lhs == *rhs,
                    _ => lhs != *rhs,
                }),
                None => Truth::Unknown,
            },
            LeafValue::Text(rhs) => match fact.as_str() {
                Some(lhs) => match self.op {
                    Operator::Eq => truth(lhs == rhs),
                    Operator::Ne => truth(lhs != rhs),
                    Operator::Match => patterns::search(rhs, lhs).map_or(Truth::Unknown, truth),
                    Operator::NotMatch => patterns::search(rhs, lhs)
                        .map_or(Truth::Unknown, |matched| truth(!matched)),
                    _ => Truth::Unknown,
                },
                None => Truth::Unknown,
            },
            LeafValue::Version(rhs) => {
                let Some(lhs) = fact_version(fact) else {
                    return Truth::Unknown;
                };
                match compare_values(&lhs, rhs) {
                    ValueOrder::Incomparable => Truth::Unknown,
                    order => truth(match self.op {
                        Operator::Eq => order == ValueOrder::Equal,
                        Operator::Ne => order != ValueOrder::Equal,
                        Operator::Lt => order == ValueOrder::Less,
                        Operator::Le => matches!(order, ValueOrder::Less | ValueOrder::Equal),
                        Operator::Gt => order == ValueOrder::Greater,
                        Operator::Ge => matches!(order, ValueOrder::Greater | ValueOrder::Equal),
                        _ => false,
                    }),
                }
            }
        }
    }
}

fn truth(value: bool) -> Truth {
    if value {
        Truth::Yes
    } else {
        Truth::No
    }
}

fn compare_numbers(lhs: f64, op: Operator, rhs: f64) -> Truth {
    truth(match op {
        Operator::Eq => (lhs - rhs).abs() < f64::EPSILON * rhs.abs().max(1.0),
        Operator::Ne => (lhs - rhs).abs() >= f64::EPSILON * rhs.abs().max(1.0),
        Operator::Lt => lhs < rhs,
        Operator::Le => lhs <= rhs,
        Operator::Gt => lhs > rhs,
        Operator::Ge => lhs >= rhs,
        _ => return Truth::Unknown,
    })
}

/// A numeric fact: a plain number is already in base units, a string may
/// carry a unit.
fn fact_number(fact: &Value, allow_unit: bool) -> Option<f64> {
    match fact {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_quantity(s, allow_unit).ok(),
        _ => None,
    }
}

fn fact_bool(fact: &Value) -> Option<bool> {
    match fact {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn fact_version(fact: &Value) -> Option<String> {
    match fact {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
