//! Execution context dimensions.
//!
//! A context maps dimension names (`distro`, `arch`, `component`, ...) to one
//! or more values.  A dimension carrying multiple values is treated
//! disjunctively by the `when` language: a comparison fires if any value
//! satisfies it.
//!
//! Dimension values of the form `name-1.2.3` carry an ordered comparison:
//! `fedora-33 < fedora-40`.  Values whose name parts differ are incomparable
//! and every ordering comparison between them evaluates to false.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Mapping from dimension name to its value(s).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    dimensions: HashMap<String, Vec<String>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a dimension.  Names are case-insensitive and stored lowercase.
    pub fn set(&mut self, dimension: &str, values: Vec<String>) {
        self.dimensions.insert(dimension.to_lowercase(), values);
    }

    /// Values of a dimension, if defined.
    pub fn get(&self, dimension: &str) -> Option<&[String]> {
        self.dimensions
            .get(&dimension.to_lowercase())
            .map(Vec::as_slice)
    }

    pub fn is_defined(&self, dimension: &str) -> bool {
        self.dimensions.contains_key(&dimension.to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    /// Parse `dimension=value` pairs as supplied on the command line.
    ///
    /// A value may contain commas to supply multiple values at once:
    /// `distro=fedora-40,fedora-41`.
    pub fn from_pairs<S: AsRef<str>>(pairs: &[S]) -> Result<Self> {
        let mut context = Self::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (dimension, value) = pair
                .split_once('=')
                .ok_or_else(|| Error::syntax(format!("invalid context '{pair}', expected 'dimension=value'")))?;
            let dimension = dimension.trim();
            if dimension.is_empty() {
                return Err(Error::syntax(format!("empty dimension name in context '{pair}'")));
            }
            let values: Vec<String> = value
                .split(',')
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
            if values.is_empty() {
                return Err(Error::syntax(format!("no value given for dimension '{dimension}'")));
            }
            context.set(dimension, values);
        }
        Ok(context)
    }

    /// Parse a context mapping from structured data (a plan's `context` key).
    ///
    /// Values may be scalars or sequences of scalars.
    pub fn from_value(value: &serde_yaml::Value) -> Result<Self> {
        let mapping = value
            .as_mapping()
            .ok_or_else(|| Error::schema("context must be a mapping of dimension to value(s)"))?;
        let mut context = Self::new();
        for (key, value) in mapping {
            let dimension = key
                .as_str()
                .ok_or_else(|| Error::schema("context dimension names must be strings"))?;
            let values = match value {
                serde_yaml::Value::Sequence(items) => items
                    .iter()
                    .map(scalar_to_string)
                    .collect::<Result<Vec<_>>>()?,
                scalar => vec![scalar_to_string(scalar)?],
            };
            context.set(dimension, values);
        }
        Ok(context)
    }

    /// Layer `overrides` on top of this context; overriding dimensions win.
    pub fn merged_with(&self, overrides: &Self) -> Self {
        let mut merged = self.clone();
        for (dimension, values) in &overrides.dimensions {
            merged.dimensions.insert(dimension.clone(), values.clone());
        }
        merged
    }
}

fn scalar_to_string(value: &serde_yaml::Value) -> Result<String> {
    match value {
        serde_yaml::Value::String(s) => Ok(s.clone()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        _ => Err(Error::schema("context dimension values must be scalars")),
    }
}

// ---------------------------------------------------------------------------
// Version-aware value ordering
// ---------------------------------------------------------------------------

/// Outcome of comparing two dimension values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueOrder {
    Less,
    Equal,
    Greater,
    /// Values do not share a comparable shape (e.g. `centos-8` vs
    /// `fedora-40`).  Ordering comparisons over incomparable values
    /// evaluate to false.
    Incomparable,
}

#[derive(Debug, PartialEq, Eq)]
enum Part {
    Number(u64),
    Text(String),
}

/// Split a dimension value into comparable parts on `-` and `.`.
fn parts(value: &str) -> Vec<Part> {
    value
        .split(['-', '.'])
        .map(|p| match p.parse::<u64>() {
            Ok(n) => Part::Number(n),
            Err(_) => Part::Text(p.to_string()),
        })
        .collect()
}

/// Compare a context value against a literal.
///
/// Parts are compared pairwise; numeric parts numerically, text parts
/// lexically with equality only.  A literal that is a strict prefix of the
/// value compares equal (`fedora-33` matches the literal `fedora`), which
/// gives major-version predicates their natural meaning.
pub fn compare_values(value: &str, literal: &str) -> ValueOrder {
    if value == literal {
        return ValueOrder::Equal;
    }
    let left = parts(value);
    let right = parts(literal);

    for (l, r) in left.iter().zip(right.iter()) {
        match (l, r) {
            (Part::Number(a), Part::Number(b)) => {
                if a < b {
                    return ValueOrder::Less;
                }
                if a > b {
                    return ValueOrder::Greater;
                }
            }
            (Part::Text(a), Part::Text(b)) => {
                if a != b {
                    return ValueOrder::Incomparable;
                }
            }
            _ => return ValueOrder::Incomparable,
        }
    }

    if right.len() <= left.len() {
        ValueOrder::Equal
    } else {
        ValueOrder::Incomparable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_single_value() {
        let ctx = Context::from_pairs(&["distro=fedora-40"]).unwrap();
        assert_eq!(ctx.get("distro"), Some(&["fedora-40".to_string()][..]));
    }

    #[test]
    fn pairs_multiple_values() {
        let ctx = Context::from_pairs(&["arch=x86_64,aarch64"]).unwrap();
        assert_eq!(ctx.get("arch").unwrap().len(), 2);
    }

    #[test]
    fn pairs_dimension_names_case_insensitive() {
        let ctx = Context::from_pairs(&["Distro=fedora-40"]).unwrap();
        assert!(ctx.is_defined("distro"));
        assert!(ctx.is_defined("DISTRO"));
    }

    #[test]
    fn pairs_missing_equals_rejected() {
        assert!(Context::from_pairs(&["distro"]).is_err());
        assert!(Context::from_pairs(&["=fedora"]).is_err());
        assert!(Context::from_pairs(&["distro="]).is_err());
    }

    #[test]
    fn from_value_scalars_and_lists() {
        let value: serde_yaml::Value =
            serde_yaml::from_str("distro: fedora-40\narch: [x86_64, aarch64]").unwrap();
        let ctx = Context::from_value(&value).unwrap();
        assert_eq!(ctx.get("distro").unwrap().len(), 1);
        assert_eq!(ctx.get("arch").unwrap().len(), 2);
    }

    #[test]
    fn merged_with_overrides_win() {
        let base = Context::from_pairs(&["distro=fedora-40", "arch=x86_64"]).unwrap();
        let over = Context::from_pairs(&["distro=centos-stream-9"]).unwrap();
        let merged = base.merged_with(&over);
        assert_eq!(merged.get("distro"), Some(&["centos-stream-9".to_string()][..]));
        assert_eq!(merged.get("arch"), Some(&["x86_64".to_string()][..]));
    }

    #[test]
    fn compare_versions_ordered() {
        assert_eq!(compare_values("fedora-33", "fedora-40"), ValueOrder::Less);
        assert_eq!(compare_values("fedora-40", "fedora-33"), ValueOrder::Greater);
        assert_eq!(compare_values("fedora-40", "fedora-40"), ValueOrder::Equal);
    }

    #[test]
    fn compare_dotted_versions() {
        assert_eq!(compare_values("rhel-8.4", "rhel-8.10"), ValueOrder::Less);
        assert_eq!(compare_values("rhel-9.0", "rhel-8.10"), ValueOrder::Greater);
    }

    #[test]
    fn compare_prefix_literal_is_equal() {
        // `distro == fedora` matches every fedora release.
        assert_eq!(compare_values("fedora-33", "fedora"), ValueOrder::Equal);
        // The other way around the literal is more specific than the value.
        assert_eq!(compare_values("fedora", "fedora-33"), ValueOrder::Incomparable);
    }

    #[test]
    fn compare_different_names_incomparable() {
        assert_eq!(compare_values("centos-8", "fedora-40"), ValueOrder::Incomparable);
    }

    #[test]
    fn compare_plain_strings() {
        assert_eq!(compare_values("x86_64", "x86_64"), ValueOrder::Equal);
        assert_eq!(compare_values("x86_64", "aarch64"), ValueOrder::Incomparable);
    }
}
