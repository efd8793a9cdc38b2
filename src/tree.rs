//! Metadata tree loading.
//!
//! A tree is a directory hierarchy of `.fmf` YAML files.  `main.fmf`
//! contributes the directory's own node, any other `<stem>.fmf` contributes
//! a child named `/<stem>`, and keys starting with `/` inside a file define
//! inline child nodes.  Children inherit the parent's data; a trailing `+`
//! on a key appends/merges with the inherited value instead of replacing it.
//!
//! The merged node is the fact: inheritance is resolved once at load time
//! and the stored node data carries no markers and no parent references.

use std::collections::BTreeMap;
use std::path::Path;

use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::error::{Error, Result};

/// A single node of the tree with inheritance fully resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Identifier path starting with `/`, globally unique, immutable.
    pub name: String,
    /// Merged raw data, merge markers resolved.
    pub data: Mapping,
}

impl Node {
    /// Build a node directly from raw data, resolving any merge markers
    /// against nothing (the marker is stripped, the value stands alone).
    pub fn from_data(name: impl Into<String>, data: Mapping) -> Result<Self> {
        let mut resolved = Mapping::new();
        merge_into(&mut resolved, &data)?;
        Ok(Self {
            name: name.into(),
            data: resolved,
        })
    }
}

/// A loaded metadata tree.
#[derive(Debug, Clone, Default)]
pub struct Tree {
    nodes: BTreeMap<String, Node>,
}

impl Tree {
    /// Load a tree from a directory hierarchy.
    pub fn load(root: &Path) -> Result<Self> {
        let mut tree = Self::default();
        tree.load_dir(root, "", &Mapping::new())?;
        debug!(nodes = tree.nodes.len(), "tree loaded");
        Ok(tree)
    }

    /// All nodes in name order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Look up a node by name.
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    /// Nodes that describe tests (carry a `test` key).
    pub fn tests(&self) -> Vec<&Node> {
        self.nodes
            .values()
            .filter(|n| has_key(&n.data, "test"))
            .collect()
    }

    /// Nodes that describe plans (carry an `execute` or `discover` key).
    pub fn plans(&self) -> Vec<&Node> {
        self.nodes
            .values()
            .filter(|n| has_key(&n.data, "execute") || has_key(&n.data, "discover"))
            .collect()
    }

    fn load_dir(&mut self, dir: &Path, prefix: &str, inherited: &Mapping) -> Result<()> {
        let main = dir.join("main.fmf");
        let raw = if main.is_file() {
            parse_file(&main)?
        } else {
            Mapping::new()
        };
        let (own, children) = split_children(raw)?;
        let mut effective = inherited.clone();
        merge_into(&mut effective, &own)?;

        if main.is_file() {
            let name = if prefix.is_empty() { "/" } else { prefix };
            self.insert(name.to_string(), effective.clone());
        }

        for (child_name, child_raw) in children {
            self.register(format!("{prefix}{child_name}"), child_raw, &effective)?;
        }

        // Deterministic traversal: sorted directory entries.
        let mut entries: Vec<_> = std::fs::read_dir(dir)?
            .collect::<std::io::Result<Vec<_>>>()?
            .into_iter()
            .map(|e| e.path())
            .collect();
        entries.sort();

        for path in &entries {
            if path.is_file()
                && path.extension().is_some_and(|e| e == "fmf")
                && path.file_name().is_some_and(|f| f != "main.fmf")
            {
                let stem = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .ok_or_else(|| Error::semantic(format!("invalid file name {}", path.display())))?;
                let raw = parse_file(path)?;
                self.register(format!("{prefix}/{stem}"), raw, &effective)?;
            }
        }

        for path in &entries {
            if path.is_dir() {
                let dirname = path
                    .file_name()
                    .and_then(|s| s.to_str())
                    .ok_or_else(|| Error::semantic(format!("invalid directory name {}", path.display())))?;
                if dirname.starts_with('.') {
                    continue;
                }
                self.load_dir(path, &format!("{prefix}/{dirname}"), &effective)?;
            }
        }

        Ok(())
    }

    fn register(&mut self, name: String, raw: Mapping, inherited: &Mapping) -> Result<()> {
        let (own, children) = split_children(raw)?;
        let mut effective = inherited.clone();
        merge_into(&mut effective, &own)?;
        self.insert(name.clone(), effective.clone());
        for (child_name, child_raw) in children {
            self.register(format!("{name}{child_name}"), child_raw, &effective)?;
        }
        Ok(())
    }

    fn insert(&mut self, name: String, data: Mapping) {
        self.nodes.insert(name.clone(), Node { name, data });
    }
}

fn has_key(data: &Mapping, key: &str) -> bool {
    data.contains_key(&Value::String(key.to_string()))
}

fn parse_file(path: &Path) -> Result<Mapping> {
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Mapping::new());
    }
    let value: Value = serde_yaml::from_str(&content)
        .map_err(|e| Error::syntax(format!("failed to parse {}: {e}", path.display())))?;
    match value {
        Value::Mapping(mapping) => Ok(mapping),
        Value::Null => Ok(Mapping::new()),
        _ => Err(Error::schema(format!(
            "{} must contain a mapping at the top level",
            path.display()
        ))),
    }
}

/// Split `/`-prefixed child definitions from a node's own data.
fn split_children(raw: Mapping) -> Result<(Mapping, Vec<(String, Mapping)>)> {
    let mut own = Mapping::new();
    let mut children = Vec::new();
    for (key, value) in raw {
        match key.as_str() {
            Some(name) if name.starts_with('/') => {
                let child = match value {
                    Value::Mapping(mapping) => mapping,
                    Value::Null => Mapping::new(),
                    _ => {
                        return Err(Error::schema(format!(
                            "child node '{name}' must be a mapping"
                        )))
                    }
                };
                children.push((name.to_string(), child));
            }
            _ => {
                own.insert(key, value);
            }
        }
    }
    Ok((own, children))
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

/// Merge `patch` into `target`.
///
/// Plain keys replace; a `key+` entry merges with the value already present
/// under `key` (list append, mapping update, string concatenation, numeric
/// addition) and the marker is stripped.
pub(crate) fn merge_into(target: &mut Mapping, patch: &Mapping) -> Result<()> {
    for (key, value) in patch {
        let Some(key_str) = key.as_str() else {
            target.insert(key.clone(), value.clone());
            continue;
        };
        if let Some(base) = key_str.strip_suffix('+') {
            let base_key = Value::String(base.to_string());
            let merged = match target.get(&base_key) {
                Some(existing) => merge_values(base, existing, value)?,
                None => value.clone(),
            };
            target.insert(base_key, merged);
        } else {
            target.insert(key.clone(), value.clone());
        }
    }
    Ok(())
}

/// Combine an inherited value with an addition for `key+`.
///
/// Lists append, mappings update, strings concatenate, numbers add.  The
/// list-of-one shorthand is honored when the other side is a sequence.
fn merge_values(key: &str, existing: &Value, addition: &Value) -> Result<Value> {
    match (existing, addition) {
        (Value::Sequence(base), Value::Sequence(patch)) => {
            let mut items = base.clone();
            items.extend(patch.iter().cloned());
            Ok(Value::Sequence(items))
        }
        (Value::Sequence(base), scalar @ (Value::String(_) | Value::Number(_))) => {
            let mut items = base.clone();
            items.push(scalar.clone());
            Ok(Value::Sequence(items))
        }
        (scalar @ (Value::String(_) | Value::Number(_)), Value::Sequence(patch)) => {
            let mut items = vec![scalar.clone()];
            items.extend(patch.iter().cloned());
            Ok(Value::Sequence(items))
        }
        (Value::Null, seq @ Value::Sequence(_)) | (seq @ Value::Sequence(_), Value::Null) => {
            Ok(seq.clone())
        }
        (Value::Mapping(base), Value::Mapping(patch)) => {
            let mut merged = base.clone();
            for (k, v) in patch {
                merged.insert(k.clone(), v.clone());
            }
            Ok(Value::Mapping(merged))
        }
        (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
                Ok(Value::Number(serde_yaml::Number::from(x + y)))
            } else if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
                Ok(Value::Number(serde_yaml::Number::from(x + y)))
            } else {
                Err(Error::schema(format!("cannot merge numbers for key '{key}'")))
            }
        }
        _ => Err(Error::schema(format!(
            "cannot merge incompatible values for key '{key}'"
        ))),
    }
}
