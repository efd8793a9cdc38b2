//! Context-conditional adjustment of raw nodes.
//!
//! An `adjust` key holds one rule or an ordered list of rules.  Each rule
//! carries a `when` expression over the context; for every rule that fires,
//! its payload is merged into the node.  Processing stops after a firing
//! rule with `continue: false`.  The `adjust` key itself is consumed.

use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::context::Context;
use crate::error::{Error, Result, Warning};
use crate::expression::Expr;
use crate::tree::merge_into;

/// A single adjust rule.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustRule {
    /// Condition over the context; required.
    pub when: String,
    /// Keep processing subsequent rules after this one fires.
    pub continue_rules: bool,
    /// Free-form justification, used for diagnostics only.
    pub because: Option<String>,
    /// Metadata merged into the node when the rule fires.
    pub payload: Mapping,
}

impl AdjustRule {
    /// Parse a single rule mapping.
    pub fn from_mapping(mapping: &Mapping) -> Result<Self> {
        let mut when = None;
        let mut continue_rules = true;
        let mut because = None;
        let mut payload = Mapping::new();

        for (key, value) in mapping {
            let name = key
                .as_str()
                .ok_or_else(|| Error::schema("adjust rule keys must be strings"))?;
            match name {
                "when" => match value {
                    Value::String(s) => when = Some(s.clone()),
                    _ => return Err(Error::schema("adjust rule 'when' must be a string")),
                },
                "continue" => match value {
                    Value::Bool(b) => continue_rules = *b,
                    _ => return Err(Error::schema("adjust rule 'continue' must be a boolean")),
                },
                "because" => match value {
                    Value::String(s) => because = Some(s.clone()),
                    _ => return Err(Error::schema("adjust rule 'because' must be a string")),
                },
                _ => {
                    payload.insert(key.clone(), value.clone());
                }
            }
        }

        let when = when.ok_or_else(|| Error::semantic("adjust rule is missing 'when'"))?;

        Ok(Self {
            when,
            continue_rules,
            because,
            payload,
        })
    }

    /// Parse the value of an `adjust` key: one rule mapping or a sequence.
    pub fn from_value(value: &Value) -> Result<Vec<Self>> {
        match value {
            Value::Mapping(mapping) => Ok(vec![Self::from_mapping(mapping)?]),
            Value::Sequence(items) => items
                .iter()
                .map(|item| match item {
                    Value::Mapping(mapping) => Self::from_mapping(mapping),
                    _ => Err(Error::schema("adjust rules must be mappings")),
                })
                .collect(),
            _ => Err(Error::schema(
                "adjust must be a rule mapping or a list of rule mappings",
            )),
        }
    }
}

/// Apply adjust rules to a raw node, consuming its `adjust` key.
///
/// Rules fire in declaration order.  A malformed `when` expression is fatal
/// for the node.  Returns warnings for rules skipped by a `continue: false`
/// short-circuit.  A node without `adjust` passes through unchanged, which
/// makes repeated application idempotent.
pub fn adjust_node(node_name: &str, data: &mut Mapping, context: &Context) -> Result<Vec<Warning>> {
    let Some(raw) = data.remove(&Value::String("adjust".to_string())) else {
        return Ok(Vec::new());
    };

    let rules = AdjustRule::from_value(&raw)
        .map_err(|e| Error::semantic(format!("node '{node_name}': {e}")))?;
    let mut warnings = Vec::new();
    let mut stopped_at = None;

    for (index, rule) in rules.iter().enumerate() {
        if let Some(stop) = stopped_at {
            warnings.push(Warning::new(format!(
                "node '{node_name}': adjust rule '{}' not considered, rule #{} stopped processing",
                rule.when, stop
            )));
            continue;
        }

        let expr = Expr::parse(&rule.when)
            .map_err(|e| Error::syntax(format!("node '{node_name}': {e}")))?;
        let fired = expr
            .evaluate(context)
            .map_err(|e| Error::syntax(format!("node '{node_name}': {e}")))?;

        if !fired {
            continue;
        }

        debug!(
            node = node_name,
            rule = index,
            when = %rule.when,
            because = rule.because.as_deref().unwrap_or(""),
            "adjust rule fired"
        );
        merge_into(data, &rule.payload)?;

        if !rule.continue_rules {
            stopped_at = Some(index);
        }
    }

    Ok(warnings)
}
