//! End-to-end materialization of a metadata tree.
//!
//! Ties the pipeline together: adjust each node for the context, normalize
//! it into a typed object, then run the policy rewrite.  Every test is
//! processed in isolation; a failure aborts that test only and is collected
//! for the caller, while siblings keep going.

use std::time::Duration;

use tracing::debug;

use crate::adjust::adjust_node;
use crate::config::Overrides;
use crate::context::Context;
use crate::error::{Error, Warning};
use crate::metadata::{Plan, Test};
use crate::policy::{self, Policy};
use crate::tree::{Node, Tree};

/// Knobs for a materialization run.
#[derive(Debug, Default)]
pub struct Options<'a> {
    pub context: Context,
    pub overrides: Option<&'a Overrides>,
    pub policy: Option<&'a Policy>,
    /// Cooperative time budget for the policy pass, per test.
    pub render_budget: Option<Duration>,
}

/// Outcome of a materialization run.
#[derive(Debug, Default)]
pub struct Materialized {
    pub tests: Vec<Test>,
    pub plans: Vec<Plan>,
    /// Per-node failures; siblings are unaffected.
    pub errors: Vec<(String, Error)>,
    pub warnings: Vec<Warning>,
}

/// Materialize every test and plan of a tree.
pub fn materialize(tree: &Tree, options: &Options) -> Materialized {
    let mut output = Materialized::default();

    for node in tree.tests() {
        match materialize_test(node, options, &mut output.warnings) {
            Ok(test) => output.tests.push(test),
            Err(e) => output.errors.push((node.name.clone(), e)),
        }
    }

    for node in tree.plans() {
        match materialize_plan(node, options, &mut output.warnings) {
            Ok(plan) => output.plans.push(plan),
            Err(e) => output.errors.push((node.name.clone(), e)),
        }
    }

    debug!(
        tests = output.tests.len(),
        plans = output.plans.len(),
        errors = output.errors.len(),
        "materialization finished"
    );
    output
}

/// Run one test node through adjust, normalize and policy.
pub fn materialize_test(
    node: &Node,
    options: &Options,
    warnings: &mut Vec<Warning>,
) -> crate::error::Result<Test> {
    let mut data = node.data.clone();
    warnings.extend(adjust_node(&node.name, &mut data, &options.context)?);

    let adjusted = Node {
        name: node.name.clone(),
        data,
    };
    let mut test = Test::normalize(&adjusted, options.overrides)?;

    if let Some(policy) = options.policy {
        policy::apply(policy, &mut test, options.render_budget)?;
    }

    Ok(test)
}

/// Run one plan node through adjust and normalize.
///
/// A plan's own `context` dimensions override the supplied context for the
/// plan's adjust rules.
pub fn materialize_plan(
    node: &Node,
    options: &Options,
    warnings: &mut Vec<Warning>,
) -> crate::error::Result<Plan> {
    let plan_context = node
        .data
        .get(&serde_yaml::Value::from("context"))
        .map(Context::from_value)
        .transpose()?
        .unwrap_or_default();
    let effective = options.context.merged_with(&plan_context);

    let mut data = node.data.clone();
    warnings.extend(adjust_node(&node.name, &mut data, &effective)?);

    Plan::normalize(&Node {
        name: node.name.clone(),
        data,
    })
}
