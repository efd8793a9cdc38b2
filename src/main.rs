//! tema - materialize test metadata for a given execution context.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context as _, Result};
use clap::Parser;
use tema::cli::{Cli, Command};
use tema::config;
use tema::context::Context;
use tema::hardware::Constraint;
use tema::materialize::{self, Options};
use tema::policy::{self, Policy};
use tema::results::{self, ResultOutcome};
use tema::tree::Tree;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<u8> {
    let context = Context::from_pairs(&cli.context)?;

    match cli.command {
        Command::Show {
            root,
            set,
            policy_file,
            policy_name,
            policy_root,
        } => show(&root, &context, &set, policy_file, policy_name, policy_root),
        Command::Hardware { file, simplify } => hardware(&file, simplify),
        Command::Results { file } => report_results(&file),
    }
}

fn show(
    root: &std::path::Path,
    context: &Context,
    set: &[String],
    policy_file: Option<PathBuf>,
    policy_name: Option<String>,
    policy_root: Option<PathBuf>,
) -> Result<u8> {
    let tree = Tree::load(root)
        .with_context(|| format!("failed to load metadata tree from {}", root.display()))?;

    let mut overrides = config::Overrides::new();
    for pair in set {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("invalid override '{pair}', expected key=value"))?;
        overrides.set_cli(key, config::parse_scalar(value));
    }

    // CLI flags win over the environment for policy location.
    let env = config::policy_env();
    let policy_file = policy_file.or(env.file);
    let policy_name = policy_name.or(env.name);
    let policy_root = policy_root.or(env.root);

    let policy = if policy_file.is_some() || policy_name.is_some() {
        let path = policy::resolve(
            policy_file.as_deref(),
            policy_name.as_deref(),
            policy_root.as_deref(),
        )?;
        Some(Policy::load(&path)?)
    } else {
        None
    };

    let options = Options {
        context: context.clone(),
        overrides: Some(&overrides),
        policy: policy.as_ref(),
        render_budget: None,
    };
    let output = materialize::materialize(&tree, &options);

    let mut document = serde_yaml::Mapping::new();
    for test in &output.tests {
        document.insert(
            serde_yaml::Value::String(test.name().to_string()),
            test.to_value(),
        );
    }
    print!("{}", serde_yaml::to_string(&serde_yaml::Value::Mapping(document))?);

    for warning in &output.warnings {
        eprintln!("Warning: {warning}");
    }
    for (name, error) in &output.errors {
        eprintln!("Error in {name}: {error}");
    }

    Ok(if output.errors.is_empty() { 0 } else { 2 })
}

fn hardware(file: &std::path::Path, simplify: bool) -> Result<u8> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let mut constraint = Constraint::parse_str(&content)?;

    for path in constraint.unknown_leaves() {
        eprintln!("Warning: unknown constraint '{path}' kept as opaque");
    }
    if simplify {
        constraint = constraint.simplify();
    }
    print!("{}", constraint.to_spec());
    Ok(0)
}

fn report_results(file: &std::path::Path) -> Result<u8> {
    let loaded = results::load_results(file)?;
    let outcomes: Vec<ResultOutcome> = loaded.iter().map(|r| r.result).collect();

    for result in &loaded {
        println!("{}: {}", result.name, serde_yaml::to_string(&result.result)?.trim());
    }
    match ResultOutcome::reduce(outcomes.iter().copied()) {
        Some(overall) => println!("overall: {}", serde_yaml::to_string(&overall)?.trim()),
        None => println!("overall: no results"),
    }

    let code = results::exit_code(&outcomes);
    Ok(u8::try_from(code).unwrap_or(2))
}
