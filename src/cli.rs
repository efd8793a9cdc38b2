//! CLI argument parsing using Clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "tema",
    version,
    about = "Materialize test metadata for a given execution context"
)]
pub struct Cli {
    /// Context dimension, as dimension=value[,value...].  May repeat.
    #[arg(
        short = 'c',
        long = "context",
        value_name = "DIM=VALUE",
        global = true
    )]
    pub context: Vec<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Materialize tests and plans from a metadata tree.
    Show {
        /// Tree root directory.
        #[arg(default_value = ".")]
        root: PathBuf,

        /// Override a test key, as key=value.  May repeat.
        #[arg(long, value_name = "KEY=VALUE")]
        set: Vec<String>,

        /// Policy file to apply (defaults to $POLICY_FILE).
        #[arg(long, value_name = "PATH")]
        policy_file: Option<PathBuf>,

        /// Policy name to resolve under the policy root (defaults to
        /// $POLICY_NAME).
        #[arg(long, value_name = "NAME", conflicts_with = "policy_file")]
        policy_name: Option<String>,

        /// Policy root directory (defaults to $POLICY_ROOT).
        #[arg(long, value_name = "PATH")]
        policy_root: Option<PathBuf>,
    },

    /// Parse a hardware constraint document and print its canonical form.
    Hardware {
        /// Constraint document to read.
        file: PathBuf,

        /// Flatten trivially-nested boolean nodes first.
        #[arg(long)]
        simplify: bool,
    },

    /// Reduce a results document and report the overall outcome.
    Results {
        /// Results file (`results.yaml` or `results.json`).
        file: PathBuf,
    },
}
