#![allow(dead_code)]

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "caravel")]
#[command(version)]
#[command(about = "Declarative multi-host deployment reconciler", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log to a file instead of stderr, keeping stdout clean
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Reconcile remote hosts with the state described in manifest files
    Reconcile(ReconcileArgs),

    /// Generate bootstrap manifest files from templates, rendered to stdout
    Generate(GenerateArgs),

    /// Verify reconciled hosts by running an HTTP GET against each one
    Verify(VerifyArgs),
}

#[derive(Parser)]
pub struct ReconcileArgs {
    /// Path to a manifest file (repeat for multiple hosts)
    #[arg(short, long = "manifest", required = true)]
    pub manifests: Vec<PathBuf>,

    /// Path to the packages file shared by all manifests
    #[arg(long)]
    pub packages: PathBuf,

    /// Number of manifests to reconcile concurrently (clamped to 3)
    #[arg(short, long, default_value_t = 2)]
    pub concurrency: usize,

    /// Per-host timeout as a duration, e.g. 15m or 90s
    #[arg(short, long, default_value = "15m")]
    pub timeout: String,

    /// Plain text password for ssh auth; disables public key auth
    #[arg(short, long)]
    pub password: Option<String>,

    /// Remove packages installed by reconcile instead of installing
    #[arg(long)]
    pub remove: bool,

    /// Like remove, but also purges package configuration
    #[arg(long)]
    pub purge: bool,
}

#[derive(Parser)]
pub struct GenerateArgs {
    /// Provider to generate manifests for
    #[arg(long, default_value = "slack", value_parser = ["docker", "ec2", "slack"])]
    pub provider: String,

    /// Manifest id format; ulid gives lexicographically sortable ids
    #[arg(long = "unique-id-format", default_value = "random", value_parser = ["random", "ulid"])]
    pub unique_id_format: String,
}

#[derive(Parser)]
pub struct VerifyArgs {
    /// Number of hosts to probe concurrently
    #[arg(short, long, default_value_t = 2)]
    pub concurrency: usize,

    /// Hostnames to probe
    #[arg(required = true)]
    pub hostnames: Vec<String>,
}
