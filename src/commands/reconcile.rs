//! The reconcile subcommand: parse flags into runner options and fan out.

use anyhow::{Context, Result};
use reconcile::Operation;

use crate::cli::ReconcileArgs;
use crate::runner;

pub fn run(args: ReconcileArgs) -> Result<()> {
    let timeout = humantime::parse_duration(&args.timeout)
        .with_context(|| format!("invalid timeout duration: {}", args.timeout))?;

    // purge implies the remove flow; plain remove keeps configuration
    let operation = if args.purge {
        Operation::Purge
    } else if args.remove {
        Operation::Remove
    } else {
        Operation::Reconcile
    };

    let opts = runner::Options {
        concurrency: args.concurrency,
        timeout,
        operation,
        password: args.password.map(|p| p.trim().to_string()),
    };
    runner::run(&args.manifests, &args.packages, &opts)
}
