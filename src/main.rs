mod cli;
mod commands;
mod runner;

use anyhow::Result;
use clap::Parser;
use std::fs::File;
use std::io;

use cli::{Cli, Command};
use manifest::UniqueIdFormat;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity. Quiet mode keeps stdout/stderr
    // clean by sending the log stream to a file instead.
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(log_level).format_timestamp(None);
    if cli.quiet {
        builder.target(env_logger::Target::Pipe(Box::new(File::create(
            "caravel.log",
        )?)));
    }
    builder.init();

    match cli.command {
        Command::Reconcile(args) => commands::reconcile::run(args),
        Command::Generate(args) => commands::generate::run(
            &mut io::stdout(),
            UniqueIdFormat::parse(&args.unique_id_format),
        ),
        Command::Verify(args) => commands::verify::run(args.concurrency, &args.hostnames),
    }
}
