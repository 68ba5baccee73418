use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use buster::cli::{AppContext, Cli, Commands};
use buster::core::pipeline::exit_code_for;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Build a context once, pass everywhere
    let ctx = AppContext {
        quiet: cli.quiet,
        no_color: cli.no_color,
        dry_run: cli.dry_run,
    };

    let result = match cli.command {
        Commands::Hash(args) => buster::core::pipeline::run(args, &ctx),
        Commands::Init(args) => buster::infra::config::init(args, &ctx),
        Commands::Completions(args) => buster::completion::run(args, &ctx),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code_for(&err) as u8)
        }
    }
}
