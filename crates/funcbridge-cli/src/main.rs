//! funcbridge CLI - Compile FunC contracts with the in-process compiler

mod cli;
mod commands;
mod context;
mod error;
mod output;

use clap::Parser;
use cli::{Cli, Commands};
use commands::compile::CompileArgs;
use context::CliContext;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_command_async(cli))
}

async fn run_command_async(cli: Cli) -> anyhow::Result<ExitCode> {
    let ctx = CliContext::new(cli.output, cli.config.as_deref(), cli.payload.as_deref())?;

    match cli.command {
        Commands::Compile {
            entry_points,
            includes,
            fs,
            opt_level,
            dir,
            boc_out,
            fift_out,
        } => {
            let args = CompileArgs {
                entry_points,
                includes,
                fs,
                opt_level,
                dir,
                boc_out,
                fift_out,
            };
            if !commands::compile::run(&ctx, args).await? {
                return Ok(ExitCode::FAILURE);
            }
        }

        Commands::Version => {
            commands::version::run(&ctx).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
