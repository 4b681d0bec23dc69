//! `funcbridge version` command implementation

use colored::Colorize;

use crate::context::CliContext;
use crate::error::CliError;
use crate::output::{OutputFormat, print_json};

/// Execute the `funcbridge version` command
pub async fn run(ctx: &CliContext) -> Result<(), CliError> {
    let info = ctx.compiler.version().await?;

    match ctx.output {
        OutputFormat::Json => print_json(&info)?,
        OutputFormat::Text => {
            println!("  FunC:        {}", info.func_version.yellow());
            println!("  Commit hash: {}", info.func_fift_lib_commit_hash.cyan());
            println!("  Commit date: {}", info.func_fift_lib_commit_date);
            println!("  Bridge:      {}", env!("CARGO_PKG_VERSION"));
        }
    }
    Ok(())
}
