//! `funcbridge compile` command implementation

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use colored::Colorize;
use funcbridge::{CompileRequest, CompileResult, FilesystemMode, SourcesMap};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::cli::FsArg;
use crate::context::CliContext;
use crate::error::CliError;
use crate::output::{OutputFormat, print_json};

/// Arguments of `funcbridge compile`
#[derive(Debug, Clone)]
pub struct CompileArgs {
    pub entry_points: Vec<String>,
    pub includes: Vec<String>,
    pub fs: Option<FsArg>,
    pub opt_level: Option<u32>,
    pub dir: PathBuf,
    pub boc_out: Option<PathBuf>,
    pub fift_out: Option<PathBuf>,
}

impl CompileArgs {
    /// Includes only make sense when sources are handed over in memory
    fn mode(&self) -> FilesystemMode {
        match self.fs {
            Some(fs) => fs.into(),
            None if self.includes.is_empty() => FilesystemMode::Passthrough,
            None => FilesystemMode::Virtual,
        }
    }
}

/// Read every named file below `dir`, keyed by the name as given
fn read_sources<'a>(
    dir: &Path,
    names: impl IntoIterator<Item = &'a String>,
) -> Result<SourcesMap, CliError> {
    let mut sources = SourcesMap::new();
    for name in names {
        let path = dir.join(name);
        let text = std::fs::read_to_string(&path)
            .map_err(|source| CliError::Source { path, source })?;
        sources.insert(name.clone(), text);
    }
    Ok(sources)
}

fn build_request(args: &CompileArgs) -> Result<CompileRequest, CliError> {
    let mode = args.mode();
    let mut request = CompileRequest::new(args.entry_points.iter().cloned()).with_fs(mode);

    match mode {
        FilesystemMode::Virtual => {
            let sources = read_sources(&args.dir, args.entry_points.iter().chain(&args.includes))?;
            request = request.with_sources(sources);
        }
        FilesystemMode::Passthrough => {
            if !args.includes.is_empty() {
                warn!("--include has no effect in passthrough mode");
            }
            request = request.with_working_dir(args.dir.clone());
        }
    }

    if let Some(level) = args.opt_level {
        request = request.with_opt_level(level);
    }
    Ok(request)
}

/// Execute the `funcbridge compile` command
///
/// Returns `false` when the compiler rejected the sources.
pub async fn run(ctx: &CliContext, args: CompileArgs) -> Result<bool, CliError> {
    let request = build_request(&args)?;
    let result = ctx.compiler.compile(request)?.await?;

    if let CompileResult::Success {
        code_boc,
        fift_code,
        ..
    } = &result
    {
        if let Some(path) = &args.boc_out {
            std::fs::write(path, STANDARD.decode(code_boc)?)?;
            info!("Wrote code BoC to {}", path.display());
        }
        if let Some(path) = &args.fift_out {
            std::fs::write(path, fift_code)?;
            info!("Wrote Fift assembly to {}", path.display());
        }
    }

    match ctx.output {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Text => print_text(&result, &args),
    }
    Ok(result.is_success())
}

fn print_text(result: &CompileResult, args: &CompileArgs) {
    match result {
        CompileResult::Success {
            code_boc, warnings, ..
        } => {
            println!(
                "{} {}",
                "✓ Compiled".green().bold(),
                args.entry_points.join(", ")
            );
            if !warnings.is_empty() {
                eprintln!("{}", warnings.trim_end().yellow());
            }
            if args.boc_out.is_none() {
                println!("{}", code_boc);
            }
        }
        CompileResult::Failure { message } => {
            eprintln!("{}", "✗ Compilation failed".red().bold());
            eprintln!("{}", message.trim_end());
        }
    }
}
