//! CLI command definitions using clap

use crate::output::OutputFormat;
use clap::{Parser, Subcommand, ValueEnum};
use funcbridge::FilesystemMode;
use std::path::PathBuf;

/// funcbridge - Compile FunC contracts with the in-process funcfiftlib
#[derive(Parser)]
#[command(name = "funcbridge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json)
    #[arg(short = 'o', long, global = true, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    /// Configuration file path
    #[arg(short = 'c', long, global = true, env = "FUNCBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Compiler module (raw .wasm or base64 text), overrides payload.path
    #[arg(short = 'p', long, global = true)]
    pub payload: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Compile one or more entry points
    Compile {
        /// Entry points, in compilation order
        #[arg(required = true)]
        entry_points: Vec<String>,

        /// Extra source file made visible to the compiler (virtual mode)
        #[arg(short = 'I', long = "include")]
        includes: Vec<String>,

        /// How the compiler sees the sources
        #[arg(long, value_enum)]
        fs: Option<FsArg>,

        /// Optimization level
        #[arg(short = 'O', long)]
        opt_level: Option<u32>,

        /// Directory the entry points are relative to
        #[arg(short = 'C', long, default_value = ".")]
        dir: PathBuf,

        /// Write the code BoC (binary) here
        #[arg(long)]
        boc_out: Option<PathBuf>,

        /// Write the Fift assembly here
        #[arg(long)]
        fift_out: Option<PathBuf>,
    },

    /// Show the compiler version
    Version,
}

/// Filesystem mode argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FsArg {
    /// Read the files on the host and hand them over in memory
    Virtual,
    /// Mount the source directory into the compiler
    Passthrough,
}

impl From<FsArg> for FilesystemMode {
    fn from(arg: FsArg) -> Self {
        match arg {
            FsArg::Virtual => FilesystemMode::Virtual,
            FsArg::Passthrough => FilesystemMode::Passthrough,
        }
    }
}
