//! Scene compiler command-line entry point.

use clap::{Parser, Subcommand};
use scene_compiler::cache::{CacheError, CacheInvalidator};
use scene_compiler::logging::init_logging;
use scene_compiler::{CompileError, CompilerConfig, SceneCompiler};
use std::fmt;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "scene-compiler")]
#[command(about = "Compile dataset manifests into scene assets", long_about = None)]
struct Args {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile every entry of a manifest
    Compile {
        /// Dataset manifest (JSON)
        #[arg(short = 'i', long)]
        manifest: PathBuf,

        /// Directory receiving the generated artifacts
        #[arg(short, long)]
        output: PathBuf,

        /// Host cache directory to clear for every written file
        #[arg(short, long)]
        cache_dir: Option<PathBuf>,

        /// Directory holding the textures named by `default_texture`
        #[arg(short, long)]
        texture_dir: Option<PathBuf>,

        /// Copy artifacts and textures here after compiling
        #[arg(short, long)]
        asset_dir: Option<PathBuf>,

        /// Do not draw a progress bar
        #[arg(long)]
        no_progress: bool,
    },
    /// Clear the cache entries for every file in an asset directory
    CleanCache {
        #[arg(short, long)]
        asset_dir: PathBuf,

        #[arg(short, long)]
        cache_dir: PathBuf,
    },
}

#[derive(Debug)]
enum CliError {
    LoggingInit(String),
    Compile(CompileError),
    Cache(CacheError),
}

impl CliError {
    fn exit(&self) -> ! {
        eprintln!("Error: {self}");
        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {msg}"),
            CliError::Compile(e) => write!(f, "{e}"),
            CliError::Cache(e) => write!(f, "Failed to clean cache: {e}"),
        }
    }
}

impl std::error::Error for CliError {}

fn run(args: Args) -> Result<(), CliError> {
    init_logging(args.verbose).map_err(CliError::LoggingInit)?;

    match args.command {
        Command::Compile {
            manifest,
            output,
            cache_dir,
            texture_dir,
            asset_dir,
            no_progress,
        } => {
            let mut config = CompilerConfig::new(&manifest, &output)
                .with_progress(!no_progress && std::io::stderr().is_terminal());
            if let Some(dir) = &cache_dir {
                config = config.with_cache_dir(dir);
            }
            if let Some(dir) = &texture_dir {
                config = config.with_texture_dir(dir);
            }
            if let Some(dir) = &asset_dir {
                config = config.with_asset_dir(dir);
            }
            SceneCompiler::new(config).run().map_err(CliError::Compile)?;
        }
        Command::CleanCache {
            asset_dir,
            cache_dir,
        } => {
            CacheInvalidator::new(&cache_dir)
                .clean_for_asset_dir(&asset_dir)
                .map_err(CliError::Cache)?;
        }
    }
    Ok(())
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(args) {
        e.exit();
    }
}
