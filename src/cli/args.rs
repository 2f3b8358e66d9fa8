//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// cairn - content-addressed sync and layered image builds
///
/// Synchronizes local files into a remote content store and composes
/// layered images that the remote side builds.
#[derive(Parser, Debug)]
#[command(name = "cairn")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "CAIRN_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Hash the files of a directory as a mount would
    Hash(HashArgs),

    /// Synchronize a local directory into the remote store
    Sync(SyncArgs),

    /// Compose, realize and join an image
    Build(BuildArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// Arguments for the hash command
#[derive(Parser, Debug)]
pub struct HashArgs {
    /// Directory to hash
    pub dir: PathBuf,

    /// Only include files with these extensions (comma-separated, no dot)
    #[arg(short, long, value_delimiter = ',')]
    pub ext: Vec<String>,
}

/// Arguments for the sync command
#[derive(Parser, Debug)]
pub struct SyncArgs {
    /// Local directory to synchronize
    pub local: PathBuf,

    /// Remote root the files are placed under
    #[arg(default_value = "/root")]
    pub remote: String,

    /// Only include files with these extensions (comma-separated, no dot)
    #[arg(short, long, value_delimiter = ',')]
    pub ext: Vec<String>,
}

/// Arguments for the build command
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Image manifest (defaults to ./cairn.toml when present)
    #[arg(short, long)]
    pub manifest: Option<PathBuf>,

    /// Python version of the slim base image
    #[arg(long)]
    pub python: Option<String>,

    /// Python packages to install (repeatable)
    #[arg(short = 'p', long = "package")]
    pub packages: Vec<String>,

    /// Shell commands to run on top of the image (repeatable)
    #[arg(short = 'r', long = "run")]
    pub commands: Vec<String>,

    /// Realize the image without waiting for the build
    #[arg(long)]
    pub no_join: bool,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., join.max_attempts)
        key: String,
        /// Value to set
        value: String,
    },
}
