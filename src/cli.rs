//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;
use download_manager::CollisionPolicy;
use url::Url;

/// Default destination directory under the caches root.
pub const DEFAULT_DESTINATION_DIR: &str = "downloads";

/// Download files into a local caches directory.
///
/// Each URL is downloaded at most once at a time; finished files are placed
/// at `<caches root>/<dir>/<file name>`.
#[derive(Parser, Debug)]
#[command(name = "download-manager")]
#[command(author, version, about)]
pub struct Args {
    /// URLs to download
    #[arg(required = true, value_name = "URL")]
    pub urls: Vec<Url>,

    /// Destination directory, relative to the caches root
    #[arg(short = 'd', long = "dir", default_value = DEFAULT_DESTINATION_DIR)]
    pub destination_dir: String,

    /// Root directory for finished downloads (overrides config file)
    #[arg(long, value_name = "PATH")]
    pub caches_root: Option<PathBuf>,

    /// What to do when the destination file exists: fail, overwrite, rename
    #[arg(long = "on-collision", value_name = "POLICY")]
    pub on_collision: Option<CollisionPolicy>,

    /// File name to save as (single URL only)
    #[arg(short = 'o', long, value_name = "NAME")]
    pub output_name: Option<String>,

    /// Use the background channel (no total request timeout)
    #[arg(long)]
    pub background: bool,

    /// Read configuration from this file instead of the default location
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print a JSON summary to stdout
    #[arg(long)]
    pub json: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}
