use crate::downloader::CollisionPolicy;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "bulk-dl")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// File with one URL per line
    pub url_file: PathBuf,

    /// Directory the downloads are written to (created if missing)
    pub output_dir: PathBuf,

    /// Number of parallel downloads (1-999)
    #[arg(allow_negative_numbers = true)]
    pub thread_count: i64,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "300", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: u64,

    /// HTTP proxy (e.g., http://127.0.0.1:7890)
    #[arg(long)]
    pub proxy: Option<String>,

    /// What to do when a destination file already exists
    #[arg(long, value_enum, default_value = "rename")]
    pub on_collision: CollisionPolicy,

    /// Maximum number of queued downloads; enqueueing blocks while full
    #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    pub queue_capacity: Option<usize>,

    /// Write a JSON report of every download to this path
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Also append log lines to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Show an overall progress bar
    #[arg(long)]
    pub progress: bool,

    /// Exit with status 2 if any download failed
    #[arg(long)]
    pub strict: bool,
}
