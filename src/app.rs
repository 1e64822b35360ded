//! Drives one batch: validate, provision, enqueue every URL, wait.

use crate::cli::Args;
use crate::downloader::{DownloaderOptions, Fetch, HttpDownloader};
use crate::error::Error;
use crate::logger::Logger;
use crate::pool::{PoolConfig, WorkerPool, validate_queue_capacity, validate_worker_count};
use crate::report::write_report;
use crate::task::DownloadTask;
use crate::urls::read_url_file;
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub bytes_written: u64,
}

impl RunSummary {
    /// Process exit status for this run. Failed downloads only count when
    /// `strict` is set.
    pub fn exit_status(&self, strict: bool) -> u8 {
        if strict && self.failed > 0 { 2 } else { 0 }
    }
}

/// Builds the log sink for `args`: stdout, plus the optional log file, routed
/// above the progress bar when one is requested.
pub fn build_logger(args: &Args) -> Result<(Arc<Logger>, Option<ProgressBar>)> {
    let mut logger = Logger::stdout();
    if let Some(path) = &args.log_file {
        logger = logger
            .with_file(path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
    }

    let progress = args.progress.then(overall_progress);
    if let Some(pb) = &progress {
        logger = logger.with_progress(pb.clone());
    }

    Ok((logger.into_shared(), progress))
}

/// Runs a batch described by `args`, logging through `logger`.
///
/// Returns an error only for configuration and setup problems; individual
/// download failures are logged and counted in the summary.
pub fn run(args: &Args, logger: Arc<Logger>, progress: Option<ProgressBar>) -> Result<RunSummary> {
    logger.log("Program started");
    logger.log("Parameters:");
    logger.log(format!("  URL file: {}", args.url_file.display()));
    logger.log(format!("  Output dir: {}", args.output_dir.display()));
    logger.log(format!("  Thread count: {}", args.thread_count));

    let workers = validate_worker_count(args.thread_count)?;
    let timeout = validate_timeout(args.timeout)?;
    let queue_capacity = validate_queue_capacity(args.queue_capacity)?;

    fs::create_dir_all(&args.output_dir).map_err(|source| Error::OutputDir {
        path: args.output_dir.clone(),
        source,
    })?;

    let entries = read_url_file(&args.url_file)?;
    if entries.is_empty() {
        logger.log("No URLs found in file");
        return Ok(RunSummary::default());
    }
    logger.log(format!("Found {} URLs to download", entries.len()));

    if let Some(pb) = &progress {
        pb.set_length(entries.len() as u64);
    }

    let downloader: Arc<dyn Fetch> = Arc::new(HttpDownloader::new(
        &args.output_dir,
        Arc::clone(&logger),
        DownloaderOptions {
            timeout,
            proxy: args.proxy.clone(),
            collisions: args.on_collision,
        },
    )?);

    let mut pool = WorkerPool::with_config(
        PoolConfig {
            workers,
            queue_capacity,
            progress: progress.clone(),
        },
        Arc::clone(&logger),
    )?;

    for entry in entries {
        pool.enqueue(DownloadTask::new(entry, Arc::clone(&downloader)))?;
    }

    let report = pool.wait_all();
    pool.shutdown();

    if let Some(pb) = &progress {
        pb.finish_and_clear();
    }

    if let Some(path) = &args.report {
        write_report(path, &report)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
    }

    let summary = RunSummary {
        attempted: report.len(),
        succeeded: report.succeeded(),
        failed: report.failed(),
        bytes_written: report.bytes_written(),
    };
    logger.log(format!(
        "All downloads completed ({} succeeded, {} failed)",
        summary.succeeded, summary.failed
    ));

    Ok(summary)
}

/// A zero timeout would fail every request, so it is rejected up front.
fn validate_timeout(secs: u64) -> crate::error::Result<Duration> {
    if secs == 0 {
        return Err(Error::InvalidConfiguration(
            "timeout must be at least 1 second, got 0".to_owned(),
        ));
    }
    Ok(Duration::from_secs(secs))
}

fn overall_progress() -> ProgressBar {
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar().template("{msg} {bar:40} {pos}/{len}") {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb.set_message("Overall");
    pb
}
