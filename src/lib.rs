//! Bulk concurrent file retrieval.
//!
//! A [`WorkerPool`] of OS threads executes one [`DownloadTask`] per URL against
//! a shared [`Fetch`] capability, logs every outcome through a shared
//! [`Logger`], and lets the caller block until the whole batch is done.
//!
//! ```no_run
//! use bulk_dl::{DownloadTask, DownloaderOptions, Fetch, HttpDownloader, LinkEntry, Logger, WorkerPool};
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let logger = Logger::stdout().into_shared();
//! let fetcher: Arc<dyn Fetch> = Arc::new(HttpDownloader::new(
//!     "downloads",
//!     Arc::clone(&logger),
//!     DownloaderOptions::default(),
//! )?);
//!
//! let pool = WorkerPool::new(4, logger)?;
//! for url in ["https://example.com/a.bin", "https://example.com/b.bin"] {
//!     pool.enqueue(DownloadTask::new(LinkEntry::new(url), Arc::clone(&fetcher)))?;
//! }
//! let report = pool.wait_all();
//! println!("{} succeeded, {} failed", report.succeeded(), report.failed());
//! # Ok(())
//! # }
//! ```

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod app;
pub mod cli;
pub mod downloader;
pub mod error;
pub mod logger;
pub mod models;
pub mod pool;
pub mod queue;
pub mod report;
pub mod task;
pub mod urls;

pub use downloader::{CollisionPolicy, DownloaderOptions, Fetch, HttpDownloader};
pub use error::{DownloadError, Error, Result};
pub use logger::{Logger, MemorySink};
pub use models::{BatchReport, DownloadResult, LinkEntry, TaskReport};
pub use pool::{MAX_WORKERS, MIN_WORKERS, PoolConfig, WorkerPool};
pub use queue::TaskQueue;
pub use task::{DownloadTask, Task};
