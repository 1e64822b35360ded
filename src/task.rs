//! Units of work executed by the [`WorkerPool`](crate::pool::WorkerPool).

use crate::downloader::Fetch;
use crate::models::{DownloadResult, LinkEntry};
use std::sync::Arc;

/// A single-shot unit of work.
///
/// A task is consumed by `execute`, so the pool can never run it twice.
pub trait Task: Send {
    /// Short human-readable name used in log lines and reports.
    fn label(&self) -> &str;

    fn execute(self: Box<Self>) -> DownloadResult;
}

/// Downloads one [`LinkEntry`] with a shared download capability.
pub struct DownloadTask {
    entry: LinkEntry,
    fetcher: Arc<dyn Fetch>,
}

impl DownloadTask {
    pub fn new(entry: LinkEntry, fetcher: Arc<dyn Fetch>) -> Self {
        Self { entry, fetcher }
    }

    pub fn entry(&self) -> &LinkEntry {
        &self.entry
    }
}

impl Task for DownloadTask {
    fn label(&self) -> &str {
        &self.entry.url
    }

    fn execute(self: Box<Self>) -> DownloadResult {
        self.fetcher.download(&self.entry)
    }
}

/// A task backed by a closure.
pub struct FnTask<F> {
    label: String,
    f: F,
}

impl<F> Task for FnTask<F>
where
    F: FnOnce() -> DownloadResult + Send,
{
    fn label(&self) -> &str {
        &self.label
    }

    fn execute(self: Box<Self>) -> DownloadResult {
        (self.f)()
    }
}

pub fn from_fn<F>(label: impl Into<String>, f: F) -> FnTask<F>
where
    F: FnOnce() -> DownloadResult + Send,
{
    FnTask {
        label: label.into(),
        f,
    }
}
