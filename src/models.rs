use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// One line of the URL file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEntry {
    pub url: String,
    /// Explicit destination name from a `file_name<TAB>url` line.
    pub file_name: Option<String>,
}

impl LinkEntry {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            file_name: None,
        }
    }

    pub fn named(file_name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            file_name: Some(file_name.into()),
        }
    }
}

/// Outcome of executing one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DownloadResult {
    Success { bytes_written: u64, path: PathBuf },
    Failure { reason: String },
}

impl DownloadResult {
    pub fn success(bytes_written: u64, path: impl Into<PathBuf>) -> Self {
        Self::Success {
            bytes_written,
            path: path.into(),
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

impl fmt::Display for DownloadResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success {
                bytes_written,
                path,
            } => write!(f, "{} bytes -> {}", bytes_written, path.display()),
            Self::Failure { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// What the pool recorded for one executed task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    /// Enqueue sequence number, starting at 0 for the pool's first task.
    pub seq: u64,
    pub label: String,
    pub outcome: DownloadResult,
    pub elapsed_ms: u64,
}

/// Reports of every task completed between two `wait_all` calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub tasks: Vec<TaskReport>,
}

impl BatchReport {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.tasks.iter().filter(|t| t.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    pub fn failures(&self) -> impl Iterator<Item = &TaskReport> {
        self.tasks.iter().filter(|t| !t.outcome.is_success())
    }

    pub fn bytes_written(&self) -> u64 {
        self.tasks
            .iter()
            .map(|t| match t.outcome {
                DownloadResult::Success { bytes_written, .. } => bytes_written,
                DownloadResult::Failure { .. } => 0,
            })
            .sum()
    }
}
