//! Line-oriented log sink shared by the driver and every worker thread.
//!
//! Each call to [`Logger::log`] builds the complete line first and then writes
//! it to every target while holding a single lock, so concurrent callers never
//! produce fused or partial lines.

use indicatif::ProgressBar;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

enum Target {
    Stdout,
    Progress(ProgressBar),
    Writer(Box<dyn Write + Send>),
}

impl Target {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        match self {
            Target::Progress(pb) if !pb.is_hidden() => {
                pb.println(line);
                Ok(())
            }
            Target::Stdout | Target::Progress(_) => {
                let mut out = io::stdout().lock();
                out.write_all(line.as_bytes())?;
                out.write_all(b"\n")?;
                out.flush()
            }
            Target::Writer(w) => {
                let mut buf = String::with_capacity(line.len() + 1);
                buf.push_str(line);
                buf.push('\n');
                w.write_all(buf.as_bytes())?;
                w.flush()
            }
        }
    }
}

pub struct Logger {
    targets: Mutex<Vec<Target>>,
    timestamps: bool,
}

impl Logger {
    pub fn stdout() -> Self {
        Self::from_targets(vec![Target::Stdout])
    }

    pub fn to_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self::from_targets(vec![Target::Writer(Box::new(writer))])
    }

    /// Logger writing into a fresh [`MemorySink`], for tests and embedding.
    pub fn capture() -> (Self, MemorySink) {
        let sink = MemorySink::default();
        (Self::to_writer(sink.clone()).without_timestamps(), sink)
    }

    fn from_targets(targets: Vec<Target>) -> Self {
        Self {
            targets: Mutex::new(targets),
            timestamps: true,
        }
    }

    pub fn without_timestamps(mut self) -> Self {
        self.timestamps = false;
        self
    }

    /// Also append every line to `path`.
    pub fn with_file(self, path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        self.lock().push(Target::Writer(Box::new(file)));
        Ok(self)
    }

    /// Route stdout lines above `pb` instead of through it.
    pub fn with_progress(self, pb: ProgressBar) -> Self {
        for target in self.lock().iter_mut() {
            if matches!(target, Target::Stdout) {
                *target = Target::Progress(pb.clone());
            }
        }
        self
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn log(&self, message: impl AsRef<str>) {
        let line = if self.timestamps {
            format!(
                "[{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                message.as_ref()
            )
        } else {
            message.as_ref().to_owned()
        };

        let mut targets = self.lock();
        for target in targets.iter_mut() {
            if let Err(e) = target.write_line(&line) {
                tracing::warn!(error = %e, "log sink write failed");
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Target>> {
        self.targets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable in-memory writer; all clones share one buffer.
#[derive(Clone, Default)]
pub struct MemorySink(Arc<Mutex<Vec<u8>>>);

impl MemorySink {
    pub fn contents(&self) -> String {
        let buf = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_owned).collect()
    }
}

impl Write for MemorySink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
