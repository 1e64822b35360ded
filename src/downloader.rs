use crate::error::DownloadError;
use crate::logger::Logger;
use crate::models::{DownloadResult, LinkEntry};
use anyhow::{Context, Result};
use futures::StreamExt;
use reqwest::Client;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Runtime;
use tracing::{debug, warn};
use url::Url;

/// Performs one download. Called concurrently from every worker thread.
pub trait Fetch: Send + Sync {
    fn download(&self, entry: &LinkEntry) -> DownloadResult;
}

/// What happens when the destination file already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum CollisionPolicy {
    /// Replace the existing file; with concurrent writers the last rename wins.
    Overwrite,
    /// Keep the existing file and write to `name (1).ext`, `name (2).ext`, ...
    ///
    /// A name is claimed by hard-linking the finished part file to it, so it
    /// only ever appears with complete contents. On filesystems without hard
    /// links an empty placeholder holds the name until the rename lands.
    #[default]
    Rename,
}

#[derive(Debug, Clone)]
pub struct DownloaderOptions {
    /// Deadline for a whole request, body included.
    pub timeout: Duration,
    pub proxy: Option<String>,
    pub collisions: CollisionPolicy,
}

impl Default for DownloaderOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            proxy: None,
            collisions: CollisionPolicy::default(),
        }
    }
}

/// HTTP(S) implementation of [`Fetch`].
///
/// Transfers are driven by an internal tokio runtime; each calling worker
/// thread blocks on its own transfer. Bytes are streamed into a hidden,
/// short-named `.part` file in the output directory and moved into place once
/// complete.
pub struct HttpDownloader {
    runtime: Runtime,
    client: Client,
    output_dir: PathBuf,
    logger: Arc<Logger>,
    collisions: CollisionPolicy,
    part_seq: AtomicU64,
}

impl HttpDownloader {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        logger: Arc<Logger>,
        options: DownloaderOptions,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("bulk-dl-io")
            .enable_all()
            .build()
            .context("Failed to start I/O runtime")?;

        let client = {
            let _guard = runtime.enter();
            let mut client_builder = Client::builder().timeout(options.timeout);
            if let Some(proxy_url) = options.proxy.as_deref() {
                client_builder = client_builder
                    .proxy(reqwest::Proxy::http(proxy_url).context("Invalid proxy URL")?);
            }
            client_builder
                .build()
                .context("Failed to build HTTP client")?
        };

        Ok(Self {
            runtime,
            client,
            output_dir: output_dir.into(),
            logger,
            collisions: options.collisions,
            part_seq: AtomicU64::new(0),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn fetch(&self, entry: &LinkEntry) -> Result<(u64, PathBuf), DownloadError> {
        let url = Url::parse(entry.url.trim()).map_err(|source| DownloadError::InvalidUrl {
            url: entry.url.clone(),
            source,
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DownloadError::UnsupportedScheme(url.scheme().to_owned()));
        }

        let file_name = entry
            .file_name
            .as_deref()
            .and_then(sanitize_file_name)
            .unwrap_or_else(|| file_name_from_url(&url));
        let part_path = self.output_dir.join(format!(
            ".bulk-dl-{}-{}.part",
            std::process::id(),
            self.part_seq.fetch_add(1, Ordering::Relaxed)
        ));

        self.logger.log(format!("Downloading: {}", entry.url));

        let result = self
            .runtime
            .block_on(self.transfer(&url, &part_path))
            .and_then(|written| Ok((written, self.place(&part_path, &file_name)?)));

        if result.is_err() {
            let _ = fs::remove_file(&part_path);
        }
        result
    }

    async fn transfer(&self, url: &Url, part_path: &Path) -> Result<u64, DownloadError> {
        let response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status(status));
        }

        let mut file = tokio::fs::File::create(part_path).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }

    fn place(&self, part_path: &Path, file_name: &str) -> io::Result<PathBuf> {
        match self.collisions {
            CollisionPolicy::Overwrite => {
                let target = self.output_dir.join(file_name);
                fs::rename(part_path, &target)?;
                Ok(target)
            }
            CollisionPolicy::Rename => {
                let target = link_unique(part_path, &self.output_dir, file_name)?;
                match fs::remove_file(part_path) {
                    Err(e) if e.kind() != io::ErrorKind::NotFound => {
                        warn!(part = %part_path.display(), error = %e, "failed to remove part file");
                    }
                    _ => {}
                }
                Ok(target)
            }
        }
    }
}

impl Fetch for HttpDownloader {
    fn download(&self, entry: &LinkEntry) -> DownloadResult {
        match self.fetch(entry) {
            Ok((bytes, path)) => DownloadResult::success(bytes, path),
            Err(e) => DownloadResult::failure(e.to_string()),
        }
    }
}

const MAX_RENAME_ATTEMPTS: u32 = 10_000;

/// Longest file name most filesystems accept (NAME_MAX on Linux).
const MAX_FILE_NAME_BYTES: usize = 255;

/// Longest suffix after the last `.` still treated as an extension.
const MAX_EXTENSION_BYTES: usize = 32;

/// Publishes `part_path` as `dir/file_name`, or as the first free
/// `name (n).ext`. The part file is left in place for the caller to remove.
fn link_unique(part_path: &Path, dir: &Path, file_name: &str) -> io::Result<PathBuf> {
    let (stem, extension) = split_extension(file_name);

    for n in 0..MAX_RENAME_ATTEMPTS {
        let candidate = if n == 0 {
            dir.join(file_name)
        } else {
            dir.join(fit_file_name(stem, &format!(" ({n})"), extension))
        };

        match claim(part_path, &candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name for {}", dir.join(file_name).display()),
    ))
}

/// Makes `part_path` visible under `candidate`, failing with `AlreadyExists`
/// if the name is taken.
fn claim(part_path: &Path, candidate: &Path) -> io::Result<()> {
    match fs::hard_link(part_path, candidate) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(e),
        Err(e) => {
            debug!(error = %e, "hard link unavailable, reserving name with a placeholder");
            OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(candidate)?;
            fs::rename(part_path, candidate).inspect_err(|_| {
                let _ = fs::remove_file(candidate);
            })
        }
    }
}

/// Splits `name` into stem and extension, the extension keeping its dot.
/// Leading dots and overlong suffixes do not count as extensions.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(dot) if dot > 0 && (2..=MAX_EXTENSION_BYTES + 1).contains(&(name.len() - dot)) => {
            name.split_at(dot)
        }
        _ => (name, ""),
    }
}

/// `stem + suffix + extension`, with the stem cut short so the whole name fits
/// in [`MAX_FILE_NAME_BYTES`].
fn fit_file_name(stem: &str, suffix: &str, extension: &str) -> String {
    let budget = MAX_FILE_NAME_BYTES.saturating_sub(suffix.len() + extension.len());
    let stem = truncate_at_char_boundary(stem, budget);
    format!("{stem}{suffix}{extension}")
}

fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Destination name for `url`: the last non-empty path segment, percent-decoded.
pub fn file_name_from_url(url: &Url) -> String {
    let from_path = url
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .and_then(|segment| {
            let decoded = urlencoding::decode(segment)
                .map(|d| d.into_owned())
                .unwrap_or_else(|_| segment.to_owned());
            sanitize_file_name(&decoded)
        });

    from_path
        .or_else(|| {
            url.host_str()
                .and_then(|host| sanitize_file_name(&format!("{host}.download")))
        })
        .unwrap_or_else(|| "download".to_owned())
}

/// Replaces characters that cannot appear in a file name and shortens names
/// longer than 255 bytes, keeping the extension. Returns `None` when nothing
/// usable is left.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim();

    match cleaned {
        "" | "." | ".." => None,
        _ if cleaned.len() > MAX_FILE_NAME_BYTES => {
            let (stem, extension) = split_extension(cleaned);
            Some(fit_file_name(stem, "", extension))
        }
        _ => Some(cleaned.to_owned()),
    }
}
