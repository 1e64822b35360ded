use crate::error::{Error, Result};
use crate::models::LinkEntry;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Reads the URL list at `path`.
///
/// One URL per line. Blank lines and lines starting with `#` are skipped.
/// A line of the form `file_name<TAB>url` sets the destination name
/// explicitly, and a leading `file_name` header line is ignored.
pub fn read_url_file(path: &Path) -> Result<Vec<LinkEntry>> {
    let url_file_error = |source| Error::UrlFile {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(url_file_error)?;
    let reader = BufReader::new(file);

    let mut entries = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(url_file_error)?;
        if idx == 0 && line.starts_with("file_name\t") {
            continue;
        }
        if let Some(entry) = parse_line(&line) {
            entries.push(entry);
        }
    }

    Ok(entries)
}

fn parse_line(line: &str) -> Option<LinkEntry> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    match line.split_once('\t') {
        Some((name, url)) if !url.trim().is_empty() => {
            let name = name.trim();
            let url = url.trim();
            if name.is_empty() {
                Some(LinkEntry::new(url))
            } else {
                Some(LinkEntry::named(name, url))
            }
        }
        _ => Some(LinkEntry::new(line)),
    }
}
