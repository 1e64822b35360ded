use crate::error::Result;
use crate::models::BatchReport;
use std::fs;
use std::path::Path;

/// Writes `report` to `path` as pretty-printed JSON.
pub fn write_report(path: &Path, report: &BatchReport) -> Result<()> {
    let content = serde_json::to_string_pretty(report)?;
    fs::write(path, content)?;
    Ok(())
}

pub fn load_report(path: &Path) -> Result<BatchReport> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
