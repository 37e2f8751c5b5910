use crate::errors::{is_disk_full, PipelineError};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::warn;
use zip::ZipArchive;

/// Destination paths at or beyond this length are skipped (Windows MAX_PATH).
pub const MAX_PATH_LEN: usize = 260;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Unreadable,
    PathTooLong,
    Unwritable,
}

#[derive(Debug, Clone)]
pub struct SkippedEntry {
    pub name: String,
    pub reason: SkipReason,
}

/// Outcome of an extraction. A non-empty `skipped` list is not an error;
/// the caller decides whether a truncated tree is acceptable.
#[derive(Debug, Default)]
pub struct ExtractReport {
    pub written: usize,
    pub skipped: Vec<SkippedEntry>,
}

impl ExtractReport {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Unpack `archive_path` into `dest`, entry by entry in archive order.
///
/// A single bad entry (unreadable, over-long destination path, unwritable
/// output file) is skipped with a recorded warning; only a failure to open
/// the archive itself, or running out of disk, aborts the extraction.
pub fn extract_archive(
    archive_path: &Path,
    dest: &Path,
    mut progress: impl FnMut(&str, u8),
) -> Result<ExtractReport, PipelineError> {
    let file = File::open(archive_path)?;
    let mut zip = ZipArchive::new(file)
        .map_err(|e| PipelineError::ExtractionFailed(archive_path.to_path_buf(), e))?;
    fs::create_dir_all(dest)?;

    let total = zip.len();
    let mut report = ExtractReport::default();

    for i in 0..total {
        let mut entry = match zip.by_index(i) {
            Ok(e) => e,
            Err(e) => {
                warn!("Skipping unreadable entry #{i}: {e}");
                report.skipped.push(SkippedEntry {
                    name: format!("entry #{i}"),
                    reason: SkipReason::Unreadable,
                });
                continue;
            }
        };

        let raw_name = entry.name().to_string();
        let Some(rel) = safe_relative_path(&raw_name) else {
            warn!("Skipping entry with unsafe path: {raw_name}");
            report
                .skipped
                .push(SkippedEntry { name: raw_name, reason: SkipReason::Unreadable });
            continue;
        };
        if rel.as_os_str().is_empty() {
            continue;
        }

        let outpath = dest.join(&rel);
        if outpath.as_os_str().len() >= MAX_PATH_LEN {
            warn!("Skipping entry, destination path too long: {raw_name}");
            report
                .skipped
                .push(SkippedEntry { name: raw_name, reason: SkipReason::PathTooLong });
            continue;
        }

        if entry.is_dir() {
            fs::create_dir_all(&outpath).ok();
        } else {
            if let Some(parent) = outpath.parent() {
                fs::create_dir_all(parent).ok();
            }
            let mut out = match File::create(&outpath) {
                Ok(f) => f,
                Err(e) => {
                    warn!("Skipping entry, cannot open {} for writing: {e}", outpath.display());
                    report
                        .skipped
                        .push(SkippedEntry { name: raw_name, reason: SkipReason::Unwritable });
                    continue;
                }
            };
            if let Err(e) = std::io::copy(&mut entry, &mut out) {
                let _ = fs::remove_file(&outpath);
                if is_disk_full(&e) {
                    return Err(PipelineError::DiskFull(outpath));
                }
                warn!("Skipping entry, write to {} failed: {e}", outpath.display());
                report
                    .skipped
                    .push(SkippedEntry { name: raw_name, reason: SkipReason::Unwritable });
                continue;
            }
            report.written += 1;
        }

        let pct = (((i as f32 + 1.0) / total.max(1) as f32) * 100.0) as u8;
        progress("Extracting...", pct.min(100));
    }

    Ok(report)
}

/// Normalize an archive entry name to a relative path under the destination,
/// rejecting absolute paths and parent-directory components.
fn safe_relative_path(name: &str) -> Option<PathBuf> {
    let norm = name.replace('\\', "/");
    let trimmed = norm.trim_start_matches('/');
    let mut out = PathBuf::new();
    for comp in trimmed.split('/') {
        match comp {
            "" | "." => continue,
            ".." => return None,
            c => out.push(c.replace(':', "_")),
        }
    }
    Some(out)
}
