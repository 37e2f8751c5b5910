use std::path::PathBuf;
use thiserror::Error;

/// Everything a pipeline stage can fail with. Stage-advance logic in the
/// orchestrator is a plain match over these; nothing in the crate panics on
/// an expected failure.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("game installation not found on any known drive")]
    GameNotFound,

    #[error("{0} is not installed in the game directory")]
    DependencyMissing(String),

    #[error("installation files not found at {}", .0.display())]
    ArtifactMissing(PathBuf),

    #[error("network request failed: {0}")]
    Network(String),

    #[error("release metadata is missing field `{0}`")]
    MalformedMetadata(&'static str),

    #[error("download of `{name}` failed: {reason}")]
    DownloadFailed { name: String, reason: String },

    #[error("ran out of disk space while writing {}", .0.display())]
    DiskFull(PathBuf),

    #[error("archive {} could not be read", .0.display())]
    ExtractionFailed(PathBuf, #[source] zip::result::ZipError),

    #[error("install step failed: {0}")]
    Install(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("another operation is already in progress")]
    OperationInProgress,
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        PipelineError::Network(e.to_string())
    }
}

/// ENOSPC on unix, ERROR_DISK_FULL / ERROR_HANDLE_DISK_FULL on windows.
pub(crate) fn is_disk_full(e: &std::io::Error) -> bool {
    match e.raw_os_error() {
        #[cfg(unix)]
        Some(code) => code == 28,
        #[cfg(windows)]
        Some(code) => code == 39 || code == 112,
        _ => false,
    }
}
