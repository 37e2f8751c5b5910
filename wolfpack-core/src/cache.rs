use crate::errors::{is_disk_full, PipelineError};
use crate::extract::{extract_archive, ExtractReport};
use crate::logging::ProgressThrottle;
use futures_util::StreamExt;
use humansize::{format_size, DECIMAL};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::info;

const USER_AGENT: &str = "WolfpackLauncher-RS";

/// Maps a logical artifact name to `<root>/<name>.zip` and `<root>/<name>/`.
///
/// Freshness is presence-only: an archive that exists on disk is taken as
/// valid, so a completed download is never repeated. Downloads stream to a
/// `.part` file and are renamed into place, so the final name either holds a
/// complete archive or nothing.
#[derive(Clone)]
pub struct ArtifactCache {
    root: PathBuf,
    client: reqwest::Client,
}

impl ArtifactCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), client: reqwest::Client::new() }
    }

    /// `<workdir>/cache`, the layout the launcher has always used.
    pub fn in_workdir() -> Result<Self, PipelineError> {
        Ok(Self::new(std::env::current_dir()?.join("cache")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn archive_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.zip"))
    }

    pub fn extracted_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn is_downloaded(&self, name: &str) -> bool {
        self.archive_path(name).is_file()
    }

    pub fn is_extracted(&self, name: &str) -> bool {
        fs::read_dir(self.extracted_dir(name))
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }

    /// Drop both the cached archive and its extracted tree for `name`.
    pub fn invalidate(&self, name: &str) -> Result<(), PipelineError> {
        let archive = self.archive_path(name);
        if archive.exists() {
            fs::remove_file(&archive)?;
        }
        let dir = self.extracted_dir(name);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Download `url` to `<root>/<name>.zip` unless it is already there.
    /// The idempotent presence check is the at-most-once-download guarantee:
    /// a cached archive short-circuits with zero network activity.
    pub async fn ensure_downloaded(
        &self,
        url: &str,
        name: &str,
        mut progress: impl FnMut(&str, u8),
    ) -> Result<PathBuf, PipelineError> {
        let dest = self.archive_path(name);
        if dest.is_file() {
            info!("Using cached archive for '{name}' at {}", dest.display());
            return Ok(dest);
        }

        fs::create_dir_all(&self.root)?;
        let part = self.root.join(format!("{name}.zip.part"));

        info!("Downloading '{name}' from {url}");
        progress(&format!("Downloading {name}"), 0);

        let resp = self
            .client
            .get(url)
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .map_err(|e| PipelineError::DownloadFailed {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(PipelineError::DownloadFailed {
                name: name.to_string(),
                reason: format!("HTTP {status}"),
            });
        }

        let total = resp.content_length().unwrap_or(0);
        let mut stream = resp.bytes_stream();
        let mut file = tokio::fs::File::create(&part)
            .await
            .map_err(|e| self.write_error(&part, name, e))?;

        let mut downloaded: u64 = 0;
        let mut throttle = ProgressThrottle::new(150);
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&part).await;
                    return Err(PipelineError::DownloadFailed {
                        name: name.to_string(),
                        reason: e.to_string(),
                    });
                }
            };
            if let Err(e) = file.write_all(&chunk).await {
                drop(file);
                let _ = tokio::fs::remove_file(&part).await;
                return Err(self.write_error(&part, name, e));
            }
            downloaded += chunk.len() as u64;
            if total > 0 {
                let pct = ((downloaded as f64 / total as f64) * 100.0) as u8;
                let msg = format!(
                    "Downloading: {}/{}",
                    format_size(downloaded, DECIMAL),
                    format_size(total, DECIMAL)
                );
                throttle.emit("Downloading:", msg, pct.min(100), &mut progress);
            }
        }
        if let Err(e) = file.flush().await {
            drop(file);
            let _ = tokio::fs::remove_file(&part).await;
            return Err(self.write_error(&part, name, e));
        }
        drop(file);

        if let Err(e) = tokio::fs::rename(&part, &dest).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(self.write_error(&part, name, e));
        }
        info!("Download of '{name}' finished ({})", format_size(downloaded, DECIMAL));
        Ok(dest)
    }

    fn write_error(&self, path: &Path, name: &str, e: std::io::Error) -> PipelineError {
        if is_disk_full(&e) {
            PipelineError::DiskFull(path.to_path_buf())
        } else {
            PipelineError::DownloadFailed { name: name.to_string(), reason: e.to_string() }
        }
    }

    /// Extract `<root>/<name>.zip` into `<root>/<name>/` unless that
    /// directory already has content.
    pub fn ensure_extracted(
        &self,
        name: &str,
        mut progress: impl FnMut(&str, u8),
    ) -> Result<(PathBuf, ExtractReport), PipelineError> {
        let dir = self.extracted_dir(name);
        if self.is_extracted(name) {
            info!("Using previously extracted '{name}' at {}", dir.display());
            return Ok((dir, ExtractReport::default()));
        }
        let archive = self.archive_path(name);
        if !archive.is_file() {
            return Err(PipelineError::ArtifactMissing(archive));
        }
        info!("Extracting '{name}'...");
        let report = extract_archive(&archive, &dir, &mut progress)?;
        info!(
            "Extracted {} files for '{name}' ({} skipped)",
            report.written,
            report.skipped.len()
        );
        Ok((dir, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[tokio::test]
    async fn cached_archive_short_circuits_without_network() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(tmp.path());
        fs::create_dir_all(cache.root()).unwrap();
        fs::write(cache.archive_path("latest_release"), b"pretend zip").unwrap();

        // the URL is unroutable, so reaching the network would fail loudly
        let path = cache
            .ensure_downloaded("http://127.0.0.1:1/never", "latest_release", |_, _| {})
            .await
            .unwrap();
        assert_eq!(path, cache.archive_path("latest_release"));
    }

    #[tokio::test]
    async fn failed_download_leaves_no_archive_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(tmp.path());

        let err = cache
            .ensure_downloaded("http://127.0.0.1:1/never", "latest_release", |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::DownloadFailed { .. }));
        assert!(!cache.archive_path("latest_release").exists());
        assert!(!tmp.path().join("latest_release.zip.part").exists());
    }

    #[tokio::test]
    async fn interrupted_transfer_discards_the_partial_file() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(tmp.path());

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let _ = std::io::Read::read(&mut sock, &mut buf);
            // advertise more bytes than are sent, then hang up mid-body
            let _ = std::io::Write::write_all(
                &mut sock,
                b"HTTP/1.1 200 OK\r\nContent-Length: 100000\r\n\r\npartial body",
            );
        });

        let err = cache
            .ensure_downloaded(&format!("http://{addr}/pack.zip"), "latest_release", |_, _| {})
            .await
            .unwrap_err();
        server.join().unwrap();

        assert!(matches!(err, PipelineError::DownloadFailed { .. }));
        assert!(!cache.archive_path("latest_release").exists());
        assert!(!tmp.path().join("latest_release.zip.part").exists());
    }

    #[test]
    fn extracting_without_archive_is_artifact_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(tmp.path());
        let err = cache.ensure_extracted("dependency", |_, _| {}).unwrap_err();
        assert!(matches!(err, PipelineError::ArtifactMissing(_)));
    }

    #[test]
    fn extracted_dir_with_content_short_circuits() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(tmp.path());
        let dir = cache.extracted_dir("dependency");
        fs::create_dir_all(dir.join("BepInExPack")).unwrap();

        // no archive on disk, yet extraction succeeds by presence alone
        let (path, report) = cache.ensure_extracted("dependency", |_, _| {}).unwrap();
        assert_eq!(path, dir);
        assert!(report.is_complete());
    }

    #[test]
    fn invalidate_clears_archive_and_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = ArtifactCache::new(tmp.path());
        fs::create_dir_all(cache.extracted_dir("latest_release")).unwrap();
        let mut f = fs::File::create(cache.archive_path("latest_release")).unwrap();
        f.write_all(b"zip").unwrap();

        cache.invalidate("latest_release").unwrap();
        assert!(!cache.is_downloaded("latest_release"));
        assert!(!cache.extracted_dir("latest_release").exists());
    }
}
