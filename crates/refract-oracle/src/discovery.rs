//! Output discovery
//!
//! Synthesis backends write artifacts somewhere under an output root as
//! `<prefix>_<counter>_.<ext>`. [`OutputWatcher`] polls that tree until a
//! file whose name starts with `<prefix>_` shows up, so `job_v1` never
//! picks up `job_v10_00001_.png`.

use crate::error::OracleError;
use refract_candidate::ArtifactRef;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use walkdir::WalkDir;

/// Polls an output tree for artifacts
#[derive(Debug, Clone)]
pub struct OutputWatcher {
    root: PathBuf,
    poll_interval: Duration,
    extension: String,
}

impl OutputWatcher {
    /// Watch `root` for `.png` files, polling every two seconds
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            poll_interval: Duration::from_secs(2),
            extension: "png".to_string(),
        }
    }

    /// Set poll interval
    #[inline]
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the artifact file extension (without dot)
    #[inline]
    #[must_use]
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Output root
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Newest matching file right now, if any
    #[must_use]
    pub fn scan(&self, prefix: &str) -> Option<PathBuf> {
        newest_match(&self.root, prefix, &self.extension)
    }

    /// Poll until a file named `<prefix>_*` appears
    ///
    /// Never returns on its own if nothing appears; wrap in a timeout.
    ///
    /// # Errors
    /// Returns `Join` if the blocking scan task fails.
    pub async fn wait_for(&self, prefix: &str) -> Result<ArtifactRef, OracleError> {
        loop {
            let root = self.root.clone();
            let prefix_owned = prefix.to_string();
            let extension = self.extension.clone();
            let found = tokio::task::spawn_blocking(move || newest_match(&root, &prefix_owned, &extension))
                .await
                .map_err(|e| OracleError::Join(e.to_string()))?;

            if let Some(path) = found {
                tracing::debug!(prefix, path = %path.display(), "artifact discovered");
                return Ok(ArtifactRef::new(path));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

fn newest_match(root: &Path, prefix: &str, extension: &str) -> Option<PathBuf> {
    let stem = format!("{prefix}_");
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            let path = entry.path();
            let ext_ok = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(extension));
            let name_ok = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&stem));
            ext_ok && name_ok
        })
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some((modified, entry.into_path()))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}
