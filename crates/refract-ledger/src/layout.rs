//! Asset directory layout
//!
//! ```text
//! <root>/<project>/<part>/
//!     logs/image_scores.csv
//!     summaries/<run_id>.json
//!     image_manifest.json
//!     preview.png
//!     best_prompt_result.png
//! ```

use refract_candidate::RunId;
use std::path::{Path, PathBuf};

/// Where a run's files live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetLayout {
    dir: PathBuf,
}

impl AssetLayout {
    /// Layout for a project part under `root`
    #[must_use]
    pub fn new(root: impl AsRef<Path>, project: &str, part: &str) -> Self {
        Self {
            dir: root.as_ref().join(project).join(part),
        }
    }

    /// Layout rooted directly at `dir`
    #[must_use]
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Asset directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append-only score log
    #[must_use]
    pub fn score_log(&self) -> PathBuf {
        self.dir.join("logs").join("image_scores.csv")
    }

    /// Write-once summary of one run
    #[must_use]
    pub fn summary(&self, run_id: RunId) -> PathBuf {
        self.dir.join("summaries").join(format!("{run_id}.json"))
    }

    /// Manifest of every scored image
    #[must_use]
    pub fn manifest(&self) -> PathBuf {
        self.dir.join("image_manifest.json")
    }

    /// Copies of the winning artifact
    #[must_use]
    pub fn promotion_targets(&self) -> [PathBuf; 2] {
        [self.dir.join("preview.png"), self.dir.join("best_prompt_result.png")]
    }
}
