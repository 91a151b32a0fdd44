//! Layered run settings
//!
//! Resolution order, lowest first: built-in defaults, the TOML file,
//! environment variables (only for endpoints the file left unset), then
//! command-line flags.
//!
//! ```toml
//! [search]
//! max_branches = 4
//! retry_backoff_secs = 1.5
//!
//! [synthesis]
//! endpoint = "http://127.0.0.1:8188"
//! output_dir = "/srv/renderer/output"
//!
//! [synthesis.graph]
//! steps = 30
//!
//! [scoring]
//! program = "python3"
//! args = ["score_image.py"]
//!
//! [refinement]
//! url = "http://localhost:11434"
//! model = "llama3"
//!
//! [output]
//! root = "assets"
//! project = "control_room"
//! part = "part1"
//! ```

use clap::ArgMatches;
use refract_candidate::RunId;
use refract_oracle::GraphSettings;
use refract_search::SearchConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Renderer endpoint used when neither file, env nor flag sets one
pub const DEFAULT_SYNTHESIS_URL: &str = "http://127.0.0.1:8188";
/// Refinement server used when neither file, env nor flag sets one
pub const DEFAULT_REFINEMENT_URL: &str = "http://localhost:11434";
/// Refinement model used when neither file, env nor flag sets one
pub const DEFAULT_REFINEMENT_MODEL: &str = "llama3";
/// Negative prompt used when none is given
pub const DEFAULT_NEGATIVE: &str =
    "low detail, out of focus, boring background, distorted anatomy, plastic look, missing electronics, blurry textures";

/// Environment variable for the renderer endpoint
pub const ENV_SYNTHESIS_URL: &str = "REFRACT_SYNTHESIS_URL";
/// Environment variable for the refinement server
pub const ENV_REFINEMENT_URL: &str = "REFRACT_REFINEMENT_URL";
/// Environment variable for the refinement model
pub const ENV_REFINEMENT_MODEL: &str = "REFRACT_REFINEMENT_MODEL";

/// Parse a non-negative, finite number of seconds
///
/// # Errors
/// Returns a message clap shows next to the offending flag.
pub fn parse_seconds(value: &str) -> Result<Duration, String> {
    let secs: f64 = value.trim().parse().map_err(|_| format!("{value:?} is not a number of seconds"))?;
    Duration::try_from_secs_f64(secs).map_err(|_| format!("{value:?} must be a finite, non-negative number of seconds"))
}

/// Settings file error
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// File could not be read
    #[error("cannot read settings file {path}: {source}")]
    Read {
        /// Settings path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File is not valid settings TOML
    #[error("invalid settings file {path}: {source}")]
    Parse {
        /// Settings path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: toml::de::Error,
    },
}

/// Renderer connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisSettings {
    /// Renderer HTTP endpoint
    pub endpoint: Option<String>,
    /// Directory the renderer writes images into
    pub output_dir: PathBuf,
    /// Discovery poll interval in seconds
    pub poll_interval_secs: f64,
    /// Node graph parameters
    pub graph: GraphSettings,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            output_dir: PathBuf::from("output"),
            poll_interval_secs: 1.0,
            graph: GraphSettings::default(),
        }
    }
}

impl SynthesisSettings {
    /// Poll interval, falling back to one second on a bad value
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.poll_interval_secs)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or(Duration::from_secs(1))
    }
}

/// Scoring command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSettings {
    /// Program to run
    pub program: PathBuf,
    /// Arguments placed before the scoring flags
    pub args: Vec<String>,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            program: PathBuf::from("python3"),
            args: vec!["score_image.py".to_string()],
        }
    }
}

/// Refinement server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementSettings {
    /// Server root
    pub url: Option<String>,
    /// Model name
    pub model: Option<String>,
    /// Template wrapping positive suggestions, with a `{{DESCRIPTION}}` slot
    pub template: Option<String>,
}

/// Where results land
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Assets root
    pub root: PathBuf,
    /// Project name
    pub project: String,
    /// Part name
    pub part: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("assets"),
            project: "project".to_string(),
            part: "part1".to_string(),
        }
    }
}

/// Everything a run needs besides the seed prompt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Search parameters
    pub search: SearchConfig,
    /// Renderer connection
    pub synthesis: SynthesisSettings,
    /// Scoring command
    pub scoring: ScoringSettings,
    /// Refinement server
    pub refinement: RefinementSettings,
    /// Output location
    pub output: OutputSettings,
}

impl Settings {
    /// Parse settings from TOML text
    ///
    /// # Errors
    /// Returns the TOML error on malformed input.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Load settings from a file
    ///
    /// # Errors
    /// Returns `Read` or `Parse`.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Fill endpoints the file left unset from the environment
    pub fn fill_from_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let fill = |slot: &mut Option<String>, key: &str| {
            if slot.is_none() {
                *slot = lookup(key).filter(|v| !v.trim().is_empty());
            }
        };
        fill(&mut self.synthesis.endpoint, ENV_SYNTHESIS_URL);
        fill(&mut self.refinement.url, ENV_REFINEMENT_URL);
        fill(&mut self.refinement.model, ENV_REFINEMENT_MODEL);
    }

    /// Apply command-line flags on top
    pub fn apply_matches(&mut self, matches: &ArgMatches) {
        let search = &mut self.search;
        if let Some(&v) = matches.get_one::<u32>("branches") {
            search.max_branches = v;
        }
        if let Some(&v) = matches.get_one::<u32>("attempts") {
            search.max_attempts_per_branch = v;
        }
        if let Some(&v) = matches.get_one::<u32>("variants") {
            search.variants_per_attempt = v;
        }
        if let Some(&v) = matches.get_one::<u32>("max-stale") {
            search.max_stale = v;
        }
        if let Some(&v) = matches.get_one::<f64>("target-score") {
            search.target_score = Some(v);
        }
        if let Some(&v) = matches.get_one::<u32>("retry") {
            search.retry_bound = v;
        }
        if let Some(&delay) = matches.get_one::<Duration>("delay") {
            search.inter_attempt_delay = delay;
        }
        if let Some(&v) = matches.get_one::<u32>("final-variants") {
            search.final_variant_count = v;
        }
        if let Some(&v) = matches.get_one::<u64>("seed") {
            search.rng_seed = Some(v);
        }
        if matches.get_flag("concurrent") {
            search.concurrent_branches = true;
        }
        if matches.get_flag("no-reanchor") {
            search.reanchor_on_regression = false;
        }
        if matches.get_flag("multimodal") {
            search.multimodal_refinement = true;
        }

        if let Some(v) = matches.get_one::<String>("synthesis-url") {
            self.synthesis.endpoint = Some(v.clone());
        }
        if let Some(v) = matches.get_one::<PathBuf>("render-dir") {
            self.synthesis.output_dir.clone_from(v);
        }
        if let Some(v) = matches.get_one::<PathBuf>("scorer") {
            self.scoring.program.clone_from(v);
        }
        if let Some(v) = matches.get_one::<String>("refinement-url") {
            self.refinement.url = Some(v.clone());
        }
        if let Some(v) = matches.get_one::<String>("model") {
            self.refinement.model = Some(v.clone());
        }
        if let Some(v) = matches.get_one::<PathBuf>("output-root") {
            self.output.root.clone_from(v);
        }
        if let Some(v) = matches.get_one::<String>("project") {
            self.output.project.clone_from(v);
        }
        if let Some(v) = matches.get_one::<String>("part") {
            self.output.part.clone_from(v);
        }
    }

    /// Search configuration for one run
    ///
    /// Job prefixes are `<project>_<part>_<run tag>`, so renders left over
    /// from earlier runs of the same part are never discovered again.
    #[must_use]
    pub fn search_config(&self, run_id: RunId) -> SearchConfig {
        self.search.clone().with_job_prefix(format!(
            "{}_{}_{}",
            self.output.project,
            self.output.part,
            run_id.tag()
        ))
    }

    /// Renderer endpoint
    #[must_use]
    pub fn synthesis_endpoint(&self) -> &str {
        self.synthesis.endpoint.as_deref().unwrap_or(DEFAULT_SYNTHESIS_URL)
    }

    /// Refinement server root
    #[must_use]
    pub fn refinement_url(&self) -> &str {
        self.refinement.url.as_deref().unwrap_or(DEFAULT_REFINEMENT_URL)
    }

    /// Refinement model
    #[must_use]
    pub fn refinement_model(&self) -> &str {
        self.refinement.model.as_deref().unwrap_or(DEFAULT_REFINEMENT_MODEL)
    }
}
