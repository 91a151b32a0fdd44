//! Synthesis backend
//!
//! A backend accepts a render job and, some time later, exposes an
//! artifact under the job's prefix. Submission and discovery are separate
//! calls so the caller can bound each with its own timeout.

use crate::discovery::OutputWatcher;
use crate::error::{truncate, OracleError};
use async_trait::async_trait;
use refract_candidate::{ArtifactRef, JobIdentity, PromptPair};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One render request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisJob {
    /// Prompt pair to render
    pub prompt: PromptPair,
    /// Job prefix and sampler seed
    pub identity: JobIdentity,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
}

impl SynthesisJob {
    /// Create a square job
    #[must_use]
    pub fn new(prompt: PromptPair, identity: JobIdentity, size: u32) -> Self {
        Self {
            prompt,
            identity,
            width: size,
            height: size,
        }
    }

    /// Job prefix
    #[inline]
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.identity.prefix
    }
}

/// Asynchronous render service
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    /// Submit a job
    ///
    /// # Errors
    /// Returns `OracleError` when the backend did not accept the job.
    async fn submit(&self, job: &SynthesisJob) -> Result<(), OracleError>;

    /// Wait for the job's artifact to appear
    ///
    /// This may wait indefinitely; callers bound it with a timeout.
    ///
    /// # Errors
    /// Returns `OracleError` if the output location cannot be inspected.
    async fn await_artifact(&self, job: &SynthesisJob) -> Result<ArtifactRef, OracleError>;

    /// Drop any queued work (best-effort)
    ///
    /// # Errors
    /// Returns `OracleError` when the backend refused.
    async fn clear_queue(&self) -> Result<(), OracleError> {
        Ok(())
    }
}

/// Render parameters baked into every job graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSettings {
    /// Checkpoint file name
    pub checkpoint: String,
    /// Sampler steps
    pub steps: u32,
    /// Classifier-free guidance scale
    pub cfg: f64,
    /// Sampler name
    pub sampler: String,
    /// Scheduler name
    pub scheduler: String,
    /// Denoise strength
    pub denoise: f64,
    /// Optional subfolder prepended to the filename prefix
    pub output_subdir: Option<String>,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            checkpoint: "sd15.ckpt".to_string(),
            steps: 25,
            cfg: 7.5,
            sampler: "euler".to_string(),
            scheduler: "normal".to_string(),
            denoise: 1.0,
            output_subdir: None,
        }
    }
}

/// Build the node graph for one job
///
/// Nodes: checkpoint loader (1), positive (2) and negative (3) text
/// encoders, empty latent (4), sampler (5), VAE decode (6), save (7).
#[must_use]
pub fn build_job_graph(job: &SynthesisJob, settings: &GraphSettings) -> serde_json::Value {
    let filename_prefix = match &settings.output_subdir {
        Some(dir) if !dir.is_empty() => format!("{}/{}", dir.trim_end_matches('/'), job.prefix()),
        _ => job.prefix().to_string(),
    };

    serde_json::json!({
        "1": {
            "class_type": "CheckpointLoaderSimple",
            "inputs": { "ckpt_name": settings.checkpoint }
        },
        "2": {
            "class_type": "CLIPTextEncode",
            "inputs": { "text": job.prompt.positive, "clip": ["1", 1] }
        },
        "3": {
            "class_type": "CLIPTextEncode",
            "inputs": { "text": job.prompt.negative, "clip": ["1", 1] }
        },
        "4": {
            "class_type": "EmptyLatentImage",
            "inputs": { "width": job.width, "height": job.height, "batch_size": 1 }
        },
        "5": {
            "class_type": "KSampler",
            "inputs": {
                "model": ["1", 0],
                "positive": ["2", 0],
                "negative": ["3", 0],
                "latent_image": ["4", 0],
                "seed": job.identity.seed,
                "steps": settings.steps,
                "cfg": settings.cfg,
                "sampler_name": settings.sampler,
                "scheduler": settings.scheduler,
                "denoise": settings.denoise
            }
        },
        "6": {
            "class_type": "VAEDecode",
            "inputs": { "samples": ["5", 0], "vae": ["1", 2] }
        },
        "7": {
            "class_type": "SaveImage",
            "inputs": { "images": ["6", 0], "filename_prefix": filename_prefix }
        }
    })
}

/// HTTP backend that posts job graphs and discovers output on disk
pub struct HttpSynthesisBackend {
    client: reqwest::Client,
    endpoint: Url,
    settings: GraphSettings,
    watcher: OutputWatcher,
}

impl HttpSynthesisBackend {
    /// Create new backend
    ///
    /// # Arguments
    /// * `endpoint` - Full URL of the job submission route (e.g. `http://localhost:8188/prompt`)
    /// * `watcher` - Output directory watcher used for discovery
    ///
    /// # Errors
    /// Returns `InvalidEndpoint` if the URL does not parse, or `Transport`
    /// if the HTTP client cannot be built.
    pub fn new(endpoint: &str, watcher: OutputWatcher) -> Result<Self, OracleError> {
        let endpoint = Url::parse(endpoint).map_err(|e| OracleError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
        let client = reqwest::Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            endpoint,
            settings: GraphSettings::default(),
            watcher,
        })
    }

    /// Set graph parameters
    #[inline]
    #[must_use]
    pub fn with_settings(mut self, settings: GraphSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Submission URL
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn queue_url(&self) -> Result<Url, OracleError> {
        self.endpoint
            .join("queue/clear")
            .map_err(|e| OracleError::InvalidEndpoint(e.to_string()))
    }
}

#[async_trait]
impl SynthesisBackend for HttpSynthesisBackend {
    async fn submit(&self, job: &SynthesisJob) -> Result<(), OracleError> {
        let payload = serde_json::json!({ "prompt": build_job_graph(job, &self.settings) });
        tracing::debug!(prefix = job.prefix(), seed = job.identity.seed, "posting job graph");

        let response = self.client.post(self.endpoint.clone()).json(&payload).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(OracleError::rejected(status.as_u16(), &body))
        }
    }

    async fn await_artifact(&self, job: &SynthesisJob) -> Result<ArtifactRef, OracleError> {
        self.watcher.wait_for(job.prefix()).await
    }

    async fn clear_queue(&self) -> Result<(), OracleError> {
        let url = self.queue_url()?;
        let response = self.client.post(url).send().await?;
        let status = response.status();
        if status.is_success() {
            tracing::info!("synthesis queue cleared");
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), body = %truncate(&body, 80), "queue clear refused");
            Err(OracleError::rejected(status.as_u16(), &body))
        }
    }
}
