//! Refinement oracle
//!
//! Proposes an improved prompt pair from the current one and its score.
//! A refinement that yields nothing usable is `Ok(None)`, never an error:
//! the search simply keeps its current prompt.

use crate::error::{truncate, OracleError};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use refract_candidate::{ArtifactRef, PromptPair, Score};
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;

/// Context passed to a refinement call
#[derive(Debug, Clone, PartialEq)]
pub struct RefinementRequest {
    /// Prompt pair to improve
    pub prompt: PromptPair,
    /// Score the prompt earned, if it was scored
    pub score: Option<Score>,
    /// 1-based attempt index being prepared
    pub attempt: u32,
    /// Artifact rendered from `prompt`, present only for multimodal refinement
    pub artifact: Option<ArtifactRef>,
}

/// Prompt improvement oracle
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait RefinementOracle: Send + Sync {
    /// Propose a new prompt pair
    ///
    /// # Errors
    /// Returns `OracleError` when the service could not be reached.
    async fn refine(&self, request: &RefinementRequest) -> Result<Option<PromptPair>, OracleError>;
}

/// Wraps suggestions in a fixed text containing `{{DESCRIPTION}}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate(String);

impl PromptTemplate {
    /// Placeholder replaced by the suggestion
    pub const PLACEHOLDER: &'static str = "{{DESCRIPTION}}";

    /// Create a template
    #[must_use]
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    /// Substitute a description
    ///
    /// A template without the placeholder returns the description as is.
    #[must_use]
    pub fn apply(&self, description: &str) -> String {
        if self.0.contains(Self::PLACEHOLDER) {
            self.0.replace(Self::PLACEHOLDER, description.trim())
        } else {
            description.to_string()
        }
    }
}

#[derive(Debug, Deserialize)]
struct Suggestion {
    #[serde(default)]
    positive: Option<String>,
    #[serde(default)]
    negative: Option<String>,
}

/// Parse a `{"positive", "negative"}` suggestion from model output
///
/// Tolerates surrounding prose and Markdown code fences. Missing or blank
/// fields fall back to `prior`. Returns `None` when no JSON object is
/// present or it cannot be decoded.
#[must_use]
pub fn parse_suggestion(raw: &str, prior: &PromptPair) -> Option<PromptPair> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }

    let suggestion: Suggestion = match serde_json::from_str(&text[start..=end]) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, raw = %truncate(text, 120), "unparseable refinement");
            return None;
        }
    };

    let pick = |value: Option<String>, fallback: &str| {
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| fallback.to_string())
    };

    Some(PromptPair::new(
        pick(suggestion.positive, &prior.positive),
        pick(suggestion.negative, &prior.negative),
    ))
}

const SYSTEM_MESSAGE: &str = "You refine visual art prompts for image generation models. \
You must refine BOTH a positive and a negative prompt. \
Make small, precise improvements only. \
Keep each under 80 words. \
Return STRICT JSON with keys 'positive' and 'negative' and nothing else.";

/// Refiner backed by an Ollama-compatible server
pub struct OllamaRefiner {
    client: reqwest::Client,
    base_url: Url,
    model: String,
    retry: RetryPolicy,
    template: Option<PromptTemplate>,
}

impl OllamaRefiner {
    /// Create new refiner
    ///
    /// # Arguments
    /// * `base_url` - Server root (e.g. `http://localhost:11434`)
    /// * `model` - Model name sent with every request
    ///
    /// # Errors
    /// Returns `InvalidEndpoint` if the URL does not parse.
    pub fn new(base_url: &str, model: impl Into<String>) -> Result<Self, OracleError> {
        let mut base = base_url.trim_end_matches('/').to_string();
        base.push('/');
        let base_url = Url::parse(&base).map_err(|e| OracleError::InvalidEndpoint(format!("{base_url}: {e}")))?;
        let client = reqwest::Client::builder().timeout(Duration::from_secs(120)).build()?;
        Ok(Self {
            client,
            base_url,
            model: model.into(),
            retry: RetryPolicy::default(),
            template: None,
        })
    }

    /// Set retry policy
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Wrap positive suggestions in a template
    #[inline]
    #[must_use]
    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = Some(template);
        self
    }

    /// Model name
    #[inline]
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn route(&self, path: &str) -> Result<Url, OracleError> {
        self.base_url
            .join(path)
            .map_err(|e| OracleError::InvalidEndpoint(e.to_string()))
    }

    fn templated(&self, pair: PromptPair) -> PromptPair {
        match &self.template {
            Some(t) => {
                let positive = t.apply(&pair.positive);
                pair.with_positive(positive)
            }
            None => pair,
        }
    }

    async fn post_json(&self, url: Url, payload: &serde_json::Value) -> Result<serde_json::Value, OracleError> {
        let response = self.client.post(url).json(payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::rejected(status.as_u16(), &body));
        }
        response
            .json()
            .await
            .map_err(|e| OracleError::Malformed(e.to_string()))
    }

    async fn refine_with_image(&self, request: &RefinementRequest, artifact: &ArtifactRef) -> Result<Option<String>, OracleError> {
        let bytes = tokio::fs::read(artifact.path()).await?;
        let payload = serde_json::json!({
            "model": self.model,
            "prompt": format!(
                "You are a prompt optimization assistant. Based on this image and the original prompt, \
                 generate a stronger visual prompt.\n\nOriginal Prompt: {}\n\nImproved Prompt:",
                request.prompt.positive
            ),
            "stream": false,
            "images": [BASE64.encode(bytes)],
        });
        let url = self.route("api/generate")?;

        let data = self
            .retry
            .run("multimodal refinement", |_| self.post_json(url.clone(), &payload))
            .await?;
        let text = data
            .get("response")
            .or_else(|| data.get("text"))
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Ok(text)
    }

    async fn refine_with_chat(&self, request: &RefinementRequest) -> Result<Option<PromptPair>, OracleError> {
        let score = request.score.unwrap_or(Score::ZERO);
        let user_message = format!(
            "Current prompts for round {}.\n\n\
             Scores: total={}, clip={}, aesthetic={}.\n\n\
             Positive prompt:\n{}\n\n\
             Negative prompt:\n{}\n\n\
             Refine BOTH prompts to be clearer and more vivid while preserving the same concept. \
             Return ONLY JSON like:\n{{\"positive\": \"...\", \"negative\": \"...\"}}",
            request.attempt, score.total, score.alignment, score.aesthetic, request.prompt.positive, request.prompt.negative
        );
        let payload = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_MESSAGE },
                { "role": "user", "content": user_message },
            ],
            "stream": false,
        });
        let url = self.route("api/chat")?;

        let data = self
            .retry
            .run("chat refinement", |_| self.post_json(url.clone(), &payload))
            .await?;
        let content = data
            .pointer("/message/content")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        if content.trim().is_empty() {
            tracing::info!(attempt = request.attempt, "empty refinement, keeping prompts");
            return Ok(None);
        }
        Ok(parse_suggestion(content, &request.prompt))
    }
}

#[async_trait]
impl RefinementOracle for OllamaRefiner {
    async fn refine(&self, request: &RefinementRequest) -> Result<Option<PromptPair>, OracleError> {
        if let Some(artifact) = &request.artifact {
            match self.refine_with_image(request, artifact).await {
                Ok(Some(positive)) => {
                    tracing::info!(attempt = request.attempt, "multimodal refinement succeeded");
                    return Ok(Some(self.templated(request.prompt.clone().with_positive(positive))));
                }
                Ok(None) => tracing::warn!(attempt = request.attempt, "multimodal refinement empty, falling back to chat"),
                Err(e) => tracing::warn!(attempt = request.attempt, error = %e, "multimodal refinement failed, falling back to chat"),
            }
        }

        Ok(self.refine_with_chat(request).await?.map(|pair| self.templated(pair)))
    }
}
