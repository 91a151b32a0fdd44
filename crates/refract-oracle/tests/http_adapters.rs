//! HTTP adapter tests against mock servers

use refract_candidate::{ArtifactRef, JobIdentity, PromptPair, Score};
use refract_oracle::{
    HttpSynthesisBackend, OllamaRefiner, OracleError, OutputWatcher, PromptTemplate, RefinementOracle, RefinementRequest,
    RetryPolicy, SynthesisBackend, SynthesisJob,
};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn job() -> SynthesisJob {
    SynthesisJob::new(
        PromptPair::new("copper owl on a circuit board", "blurry"),
        JobIdentity::new("owl_b1_r1_v1", 77),
        512,
    )
}

fn request(artifact: Option<ArtifactRef>) -> RefinementRequest {
    RefinementRequest {
        prompt: PromptPair::new("copper owl", "blurry"),
        score: Some(Score {
            total: 5.5,
            alignment: 0.5,
            aesthetic: 6.0,
        }),
        attempt: 2,
        artifact,
    }
}

#[tokio::test]
async fn submit_posts_graph_under_prompt_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/prompt"))
        .and(body_partial_json(json!({
            "prompt": { "7": { "inputs": { "filename_prefix": "owl_b1_r1_v1" } } }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "prompt_id": "abc" })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = HttpSynthesisBackend::new(&format!("{}/prompt", server.uri()), OutputWatcher::new("/tmp")).unwrap();
    backend.submit(&job()).await.unwrap();
}

#[tokio::test]
async fn submit_surfaces_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(500).set_body_string("queue full"))
        .mount(&server)
        .await;

    let backend = HttpSynthesisBackend::new(&format!("{}/prompt", server.uri()), OutputWatcher::new("/tmp")).unwrap();
    let err = backend.submit(&job()).await.unwrap_err();
    assert!(matches!(err, OracleError::Rejected { status: 500, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn clear_queue_hits_sibling_route() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/queue/clear"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let backend = HttpSynthesisBackend::new(&format!("{}/prompt", server.uri()), OutputWatcher::new("/tmp")).unwrap();
    backend.clear_queue().await.unwrap();
}

#[tokio::test]
async fn chat_refinement_parses_pair() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({ "model": "llama3", "stream": false })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": {
                "role": "assistant",
                "content": "```json\n{\"positive\": \"copper owl, rim light\", \"negative\": \"blurry, noisy\"}\n```"
            }
        })))
        .mount(&server)
        .await;

    let refiner = OllamaRefiner::new(&server.uri(), "llama3").unwrap();
    let pair = refiner.refine(&request(None)).await.unwrap().unwrap();
    assert_eq!(pair, PromptPair::new("copper owl, rim light", "blurry, noisy"));
}

#[tokio::test]
async fn chat_refinement_applies_template() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": { "content": "{\"positive\": \"owl\"}" }
        })))
        .mount(&server)
        .await;

    let refiner = OllamaRefiner::new(&server.uri(), "llama3")
        .unwrap()
        .with_template(PromptTemplate::new("studio photo of {{DESCRIPTION}}"));
    let pair = refiner.refine(&request(None)).await.unwrap().unwrap();
    assert_eq!(pair.positive, "studio photo of owl");
    assert_eq!(pair.negative, "blurry");
}

#[tokio::test]
async fn malformed_chat_output_is_no_suggestion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": { "content": "I think the prompt is already great." }
        })))
        .mount(&server)
        .await;

    let refiner = OllamaRefiner::new(&server.uri(), "llama3").unwrap();
    assert!(refiner.refine(&request(None)).await.unwrap().is_none());
}

#[tokio::test]
async fn multimodal_refinement_sends_image() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("owl.png");
    std::fs::write(&image, b"\x89PNG fake").unwrap();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(json!({ "images": ["iVBORyBmYWtl"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "  brass owl, volumetric light  " })))
        .expect(1)
        .mount(&server)
        .await;

    let refiner = OllamaRefiner::new(&server.uri(), "llava").unwrap();
    let pair = refiner
        .refine(&request(Some(ArtifactRef::new(&image))))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pair.positive, "brass owl, volumetric light");
    assert_eq!(pair.negative, "blurry");
}

#[tokio::test]
async fn multimodal_failure_falls_back_to_chat() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("owl.png");
    std::fs::write(&image, b"png").unwrap();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": { "content": "{\"positive\": \"fallback owl\", \"negative\": \"blurry\"}" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let refiner = OllamaRefiner::new(&server.uri(), "llava")
        .unwrap()
        .with_retry(RetryPolicy::new(2, Duration::from_millis(10)));
    let pair = refiner
        .refine(&request(Some(ArtifactRef::new(&image))))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pair.positive, "fallback owl");
}
