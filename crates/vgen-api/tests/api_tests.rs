//! API integration tests.
//!
//! The router runs against in-memory stores and fake external services.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use vgen_api::{create_router, ApiConfig, AppState, BucketNames};
use vgen_models::{JobId, JobStatus, TtsStatus};
use vgen_worker::testing::{FakeArtifactStore, FakeSpeech, Harness, HarnessBuilder};
use vgen_worker::CompositionDefaults;

struct TestApp {
    router: Router,
    state: AppState,
    harness: Harness,
    _dir: TempDir,
}

fn test_app() -> TestApp {
    test_app_with(|builder| builder)
}

fn test_app_with(configure: impl FnOnce(HarnessBuilder) -> HarnessBuilder) -> TestApp {
    let dir = TempDir::new().unwrap();
    let harness = configure(Harness::builder(dir.path())).build();

    let config = ApiConfig {
        public_base_url: "http://api.test".to_string(),
        ..Default::default()
    };
    let state = AppState::from_parts(
        config,
        harness.repos.clone(),
        harness.speech.clone(),
        harness.store.clone(),
        BucketNames {
            audio: "video-gen-audio".to_string(),
            video: "video-gen-videos".to_string(),
        },
        Arc::clone(&harness.ctx),
        CompositionDefaults::default(),
    );
    let router = create_router(state.clone(), None);

    TestApp {
        router,
        state,
        harness,
        _dir: dir,
    }
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("DELETE")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    /// Poll a job until it reaches a terminal status.
    async fn wait_for_terminal(&self, job_id: &str) -> Value {
        for _ in 0..200 {
            let (status, body) = self.get(&format!("/api/video/jobs/{}", job_id)).await;
            assert_eq!(status, StatusCode::OK);
            if matches!(
                body["status"].as_str(),
                Some("completed" | "failed" | "cancelled")
            ) {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} did not finish", job_id);
    }

    async fn job_count(&self) -> u64 {
        let (_, body) = self.get("/api/video/jobs").await;
        body["pagination"]["total"].as_u64().unwrap()
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = test_app();
    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_ready_reports_executor_state() {
    let app = test_app();
    let (status, body) = app.get("/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
    assert_eq!(body["checks"]["store"]["status"], "ok");
    assert_eq!(body["queueDepth"], 0);

    app.state.executor.shutdown().await;
    let (status, body) = app.get("/ready").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "degraded");
}

#[tokio::test]
async fn test_render_job_completes() {
    let app = test_app();
    let (status, body) = app
        .post("/api/video/render", json!({ "compositionId": "HelloWorld" }))
        .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "pending");
    let job_id = body["jobId"].as_str().unwrap().to_string();
    let output = body["outputLocation"].as_str().unwrap();
    assert!(output.ends_with(".mp4"));
    assert!(body["url"].as_str().unwrap().starts_with(&format!(
        "http://api.test/api/video/files/{}/HelloWorld-",
        job_id
    )));

    let job = app.wait_for_terminal(&job_id).await;
    assert_eq!(job["status"], "completed");
    assert_eq!(job["progress"], 100);
    assert_eq!(job["compositionId"], "HelloWorld");
    // Default props are applied when none are given
    assert_eq!(job["parameters"]["titleText"], "Welcome");
    let url = job["url"].as_str().unwrap();
    assert!(url.starts_with("http://storage.test/video-gen-videos/videos/"));
    assert_eq!(job["outputLocation"].as_str(), Some(url));
    assert_eq!(app.harness.store.object_count(), 1);
}

#[tokio::test]
async fn test_render_defaults_composition() {
    let app = test_app();
    let (status, body) = app.post("/api/video/render", json!({})).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let job_id = body["jobId"].as_str().unwrap().to_string();
    let job = app.wait_for_terminal(&job_id).await;
    assert_eq!(job["compositionId"], "HelloWorld");
}

#[tokio::test]
async fn test_render_rejects_bad_input() {
    let app = test_app();

    for body in [
        json!({ "outputLocation": "/etc/cron.d/job.mp4" }),
        json!({ "outputLocation": "../escape.mp4" }),
        json!({ "compositionId": "../HelloWorld" }),
        json!({ "parameters": [1, 2, 3] }),
        json!({ "parameters": { "durationInFrames": 0 } }),
    ] {
        let (status, response) = app.post("/api/video/render", body.clone()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{} -> {}", body, response);
        assert!(response["detail"].is_string());
    }
    assert_eq!(app.job_count().await, 0);
}

#[tokio::test]
async fn test_render_unknown_composition_fails_job() {
    let app = test_app();
    let (_, body) = app
        .post("/api/video/render", json!({ "compositionId": "Missing" }))
        .await;
    let job_id = body["jobId"].as_str().unwrap().to_string();
    let admitted_url = body["url"].clone();

    let job = app.wait_for_terminal(&job_id).await;
    assert_eq!(job["status"], "failed");
    assert!(job["error"].as_str().unwrap().contains("Missing"));
    // The url is derived from outputLocation whatever the status
    assert_eq!(job["url"], admitted_url);
}

#[tokio::test]
async fn test_generate_with_audio_requires_text() {
    let app = test_app();

    for body in [json!({}), json!({ "text": "   " })] {
        let (status, response) = app.post("/api/video/generate-with-audio", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(response["detail"].as_str().unwrap().contains("Text is required"));
    }
    assert_eq!(app.job_count().await, 0);
    assert_eq!(
        app.harness
            .speech
            .calls
            .load(std::sync::atomic::Ordering::SeqCst),
        0
    );
}

#[tokio::test]
async fn test_generate_with_audio_completes() {
    let app = test_app();
    let (status, body) = app
        .post(
            "/api/video/generate-with-audio",
            json!({ "text": "Hello there", "lang": "en", "outputLocation": "promo/hello.mp4" }),
        )
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body["outputLocation"]
        .as_str()
        .unwrap()
        .ends_with("promo/hello.mp4"));

    let job_id = body["jobId"].as_str().unwrap().to_string();
    let job = app.wait_for_terminal(&job_id).await;
    assert_eq!(job["status"], "completed");
    assert_eq!(job["narration"]["text"], "Hello there");
    // 5.03s of probed audio at 30 fps
    assert_eq!(job["parameters"]["durationInFrames"], 151);
    assert_eq!(
        job["parameters"]["audioUrl"],
        "http://speech.test/audio/speech-0.mp3"
    );
}

#[tokio::test]
async fn test_get_unknown_job_is_404() {
    let app = test_app();
    let (status, body) = app.get("/api/video/jobs/does-not-exist").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Not found: Job not found");

    let (status, _) = app.delete("/api/video/jobs/does-not-exist").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_removes_record_when_artifact_delete_fails() {
    let app = test_app_with(|b| b.store(FakeArtifactStore::failing_deletes()));
    let (_, body) = app.post("/api/video/render", json!({})).await;
    let job_id = body["jobId"].as_str().unwrap().to_string();
    let job = app.wait_for_terminal(&job_id).await;
    assert_eq!(job["status"], "completed");

    let (status, body) = app.delete(&format!("/api/video/jobs/{}", job_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(app.harness.store.object_count(), 1);

    let (status, _) = app.get(&format!("/api/video/jobs/{}", job_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_jobs_sharing_output_name_keep_separate_files() {
    let app = test_app_with(|b| b.store(FakeArtifactStore::failing_uploads()));
    let mut ids = Vec::new();
    for _ in 0..2 {
        let (status, body) = app
            .post("/api/video/render", json!({ "outputLocation": "same.mp4" }))
            .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        ids.push(body["jobId"].as_str().unwrap().to_string());
    }
    let first = app.wait_for_terminal(&ids[0]).await;
    let second = app.wait_for_terminal(&ids[1]).await;
    assert_eq!(first["status"], "completed");
    assert_eq!(second["status"], "completed");

    let first_path = first["outputLocation"].as_str().unwrap().to_string();
    let second_path = second["outputLocation"].as_str().unwrap().to_string();
    assert_ne!(first_path, second_path);
    assert!(first["url"].as_str().unwrap().contains(&ids[0]));

    let (status, _) = app.delete(&format!("/api/video/jobs/{}", ids[1])).await;
    assert_eq!(status, StatusCode::OK);
    let second_path = std::path::Path::new(&second_path);
    assert!(!second_path.exists());
    assert!(!second_path.parent().unwrap().exists());

    let (status, job) = app.get(&format!("/api/video/jobs/{}", ids[0])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["status"], "completed");
    assert!(std::path::Path::new(&first_path).exists());
}

#[tokio::test]
async fn test_delete_removes_published_artifact() {
    let app = test_app();
    let (_, body) = app.post("/api/video/render", json!({})).await;
    let job_id = body["jobId"].as_str().unwrap().to_string();
    app.wait_for_terminal(&job_id).await;
    assert_eq!(app.harness.store.object_count(), 1);

    let (status, _) = app.delete(&format!("/api/video/jobs/{}", job_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.harness.store.object_count(), 0);
    assert!(app
        .harness
        .repos
        .jobs
        .get(&JobId::from_string(job_id))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_list_jobs_paginates_and_filters() {
    let app = test_app();
    let mut ids = Vec::new();
    for _ in 0..3 {
        let (_, body) = app
            .post("/api/video/render", json!({ "compositionId": "OnlyLogo" }))
            .await;
        ids.push(body["jobId"].as_str().unwrap().to_string());
    }
    for id in &ids {
        app.wait_for_terminal(id).await;
    }

    let (status, body) = app.get("/api/video/jobs?page=1&limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"].as_array().unwrap().len(), 2);
    assert_eq!(body["pagination"]["total"], 3);
    assert_eq!(body["pagination"]["pages"], 2);

    let (_, body) = app.get("/api/video/jobs?page=2&limit=2").await;
    assert_eq!(body["items"].as_array().unwrap().len(), 1);

    let (_, body) = app.get("/api/video/jobs?status=failed").await;
    assert_eq!(body["pagination"]["total"], 0);

    let (status, _) = app.get("/api/video/jobs?status=done").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_submit_after_shutdown_marks_job_failed() {
    let app = test_app();
    app.state.executor.shutdown().await;

    let (status, _) = app.post("/api/video/render", json!({})).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let page = app
        .harness
        .repos
        .jobs
        .list(Default::default())
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].status, JobStatus::Failed);
}

#[tokio::test]
async fn test_tts_generate_and_history() {
    let app = test_app();
    let (status, body) = app
        .post("/api/tts/generate", json!({ "text": "Bonjour", "lang": "fr" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["lang"], "fr");
    let file_id = body["fileId"].as_str().unwrap().to_string();

    let (status, body) = app.get(&format!("/api/tts/{}", file_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["text"], "Bonjour");

    let (_, body) = app.get("/api/tts/history").await;
    assert_eq!(body["pagination"]["total"], 1);
    assert_eq!(body["items"][0]["fileId"], file_id.as_str());

    let (status, body) = app.delete(&format!("/api/tts/{}", file_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(
        app.harness.speech.deleted.lock().unwrap().as_slice(),
        ["speech-0.mp3".to_string()]
    );

    let (status, _) = app.get(&format!("/api/tts/{}", file_id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_tts_requires_text() {
    let app = test_app();
    let (status, _) = app.post("/api/tts/generate", json!({ "lang": "en" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = app.get("/api/tts/history").await;
    assert_eq!(body["pagination"]["total"], 0);
}

#[tokio::test]
async fn test_tts_failure_is_recorded() {
    let app = test_app_with(|b| b.speech(FakeSpeech::failing("engine crashed")));
    let (status, body) = app
        .post("/api/tts/generate", json!({ "text": "Hello" }))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["detail"].is_string());

    let page = app.harness.repos.tts.list(Default::default()).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].status, TtsStatus::Failed);
    assert!(page.items[0].file_id.starts_with("failed-"));
}

#[tokio::test]
async fn test_storage_urls() {
    let app = test_app();
    let (status, body) = app.get("/api/storage/url").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["storageUrl"], "http://storage.test");
    assert_eq!(body["videoUrl"], "http://storage.test/video-gen-videos");
    assert_eq!(body["audioBucket"], "video-gen-audio");
}

#[tokio::test]
async fn test_security_headers_and_request_id() {
    let app = test_app();
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("X-Request-ID", "req-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let headers = response.headers();
    assert_eq!(headers["x-request-id"], "req-123");
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
}
