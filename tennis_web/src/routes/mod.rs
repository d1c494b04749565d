mod health;
mod index;
mod jobs;
mod metrics;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub use jobs::{ApiError, JobCreated};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(index::index))
        .route("/health", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/api/jobs", post(jobs::create_job))
        .route(
            "/api/jobs/{id}",
            get(jobs::job_status).delete(jobs::delete_job),
        )
        .route("/api/jobs/{id}/events", get(jobs::job_events))
        .route("/api/jobs/{id}/video", get(jobs::job_video))
        .route("/api/jobs/{id}/download", get(jobs::job_download))
}

#[cfg(test)]
mod tests {
    use crate::{
        build_router,
        config::JobsConfig,
        jobs::{JobSnapshot, JobStatus, JobStore},
        processor::VideoProcessor,
        telemetry::Metrics,
        SharedState,
    };
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        response::Response,
        Router,
    };
    use std::{
        path::Path,
        sync::{mpsc, Arc, Mutex},
        time::Duration,
    };
    use tempfile::TempDir;
    use tennis_annotator::{ModelError, ProcessReport, ProgressObserver, StopReason};
    use tower::ServiceExt;

    const BOUNDARY: &str = "tennis-test-boundary";
    const ANNOTATED: &[u8] = b"annotated video bytes";

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    /// Writes a fixed output file, optionally waiting for the test to let it finish.
    struct FakeProcessor {
        gate: Option<Mutex<mpsc::Receiver<()>>>,
        fail: bool,
    }

    impl VideoProcessor for FakeProcessor {
        fn process(
            &self,
            input_path: &Path,
            output_path: &Path,
            observer: &dyn ProgressObserver,
        ) -> Result<ProcessReport, ModelError> {
            assert!(input_path.is_file());
            if let Some(gate) = &self.gate {
                let _ = gate.lock().unwrap().recv();
            }
            if self.fail {
                return Err(ModelError::LoadFailed("corrupt weights".to_string()));
            }

            observer.on_progress(0.5);
            std::fs::write(output_path, ANNOTATED).unwrap();
            observer.on_progress(1.0);

            Ok(ProcessReport {
                metadata: None,
                expected_frames: 2,
                frames_written: 2,
                output_exists: true,
                stop: StopReason::Exhausted,
            })
        }
    }

    struct TestApp {
        router: Router,
        state: SharedState,
        temp_root: TempDir,
    }

    fn test_app(processor: FakeProcessor) -> Result<TestApp, Box<dyn std::error::Error>> {
        let temp_root = tempfile::tempdir()?;
        let state = SharedState::new(
            Arc::new(processor),
            Arc::new(JobStore::with_temp_root(temp_root.path())),
            JobsConfig::default(),
            Arc::new(Metrics::new()?),
        );
        let router = build_router(state.clone(), 1024 * 1024);
        Ok(TestApp {
            router,
            state,
            temp_root,
        })
    }

    fn instant_processor() -> FakeProcessor {
        FakeProcessor {
            gate: None,
            fail: false,
        }
    }

    fn upload_request(file_name: &str, field: &str) -> Request<Body> {
        let body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n\
             raw video bytes\r\n\
             --{BOUNDARY}--\r\n"
        );
        Request::builder()
            .method("POST")
            .uri("/api/jobs")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn send(router: &Router, request: Request<Body>) -> Response {
        router.clone().oneshot(request).await.unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn create_job(router: &Router, file_name: &str) -> String {
        let response = send(router, upload_request(file_name, "file")).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        json_body(response).await["id"].as_str().unwrap().to_string()
    }

    async fn wait_for_finish(state: &SharedState, id: &str) -> JobSnapshot {
        for _ in 0..500 {
            let snapshot = state.jobs.snapshot(id).unwrap();
            if snapshot.status.is_finished() {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} did not finish", id);
    }

    #[tokio::test]
    async fn test_upload_process_download_delete() -> TestResult {
        let app = test_app(instant_processor())?;
        let id = create_job(&app.router, "match.MP4").await;
        assert_eq!(id.len(), 32);

        let snapshot = wait_for_finish(&app.state, &id).await;
        assert_eq!(snapshot.status, JobStatus::Completed);

        let response = send(&app.router, request("GET", &format!("/api/jobs/{id}"))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let status = json_body(response).await;
        assert_eq!(status["status"], "completed");
        assert_eq!(status["frames_written"], 2);
        assert!(status.get("progress").is_none());

        let response = send(&app.router, request("GET", &format!("/api/jobs/{id}/video"))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
        assert_eq!(response.headers()[header::CONTENT_DISPOSITION], "inline");
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        assert_eq!(&bytes[..], ANNOTATED);

        let response =
            send(&app.router, request("GET", &format!("/api/jobs/{id}/download"))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"processed_video.mp4\""
        );

        let response = send(&app.router, request("DELETE", &format!("/api/jobs/{id}"))).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = send(&app.router, request("GET", &format!("/api/jobs/{id}"))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(std::fs::read_dir(app.temp_root.path())?.count(), 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_input_is_removed_after_processing() -> TestResult {
        let app = test_app(instant_processor())?;
        let id = create_job(&app.router, "rally.avi").await;
        wait_for_finish(&app.state, &id).await;

        let workspace = std::fs::read_dir(app.temp_root.path())?
            .next()
            .ok_or("missing job workspace")??
            .path();
        let files: Vec<String> = std::fs::read_dir(workspace)?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().to_string()))
            .collect::<Result<_, _>>()?;
        assert_eq!(files, vec!["processed_video.mp4".to_string()]);

        Ok(())
    }

    #[tokio::test]
    async fn test_events_stream_ends_with_final_status() -> TestResult {
        let app = test_app(instant_processor())?;
        let id = create_job(&app.router, "serve.mov").await;
        wait_for_finish(&app.state, &id).await;

        let response = send(&app.router, request("GET", &format!("/api/jobs/{id}/events"))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
        let body = String::from_utf8(to_bytes(response.into_body(), usize::MAX).await?.to_vec())?;
        assert!(body.contains("data: {"));
        assert!(body.contains("\"status\":\"completed\""));

        Ok(())
    }

    #[tokio::test]
    async fn test_rejects_unsupported_extension() -> TestResult {
        let app = test_app(instant_processor())?;

        let response = send(&app.router, upload_request("notes.txt", "file")).await;

        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert!(app.state.jobs.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_rejects_missing_file_field() -> TestResult {
        let app = test_app(instant_processor())?;

        let response = send(&app.router, upload_request("match.mp4", "video")).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(app.state.jobs.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() -> TestResult {
        let app = test_app(instant_processor())?;

        for (method, uri) in [
            ("GET", "/api/jobs/missing"),
            ("GET", "/api/jobs/missing/video"),
            ("GET", "/api/jobs/missing/events"),
            ("DELETE", "/api/jobs/missing"),
        ] {
            let response = send(&app.router, request(method, uri)).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{} {}", method, uri);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_unfinished_job_conflicts() -> TestResult {
        let (release, gate) = mpsc::channel();
        let app = test_app(FakeProcessor {
            gate: Some(Mutex::new(gate)),
            fail: false,
        })?;
        let id = create_job(&app.router, "match.mp4").await;

        let response = send(&app.router, request("GET", &format!("/api/jobs/{id}/video"))).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let response = send(&app.router, request("DELETE", &format!("/api/jobs/{id}"))).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        release.send(())?;
        let snapshot = wait_for_finish(&app.state, &id).await;
        assert_eq!(snapshot.status, JobStatus::Completed);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_job_reports_message() -> TestResult {
        let app = test_app(FakeProcessor {
            gate: None,
            fail: true,
        })?;
        let id = create_job(&app.router, "match.mp4").await;

        let snapshot = wait_for_finish(&app.state, &id).await;
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert!(snapshot.message.is_some());

        let response = send(&app.router, request("GET", &format!("/api/jobs/{id}/video"))).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        Ok(())
    }

    #[tokio::test]
    async fn test_health_and_metrics() -> TestResult {
        let app = test_app(instant_processor())?;

        let response = send(&app.router, request("GET", "/health")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "Available");

        send(&app.router, request("GET", "/api/jobs/missing")).await;
        let response = send(&app.router, request("GET", "/metrics")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = String::from_utf8(to_bytes(response.into_body(), usize::MAX).await?.to_vec())?;
        assert!(body.contains("requests_total"));

        let response = send(&app.router, request("GET", "/")).await;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }
}
