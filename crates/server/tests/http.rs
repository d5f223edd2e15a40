//! End-to-end tests against a real listener: echo endpoints, dispatch
//! outcomes (200/422/503/504), and multipart uploads.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use dispatchd::routes;
use dispatchd::state::AppState;
use dispatchd_core::settings::ServerSettings;
use dispatchd_engine::PdfRenderer;

struct StubRenderer {
    pages: usize,
}

impl PdfRenderer for StubRenderer {
    fn render(&self, _pdf: &Path, _out_dir: &Path, _threads: usize) -> anyhow::Result<usize> {
        Ok(self.pages)
    }
}

fn test_settings() -> ServerSettings {
    ServerSettings {
        process_pool: false,
        pdf_worker_count: 2,
        message_task_short_ms: 100,
        message_task_long_ms: 200,
        ..ServerSettings::default()
    }
}

async fn start_server(settings: ServerSettings) -> (String, Arc<AppState>) {
    let state = AppState::init(settings, Arc::new(StubRenderer { pages: 5 }))
        .await
        .expect("state init");
    let app = routes::router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), state)
}

#[tokio::test(flavor = "multi_thread")]
async fn hello_answers_get_and_post() {
    let (base, _state) = start_server(test_settings()).await;
    let client = reqwest::Client::new();

    for method in [reqwest::Method::GET, reqwest::Method::POST] {
        let res = client
            .request(method, format!("{base}/hello"))
            .json(&json!({"data": "abc"}))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["data"], "received data=abc!");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn get_info_requires_the_magic_word() {
    let (base, _state) = start_server(test_settings()).await;
    let client = reqwest::Client::new();

    let ok = client
        .post(format!("{base}/getInfo"))
        .json(&json!({"data": "hello"}))
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), 200);
    let body: Value = ok.json().await.unwrap();
    assert_eq!(body["data"], "received data=hello!");

    let bad = client
        .post(format!("{base}/getInfo"))
        .json(&json!({"data": "nope"}))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 500);
}

#[tokio::test(flavor = "multi_thread")]
async fn message_job_returns_result_synchronously() {
    let (base, _state) = start_server(test_settings()).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{base}/multiThread"))
        .json(&json!({"data": "hi", "jobType": "message"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let body: Value = res.json().await.unwrap();
    let result = &body["data"]["result"];
    assert_eq!(result["workerName"], "messageWorker");
    assert_eq!(result["errCode"], "");
    let data = result["data"].as_str().unwrap();
    assert!(data.starts_with("message job finished ("), "got {data}");
    assert!(
        result["totalElapsedMs"].as_i64().unwrap() >= result["processElapsedMs"].as_i64().unwrap()
    );
    assert!(!body["data"]["id"].as_str().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn message_is_the_default_job_type() {
    let (base, _state) = start_server(test_settings()).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{base}/multiThread"))
        .json(&json!({"data": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["result"]["workerName"], "messageWorker");
}

#[tokio::test(flavor = "multi_thread")]
async fn pdf_job_routes_to_the_pdf_pool() {
    let (base, _state) = start_server(test_settings()).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{base}/multiThread"))
        .json(&json!({"data": "x", "jobType": "pdf2image"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let body: Value = res.json().await.unwrap();
    let result = &body["data"]["result"];
    let worker = result["workerName"].as_str().unwrap();
    assert!(worker.starts_with("pdfWorker"), "got {worker}");
    let data = result["data"].as_str().unwrap();
    assert!(data.ends_with("nPages=5"), "got {data}");
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_job_type_is_rejected_without_enqueue() {
    let (base, state) = start_server(test_settings()).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{base}/multiThread"))
        .json(&json!({"data": "hi", "jobType": "foo"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 422);
    let body: Value = res.json().await.unwrap();
    assert!(
        body["detail"].as_str().unwrap().contains("invalid job type=foo"),
        "got {body}"
    );

    // No job may have touched any queue.
    assert_eq!(state.message_worker.queue().len(), 0);
    for worker in &state.pdf_workers {
        assert_eq!(worker.queue().len(), 0);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn unhealthy_server_refuses_dispatch_traffic() {
    let (base, state) = start_server(test_settings()).await;
    let client = reqwest::Client::new();

    state.mark_unhealthy();
    let res = client
        .post(format!("{base}/multiThread"))
        .json(&json!({"data": "hi", "jobType": "message"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 500);
    // And nothing was enqueued.
    assert_eq!(state.message_worker.queue().len(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn saturated_queue_returns_503_immediately() {
    let settings = ServerSettings {
        message_task_short_ms: 2_000,
        message_task_long_ms: 2_000,
        ..test_settings()
    };
    let (base, state) = start_server(settings).await;
    let client = reqwest::Client::new();

    let submit = |client: reqwest::Client, base: String| async move {
        client
            .post(format!("{base}/multiThread"))
            .json(&json!({"data": "hi", "jobType": "message"}))
            .send()
            .await
            .unwrap()
            .status()
    };

    // Occupy the single worker...
    let _busy = tokio::spawn(submit(client.clone(), base.clone()));
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !state.message_worker.is_running_job() {
        assert!(tokio::time::Instant::now() < deadline, "worker never picked up");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // ...then fill its queue to capacity.
    let mut queued = Vec::new();
    for _ in 0..state.message_worker.queue().capacity() {
        queued.push(tokio::spawn(submit(client.clone(), base.clone())));
    }
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !state.message_worker.queue().is_full() {
        assert!(tokio::time::Instant::now() < deadline, "queue never filled");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // The next submission must be shed, fast.
    let started = tokio::time::Instant::now();
    let res = client
        .post(format!("{base}/multiThread"))
        .json(&json!({"data": "hi", "jobType": "message"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 503);
    assert!(started.elapsed() < Duration::from_millis(500));
    let body: Value = res.json().await.unwrap();
    assert!(
        body["detail"].as_str().unwrap().contains("Service unavailable"),
        "got {body}"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_job_hits_the_deadline_with_504() {
    let settings = ServerSettings {
        // Both variants overshoot the 5 second message deadline.
        message_task_short_ms: 6_500,
        message_task_long_ms: 6_500,
        ..test_settings()
    };
    let (base, _state) = start_server(settings).await;
    let client = reqwest::Client::new();

    let started = tokio::time::Instant::now();
    let res = client
        .post(format!("{base}/multiThread"))
        .json(&json!({"data": "hi", "jobType": "message"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 504);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(5), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(6_000), "returned late: {elapsed:?}");
    let body: Value = res.json().await.unwrap();
    assert!(body["detail"].as_str().unwrap().contains("gateway timeout"));
}

#[tokio::test(flavor = "multi_thread")]
async fn uploads_land_in_a_job_scoped_directory() {
    let out_dir = tempfile::tempdir().unwrap();
    let settings = ServerSettings {
        out_dir: out_dir.path().to_string_lossy().into_owned(),
        ..test_settings()
    };
    let (base, _state) = start_server(settings).await;
    let client = reqwest::Client::new();

    let form = reqwest::multipart::Form::new()
        .text("data", "payload")
        .text("message", "greetings")
        .part(
            "files",
            reqwest::multipart::Part::bytes(b"first file".to_vec()).file_name("notes.txt"),
        )
        .part(
            "files",
            reqwest::multipart::Part::bytes(b"second file".to_vec()).file_name("scan.png"),
        );

    let res = client
        .post(format!("{base}/uploadFiles"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let body: Value = res.json().await.unwrap();
    let result = &body["data"]["result"];
    assert_eq!(result["data"], "payload");
    assert_eq!(result["message"], "greetings");
    assert_eq!(result["nFiles"], 2);

    let job_id = body["data"]["id"].as_str().unwrap();
    let job_dir = out_dir.path().join("uploads").join(job_id);
    assert_eq!(
        std::fs::read(job_dir.join("file-01.txt")).unwrap(),
        b"first file"
    );
    assert_eq!(
        std::fs::read(job_dir.join("file-02.png")).unwrap(),
        b"second file"
    );

    let out_files = result["outFiles"].as_array().unwrap();
    assert_eq!(out_files[0][0], "notes.txt");
    assert!(out_files[0][1].as_str().unwrap().ends_with("file-01.txt"));
}

#[tokio::test(flavor = "multi_thread")]
async fn upload_without_extension_fails_with_500() {
    let out_dir = tempfile::tempdir().unwrap();
    let settings = ServerSettings {
        out_dir: out_dir.path().to_string_lossy().into_owned(),
        ..test_settings()
    };
    let (base, _state) = start_server(settings).await;

    let form = reqwest::multipart::Form::new()
        .text("data", "d")
        .text("message", "m")
        .part(
            "files",
            reqwest::multipart::Part::bytes(b"x".to_vec()).file_name("noextension"),
        );
    let res = reqwest::Client::new()
        .post(format!("{base}/uploadFiles"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 500);
}
