//! HTTP tests: a real axum server on an ephemeral port, driven with reqwest.

#![cfg(feature = "server")]

mod common;

use axum::routing::post;
use axum::{Json, Router};
use common::*;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use workorder_intake::{HttpWebhook, IntakeConfig, IntakePipeline, OcrEngine};

struct TestServer {
    base: String,
    _tmp: tempfile::TempDir,
}

/// Bind first so `public_base_url` can point at the real port.
async fn start(
    text: &str,
    ocr: Arc<dyn OcrEngine>,
    customize: impl FnOnce(IntakePipeline) -> IntakePipeline,
) -> TestServer {
    start_with(text, ocr, |c| c, customize).await
}

async fn start_with(
    text: &str,
    ocr: Arc<dyn OcrEngine>,
    configure: impl FnOnce(IntakeConfig) -> IntakeConfig,
    customize: impl FnOnce(IntakePipeline) -> IntakePipeline,
) -> TestServer {
    let tmp = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base = format!("http://{addr}");

    let config = configure(IntakeConfig {
        public_base_url: format!("{base}/temporary/"),
        ..test_config(tmp.path())
    });
    let pipeline = Arc::new(customize(pipeline(config, FakePdf::new(text, 1), ocr)));
    tokio::spawn(workorder_intake::server::serve(
        listener,
        pipeline,
        std::future::pending(),
    ));
    TestServer { base, _tmp: tmp }
}

fn pdf_form(name: &str, bytes: Vec<u8>) -> Form {
    let part = Part::bytes(bytes)
        .file_name(name.to_string())
        .mime_str("application/pdf")
        .unwrap();
    Form::new().part("file", part)
}

async fn post_form(url: &str, form: Form) -> (StatusCode, Value) {
    let resp = reqwest::Client::new()
        .post(url)
        .multipart(form)
        .send()
        .await
        .unwrap();
    let status = resp.status();
    (status, resp.json().await.unwrap())
}

/// A stand-in webhook receiver that records every JSON body it gets.
async fn capture_server() -> (SocketAddr, Arc<Mutex<Vec<Value>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let app = Router::new().route(
        "/hook",
        post(move |Json(body): Json<Value>| {
            let sink = sink.clone();
            async move {
                sink.lock().unwrap().push(body);
                Json(json!({ "received": true }))
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });
    (addr, seen)
}

/// A webhook receiver that answers only after `delay`.
async fn stalled_server(delay: Duration) -> SocketAddr {
    let app = Router::new().route(
        "/hook",
        post(move || async move {
            tokio::time::sleep(delay).await;
            Json(json!({ "received": true }))
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });
    addr
}

#[tokio::test]
async fn health_check_is_healthy() {
    let srv = start("CBRE", FixedOcr::new(&[]), |p| p).await;
    let body: Value = reqwest::get(format!("{}/health_check", srv.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({ "status": "healthy" }));
}

#[tokio::test]
async fn upload_returns_created_and_files_are_served() {
    let srv = start("Chestertons branch", FixedOcr::new(&["Chestertons"]), |p| p).await;
    let bytes = pdf_bytes("served");

    let (status, body) = post_form(
        &format!("{}/upload", srv.base),
        pdf_form("job.pdf", bytes.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["message"], "File processed successfully");
    assert_eq!(body["company_name"], "Chestertons");
    let file_url = body["file_url"].as_str().unwrap();
    assert_eq!(
        file_url,
        format!("{}/temporary/Chestertons/Chestertons_processed.pdf", srv.base)
    );
    assert_eq!(body["image_urls"].as_array().unwrap().len(), 1);

    let served = reqwest::get(file_url).await.unwrap();
    assert_eq!(served.status(), StatusCode::OK);
    assert_eq!(served.bytes().await.unwrap().as_ref(), bytes.as_slice());

    let annotated = body["annotated_image_url"].as_str().unwrap();
    let png = reqwest::get(annotated).await.unwrap().bytes().await.unwrap();
    assert!(image::load_from_memory(&png).is_ok());
}

#[tokio::test]
async fn non_pdf_upload_is_rejected() {
    let srv = start("CBRE", FixedOcr::new(&[]), |p| p).await;
    let (status, body) = post_form(
        &format!("{}/upload", srv.base),
        pdf_form("notes.txt", b"hello".to_vec()),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Only PDF files are allowed.");
}

#[tokio::test]
async fn missing_file_part_is_rejected() {
    let srv = start("CBRE", FixedOcr::new(&[]), |p| p).await;
    let form = Form::new().text("note", "no file here");
    let (status, body) = post_form(&format!("{}/upload", srv.base), form).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "No file part");
}

#[tokio::test]
async fn unknown_company_is_client_error() {
    let srv = start("Quarterly statement", FixedOcr::new(&[]), |p| p).await;
    let (status, body) = post_form(
        &format!("{}/upload", srv.base),
        pdf_form("q.pdf", pdf_bytes("q")),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "No valid company name found in the PDF");
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn extract_endpoint_returns_record_and_notifies_webhook() {
    let (hook_addr, seen) = capture_server().await;
    let extractor = FakeExtractor::returning(json!({ "Job Ref": "77", "Priority": "P2" }));
    let srv = start("Cluttons LLP", FixedOcr::new(&["Cluttons", "P2"]), move |p| {
        p.with_extractor(extractor)
            .with_webhook(Arc::new(HttpWebhook::new(format!("http://{hook_addr}/hook"))))
    })
    .await;

    let (status, body) = post_form(
        &format!("{}/upload/extract", srv.base),
        pdf_form("c.pdf", pdf_bytes("c")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["result"]["Job Ref"], "77");
    assert_eq!(body["result"]["file_path"], body["file_url"]);
    assert_eq!(body["dispatch_errors"], json!([]));

    let delivered = seen.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0]["Priority"], "P2");
    assert_eq!(delivered[0]["annotated_image_url"], body["annotated_image_url"]);
}

#[tokio::test]
async fn extract_endpoint_fails_when_ocr_is_down() {
    let srv = start("Cluttons", Arc::new(FailingOcr), |p| p).await;
    let (status, body) = post_form(
        &format!("{}/upload/extract", srv.base),
        pdf_form("c.pdf", pdf_bytes("c")),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "Failed to process file");
}

#[tokio::test]
async fn webhook_forwarder_relays_payload() {
    let (hook_addr, seen) = capture_server().await;
    let srv = start("CBRE", FixedOcr::new(&[]), move |p| {
        p.with_webhook(Arc::new(HttpWebhook::new(format!("http://{hook_addr}/hook"))))
    })
    .await;

    let resp = reqwest::Client::new()
        .post(format!("{}/webhook", srv.base))
        .json(&json!({ "job": 5 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Data successfully forwarded to webhook");
    assert_eq!(body["webhook_response"], json!({ "received": true }));
    assert_eq!(*seen.lock().unwrap(), [json!({ "job": 5 })]);
}

#[tokio::test]
async fn webhook_forwarder_without_target_fails() {
    let srv = start("CBRE", FixedOcr::new(&[]), |p| p).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/webhook", srv.base))
        .json(&json!({ "job": 5 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Failed to send data to webhook");
}

#[tokio::test]
async fn webhook_forwarder_gives_up_on_stalled_target() {
    let hook_addr = stalled_server(Duration::from_secs(30)).await;
    let srv = start_with(
        "CBRE",
        FixedOcr::new(&[]),
        |c| IntakeConfig {
            dispatch_timeout_secs: 1,
            ..c
        },
        move |p| p.with_webhook(Arc::new(HttpWebhook::new(format!("http://{hook_addr}/hook")))),
    )
    .await;

    let started = Instant::now();
    let resp = reqwest::Client::new()
        .post(format!("{}/webhook", srv.base))
        .json(&json!({ "job": 9 }))
        .send()
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Failed to send data to webhook");
    assert!(body["error"].as_str().unwrap().contains("exceeded 1s"));
}
