//! HTTP stage tests against a local mock server.
//!
//! Covers the three network stages one by one, then a full workflow where
//! the ticket endpoint, the object store and the conversion service are all
//! mocked on the same server.

use bytes::Bytes;
use chrono::Utc;
use geoconvert::pipeline::transfer;
use geoconvert::{
    BlobStoreGateway, ByteUploader, ConversionInvoker, ConversionOutcome, ConversionRequest,
    ConverterConfig, FailureKind, GeoConvertError, HttpConversionInvoker, HttpUploader,
    Orchestrator, RemoteTicketGateway, SpatialFormat, UploadTicket, WorkflowState,
};
use serde_json::json;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use uuid::Uuid;
use wiremock::matchers::{body_json, body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Route library logs to the test harness; `RUST_LOG=geoconvert=debug` to see them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn params() -> geoconvert::ConversionParams {
    request().validate().unwrap()
}

fn request() -> ConversionRequest {
    ConversionRequest {
        source_file_name: "parcels.json".into(),
        declared_mime_type: "application/json".into(),
        input_format: Some(SpatialFormat::GeoJson),
        output_format: Some(SpatialFormat::Csv),
        input_crs: "EPSG:4326".into(),
        output_crs: "EPSG:3857".into(),
        simplification_tolerance: 0,
    }
}

fn invoker(server: &MockServer) -> HttpConversionInvoker {
    HttpConversionInvoker::new(
        reqwest::Client::new(),
        format!("{}/convert", server.uri()),
        Some("http://localhost:3000".into()),
        Duration::from_secs(5),
    )
}

fn fixed_uploader(origin: Option<&str>) -> HttpUploader {
    HttpUploader::new(
        reqwest::Client::new(),
        origin.map(String::from),
        Arc::new(|_: u64| Duration::from_secs(5)),
    )
}

/// Log lines written while the guard from [`CapturedLogs::install`] is alive.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CapturedLogs {
    fn install(&self) -> tracing::subscriber::DefaultGuard {
        let logs = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_writer(move || logs.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

/// Answer one request with `status_line` and a body cut off well short of
/// its declared Content-Length.
async fn truncated_body_server(status_line: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;
        let head = format!(
            "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: 100\r\n\r\n{{\"upl"
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;
    });
    format!("http://{addr}")
}

async fn read_request(socket: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let len = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + len {
                return;
            }
        }
    }
}

// ── Conversion invoker ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_invoke_sends_storage_key_and_returns_download_url() {
    let server = MockServer::start().await;
    let file_id = Uuid::new_v4();
    let key = format!("{file_id}-parcels.json");

    Mock::given(method("POST"))
        .and(path("/convert"))
        .and(header("origin", "http://localhost:3000"))
        .and(body_json(json!({
            "fileId": file_id,
            "fileName": key,
            "outputFormat": "csv",
            "inputFormat": "geojson",
            "inputCRS": "EPSG:4326",
            "outputCRS": "EPSG:3857",
            "simplification": 0
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "downloadUrl": "https://storage.example/out/parcels.csv" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let outcome = invoker(&server).invoke(file_id, &key, &params()).await;

    assert_eq!(
        outcome,
        ConversionOutcome::Success {
            download_url: "https://storage.example/out/parcels.csv".into()
        }
    );
}

#[tokio::test]
async fn test_invoke_domain_error_keeps_traceback_separate() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/convert"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": "bad CRS",
            "traceback": "Traceback (most recent call last):\n  File \"main.py\""
        })))
        .mount(&server)
        .await;

    let outcome = invoker(&server)
        .invoke(Uuid::new_v4(), "k-parcels.json", &params())
        .await;

    match outcome {
        ConversionOutcome::Failure {
            kind,
            error_message,
            diagnostic_detail,
            ..
        } => {
            assert_eq!(kind, FailureKind::Domain);
            assert_eq!(error_message, "bad CRS");
            assert!(diagnostic_detail.unwrap().starts_with("Traceback"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_invoke_non_2xx_is_transport_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/convert"))
        .respond_with(ResponseTemplate::new(500).set_body_string("server exploded"))
        .mount(&server)
        .await;

    let outcome = invoker(&server)
        .invoke(Uuid::new_v4(), "k-parcels.json", &params())
        .await;

    assert_eq!(
        outcome,
        ConversionOutcome::Failure {
            kind: FailureKind::Transport,
            error_message: "Conversion failed: server exploded".into(),
            diagnostic_detail: None,
            status: Some(500),
        }
    );
}

#[tokio::test]
async fn test_invoke_timeout_is_transport_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "downloadUrl": "https://late.example/" }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let invoker = HttpConversionInvoker::new(
        reqwest::Client::new(),
        format!("{}/convert", server.uri()),
        None,
        Duration::from_millis(200),
    );
    let outcome = invoker.invoke(Uuid::new_v4(), "k", &params()).await;

    assert!(matches!(
        outcome,
        ConversionOutcome::Failure {
            kind: FailureKind::Transport,
            status: None,
            ..
        }
    ));
}

// ── Byte transfer ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_upload_puts_bytes_with_content_type() {
    let server = MockServer::start().await;
    let file_id = Uuid::new_v4();
    let ticket = UploadTicket::new(
        file_id,
        "parcels.json",
        format!("{}/geo-uploads/{file_id}-parcels.json?sig=abc", server.uri()),
        Utc::now(),
    );

    Mock::given(method("PUT"))
        .and(path(format!("/geo-uploads/{file_id}-parcels.json")))
        .and(header("content-type", "application/geo+json"))
        .and(header("origin", "http://localhost:3000"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let body = Bytes::from_static(br#"{"type":"FeatureCollection","features":[]}"#);
    fixed_uploader(Some("http://localhost:3000"))
        .put(&ticket, body.clone(), "application/geo+json")
        .await
        .unwrap();

    let received = server.received_requests().await.unwrap();
    assert_eq!(received[0].body, body.to_vec());
}

#[tokio::test]
async fn test_upload_rejection_is_transfer_error() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(403).set_body_string("SignatureDoesNotMatch"))
        .mount(&server)
        .await;

    let ticket = UploadTicket::new(
        Uuid::new_v4(),
        "parcels.json",
        format!("{}/b/k", server.uri()),
        Utc::now(),
    );
    let err = fixed_uploader(None)
        .put(&ticket, Bytes::from_static(b"{}"), "application/json")
        .await
        .unwrap_err();

    assert!(
        matches!(err, GeoConvertError::Transfer { status: Some(403), .. }),
        "{err:?}"
    );
}

#[tokio::test]
async fn test_unreadable_rejection_body_is_logged() {
    let base = truncated_body_server("500 Internal Server Error").await;
    let ticket = UploadTicket::new(
        Uuid::new_v4(),
        "parcels.json",
        format!("{base}/geo-uploads/k"),
        Utc::now(),
    );
    let logs = CapturedLogs::default();
    let _guard = logs.install();

    let err = fixed_uploader(None)
        .put(&ticket, Bytes::from_static(b"{}"), "application/json")
        .await
        .unwrap_err();

    assert!(
        matches!(err, GeoConvertError::Transfer { status: Some(500), .. }),
        "{err:?}"
    );
    assert!(
        logs.contents().contains("Could not read upload rejection body"),
        "{}",
        logs.contents()
    );
}

#[tokio::test]
async fn test_fetch_result_writes_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/out/parcels.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string("id,geometry\n1,POINT (0 0)\n"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("nested").join("parcels.csv");
    let written = transfer::fetch_result(
        &reqwest::Client::new(),
        &format!("{}/out/parcels.csv", server.uri()),
        &target,
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    assert_eq!(written, 26);
    assert_eq!(
        std::fs::read_to_string(&target).unwrap(),
        "id,geometry\n1,POINT (0 0)\n"
    );
    assert!(!dir.path().join("nested").join("parcels.csv.part").exists());
}

#[tokio::test]
async fn test_fetch_result_404_is_download_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("missing.csv");
    let err = transfer::fetch_result(
        &reqwest::Client::new(),
        &format!("{}/out/missing.csv", server.uri()),
        &target,
        Duration::from_secs(5),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, GeoConvertError::DownloadFailed { .. }), "{err:?}");
    assert!(!target.exists());
}

// ── Remote ticket gateway ────────────────────────────────────────────────────

#[tokio::test]
async fn test_remote_gateway_parses_ticket() {
    let server = MockServer::start().await;
    let file_id = Uuid::new_v4();
    let expires_at = Utc::now() + chrono::Duration::minutes(15);

    Mock::given(method("POST"))
        .and(path("/api/convert"))
        .and(body_json(json!({ "fileName": "parcels.json" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uploadUrl": "https://storage.example/put",
            "fileId": file_id,
            "fileName": format!("{file_id}-parcels.json"),
            "expiresAt": expires_at,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = RemoteTicketGateway::new(
        reqwest::Client::new(),
        format!("{}/api/convert", server.uri()),
        Duration::from_secs(5),
    );
    let ticket = gateway.issue_upload_ticket("parcels.json").await.unwrap();

    assert_eq!(ticket.file_id, file_id);
    assert_eq!(ticket.storage_key, format!("{file_id}-parcels.json"));
    assert_eq!(ticket.write_url, "https://storage.example/put");
    assert_eq!(ticket.expires_at, expires_at);
    assert_eq!(
        ticket.expires_at - ticket.issued_at,
        chrono::Duration::seconds(900)
    );
}

#[tokio::test]
async fn test_remote_gateway_500_uses_endpoint_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_json(json!({ "error": "Failed to generate upload URL" })),
        )
        .mount(&server)
        .await;

    let gateway = RemoteTicketGateway::new(
        reqwest::Client::new(),
        format!("{}/api/convert", server.uri()),
        Duration::from_secs(5),
    );
    let err = gateway.issue_upload_ticket("parcels.json").await.unwrap_err();

    assert_eq!(
        err.user_message(),
        "Failed to get upload URL: Failed to generate upload URL"
    );
}

#[tokio::test]
async fn test_remote_gateway_rejects_mismatched_storage_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uploadUrl": "https://storage.example/put",
            "fileId": Uuid::new_v4(),
            "fileName": "parcels.json",
        })))
        .mount(&server)
        .await;

    let gateway = RemoteTicketGateway::new(
        reqwest::Client::new(),
        format!("{}/api/convert", server.uri()),
        Duration::from_secs(5),
    );
    let err = gateway.issue_upload_ticket("parcels.json").await.unwrap_err();

    assert!(matches!(err, GeoConvertError::TicketIssuance { .. }));
    assert!(err.diagnostic().unwrap().contains("does not start with"));
}

#[tokio::test]
async fn test_remote_gateway_logs_unreadable_body() {
    let base = truncated_body_server("200 OK").await;
    let gateway = RemoteTicketGateway::new(
        reqwest::Client::new(),
        format!("{base}/api/convert"),
        Duration::from_secs(5),
    );
    let logs = CapturedLogs::default();
    let _guard = logs.install();

    let err = gateway.issue_upload_ticket("parcels.json").await.unwrap_err();

    assert!(matches!(err, GeoConvertError::TicketIssuance { .. }), "{err:?}");
    assert!(
        logs.contents().contains("Could not read ticket endpoint response"),
        "{}",
        logs.contents()
    );
}

// ── Full workflow over HTTP ──────────────────────────────────────────────────

#[tokio::test]
async fn test_end_to_end_over_http() {
    init_tracing();
    let server = MockServer::start().await;
    let file_id = Uuid::new_v4();
    let key = format!("{file_id}-parcels.json");

    Mock::given(method("POST"))
        .and(path("/api/convert"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uploadUrl": format!("{}/geo-uploads/{key}?X-Goog-Signature=abc", server.uri()),
            "fileId": file_id,
            "fileName": key,
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/geo-uploads/{key}")))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/convert"))
        .and(body_partial_json(json!({ "fileId": file_id, "fileName": key })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "downloadUrl": "https://storage.example/out/parcels.csv" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = ConverterConfig::builder()
        .ticket_endpoint(format!("{}/api/convert", server.uri()))
        .conversion_endpoint(format!("{}/convert", server.uri()))
        .build()
        .unwrap();
    let orchestrator = Orchestrator::from_config(&config).unwrap();

    let report = orchestrator
        .convert(&request(), Bytes::from_static(b"{\"type\":\"FeatureCollection\"}"))
        .await;

    assert_eq!(report.state(), WorkflowState::Completed, "{:?}", report.error());
    assert_eq!(report.file_id, Some(file_id));
    assert_eq!(report.storage_key.as_deref(), Some(key.as_str()));
    assert_eq!(
        report.download_url(),
        Some("https://storage.example/out/parcels.csv")
    );
}

#[tokio::test]
async fn test_convert_file_reads_name_and_type_from_disk() {
    init_tracing();
    let server = MockServer::start().await;
    let file_id = Uuid::new_v4();
    let key = format!("{file_id}-roads.geojson");

    Mock::given(method("POST"))
        .and(path("/api/convert"))
        .and(body_json(json!({ "fileName": "roads.geojson" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uploadUrl": format!("{}/geo-uploads/{key}", server.uri()),
            "fileId": file_id,
            "fileName": key,
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(header("content-type", "application/geo+json"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/convert"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "error": "bad CRS" })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("roads.geojson");
    std::fs::write(&file, br#"{"type":"FeatureCollection","features":[]}"#).unwrap();

    let config = ConverterConfig::builder()
        .ticket_endpoint(format!("{}/api/convert", server.uri()))
        .conversion_endpoint(format!("{}/convert", server.uri()))
        .build()
        .unwrap();
    let mut req = request();
    req.source_file_name = String::new();
    req.declared_mime_type = String::new();

    let report = geoconvert::convert_file(&file, req, &config).await.unwrap();

    assert_eq!(
        report.history,
        vec![
            WorkflowState::Idle,
            WorkflowState::AwaitingTicket,
            WorkflowState::Uploading,
            WorkflowState::Converting,
            WorkflowState::Failed,
        ]
    );
    assert_eq!(report.status_line(), "Error during conversion: bad CRS");
}
