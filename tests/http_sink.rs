//! HTTP object-store client against an in-process fake store.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use camera_relay::upload::UploadConfig;
use camera_relay::{
    sink_from_config, Destination, HttpObjectStore, Pipeline, PipelineEvent, StubDevice,
    UploadErrorKind, UploadSink,
};

#[derive(Debug)]
struct CapturedRequest {
    request_line: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl CapturedRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Accept one request, reply with `status` plus `extra_headers` and `body`.
fn serve_once(
    status: &'static str,
    extra_headers: &'static str,
    body: &'static str,
) -> (String, JoinHandle<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake store");
    let addr = listener.local_addr().expect("local addr");
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("read timeout");
        let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));

        let mut request_line = String::new();
        reader.read_line(&mut request_line).expect("request line");
        let mut headers = Vec::new();
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).expect("header line");
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((key, value)) = line.split_once(':') {
                headers.push((key.trim().to_string(), value.trim().to_string()));
            }
        }
        let length = headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.parse::<usize>().ok())
            .unwrap_or(0);
        let mut body_bytes = vec![0u8; length];
        reader.read_exact(&mut body_bytes).expect("body");

        let response = format!(
            "HTTP/1.1 {}\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            extra_headers,
            body.len(),
            body
        );
        let mut stream = stream;
        stream.write_all(response.as_bytes()).expect("write response");
        stream.flush().expect("flush");

        CapturedRequest {
            request_line: request_line.trim_end().to_string(),
            headers,
            body: body_bytes,
        }
    });
    (format!("http://{}", addr), handle)
}

fn store(endpoint: &str, token: Option<&str>) -> HttpObjectStore {
    HttpObjectStore::new(
        endpoint,
        token.map(str::to_string),
        None,
        Duration::from_secs(5),
    )
    .expect("store")
}

#[test]
fn put_sends_bytes_headers_and_uses_location() {
    let (base, server) = serve_once(
        "200 OK",
        "Location: /download/robots/front.png?token=abc\r\n",
        "",
    );
    let store = store(&format!("{}/v0/b/robot-camera/o", base), Some("secret-token"));
    let dest = Destination::parse("robots/front.png").expect("dest");

    let locator = store
        .put_object(&dest, &[0x89, 0x50, 0x4E, 0x47])
        .expect("upload");
    let request = server.join().expect("server");

    assert_eq!(
        request.request_line,
        "PUT /v0/b/robot-camera/o/robots/front.png HTTP/1.1"
    );
    assert_eq!(request.body, vec![0x89, 0x50, 0x4E, 0x47]);
    assert_eq!(request.header("Content-Type"), Some("image/png"));
    assert_eq!(request.header("Authorization"), Some("Bearer secret-token"));
    assert_eq!(
        request.header("x-content-sha256").map(str::len),
        Some(64)
    );
    assert_eq!(
        locator.as_str(),
        format!("{}/download/robots/front.png?token=abc", base)
    );
}

#[test]
fn object_url_is_locator_without_location_header() {
    let (base, server) = serve_once("201 Created", "", "");
    let store = store(&base, None);
    let dest = Destination::parse("Test Photo.PNG").expect("dest");

    let locator = store.put_object(&dest, b"").expect("upload");
    let request = server.join().expect("server");

    assert_eq!(request.request_line, "PUT /Test%20Photo.PNG HTTP/1.1");
    assert!(request.body.is_empty());
    assert!(request.header("Authorization").is_none());
    assert_eq!(locator.as_str(), format!("{}/Test%20Photo.PNG", base));
}

#[test]
fn forbidden_maps_to_auth_error() {
    let (base, server) = serve_once("403 Forbidden", "", "");
    let store = store(&base, Some("stale"));
    let dest = Destination::parse("a.png").expect("dest");

    let err = store.put_object(&dest, b"x").expect_err("forbidden");
    server.join().expect("server");

    assert_eq!(err.kind, UploadErrorKind::Auth);
    assert!(err.reason.contains("403"));
}

#[test]
fn insufficient_storage_maps_to_quota_with_body() {
    let (base, server) = serve_once("507 Insufficient Storage", "", "bucket full");
    let store = store(&base, None);
    let dest = Destination::parse("a.png").expect("dest");

    let err = store.put_object(&dest, b"x").expect_err("quota");
    server.join().expect("server");

    assert_eq!(err.kind, UploadErrorKind::Quota);
    assert!(err.reason.contains("bucket full"));
}

#[test]
fn server_error_maps_to_rejected() {
    let (base, server) = serve_once("500 Internal Server Error", "", "");
    let store = store(&base, None);
    let dest = Destination::parse("a.png").expect("dest");

    let err = store.put_object(&dest, b"x").expect_err("rejected");
    server.join().expect("server");

    assert_eq!(err.kind, UploadErrorKind::Rejected);
}

#[test]
fn sink_from_config_reads_token_file() {
    let (base, server) = serve_once("200 OK", "", "");
    let token_file = tempfile::NamedTempFile::new().expect("token file");
    std::fs::write(token_file.path(), "file-token\n").expect("write token");

    let config = UploadConfig {
        endpoint: base,
        content_type: Some("image/jpeg".to_string()),
        token_path: Some(token_file.path().to_path_buf()),
        ..UploadConfig::default()
    };
    let sink = sink_from_config(&config).expect("sink");
    sink.put_object(&config.destination, b"jpeg").expect("upload");
    let request = server.join().expect("server");

    assert_eq!(request.header("Authorization"), Some("Bearer file-token"));
    assert_eq!(request.header("Content-Type"), Some("image/jpeg"));
    assert_eq!(request.request_line, "PUT /test-photo.png HTTP/1.1");
}

#[test]
fn pipeline_uploads_captured_frame_over_http() {
    let (base, server) = serve_once("200 OK", "", "");
    let sink: Arc<dyn UploadSink> = Arc::new(store(&format!("{}/bucket", base), None));
    let device = StubDevice::new("front").with_len(128);
    let dest = Destination::parse("robots/front.png").expect("dest");
    let (pipeline, events) =
        Pipeline::new(Box::new(device), Duration::from_secs(1), sink, dest).expect("pipeline");

    pipeline.trigger().expect("trigger");
    let event = events
        .recv_timeout(Duration::from_secs(10))
        .expect("pipeline event");
    let request = server.join().expect("server");

    match event {
        PipelineEvent::UploadFinished { result, bytes, .. } => {
            assert_eq!(bytes, 128);
            let locator = result.locator().expect("success");
            assert_eq!(locator.as_str(), format!("{}/bucket/robots/front.png", base));
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(request.body.len(), 128);
    assert_eq!(&request.body[..2], &[0x89u8, 0x50][..]);

    pipeline.shutdown().expect("shutdown");
}
