//! Integration tests for the HTTP range-request chunk source against a
//! mock remote.

use std::time::Duration;

use futures_util::StreamExt;
use mediafetch_core::{ChunkSource, FetchError, HttpChunkSource, MediaLocator, transfer};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, Request, Respond, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;
use support::{document_locator, patterned_bytes};

macro_rules! require_mock_server {
    () => {{
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return;
        };
        mock_server
    }};
}

/// Serves `Range: bytes=a-b` requests out of a fixed body.
struct RangeResponder {
    body: Vec<u8>,
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Some((start, end)) = request
            .headers
            .get("range")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("bytes="))
            .and_then(|value| value.split_once('-'))
            .and_then(|(a, b)| Some((a.parse::<usize>().ok()?, b.parse::<usize>().ok()?)))
        else {
            return ResponseTemplate::new(200).set_body_bytes(self.body.clone());
        };

        let len = self.body.len();
        if start >= len {
            return ResponseTemplate::new(416)
                .insert_header("content-range", format!("bytes */{len}").as_str());
        }
        let end = end.min(len - 1);
        ResponseTemplate::new(206)
            .insert_header(
                "content-range",
                format!("bytes {start}-{end}/{len}").as_str(),
            )
            .set_body_bytes(self.body[start..=end].to_vec())
    }
}

async fn first_item(
    source: &HttpChunkSource,
    locator: &MediaLocator,
) -> Result<Vec<u8>, FetchError> {
    let mut stream = source.open_chunk_stream(locator, 0, 4096).await?;
    stream
        .next()
        .await
        .map(|item| item.map(|chunk| chunk.bytes.to_vec()))
        .unwrap_or_else(|| Ok(Vec::new()))
}

// ==================== Range Tests ====================

#[tokio::test]
async fn test_http_transfer_walks_ranges_until_complete() {
    let mock_server = require_mock_server!();
    let data = patterned_bytes(10_000);
    Mock::given(method("GET"))
        .and(path("/dc1/clip"))
        .respond_with(RangeResponder { body: data.clone() })
        .mount(&mock_server)
        .await;

    let temp = TempDir::new().unwrap();
    let destination = temp.path().join("clip.bin");
    let source = HttpChunkSource::new(&mock_server.uri()).unwrap();

    let outcome = transfer(&source, &document_locator("clip", None), &destination, 4096, |_, _| {})
        .await
        .unwrap();

    assert_eq!(outcome.bytes(), 10_000);
    assert_eq!(std::fs::read(&destination).unwrap(), data);
    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
    let ranges: Vec<String> = requests
        .iter()
        .filter_map(|r| r.headers.get("range"))
        .filter_map(|v| v.to_str().ok().map(str::to_string))
        .collect();
    assert_eq!(ranges, vec!["bytes=0-4095", "bytes=4096-8191", "bytes=8192-12287"]);
}

#[tokio::test]
async fn test_http_resume_requests_from_partial_offset() {
    let mock_server = require_mock_server!();
    let data = patterned_bytes(6000);
    Mock::given(method("GET"))
        .and(path("/dc1/doc"))
        .respond_with(RangeResponder { body: data.clone() })
        .mount(&mock_server)
        .await;

    let temp = TempDir::new().unwrap();
    let destination = temp.path().join("doc.bin");
    std::fs::write(temp.path().join("doc.bin.partial"), &data[..5000]).unwrap();
    let source = HttpChunkSource::new(&mock_server.uri()).unwrap();

    transfer(&source, &document_locator("doc", Some(6000)), &destination, 4096, |_, _| {})
        .await
        .unwrap();

    assert_eq!(std::fs::read(&destination).unwrap(), data);
    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].headers.get("range").unwrap().to_str().unwrap(),
        "bytes=5000-9095"
    );
}

#[tokio::test]
async fn test_http_whole_body_when_range_ignored() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/dc1/plain"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"entire object".to_vec()))
        .mount(&mock_server)
        .await;

    let temp = TempDir::new().unwrap();
    let destination = temp.path().join("plain.bin");
    let source = HttpChunkSource::new(&mock_server.uri()).unwrap();

    let outcome = transfer(&source, &document_locator("plain", None), &destination, 4, |_, _| {})
        .await
        .unwrap();
    assert_eq!(outcome.bytes(), 13);
    assert_eq!(std::fs::read(&destination).unwrap(), b"entire object");
}

#[tokio::test]
async fn test_http_ignored_range_body_is_split_into_chunks() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/dc1/plain"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"entire object".to_vec()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let source = HttpChunkSource::new(&mock_server.uri()).unwrap();
    let stream = source
        .open_chunk_stream(&document_locator("plain", None), 0, 4)
        .await
        .unwrap();
    let chunks: Vec<_> = stream.map(Result::unwrap).collect().await;

    let sizes: Vec<usize> = chunks.iter().map(|chunk| chunk.bytes.len()).collect();
    assert_eq!(sizes, vec![4, 4, 4, 1]);
    assert_eq!(chunks.last().unwrap().total_size, Some(13));
    let joined: Vec<u8> = chunks.iter().flat_map(|chunk| chunk.bytes.to_vec()).collect();
    assert_eq!(joined, b"entire object");
}

#[tokio::test]
async fn test_http_416_total_discards_oversized_partial() {
    let mock_server = require_mock_server!();
    let data = patterned_bytes(10);
    Mock::given(method("GET"))
        .and(path("/dc1/doc"))
        .respond_with(RangeResponder { body: data.clone() })
        .mount(&mock_server)
        .await;

    let temp = TempDir::new().unwrap();
    let destination = temp.path().join("doc.bin");
    std::fs::write(temp.path().join("doc.bin.partial"), vec![0xAA; 15]).unwrap();
    let source = HttpChunkSource::new(&mock_server.uri()).unwrap();

    let outcome = transfer(&source, &document_locator("doc", None), &destination, 4, |_, _| {})
        .await
        .unwrap();

    assert_eq!(outcome.bytes(), 10);
    assert_eq!(std::fs::read(&destination).unwrap(), data);
    assert!(!temp.path().join("doc.bin.partial").exists());
    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(
        requests[0].headers.get("range").unwrap().to_str().unwrap(),
        "bytes=15-18"
    );
    assert_eq!(
        requests[1].headers.get("range").unwrap().to_str().unwrap(),
        "bytes=0-3"
    );
}

// ==================== Header Tests ====================

#[tokio::test]
async fn test_http_sends_credentials_and_reference() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/dc1/photo"))
        .and(query_param("variant", "y"))
        .and(header("authorization", "Bearer tok"))
        .and(header("x-file-reference", "ref-1"))
        .respond_with(RangeResponder {
            body: vec![7u8; 100],
        })
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut locator = document_locator("photo", Some(100));
    locator.variant = Some("y".to_string());
    let source = HttpChunkSource::new(&mock_server.uri()).unwrap();

    assert_eq!(first_item(&source, &locator).await.unwrap(), vec![7u8; 100]);
}

#[tokio::test]
async fn test_http_falls_back_to_default_token() {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(header("authorization", "Bearer from-cli"))
        .respond_with(RangeResponder { body: vec![1u8; 10] })
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut locator = document_locator("anon", Some(10));
    locator.access_token = String::new();
    let source = HttpChunkSource::new(&mock_server.uri())
        .unwrap()
        .with_token("from-cli");

    assert_eq!(first_item(&source, &locator).await.unwrap().len(), 10);
}

// ==================== Status Mapping Tests ====================

async fn status_outcome(template: ResponseTemplate) -> Option<FetchError> {
    let mock_server = start_mock_server_or_skip().await?;
    Mock::given(method("GET"))
        .respond_with(template)
        .mount(&mock_server)
        .await;
    let source = HttpChunkSource::new(&mock_server.uri()).unwrap();
    first_item(&source, &document_locator("obj", Some(10))).await.err()
}

#[tokio::test]
async fn test_http_429_carries_retry_after_hint() {
    let Some(err) = status_outcome(ResponseTemplate::new(429).insert_header("retry-after", "7")).await
    else {
        return;
    };
    assert_eq!(
        err,
        FetchError::RateLimited {
            wait_hint: Some(Duration::from_secs(7))
        }
    );
}

#[tokio::test]
async fn test_http_410_is_reference_expired() {
    let Some(err) = status_outcome(ResponseTemplate::new(410)).await else {
        return;
    };
    assert_eq!(err, FetchError::ReferenceExpired);
}

#[tokio::test]
async fn test_http_503_is_server_error() {
    let Some(err) = status_outcome(ResponseTemplate::new(503)).await else {
        return;
    };
    assert_eq!(err, FetchError::ServerError { code: 503 });
}

#[tokio::test]
async fn test_http_403_is_fatal() {
    let Some(err) = status_outcome(ResponseTemplate::new(403)).await else {
        return;
    };
    assert!(matches!(err, FetchError::Fatal { .. }));
}
