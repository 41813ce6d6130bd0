//! HTTP block source against a local stub server
//!
//! Tests verify:
//! - Request body carries the block and identifiers as JSON
//! - Status codes map to rows, "not found" and transport errors
//! - Only the block server's own no-data reply counts as "not found"
//! - Shard discovery through the load balancer
//! - A full retrieval over HTTP with one dead shard

use crate::support::rows_for;
use serde_json::Value;
use skypatrol_downloader::collection::IndexTable;
use skypatrol_downloader::fetcher::http::{build_http_client, NO_DATA_ERROR};
use skypatrol_downloader::fetcher::{
    discover_shards, BackendConfig, BlockRequest, BlockSource, Credentials, FetcherError,
    HttpBlockSource, ShardEndpoint, TransportError,
};
use skypatrol_downloader::identifier::Identifier;
use skypatrol_downloader::retrieval::{RetrievalExecutor, RetrievalJob, RetryPolicy};
use skypatrol_downloader::{DatasetCategory, StellarObservation};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Request as seen by the stub
#[derive(Debug, Clone)]
struct Seen {
    method: String,
    path: String,
    authorization: Option<String>,
    body: String,
}

type Handler = fn(&Seen) -> (u16, String);

/// Minimal HTTP/1.1 server answering every request through `handler`
async fn spawn_stub(handler: Handler) -> (SocketAddr, Arc<Mutex<Vec<Seen>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let log = log.clone();
            tokio::spawn(async move {
                let _ = handle(stream, handler, log).await;
            });
        }
    });

    (addr, seen)
}

async fn handle(
    mut stream: TcpStream,
    handler: Handler,
    log: Arc<Mutex<Vec<Seen>>>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let path = request_line.next().unwrap_or_default().to_string();

    let mut content_length = 0usize;
    let mut authorization = None;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            match name.trim().to_ascii_lowercase().as_str() {
                "content-length" => content_length = value.trim().parse().unwrap_or(0),
                "authorization" => authorization = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();

    let seen = Seen {
        method,
        path,
        authorization,
        body,
    };
    let (status, payload) = handler(&seen);
    log.lock().unwrap().push(seen);

    let reason = match status {
        200 => "OK",
        204 => "No Content",
        404 => "Not Found",
        _ => "Internal Server Error",
    };
    let payload = if status == 204 { String::new() } else { payload };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
        payload.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

/// Serves rows of the scripted catalogue for `/get_block`
fn block_server(seen: &Seen) -> (u16, String) {
    if seen.path != "/get_block" {
        return (404, String::new());
    }
    let body: Value = serde_json::from_str(&seen.body).unwrap();
    let ids: Vec<Identifier> = serde_json::from_value(body["ids"].clone()).unwrap();
    let rows: Vec<Value> = ids.iter().flat_map(rows_for).collect();
    if rows.is_empty() {
        return (404, serde_json::json!({ "error": NO_DATA_ERROR }).to_string());
    }
    (200, serde_json::to_string(&rows).unwrap())
}

fn failing_server(_: &Seen) -> (u16, String) {
    (500, "database offline".to_string())
}

fn empty_server(_: &Seen) -> (u16, String) {
    (204, String::new())
}

/// Answers like a proxy that does not know the route
fn misrouted_server(_: &Seen) -> (u16, String) {
    (404, "<html><body>404 Not Found</body></html>".to_string())
}

fn load_balancer(seen: &Seen) -> (u16, String) {
    match seen.path.as_str() {
        "/get_block_servers" => (200, r#"["asassn-db01", "asassn-db02:9100"]"#.to_string()),
        _ => (404, String::new()),
    }
}

fn endpoint(addr: SocketAddr) -> ShardEndpoint {
    ShardEndpoint::new(addr.ip().to_string(), addr.port())
}

fn short_timeouts(config: BackendConfig) -> BackendConfig {
    config.with_timeouts(Duration::from_secs(2), Duration::from_secs(5))
}

/// Address nothing listens on
async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

#[tokio::test]
async fn test_block_request_body_and_auth() {
    let (addr, seen) = spawn_stub(block_server).await;
    let config = short_timeouts(BackendConfig::new(vec![endpoint(addr)]))
        .with_credentials(Credentials::new("observer", "secret"));
    let source = HttpBlockSource::new(&config).unwrap();

    let ids = vec![Identifier::Numeric(5), Identifier::Numeric(8)];
    let request = BlockRequest {
        block_index: 3,
        category: DatasetCategory::Stellar,
        catalog: Some("master_list"),
        ids: &ids,
    };
    let payload = source.fetch_block(&endpoint(addr), &request).await.unwrap();
    let rows: Vec<Value> = serde_json::from_slice(&payload).unwrap();
    assert_eq!(rows.len(), rows_for(&ids[0]).len() + rows_for(&ids[1]).len());

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, "POST");
    assert_eq!(seen[0].path, "/get_block");
    assert!(seen[0].authorization.as_deref().unwrap_or_default().starts_with("Basic "));

    let body: Value = serde_json::from_str(&seen[0].body).unwrap();
    assert_eq!(body["block_idx"], 3);
    assert_eq!(body["catalog"], "master_list");
    assert_eq!(body["id_column"], "asas_sn_id");
    assert_eq!(body["format"], "json");
    assert_eq!(body["ids"], serde_json::json!([5, 8]));
}

#[tokio::test]
async fn test_status_mapping() {
    let ids = vec![Identifier::Numeric(1)];
    let request = BlockRequest {
        block_index: 0,
        category: DatasetCategory::Stellar,
        catalog: None,
        ids: &ids,
    };

    let (addr, _) = spawn_stub(failing_server).await;
    let config = short_timeouts(BackendConfig::new(vec![endpoint(addr)]));
    let source = HttpBlockSource::new(&config).unwrap();
    match source.fetch_block(&endpoint(addr), &request).await {
        Err(FetcherError::Transport(TransportError::Http { status, body })) => {
            assert_eq!(status, 500);
            assert_eq!(body, "database offline");
        }
        other => panic!("unexpected result: {other:?}"),
    }

    let (addr, _) = spawn_stub(empty_server).await;
    assert!(matches!(
        source.fetch_block(&endpoint(addr), &request).await,
        Err(FetcherError::NotFound(_))
    ));

    let dead = dead_addr().await;
    assert!(matches!(
        source.fetch_block(&endpoint(dead), &request).await,
        Err(FetcherError::Transport(_))
    ));

    let (addr, _) = spawn_stub(misrouted_server).await;
    match source.fetch_block(&endpoint(addr), &request).await {
        Err(FetcherError::Transport(TransportError::Http { status, .. })) => {
            assert_eq!(status, 404)
        }
        other => panic!("unexpected result: {other:?}"),
    }

    // A block whose targets have no light curves
    let (addr, _) = spawn_stub(block_server).await;
    let empty = vec![Identifier::Numeric(7)];
    let request = BlockRequest {
        ids: &empty,
        ..request
    };
    assert!(matches!(
        source.fetch_block(&endpoint(addr), &request).await,
        Err(FetcherError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_plain_404_fails_over_to_next_shard() {
    let (misrouted, misrouted_seen) = spawn_stub(misrouted_server).await;
    let (live, live_seen) = spawn_stub(block_server).await;
    let config = short_timeouts(BackendConfig::new(vec![endpoint(misrouted), endpoint(live)]));
    let source = Arc::new(HttpBlockSource::new(&config).unwrap());

    let ids = vec![Identifier::Numeric(1)];
    let index = IndexTable::from_ids("asas_sn_id", ids.clone());
    let job = RetrievalJob::new(DatasetCategory::Stellar, ids.clone(), index);

    let collection = RetrievalExecutor::new(source, config)
        .with_retry_policy(RetryPolicy::default().with_backoff_unit(Duration::from_millis(5)))
        .retrieve::<StellarObservation>(job)
        .await
        .unwrap()
        .into_collection()
        .unwrap();

    assert_eq!(collection.row_count(), rows_for(&ids[0]).len());
    assert_eq!(misrouted_seen.lock().unwrap().len(), 1);
    assert_eq!(live_seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_discover_shards() {
    let (addr, _) = spawn_stub(load_balancer).await;
    let client = build_http_client(&short_timeouts(BackendConfig::new(Vec::new()))).unwrap();

    let shards = discover_shards(&client, &format!("http://{addr}"), 9006)
        .await
        .unwrap();
    assert_eq!(
        shards,
        vec![
            ShardEndpoint::new("asassn-db01", 9006),
            ShardEndpoint::new("asassn-db02", 9100),
        ]
    );
}

#[tokio::test]
async fn test_retrieval_over_http_with_dead_shard() {
    let (live, _) = spawn_stub(block_server).await;
    let dead = dead_addr().await;
    let config = short_timeouts(BackendConfig::new(vec![endpoint(dead), endpoint(live)]));
    let source = Arc::new(HttpBlockSource::new(&config).unwrap());

    let ids: Vec<Identifier> = (1..=6).map(Identifier::Numeric).collect();
    let index = IndexTable::from_ids("asas_sn_id", ids.clone());
    let job = RetrievalJob::new(DatasetCategory::Stellar, ids, index);

    let collection = RetrievalExecutor::new(source, config)
        .with_block_size(2)
        .with_retry_policy(RetryPolicy::default().with_backoff_unit(Duration::from_millis(5)))
        .retrieve::<StellarObservation>(job)
        .await
        .unwrap()
        .into_collection()
        .unwrap();

    let expected: usize = (1..=6u64)
        .map(|n| rows_for(&Identifier::Numeric(n)).len())
        .sum();
    assert_eq!(collection.row_count(), expected);
}
