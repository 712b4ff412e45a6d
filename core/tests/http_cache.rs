/*
 * http_cache.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * Integration tests for the HTTP engine's cache and revalidation paths,
 * driven against local stub servers so no external network is needed.
 *
 * Run with:
 *   cargo test -p corriere_core --test http_cache
 */

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use corriere_core::config;
use corriere_core::protocol::http::cache::CacheStore;
use corriere_core::protocol::http::{
    download, request, request_stream, HttpError, HttpRequest, ResponseHandler,
};
use corriere_core::uri::HttpUrl;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

static INIT: Once = Once::new();

fn init() {
    INIT.call_once(|| {
        let dir = std::env::temp_dir().join(format!("corriere-it-cache-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        config::set_cache_path(&dir).expect("cache dir");
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

struct StubServer {
    addr: std::net::SocketAddr,
    accepted: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
}

/// Serve the canned responses in order, across connections, remembering each
/// request head. Sockets stay open (keep-alive) until the queue runs dry.
async fn stub_server(responses: Vec<Vec<u8>>) -> StubServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(Mutex::new(Vec::new()));
    let queue = Arc::new(Mutex::new(VecDeque::from(responses)));

    let accepted_counter = accepted.clone();
    let requests_log = requests.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                break;
            };
            accepted_counter.fetch_add(1, Ordering::SeqCst);
            let requests_log = requests_log.clone();
            let queue = queue.clone();
            tokio::spawn(async move {
                let mut pending = Vec::new();
                loop {
                    // read one request head
                    let head_end = loop {
                        if let Some(pos) =
                            pending.windows(4).position(|w| w == b"\r\n\r\n")
                        {
                            break pos + 4;
                        }
                        let mut buf = [0u8; 4096];
                        match sock.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => pending.extend_from_slice(&buf[..n]),
                        }
                    };
                    let head = String::from_utf8_lossy(&pending[..head_end]).into_owned();
                    pending.drain(..head_end);
                    requests_log.lock().unwrap().push(head);

                    let response = queue.lock().unwrap().pop_front();
                    match response {
                        Some(r) => {
                            if sock.write_all(&r).await.is_err() {
                                return;
                            }
                        }
                        None => return,
                    }
                    if queue.lock().unwrap().is_empty() {
                        return;
                    }
                }
            });
        }
    });

    StubServer {
        addr,
        accepted,
        requests,
    }
}

fn response_with(headers: &str, body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "HTTP/1.1 200 OK\r\n{}Content-Length: {}\r\n\r\n",
        headers,
        body.len()
    )
    .into_bytes();
    out.extend_from_slice(body);
    out
}

#[tokio::test]
async fn fresh_cache_hit_serves_with_zero_connections() {
    init();
    let server = stub_server(vec![response_with(
        "Cache-Control: max-age=60\r\nContent-Type: text/plain\r\n",
        b"hello",
    )])
    .await;
    let url = format!("http://{}/a", server.addr);

    let first = request(HttpRequest::get(&url)).await.unwrap();
    assert_eq!(first.status, 200);
    assert_eq!(first.body, b"hello");
    assert_eq!(server.accepted.load(Ordering::SeqCst), 1);

    // the record is on disk: expiry slot first, headers, then the body
    let store = CacheStore::open().expect("cache store");
    let canonical = HttpUrl::parse(&url).unwrap().canonical();
    let record = store.lookup(&canonical).expect("cache record");
    assert!(record.is_fresh(chrono::Utc::now()));
    assert_eq!(record.header("content-type"), Some("text/plain"));
    let contents = std::fs::read(&record.path).unwrap();
    assert!(contents.starts_with(b"expires: "));
    assert!(contents.ends_with(b"hello"));

    // ten seconds later (well within max-age): served entirely from cache
    let second = request(HttpRequest::get(&url)).await.unwrap();
    assert_eq!(second.status, 200);
    assert_eq!(second.body, b"hello");
    assert_eq!(
        server.accepted.load(Ordering::SeqCst),
        1,
        "second request must not open a connection"
    );
    assert_eq!(server.requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn stale_record_revalidates_and_304_extends_freshness() {
    init();
    let stale = response_with(
        "Cache-Control: max-age=0\r\nETag: \"v1\"\r\nContent-Type: text/plain\r\n",
        b"hello",
    );
    let not_modified =
        b"HTTP/1.1 304 Not Modified\r\nCache-Control: max-age=60\r\nETag: \"v1\"\r\n\r\n".to_vec();
    let server = stub_server(vec![stale, not_modified]).await;
    let url = format!("http://{}/reval", server.addr);
    let canonical = HttpUrl::parse(&url).unwrap().canonical();

    let first = request(HttpRequest::get(&url)).await.unwrap();
    assert_eq!(first.status, 200);
    assert_eq!(first.body, b"hello");

    let store = CacheStore::open().unwrap();
    let record = store.lookup(&canonical).expect("record written");
    assert!(!record.is_fresh(chrono::Utc::now()), "max-age=0 is stale");

    // stale-but-revalidatable: the second request must carry the validator,
    // and the 304 serves the cached body as a fresh 200
    let second = request(HttpRequest::get(&url)).await.unwrap();
    assert_eq!(second.status, 200);
    assert_eq!(second.body, b"hello");
    {
        let requests = server.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(
            requests[1].contains("If-None-Match: \"v1\""),
            "revalidation must send If-None-Match: {}",
            requests[1]
        );
    }

    // the expiry slot was rewritten in place: the record is fresh now and the
    // third request never reaches the network
    let record = store.lookup(&canonical).expect("record still present");
    assert!(record.is_fresh(chrono::Utc::now()));
    let accepted_before = server.accepted.load(Ordering::SeqCst);
    let third = request(HttpRequest::get(&url)).await.unwrap();
    assert_eq!(third.status, 200);
    assert_eq!(third.body, b"hello");
    assert_eq!(server.accepted.load(Ordering::SeqCst), accepted_before);
    assert_eq!(server.requests.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn gzip_response_is_decoded_and_saved_to_disk() {
    init();
    let original = b"corriere gzip payload: the quick brown fox jumps over the lazy dog";
    let compressed = {
        use std::io::Write as _;
        let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(original).unwrap();
        enc.finish().unwrap()
    };
    let server = stub_server(vec![response_with(
        "Content-Encoding: gzip\r\nCache-Control: no-store\r\n",
        &compressed,
    )])
    .await;
    let url = format!("http://{}/fox.txt", server.addr);

    let save_path = std::env::temp_dir().join(format!(
        "corriere-it-download-{}.txt",
        std::process::id()
    ));
    let response = download(&url, &save_path).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(std::fs::read(&save_path).unwrap(), original);

    // no-store: nothing may have been cached
    let store = CacheStore::open().unwrap();
    let canonical = HttpUrl::parse(&url).unwrap().canonical();
    assert!(store.lookup(&canonical).is_none());
    let _ = std::fs::remove_file(&save_path);
}

struct Recording {
    status: Option<u16>,
    completed: bool,
    failed: Option<String>,
}

impl ResponseHandler for Recording {
    fn status(&mut self, code: u16, _version: &str) {
        self.status = Some(code);
    }
    fn header(&mut self, _name: &str, _value: &str) {}
    fn start_body(&mut self) {}
    fn body_chunk(&mut self, _data: &[u8]) {}
    fn end_body(&mut self) {}
    fn complete(&mut self) {
        self.completed = true;
    }
    fn failed(&mut self, error: &HttpError) {
        self.failed = Some(error.to_string());
    }
    fn aborted(&mut self) {}
}

#[tokio::test]
async fn unreachable_host_fires_error_and_never_completes() {
    init();
    // bind then drop to get a port nothing listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut req = HttpRequest::get(format!("http://{}/nope", addr));
    req.disable_cache = true;
    let mut handler = Recording {
        status: None,
        completed: false,
        failed: None,
    };
    let err = request_stream(req, &mut handler).await.unwrap_err();
    assert!(matches!(err, HttpError::Connect(_)));
    assert!(handler.failed.is_some());
    assert!(!handler.completed, "no completion after a connect error");
    assert_eq!(handler.status, None);
}
