/*
 * transfer.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Corriere, a cross-platform application runtime.
 *
 * Corriere is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Corriere is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Corriere.  If not, see <http://www.gnu.org/licenses/>.
 */

//! The request controller: one HttpTransfer drives one request at a time
//! through the checked ready-state machine. It consults the cache, borrows a
//! pooled connection, writes the request, feeds response bytes through the
//! parser and decoder, and demultiplexes body chunks to the cache writer, the
//! save-path file, and the caller's handler. Exactly one terminal handler
//! callback fires per send: complete, failed, or aborted.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use base64::Engine;
use chrono::Utc;
use log::{debug, warn};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{watch, Notify};

use crate::config;
use crate::protocol::http::cache::{compute_expires, response_cacheable, CacheRecord, CacheStore, CacheWriter};
use crate::protocol::http::connection::Destination;
use crate::protocol::http::cookies;
use crate::protocol::http::decoder::BodyDecoder;
use crate::protocol::http::error::HttpError;
use crate::protocol::http::handler::ResponseHandler;
use crate::protocol::http::parser::{H1ResponseHandler, ParseState, ResponseParser};
use crate::protocol::http::pool::{current_context, pool, PooledConnection};
use crate::protocol::http::request::{Credentials, HttpRequest, Method};
use crate::protocol::http::response::{HttpResponse, ReadyState, ResponseState};
use crate::protocol::http::upload::{self, PreparedBody};
use crate::uri::HttpUrl;

const CACHE_REPLAY_CHUNK: usize = 16 * 1024;

/// Headers the engine always emits itself; same-named caller headers are
/// dropped rather than duplicated on the wire.
const ENGINE_HEADERS: &[&str] = &[
    "host",
    "connection",
    "accept-encoding",
    "date",
    "content-length",
];

/// Cancellation flag shared between a transfer and its abort handles.
/// Idempotent: only the first trigger wins.
pub struct AbortFlag {
    aborted: AtomicBool,
    notify: Notify,
}

impl AbortFlag {
    pub(crate) fn new() -> Self {
        Self {
            aborted: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn trigger(&self) -> bool {
        let first = !self.aborted.swap(true, Ordering::SeqCst);
        if first {
            self.notify.notify_waiters();
            self.notify.notify_one();
        }
        first
    }

    fn reset(&self) {
        self.aborted.store(false, Ordering::SeqCst);
    }

    /// Resolves once aborted. Stale wakeups from a previous send are ignored.
    async fn notified(&self) {
        loop {
            if self.is_aborted() {
                return;
            }
            self.notify.notified().await;
            if self.is_aborted() {
                return;
            }
        }
    }
}

/// Cloneable handle to abort an in-flight (or future) send on a transfer.
#[derive(Clone)]
pub struct AbortHandle(Arc<AbortFlag>);

impl AbortHandle {
    /// Abort the transfer. Safe to call from any thread, any number of
    /// times; only the first call has any effect.
    pub fn abort(&self) {
        self.0.trigger();
    }
}

/// Records parser events so they can be routed (with async I/O) after each
/// receive pass.
#[derive(Default)]
struct EventSink {
    status: Option<(u16, String)>,
    headers: Vec<(String, String)>,
    chunks: Vec<Vec<u8>>,
    trailers: Vec<(String, String)>,
    completed: bool,
}

impl EventSink {
    fn take_chunks(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.chunks)
    }
}

impl H1ResponseHandler for EventSink {
    fn status(&mut self, version: &str, code: u16, _reason: Option<&str>) {
        self.status = Some((code, version.to_string()));
    }
    fn header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }
    fn body_chunk(&mut self, data: &[u8]) {
        self.chunks.push(data.to_vec());
    }
    fn end_body(&mut self) {}
    fn trailer(&mut self, name: &str, value: &str) {
        self.trailers.push((name.to_string(), value.to_string()));
    }
    fn complete(&mut self) {
        self.completed = true;
    }
}

enum ReceiveOutcome {
    Done { keep_alive: bool },
    /// 304: freshness data from the revalidation response; the cached body
    /// is replayed instead.
    NotModified {
        keep_alive: bool,
        headers: Vec<(String, String)>,
    },
}

/// The request controller. Reusable: a terminal send resets to initial
/// semantics on the next send of the same object.
pub struct HttpTransfer {
    request: HttpRequest,
    state: ResponseState,
    abort: Arc<AbortFlag>,
    pause_tx: watch::Sender<bool>,
}

impl HttpTransfer {
    pub fn new(request: HttpRequest) -> Self {
        let (pause_tx, _) = watch::channel(false);
        Self {
            request,
            state: ResponseState::new(),
            abort: Arc::new(AbortFlag::new()),
            pause_tx,
        }
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    /// Mutable access to the request; rejected once a send is in flight.
    pub fn request_mut(&mut self) -> Result<&mut HttpRequest, HttpError> {
        if self.state.ready.is_in_flight() {
            return Err(HttpError::usage("request cannot be modified while sending"));
        }
        Ok(&mut self.request)
    }

    pub fn state(&self) -> &ResponseState {
        &self.state
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle(self.abort.clone())
    }

    /// Pause the active data source (transport or cache reader).
    pub fn pause(&self) {
        self.pause_tx.send_replace(true);
    }

    pub fn resume(&self) {
        self.pause_tx.send_replace(false);
    }

    /// Drive the request to completion. The handler receives the streaming
    /// events; the returned Result mirrors the terminal callback.
    pub async fn send(&mut self, handler: &mut dyn ResponseHandler) -> Result<(), HttpError> {
        // usage errors are synchronous, before any asynchronous work
        if self.state.ready.is_in_flight() {
            return Err(HttpError::usage("request is already sending"));
        }
        let url = HttpUrl::parse(&self.request.url).map_err(HttpError::Usage)?;

        self.state.reset();
        self.abort.reset();
        self.pause_tx.send_replace(false);

        match self.run(&url, handler).await {
            Ok(()) => Ok(()),
            Err(HttpError::Aborted) => {
                let _ = self.state.advance(ReadyState::Aborted);
                handler.aborted();
                Err(HttpError::Aborted)
            }
            Err(e) => {
                // errors are terminal too; the next send starts fresh
                self.state.ready = ReadyState::Completed;
                handler.failed(&e);
                Err(e)
            }
        }
    }

    async fn run(
        &mut self,
        url: &HttpUrl,
        handler: &mut dyn ResponseHandler,
    ) -> Result<(), HttpError> {
        self.state.advance(ReadyState::Ready)?;
        let canonical = url.canonical();

        let use_cache = !self.request.disable_cache && self.request.method == Method::Get;
        let store = if use_cache { CacheStore::open() } else { None };

        let mut conditional = Vec::new();
        if let Some(store) = &store {
            let record_path = store.record_path(&canonical);
            if tokio::fs::metadata(&record_path).await.is_ok() {
                if let Some(record) = store.lookup(&canonical) {
                    if record.is_fresh(Utc::now()) {
                        debug!("cache: fresh hit for {}", canonical);
                        return self.replay_cached(&record, handler).await;
                    }
                    // stale but revalidatable (or undated with validators)
                    conditional = record.conditional_headers();
                }
            }
        }

        self.send_network(url, &canonical, store.as_ref(), conditional, handler)
            .await
    }

    /// Serve headers and body straight from the cache record; the network is
    /// never touched.
    async fn replay_cached(
        &mut self,
        record: &CacheRecord,
        handler: &mut dyn ResponseHandler,
    ) -> Result<(), HttpError> {
        self.state.advance(ReadyState::ResponseHeaders)?;
        self.state.status = 200;
        self.state.version = "HTTP/1.1".to_string();
        self.state.headers = record.headers.clone();
        self.state.download_total = record.body_len;

        handler.status(200, "HTTP/1.1");
        for (name, value) in &record.headers {
            handler.header(name, value);
        }

        let mut file = tokio::fs::File::open(&record.path)
            .await
            .map_err(HttpError::Storage)?;
        file.seek(std::io::SeekFrom::Start(record.body_offset))
            .await
            .map_err(HttpError::Storage)?;
        let mut save_file = self.open_save_file().await?;

        let has_body = record.body_len > 0;
        if has_body {
            self.state.advance(ReadyState::ResponseBody)?;
            handler.start_body();
        }

        let mut pause_rx = self.pause_tx.subscribe();
        let mut buf = vec![0u8; CACHE_REPLAY_CHUNK];
        loop {
            self.wait_if_paused(&mut pause_rx).await?;
            let n = self
                .with_abort(file.read(&mut buf))
                .await?
                .map_err(HttpError::Storage)?;
            if n == 0 {
                break;
            }
            if let Some(f) = save_file.as_mut() {
                f.write_all(&buf[..n]).await.map_err(HttpError::Storage)?;
            }
            self.state.bytes_downloaded += n as u64;
            handler.body_chunk(&buf[..n]);
        }

        if has_body {
            handler.end_body();
        }
        if let Some(mut f) = save_file.take() {
            f.flush().await.map_err(HttpError::Storage)?;
        }
        self.state.advance(ReadyState::Completed)?;
        handler.complete();
        Ok(())
    }

    async fn send_network(
        &mut self,
        url: &HttpUrl,
        canonical: &str,
        store: Option<&CacheStore>,
        conditional: Vec<(String, String)>,
        handler: &mut dyn ResponseHandler,
    ) -> Result<(), HttpError> {
        // encode the body first: upload path errors (missing file) must fire
        // before any connection is acquired or bytes written
        let body = upload::prepare(&self.request).await?;

        self.state.advance(ReadyState::AwaitingConnection)?;
        let dest = Destination {
            host: url.host.clone(),
            port: url.port,
            tls: url.tls,
        };
        let mut pooled = self
            .with_abort(pool().acquire(&dest, current_context(), self.request.disable_tls_verify))
            .await??;

        let idle = idle_window(self.request.timeout);
        let head = self.build_head(url, &body, &conditional);
        self.with_abort(pooled.conn().write_all(head.as_bytes(), idle))
            .await??;
        self.state.upload_total = body.content_length();
        upload::write_body(
            pooled.conn().stream_mut(),
            &body,
            &mut self.state,
            idle,
            &self.abort,
        )
        .await?;
        pooled.conn().flush(idle).await?;
        self.state.advance(ReadyState::RequestSent)?;

        let mut cache_writer = None;
        let mut save_file = None;
        let result = self
            .receive_response(
                url,
                canonical,
                store,
                &mut pooled,
                handler,
                &mut cache_writer,
                &mut save_file,
            )
            .await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Some(w) = cache_writer.take() {
                    w.discard().await;
                }
                // pooled drops here: force-closed, never reused
                return Err(e);
            }
        };

        match outcome {
            ReceiveOutcome::Done { keep_alive } => {
                pooled.release(!keep_alive);
                Ok(())
            }
            ReceiveOutcome::NotModified { keep_alive, headers } => {
                pooled.release(!keep_alive);
                let Some(store) = store else {
                    return Err(HttpError::protocol("304 Not Modified with no cached record"));
                };
                // merge the updated freshness into the stored record: only
                // the expiry slot is rewritten, the body is untouched
                if let Some(expires) = compute_expires(&headers, Utc::now()) {
                    if let Err(e) = store.rewrite_expiry(canonical, expires) {
                        warn!("cache: expiry rewrite failed for {}: {}", canonical, e);
                    }
                }
                match store.lookup(canonical) {
                    Some(record) => self.replay_cached(&record, handler).await,
                    None => Err(HttpError::protocol("304 Not Modified with no cached record")),
                }
            }
        }
    }

    fn build_head(
        &self,
        url: &HttpUrl,
        body: &PreparedBody,
        conditional: &[(String, String)],
    ) -> String {
        let req = &self.request;
        let mut head = format!(
            "{} {} HTTP/1.1\r\n",
            req.method.as_str(),
            url.request_target()
        );
        let mut push = |name: &str, value: &str| {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        };

        push("Host", &url.host_header());
        push(
            "Connection",
            if req.keep_alive { "keep-alive" } else { "close" },
        );
        push("Accept-Encoding", "gzip, deflate");
        push("Date", &Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string());
        if !req.has_header("cache-control") {
            push("Cache-Control", "no-cache");
        }
        if !req.has_header("user-agent") {
            push("User-Agent", &config::user_agent());
        }
        if !req.has_header("accept-charset") {
            push("Accept-Charset", "utf-8, *;q=0.8");
        }
        if !req.has_header("accept") {
            push("Accept", "*/*");
        }
        if !req.has_header("dnt") {
            push("DNT", "1");
        }

        if !body.is_empty() {
            push("Content-Length", &body.content_length().to_string());
            if let Some(ct) = body.content_type() {
                if !req.has_header("content-type") {
                    push("Content-Type", &ct);
                }
            }
        } else if matches!(req.method, Method::Post | Method::Put | Method::Delete) {
            push("Content-Length", "0");
        }

        for (name, value) in conditional {
            push(name, value);
        }

        if !req.disable_cookies && !req.disable_cookie_send {
            if let Some(cookie) = cookies::cookie_header(&url.host) {
                push("Cookie", &cookie);
            }
        }

        if !req.has_header("authorization") {
            let creds = req.credentials.clone().or_else(|| {
                url.username.as_ref().map(|u| Credentials {
                    username: u.clone(),
                    password: url.password.clone().unwrap_or_default(),
                })
            });
            if let Some(c) = creds {
                let token = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", c.username, c.password));
                push("Authorization", &format!("Basic {}", token));
            }
        }

        for (name, value) in req.headers() {
            if ENGINE_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                continue;
            }
            push(name, value);
        }

        head.push_str("\r\n");
        head
    }

    #[allow(clippy::too_many_arguments)]
    async fn receive_response(
        &mut self,
        url: &HttpUrl,
        canonical: &str,
        store: Option<&CacheStore>,
        pooled: &mut PooledConnection,
        handler: &mut dyn ResponseHandler,
        cache_writer: &mut Option<CacheWriter>,
        save_file: &mut Option<tokio::fs::File>,
    ) -> Result<ReceiveOutcome, HttpError> {
        let idle = idle_window(self.request.timeout);
        let mut parser = ResponseParser::new();
        let mut sink = EventSink::default();
        let mut decoder: Option<BodyDecoder> = None;
        let mut pause_rx = self.pause_tx.subscribe();

        let mut headers_done = false;
        let mut body_started = false;
        let mut not_modified = false;
        let mut closed_by_server = false;

        loop {
            self.wait_if_paused(&mut pause_rx).await?;
            let n = self
                .with_abort(pooled.conn().read_some(idle))
                .await??;
            if n == 0 {
                if headers_done && parser.reading_until_close() {
                    // no framing: the close is the end of the message
                    closed_by_server = true;
                } else {
                    return Err(HttpError::Connect(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "connection closed mid-response",
                    )));
                }
            }

            parser
                .receive(pooled.conn().buffer(), &mut sink)
                .map_err(|e| HttpError::Protocol(e.to_string()))?;

            if !headers_done && parser.state() == ParseState::HeadersComplete {
                headers_done = true;
                let (code, version) = sink
                    .status
                    .clone()
                    .ok_or_else(|| HttpError::protocol("headers complete without status"))?;
                let headers = sink.headers.clone();
                self.state.status = code;
                self.state.version = version.clone();
                self.state.headers = headers.clone();

                let content_length = find_header(&headers, "content-length")
                    .and_then(|v| v.trim().parse::<u64>().ok());
                let chunked = find_header(&headers, "transfer-encoding")
                    .map(|v| v.contains("chunked"))
                    .unwrap_or(false);

                if code == 304 {
                    // a 304 has no body; freshness merge happens after release
                    not_modified = true;
                    parser.set_body_mode(Some(0), false);
                } else if code >= 400 || code < 100 {
                    return Err(HttpError::Status(code));
                } else {
                    self.state.advance(ReadyState::ResponseHeaders)?;
                    handler.status(code, &version);
                    for (name, value) in &headers {
                        handler.header(name, value);
                    }
                    if !self.request.disable_cookies {
                        for (name, value) in &headers {
                            if name == "set-cookie" {
                                cookies::store_cookie(&url.host, value);
                            }
                        }
                    }
                    if let Some(cl) = content_length {
                        self.state.download_total = cl;
                    }
                    decoder = Some(BodyDecoder::new(find_header(&headers, "content-encoding")));

                    // write-through cache: best-effort, never fails the request
                    if let Some(store) = store {
                        let has_validator = find_header(&headers, "last-modified").is_some()
                            || find_header(&headers, "etag").is_some();
                        let datable = compute_expires(&headers, Utc::now()).is_some();
                        if code == 200 && response_cacheable(&headers) && (datable || has_validator)
                        {
                            match store.open_writer(canonical, &headers, Utc::now()).await {
                                Ok(w) => *cache_writer = Some(w),
                                Err(e) => {
                                    warn!("cache: cannot open record for {}: {}", canonical, e)
                                }
                            }
                        }
                    }
                    *save_file = self.open_save_file().await?;

                    let head_request = self.request.method == Method::Head;
                    let no_body =
                        head_request || code == 204 || (100..200).contains(&code);
                    let has_body = !no_body
                        && (chunked || content_length.map(|cl| cl > 0).unwrap_or(true));
                    if has_body {
                        self.state.advance(ReadyState::ResponseBody)?;
                        handler.start_body();
                        body_started = true;
                        parser.set_body_mode(content_length, chunked);
                    } else {
                        parser.set_body_mode(Some(0), false);
                    }
                }

                // parse whatever arrived with the headers
                parser
                    .receive(pooled.conn().buffer(), &mut sink)
                    .map_err(|e| HttpError::Protocol(e.to_string()))?;
            }

            for chunk in sink.take_chunks() {
                self.state.bytes_downloaded += chunk.len() as u64;
                let mut decoded = Vec::new();
                match decoder.as_mut() {
                    Some(d) => d
                        .feed(&chunk, &mut decoded)
                        .map_err(|e| HttpError::Protocol(e.to_string()))?,
                    None => decoded = chunk,
                }
                self.route_chunk(&decoded, canonical, cache_writer, save_file, handler)
                    .await?;
            }

            if sink.completed
                || closed_by_server
                || (headers_done && parser.state() == ParseState::Idle)
            {
                break;
            }
        }

        if not_modified {
            let keep_alive =
                self.keep_alive_after(&sink.headers, closed_by_server, pooled.conn().is_clean());
            return Ok(ReceiveOutcome::NotModified {
                keep_alive,
                headers: sink.headers.clone(),
            });
        }

        // close the decoder; a truncated compressed stream is a protocol error
        if body_started {
            if let Some(d) = decoder.as_mut() {
                let mut rest = Vec::new();
                d.finish(&mut rest)
                    .map_err(|e| HttpError::Protocol(e.to_string()))?;
                if !rest.is_empty() {
                    self.route_chunk(&rest, canonical, cache_writer, save_file, handler)
                        .await?;
                }
            }
        }

        if body_started {
            handler.end_body();
        }
        for (name, value) in &sink.trailers {
            self.state.headers.push((name.clone(), value.clone()));
            handler.header(name, value);
        }

        if let Some(w) = cache_writer.take() {
            if let Err(e) = w.commit().await {
                warn!("cache: commit failed for {}: {}", canonical, e);
            }
        }
        if let Some(mut f) = save_file.take() {
            f.flush().await.map_err(HttpError::Storage)?;
        }

        let keep_alive =
            self.keep_alive_after(&sink.headers, closed_by_server, pooled.conn().is_clean());
        self.state.advance(ReadyState::Completed)?;
        handler.complete();
        Ok(ReceiveOutcome::Done { keep_alive })
    }

    /// Hand one decoded chunk to whichever consumers apply. Cache failures
    /// are logged and drop the writer; save-path failures are fatal.
    async fn route_chunk(
        &mut self,
        decoded: &[u8],
        canonical: &str,
        cache_writer: &mut Option<CacheWriter>,
        save_file: &mut Option<tokio::fs::File>,
        handler: &mut dyn ResponseHandler,
    ) -> Result<(), HttpError> {
        if decoded.is_empty() {
            return Ok(());
        }
        if let Some(w) = cache_writer.as_mut() {
            if let Err(e) = w.write_chunk(decoded).await {
                warn!("cache: write failed for {}: {}", canonical, e);
                if let Some(w) = cache_writer.take() {
                    w.discard().await;
                }
            }
        }
        if let Some(f) = save_file.as_mut() {
            // back-pressure: the transport is not read again until this
            // write completes
            f.write_all(decoded).await.map_err(HttpError::Storage)?;
        }
        handler.body_chunk(decoded);
        Ok(())
    }

    fn keep_alive_after(
        &self,
        headers: &[(String, String)],
        closed_by_server: bool,
        buffer_clean: bool,
    ) -> bool {
        if !self.request.keep_alive || closed_by_server || !buffer_clean {
            return false;
        }
        !find_header(headers, "connection")
            .map(|v| v.eq_ignore_ascii_case("close"))
            .unwrap_or(false)
    }

    async fn open_save_file(&self) -> Result<Option<tokio::fs::File>, HttpError> {
        match &self.request.save_path {
            Some(path) => {
                let file = tokio::fs::File::create(path)
                    .await
                    .map_err(HttpError::Storage)?;
                Ok(Some(file))
            }
            None => Ok(None),
        }
    }

    /// Race a future against the abort flag.
    async fn with_abort<T>(
        &self,
        fut: impl std::future::Future<Output = T>,
    ) -> Result<T, HttpError> {
        if self.abort.is_aborted() {
            return Err(HttpError::Aborted);
        }
        tokio::select! {
            biased;
            _ = self.abort.notified() => Err(HttpError::Aborted),
            v = fut => Ok(v),
        }
    }

    /// Block while paused; abort still wins.
    async fn wait_if_paused(
        &self,
        rx: &mut watch::Receiver<bool>,
    ) -> Result<(), HttpError> {
        loop {
            if self.abort.is_aborted() {
                return Err(HttpError::Aborted);
            }
            if !*rx.borrow_and_update() {
                return Ok(());
            }
            tokio::select! {
                _ = self.abort.notified() => return Err(HttpError::Aborted),
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

fn idle_window(timeout: Duration) -> Option<Duration> {
    if timeout.is_zero() {
        None
    } else {
        Some(timeout)
    }
}

/// Joins body chunks for the one-shot operations.
struct Collector {
    status: u16,
    version: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    keep_body: bool,
}

impl Collector {
    fn new(keep_body: bool) -> Self {
        Self {
            status: 0,
            version: String::new(),
            headers: Vec::new(),
            body: Vec::new(),
            keep_body,
        }
    }

    fn into_response(self) -> HttpResponse {
        HttpResponse {
            status: self.status,
            version: self.version,
            headers: self.headers,
            body: self.body,
        }
    }
}

impl ResponseHandler for Collector {
    fn status(&mut self, code: u16, version: &str) {
        self.status = code;
        self.version = version.to_string();
    }
    fn header(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }
    fn start_body(&mut self) {}
    fn body_chunk(&mut self, data: &[u8]) {
        if self.keep_body {
            self.body.extend_from_slice(data);
        }
    }
    fn end_body(&mut self) {}
    fn complete(&mut self) {}
    fn failed(&mut self, _error: &HttpError) {}
    fn aborted(&mut self) {}
}

/// Issue a request and join the body into one buffer.
pub async fn request(req: HttpRequest) -> Result<HttpResponse, HttpError> {
    let mut transfer = HttpTransfer::new(req);
    let mut collector = Collector::new(true);
    transfer.send(&mut collector).await?;
    Ok(collector.into_response())
}

/// Issue a request, delivering body chunks incrementally to the handler.
pub async fn request_stream(
    req: HttpRequest,
    handler: &mut dyn ResponseHandler,
) -> Result<(), HttpError> {
    HttpTransfer::new(req).send(handler).await
}

/// GET a URL to a file on disk. The returned response carries status and
/// headers; the body lives at `save_path`.
pub async fn download(url: &str, save_path: impl Into<PathBuf>) -> Result<HttpResponse, HttpError> {
    let mut req = HttpRequest::get(url);
    req.save_to(save_path);
    let mut transfer = HttpTransfer::new(req);
    let mut collector = Collector::new(false);
    transfer.send(&mut collector).await?;
    Ok(collector.into_response())
}

/// POST a single file as a multipart/form-data request (field name "file").
pub async fn upload(url: &str, file_path: impl Into<PathBuf>) -> Result<HttpResponse, HttpError> {
    let mut req = HttpRequest::post(url);
    req.multipart_file("file", file_path);
    request(req).await
}

static RUNTIME: OnceLock<tokio::runtime::Runtime> = OnceLock::new();

/// The engine's own runtime, used by the blocking wrapper (and by the FFI
/// layer through it).
fn shared_runtime() -> &'static tokio::runtime::Runtime {
    RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("corriere-http")
            .enable_all()
            .build()
            .expect("failed to build HTTP runtime")
    })
}

/// Blocking convenience wrapper. Forbidden on a runtime thread: the send is
/// posted to the engine's own runtime and the calling thread blocks on a
/// channel, so the context driving network I/O is never blocked.
pub fn request_sync(req: HttpRequest) -> Result<HttpResponse, HttpError> {
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(HttpError::usage(
            "request_sync called from an async context; use request() instead",
        ));
    }
    let (tx, rx) = std::sync::mpsc::channel();
    shared_runtime().spawn(async move {
        let _ = tx.send(request(req).await);
    });
    rx.recv()
        .map_err(|_| HttpError::usage("HTTP runtime shut down"))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::AsyncReadExt as _;
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct Counts {
        status: Option<u16>,
        completed: usize,
        failed: usize,
        aborted: usize,
    }

    struct SharedHandler(Arc<Mutex<Counts>>);

    impl ResponseHandler for SharedHandler {
        fn status(&mut self, code: u16, _version: &str) {
            self.0.lock().unwrap().status = Some(code);
        }
        fn header(&mut self, _name: &str, _value: &str) {}
        fn start_body(&mut self) {}
        fn body_chunk(&mut self, _data: &[u8]) {}
        fn end_body(&mut self) {}
        fn complete(&mut self) {
            self.0.lock().unwrap().completed += 1;
        }
        fn failed(&mut self, _error: &HttpError) {
            self.0.lock().unwrap().failed += 1;
        }
        fn aborted(&mut self) {
            self.0.lock().unwrap().aborted += 1;
        }
    }

    #[tokio::test]
    async fn abort_twice_fires_exactly_one_callback() {
        // server accepts and then stalls forever
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let Ok((mut sock, _)) = listener.accept().await else {
                return;
            };
            let mut buf = [0u8; 1024];
            loop {
                match sock.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        });

        let mut req = HttpRequest::get(format!("http://{}/stall", addr));
        req.disable_cache = true;
        req.timeout(Duration::ZERO); // no idle watchdog; abort must win

        let mut transfer = HttpTransfer::new(req);
        let handle = transfer.abort_handle();
        let counts = Arc::new(Mutex::new(Counts::default()));
        let mut handler = SharedHandler(counts.clone());

        let join = tokio::spawn(async move {
            let result = transfer.send(&mut handler).await;
            assert!(matches!(result, Err(HttpError::Aborted)));
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();
        handle.abort(); // idempotent
        join.await.unwrap();

        let counts = counts.lock().unwrap();
        assert_eq!(counts.aborted, 1);
        assert_eq!(counts.completed, 0);
        assert_eq!(counts.failed, 0);
    }

    #[tokio::test]
    async fn invalid_scheme_is_a_synchronous_usage_error() {
        let req = HttpRequest::get("ftp://example.com/file");
        let mut transfer = HttpTransfer::new(req);
        let counts = Arc::new(Mutex::new(Counts::default()));
        let mut handler = SharedHandler(counts.clone());
        let err = transfer.send(&mut handler).await.unwrap_err();
        assert!(err.is_usage());
        // no terminal callback for synchronous precondition violations
        let counts = counts.lock().unwrap();
        assert_eq!(counts.completed + counts.failed + counts.aborted, 0);
    }

    #[tokio::test]
    async fn request_sync_refuses_async_context() {
        let req = HttpRequest::get("http://example.com/");
        let err = request_sync(req).unwrap_err();
        assert!(err.is_usage());
    }

    #[tokio::test]
    async fn status_error_reported_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let Ok((mut sock, _)) = listener.accept().await else {
                return;
            };
            let mut buf = [0u8; 2048];
            let _ = sock.read(&mut buf).await;
            use tokio::io::AsyncWriteExt as _;
            let _ = sock
                .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")
                .await;
        });

        let mut req = HttpRequest::get(format!("http://{}/missing", addr));
        req.disable_cache = true;
        let mut transfer = HttpTransfer::new(req);
        let counts = Arc::new(Mutex::new(Counts::default()));
        let mut handler = SharedHandler(counts.clone());
        let err = transfer.send(&mut handler).await.unwrap_err();
        assert!(matches!(err, HttpError::Status(404)));
        let counts = counts.lock().unwrap();
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.completed, 0);
        // status is not delivered through the success path for error codes
        assert_eq!(counts.status, None);
    }
}
