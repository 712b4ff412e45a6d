/*
 * cache.rs
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

//! On-disk response cache. One file per canonical URL (md5 hex name):
//! a CRLF-delimited header block, a blank line, then the raw (decoded) body.
//! The first header line is always `expires: ` with a fixed 36-byte value
//! slot so revalidation can rewrite the expiry in place without resizing the
//! file. Records are written through a tmp file and renamed into place, so a
//! race between two fetches of the same URL resolves last-writer-wins.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use md5::{Digest, Md5};
use tokio::io::AsyncWriteExt;

use crate::config;

const EXPIRES_PREFIX: &[u8] = b"expires: ";
/// Width of the rewritable expiry value slot (RFC 2822 date, space padded).
pub const EXPIRES_SLOT: usize = 36;
/// Header block larger than this means the record is not ours; treat as miss.
const MAX_HEADER_BLOCK: usize = 64 * 1024;

/// Response headers that are not meaningful when replayed from disk. The body
/// is stored decoded, so framing and encoding headers must not survive.
const SKIPPED_HEADERS: &[&str] = &[
    "expires",
    "connection",
    "transfer-encoding",
    "content-encoding",
    "content-length",
    "set-cookie",
];

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// A parsed cache record (header block only; the body stays on disk).
#[derive(Debug)]
pub struct CacheRecord {
    pub path: PathBuf,
    /// Stored headers in file order, names lower-cased, expires first.
    pub headers: Vec<(String, String)>,
    pub body_offset: u64,
    pub body_len: u64,
    pub expires: Option<DateTime<Utc>>,
}

impl CacheRecord {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Fresh iff the stored expiry is in the future.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires.map(|e| e > now).unwrap_or(false)
    }

    /// Conditional request headers for revalidating this record.
    pub fn conditional_headers(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        if let Some(lm) = self.header("last-modified") {
            out.push(("If-Modified-Since".to_string(), lm.to_string()));
        }
        if let Some(etag) = self.header("etag") {
            out.push(("If-None-Match".to_string(), etag.to_string()));
        }
        out
    }

    fn has_validator(&self) -> bool {
        self.header("last-modified").is_some() || self.header("etag").is_some()
    }
}

/// Compute the expiry for a response: `cache-control: max-age=N` wins, then
/// the literal `expires` header. None when neither is usable.
pub fn compute_expires(
    headers: &[(String, String)],
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let find = |name: &str| {
        headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    };
    if let Some(cc) = find("cache-control") {
        for token in cc.split(',') {
            let token = token.trim();
            if let Some(secs) = token.strip_prefix("max-age=") {
                if let Ok(secs) = secs.trim().parse::<i64>() {
                    return Some(now + ChronoDuration::seconds(secs));
                }
            }
        }
    }
    find("expires").and_then(parse_http_date)
}

/// True when the response forbids storing (`no-store` / `no-cache`).
pub fn response_cacheable(headers: &[(String, String)]) -> bool {
    let cc = headers
        .iter()
        .find(|(k, _)| k == "cache-control")
        .map(|(_, v)| v.as_str())
        .unwrap_or("");
    !cc.split(',')
        .map(|t| t.trim())
        .any(|t| t == "no-store" || t == "no-cache")
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    // RFC 2822 covers both our own slot format and the usual IMF-fixdate
    // once "GMT" is normalized to a numeric zone.
    let normalized = value.trim().replace("GMT", "+0000");
    DateTime::parse_from_rfc2822(&normalized)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn format_slot(expires: Option<DateTime<Utc>>) -> String {
    let value = expires.map(|e| e.to_rfc2822()).unwrap_or_default();
    format!("{:<width$}", value, width = EXPIRES_SLOT)
}

/// Handle to the cache directory.
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    /// Cache at the configured (or default) directory. None when no cache
    /// directory is available; callers then skip caching entirely.
    pub fn open() -> Option<Self> {
        let dir = config::cache_path()?;
        std::fs::create_dir_all(&dir).ok()?;
        Some(Self { dir })
    }

    /// Cache rooted at an explicit directory.
    pub fn with_dir(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// File path for a canonical URL: md5 hex digest of the URL.
    pub fn record_path(&self, canonical_url: &str) -> PathBuf {
        let mut hasher = Md5::new();
        hasher.update(canonical_url.as_bytes());
        let digest = hasher.finalize();
        let mut name = String::with_capacity(32);
        for byte in digest {
            name.push_str(&format!("{:02x}", byte));
        }
        self.dir.join(name)
    }

    /// Parse the header block of a record. Returns None for a missing file or
    /// a record that is neither dated nor revalidatable (treated as a miss).
    pub fn lookup(&self, canonical_url: &str) -> Option<CacheRecord> {
        let path = self.record_path(canonical_url);
        let mut file = std::fs::File::open(&path).ok()?;
        let total_len = file.metadata().ok()?.len();

        let mut block = Vec::new();
        let mut buf = [0u8; 4096];
        let body_offset = loop {
            let n = file.read(&mut buf).ok()?;
            if n == 0 {
                return None; // no blank line: not a record
            }
            block.extend_from_slice(&buf[..n]);
            if let Some(pos) = find_blank_line(&block) {
                break (pos + 4) as u64;
            }
            if block.len() > MAX_HEADER_BLOCK {
                return None;
            }
        };
        block.truncate(body_offset as usize - 4);

        let text = std::str::from_utf8(&block).ok()?;
        let mut headers = Vec::new();
        for line in text.split("\r\n") {
            let colon = line.find(':')?;
            let name = line[..colon].trim().to_ascii_lowercase();
            let value = line[colon + 1..].trim().to_string();
            headers.push((name, value));
        }
        // our records always lead with the expiry slot
        if headers.first().map(|(k, _)| k.as_str()) != Some("expires") {
            return None;
        }
        let expires = headers
            .first()
            .and_then(|(_, v)| parse_http_date(v));

        let record = CacheRecord {
            path,
            headers,
            body_offset,
            body_len: total_len.saturating_sub(body_offset),
            expires,
        };
        if record.expires.is_none() && !record.has_validator() {
            return None; // invalid record: nothing to date it or revalidate with
        }
        Some(record)
    }

    /// Start writing a record. The header block (expiry slot first) is
    /// written immediately; body chunks follow; `commit` renames the tmp file
    /// into place.
    pub async fn open_writer(
        &self,
        canonical_url: &str,
        response_headers: &[(String, String)],
        now: DateTime<Utc>,
    ) -> io::Result<CacheWriter> {
        let final_path = self.record_path(canonical_url);
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp_path = final_path.with_extension(format!("{}.{}.tmp", std::process::id(), seq));

        let mut block = Vec::new();
        block.extend_from_slice(EXPIRES_PREFIX);
        block.extend_from_slice(format_slot(compute_expires(response_headers, now)).as_bytes());
        block.extend_from_slice(b"\r\n");
        for (name, value) in response_headers {
            if SKIPPED_HEADERS.contains(&name.as_str()) {
                continue;
            }
            block.extend_from_slice(name.as_bytes());
            block.extend_from_slice(b": ");
            block.extend_from_slice(value.as_bytes());
            block.extend_from_slice(b"\r\n");
        }
        block.extend_from_slice(b"\r\n");

        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(&block).await?;
        Ok(CacheWriter {
            tmp_path,
            final_path,
            file,
        })
    }

    /// Rewrite the expiry slot of an existing record in place (after a 304
    /// extended its freshness). The body and remaining headers are untouched.
    pub fn rewrite_expiry(
        &self,
        canonical_url: &str,
        expires: DateTime<Utc>,
    ) -> io::Result<()> {
        let path = self.record_path(canonical_url);
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)?;
        let mut prefix = [0u8; EXPIRES_PREFIX.len()];
        file.read_exact(&mut prefix)?;
        if prefix != EXPIRES_PREFIX {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "record has no expiry slot",
            ));
        }
        file.seek(SeekFrom::Start(EXPIRES_PREFIX.len() as u64))?;
        file.write_all(format_slot(Some(expires)).as_bytes())?;
        file.flush()
    }

    pub fn remove(&self, canonical_url: &str) {
        let _ = std::fs::remove_file(self.record_path(canonical_url));
    }

    /// Delete every record in this cache directory.
    pub fn clear(&self) -> io::Result<()> {
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                std::fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

fn find_blank_line(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

/// In-progress record write. Best-effort: the transfer logs and drops the
/// writer on any error so caching can never fail a request.
pub struct CacheWriter {
    tmp_path: PathBuf,
    final_path: PathBuf,
    file: tokio::fs::File,
}

impl CacheWriter {
    pub async fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data).await
    }

    /// Finish the record and move it into place.
    pub async fn commit(mut self) -> io::Result<()> {
        self.file.flush().await?;
        drop(self.file);
        tokio::fs::rename(&self.tmp_path, &self.final_path).await
    }

    /// Drop an incomplete record (error or abort mid-body).
    pub async fn discard(self) {
        drop(self.file);
        let _ = tokio::fs::remove_file(&self.tmp_path).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(tag: &str) -> CacheStore {
        let dir = std::env::temp_dir().join(format!(
            "corriere-cache-test-{}-{}",
            tag,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        CacheStore::with_dir(dir).unwrap()
    }

    fn headers(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    async fn write_record(
        store: &CacheStore,
        url: &str,
        hdrs: &[(String, String)],
        body: &[u8],
    ) {
        let mut w = store.open_writer(url, hdrs, Utc::now()).await.unwrap();
        w.write_chunk(body).await.unwrap();
        w.commit().await.unwrap();
    }

    #[tokio::test]
    async fn max_age_record_is_fresh() {
        let store = temp_store("fresh");
        let url = "http://example.com:80/a";
        let hdrs = headers(&[
            ("content-type", "text/plain"),
            ("cache-control", "max-age=60"),
        ]);
        write_record(&store, url, &hdrs, b"hello").await;

        let rec = store.lookup(url).expect("record");
        assert!(rec.is_fresh(Utc::now()));
        assert_eq!(rec.body_len, 5);
        assert_eq!(rec.header("content-type"), Some("text/plain"));

        let mut file = std::fs::File::open(&rec.path).unwrap();
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).unwrap();
        assert!(contents.ends_with(b"hello"));
        assert!(contents.starts_with(b"expires: "));
    }

    #[tokio::test]
    async fn validator_only_record_is_stale_but_revalidatable() {
        let store = temp_store("validator");
        let url = "http://example.com:80/b";
        let hdrs = headers(&[("etag", "\"v1\""), ("last-modified", "Tue, 01 Jul 2003 10:52:37 GMT")]);
        write_record(&store, url, &hdrs, b"data").await;

        let rec = store.lookup(url).expect("record");
        assert!(!rec.is_fresh(Utc::now()));
        let cond = rec.conditional_headers();
        assert!(cond.iter().any(|(k, _)| k == "If-None-Match"));
        assert!(cond.iter().any(|(k, _)| k == "If-Modified-Since"));
    }

    #[tokio::test]
    async fn undated_unvalidatable_record_is_a_miss() {
        let store = temp_store("invalid");
        let url = "http://example.com:80/c";
        let hdrs = headers(&[("content-type", "text/plain")]);
        write_record(&store, url, &hdrs, b"x").await;
        assert!(store.lookup(url).is_none());
    }

    #[tokio::test]
    async fn rewrite_expiry_in_place() {
        let store = temp_store("rewrite");
        let url = "http://example.com:80/d";
        let hdrs = headers(&[("etag", "\"v1\"")]);
        write_record(&store, url, &hdrs, b"body-stays").await;

        let before = store.lookup(url).unwrap();
        let old_len = std::fs::metadata(&before.path).unwrap().len();
        assert!(!before.is_fresh(Utc::now()));

        store
            .rewrite_expiry(url, Utc::now() + ChronoDuration::seconds(90))
            .unwrap();

        let after = store.lookup(url).unwrap();
        assert!(after.is_fresh(Utc::now()));
        assert_eq!(std::fs::metadata(&after.path).unwrap().len(), old_len);
        assert_eq!(after.body_offset, before.body_offset);
    }

    #[tokio::test]
    async fn literal_expires_header_is_used() {
        let store = temp_store("literal");
        let url = "http://example.com:80/e";
        let hdrs = headers(&[("expires", "Tue, 01 Jul 2003 10:52:37 GMT"), ("etag", "\"x\"")]);
        write_record(&store, url, &hdrs, b"z").await;
        let rec = store.lookup(url).unwrap();
        // long past: stale, but dated
        assert!(rec.expires.is_some());
        assert!(!rec.is_fresh(Utc::now()));
    }

    #[tokio::test]
    async fn no_store_response_is_not_cacheable() {
        let hdrs = headers(&[("cache-control", "no-store")]);
        assert!(!response_cacheable(&hdrs));
        let hdrs = headers(&[("cache-control", "public, max-age=10")]);
        assert!(response_cacheable(&hdrs));
    }

    #[tokio::test]
    async fn clear_removes_records() {
        let store = temp_store("clear");
        let url = "http://example.com:80/f";
        write_record(&store, url, &headers(&[("etag", "\"1\"")]), b"y").await;
        assert!(store.lookup(url).is_some());
        store.clear().unwrap();
        assert!(store.lookup(url).is_none());
    }
}
