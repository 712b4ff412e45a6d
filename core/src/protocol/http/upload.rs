/*
 * upload.rs
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

//! Request body encoding: raw bytes, urlencoded forms, and multipart/form-data
//! with file parts streamed from disk. Content-Length is computed exactly up
//! front (HTTP framing depends on it); a file that cannot be stat'd fails the
//! send before any bytes are written. The multipart boundary is a fixed
//! literal, so a body containing the literal would corrupt framing; callers
//! uploading adversarial content must use a raw body instead.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::protocol::http::error::HttpError;
use crate::protocol::http::request::{HttpRequest, MultipartValue};
use crate::protocol::http::response::ResponseState;
use crate::protocol::http::transfer::AbortFlag;
use crate::uri::encode_form;

pub const MULTIPART_BOUNDARY: &str = "------CorriereFormBoundary2Rf7Kq";
const FILE_CHUNK: usize = 16 * 1024;

pub enum PreparedPayload {
    Bytes(Vec<u8>),
    File(PathBuf, u64),
}

pub struct PreparedPart {
    head: Vec<u8>,
    payload: PreparedPayload,
}

/// A request body ready to write: every size known, every file stat'd.
pub enum PreparedBody {
    Empty,
    Raw(Vec<u8>),
    Form(Vec<u8>),
    Multipart {
        parts: Vec<PreparedPart>,
        content_length: u64,
    },
}

impl std::fmt::Debug for PreparedBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreparedBody::Empty => f.write_str("Empty"),
            PreparedBody::Raw(data) => {
                f.debug_tuple("Raw").field(&data.len()).finish()
            }
            PreparedBody::Form(data) => {
                f.debug_tuple("Form").field(&data.len()).finish()
            }
            PreparedBody::Multipart { content_length, .. } => f
                .debug_struct("Multipart")
                .field("content_length", content_length)
                .finish(),
        }
    }
}

impl PreparedBody {
    pub fn is_empty(&self) -> bool {
        matches!(self, PreparedBody::Empty)
    }

    pub fn content_length(&self) -> u64 {
        match self {
            PreparedBody::Empty => 0,
            PreparedBody::Raw(data) => data.len() as u64,
            PreparedBody::Form(data) => data.len() as u64,
            PreparedBody::Multipart { content_length, .. } => *content_length,
        }
    }

    /// Content-Type implied by the body encoding; raw bodies leave it to the
    /// caller's headers.
    pub fn content_type(&self) -> Option<String> {
        match self {
            PreparedBody::Form(_) => {
                Some("application/x-www-form-urlencoded".to_string())
            }
            PreparedBody::Multipart { .. } => Some(format!(
                "multipart/form-data; boundary={}",
                MULTIPART_BOUNDARY
            )),
            _ => None,
        }
    }
}

/// Encode the request's body. Any file field switches the whole request to
/// multipart (form fields become inline text parts).
pub async fn prepare(req: &HttpRequest) -> Result<PreparedBody, HttpError> {
    if !req.multipart.is_empty() {
        let mut parts = Vec::new();
        for (name, value) in &req.form {
            parts.push(text_part(name, value.as_bytes().to_vec()));
        }
        for field in &req.multipart {
            match &field.value {
                MultipartValue::Text(text) => {
                    parts.push(text_part(&field.name, text.as_bytes().to_vec()));
                }
                MultipartValue::File(path) => {
                    let meta = tokio::fs::metadata(path).await.map_err(|_| {
                        HttpError::usage(format!("upload file not found: {}", path.display()))
                    })?;
                    if !meta.is_file() {
                        return Err(HttpError::usage(format!(
                            "upload path is not a file: {}",
                            path.display()
                        )));
                    }
                    parts.push(file_part(&field.name, path.clone(), meta.len()));
                }
            }
        }
        let mut content_length = 0u64;
        for part in &parts {
            let payload_len = match &part.payload {
                PreparedPayload::Bytes(b) => b.len() as u64,
                PreparedPayload::File(_, len) => *len,
            };
            content_length += part.head.len() as u64 + payload_len + 2; // CRLF after payload
        }
        content_length += closing_boundary().len() as u64;
        return Ok(PreparedBody::Multipart {
            parts,
            content_length,
        });
    }

    if !req.form.is_empty() {
        let encoded = req
            .form
            .iter()
            .map(|(name, value)| format!("{}={}", encode_form(name), encode_form(value)))
            .collect::<Vec<_>>()
            .join("&");
        return Ok(PreparedBody::Form(encoded.into_bytes()));
    }

    match &req.body {
        Some(data) => Ok(PreparedBody::Raw(data.clone())),
        None => Ok(PreparedBody::Empty),
    }
}

fn text_part(name: &str, payload: Vec<u8>) -> PreparedPart {
    let mut head = Vec::new();
    head.extend_from_slice(b"--");
    head.extend_from_slice(MULTIPART_BOUNDARY.as_bytes());
    head.extend_from_slice(b"\r\n");
    head.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
    );
    PreparedPart {
        head,
        payload: PreparedPayload::Bytes(payload),
    }
}

fn file_part(name: &str, path: PathBuf, len: u64) -> PreparedPart {
    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let mut head = Vec::new();
    head.extend_from_slice(b"--");
    head.extend_from_slice(MULTIPART_BOUNDARY.as_bytes());
    head.extend_from_slice(b"\r\n");
    head.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            name, filename
        )
        .as_bytes(),
    );
    head.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    PreparedPart {
        head,
        payload: PreparedPayload::File(path, len),
    }
}

fn closing_boundary() -> Vec<u8> {
    format!("--{}--\r\n", MULTIPART_BOUNDARY).into_bytes()
}

async fn write_with_idle<W: AsyncWrite + Unpin>(
    w: &mut W,
    data: &[u8],
    idle: Option<Duration>,
) -> Result<(), HttpError> {
    match idle {
        Some(window) => timeout(window, w.write_all(data))
            .await
            .map_err(|_| HttpError::Timeout)?
            .map_err(HttpError::Connect),
        None => w.write_all(data).await.map_err(HttpError::Connect),
    }
}

/// Write the prepared body onto the transport. Files are streamed in fixed
/// chunks, a field ending when the file read returns zero bytes; the abort
/// flag is checked between chunks.
pub async fn write_body<W: AsyncWrite + Unpin>(
    w: &mut W,
    body: &PreparedBody,
    state: &mut ResponseState,
    idle: Option<Duration>,
    abort: &AbortFlag,
) -> Result<(), HttpError> {
    match body {
        PreparedBody::Empty => Ok(()),
        PreparedBody::Raw(data) | PreparedBody::Form(data) => {
            write_with_idle(w, data, idle).await?;
            state.bytes_uploaded += data.len() as u64;
            Ok(())
        }
        PreparedBody::Multipart { parts, .. } => {
            for part in parts {
                if abort.is_aborted() {
                    return Err(HttpError::Aborted);
                }
                write_with_idle(w, &part.head, idle).await?;
                state.bytes_uploaded += part.head.len() as u64;
                match &part.payload {
                    PreparedPayload::Bytes(data) => {
                        write_with_idle(w, data, idle).await?;
                        state.bytes_uploaded += data.len() as u64;
                    }
                    PreparedPayload::File(path, declared_len) => {
                        let mut file = tokio::fs::File::open(path)
                            .await
                            .map_err(HttpError::Storage)?;
                        let mut sent = 0u64;
                        let mut chunk = vec![0u8; FILE_CHUNK];
                        loop {
                            if abort.is_aborted() {
                                return Err(HttpError::Aborted);
                            }
                            let n = file.read(&mut chunk).await.map_err(HttpError::Storage)?;
                            if n == 0 {
                                break; // zero-length read signals end of field
                            }
                            write_with_idle(w, &chunk[..n], idle).await?;
                            state.bytes_uploaded += n as u64;
                            sent += n as u64;
                        }
                        if sent != *declared_len {
                            // the file changed size after Content-Length was
                            // computed; framing is broken beyond repair
                            return Err(HttpError::Storage(std::io::Error::new(
                                std::io::ErrorKind::InvalidData,
                                "upload file changed size during send",
                            )));
                        }
                    }
                }
                write_with_idle(w, b"\r\n", idle).await?;
                state.bytes_uploaded += 2;
            }
            let closing = closing_boundary();
            write_with_idle(w, &closing, idle).await?;
            state.bytes_uploaded += closing.len() as u64;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::http::request::Method;
    use std::io::Write as _;

    fn temp_file(tag: &str, contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "corriere-upload-test-{}-{}",
            tag,
            std::process::id()
        ));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents).unwrap();
        path
    }

    #[tokio::test]
    async fn urlencoded_form_bytes() {
        let mut req = HttpRequest::new(Method::Post, "http://example.com/submit");
        req.form_field("name", "a b").form_field("q", "x&y");
        let body = prepare(&req).await.unwrap();
        match &body {
            PreparedBody::Form(data) => {
                assert_eq!(data.as_slice(), b"name=a%20b&q=x%26y");
            }
            _ => panic!("expected form body"),
        }
        assert_eq!(
            body.content_type().as_deref(),
            Some("application/x-www-form-urlencoded")
        );
    }

    #[tokio::test]
    async fn multipart_content_length_is_byte_exact() {
        let file = temp_file("exact", b"0123456789abcdef");
        let mut req = HttpRequest::new(Method::Post, "http://example.com/upload");
        req.multipart_text("alpha", "one");
        req.multipart_text("beta", "two two");
        req.multipart_file("payload", &file);

        let body = prepare(&req).await.unwrap();
        let declared = body.content_length();

        let (mut tx, mut rx) = tokio::io::duplex(256 * 1024);
        let mut state = ResponseState::new();
        let abort = AbortFlag::new();
        write_body(&mut tx, &body, &mut state, None, &abort)
            .await
            .unwrap();
        drop(tx);

        let mut written = Vec::new();
        rx.read_to_end(&mut written).await.unwrap();

        assert_eq!(written.len() as u64, declared);
        assert_eq!(state.bytes_uploaded, declared);
        let text = String::from_utf8_lossy(&written);
        assert!(text.contains("name=\"alpha\""));
        assert!(text.contains("filename="));
        assert!(text.ends_with(&format!("--{}--\r\n", MULTIPART_BOUNDARY)));
        let _ = std::fs::remove_file(&file);
    }

    #[tokio::test]
    async fn missing_upload_file_is_a_usage_error() {
        let mut req = HttpRequest::new(Method::Post, "http://example.com/upload");
        req.multipart_file("payload", "/no/such/corriere/file");
        let err = prepare(&req).await.unwrap_err();
        assert!(matches!(err, HttpError::Usage(_)));
    }

    #[tokio::test]
    async fn raw_body_passes_through() {
        let mut req = HttpRequest::new(Method::Put, "http://example.com/raw");
        req.body(b"raw-bytes".to_vec());
        let body = prepare(&req).await.unwrap();
        assert_eq!(body.content_length(), 9);
        assert!(body.content_type().is_none());
    }
}
