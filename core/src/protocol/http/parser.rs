/*
 * parser.rs
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

//! HTTP/1.1 response push parser: status line, headers, body (Content-Length,
//! chunked, or read-until-close). Single pass, never buffers a whole message;
//! header names are delivered lower-cased. Malformed input is an error, not a
//! best-effort parse.

use bytes::Buf;
use bytes::BytesMut;
use std::io;

/// Callback for response events. The transfer records these and routes them
/// to the content decoder, cache writer, file writer, and caller handler.
pub trait H1ResponseHandler {
    fn status(&mut self, version: &str, code: u16, reason: Option<&str>);
    fn header(&mut self, name: &str, value: &str);
    fn body_chunk(&mut self, data: &[u8]);
    fn end_body(&mut self);
    fn trailer(&mut self, name: &str, value: &str);
    fn complete(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    /// Message complete (or not yet started after reset).
    Idle,
    StatusLine,
    Headers,
    /// Headers done; the transfer must inspect them and call set_body_mode().
    HeadersComplete,
    Body,
    ChunkSize,
    ChunkData,
    ChunkTrailer,
}

/// Push parser for one HTTP/1.1 response at a time. Feed bytes via `receive`;
/// the handler is invoked for each complete token. Reusable via `reset`.
pub struct ResponseParser {
    state: ParseState,
    /// Content-Length when known (-1 for chunked or read-until-close).
    content_length: i64,
    bytes_received: i64,
    chunk_remaining: i64,
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::StatusLine,
            content_length: -1,
            bytes_received: 0,
            chunk_remaining: 0,
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    /// True while the body is being read with no framing (until close).
    pub fn reading_until_close(&self) -> bool {
        self.state == ParseState::Body && self.content_length < 0
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn find_crlf(buf: &[u8]) -> Option<usize> {
        let mut i = 0;
        while i + 1 < buf.len() {
            if buf[i] == b'\r' && buf[i + 1] == b'\n' {
                return Some(i);
            }
            i += 1;
        }
        None
    }

    fn take_line(buf: &mut BytesMut, line_end: usize, what: &str) -> io::Result<String> {
        let line = buf.split_to(line_end + 2); // include CRLF
        match std::str::from_utf8(&line[..line_end]) {
            Ok(s) => Ok(s.to_string()),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid {} UTF-8", what),
            )),
        }
    }

    /// Consume and parse as much as possible from buf; partial tokens remain
    /// buffered for the next call.
    pub fn receive<H: H1ResponseHandler>(
        &mut self,
        buf: &mut BytesMut,
        handler: &mut H,
    ) -> io::Result<()> {
        while !buf.is_empty() {
            match self.state {
                ParseState::StatusLine => {
                    let line_end = match Self::find_crlf(buf) {
                        Some(n) => n,
                        None => return Ok(()),
                    };
                    let line = Self::take_line(buf, line_end, "status line")?;
                    // HTTP/1.1 200 OK (reason phrase optional)
                    let mut parts = line.splitn(3, ' ');
                    let version = parts.next().unwrap_or("");
                    if !version.starts_with("HTTP/") {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "malformed status line",
                        ));
                    }
                    let code = parts
                        .next()
                        .and_then(|s| s.parse::<u16>().ok())
                        .ok_or_else(|| {
                            io::Error::new(io::ErrorKind::InvalidData, "malformed status code")
                        })?;
                    let reason = parts.next();
                    handler.status(version, code, reason);
                    self.state = ParseState::Headers;
                }
                ParseState::Headers => {
                    let line_end = match Self::find_crlf(buf) {
                        Some(n) => n,
                        None => return Ok(()),
                    };
                    if line_end == 0 {
                        buf.advance(2);
                        self.state = ParseState::HeadersComplete;
                        // transfer inspects headers and calls set_body_mode()
                        return Ok(());
                    }
                    let line = Self::take_line(buf, line_end, "header")?;
                    let colon = line.find(':').ok_or_else(|| {
                        io::Error::new(io::ErrorKind::InvalidData, "header line without colon")
                    })?;
                    let name = line[..colon].trim().to_ascii_lowercase();
                    let value = line[colon + 1..].trim();
                    handler.header(&name, value);
                }
                ParseState::Body => {
                    if self.content_length >= 0 {
                        let remaining = (self.content_length - self.bytes_received) as usize;
                        let to_read = remaining.min(buf.len());
                        if to_read > 0 {
                            let chunk = buf.split_to(to_read);
                            handler.body_chunk(&chunk);
                            self.bytes_received += to_read as i64;
                        }
                        if self.bytes_received >= self.content_length {
                            handler.end_body();
                            handler.complete();
                            self.state = ParseState::Idle;
                        }
                    } else {
                        // read until close: deliver everything available;
                        // connection EOF signals the end of the message
                        let chunk = buf.split_to(buf.len());
                        handler.body_chunk(&chunk);
                        return Ok(());
                    }
                }
                ParseState::ChunkSize => {
                    let line_end = match Self::find_crlf(buf) {
                        Some(n) => n,
                        None => return Ok(()),
                    };
                    let line = Self::take_line(buf, line_end, "chunk size")?;
                    let hex_part = line.split(';').next().unwrap_or(&line).trim();
                    self.chunk_remaining =
                        i64::from_str_radix(hex_part, 16).map_err(|_| {
                            io::Error::new(io::ErrorKind::InvalidData, "invalid chunk size")
                        })?;
                    if self.chunk_remaining == 0 {
                        self.state = ParseState::ChunkTrailer;
                    } else {
                        self.state = ParseState::ChunkData;
                    }
                }
                ParseState::ChunkData => {
                    let to_read = (self.chunk_remaining as usize).min(buf.len());
                    if to_read > 0 {
                        let chunk = buf.split_to(to_read);
                        handler.body_chunk(&chunk);
                        self.chunk_remaining -= to_read as i64;
                    }
                    if self.chunk_remaining == 0 {
                        // consume the CRLF after the chunk payload
                        if buf.len() >= 2 {
                            buf.advance(2);
                            self.state = ParseState::ChunkSize;
                        } else {
                            return Ok(());
                        }
                    } else {
                        return Ok(());
                    }
                }
                ParseState::ChunkTrailer => {
                    let line_end = match Self::find_crlf(buf) {
                        Some(n) => n,
                        None => return Ok(()),
                    };
                    if line_end == 0 {
                        buf.advance(2);
                        handler.end_body();
                        handler.complete();
                        self.state = ParseState::Idle;
                    } else {
                        let line = Self::take_line(buf, line_end, "trailer")?;
                        if let Some(colon) = line.find(':') {
                            let name = line[..colon].trim().to_ascii_lowercase();
                            let value = line[colon + 1..].trim();
                            handler.trailer(&name, value);
                        }
                    }
                }
                ParseState::HeadersComplete => {
                    // waiting for the transfer to call set_body_mode()
                    return Ok(());
                }
                ParseState::Idle => return Ok(()),
            }
        }
        Ok(())
    }

    /// Called by the transfer after inspecting the headers (state must be
    /// HeadersComplete). `content_length` Some(0) means no body at all.
    pub fn set_body_mode(&mut self, content_length: Option<u64>, chunked: bool) {
        if self.state != ParseState::HeadersComplete {
            return;
        }
        if chunked {
            self.content_length = -1;
            self.state = ParseState::ChunkSize;
        } else if let Some(cl) = content_length {
            self.content_length = cl as i64;
            self.bytes_received = 0;
            if cl == 0 {
                self.state = ParseState::Idle;
            } else {
                self.state = ParseState::Body;
            }
        } else {
            self.content_length = -1;
            self.state = ParseState::Body; // read until close
        }
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}
