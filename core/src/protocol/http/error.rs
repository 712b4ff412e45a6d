/*
 * error.rs
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

//! HTTP engine errors. One terminal error per request; cache write failures
//! are logged and never surfaced through this type.

use std::fmt;
use std::io;

/// Errors from the HTTP engine (transfer, pool, cache replay, upload).
#[derive(Debug)]
pub enum HttpError {
    /// DNS/TCP connect failure or mid-stream disconnect.
    Connect(io::Error),
    /// TLS handshake failure.
    Tls(io::Error),
    /// Malformed status line, headers, chunk framing, or content encoding.
    Protocol(String),
    /// HTTP status >= 400 or < 100 (and not 304 during revalidation).
    Status(u16),
    /// Idle watchdog fired with no read/write activity in the window.
    Timeout,
    /// Save-path file error or cache replay read error. Fatal to the request.
    Storage(io::Error),
    /// Precondition violated at the call site (bad URL, mutation while
    /// sending, sync send from the network context, upload file not found).
    Usage(String),
    /// The request was aborted by the caller.
    Aborted,
}

impl HttpError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }

    /// True for errors raised synchronously before any asynchronous work.
    pub fn is_usage(&self) -> bool {
        matches!(self, HttpError::Usage(_))
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpError::Connect(e) => write!(f, "connection failed: {}", e),
            HttpError::Tls(e) => write!(f, "TLS handshake failed: {}", e),
            HttpError::Protocol(m) => write!(f, "protocol error: {}", m),
            HttpError::Status(code) => write!(f, "HTTP status {}", code),
            HttpError::Timeout => write!(f, "request timed out"),
            HttpError::Storage(e) => write!(f, "local storage error: {}", e),
            HttpError::Usage(m) => write!(f, "{}", m),
            HttpError::Aborted => write!(f, "request aborted"),
        }
    }
}

impl std::error::Error for HttpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HttpError::Connect(e) | HttpError::Tls(e) | HttpError::Storage(e) => Some(e),
            _ => None,
        }
    }
}
