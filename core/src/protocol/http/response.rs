/*
 * response.rs
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

//! Request lifecycle states and per-request mutable response state. The ready
//! state only moves through the checked transition function; an illegal
//! transition is a protocol error rather than silently ignored.

use crate::protocol::http::error::HttpError;

/// Caller-visible lifecycle phase of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Constructed but unsent.
    Initial,
    /// URL validated, cache key computed.
    Ready,
    /// Waiting for a pooled connection.
    AwaitingConnection,
    /// Request line, headers, and body written.
    RequestSent,
    /// Status line and headers received.
    ResponseHeaders,
    /// Body chunks flowing.
    ResponseBody,
    Completed,
    Aborted,
}

impl ReadyState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ReadyState::Completed | ReadyState::Aborted)
    }

    /// True once send() has started and no terminal state is reached.
    pub fn is_in_flight(self) -> bool {
        !matches!(self, ReadyState::Initial) && !self.is_terminal()
    }

    fn allows(self, next: ReadyState) -> bool {
        use ReadyState::*;
        if next == Aborted {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Initial, Ready)
                | (Ready, AwaitingConnection)
                // cache hits replay headers without touching the network
                | (Ready, ResponseHeaders)
                | (AwaitingConnection, RequestSent)
                | (RequestSent, ResponseHeaders)
                | (ResponseHeaders, ResponseBody)
                | (ResponseHeaders, Completed)
                | (ResponseBody, Completed)
        )
    }
}

/// Per-request mutable state. Created at send time, reset at the start of
/// every send, owned exclusively by the transfer driving the request.
#[derive(Debug)]
pub struct ResponseState {
    pub ready: ReadyState,
    pub status: u16,
    pub version: String,
    /// Response headers with lower-cased names, in wire order.
    pub headers: Vec<(String, String)>,
    pub bytes_uploaded: u64,
    pub upload_total: u64,
    pub bytes_downloaded: u64,
    pub download_total: u64,
}

impl ResponseState {
    pub fn new() -> Self {
        Self {
            ready: ReadyState::Initial,
            status: 0,
            version: String::new(),
            headers: Vec::new(),
            bytes_uploaded: 0,
            upload_total: 0,
            bytes_downloaded: 0,
            download_total: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Checked transition; an illegal move is reported as a protocol error.
    pub fn advance(&mut self, next: ReadyState) -> Result<(), HttpError> {
        if !self.ready.allows(next) {
            return Err(HttpError::protocol(format!(
                "illegal state transition {:?} -> {:?}",
                self.ready, next
            )));
        }
        self.ready = next;
        Ok(())
    }

    /// Case-insensitive response header lookup (names are stored lower-cased).
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }
}

impl Default for ResponseState {
    fn default() -> Self {
        Self::new()
    }
}

/// A completed response with the body joined into one buffer. Returned by the
/// one-shot request operations; streaming consumers use ResponseHandler.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_network_path() {
        let mut s = ResponseState::new();
        for next in [
            ReadyState::Ready,
            ReadyState::AwaitingConnection,
            ReadyState::RequestSent,
            ReadyState::ResponseHeaders,
            ReadyState::ResponseBody,
            ReadyState::Completed,
        ] {
            s.advance(next).unwrap();
        }
        assert!(s.ready.is_terminal());
    }

    #[test]
    fn cache_path_skips_network_states() {
        let mut s = ResponseState::new();
        s.advance(ReadyState::Ready).unwrap();
        s.advance(ReadyState::ResponseHeaders).unwrap();
        s.advance(ReadyState::ResponseBody).unwrap();
        s.advance(ReadyState::Completed).unwrap();
    }

    #[test]
    fn body_after_completed_is_illegal() {
        let mut s = ResponseState::new();
        s.advance(ReadyState::Ready).unwrap();
        s.advance(ReadyState::ResponseHeaders).unwrap();
        s.advance(ReadyState::Completed).unwrap();
        assert!(s.advance(ReadyState::ResponseBody).is_err());
    }

    #[test]
    fn abort_from_any_non_terminal() {
        let mut s = ResponseState::new();
        s.advance(ReadyState::Aborted).unwrap();
        let mut s = ResponseState::new();
        s.advance(ReadyState::Ready).unwrap();
        s.advance(ReadyState::AwaitingConnection).unwrap();
        s.advance(ReadyState::Aborted).unwrap();
        assert!(s.advance(ReadyState::Aborted).is_err());
    }
}
