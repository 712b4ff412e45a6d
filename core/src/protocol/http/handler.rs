/*
 * handler.rs
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

//! Response handler trait (push model). The transfer drives this as data
//! arrives, from the network or from a cache replay.

use crate::protocol::http::error::HttpError;

/// Handler for response events. Exactly one terminal callback fires per send:
/// `complete`, `failed`, or `aborted`.
///
/// Flow for a response with body:
/// 1. `status(code, version)`
/// 2. `header(name, value)` — for each header, names lower-cased
/// 3. `start_body()`
/// 4. `body_chunk(data)` — decoded bytes, valid only for the call
/// 5. `end_body()`
/// 6. `header(name, value)` — for each trailer (if any)
/// 7. `complete()`
///
/// Status errors (>= 400 or < 100) and transport/protocol/timeout/storage
/// failures skip straight to `failed`; an abort skips to `aborted`.
pub trait ResponseHandler: Send {
    fn status(&mut self, code: u16, version: &str);

    fn header(&mut self, name: &str, value: &str);

    /// Not called for responses without a body (HEAD, 204, 304).
    fn start_body(&mut self);

    fn body_chunk(&mut self, data: &[u8]);

    fn end_body(&mut self);

    fn complete(&mut self);

    fn failed(&mut self, error: &HttpError);

    /// Fires exactly once when the caller aborts the request; no other
    /// callback follows it.
    fn aborted(&mut self);
}
