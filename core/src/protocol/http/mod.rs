/*
 * mod.rs
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

//! HTTP client engine: requests multiplexed over a bounded pool of reusable
//! TCP/TLS connections, transparent gzip/deflate decoding, transparent
//! on-disk caching with revalidation, and streaming uploads.
//!
//! Design:
//! - Push-parsed responses: the transfer drives a state-machine parser and a
//!   callback `ResponseHandler` as data arrives; nothing buffers a whole
//!   message.
//! - Buffers: `bytes` crate (BytesMut parse buffer).
//! - HTTP/1.1 only; no redirect following, no pipelining.
//! - The connection pool is the only process-wide shared state.

pub mod cache;
pub mod connection;
pub mod cookies;
pub mod decoder;
pub mod error;
pub mod handler;
pub mod parser;
pub mod pool;
pub mod request;
pub mod response;
pub mod transfer;
pub mod upload;

pub use error::HttpError;
pub use handler::ResponseHandler;
pub use request::{HttpRequest, Method, MultipartField, MultipartValue};
pub use response::{HttpResponse, ReadyState, ResponseState};
pub use transfer::{
    download, request, request_stream, request_sync, upload as upload_file, AbortHandle,
    HttpTransfer,
};
