/*
 * lib.rs
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

//! C FFI for the corriere HTTP engine. Requests are identified by the u64 id
//! returned from the start functions; `corriere_http_abort(id)` cancels one.
//! Callbacks run on engine worker threads; the UI must marshal to its main
//! thread. Pointer arguments passed to callbacks are only valid for the
//! duration of the call. All string parameters are UTF-8 NUL-terminated.

use libc::{c_char, c_int, c_uchar, c_void};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use corriere_core::config;
use corriere_core::protocol::http::{
    AbortHandle, HttpError, HttpRequest, HttpTransfer, Method, ResponseHandler,
};

/// Wrapper so *mut c_void can be moved into Send closures. C callbacks are
/// invoked from worker threads.
struct SendableUserData(*mut c_void);
unsafe impl Send for SendableUserData {}
unsafe impl Sync for SendableUserData {}

/// status, body pointer, body length, user_data.
type OnHttpComplete = extern "C" fn(u16, *const c_uchar, usize, *mut c_void);
/// error message (UTF-8, valid for the call only), user_data.
type OnHttpError = extern "C" fn(*const c_char, *mut c_void);

static RUNTIME: Lazy<tokio::runtime::Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("corriere-ffi")
        .enable_all()
        .build()
        .expect("corriere ffi runtime")
});

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);
static ACTIVE: Lazy<Mutex<HashMap<u64, AbortHandle>>> = Lazy::new(|| Mutex::new(HashMap::new()));

unsafe fn cstr_arg(p: *const c_char) -> Option<String> {
    if p.is_null() {
        return None;
    }
    CStr::from_ptr(p).to_str().ok().map(String::from)
}

fn report_error(on_error: OnHttpError, user_data: *mut c_void, message: &str) {
    let message = CString::new(message).unwrap_or_default();
    on_error(message.as_ptr(), user_data);
}

/// Joins the streamed response for the C surface.
#[derive(Default)]
struct JoinHandler {
    status: u16,
    body: Vec<u8>,
}

impl ResponseHandler for JoinHandler {
    fn status(&mut self, code: u16, _version: &str) {
        self.status = code;
    }
    fn header(&mut self, _name: &str, _value: &str) {}
    fn start_body(&mut self) {}
    fn body_chunk(&mut self, data: &[u8]) {
        self.body.extend_from_slice(data);
    }
    fn end_body(&mut self) {}
    fn complete(&mut self) {}
    fn failed(&mut self, _error: &HttpError) {}
    fn aborted(&mut self) {}
}

fn start_transfer(
    request: HttpRequest,
    on_complete: OnHttpComplete,
    on_error: OnHttpError,
    user_data: *mut c_void,
) -> u64 {
    let id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
    let mut transfer = HttpTransfer::new(request);
    ACTIVE
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(id, transfer.abort_handle());
    let user_data = SendableUserData(user_data);

    RUNTIME.spawn(async move {
        let user_data = user_data;
        let mut handler = JoinHandler::default();
        let result = transfer.send(&mut handler).await;
        ACTIVE
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        match result {
            Ok(()) => on_complete(
                handler.status,
                handler.body.as_ptr(),
                handler.body.len(),
                user_data.0,
            ),
            Err(e) => report_error(on_error, user_data.0, &e.to_string()),
        }
    });
    id
}

fn parse_method(method: Option<&str>) -> Method {
    match method.map(|m| m.to_ascii_uppercase()).as_deref() {
        Some("POST") => Method::Post,
        Some("HEAD") => Method::Head,
        Some("DELETE") => Method::Delete,
        Some("PUT") => Method::Put,
        _ => Method::Get,
    }
}

/// Start a request. `body` may be NULL; `timeout_ms` 0 disables the idle
/// watchdog; `disable_cache` non-zero bypasses the response cache.
/// Returns the request id, or 0 when the arguments are unusable (on_error has
/// already fired).
#[no_mangle]
pub unsafe extern "C" fn corriere_http_request(
    method: *const c_char,
    url: *const c_char,
    body: *const c_uchar,
    body_len: usize,
    timeout_ms: u32,
    disable_cache: c_int,
    on_complete: OnHttpComplete,
    on_error: OnHttpError,
    user_data: *mut c_void,
) -> u64 {
    let Some(url) = cstr_arg(url) else {
        report_error(on_error, user_data, "invalid url argument");
        return 0;
    };
    let method = cstr_arg(method);
    let mut request = HttpRequest::new(parse_method(method.as_deref()), url);
    if !body.is_null() && body_len > 0 {
        request.body(std::slice::from_raw_parts(body, body_len).to_vec());
    }
    request.timeout(std::time::Duration::from_millis(u64::from(timeout_ms)));
    request.disable_cache = disable_cache != 0;
    start_transfer(request, on_complete, on_error, user_data)
}

/// Download a URL to a file. The completion callback receives an empty body;
/// the payload lives at `save_path`.
#[no_mangle]
pub unsafe extern "C" fn corriere_http_download(
    url: *const c_char,
    save_path: *const c_char,
    on_complete: OnHttpComplete,
    on_error: OnHttpError,
    user_data: *mut c_void,
) -> u64 {
    let (Some(url), Some(save_path)) = (cstr_arg(url), cstr_arg(save_path)) else {
        report_error(on_error, user_data, "invalid url or save path argument");
        return 0;
    };
    let mut request = HttpRequest::get(url);
    request.save_to(save_path);
    start_transfer(request, on_complete, on_error, user_data)
}

/// Upload a file as multipart/form-data (field name "file").
#[no_mangle]
pub unsafe extern "C" fn corriere_http_upload(
    url: *const c_char,
    file_path: *const c_char,
    on_complete: OnHttpComplete,
    on_error: OnHttpError,
    user_data: *mut c_void,
) -> u64 {
    let (Some(url), Some(file_path)) = (cstr_arg(url), cstr_arg(file_path)) else {
        report_error(on_error, user_data, "invalid url or file path argument");
        return 0;
    };
    let mut request = HttpRequest::post(url);
    request.multipart_file("file", file_path);
    start_transfer(request, on_complete, on_error, user_data)
}

/// Abort an in-flight request. Unknown or already-finished ids are a no-op;
/// aborting twice is safe.
#[no_mangle]
pub extern "C" fn corriere_http_abort(request_id: u64) {
    let handle = ACTIVE
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .get(&request_id)
        .cloned();
    if let Some(handle) = handle {
        handle.abort();
    }
}

/// Set the engine-wide User-Agent.
#[no_mangle]
pub unsafe extern "C" fn corriere_set_user_agent(agent: *const c_char) {
    if let Some(agent) = cstr_arg(agent) {
        config::set_user_agent(&agent);
    }
}

/// Set the response cache directory. Returns 0 on success.
#[no_mangle]
pub unsafe extern "C" fn corriere_set_cache_path(path: *const c_char) -> c_int {
    match cstr_arg(path) {
        Some(path) => match config::set_cache_path(&path) {
            Ok(()) => 0,
            Err(_) => -1,
        },
        None => -1,
    }
}

/// Delete every cached response. Returns 0 on success.
#[no_mangle]
pub extern "C" fn corriere_clear_cache() -> c_int {
    match config::clear_cache() {
        Ok(()) => 0,
        Err(_) => -1,
    }
}
