/*
 * request.rs
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

//! HTTP request value object: method, URL, headers, body variants, save path,
//! credentials, timeout, and behavior flags. Built by the caller, then handed
//! to an HttpTransfer; the transfer rejects mutation once a send has begun.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Head,
    Delete,
    Put,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Head => "HEAD",
            Method::Delete => "DELETE",
            Method::Put => "PUT",
        }
    }
}

/// One multipart field: inline text or a file streamed from disk.
#[derive(Debug, Clone)]
pub struct MultipartField {
    pub name: String,
    pub value: MultipartValue,
}

#[derive(Debug, Clone)]
pub enum MultipartValue {
    Text(String),
    File(PathBuf),
}

/// Basic auth credentials.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Default idle timeout when the caller does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// An outbound HTTP request. Header lookup is case-insensitive; body is at
/// most one of raw bytes, urlencoded form fields, or multipart fields.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub form: Vec<(String, String)>,
    pub multipart: Vec<MultipartField>,
    /// When set, the response body is also written to this path.
    pub save_path: Option<PathBuf>,
    pub credentials: Option<Credentials>,
    /// Idle watchdog window; zero disables the watchdog.
    pub timeout: Duration,
    pub disable_cache: bool,
    pub disable_cookies: bool,
    pub disable_cookie_send: bool,
    pub disable_tls_verify: bool,
    pub keep_alive: bool,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            form: Vec::new(),
            multipart: Vec::new(),
            save_path: None,
            credentials: None,
            timeout: DEFAULT_TIMEOUT,
            disable_cache: false,
            disable_cookies: false,
            disable_cookie_send: false,
            disable_tls_verify: false,
            keep_alive: true,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    /// Add or replace a header (case-insensitive replace).
    pub fn header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        self.headers
            .retain(|k, _| !k.eq_ignore_ascii_case(&name));
        self.headers.insert(name, value.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header_value(name).is_some()
    }

    /// Caller-set headers in arbitrary order (insertion order is irrelevant).
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn body(&mut self, data: Vec<u8>) -> &mut Self {
        self.body = Some(data);
        self
    }

    pub fn form_field(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.form.push((name.into(), value.into()));
        self
    }

    pub fn multipart_text(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.multipart.push(MultipartField {
            name: name.into(),
            value: MultipartValue::Text(value.into()),
        });
        self
    }

    pub fn multipart_file(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> &mut Self {
        self.multipart.push(MultipartField {
            name: name.into(),
            value: MultipartValue::File(path.into()),
        });
        self
    }

    pub fn save_to(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.save_path = Some(path.into());
        self
    }

    pub fn credentials(&mut self, username: impl Into<String>, password: impl Into<String>) -> &mut Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_replace_is_case_insensitive() {
        let mut req = HttpRequest::get("http://example.com/");
        req.header("Content-Type", "text/plain");
        req.header("content-type", "application/json");
        assert_eq!(req.header_value("CONTENT-TYPE"), Some("application/json"));
        assert_eq!(req.headers().count(), 1);
    }
}
