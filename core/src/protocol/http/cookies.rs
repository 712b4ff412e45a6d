/*
 * cookies.rs
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

//! Per-domain cookie strings, in memory only. Each Set-Cookie stores its
//! name=value pair under the response's host; attributes (Path, Expires,
//! HttpOnly, ...) are ignored. No persistence and no cross-domain matching.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

static STORE: OnceLock<Mutex<HashMap<String, Vec<(String, String)>>>> = OnceLock::new();

fn store() -> &'static Mutex<HashMap<String, Vec<(String, String)>>> {
    STORE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Record one Set-Cookie header value for a domain. Same-name cookies are
/// replaced; attributes after the first ';' are dropped.
pub fn store_cookie(domain: &str, set_cookie: &str) {
    let pair = set_cookie.split(';').next().unwrap_or("").trim();
    let Some(eq) = pair.find('=') else {
        return;
    };
    let name = pair[..eq].trim().to_string();
    let value = pair[eq + 1..].trim().to_string();
    if name.is_empty() {
        return;
    }
    let mut map = store().lock().unwrap_or_else(|e| e.into_inner());
    let cookies = map.entry(domain.to_ascii_lowercase()).or_default();
    match cookies.iter_mut().find(|(n, _)| *n == name) {
        Some(entry) => entry.1 = value,
        None => cookies.push((name, value)),
    }
}

/// Cookie header value for a domain, or None when nothing is stored.
pub fn cookie_header(domain: &str) -> Option<String> {
    let map = store().lock().unwrap_or_else(|e| e.into_inner());
    let cookies = map.get(&domain.to_ascii_lowercase())?;
    if cookies.is_empty() {
        return None;
    }
    Some(
        cookies
            .iter()
            .map(|(n, v)| format!("{}={}", n, v))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

/// Drop every stored cookie.
pub fn clear() {
    store().lock().unwrap_or_else(|e| e.into_inner()).clear();
}
