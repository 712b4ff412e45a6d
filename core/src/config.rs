/*
 * config.rs
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

//! Process-wide HTTP engine configuration: user agent string and response
//! cache directory. The UI sets these once at startup; unset cache path falls
//! back to ~/.corriere/cache.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

const DEFAULT_USER_AGENT: &str = "Corriere/0.1";

static USER_AGENT: RwLock<Option<String>> = RwLock::new(None);
static CACHE_PATH: RwLock<Option<PathBuf>> = RwLock::new(None);

/// Set the User-Agent sent with every request that does not override it.
pub fn set_user_agent(agent: &str) {
    let mut guard = USER_AGENT.write().unwrap_or_else(|e| e.into_inner());
    *guard = Some(agent.to_string());
}

/// Current User-Agent (configured or built-in default).
pub fn user_agent() -> String {
    let guard = USER_AGENT.read().unwrap_or_else(|e| e.into_inner());
    guard.clone().unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
}

/// Default cache directory: ~/.corriere/cache.
pub fn default_cache_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .map(|h| h.join(".corriere").join("cache"))
}

/// Set the response cache directory. The directory is created if missing;
/// a creation failure is returned and the previous path is kept.
pub fn set_cache_path(path: impl AsRef<Path>) -> io::Result<()> {
    let path = path.as_ref().to_path_buf();
    fs::create_dir_all(&path)?;
    let mut guard = CACHE_PATH.write().unwrap_or_else(|e| e.into_inner());
    *guard = Some(path);
    Ok(())
}

/// Current cache directory (configured or default). None when no home
/// directory is available, in which case caching is disabled.
pub fn cache_path() -> Option<PathBuf> {
    let guard = CACHE_PATH.read().unwrap_or_else(|e| e.into_inner());
    guard.clone().or_else(default_cache_dir)
}

/// Delete every record in the cache directory. Missing directory is not an
/// error; subdirectories are left alone.
pub fn clear_cache() -> io::Result<()> {
    let Some(dir) = cache_path() else {
        return Ok(());
    };
    let entries = match fs::read_dir(&dir) {
        Ok(e) => e,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_roundtrip() {
        assert!(!user_agent().is_empty());
        set_user_agent("TestAgent/9.9");
        assert_eq!(user_agent(), "TestAgent/9.9");
        set_user_agent(DEFAULT_USER_AGENT);
    }
}
