// Copyright (c) The bsprun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for bsprun-runner.

use camino::{Utf8Path, Utf8PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use url::Url;

/// Utilities for pluralizing various words based on count or plurality.
pub mod plural {
    /// Returns "test" if `count` is 1, otherwise "tests".
    pub fn tests_str(count: usize) -> &'static str {
        if count == 1 { "test" } else { "tests" }
    }

    /// Returns "target" if `count` is 1, otherwise "targets".
    pub fn targets_str(count: usize) -> &'static str {
        if count == 1 { "target" } else { "targets" }
    }

    /// Returns "line" if `count` is 1, otherwise "lines".
    pub fn lines_str(count: usize) -> &'static str {
        if count == 1 { "line" } else { "lines" }
    }
}

const FILE_URI_SCHEME: &str = "file:";

/// Removes ANSI escape sequences and other terminal control codes from `s`.
pub fn strip_ansi(s: &str) -> String {
    strip_ansi_escapes::strip_str(s)
}

/// Converts a `file://` URI into a path, decoding percent-escapes. Anything that isn't a
/// `file` URI is taken to be a plain path.
pub fn uri_to_path(uri: &str) -> Utf8PathBuf {
    if uri.starts_with(FILE_URI_SCHEME) {
        let path = Url::parse(uri)
            .ok()
            .and_then(|url| url.to_file_path().ok())
            .and_then(|path| Utf8PathBuf::from_path_buf(path).ok());
        if let Some(path) = path {
            return path;
        }
    }
    Utf8PathBuf::from(uri)
}

/// Converts a path into a `file://` URI, percent-encoding it as needed.
///
/// Relative paths can't be expressed as file URIs and are returned unchanged.
pub(crate) fn path_to_uri(path: &Utf8Path) -> String {
    match Url::from_file_path(path) {
        Ok(url) => url.into(),
        Err(()) => path.as_str().to_owned(),
    }
}

/// Resolves `path` against `base` if it is relative.
pub(crate) fn resolve_path(base: &Utf8Path, path: Utf8PathBuf) -> Utf8PathBuf {
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// Locks `mutex`, ignoring poisoning.
///
/// Critical sections in this crate never leave shared state half-updated, so the data behind a
/// poisoned mutex is still consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Normalizes line endings in `s` to `\r\n`, as expected by terminal-style run output.
pub(crate) fn to_crlf(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev = None;
    for c in s.chars() {
        if c == '\n' && prev != Some('\r') {
            out.push('\r');
        }
        out.push(c);
        prev = Some(c);
    }
    out
}

/// Returns `value` unless it is absent or the literal string `null`.
///
/// Some servers serialize missing values as the string `null`.
pub(crate) fn non_null(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty() && *v != "null")
}
