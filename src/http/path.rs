//! Request-path parsing and the process-wide parsed-path cache.
//!
//! Parsing a raw request path validates and percent-decodes it. When a
//! service reports a path as cacheable and its response completes with a
//! 2xx/3xx status, the parsed result is stored keyed by the exact raw path
//! string, so future decodes of the identical raw path skip re-parsing.
//! Stores are idempotent.

use std::sync::OnceLock;

use dashmap::DashMap;

/// Upper bound on distinct raw paths kept in the cache.
const MAX_CACHED_PATHS: usize = 4096;

fn cache() -> &'static DashMap<String, PathAndQuery> {
    static CACHE: OnceLock<DashMap<String, PathAndQuery>> = OnceLock::new();
    CACHE.get_or_init(DashMap::new)
}

/// A validated, percent-decoded request path split from its query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathAndQuery {
    path: String,
    query: Option<String>,
    cached: bool,
}

impl PathAndQuery {
    /// Parse and validate a raw request path in origin form.
    ///
    /// Rejects paths that do not start with `/`, contain NUL/control
    /// characters, carry malformed percent escapes, or resolve `.`/`..`
    /// segments. Returns `None` on any violation; the caller renders 400.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() || !raw.starts_with('/') {
            return None;
        }

        let (raw_path, query) = match raw.find('?') {
            Some(pos) => (&raw[..pos], Some(raw[pos + 1..].to_string())),
            None => (raw, None),
        };

        let path = percent_decode(raw_path)?;
        if path.bytes().any(|b| b < 0x20 || b == 0x7f) {
            return None;
        }
        if path.split('/').any(|seg| seg == "." || seg == "..") {
            return None;
        }

        Some(Self {
            path,
            query,
            cached: false,
        })
    }

    /// Look up a previously stored parse for the identical raw path string.
    pub fn cached(raw: &str) -> Option<PathAndQuery> {
        cache().get(raw).map(|entry| entry.clone())
    }

    pub fn of(path: impl Into<String>, query: Option<String>) -> Self {
        Self {
            path: path.into(),
            query,
            cached: false,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Whether this instance came out of the cache.
    pub fn is_cached(&self) -> bool {
        self.cached
    }

    /// Store this parse keyed by the exact raw path it was decoded from.
    ///
    /// Idempotent: storing the same raw path again replaces the entry with
    /// an equal one. A full cache drops new entries rather than evicting.
    pub fn store_in_cache(&self, raw: &str) {
        let cache = cache();
        if cache.len() >= MAX_CACHED_PATHS && !cache.contains_key(raw) {
            return;
        }
        let mut entry = self.clone();
        entry.cached = true;
        cache.insert(raw.to_string(), entry);
    }
}

fn percent_decode(input: &str) -> Option<String> {
    if !input.contains('%') {
        return Some(input.to_string());
    }
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = hex_val(*bytes.get(i + 1)?)?;
            let lo = hex_val(*bytes.get(i + 2)?)?;
            out.push(hi << 4 | lo);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
