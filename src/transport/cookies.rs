//! In-memory cookie store.
//!
//! reqwest's bundled jar cannot be inspected, and session bootstrap needs to
//! look at the stored `JSESSIONID` cookies (same name, different paths) to
//! pick the right one. This store plugs into the client via the
//! `reqwest::cookie::CookieStore` seam and exposes its contents.

use reqwest::cookie::CookieStore;
use reqwest::header::HeaderValue;
use reqwest::Url;
use std::sync::Mutex;

/// A cookie as received from the portal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    /// Domain the cookie applies to (request host unless set explicitly).
    pub domain: String,
    /// Path attribute, or the default path derived from the request URL.
    pub path: String,
}

/// Inspectable cookie store for one transport instance.
#[derive(Debug, Default)]
pub struct MemoryCookieStore {
    inner: Mutex<Vec<StoredCookie>>,
}

impl MemoryCookieStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all stored cookies.
    pub fn all(&self) -> Vec<StoredCookie> {
        self.inner.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Insert or replace a cookie, keyed by (name, domain, path).
    pub fn store(&self, cookie: StoredCookie) {
        if let Ok(mut guard) = self.inner.lock() {
            if let Some(existing) = guard.iter_mut().find(|c| {
                c.name == cookie.name && c.domain == cookie.domain && c.path == cookie.path
            }) {
                existing.value = cookie.value;
            } else {
                guard.push(cookie);
            }
        }
    }
}

impl CookieStore for MemoryCookieStore {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        let host = url.host_str().unwrap_or_default().to_string();
        let default_path = default_path_for(url.path());
        for header in cookie_headers {
            let Ok(raw) = header.to_str() else { continue };
            if let Some(cookie) = parse_set_cookie(raw, &host, &default_path) {
                self.store(cookie);
            }
        }
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        let host = url.host_str().unwrap_or_default();
        let path = url.path();
        let guard = self.inner.lock().ok()?;
        let pairs: Vec<String> = guard
            .iter()
            .filter(|c| domain_matches(host, &c.domain) && path_matches(path, &c.path))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();
        if pairs.is_empty() {
            return None;
        }
        HeaderValue::from_str(&pairs.join("; ")).ok()
    }
}

/// Parse one Set-Cookie header into a stored cookie.
///
/// Only the attributes this portal actually varies (Path, Domain) are kept;
/// expiry and flags are irrelevant for a session-scoped store.
fn parse_set_cookie(raw: &str, default_domain: &str, default_path: &str) -> Option<StoredCookie> {
    let mut segments = raw.split(';');
    let pair = segments.next()?.trim();
    let eq = pair.find('=')?;
    let name = pair[..eq].trim().to_string();
    let value = pair[eq + 1..].trim().trim_matches('"').to_string();
    if name.is_empty() {
        return None;
    }

    let mut domain = default_domain.to_string();
    let mut path = default_path.to_string();
    for segment in segments {
        let segment = segment.trim();
        let (attr, attr_value) = match segment.split_once('=') {
            Some((a, v)) => (a.trim(), v.trim()),
            None => (segment, ""),
        };
        if attr.eq_ignore_ascii_case("path") && attr_value.starts_with('/') {
            path = attr_value.to_string();
        } else if attr.eq_ignore_ascii_case("domain") && !attr_value.is_empty() {
            domain = attr_value.trim_start_matches('.').to_string();
        }
    }

    Some(StoredCookie {
        name,
        value,
        domain,
        path,
    })
}

/// RFC 6265 default-path: the request path up to (not including) its last `/`.
fn default_path_for(request_path: &str) -> String {
    if !request_path.starts_with('/') {
        return "/".to_string();
    }
    match request_path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => request_path[..idx].to_string(),
    }
}

fn domain_matches(host: &str, cookie_domain: &str) -> bool {
    host.eq_ignore_ascii_case(cookie_domain)
        || host
            .to_ascii_lowercase()
            .ends_with(&format!(".{}", cookie_domain.to_ascii_lowercase()))
}

/// RFC 6265 path-match.
fn path_matches(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    if let Some(rest) = request_path.strip_prefix(cookie_path) {
        return cookie_path.ends_with('/') || rest.starts_with('/');
    }
    false
}
