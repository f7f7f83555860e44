//! Session bootstrap.
//!
//! A session is a browser-equivalent identity: the `JSESSIONID` cookie set by
//! the entry page plus the ephemeral script-session token the DWR engine
//! hands out during its page-load handshake. One session per logical task;
//! never pooled or shared. Dropping the session releases the transport and
//! its connections, so every exit path of a task tears down cleanly.

use crate::config::PortalConfig;
use crate::dwr;
use crate::error::{EngineError, EngineResult};
use crate::transport::cookies::StoredCookie;
use crate::transport::Transport;
use rand::Rng;
use regex::Regex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Application root path the session cookie must cover.
const APP_ROOT: &str = "/PST";

const SESSION_COOKIE: &str = "JSESSIONID";

/// An established portal session. Valid only as long as the owned transport;
/// the script-session token must never be reused after the transport is gone.
pub struct Session {
    pub transport: Transport,
    pub http_session_id: String,
    pub script_session_id: String,
}

/// Establish a session: probe, entry page, cookie selection, DWR handshake.
pub async fn bootstrap(config: &PortalConfig) -> EngineResult<Session> {
    let transport = Transport::new(config)?;
    let start_url = config.start_url();

    // Best-effort connectivity probe; failure is logged, never fatal.
    if let Err(e) = transport
        .get(
            &config.engine_script_url(),
            &[("Referer", start_url.as_str()), ("Cache-Control", "no-cache")],
            Some(config.probe_timeout),
        )
        .await
    {
        debug!(error = %e, "connectivity probe failed");
    }

    let entry = transport
        .get(
            &start_url,
            &[("Referer", start_url.as_str())],
            Some(config.probe_timeout),
        )
        .await?;
    debug!(status = entry.status, "entry page loaded");

    let http_session_id = select_session_cookie(&transport.cookies().all()).ok_or_else(|| {
        EngineError::Session(format!(
            "no {SESSION_COOKIE} cookie after loading the entry page (check cookie handling for {APP_ROOT})"
        ))
    })?;

    let script_session_id = negotiate_script_session(&transport, config, &http_session_id).await?;

    Ok(Session {
        transport,
        http_session_id,
        script_session_id,
    })
}

/// Pick the session cookie value.
///
/// When the portal sets the cookie under several paths, prefer the one
/// scoped under the application root, longest path first; otherwise take any
/// cookie with the expected name.
pub fn select_session_cookie(cookies: &[StoredCookie]) -> Option<String> {
    let mut candidates: Vec<&StoredCookie> = cookies
        .iter()
        .filter(|c| c.name.eq_ignore_ascii_case(SESSION_COOKIE))
        .collect();
    candidates.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
    candidates
        .iter()
        .find(|c| c.path.starts_with(APP_ROOT))
        .or_else(|| candidates.first())
        .map(|c| c.value.clone())
}

/// Run the DWR page-load handshake and extract the script-session token.
async fn negotiate_script_session(
    transport: &Transport,
    config: &PortalConfig,
    http_session_id: &str,
) -> EngineResult<String> {
    let start_url = config.start_url();
    let handshake_url = config.dwr_call_url("__System", "pageLoaded");
    let short = Duration::from_secs(10);

    // The engine script load and the empty priming call are what a real page
    // load performs; both are best-effort.
    if let Err(e) = transport
        .get(&config.engine_script_url(), &[("Referer", start_url.as_str())], Some(short))
        .await
    {
        debug!(error = %e, "engine script load failed");
    }
    if let Err(e) = transport
        .post(
            &handshake_url,
            "callCount=0\n".to_string(),
            &[("Content-Type", "text/plain"), ("Referer", start_url.as_str())],
            Some(short),
        )
        .await
    {
        debug!(error = %e, "priming call failed");
    }

    let mut handshake = dwr::DwrCall::new("__System", "pageLoaded", &[], &config.start_path);
    handshake.batch_id = 0;
    let body = dwr::encode_call_body(&handshake, http_session_id, "");

    let response = transport
        .post(
            &handshake_url,
            body,
            &[
                ("Content-Type", "text/plain"),
                ("X-Requested-With", "XMLHttpRequest"),
                ("Origin", config.base.as_str()),
                ("Referer", start_url.as_str()),
            ],
            Some(config.probe_timeout),
        )
        .await?;

    match extract_script_session_id(&response.body) {
        Some(token) => Ok(token),
        None => {
            // Degraded path: subsequent calls may be less reliable, but the
            // session itself stays usable.
            warn!("script-session token not found in handshake reply, synthesizing one");
            Ok(fallback_script_session_id())
        }
    }
}

/// Extract the token from the handshake reply fragment.
///
/// The reply invokes `_setScriptSessionId` with the token. Preferred: the
/// restricted literal evaluator over the captured argument; fallback:
/// pattern matches against the known setter forms.
pub fn extract_script_session_id(body: &str) -> Option<String> {
    let text = body.trim_start_matches('\u{feff}');

    if let Some(arg) = dwr::literal::capture_call_argument(text, "_setScriptSessionId", 0) {
        if let Ok(value) = dwr::literal::parse_literal(&arg) {
            if let Some(token) = value.as_str() {
                let token = token.trim();
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }

    let patterns = [
        r#"_setScriptSessionId\("([^"]+)"\)"#,
        r#"scriptSessionId","([^"]+)""#,
        r#"dwr\.engine\._scriptSessionId\s*=\s*"([^"]+)""#,
    ];
    for pattern in patterns {
        if let Some(captures) = Regex::new(pattern).unwrap().captures(text) {
            let token = captures[1].trim().to_string();
            if !token.is_empty() {
                return Some(token);
            }
        }
    }
    None
}

/// Synthesize a collision-resistant token: random value plus current time.
fn fallback_script_session_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("{}{}", rand::thread_rng().gen_range(0..1000), millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(value: &str, path: &str) -> StoredCookie {
        StoredCookie {
            name: "JSESSIONID".to_string(),
            value: value.to_string(),
            domain: "servizipst.giustizia.it".to_string(),
            path: path.to_string(),
        }
    }

    #[test]
    fn test_prefers_app_root_path_over_root() {
        let cookies = [cookie("A", "/"), cookie("B", "/PST")];
        assert_eq!(select_session_cookie(&cookies).unwrap(), "B");
    }

    #[test]
    fn test_longest_app_root_path_wins() {
        let cookies = [cookie("A", "/PST"), cookie("B", "/PST/it")];
        assert_eq!(select_session_cookie(&cookies).unwrap(), "B");
    }

    #[test]
    fn test_falls_back_to_any_session_cookie() {
        let cookies = [cookie("A", "/other")];
        assert_eq!(select_session_cookie(&cookies).unwrap(), "A");
    }

    #[test]
    fn test_no_session_cookie() {
        let other = StoredCookie {
            name: "locale".to_string(),
            value: "it".to_string(),
            domain: "servizipst.giustizia.it".to_string(),
            path: "/".to_string(),
        };
        assert!(select_session_cookie(&[other]).is_none());
    }

    #[test]
    fn test_extract_token_via_literal_capture() {
        let body = r#"dwr.engine._setScriptSessionId("AB12/CD34");"#;
        assert_eq!(extract_script_session_id(body).unwrap(), "AB12/CD34");
    }

    #[test]
    fn test_extract_token_via_assignment_pattern() {
        let body = r#"dwr.engine._scriptSessionId = "XYZ789";"#;
        assert_eq!(extract_script_session_id(body).unwrap(), "XYZ789");
    }

    #[test]
    fn test_extract_token_missing() {
        assert!(extract_script_session_id("throw 'nope';").is_none());
    }

    #[test]
    fn test_fallback_token_is_nonempty_and_varies() {
        let a = fallback_script_session_id();
        assert!(!a.is_empty());
        assert!(a.chars().all(|c| c.is_ascii_digit()));
    }
}
