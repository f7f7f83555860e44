//! DWR remoting transport.
//!
//! The portal's lookup endpoints speak DWR "plaincall" remoting: a plain-text
//! POST body of `key=value` lines in a fixed order, answered by a JavaScript
//! fragment that invokes a callback with the payload as a literal argument.
//! The line order and key names here must match the upstream framework
//! exactly; reordering breaks the calls.

pub mod literal;

use crate::config::PortalConfig;
use crate::error::{EngineError, EngineResult};
use crate::session::Session;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use serde_json::Value;

/// One remoting call: service, method, ordered positional string parameters.
#[derive(Debug, Clone)]
pub struct DwrCall {
    pub service: String,
    pub method: String,
    pub params: Vec<String>,
    pub batch_id: u32,
    /// Originating page path sent in the `page=` line.
    pub page_path: String,
}

impl DwrCall {
    pub fn new(service: &str, method: &str, params: &[&str], page_path: &str) -> Self {
        Self {
            service: service.to_string(),
            method: method.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            batch_id: 1,
            page_path: page_path.to_string(),
        }
    }
}

/// Encode the plain-text call body.
///
/// Null parameters are serialized as empty strings upstream; callers pass
/// `""` for absent values.
pub fn encode_call_body(call: &DwrCall, http_session_id: &str, script_session_id: &str) -> String {
    let mut lines = vec![
        "callCount=1".to_string(),
        "windowName=".to_string(),
        format!("c0-scriptName={}", call.service),
        format!("c0-methodName={}", call.method),
        "c0-id=0".to_string(),
    ];
    for (index, value) in call.params.iter().enumerate() {
        lines.push(format!("c0-param{index}=string:{value}"));
    }
    lines.push(format!("batchId={}", call.batch_id));
    lines.push(format!("page={}", percent_encode(&call.page_path)));
    lines.push(format!("httpSessionId={}", percent_encode(http_session_id)));
    lines.push(format!("scriptSessionId={}", percent_encode(script_session_id)));
    lines.push(String::new());
    lines.join("\n")
}

/// Characters escaped in the session-scoped body fields. This is the
/// `encodeURIComponent` set: a space becomes `%20`, never `+`, and
/// `- _ . ! ~ * ' ( )` pass through unescaped. The upstream framework
/// compares these fields byte for byte.
const FIELD_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub(crate) fn percent_encode(value: &str) -> String {
    utf8_percent_encode(value, FIELD_ENCODE_SET).to_string()
}

/// Whether a reply body is an HTML document rather than a protocol reply.
///
/// An HTML reply here typically means an expired session or an
/// anti-automation redirect page.
pub fn seems_html(body: &str, content_type: Option<&str>) -> bool {
    if let Some(ct) = content_type {
        if ct.to_ascii_lowercase().contains("text/html") {
            return true;
        }
    }
    let doc = Regex::new(r"(?i)<!doctype html>|<html[\s>]").unwrap();
    doc.is_match(body) || (body.contains('<') && body.contains("</"))
}

/// Callback names the DWR engine uses across its versions.
const CALLBACKS: &[&str] = &["_remoteHandleCallback", "remoteHandleCallback", "handleCallback"];

/// Decode the payload from a callback-style reply fragment.
///
/// Three tiers, in order of preference:
/// 1. balanced capture of the callback's third argument, parsed by the
///    restricted literal evaluator;
/// 2. regex match of the callback invocation, captured argument parsed in
///    isolation;
/// 3. top-level array literal, heuristically repaired into strict JSON
///    (bare keys quoted, single quotes normalized) and parsed, unwrapping a
///    single-element wrapper array.
pub fn extract_payload(body: &str) -> Option<Value> {
    let text = body.trim_start_matches('\u{feff}');

    for callee in CALLBACKS {
        if let Some(arg) = literal::capture_call_argument(text, callee, 2) {
            if let Ok(value) = literal::parse_literal(&arg) {
                return Some(value);
            }
        }
    }

    for callee in CALLBACKS {
        let pattern = format!(r"(?s){callee}\s*\(\s*[^,]+,\s*[^,]+,\s*(.+?)\s*\)\s*;");
        if let Some(captures) = Regex::new(&pattern).unwrap().captures(text) {
            if let Ok(value) = literal::parse_literal(&captures[1]) {
                return Some(value);
            }
        }
    }

    let array = Regex::new(r"(?s)\[\s*\[.*\]\s*\]").unwrap();
    if let Some(found) = array.find(text) {
        let repaired = repair_array_literal(found.as_str());
        if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
            return Some(unwrap_single(value));
        }
    }

    None
}

fn repair_array_literal(text: &str) -> String {
    let bare_keys = Regex::new(r"([{,]\s*)([A-Za-z0-9_]+)\s*:").unwrap();
    let quoted = bare_keys.replace_all(text, "${1}\"${2}\":");
    quoted.replace('\'', "\"")
}

fn unwrap_single(value: Value) -> Value {
    match value {
        Value::Array(mut items) if items.len() == 1 => items.remove(0),
        other => other,
    }
}

/// Issue a remoting call through a session and decode its payload.
pub async fn call(
    session: &Session,
    config: &PortalConfig,
    spec: &DwrCall,
) -> EngineResult<Value> {
    let url = config.dwr_call_url(&spec.service, &spec.method);
    let body = encode_call_body(spec, &session.http_session_id, &session.script_session_id);
    let start_url = config.start_url();

    let response = session
        .transport
        .post(
            &url,
            body,
            &[
                ("Content-Type", "text/plain"),
                ("X-Requested-With", "XMLHttpRequest"),
                ("Origin", config.base.as_str()),
                ("Referer", start_url.as_str()),
                ("Cache-Control", "no-cache"),
            ],
            None,
        )
        .await?;

    if seems_html(&response.body, response.content_type.as_deref()) {
        return Err(EngineError::Protocol(
            "server returned an HTML document instead of a DWR reply".to_string(),
        ));
    }

    extract_payload(&response.body).ok_or_else(|| {
        EngineError::Protocol(format!(
            "unable to decode the reply of {}.{}",
            spec.service, spec.method
        ))
    })
}
