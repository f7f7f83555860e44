//! Environment-driven proxy resolution.
//!
//! The transport routes through an explicitly configured proxy rather than
//! reqwest's implicit system detection, so that NO_PROXY exclusion rules can
//! be applied per target host with the exact semantics the portal deployment
//! environments rely on.

/// Resolve the proxy URL to use for `host`, if any.
///
/// Checks `HTTPS_PROXY`/`https_proxy`/`HTTP_PROXY`/`http_proxy` in that
/// order, unless the host is excluded by a `NO_PROXY`/`no_proxy` rule.
pub fn proxy_for_host(host: &str) -> Option<String> {
    let raw_no_proxy = std::env::var("NO_PROXY")
        .or_else(|_| std::env::var("no_proxy"))
        .unwrap_or_default();
    if host_bypassed(host, &raw_no_proxy) {
        return None;
    }
    ["HTTPS_PROXY", "https_proxy", "HTTP_PROXY", "http_proxy"]
        .iter()
        .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
}

/// Whether a NO_PROXY value excludes `host`.
///
/// Rules are comma-separated: `*` matches everything, a rule with a leading
/// dot matches any subdomain suffix, and a bare rule matches the host exactly
/// or as a domain suffix.
pub fn host_bypassed(host: &str, raw_no_proxy: &str) -> bool {
    let host = host.to_ascii_lowercase();
    raw_no_proxy
        .split(',')
        .map(|rule| rule.trim().to_ascii_lowercase())
        .filter(|rule| !rule.is_empty())
        .any(|rule| {
            if rule == "*" || rule == host {
                return true;
            }
            if let Some(suffix) = rule.strip_prefix('.') {
                return host.ends_with(&rule) || host == suffix;
            }
            host.ends_with(&format!(".{rule}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_bypasses_everything() {
        assert!(host_bypassed("servizipst.giustizia.it", "*"));
    }

    #[test]
    fn test_exact_host_rule() {
        assert!(host_bypassed("servizipst.giustizia.it", "servizipst.giustizia.it"));
        assert!(!host_bypassed("servizipst.giustizia.it", "other.example.com"));
    }

    #[test]
    fn test_leading_dot_suffix_rule() {
        assert!(host_bypassed("servizipst.giustizia.it", ".giustizia.it"));
        assert!(!host_bypassed("giustizia.example.com", ".giustizia.it"));
    }

    #[test]
    fn test_bare_rule_matches_domain_suffix() {
        assert!(host_bypassed("servizipst.giustizia.it", "giustizia.it"));
        assert!(!host_bypassed("notgiustizia.it", "giustizia.it"));
    }

    #[test]
    fn test_rules_are_comma_separated_and_trimmed() {
        assert!(host_bypassed(
            "servizipst.giustizia.it",
            "localhost, .giustizia.it , 10.0.0.1"
        ));
        assert!(!host_bypassed("example.com", "localhost, .giustizia.it"));
    }

    #[test]
    fn test_empty_value_never_bypasses() {
        assert!(!host_bypassed("servizipst.giustizia.it", ""));
    }
}
