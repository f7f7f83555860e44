//! Portal configuration.
//!
//! One `PortalConfig` is constructed at process start and threaded through
//! component constructors. No module-level mutable state: verbose logging and
//! forced-IPv4 resolution are plain fields read from the environment once.

use std::time::Duration;

/// Entry page of the public case-register consultation flow.
const START_PATH: &str = "/PST/it/pst_2_6_7.wp";

/// Configuration for one engine instance.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    /// Portal origin, no trailing slash (e.g. "https://servizipst.giustizia.it").
    pub base: String,
    /// Path of the entry page establishing the HTTP session.
    pub start_path: String,
    /// Language code sent to the lookup endpoints.
    pub default_language: String,
    /// Fixed value submitted for the portal's captcha field. The deployment
    /// does not enforce captcha validation server-side for this flow; if it
    /// ever starts, searches will come back empty with no distinct signal.
    pub placeholder_captcha: String,
    /// Enable verbose diagnostic logging.
    pub verbose: bool,
    /// Resolve only A records for portal hosts.
    pub force_ipv4: bool,
    /// Timeout for protocol and page requests.
    pub request_timeout: Duration,
    /// Timeout for best-effort bootstrap probes.
    pub probe_timeout: Duration,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base: "https://servizipst.giustizia.it".to_string(),
            start_path: START_PATH.to_string(),
            default_language: "it".to_string(),
            placeholder_captcha: "ABCD".to_string(),
            verbose: false,
            force_ipv4: false,
            request_timeout: Duration::from_secs(45),
            probe_timeout: Duration::from_secs(30),
        }
    }
}

impl PortalConfig {
    /// Build a configuration from the process environment.
    ///
    /// Honors `CONSULTA_VERBOSE` and `FORCE_IPV4`. Proxy variables are read
    /// later, at transport construction time.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.verbose = env_flag("CONSULTA_VERBOSE");
        config.force_ipv4 = env_flag("FORCE_IPV4");
        config
    }

    /// Replace the portal origin (used by tests pointing at a mock server).
    pub fn with_base(mut self, base: &str) -> Self {
        self.base = base.trim_end_matches('/').to_string();
        self
    }

    /// Host component of the portal origin.
    pub fn host(&self) -> String {
        url::Url::parse(&self.base)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_default()
    }

    /// Absolute URL of the entry page.
    pub fn start_url(&self) -> String {
        format!("{}{}", self.base, self.start_path)
    }

    /// Absolute URL of the DWR client bootstrap script.
    pub fn engine_script_url(&self) -> String {
        format!("{}/PST/dwr/engine.js", self.base)
    }

    /// Absolute URL of a DWR plaincall endpoint.
    pub fn dwr_call_url(&self, service: &str, method: &str) -> String {
        format!("{}/PST/dwr/call/plaincall/{}.{}.dwr", self.base, service, method)
    }

    /// Absolute URL of the dynamic page bound to a register.
    pub fn page_url(&self, page_code: &str) -> String {
        format!("{}/PST/it/{}.wp", self.base, page_code)
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(false)
}

/// Static region table seeding the first cascading lookup.
///
/// The portal does not expose a region list endpoint; these codes are fixed.
pub const REGIONS: &[(&str, &str)] = &[
    ("1", "Abruzzo"),
    ("2", "Basilicata"),
    ("3", "Calabria"),
    ("4", "Campania"),
    ("5", "Emilia-Romagna"),
    ("6", "Friuli-Venezia Giulia"),
    ("7", "Lazio"),
    ("8", "Liguria"),
    ("9", "Lombardia"),
    ("10", "Marche"),
    ("11", "Molise"),
    ("12", "Piemonte"),
    ("13", "Puglia"),
    ("14", "Sardegna"),
    ("15", "Sicilia"),
    ("16", "Toscana"),
    ("17", "Trentino-Alto Adige"),
    ("18", "Umbria"),
    ("19", "Valle d'Aosta"),
    ("20", "Veneto"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let config = PortalConfig::default();
        assert_eq!(
            config.start_url(),
            "https://servizipst.giustizia.it/PST/it/pst_2_6_7.wp"
        );
        assert_eq!(
            config.dwr_call_url("RegistroListGetter", "getRuoli"),
            "https://servizipst.giustizia.it/PST/dwr/call/plaincall/RegistroListGetter.getRuoli.dwr"
        );
        assert_eq!(
            config.page_url("pst_2_6_7_1"),
            "https://servizipst.giustizia.it/PST/it/pst_2_6_7_1.wp"
        );
        assert_eq!(config.host(), "servizipst.giustizia.it");
    }

    #[test]
    fn test_with_base_strips_trailing_slash() {
        let config = PortalConfig::default().with_base("http://127.0.0.1:9000/");
        assert_eq!(config.start_url(), "http://127.0.0.1:9000/PST/it/pst_2_6_7.wp");
    }

    #[test]
    fn test_regions_are_unique() {
        let mut codes: Vec<&str> = REGIONS.iter().map(|(c, _)| *c).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), REGIONS.len());
    }
}
