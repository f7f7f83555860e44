//! Consultation engine.
//!
//! One entry point per domain operation. Every operation acquires exactly one
//! session, drives the remoting calls and HTML navigation strictly
//! sequentially (each step depends on server-side state established by the
//! previous one), and releases the session's network resources on every exit
//! path: the session is owned by the operation and dropped with it.

use crate::config::{PortalConfig, REGIONS};
use crate::dwr::{self, DwrCall};
use crate::error::{EngineError, EngineResult};
use crate::parse::{self, CodeName, DetailRecord, SearchRow};
use crate::session::{self, Session};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Remoting service backing the cascading lookups.
const LOOKUP_SERVICE: &str = "RegistroListGetter";

/// Wire names of the three identifiers carried through page navigation,
/// search and detail requests.
const REGION_FIELD: &str = "regioneRicerca";
const OFFICE_FIELD: &str = "ufficioRicerca";
const REGISTER_FIELD: &str = "registroRicerca";

/// Case search request. Caller input is assumed validated (non-empty codes,
/// numeric role number, 4-digit year) by the boundary layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub region: String,
    pub office: String,
    pub register: String,
    pub role_number: String,
    pub role_year: String,
    /// Page code from a previous call in the same logical context, if any.
    pub page_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub page_code: String,
    pub results: Vec<SearchRow>,
    pub message: Option<String>,
}

/// Case detail request. `detail_params` is the opaque map taken from a
/// search result's detail link, round-tripped verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailRequest {
    pub region: String,
    pub office: String,
    pub register: String,
    pub detail_params: BTreeMap<String, String>,
    pub page_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailResponse {
    pub page_code: String,
    pub url: String,
    pub detail: DetailRecord,
}

/// The consultation engine. Stateless between operations; cheap to share.
#[derive(Debug, Clone)]
pub struct ConsultationEngine {
    config: PortalConfig,
}

impl ConsultationEngine {
    pub fn new(config: PortalConfig) -> Self {
        Self { config }
    }

    /// Static region table seeding the first cascading lookup.
    pub fn regions(&self) -> Vec<CodeName> {
        REGIONS
            .iter()
            .map(|(code, name)| CodeName {
                code: (*code).to_string(),
                name: (*name).to_string(),
            })
            .collect()
    }

    /// Offices available in a region.
    pub async fn list_offices(
        &self,
        region_code: &str,
        lang: Option<&str>,
    ) -> EngineResult<Vec<CodeName>> {
        let lang = lang.unwrap_or(&self.config.default_language);
        self.lookup("getUfficiPubb", &[region_code, lang]).await
    }

    /// Case registers exposed by an office.
    pub async fn list_registers(
        &self,
        office_code: &str,
        lang: Option<&str>,
    ) -> EngineResult<Vec<CodeName>> {
        let lang = lang.unwrap_or(&self.config.default_language);
        self.lookup("getRegistriPub", &[office_code, lang]).await
    }

    /// Role lists for a register. The middle parameter is unused upstream
    /// and always sent empty.
    pub async fn list_roles(
        &self,
        register_code: &str,
        lang: Option<&str>,
    ) -> EngineResult<Vec<CodeName>> {
        let lang = lang.unwrap_or(&self.config.default_language);
        self.lookup("getRuoli", &[register_code, "", lang]).await
    }

    /// Resolve the opaque page code binding a register to its dynamic page.
    pub async fn resolve_page_code(&self, register_code: &str) -> EngineResult<String> {
        let session = session::bootstrap(&self.config).await?;
        self.page_code_for(&session, register_code).await
    }

    /// Search the general role register for a case by number and year.
    pub async fn search(&self, request: &SearchRequest) -> EngineResult<SearchResponse> {
        let session = session::bootstrap(&self.config).await?;

        let page_code = match cached_page_code(&request.page_code) {
            Some(code) => code,
            None => self.page_code_for(&session, &request.register).await?,
        };

        let page_url = self
            .load_register_page(&session, &page_code, &request.region, &request.office, &request.register)
            .await?;

        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("numeroRuoloGen", &request.role_number)
            .append_pair("annoRuoloGen", &request.role_year)
            .append_pair("searchType", "consp_ruolo_gen")
            .append_pair(REGION_FIELD, &request.region)
            .append_pair(OFFICE_FIELD, &request.office)
            .append_pair(REGISTER_FIELD, &request.register)
            // the deployment does not verify these server-side for this flow
            .append_pair("captCode", &self.config.placeholder_captcha)
            .append_pair("captchaIsValid", "true")
            .finish();

        let response = session
            .transport
            .post(
                &page_url,
                form,
                &[
                    ("Content-Type", "application/x-www-form-urlencoded"),
                    ("Origin", self.config.base.as_str()),
                    ("Referer", page_url.as_str()),
                ],
                None,
            )
            .await?;

        let outcome = parse::parse_search_results(&response.body, &self.config.base);
        debug!(rows = outcome.results.len(), "search results parsed");

        Ok(SearchResponse {
            page_code,
            results: outcome.results,
            message: outcome.message,
        })
    }

    /// Fetch the detail of a case found by a previous search.
    pub async fn fetch_detail(&self, request: &DetailRequest) -> EngineResult<DetailResponse> {
        let session = session::bootstrap(&self.config).await?;

        let page_code = match cached_page_code(&request.page_code) {
            Some(code) => code,
            None => self.page_code_for(&session, &request.register).await?,
        };

        let page_url = self
            .load_register_page(&session, &page_code, &request.region, &request.office, &request.register)
            .await?;

        // detailParams first, identifiers overlaid on top: the caller-supplied
        // region/office/register always win on key collision.
        let mut query: BTreeMap<String, String> = request.detail_params.clone();
        query.insert(REGION_FIELD.to_string(), request.region.clone());
        query.insert(OFFICE_FIELD.to_string(), request.office.clone());
        query.insert(REGISTER_FIELD.to_string(), request.register.clone());

        let mut detail_url = url::Url::parse(&self.config.page_url(&page_code))
            .map_err(|e| EngineError::Protocol(format!("invalid detail URL: {e}")))?;
        {
            let mut pairs = detail_url.query_pairs_mut();
            pairs.clear();
            for (key, value) in &query {
                pairs.append_pair(key, value);
            }
        }

        let response = session
            .transport
            .get(
                detail_url.as_str(),
                &[
                    ("X-Requested-With", "XMLHttpRequest"),
                    ("Origin", self.config.base.as_str()),
                    ("Referer", page_url.as_str()),
                ],
                None,
            )
            .await?;

        Ok(DetailResponse {
            page_code,
            url: detail_url.to_string(),
            detail: parse::parse_detail(&response.body),
        })
    }

    // ── Internals ──

    /// One lookup call, normalized at this boundary into code/name pairs.
    async fn lookup(&self, method: &str, params: &[&str]) -> EngineResult<Vec<CodeName>> {
        let session = session::bootstrap(&self.config).await?;
        let call = DwrCall::new(LOOKUP_SERVICE, method, params, &self.config.start_path);
        let payload = dwr::call(&session, &self.config, &call).await?;
        Ok(parse::map_to_code_name(&payload))
    }

    async fn page_code_for(&self, session: &Session, register_code: &str) -> EngineResult<String> {
        let call = DwrCall::new(
            LOOKUP_SERVICE,
            "getPageCodePub",
            &[register_code],
            &self.config.start_path,
        );
        let payload = dwr::call(session, &self.config, &call).await?;
        let code = match payload {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => String::new(),
        };
        if code.is_empty() {
            return Err(EngineError::Protocol(format!(
                "empty page code for register {register_code}"
            )));
        }
        Ok(code)
    }

    /// Navigate into the register's dynamic page, establishing page-scoped
    /// cookies/state. Returns the bare page URL used as the form target.
    async fn load_register_page(
        &self,
        session: &Session,
        page_code: &str,
        region: &str,
        office: &str,
        register: &str,
    ) -> EngineResult<String> {
        let page_url = self.config.page_url(page_code);
        let mut navigate = url::Url::parse(&page_url)
            .map_err(|e| EngineError::Protocol(format!("invalid page URL: {e}")))?;
        navigate
            .query_pairs_mut()
            .append_pair(REGION_FIELD, region)
            .append_pair(OFFICE_FIELD, office)
            .append_pair(REGISTER_FIELD, register);

        session
            .transport
            .get(
                navigate.as_str(),
                &[("Referer", self.config.start_url().as_str())],
                None,
            )
            .await?;
        Ok(page_url)
    }
}

fn cached_page_code(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(str::to_string)
}
