//! End-to-end flows against a mock portal.

use std::collections::BTreeMap;

use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use consulta::config::PortalConfig;
use consulta::engine::{ConsultationEngine, DetailRequest, SearchRequest};
use consulta::error::EngineError;
use consulta::session;
use consulta::transport::Transport;

const HANDSHAKE_BODY: &str = concat!(
    "throw 'allowScriptTagRemoting is false.';\n",
    "dwr.engine._setScriptSessionId(\"F0E1D2C3B4A5\");\n",
    "dwr.engine._remoteHandleCallback('0','0',null);\n",
);

fn dwr_reply(payload: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("Content-Type", "text/javascript; charset=UTF-8")
        .set_body_string(format!(
            "throw 'allowScriptTagRemoting is false.';\ndwr.engine._remoteHandleCallback('1','0',{payload});\n"
        ))
}

/// Mount the three endpoints every session bootstrap touches: the engine
/// script, the entry page (setting the session cookie), and the page-load
/// handshake.
async fn mount_bootstrap(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/PST/dwr/engine.js"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/javascript")
                .set_body_string("// dwr engine stub"),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/PST/it/pst_2_6_7.wp"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/html; charset=UTF-8")
                .insert_header("Set-Cookie", "JSESSIONID=ENTRY12345; Path=/PST")
                .set_body_string("<html><body>Registro generale</body></html>"),
        )
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/PST/dwr/call/plaincall/__System.pageLoaded.dwr"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/javascript; charset=UTF-8")
                .set_body_string(HANDSHAKE_BODY),
        )
        .mount(server)
        .await;
}

fn engine_for(server: &MockServer) -> ConsultationEngine {
    ConsultationEngine::new(PortalConfig::default().with_base(&server.uri()))
}

#[tokio::test]
async fn test_list_offices_full_flow() {
    let server = MockServer::start().await;
    mount_bootstrap(&server).await;

    Mock::given(method("POST"))
        .and(path("/PST/dwr/call/plaincall/RegistroListGetter.getUfficiPubb.dwr"))
        .and(body_string_contains("c0-scriptName=RegistroListGetter"))
        .and(body_string_contains("c0-methodName=getUfficiPubb"))
        .and(body_string_contains("c0-param0=string:7"))
        .and(body_string_contains("c0-param1=string:it"))
        .and(body_string_contains("httpSessionId=ENTRY12345"))
        .and(body_string_contains("scriptSessionId=F0E1D2C3B4A5"))
        .respond_with(dwr_reply(
            "[{name:'26', value:'TRIBUNALE ORDINARIO DI ROMA'},{name:'27', value:'CORTE DI APPELLO DI ROMA'}]",
        ))
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    let offices = engine.list_offices("7", None).await.unwrap();

    assert_eq!(offices.len(), 2);
    assert_eq!(offices[0].code, "26");
    assert_eq!(offices[0].name, "TRIBUNALE ORDINARIO DI ROMA");
    assert_eq!(offices[1].code, "27");
}

#[tokio::test]
async fn test_lookups_are_idempotent_across_sessions() {
    let server = MockServer::start().await;
    mount_bootstrap(&server).await;

    Mock::given(method("POST"))
        .and(path("/PST/dwr/call/plaincall/RegistroListGetter.getRegistriPub.dwr"))
        .respond_with(dwr_reply("[{name:'RG', value:'Contenzioso civile'}]"))
        .expect(2)
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    let first = engine.list_registers("26", None).await.unwrap();
    let second = engine.list_registers("26", None).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first[0].code, "RG");
}

#[tokio::test]
async fn test_search_flow() {
    let server = MockServer::start().await;
    mount_bootstrap(&server).await;

    Mock::given(method("POST"))
        .and(path("/PST/dwr/call/plaincall/RegistroListGetter.getPageCodePub.dwr"))
        .and(body_string_contains("c0-param0=string:RG"))
        .respond_with(dwr_reply("\"pst_2_6_7_1\""))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/PST/it/pst_2_6_7_1.wp"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/html; charset=UTF-8")
                .set_body_string("<html><body><form id=\"ricerca\"></form></body></html>"),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/PST/it/pst_2_6_7_1.wp"))
        .and(body_string_contains("numeroRuoloGen=12"))
        .and(body_string_contains("annoRuoloGen=2024"))
        .and(body_string_contains("searchType=consp_ruolo_gen"))
        .and(body_string_contains("captchaIsValid=true"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/html; charset=UTF-8")
                .set_body_string(
                    r#"<html><body><table id="fascicoli"><tbody>
                       <tr>
                         <td><a href="/PST/it/pst_2_6_7_1.wp?idFascicolo=555&amp;tipo=RG">12/2024</a></td>
                         <td>ROSSI MARIO</td>
                         <td>Contenzioso ordinario</td>
                         <td>15/03/2025</td>
                       </tr>
                       </tbody></table></body></html>"#,
                ),
        )
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    let response = engine
        .search(&SearchRequest {
            region: "7".to_string(),
            office: "26".to_string(),
            register: "RG".to_string(),
            role_number: "12".to_string(),
            role_year: "2024".to_string(),
            page_code: None,
        })
        .await
        .unwrap();

    assert_eq!(response.page_code, "pst_2_6_7_1");
    assert!(response.message.is_none());
    assert_eq!(response.results.len(), 1);

    let row = &response.results[0];
    assert_eq!(row.role_number.as_deref(), Some("12"));
    assert_eq!(row.role_year.as_deref(), Some("2024"));
    assert_eq!(row.judge.as_deref(), Some("ROSSI MARIO"));
    assert_eq!(row.detail_params.get("idFascicolo").unwrap(), "555");
}

#[tokio::test]
async fn test_search_no_results_message() {
    let server = MockServer::start().await;
    mount_bootstrap(&server).await;

    Mock::given(method("GET"))
        .and(path("/PST/it/pst_2_6_7_1.wp"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/PST/it/pst_2_6_7_1.wp"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<table id="fascicoli"><tbody>
               <tr class="empty"><td><p class="noElementFound">Nessun fascicolo trovato</p></td></tr>
               </tbody></table>"#,
        ))
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    let response = engine
        .search(&SearchRequest {
            region: "7".to_string(),
            office: "26".to_string(),
            register: "RG".to_string(),
            role_number: "99".to_string(),
            role_year: "1999".to_string(),
            page_code: Some("pst_2_6_7_1".to_string()),
        })
        .await
        .unwrap();

    assert!(response.results.is_empty());
    assert_eq!(response.message.as_deref(), Some("Nessun fascicolo trovato"));
}

#[tokio::test]
async fn test_detail_flow_overlays_identifiers() {
    let server = MockServer::start().await;
    mount_bootstrap(&server).await;

    // The detail fetch carries the round-tripped link parameters plus the
    // caller identifiers; the identifiers win when a key collides.
    Mock::given(method("GET"))
        .and(path("/PST/it/pst_2_6_7_1.wp"))
        .and(query_param("idFascicolo", "555"))
        .and(query_param("regioneRicerca", "7"))
        .and(query_param("ufficioRicerca", "26"))
        .and(query_param("registroRicerca", "RG"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/html; charset=UTF-8")
                .set_body_string(
                    r#"<html><body>
                       <ul class="dettaglioRuoloGenerale">
                         <li><strong>Numero ruolo generale:</strong> 12/2024</li>
                         <li><strong>Giudice:</strong> ROSSI MARIO</li>
                       </ul>
                       <div class="dettaglioRuoloGenerale">
                         <h3>Tipologie delle parti:</h3>
                         <ul><li>Attore</li><li>Convenuto</li></ul>
                       </div>
                       </body></html>"#,
                ),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/PST/it/pst_2_6_7_1.wp"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .mount(&server)
        .await;

    let mut detail_params = BTreeMap::new();
    detail_params.insert("idFascicolo".to_string(), "555".to_string());
    // stale identifier from the link; the request value must replace it
    detail_params.insert("regioneRicerca".to_string(), "99".to_string());

    let engine = engine_for(&server);
    let response = engine
        .fetch_detail(&DetailRequest {
            region: "7".to_string(),
            office: "26".to_string(),
            register: "RG".to_string(),
            detail_params,
            page_code: Some("pst_2_6_7_1".to_string()),
        })
        .await
        .unwrap();

    assert_eq!(response.page_code, "pst_2_6_7_1");
    assert!(response.url.contains("idFascicolo=555"));
    assert!(response.url.contains("regioneRicerca=7"));
    assert_eq!(
        response.detail.general.get("giudice").unwrap().as_deref(),
        Some("ROSSI MARIO")
    );
    assert_eq!(response.detail.party_types, vec!["Attore", "Convenuto"]);
}

#[tokio::test]
async fn test_session_cookie_prefers_app_root_path() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/PST/dwr/engine.js"))
        .respond_with(ResponseTemplate::new(200).set_body_string("// stub"))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/PST/it/pst_2_6_7.wp"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Set-Cookie", "JSESSIONID=ROOTSCOPED; Path=/")
                .append_header("Set-Cookie", "JSESSIONID=APPSCOPED; Path=/PST")
                .set_body_string("<html></html>"),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/PST/dwr/call/plaincall/__System.pageLoaded.dwr"))
        .respond_with(ResponseTemplate::new(200).set_body_string(HANDSHAKE_BODY))
        .mount(&server)
        .await;

    let config = PortalConfig::default().with_base(&server.uri());
    let session = session::bootstrap(&config).await.unwrap();
    assert_eq!(session.http_session_id, "APPSCOPED");
    assert_eq!(session.script_session_id, "F0E1D2C3B4A5");
}

#[tokio::test]
async fn test_session_synthesizes_token_when_handshake_is_silent() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/PST/dwr/engine.js"))
        .respond_with(ResponseTemplate::new(200).set_body_string("// stub"))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/PST/it/pst_2_6_7.wp"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Set-Cookie", "JSESSIONID=ENTRY12345; Path=/PST")
                .set_body_string("<html></html>"),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/PST/dwr/call/plaincall/__System.pageLoaded.dwr"))
        .respond_with(ResponseTemplate::new(200).set_body_string("// nothing useful"))
        .mount(&server)
        .await;

    let config = PortalConfig::default().with_base(&server.uri());
    let session = session::bootstrap(&config).await.unwrap();
    assert!(!session.script_session_id.is_empty());
    assert!(session.script_session_id.chars().all(|c| c.is_ascii_digit()));
}

#[tokio::test]
async fn test_bootstrap_fails_without_session_cookie() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/PST/dwr/engine.js"))
        .respond_with(ResponseTemplate::new(200).set_body_string("// stub"))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/PST/it/pst_2_6_7.wp"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .mount(&server)
        .await;

    let config = PortalConfig::default().with_base(&server.uri());
    let error = match session::bootstrap(&config).await {
        Ok(_) => panic!("bootstrap should fail without a session cookie"),
        Err(error) => error,
    };
    match error {
        EngineError::Session(message) => assert!(message.contains("JSESSIONID")),
        other => panic!("expected a session error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_html_lookup_reply_is_a_protocol_error() {
    let server = MockServer::start().await;
    mount_bootstrap(&server).await;

    Mock::given(method("POST"))
        .and(path("/PST/dwr/call/plaincall/RegistroListGetter.getRuoli.dwr"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/html; charset=UTF-8")
                .set_body_string("<!DOCTYPE html><html><body>Sessione scaduta</body></html>"),
        )
        .mount(&server)
        .await;

    let engine = engine_for(&server);
    match engine.list_roles("RG", None).await {
        Err(EngineError::Protocol(_)) => {}
        other => panic!("expected a protocol error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_transport_retries_transient_statuses() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/PST/it/pst_2_6_7.wp"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/PST/it/pst_2_6_7.wp"))
        .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
        .mount(&server)
        .await;

    let config = PortalConfig::default().with_base(&server.uri());
    let transport = Transport::new(&config).unwrap();
    let response = transport
        .get(&config.start_url(), &[], None)
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body, "recovered");
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}
