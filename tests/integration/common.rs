//! Shared fixtures: a mock Complot backend and configs pointing at it

use complot_crawler::config::{CheckpointBackend, Config};
use complot_crawler::storage::open_store;
use complot_crawler::tenant::{builtin_catalog, Tenant};
use complot_crawler::Orchestrator;
use std::path::Path;
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const STREET_PAGE: &str = r#"<html><body><div>נמצאו 1 תיקי בניין</div>
    <table id="results-table"><tbody>
    <tr><td><a href="javascript:getBuilding(389000400)">389000400</a></td>
        <td>הרצל 5 אופקים</td><td>39512</td><td>17</td></tr>
    </tbody></table></body></html>"#;

pub const EMPTY_PAGE: &str = "<html><body>לא אותרו תוצאות</body></html>";

pub const BUILDING_PAGE: &str = r#"<html><body>
    <div id="result-title-div-id">
        <div class="top-navbar-info-desc">כתובת:</div>
        <div class="top-navbar-info-desc">הרצל 5 אופקים</div>
    </div>
    <table id="info-main">
        <tr><td>שכונה:</td><td>מרכז</td></tr>
    </table>
    <table id="addresses"><tbody><tr><td>הרצל 5</td></tr></tbody></table>
    <table id="table-gushim-helkot"><tbody>
        <tr><td></td><td>39512</td><td>17</td><td>3</td><td>102-0045</td></tr>
    </tbody></table>
    <table id="table-requests"><tbody>
        <tr><td></td><td>20230045</td><td>01/02/2023</td><td>היתר</td><td>כהן</td><td>5521</td><td>03/05/2023</td></tr>
    </tbody></table>
</body></html>"#;

pub const REQUEST_PAGE: &str = r#"<html><body>
    <div id="result-title-div-id">
        <div class="top-navbar-info-desc">כתובת:</div>
        <div class="top-navbar-info-desc">הרצל 5 אופקים</div>
        <div class="top-navbar-info-desc">תאריך הגשה:</div>
        <div class="top-navbar-info-desc">01/02/2023</div>
    </div>
    <table id="info-main">
        <tr><td>סוג הבקשה:</td><td>בקשה להיתר</td></tr>
        <tr><td>מספר היתר:</td><td>5521</td></tr>
    </table>
    <table id="table-baaley-inyan"><tbody>
        <tr><td>מבקש</td><td>כהן</td></tr>
    </tbody></table>
    <table id="table-events"><tbody>
        <tr><td>הסתיים</td><td>קליטת בקשה</td><td>01/02/2023</td><td>02/02/2023</td></tr>
    </tbody></table>
</body></html>"#;

/// The street code that exists on the mock backend
pub const KNOWN_STREET: &str = "2";

pub const TIK: &str = "389000400";

/// Ofaqim with a short street range so a full crawl stays small
pub fn ofaqim() -> Tenant {
    let mut tenant = builtin_catalog()
        .into_iter()
        .find(|t| t.key == "ofaqim")
        .expect("ofaqim is in the built-in catalog");
    tenant.street_range = (1, 4);
    tenant
}

/// Mounts street search responses; file endpoints are left to
/// each test
pub async fn mount_search(server: &MockServer) {
    Mock::given(method("GET"))
        .and(query_param("prgname", "GetTikimByAddress"))
        .and(query_param("s", KNOWN_STREET))
        .respond_with(ResponseTemplate::new(200).set_body_string(STREET_PAGE))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("prgname", "GetTikimByAddress"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EMPTY_PAGE))
        .mount(server)
        .await;
}

pub async fn mount_files(server: &MockServer) {
    Mock::given(method("GET"))
        .and(query_param("prgname", "GetTikFile"))
        .and(query_param("t", TIK))
        .respond_with(ResponseTemplate::new(200).set_body_string(BUILDING_PAGE))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("prgname", "GetBakashaFile"))
        .respond_with(ResponseTemplate::new(200).set_body_string(REQUEST_PAGE))
        .mount(server)
        .await;
}

/// Answers the reachability check, which carries no query
pub async fn mount_reachability(server: &MockServer) {
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EMPTY_PAGE))
        .mount(server)
        .await;
}

/// A backend where every endpoint answers
pub async fn mount_backend(server: &MockServer) {
    mount_search(server).await;
    mount_files(server).await;
    mount_reachability(server).await;
}

/// Requests the server saw for one backend program
pub async fn requests_for(server: &MockServer, program: &str) -> usize {
    let needle = format!("prgname={}", program);
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.query().is_some_and(|q| q.contains(&needle)))
        .count()
}

pub fn create_test_config(base_url: &str, data_dir: &Path) -> Config {
    let mut config = Config::default();
    config.api.base_url = format!("{}/magicscripts/mgrqispi.dll", base_url);
    config.crawler.max_concurrent = 4;
    config.crawler.max_retries = 0;
    config.crawler.retry_base_delay_ms = 1;
    config.crawler.retry_max_delay_ms = 2;
    config.crawler.save_interval = 2;
    config.crawler.test_house_numbers = vec![1, 2];
    config.crawler.max_house_number = 3;
    config.output.data_dir = data_dir.display().to_string();
    config.output.checkpoint_backend = CheckpointBackend::Json;
    config
}

/// An orchestrator over the store the config names, opened fresh
pub fn open_orchestrator(config: &Config) -> Orchestrator {
    let store = open_store(&config.output).expect("Failed to open checkpoint store");
    Orchestrator::new(config.clone(), store)
}
