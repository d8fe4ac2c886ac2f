//! Integration tests for the search-interest session over its web protocol.

#![allow(clippy::unwrap_used)]

use demand_signals::SearchInterestCollector;
use demand_signals::api::FailureKind;
use demand_signals::collectors::trends::{Resolution, TrendsSettings};
use demand_signals::collectors::TrendsSession;
use serde_json::{Value, json};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::mock_options;
use support::socket_guard::start_mock_server_or_skip;

const GUARD: &str = ")]}'\n";

fn collector(server: &MockServer) -> SearchInterestCollector<TrendsSession> {
    SearchInterestCollector::new(mock_options(server.uri(), None), TrendsSettings::default()).unwrap()
}

fn guarded(body: &Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_string(format!("{GUARD}{body}"))
}

fn keywords(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

fn explore_widgets() -> Value {
    json!({
        "widgets": [
            {"id": "TIMESERIES", "token": "tok-ts", "request": {"time": "today 12-m"}},
            {"id": "GEO_MAP", "token": "tok-geo", "request": {"geo": {}, "resolution": "COUNTRY"}},
            {
                "id": "RELATED_QUERIES",
                "token": "tok-rq",
                "request": {"restriction": {"complexKeywordsRestriction": {
                    "keyword": [{"type": "BROAD", "value": "rust"}]
                }}}
            }
        ]
    })
}

async fn mount_landing(server: &MockServer, expected: u64) {
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).insert_header("set-cookie", "NID=test; Path=/"))
        .expect(expected)
        .mount(server)
        .await;
}

async fn mount_explore(server: &MockServer, expected: u64) {
    Mock::given(method("GET"))
        .and(path("/trends/api/explore"))
        .and(query_param("hl", "en-US"))
        .and(query_param("tz", "360"))
        .respond_with(guarded(&explore_widgets()))
        .expect(expected)
        .mount(server)
        .await;
}

async fn mount_timeline(server: &MockServer) {
    let timeline = json!({"default": {"timelineData": [
        {"time": "1704067200", "value": [40, 60, 10, 20, 30]},
        {"time": "1704672000", "value": [50, 70, 12, 25, 35]},
        {"time": "1705276800", "value": [70, 65, 14, 22, 40], "isPartial": true}
    ]}});
    Mock::given(method("GET"))
        .and(path("/trends/api/widgetdata/multiline"))
        .and(query_param("token", "tok-ts"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(")]}}',\n{timeline}")))
        .mount(server)
        .await;
}

fn req_param(request: &wiremock::Request) -> Value {
    let (_, req) = request.url.query_pairs().find(|(name, _)| name == "req").unwrap();
    serde_json::from_str(&req).unwrap()
}

// ==================== Interest Over Time Tests ====================

#[tokio::test]
async fn test_interest_over_time_parses_guarded_timeline() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_landing(&mock_server, 1).await;
    mount_explore(&mock_server, 1).await;
    mount_timeline(&mock_server).await;

    let interest = collector(&mock_server)
        .interest_over_time(&keywords(&["rust", "go"]), "today 12-m", "")
        .await
        .unwrap();

    assert_eq!(interest.timestamps.len(), 3);
    assert_eq!(interest.timestamps[0].timestamp(), 1_704_067_200);
    assert_eq!(interest.series("rust"), Some(&[40.0, 50.0, 70.0][..]));
    assert_eq!(interest.series("go"), Some(&[60.0, 70.0, 65.0][..]));
}

#[tokio::test]
async fn test_explore_request_carries_comparison_items() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_landing(&mock_server, 1).await;
    mount_explore(&mock_server, 1).await;
    mount_timeline(&mock_server).await;

    let _ = collector(&mock_server)
        .interest_over_time(&keywords(&["rust", "go"]), "today 3-m", "US")
        .await
        .unwrap();

    let requests = mock_server.received_requests().await.unwrap();
    let explore = requests
        .iter()
        .find(|r| r.url.path() == "/trends/api/explore")
        .unwrap();
    let req = req_param(explore);
    let items = req["comparisonItem"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[1], json!({"keyword": "go", "time": "today 3-m", "geo": "US"}));
    assert_eq!(req["category"], 0);
}

#[tokio::test]
async fn test_compare_technologies_chunks_and_primes_cookies_once() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_landing(&mock_server, 1).await;
    mount_explore(&mock_server, 2).await;
    mount_timeline(&mock_server).await;

    let techs = keywords(&["rust", "go", "zig", "nim", "odin", "swift", "kotlin"]);
    let comparison = collector(&mock_server)
        .compare_technologies(&techs, "today 12-m", "")
        .await;

    let order: Vec<&str> = comparison.technologies.keys().collect();
    assert_eq!(order, ["rust", "go", "zig", "nim", "odin", "swift", "kotlin"]);
    assert!(comparison.failed_batches.is_empty());

    let rust = comparison.technologies.get("rust").unwrap();
    assert_eq!(rust.max_interest, 70.0);
    assert_eq!(rust.min_interest, 40.0);
    assert_eq!(rust.current_interest, 70.0);
    assert_eq!(rust.data_points, 3);
}

#[tokio::test]
async fn test_missing_timeseries_widget_is_malformed() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_landing(&mock_server, 1).await;
    Mock::given(method("GET"))
        .and(path("/trends/api/explore"))
        .respond_with(guarded(&json!({"widgets": []})))
        .mount(&mock_server)
        .await;

    let err = collector(&mock_server)
        .interest_over_time(&keywords(&["rust"]), "today 12-m", "")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::MalformedResponse);
}

#[tokio::test]
async fn test_throttled_explore_fails_chunk_not_comparison() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_landing(&mock_server, 1).await;
    Mock::given(method("GET"))
        .and(path("/trends/api/explore"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&mock_server)
        .await;

    let comparison = collector(&mock_server)
        .compare_technologies(&keywords(&["rust", "go"]), "today 12-m", "")
        .await;

    assert!(comparison.technologies.is_empty());
    assert_eq!(comparison.failed_batches.len(), 1);
    assert_eq!(comparison.failed_batches[0].keywords, ["rust", "go"]);
    assert_eq!(comparison.failed_batches[0].failure.kind, FailureKind::Throttled);
}

// ==================== Widget Tests ====================

#[tokio::test]
async fn test_interest_by_region_sends_resolution() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_landing(&mock_server, 1).await;
    mount_explore(&mock_server, 1).await;
    Mock::given(method("GET"))
        .and(path("/trends/api/widgetdata/comparedgeo"))
        .and(query_param("token", "tok-geo"))
        .respond_with(guarded(&json!({"default": {"geoMapData": [
            {"geoCode": "US-CA", "geoName": "California", "value": [100]},
            {"geoCode": "US-WA", "geoName": "Washington", "value": [87]}
        ]}})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let regions = collector(&mock_server)
        .interest_by_region(&keywords(&["rust"]), Resolution::Region, "today 12-m")
        .await
        .unwrap();
    assert_eq!(regions.keywords, ["rust"]);
    assert_eq!(regions.regions.len(), 2);
    assert_eq!(regions.regions[1].geo_name, "Washington");
    assert_eq!(regions.regions[1].values, [87.0]);

    let requests = mock_server.received_requests().await.unwrap();
    let geo = requests
        .iter()
        .find(|r| r.url.path() == "/trends/api/widgetdata/comparedgeo")
        .unwrap();
    let req = req_param(geo);
    assert_eq!(req["resolution"], "REGION");
    assert_eq!(req["includeLowSearchVolumeGeos"], true);
}

#[tokio::test]
async fn test_related_queries_top_and_rising() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_landing(&mock_server, 1).await;
    mount_explore(&mock_server, 1).await;
    Mock::given(method("GET"))
        .and(path("/trends/api/widgetdata/relatedsearches"))
        .and(query_param("token", "tok-rq"))
        .respond_with(guarded(&json!({"default": {"rankedList": [
            {"rankedKeyword": [{"query": "rust lang", "value": 100, "formattedValue": "100"}]},
            {"rankedKeyword": [
                {"query": "rust 2024 edition", "value": 250, "formattedValue": "+250%"},
                {"query": "rust game", "value": 120}
            ]}
        ]}})))
        .mount(&mock_server)
        .await;

    let related = collector(&mock_server)
        .related_queries("rust", "today 12-m", "")
        .await
        .unwrap();
    assert_eq!(related.top.len(), 1);
    assert_eq!(related.top[0].query, "rust lang");
    assert_eq!(related.rising.len(), 2);
    assert_eq!(related.rising[0].formatted_value.as_deref(), Some("+250%"));
    assert!(related.rising[1].formatted_value.is_none());
}

// ==================== Trending and Suggestion Tests ====================

#[tokio::test]
async fn test_trending_searches_by_country() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_landing(&mock_server, 1).await;
    Mock::given(method("GET"))
        .and(path("/trends/hottrends/visualize/internal/data"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "united_states": ["eclipse", "election"],
            "germany": ["bundesliga"]
        })))
        .mount(&mock_server)
        .await;

    let collector = collector(&mock_server);
    let searches = collector.trending_searches("united_states").await.unwrap();
    assert_eq!(searches, ["eclipse", "election"]);

    let err = collector.trending_searches("atlantis").await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::InvalidRequest);
}

#[tokio::test]
async fn test_suggestions_return_titles() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_landing(&mock_server, 1).await;
    Mock::given(method("GET"))
        .and(path("/trends/api/autocomplete/rust"))
        .respond_with(guarded(&json!({"default": {"topics": [
            {"mid": "/m/0dsbpg6", "title": "Rust", "type": "Programming language"},
            {"mid": "/m/06_fw", "title": "Rust", "type": "Topic"}
        ]}})))
        .mount(&mock_server)
        .await;

    let titles = collector(&mock_server).suggestions("rust").await.unwrap();
    assert_eq!(titles, ["Rust", "Rust"]);
}

#[tokio::test]
async fn test_failed_cookie_priming_does_not_block_queries() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/trends/api/autocomplete/go"))
        .respond_with(guarded(&json!({"default": {"topics": [{"title": "Go"}]}})))
        .expect(2)
        .mount(&mock_server)
        .await;

    let collector = collector(&mock_server);
    assert_eq!(collector.suggestions("go").await.unwrap(), ["Go"]);
    assert_eq!(collector.suggestions("go").await.unwrap(), ["Go"]);
}
