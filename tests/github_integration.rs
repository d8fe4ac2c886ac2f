//! Integration tests for the GitHub repository collector.

#![allow(clippy::unwrap_used)]

use chrono::{TimeDelta, Utc};
use demand_signals::api::FailureKind;
use demand_signals::collectors::TrendingWindow;
use demand_signals::{QueryOutcome, RepoCollector};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::mock_options;
use support::socket_guard::start_mock_server_or_skip;

fn collector(server: &MockServer) -> RepoCollector {
    RepoCollector::new(mock_options(server.uri(), None)).unwrap()
}

fn names(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

fn timestamp(days_ago: i64) -> String {
    (Utc::now() - TimeDelta::days(days_ago))
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
}

fn repo(name: &str, stars: u64, forks: u64, created_days_ago: i64, updated_days_ago: i64) -> serde_json::Value {
    json!({
        "full_name": format!("octo/{name}"),
        "name": name,
        "owner": {"login": "octo"},
        "stargazers_count": stars,
        "forks_count": forks,
        "watchers_count": stars,
        "open_issues_count": 3,
        "created_at": timestamp(created_days_ago),
        "updated_at": timestamp(updated_days_ago),
    })
}

// ==================== Metrics Tests ====================

#[tokio::test]
async fn test_language_stats_aggregates_search_results() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };

    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .and(query_param("q", "language:rust stars:>=10"))
        .and(query_param("sort", "stars"))
        .and(query_param("per_page", "100"))
        .and(header("accept", "application/vnd.github.v3+json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 2,
            "items": [repo("fresh", 300, 30, 3, 1), repo("old", 100, 10, 400, 2)]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let report = collector(&mock_server).language_stats(&names(&["rust"])).await;
    let stats = report.results.get("rust").unwrap().found().unwrap();

    assert_eq!(stats.total_repos, 2);
    assert_eq!(stats.total_stars, 400);
    assert_eq!(stats.total_forks, 40);
    assert_eq!(stats.total_watchers, 400);
    assert_eq!(stats.avg_stars, Some(200.0));
    assert_eq!(stats.recent_repos, 1);
}

#[tokio::test]
async fn test_popularity_metrics_empty_search_is_no_data() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };

    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .and(query_param("q", "nothing-matches"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"total_count": 0, "items": []})))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .and(query_param("q", "tokio"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [repo("tokio", 25000, 2300, 2000, 1), repo("mini-redis", 4000, 400, 1500, 30)]
        })))
        .mount(&mock_server)
        .await;

    let report = collector(&mock_server)
        .tech_popularity_metrics(&names(&["nothing-matches", "tokio"]))
        .await;

    assert_eq!(report.results.get("nothing-matches"), Some(&QueryOutcome::NoData));
    let metrics = report.results.get("tokio").unwrap().found().unwrap();
    assert_eq!(metrics.repo_count, 2);
    assert_eq!(metrics.total_stars, 29_000);
    assert_eq!(metrics.avg_forks, Some(1350.0));
    assert_eq!(metrics.open_issues, 6);
    assert_eq!(metrics.recent_activity, 1);
}

#[tokio::test]
async fn test_malformed_timestamp_fails_only_that_key() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };

    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .and(query_param("q", "weird"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"full_name": "o/w", "name": "w", "updated_at": "yesterday"}]
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .and(query_param("q", "zig"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [repo("zig", 30000, 2000, 3000, 0)]})))
        .mount(&mock_server)
        .await;

    let report = collector(&mock_server)
        .tech_popularity_metrics(&names(&["weird", "zig"]))
        .await;

    match report.results.get("weird").unwrap() {
        QueryOutcome::Failed(failure) => assert_eq!(failure.kind, FailureKind::MalformedResponse),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(report.results.get("zig").unwrap().found().is_some());
}

#[tokio::test]
async fn test_missing_timestamp_fails_only_that_key() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };

    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .and(query_param("q", "bare"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [repo("dated", 50, 5, 100, 1), {"full_name": "o/r", "name": "r"}]
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .and(query_param("q", "zig"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [repo("zig", 30000, 2000, 3000, 0)]})))
        .mount(&mock_server)
        .await;

    let report = collector(&mock_server)
        .tech_popularity_metrics(&names(&["bare", "zig"]))
        .await;

    match report.results.get("bare").unwrap() {
        QueryOutcome::Failed(failure) => assert_eq!(failure.kind, FailureKind::MalformedResponse),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(report.results.get("zig").unwrap().found().is_some());
}

#[tokio::test]
async fn test_rate_limited_search_recovers() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };

    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "0")
                .set_body_json(json!({"message": "API rate limit exceeded"})),
        )
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [repo("a", 5, 1, 1, 1)]})))
        .mount(&mock_server)
        .await;

    let report = collector(&mock_server).tech_popularity_metrics(&names(&["serde"])).await;
    assert!(report.results.get("serde").unwrap().found().is_some());
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 2);
}

// ==================== Repository Query Tests ====================

#[tokio::test]
async fn test_trending_repos_uses_window_and_language() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };

    let since = (Utc::now() - TimeDelta::days(30)).format("%Y-%m-%d").to_string();
    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .and(query_param("q", format!("created:>={since} language:rust")))
        .and(query_param("per_page", "50"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": [repo("new", 900, 12, 2, 0)]})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let repos = collector(&mock_server)
        .trending_repos(Some("rust"), TrendingWindow::Monthly)
        .await
        .unwrap();
    assert_eq!(repos.len(), 1);
    assert_eq!(repos[0].full_name, "octo/new");
}

#[tokio::test]
async fn test_repository_details_and_languages() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };

    Mock::given(method("GET"))
        .and(path("/repos/tokio-rs/tokio"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "full_name": "tokio-rs/tokio",
            "name": "tokio",
            "language": "Rust",
            "stargazers_count": 25000
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/tokio-rs/tokio/languages"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(r#"{"Rust": 5000000, "Shell": 1200, "Dockerfile": 300}"#, "application/json"),
        )
        .mount(&mock_server)
        .await;

    let collector = collector(&mock_server);
    let details = collector.repository_details("tokio-rs", "tokio").await.unwrap();
    assert_eq!(details.language.as_deref(), Some("Rust"));
    assert_eq!(details.stargazers_count, 25_000);

    let languages = collector.repository_languages("tokio-rs", "tokio").await.unwrap();
    let order: Vec<&str> = languages.keys().collect();
    assert_eq!(order, ["Rust", "Shell", "Dockerfile"]);
    assert_eq!(languages.get("Shell"), Some(&1200));
}

#[tokio::test]
async fn test_repository_not_found_is_http_status() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not Found"})))
        .mount(&mock_server)
        .await;

    let err = collector(&mock_server)
        .repository_details("nobody", "nothing")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::HttpStatus);
}
