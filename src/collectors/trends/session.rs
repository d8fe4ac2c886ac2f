//! HTTP session for the Google Trends explore/widgetdata protocol.
//!
//! A query is a two-step exchange: the explore endpoint returns widget
//! tokens for a payload, then each widget's data is fetched with its token.
//! Responses are JSON preceded by the anti-XSSI guard `)]}'` (sometimes
//! followed by a comma), which is stripped before parsing. The service keys
//! its rate limiting on a session cookie, so the client keeps a cookie store
//! and primes it once before the first query.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::api::{ApiError, RequestExecutor};
use crate::collectors::CollectorOptions;
use crate::metrics::KeyedResults;

use super::TrendsApi;
use super::model::{
    InterestByRegion, InterestOverTime, PreparedQuery, RegionInterest, RelatedQueries, RelatedQuery,
    Resolution, Suggestion, TrendsPayload, Widget,
};

/// Default Google Trends host.
const DEFAULT_BASE_URL: &str = "https://trends.google.com";

const EXPLORE_PATH: &str = "trends/api/explore";
const MULTILINE_PATH: &str = "trends/api/widgetdata/multiline";
const COMPARED_GEO_PATH: &str = "trends/api/widgetdata/comparedgeo";
const RELATED_SEARCHES_PATH: &str = "trends/api/widgetdata/relatedsearches";
const AUTOCOMPLETE_PATH: &str = "trends/api/autocomplete";
const TRENDING_SEARCHES_PATH: &str = "trends/hottrends/visualize/internal/data";

/// Anti-XSSI prefix on widget responses.
const XSSI_GUARD: &str = ")]}'";

/// Locale settings sent with every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrendsSettings {
    /// Host language, e.g. `en-US`.
    pub language: String,
    /// Timezone offset in minutes (360 = US Central).
    pub tz_offset_minutes: i32,
}

impl Default for TrendsSettings {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            tz_offset_minutes: 360,
        }
    }
}

impl TrendsSettings {
    /// Region part of the language tag (`US` for `en-US`), used to prime cookies.
    fn cookie_geo(&self) -> &str {
        self.language
            .rsplit_once('-')
            .map_or("US", |(_, region)| region)
    }
}

// ==================== Widget Response Types ====================

#[derive(Debug, Deserialize)]
struct ExploreResponse {
    #[serde(default)]
    widgets: Vec<Widget>,
}

#[derive(Debug, Deserialize)]
struct WidgetResponse<T> {
    default: T,
}

#[derive(Debug, Deserialize)]
struct MultilineData {
    #[serde(rename = "timelineData", default)]
    timeline_data: Vec<TimelinePoint>,
}

#[derive(Debug, Deserialize)]
struct TimelinePoint {
    time: String,
    #[serde(default)]
    value: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct GeoMapData {
    #[serde(rename = "geoMapData", default)]
    geo_map_data: Vec<GeoPoint>,
}

#[derive(Debug, Deserialize)]
struct GeoPoint {
    #[serde(rename = "geoCode", default)]
    geo_code: String,
    #[serde(rename = "geoName", default)]
    geo_name: String,
    #[serde(default)]
    value: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct RankedData {
    #[serde(rename = "rankedList", default)]
    ranked_list: Vec<RankedList>,
}

#[derive(Debug, Deserialize)]
struct RankedList {
    #[serde(rename = "rankedKeyword", default)]
    ranked_keyword: Vec<RelatedQuery>,
}

#[derive(Debug, Deserialize)]
struct AutocompleteData {
    #[serde(default)]
    topics: Vec<Suggestion>,
}

// ==================== TrendsSession ====================

/// Default [`TrendsApi`] implementation speaking the public web protocol.
pub struct TrendsSession {
    executor: RequestExecutor,
    settings: TrendsSettings,
    cookies_primed: AtomicBool,
}

impl std::fmt::Debug for TrendsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrendsSession")
            .field("executor", &self.executor)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl TrendsSession {
    /// Creates a session. `options.credential` and `options.pacing` are unused.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidRequest`] if the base URL is invalid or the
    /// HTTP client cannot be built.
    pub fn new(options: CollectorOptions, settings: TrendsSettings) -> Result<Self, ApiError> {
        let base_url = options
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let executor = RequestExecutor::builder("trends", base_url)
            .fixed_param("hl", settings.language.clone())
            .fixed_param("tz", settings.tz_offset_minutes.to_string())
            .cookie_store(true)
            .policy(options.policy)
            .timeouts(options.timeouts)
            .build()?;

        Ok(Self {
            executor,
            settings,
            cookies_primed: AtomicBool::new(false),
        })
    }

    /// Fetches the landing page once so the service sets its session cookie.
    ///
    /// Failures are logged and ignored; the data endpoints report their own.
    async fn prime_cookies(&self) {
        if self.cookies_primed.swap(true, Ordering::SeqCst) {
            return;
        }
        let geo = self.settings.cookie_geo().to_string();
        if let Err(e) = self.executor.execute_text("", &[("geo", geo)]).await {
            debug!(error = %e, "cookie priming request failed");
        }
    }

    async fn get_guarded<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<T, ApiError> {
        self.prime_cookies().await;
        let body = self.executor.execute_text(endpoint, params).await?;
        parse_guarded(endpoint, &body)
    }

    async fn widget_data<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        widget: &Widget,
        request: &serde_json::Value,
    ) -> Result<T, ApiError> {
        let params = [
            ("req", request.to_string()),
            ("token", widget.token.clone()),
        ];
        let response: WidgetResponse<T> = self.get_guarded(endpoint, &params).await?;
        Ok(response.default)
    }
}

#[async_trait]
impl TrendsApi for TrendsSession {
    async fn build_payload(&self, payload: &TrendsPayload) -> Result<PreparedQuery, ApiError> {
        if payload.keywords.is_empty() {
            return Err(ApiError::invalid_request("explore query needs at least one keyword"));
        }
        let comparison: Vec<serde_json::Value> = payload
            .keywords
            .iter()
            .map(|keyword| json!({"keyword": keyword, "time": payload.timeframe, "geo": payload.geo}))
            .collect();
        let req = json!({
            "comparisonItem": comparison,
            "category": payload.category,
            "property": payload.property,
        });

        let explore: ExploreResponse = self
            .get_guarded(EXPLORE_PATH, &[("req", req.to_string())])
            .await?;
        debug!(widgets = explore.widgets.len(), "explore query prepared");

        Ok(PreparedQuery {
            payload: payload.clone(),
            widgets: explore.widgets,
        })
    }

    async fn interest_over_time(&self, query: &PreparedQuery) -> Result<InterestOverTime, ApiError> {
        let widget = find_widget(query, "TIMESERIES")?;
        let data: MultilineData = self
            .widget_data(MULTILINE_PATH, widget, &widget.request)
            .await?;
        let interest = timeline_to_interest(&query.payload.keywords, data.timeline_data)?;
        info!(points = interest.timestamps.len(), "retrieved interest over time");
        Ok(interest)
    }

    async fn interest_by_region(
        &self,
        query: &PreparedQuery,
        resolution: Resolution,
        include_low_volume: bool,
    ) -> Result<InterestByRegion, ApiError> {
        let widget = find_widget(query, "GEO_MAP")?;
        let mut request = widget.request.clone();
        if let Some(object) = request.as_object_mut() {
            let _ = object.insert("resolution".to_string(), json!(resolution.as_str()));
            let _ = object.insert("includeLowSearchVolumeGeos".to_string(), json!(include_low_volume));
        }
        let data: GeoMapData = self.widget_data(COMPARED_GEO_PATH, widget, &request).await?;

        Ok(InterestByRegion {
            keywords: query.payload.keywords.clone(),
            regions: data
                .geo_map_data
                .into_iter()
                .map(|point| RegionInterest {
                    geo_code: point.geo_code,
                    geo_name: point.geo_name,
                    values: point.value,
                })
                .collect(),
        })
    }

    async fn related_queries(
        &self,
        query: &PreparedQuery,
    ) -> Result<KeyedResults<RelatedQueries>, ApiError> {
        let mut results = KeyedResults::new();
        for (index, widget) in query.widgets_with_prefix("RELATED_QUERIES").enumerate() {
            let Some(keyword) = widget_keyword(widget)
                .or_else(|| query.payload.keywords.get(index).cloned())
            else {
                warn!(widget = %widget.id, "related-queries widget without keyword, skipping");
                continue;
            };
            let data: RankedData = self
                .widget_data(RELATED_SEARCHES_PATH, widget, &widget.request)
                .await?;
            let mut lists = data.ranked_list.into_iter().map(|list| list.ranked_keyword);
            let related = RelatedQueries {
                top: lists.next().unwrap_or_default(),
                rising: lists.next().unwrap_or_default(),
            };
            let _ = results.insert(keyword, related);
        }
        Ok(results)
    }

    async fn trending_searches(&self, country: &str) -> Result<Vec<String>, ApiError> {
        let by_country: KeyedResults<Vec<String>> =
            self.get_guarded(TRENDING_SEARCHES_PATH, &[]).await?;
        by_country
            .get(country)
            .cloned()
            .ok_or_else(|| ApiError::invalid_request(format!("no trending searches for country '{country}'")))
    }

    async fn suggestions(&self, keyword: &str) -> Result<Vec<Suggestion>, ApiError> {
        let endpoint = format!("{AUTOCOMPLETE_PATH}/{}", urlencoding::encode(keyword));
        let response: WidgetResponse<AutocompleteData> = self.get_guarded(&endpoint, &[]).await?;
        Ok(response.default.topics)
    }
}

/// Removes the anti-XSSI guard (and a following comma) from a response body.
pub(crate) fn strip_xssi_guard(body: &str) -> &str {
    let trimmed = body.trim_start();
    match trimmed.strip_prefix(XSSI_GUARD) {
        Some(rest) => rest.strip_prefix(',').unwrap_or(rest),
        None => trimmed,
    }
}

fn parse_guarded<T: DeserializeOwned>(context: &str, body: &str) -> Result<T, ApiError> {
    serde_json::from_str(strip_xssi_guard(body)).map_err(|e| ApiError::malformed(context, e.to_string()))
}

fn find_widget<'q>(query: &'q PreparedQuery, id: &str) -> Result<&'q Widget, ApiError> {
    query
        .widgets
        .iter()
        .find(|w| w.id == id)
        .ok_or_else(|| ApiError::malformed(EXPLORE_PATH, format!("no {id} widget in explore response")))
}

/// Keyword a related-queries widget was built for.
fn widget_keyword(widget: &Widget) -> Option<String> {
    widget
        .request
        .pointer("/restriction/complexKeywordsRestriction/keyword/0/value")
        .and_then(serde_json::Value::as_str)
        .map(ToString::to_string)
}

/// Splits timeline points into one series per keyword.
///
/// A keyword column is present only when every point carries a value for it.
fn timeline_to_interest(
    keywords: &[String],
    points: Vec<TimelinePoint>,
) -> Result<InterestOverTime, ApiError> {
    let mut interest = InterestOverTime::default();
    if points.is_empty() {
        return Ok(interest);
    }

    for point in &points {
        let secs: i64 = point
            .time
            .parse()
            .map_err(|_| ApiError::malformed("timelineData.time", format!("{:?} is not a Unix time", point.time)))?;
        let at = DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| ApiError::malformed("timelineData.time", format!("{secs} out of range")))?;
        interest.timestamps.push(at);
    }

    for (index, keyword) in keywords.iter().enumerate() {
        let column: Option<Vec<f64>> = points.iter().map(|p| p.value.get(index).copied()).collect();
        match column {
            Some(values) => {
                let _ = interest.series.insert(keyword.clone(), values);
            }
            None => debug!(keyword, "no column for keyword"),
        }
    }
    Ok(interest)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_xssi_guard_variants() {
        assert_eq!(strip_xssi_guard(")]}'\n{\"a\":1}"), "\n{\"a\":1}");
        assert_eq!(strip_xssi_guard(")]}',\n{\"a\":1}"), "\n{\"a\":1}");
        assert_eq!(strip_xssi_guard("{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn test_parse_guarded_body() {
        let value: serde_json::Value = parse_guarded("test", ")]}',\n{\"default\":{}}").unwrap();
        assert!(value["default"].is_object());
        assert!(parse_guarded::<serde_json::Value>("test", ")]}'<html>").is_err());
    }

    #[test]
    fn test_timeline_to_interest_columns() {
        let points = vec![
            TimelinePoint {
                time: "1704067200".to_string(),
                value: vec![50.0, 20.0],
            },
            TimelinePoint {
                time: "1704672000".to_string(),
                value: vec![60.0, 25.0],
            },
        ];
        let keywords = vec!["rust".to_string(), "go".to_string(), "zig".to_string()];
        let interest = timeline_to_interest(&keywords, points).unwrap();
        assert_eq!(interest.timestamps.len(), 2);
        assert_eq!(interest.series("rust"), Some(&[50.0, 60.0][..]));
        assert_eq!(interest.series("go"), Some(&[20.0, 25.0][..]));
        assert!(interest.series("zig").is_none());
    }

    #[test]
    fn test_timeline_bad_time_is_malformed() {
        let points = vec![TimelinePoint {
            time: "Jan 1".to_string(),
            value: vec![1.0],
        }];
        let err = timeline_to_interest(&["rust".to_string()], points).unwrap_err();
        assert!(matches!(err, ApiError::MalformedResponse { .. }));
    }

    #[test]
    fn test_widget_keyword_from_restriction() {
        let widget: Widget = serde_json::from_value(json!({
            "id": "RELATED_QUERIES",
            "token": "abc",
            "request": {"restriction": {"complexKeywordsRestriction": {"keyword": [{"type": "BROAD", "value": "rust"}]}}}
        }))
        .unwrap();
        assert_eq!(widget_keyword(&widget).as_deref(), Some("rust"));
    }

    #[test]
    fn test_cookie_geo_from_language() {
        assert_eq!(TrendsSettings::default().cookie_geo(), "US");
        let settings = TrendsSettings {
            language: "de".to_string(),
            tz_offset_minutes: -60,
        };
        assert_eq!(settings.cookie_geo(), "US");
    }
}
