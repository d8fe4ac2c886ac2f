//! Q&A activity collector backed by the Stack Exchange API 2.3.
//!
//! Every response is wrapped in an [`Envelope`]. The key is sent as the `key`
//! query parameter and `site=stackoverflow` is fixed on every request. The
//! envelope's `backoff` field, when present, delays the next request.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{Span, debug, info, warn};

use crate::api::{ApiError, Credential, RequestExecutor};
use crate::metrics::stats::mean_of_counts;
use crate::metrics::{BatchResults, MetricsReport, Pacing, collect_per_key};

use super::CollectorOptions;

/// Default Stack Exchange API base URL.
const DEFAULT_BASE_URL: &str = "https://api.stackexchange.com/2.3";

/// Filter that makes `/questions` return only the `total` count.
const TOTAL_ONLY_FILTER: &str = "!9Z(-wwYGT";

/// Window counted as "recent" for demand metrics.
const RECENT_WINDOW_DAYS: i64 = 7;

/// Default window for tag question listings and searches.
const DEFAULT_LOOKBACK_DAYS: i64 = 30;

/// Remaining-quota level under which the collector slows down.
const LOW_QUOTA_THRESHOLD: u64 = 10;

// ==================== Stack Exchange Response Types ====================

/// The common wrapper around every Stack Exchange response.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Envelope<T> {
    /// Result items, in API order.
    #[serde(default)]
    pub items: Vec<T>,
    /// Whether more pages exist.
    #[serde(default)]
    pub has_more: bool,
    /// Total matching items, when the filter requests it.
    pub total: Option<u64>,
    /// Requests left for this key/IP today.
    pub quota_remaining: Option<u64>,
    /// Seconds the caller must wait before the next request to this method.
    pub backoff: Option<u64>,
}

/// A tag with its usage statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Tag name.
    pub name: String,
    /// Number of questions carrying the tag.
    pub count: Option<u64>,
    /// Whether synonyms exist.
    #[serde(default)]
    pub has_synonyms: bool,
    /// Unix timestamp of the last activity on the tag.
    pub last_activity_date: Option<i64>,
}

/// A question as returned by `/questions` and `/search`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Question id.
    pub question_id: u64,
    /// Title (HTML-escaped by the API).
    pub title: Option<String>,
    /// Tags on the question.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Net vote score.
    #[serde(default)]
    pub score: i64,
    /// Number of answers.
    #[serde(default)]
    pub answer_count: u64,
    /// Number of views.
    #[serde(default)]
    pub view_count: u64,
    /// Whether an accepted or upvoted answer exists.
    #[serde(default)]
    pub is_answered: bool,
    /// Unix creation timestamp.
    pub creation_date: Option<i64>,
    /// Unix timestamp of the last activity.
    pub last_activity_date: Option<i64>,
    /// Question URL.
    pub link: Option<String>,
    /// Body HTML, present with the `withbody` filter.
    pub body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagSynonym {
    to_tag: String,
}

// ==================== Summary Types ====================

/// Demand metrics for one tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QaDemandMetrics {
    /// All-time question count from the tag info.
    pub total_questions: Option<u64>,
    /// Questions with activity in the last 7 days.
    pub recent_questions: u64,
    /// Mean score of the recent questions.
    pub avg_score: Option<f64>,
    /// Mean answer count of the recent questions.
    pub avg_answers: Option<f64>,
    /// Mean view count of the recent questions.
    pub avg_views: Option<f64>,
    /// Last activity on the tag.
    pub last_activity: Option<DateTime<Utc>>,
}

/// Question count for one week-long window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeeklyCount {
    /// Start of the window.
    pub week_start: DateTime<Utc>,
    /// Questions created in the window, when the API reported a total.
    pub count: Option<u64>,
}

/// Summarizes recent questions and tag info into demand metrics.
///
/// Returns `None` when there is neither a question nor tag info, so an empty
/// upstream answer never turns into zero-valued statistics.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn summarize_questions(questions: &[Question], tag_info: Option<&Tag>) -> Option<QaDemandMetrics> {
    if questions.is_empty() && tag_info.is_none() {
        return None;
    }

    let n = questions.len();
    let score_sum: i64 = questions.iter().map(|q| q.score).sum();
    let answers: u64 = questions.iter().map(|q| q.answer_count).sum();
    let views: u64 = questions.iter().map(|q| q.view_count).sum();

    Some(QaDemandMetrics {
        total_questions: tag_info.and_then(|t| t.count),
        recent_questions: n as u64,
        avg_score: (n > 0).then(|| score_sum as f64 / n as f64),
        avg_answers: mean_of_counts(answers, n),
        avg_views: mean_of_counts(views, n),
        last_activity: tag_info
            .and_then(|t| t.last_activity_date)
            .and_then(|secs| DateTime::from_timestamp(secs, 0)),
    })
}

// ==================== QaCollector ====================

/// Collects question activity per tag from Stack Overflow.
pub struct QaCollector {
    executor: RequestExecutor,
    pacing: Pacing,
    span: Span,
}

impl std::fmt::Debug for QaCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QaCollector")
            .field("executor", &self.executor)
            .field("pacing", &self.pacing)
            .finish_non_exhaustive()
    }
}

impl QaCollector {
    /// Default pacing: 100 ms between tags, 2 s when fewer than 10 requests remain.
    pub const DEFAULT_PACING: Pacing = Pacing::fixed(Duration::from_millis(100))
        .with_low_quota_pause(LOW_QUOTA_THRESHOLD, Duration::from_secs(2));

    /// Creates a collector.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidRequest`] if the base URL is invalid or the
    /// HTTP client cannot be built.
    pub fn new(options: CollectorOptions) -> Result<Self, ApiError> {
        let base_url = options
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let executor = RequestExecutor::builder("stackexchange", base_url)
            .credential(options.credential.map(|key| Credential::query_param("key", key)))
            .fixed_param("site", "stackoverflow")
            .policy(options.policy)
            .timeouts(options.timeouts)
            .build()?;

        Ok(Self {
            executor,
            pacing: options.pacing.unwrap_or(Self::DEFAULT_PACING),
            span: tracing::info_span!("collector", collector = "stackoverflow"),
        })
    }

    /// The underlying request executor.
    #[must_use]
    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    async fn envelope<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<Envelope<T>, ApiError> {
        let envelope: Envelope<T> = self.executor.execute_json(endpoint, params).await?;
        if let Some(remaining) = envelope.quota_remaining {
            self.executor.observe_quota_remaining(remaining);
        }
        if let Some(backoff) = envelope.backoff {
            warn!(endpoint, backoff_secs = backoff, "server requested backoff");
            self.executor.defer_for(Duration::from_secs(backoff));
        }
        Ok(envelope)
    }

    /// Most popular tags with at least `min_count` questions.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] if the request fails.
    #[tracing::instrument(parent = &self.span, skip(self))]
    pub async fn top_tags(&self, page_size: u32, min_count: u64) -> Result<Vec<Tag>, ApiError> {
        let params = [
            ("order", "desc".to_string()),
            ("sort", "popular".to_string()),
            ("pagesize", page_size.to_string()),
            ("min", min_count.to_string()),
            ("filter", "default".to_string()),
        ];
        let envelope: Envelope<Tag> = self.envelope("tags", &params).await?;
        info!(count = envelope.items.len(), "retrieved tags");
        Ok(envelope.items)
    }

    /// Questions carrying `tag` with activity between `from` and `to`.
    ///
    /// Defaults to the last 30 days.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] if the request fails.
    #[tracing::instrument(parent = &self.span, skip(self, from, to))]
    pub async fn tag_questions(
        &self,
        tag: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        page_size: u32,
    ) -> Result<Vec<Question>, ApiError> {
        let now = Utc::now();
        let from = from.unwrap_or(now - TimeDelta::days(DEFAULT_LOOKBACK_DAYS));
        let to = to.unwrap_or(now);
        let params = [
            ("order", "desc".to_string()),
            ("sort", "activity".to_string()),
            ("tagged", tag.to_string()),
            ("fromdate", from.timestamp().to_string()),
            ("todate", to.timestamp().to_string()),
            ("pagesize", page_size.to_string()),
            ("filter", "withbody".to_string()),
        ];
        let envelope: Envelope<Question> = self.envelope("questions", &params).await?;
        info!(count = envelope.items.len(), "retrieved questions");
        Ok(envelope.items)
    }

    /// Weekly question counts per tag over the last `days_back` days.
    ///
    /// One request per full week, newest first. A tag with no full week in
    /// range is [`QueryOutcome::NoData`](crate::metrics::QueryOutcome::NoData).
    #[tracing::instrument(parent = &self.span, skip_all, fields(tags = tags.len(), days_back = days_back))]
    pub async fn tag_stats_timeseries(
        &self,
        tags: &[String],
        days_back: u32,
    ) -> BatchResults<Vec<WeeklyCount>> {
        let end = Utc::now();
        collect_per_key(
            "qa_timeseries",
            tags,
            || self.pacing.between_keys,
            |tag| self.weekly_counts(tag, end, days_back / 7),
        )
        .await
    }

    async fn weekly_counts(
        &self,
        tag: &str,
        end: DateTime<Utc>,
        weeks: u32,
    ) -> Result<Option<Vec<WeeklyCount>>, ApiError> {
        let mut series = Vec::new();
        for week in 0..weeks {
            let week_end = end - TimeDelta::days(i64::from(week) * 7);
            let week_start = week_end - TimeDelta::days(7);
            let params = [
                ("tagged", tag.to_string()),
                ("fromdate", week_start.timestamp().to_string()),
                ("todate", week_end.timestamp().to_string()),
                ("filter", TOTAL_ONLY_FILTER.to_string()),
            ];
            let envelope: Envelope<serde_json::Value> = self.envelope("questions", &params).await?;
            series.push(WeeklyCount {
                week_start,
                count: envelope.total,
            });

            if self.executor.rate_limit().is_below(self.pacing.low_quota_threshold) {
                warn!(tag, "approaching rate limit, pausing");
                tokio::time::sleep(self.pacing.low_quota_pause).await;
            }
        }
        debug!(tag, weeks = series.len(), "collected weekly counts");
        Ok((!series.is_empty()).then_some(series))
    }

    /// Tags that `tag` is a synonym target for.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] if the request fails.
    #[tracing::instrument(parent = &self.span, skip(self))]
    pub async fn tag_synonyms(&self, tag: &str) -> Result<Vec<String>, ApiError> {
        let endpoint = format!("tags/{}/synonyms", urlencoding::encode(tag));
        let params = [("filter", "default".to_string())];
        let envelope: Envelope<TagSynonym> = self.envelope(&endpoint, &params).await?;
        Ok(envelope.items.into_iter().map(|s| s.to_tag).collect())
    }

    /// Usage statistics for a single tag, if the tag exists.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] if the request fails.
    #[tracing::instrument(parent = &self.span, skip(self))]
    pub async fn tag_info(&self, tag: &str) -> Result<Option<Tag>, ApiError> {
        let endpoint = format!("tags/{}/info", urlencoding::encode(tag));
        let envelope: Envelope<Tag> = self.envelope(&endpoint, &[]).await?;
        Ok(envelope.items.into_iter().next())
    }

    /// Full-text question search, optionally restricted to `tags`.
    ///
    /// Defaults to questions from the last 30 days.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] if the request fails.
    #[tracing::instrument(parent = &self.span, skip(self, from))]
    pub async fn search_questions(
        &self,
        query: &str,
        tags: &[String],
        from: Option<DateTime<Utc>>,
        page_size: u32,
    ) -> Result<Vec<Question>, ApiError> {
        let from = from.unwrap_or_else(|| Utc::now() - TimeDelta::days(DEFAULT_LOOKBACK_DAYS));
        let mut params = vec![
            ("order", "desc".to_string()),
            ("sort", "relevance".to_string()),
            ("q", query.to_string()),
            ("fromdate", from.timestamp().to_string()),
            ("pagesize", page_size.to_string()),
            ("filter", "withbody".to_string()),
        ];
        if !tags.is_empty() {
            params.push(("tagged", tags.join(";")));
        }
        let envelope: Envelope<Question> = self.envelope("search", &params).await?;
        Ok(envelope.items)
    }

    /// Demand metrics for each technology tag.
    #[tracing::instrument(parent = &self.span, skip_all, fields(techs = techs.len()))]
    pub async fn tech_demand_metrics(&self, techs: &[String]) -> MetricsReport<QaDemandMetrics> {
        info!("calculating Q&A demand metrics");
        let results = collect_per_key(
            "qa_demand",
            techs,
            || self.pacing.pause_for(self.executor.rate_limit().remaining),
            |tech| self.demand_for(tech),
        )
        .await;
        MetricsReport::now(results)
    }

    async fn demand_for(&self, tech: &str) -> Result<Option<QaDemandMetrics>, ApiError> {
        let since = Utc::now() - TimeDelta::days(RECENT_WINDOW_DAYS);
        let recent = self.tag_questions(tech, Some(since), None, 100).await?;
        let info = self.tag_info(tech).await?;
        Ok(summarize_questions(&recent, info.as_ref()))
    }
}
