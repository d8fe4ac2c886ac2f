//! Search-interest collector.
//!
//! The collector talks to the service through the [`TrendsApi`] trait so the
//! protocol session ([`TrendsSession`]) can be swapped for a fake in tests.
//! The service compares at most five keywords per query; longer lists are
//! split into chunks of five, queried one chunk at a time, and merged.

mod model;
mod session;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{Span, debug, error, info};

use crate::api::{ApiError, FailureReport};
use crate::metrics::stats::{mean, sample_std_dev};
use crate::metrics::{KeyedResults, MetricsReport, collect_per_key};

use super::CollectorOptions;

pub use model::{
    InterestByRegion, InterestOverTime, MAX_KEYWORDS_PER_QUERY, ParseResolutionError, PreparedQuery,
    RegionInterest, RelatedQueries, RelatedQuery, Resolution, Suggestion, Trend, TrendsPayload,
    Widget,
};
pub use session::{TrendsSession, TrendsSettings};

/// Default timeframe for comparisons.
pub const DEFAULT_TIMEFRAME: &str = "today 12-m";

/// Default periods for demand trends.
pub const DEFAULT_DEMAND_PERIODS: [&str; 2] = ["today 3-m", "today 12-m"];

/// Default country for trending searches.
pub const DEFAULT_TRENDING_COUNTRY: &str = "united_states";

/// Default pause between chunked or per-period requests.
const DEFAULT_REQUEST_DELAY: Duration = Duration::from_secs(1);

/// Session operations of a search-interest service.
#[async_trait]
pub trait TrendsApi: Send + Sync {
    /// Registers a query and returns its widget handles.
    async fn build_payload(&self, payload: &TrendsPayload) -> Result<PreparedQuery, ApiError>;

    /// Interest over time for the query's keywords.
    async fn interest_over_time(&self, query: &PreparedQuery) -> Result<InterestOverTime, ApiError>;

    /// Interest per geographic area.
    async fn interest_by_region(
        &self,
        query: &PreparedQuery,
        resolution: Resolution,
        include_low_volume: bool,
    ) -> Result<InterestByRegion, ApiError>;

    /// Top and rising related queries, keyed by keyword.
    async fn related_queries(
        &self,
        query: &PreparedQuery,
    ) -> Result<KeyedResults<RelatedQueries>, ApiError>;

    /// Current trending searches for a country (e.g. `united_states`).
    async fn trending_searches(&self, country: &str) -> Result<Vec<String>, ApiError>;

    /// Keyword suggestions.
    async fn suggestions(&self, keyword: &str) -> Result<Vec<Suggestion>, ApiError>;
}

// ==================== Summary Types ====================

/// Interest statistics for one technology over a comparison timeframe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterestSummary {
    /// Mean of the series.
    pub avg_interest: f64,
    /// Highest sample.
    pub max_interest: f64,
    /// Lowest sample.
    pub min_interest: f64,
    /// Latest sample.
    pub current_interest: f64,
    /// Rising when the latest sample is above the mean.
    pub trend: Trend,
    /// Sample standard deviation; `None` with fewer than two samples.
    pub volatility: Option<f64>,
    /// Number of samples.
    pub data_points: usize,
}

/// A chunk whose query failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedBatch {
    /// Keywords in the chunk.
    pub keywords: Vec<String>,
    /// Why it failed.
    pub failure: FailureReport,
}

/// Result of [`SearchInterestCollector::compare_technologies`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TechnologyComparison {
    /// Timeframe the comparison covers.
    pub timeframe: String,
    /// Geography code, empty for worldwide.
    pub geo: String,
    /// When the comparison finished.
    pub computed_at: DateTime<Utc>,
    /// Per-technology statistics; technologies without data are omitted.
    pub technologies: KeyedResults<InterestSummary>,
    /// Chunks that failed; their keywords are absent from `technologies`.
    pub failed_batches: Vec<FailedBatch>,
}

/// Interest statistics for one technology over one period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodTrend {
    /// Mean of the series.
    pub avg_interest: f64,
    /// Latest sample.
    pub current: f64,
    /// Highest sample.
    pub peak: f64,
    /// Second-half mean vs first-half mean, in percent; 0 when the first half is 0.
    pub growth_rate: f64,
    /// `1 - std/mean`; 0 when the mean is 0, `None` with fewer than two samples.
    pub consistency: Option<f64>,
}

/// A period whose query failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedPeriod {
    /// Timeframe of the period.
    pub period: String,
    /// Why it failed.
    pub failure: FailureReport,
}

/// Demand trend of one technology across periods.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DemandTrend {
    /// Periods with data, in request order.
    pub periods: KeyedResults<PeriodTrend>,
    /// Periods whose query failed; they are absent from `periods`.
    pub failed_periods: Vec<FailedPeriod>,
}

/// Summarizes one interest series. `None` for an empty series.
#[must_use]
pub fn summarize_interest(series: &[f64]) -> Option<InterestSummary> {
    let avg = mean(series)?;
    let current = *series.last()?;
    Some(InterestSummary {
        avg_interest: avg,
        max_interest: series.iter().copied().fold(f64::MIN, f64::max),
        min_interest: series.iter().copied().fold(f64::MAX, f64::min),
        current_interest: current,
        trend: if current > avg {
            Trend::Rising
        } else {
            Trend::Declining
        },
        volatility: sample_std_dev(series),
        data_points: series.len(),
    })
}

/// Summarizes one period's series. `None` for an empty series.
#[must_use]
pub fn summarize_period(series: &[f64]) -> Option<PeriodTrend> {
    let avg = mean(series)?;
    let current = *series.last()?;
    let (first, second) = series.split_at(series.len() / 2);
    let growth_rate = match (mean(first), mean(second)) {
        (Some(first), Some(second)) if first > 0.0 => (second - first) / first * 100.0,
        _ => 0.0,
    };
    let consistency = if avg > 0.0 {
        sample_std_dev(series).map(|std| 1.0 - std / avg)
    } else {
        Some(0.0)
    };

    Some(PeriodTrend {
        avg_interest: avg,
        current,
        peak: series.iter().copied().fold(f64::MIN, f64::max),
        growth_rate,
        consistency,
    })
}

// ==================== SearchInterestCollector ====================

/// Collects search interest through a [`TrendsApi`] session.
pub struct SearchInterestCollector<A: TrendsApi = TrendsSession> {
    api: A,
    request_delay: Duration,
    span: Span,
}

impl<A: TrendsApi> std::fmt::Debug for SearchInterestCollector<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchInterestCollector")
            .field("request_delay", &self.request_delay)
            .finish_non_exhaustive()
    }
}

impl SearchInterestCollector<TrendsSession> {
    /// Creates a collector over a [`TrendsSession`].
    ///
    /// `options.pacing.between_keys` sets the pause between requests.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidRequest`] if the session cannot be built.
    pub fn new(options: CollectorOptions, settings: TrendsSettings) -> Result<Self, ApiError> {
        let request_delay = options
            .pacing
            .map_or(DEFAULT_REQUEST_DELAY, |pacing| pacing.between_keys);
        let session = TrendsSession::new(options, settings)?;
        Ok(Self::with_api(session, request_delay))
    }
}

impl<A: TrendsApi> SearchInterestCollector<A> {
    /// Creates a collector over any [`TrendsApi`] implementation.
    pub fn with_api(api: A, request_delay: Duration) -> Self {
        Self {
            api,
            request_delay,
            span: tracing::info_span!("collector", collector = "trends"),
        }
    }

    /// The session this collector uses.
    pub fn api(&self) -> &A {
        &self.api
    }

    async fn pause(&self) {
        if !self.request_delay.is_zero() {
            debug!(delay_ms = self.request_delay.as_millis(), "pausing between requests");
            tokio::time::sleep(self.request_delay).await;
        }
    }

    async fn prepare(
        &self,
        keywords: &[String],
        timeframe: &str,
        geo: &str,
    ) -> Result<PreparedQuery, ApiError> {
        if keywords.is_empty() {
            return Err(ApiError::invalid_request("at least one keyword is required"));
        }
        let keywords = keywords.iter().take(MAX_KEYWORDS_PER_QUERY).cloned().collect();
        self.api
            .build_payload(&TrendsPayload::new(keywords, timeframe, geo))
            .await
    }

    /// Interest over time for up to the first five `keywords`.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] if `keywords` is empty or the session fails.
    #[tracing::instrument(parent = &self.span, skip(self))]
    pub async fn interest_over_time(
        &self,
        keywords: &[String],
        timeframe: &str,
        geo: &str,
    ) -> Result<InterestOverTime, ApiError> {
        let query = self.prepare(keywords, timeframe, geo).await?;
        self.api.interest_over_time(&query).await
    }

    /// Interest per area for up to the first five `keywords`, including
    /// low-volume areas.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] if `keywords` is empty or the session fails.
    #[tracing::instrument(parent = &self.span, skip(self))]
    pub async fn interest_by_region(
        &self,
        keywords: &[String],
        resolution: Resolution,
        timeframe: &str,
    ) -> Result<InterestByRegion, ApiError> {
        let query = self.prepare(keywords, timeframe, "").await?;
        self.api.interest_by_region(&query, resolution, true).await
    }

    /// Top and rising related queries for one keyword.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] if the session fails.
    #[tracing::instrument(parent = &self.span, skip(self))]
    pub async fn related_queries(
        &self,
        keyword: &str,
        timeframe: &str,
        geo: &str,
    ) -> Result<RelatedQueries, ApiError> {
        let query = self.prepare(&[keyword.to_string()], timeframe, geo).await?;
        let related = self.api.related_queries(&query).await?;
        let found = related.get(keyword).cloned();
        Ok(found.unwrap_or_else(|| {
            related
                .into_iter()
                .next()
                .map(|(_, queries)| queries)
                .unwrap_or_default()
        }))
    }

    /// Current trending searches for `country`.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] if the session fails.
    #[tracing::instrument(parent = &self.span, skip(self))]
    pub async fn trending_searches(&self, country: &str) -> Result<Vec<String>, ApiError> {
        let searches = self.api.trending_searches(country).await?;
        info!(count = searches.len(), "retrieved trending searches");
        Ok(searches)
    }

    /// Suggested keyword titles.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] if the session fails.
    #[tracing::instrument(parent = &self.span, skip(self))]
    pub async fn suggestions(&self, keyword: &str) -> Result<Vec<String>, ApiError> {
        let suggestions = self.api.suggestions(keyword).await?;
        Ok(suggestions.into_iter().map(|s| s.title).collect())
    }

    /// Compares interest across any number of technologies.
    ///
    /// Technologies are queried in chunks of five, in input order, with a
    /// pause between chunks. A technology the service returned no column for
    /// is omitted; a failed chunk is listed in `failed_batches`.
    #[tracing::instrument(parent = &self.span, skip(self, techs), fields(techs = techs.len()))]
    pub async fn compare_technologies(
        &self,
        techs: &[String],
        timeframe: &str,
        geo: &str,
    ) -> TechnologyComparison {
        let mut distinct: Vec<String> = Vec::with_capacity(techs.len());
        for tech in techs {
            if !distinct.contains(tech) {
                distinct.push(tech.clone());
            }
        }
        info!(count = distinct.len(), "comparing technologies");

        let mut technologies = KeyedResults::new();
        let mut failed_batches = Vec::new();
        let chunks: Vec<&[String]> = distinct.chunks(MAX_KEYWORDS_PER_QUERY).collect();

        for (index, chunk) in chunks.iter().enumerate() {
            match self.interest_over_time(chunk, timeframe, geo).await {
                Ok(interest) => {
                    for tech in *chunk {
                        if let Some(summary) = interest.series(tech).and_then(summarize_interest) {
                            let _ = technologies.insert(tech.clone(), summary);
                        }
                    }
                }
                Err(e) => {
                    error!(batch = ?chunk, error = %e, "interest query failed for batch");
                    failed_batches.push(FailedBatch {
                        keywords: chunk.to_vec(),
                        failure: FailureReport::from(&e),
                    });
                }
            }
            if index + 1 < chunks.len() {
                self.pause().await;
            }
        }

        TechnologyComparison {
            timeframe: timeframe.to_string(),
            geo: geo.to_string(),
            computed_at: Utc::now(),
            technologies,
            failed_batches,
        }
    }

    /// Demand trends per technology across `periods`.
    ///
    /// One request per technology and period, with a pause between requests.
    /// A failed period is listed in `failed_periods` and the others are still
    /// reported. A technology is `Failed` only when every period failed, and
    /// `NoData` when no period failed and none had data.
    #[tracing::instrument(parent = &self.span, skip_all, fields(techs = techs.len()))]
    pub async fn tech_demand_trends(
        &self,
        techs: &[String],
        periods: &[String],
    ) -> MetricsReport<DemandTrend> {
        let results = collect_per_key(
            "demand_trends",
            techs,
            || self.request_delay,
            |tech| self.demand_trend(tech, periods),
        )
        .await;
        MetricsReport::now(results)
    }

    async fn demand_trend(
        &self,
        tech: &str,
        periods: &[String],
    ) -> Result<Option<DemandTrend>, ApiError> {
        let keywords = [tech.to_string()];
        let mut trend_periods = KeyedResults::new();
        let mut failed_periods = Vec::new();
        let mut last_error = None;
        for (index, period) in periods.iter().enumerate() {
            match self.interest_over_time(&keywords, period, "").await {
                Ok(interest) => {
                    if let Some(summary) = interest.series(tech).and_then(summarize_period) {
                        let _ = trend_periods.insert(period.clone(), summary);
                    }
                }
                Err(e) => {
                    error!(tech, period = %period, error = %e, "interest query failed for period");
                    failed_periods.push(FailedPeriod {
                        period: period.clone(),
                        failure: FailureReport::from(&e),
                    });
                    last_error = Some(e);
                }
            }
            if index + 1 < periods.len() {
                self.pause().await;
            }
        }

        if let Some(e) = last_error.filter(|_| failed_periods.len() == periods.len()) {
            return Err(e);
        }
        if trend_periods.is_empty() && failed_periods.is_empty() {
            return Ok(None);
        }
        Ok(Some(DemandTrend {
            periods: trend_periods,
            failed_periods,
        }))
    }
}
