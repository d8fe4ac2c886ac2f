//! Repository popularity collector backed by the GitHub REST API.
//!
//! The token, when configured, is sent as `Authorization: token <T>`. GitHub
//! answers both 403 and 429 when the quota is exhausted; a 403 is only
//! treated as throttling when it carries `X-RateLimit-Remaining: 0` or a
//! `Retry-After` header, so permission errors fail fast.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::header::{ACCEPT, HeaderValue};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{Span, info};

use crate::api::{ApiError, Credential, RequestExecutor};
use crate::metrics::dates::{count_newer_than, format_day};
use crate::metrics::stats::mean_of_counts;
use crate::metrics::{KeyedResults, MetricsReport, Pacing, collect_per_key};

use super::CollectorOptions;

/// Default GitHub API base URL.
const DEFAULT_BASE_URL: &str = "https://api.github.com";

/// GitHub REST v3 media type.
const GITHUB_MEDIA_TYPE: &str = "application/vnd.github.v3+json";

/// Minimum stars for repositories counted in language stats.
const LANGUAGE_STATS_MIN_STARS: u64 = 10;

/// Window counted as "recent" for language stats.
const RECENT_CREATION_DAYS: i64 = 30;

/// Window counted as "recent" for popularity metrics.
const RECENT_UPDATE_DAYS: i64 = 7;

// ==================== GitHub API Response Types ====================

/// Owner of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    /// Account login.
    pub login: String,
}

/// A repository as returned by search and `/repos/{owner}/{repo}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// `owner/name`.
    pub full_name: String,
    /// Repository name.
    pub name: String,
    /// Owning account.
    pub owner: Option<Owner>,
    /// Web URL.
    pub html_url: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Primary language.
    pub language: Option<String>,
    /// Stars.
    #[serde(default)]
    pub stargazers_count: u64,
    /// Forks.
    #[serde(default)]
    pub forks_count: u64,
    /// Watchers.
    #[serde(default)]
    pub watchers_count: u64,
    /// Open issues and pull requests.
    #[serde(default)]
    pub open_issues_count: u64,
    /// Creation time, `YYYY-MM-DDTHH:MM:SSZ`.
    pub created_at: Option<String>,
    /// Last update time, `YYYY-MM-DDTHH:MM:SSZ`.
    pub updated_at: Option<String>,
    /// Last push time.
    pub pushed_at: Option<String>,
}

/// `/search/repositories` response.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    /// Total matches across all pages.
    pub total_count: Option<u64>,
    /// Whether the search timed out before completing.
    #[serde(default)]
    pub incomplete_results: bool,
    /// Repositories on this page.
    #[serde(default)]
    pub items: Vec<Repository>,
}

// ==================== Summary Types ====================

/// Aggregate statistics for one language.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LanguageStats {
    /// Repositories in the result page.
    pub total_repos: u64,
    /// Sum of stars.
    pub total_stars: u64,
    /// Sum of forks.
    pub total_forks: u64,
    /// Sum of watchers.
    pub total_watchers: u64,
    /// Mean stars per repository.
    pub avg_stars: Option<f64>,
    /// Repositories created in the last 30 days.
    pub recent_repos: u64,
}

/// Popularity metrics for one technology keyword.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopularityMetrics {
    /// Repositories in the result page.
    pub repo_count: u64,
    /// Sum of stars.
    pub total_stars: u64,
    /// Sum of forks.
    pub total_forks: u64,
    /// Mean stars per repository.
    pub avg_stars: Option<f64>,
    /// Mean forks per repository.
    pub avg_forks: Option<f64>,
    /// Sum of open issues.
    pub open_issues: u64,
    /// Repositories updated in the last 7 days.
    pub recent_activity: u64,
}

/// Creation window for trending repositories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrendingWindow {
    /// Created in the last day.
    Daily,
    /// Created in the last 7 days.
    #[default]
    Weekly,
    /// Created in the last 30 days.
    Monthly,
}

impl TrendingWindow {
    /// Length of the window in days.
    #[must_use]
    pub fn days(self) -> i64 {
        match self {
            Self::Daily => 1,
            Self::Weekly => 7,
            Self::Monthly => 30,
        }
    }
}

impl fmt::Display for TrendingWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        })
    }
}

/// Error for an unrecognized trending window name.
#[derive(Debug, Error)]
#[error("unknown trending window '{0}' (expected daily, weekly or monthly)")]
pub struct ParseTrendingWindowError(String);

impl FromStr for TrendingWindow {
    type Err = ParseTrendingWindowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            _ => Err(ParseTrendingWindowError(s.to_string())),
        }
    }
}

/// Builds a repository search query:
/// `language:X stars:>=N [created:>=YYYY-MM-DD]`.
#[must_use]
pub fn compose_repository_query(
    language: &str,
    min_stars: u64,
    created_after: Option<DateTime<Utc>>,
) -> String {
    let mut parts = vec![format!("language:{language}"), format!("stars:>={min_stars}")];
    if let Some(created_after) = created_after {
        parts.push(format!("created:>={}", format_day(created_after)));
    }
    parts.join(" ")
}

/// Summarizes a language's search results.
///
/// `Ok(None)` for an empty result.
///
/// # Errors
///
/// Returns [`ApiError::MalformedResponse`] if a `created_at` value is missing
/// or malformed.
pub fn summarize_language(
    repos: &[Repository],
    recent_cutoff: DateTime<Utc>,
) -> Result<Option<LanguageStats>, ApiError> {
    if repos.is_empty() {
        return Ok(None);
    }
    let total_stars = repos.iter().map(|r| r.stargazers_count).sum();
    let recent_repos = count_newer_than(
        "created_at",
        repos.iter().map(|r| r.created_at.as_deref()),
        recent_cutoff,
    )?;

    Ok(Some(LanguageStats {
        total_repos: repos.len() as u64,
        total_stars,
        total_forks: repos.iter().map(|r| r.forks_count).sum(),
        total_watchers: repos.iter().map(|r| r.watchers_count).sum(),
        avg_stars: mean_of_counts(total_stars, repos.len()),
        recent_repos,
    }))
}

/// Summarizes a technology keyword's search results.
///
/// `Ok(None)` for an empty result.
///
/// # Errors
///
/// Returns [`ApiError::MalformedResponse`] if an `updated_at` value is missing
/// or malformed.
pub fn summarize_popularity(
    repos: &[Repository],
    recent_cutoff: DateTime<Utc>,
) -> Result<Option<PopularityMetrics>, ApiError> {
    if repos.is_empty() {
        return Ok(None);
    }
    let total_stars = repos.iter().map(|r| r.stargazers_count).sum();
    let total_forks = repos.iter().map(|r| r.forks_count).sum();
    let recent_activity = count_newer_than(
        "updated_at",
        repos.iter().map(|r| r.updated_at.as_deref()),
        recent_cutoff,
    )?;

    Ok(Some(PopularityMetrics {
        repo_count: repos.len() as u64,
        total_stars,
        total_forks,
        avg_stars: mean_of_counts(total_stars, repos.len()),
        avg_forks: mean_of_counts(total_forks, repos.len()),
        open_issues: repos.iter().map(|r| r.open_issues_count).sum(),
        recent_activity,
    }))
}

// ==================== RepoCollector ====================

/// Collects repository popularity from GitHub search.
pub struct RepoCollector {
    executor: RequestExecutor,
    pacing: Pacing,
    span: Span,
}

impl fmt::Debug for RepoCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepoCollector")
            .field("executor", &self.executor)
            .field("pacing", &self.pacing)
            .finish_non_exhaustive()
    }
}

impl RepoCollector {
    /// Default pacing: 500 ms between technologies, 5 s when fewer than 10
    /// requests remain.
    pub const DEFAULT_PACING: Pacing =
        Pacing::fixed(Duration::from_millis(500)).with_low_quota_pause(10, Duration::from_secs(5));

    /// Creates a collector.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidRequest`] if the base URL or token is
    /// invalid, or the HTTP client cannot be built.
    pub fn new(options: CollectorOptions) -> Result<Self, ApiError> {
        let base_url = options
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let executor = RequestExecutor::builder("github", base_url)
            .credential(options.credential.map(Credential::auth_token))
            .header(ACCEPT, HeaderValue::from_static(GITHUB_MEDIA_TYPE))
            .forbidden_may_throttle(true)
            .policy(options.policy)
            .timeouts(options.timeouts)
            .build()?;

        Ok(Self {
            executor,
            pacing: options.pacing.unwrap_or(Self::DEFAULT_PACING),
            span: tracing::info_span!("collector", collector = "github"),
        })
    }

    /// The underlying request executor.
    #[must_use]
    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    async fn search(&self, query: String, per_page: u32) -> Result<Vec<Repository>, ApiError> {
        let params = [
            ("q", query),
            ("sort", "stars".to_string()),
            ("order", "desc".to_string()),
            ("per_page", per_page.to_string()),
        ];
        let response: SearchResponse = self
            .executor
            .execute_json("search/repositories", &params)
            .await?;
        Ok(response.items)
    }

    /// Top repositories in `language` by stars.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] if the request fails.
    #[tracing::instrument(parent = &self.span, skip(self, created_after))]
    pub async fn search_repositories(
        &self,
        language: &str,
        min_stars: u64,
        created_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<Repository>, ApiError> {
        let query = compose_repository_query(language, min_stars, created_after);
        let repos = self.search(query, 100).await?;
        info!(count = repos.len(), "found repositories");
        Ok(repos)
    }

    /// Aggregate statistics per language.
    #[tracing::instrument(parent = &self.span, skip_all, fields(languages = languages.len()))]
    pub async fn language_stats(&self, languages: &[String]) -> MetricsReport<LanguageStats> {
        let results = collect_per_key(
            "language_stats",
            languages,
            || {
                if self.executor.rate_limit().is_below(self.pacing.low_quota_threshold) {
                    self.pacing.low_quota_pause
                } else {
                    Duration::ZERO
                }
            },
            |language| async move {
                let repos = self
                    .search_repositories(language, LANGUAGE_STATS_MIN_STARS, None)
                    .await?;
                let cutoff = Utc::now() - TimeDelta::days(RECENT_CREATION_DAYS);
                summarize_language(&repos, cutoff)
            },
        )
        .await;
        MetricsReport::now(results)
    }

    /// Most-starred repositories created within `since`.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] if the request fails.
    #[tracing::instrument(parent = &self.span, skip(self))]
    pub async fn trending_repos(
        &self,
        language: Option<&str>,
        since: TrendingWindow,
    ) -> Result<Vec<Repository>, ApiError> {
        let created_after = Utc::now() - TimeDelta::days(since.days());
        let query = match language {
            Some(language) => format!("created:>={} language:{language}", format_day(created_after)),
            None => format!("created:>={}", format_day(created_after)),
        };
        self.search(query, 50).await
    }

    /// Details of one repository.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] if the request fails.
    #[tracing::instrument(parent = &self.span, skip(self))]
    pub async fn repository_details(&self, owner: &str, repo: &str) -> Result<Repository, ApiError> {
        let endpoint = repo_endpoint(owner, repo);
        self.executor.execute_json(&endpoint, &[]).await
    }

    /// Bytes of code per language, largest first as reported by GitHub.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] if the request fails.
    #[tracing::instrument(parent = &self.span, skip(self))]
    pub async fn repository_languages(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<KeyedResults<u64>, ApiError> {
        let endpoint = format!("{}/languages", repo_endpoint(owner, repo));
        self.executor.execute_json(&endpoint, &[]).await
    }

    /// Popularity metrics per technology keyword.
    #[tracing::instrument(parent = &self.span, skip_all, fields(techs = techs.len()))]
    pub async fn tech_popularity_metrics(&self, techs: &[String]) -> MetricsReport<PopularityMetrics> {
        info!("calculating repository popularity metrics");
        let results = collect_per_key(
            "tech_popularity",
            techs,
            || self.pacing.pause_for(self.executor.rate_limit().remaining),
            |tech| async move {
                let repos = self.search(tech.to_string(), 100).await?;
                let cutoff = Utc::now() - TimeDelta::days(RECENT_UPDATE_DAYS);
                summarize_popularity(&repos, cutoff)
            },
        )
        .await;
        MetricsReport::now(results)
    }
}

fn repo_endpoint(owner: &str, repo: &str) -> String {
    format!(
        "repos/{}/{}",
        urlencoding::encode(owner),
        urlencoding::encode(repo)
    )
}
