//! Data types exchanged with a search-interest session.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metrics::KeyedResults;

/// Maximum keywords the service compares in one query.
pub const MAX_KEYWORDS_PER_QUERY: usize = 5;

/// Parameters of one explore query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrendsPayload {
    /// Keywords to compare (at most [`MAX_KEYWORDS_PER_QUERY`]).
    pub keywords: Vec<String>,
    /// Category id, 0 for all categories.
    pub category: u32,
    /// Timeframe such as `today 12-m` or `today 3-m`.
    pub timeframe: String,
    /// Geography code, empty for worldwide.
    pub geo: String,
    /// Search property (`""` for web search, `youtube`, `news`, ...).
    pub property: String,
}

impl TrendsPayload {
    /// Web-search payload in all categories.
    pub fn new(keywords: Vec<String>, timeframe: impl Into<String>, geo: impl Into<String>) -> Self {
        Self {
            keywords,
            category: 0,
            timeframe: timeframe.into(),
            geo: geo.into(),
            property: String::new(),
        }
    }
}

/// A widget handle returned by the explore endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Widget {
    /// Widget kind, e.g. `TIMESERIES`, `GEO_MAP`, `RELATED_QUERIES`.
    pub id: String,
    /// Access token for the widget data endpoint.
    pub token: String,
    /// Request object to send back with the token.
    pub request: serde_json::Value,
}

/// An explore query ready for widget data requests.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedQuery {
    /// The payload the widgets were built for.
    pub payload: TrendsPayload,
    /// Widgets returned by the service.
    pub widgets: Vec<Widget>,
}

impl PreparedQuery {
    /// Widgets whose id starts with `prefix`, in service order.
    pub fn widgets_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a Widget> {
        self.widgets.iter().filter(move |w| w.id.starts_with(prefix))
    }
}

/// Relative search interest (0-100) per keyword over time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InterestOverTime {
    /// Sample times, oldest first.
    pub timestamps: Vec<DateTime<Utc>>,
    /// One value per timestamp for every keyword the service returned.
    pub series: KeyedResults<Vec<f64>>,
}

impl InterestOverTime {
    /// Values for `keyword`, if the service returned a column for it.
    pub fn series(&self, keyword: &str) -> Option<&[f64]> {
        self.series.get(keyword).map(Vec::as_slice)
    }

    /// Returns true when there are no samples.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Geographic granularity for interest by region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resolution {
    #[default]
    Country,
    Region,
    City,
    Dma,
}

impl Resolution {
    /// Wire value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Country => "COUNTRY",
            Self::Region => "REGION",
            Self::City => "CITY",
            Self::Dma => "DMA",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized [`Resolution`] name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown resolution '{0}' (expected country, region, city, or dma)")]
pub struct ParseResolutionError(String);

impl FromStr for Resolution {
    type Err = ParseResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "country" => Ok(Self::Country),
            "region" => Ok(Self::Region),
            "city" => Ok(Self::City),
            "dma" => Ok(Self::Dma),
            _ => Err(ParseResolutionError(s.to_string())),
        }
    }
}

/// Interest in one geographic area.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionInterest {
    /// Geography code, e.g. `US` or `US-CA`.
    pub geo_code: String,
    /// Display name.
    pub geo_name: String,
    /// One value per keyword, in payload order.
    pub values: Vec<f64>,
}

/// Interest per geographic area.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InterestByRegion {
    /// Keyword order of each [`RegionInterest::values`].
    pub keywords: Vec<String>,
    /// Areas in service order.
    pub regions: Vec<RegionInterest>,
}

/// One related search query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedQuery {
    /// Query text.
    pub query: String,
    /// Relative value (score for top, percent growth for rising).
    pub value: i64,
    /// Display value, e.g. `Breakout` or `+250%`.
    #[serde(rename = "formattedValue", default)]
    pub formatted_value: Option<String>,
}

/// Related queries for one keyword.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelatedQueries {
    /// Most popular related queries.
    pub top: Vec<RelatedQuery>,
    /// Fastest growing related queries.
    pub rising: Vec<RelatedQuery>,
}

/// A keyword suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    /// Knowledge-graph id.
    #[serde(default)]
    pub mid: String,
    /// Suggested title.
    pub title: String,
    /// Entity type, e.g. `Programming language`.
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// Direction of the latest value relative to the mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Rising,
    Declining,
}
