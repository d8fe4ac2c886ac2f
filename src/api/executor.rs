//! Rate-limited request executor shared by every collector.
//!
//! [`RequestExecutor`] owns one HTTP client and the rate-limit state of one
//! upstream API. Each call issues a GET, records the quota headers of the
//! response, and waits and retries under [`ThrottlePolicy`] when the upstream
//! signals throttling. Bodies are returned as parsed JSON or text.

use std::io::Read;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use flate2::read::GzDecoder;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::{debug, error, warn};
use url::Url;

use super::http_client::{HttpTimeouts, build_api_client};
use super::rate_limit::{RateLimitState, retry_after_from_headers};
use super::retry::{ThrottleDecision, ThrottlePolicy, WaitHint};
use super::ApiError;

/// Leading bytes of a gzip stream.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// How a credential is attached to outgoing requests.
#[derive(Clone)]
pub enum Credential {
    /// `Authorization: token <value>` header (GitHub convention).
    AuthToken(String),
    /// Query parameter appended to every request (Stack Exchange `key=`).
    QueryParam {
        /// Parameter name.
        name: String,
        /// Parameter value.
        value: String,
    },
}

impl Credential {
    /// Header-style token credential.
    pub fn auth_token(token: impl Into<String>) -> Self {
        Self::AuthToken(token.into())
    }

    /// Query-parameter credential.
    pub fn query_param(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::QueryParam {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AuthToken(_) => f.write_str("AuthToken(<redacted>)"),
            Self::QueryParam { name, .. } => write!(f, "QueryParam({name}=<redacted>)"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SessionState {
    rate_limit: RateLimitState,
    backoff_until: Option<Instant>,
}

/// Builder for [`RequestExecutor`].
#[derive(Debug)]
pub struct RequestExecutorBuilder {
    name: &'static str,
    base_url: String,
    credential: Option<Credential>,
    fixed_params: Vec<(String, String)>,
    headers: HeaderMap,
    policy: ThrottlePolicy,
    timeouts: HttpTimeouts,
    forbidden_may_throttle: bool,
    cookie_store: bool,
}

impl RequestExecutorBuilder {
    /// Attaches a credential, if any.
    #[must_use]
    pub fn credential(mut self, credential: Option<Credential>) -> Self {
        self.credential = credential;
        self
    }

    /// Appends a parameter sent with every request.
    #[must_use]
    pub fn fixed_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fixed_params.push((name.into(), value.into()));
        self
    }

    /// Adds a default header sent with every request.
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        let _ = self.headers.insert(name, value);
        self
    }

    /// Replaces the throttle policy.
    #[must_use]
    pub fn policy(mut self, policy: ThrottlePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replaces the client timeouts.
    #[must_use]
    pub fn timeouts(mut self, timeouts: HttpTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Treat HTTP 403 as throttling when it carries rate-limit signals.
    #[must_use]
    pub fn forbidden_may_throttle(mut self, enabled: bool) -> Self {
        self.forbidden_may_throttle = enabled;
        self
    }

    /// Keep cookies between requests.
    #[must_use]
    pub fn cookie_store(mut self, enabled: bool) -> Self {
        self.cookie_store = enabled;
        self
    }

    /// Builds the executor.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidRequest`] when the base URL does not parse,
    /// the credential is not a valid header value, or client construction fails.
    pub fn build(self) -> Result<RequestExecutor, ApiError> {
        let base_url = Url::parse(&self.base_url).map_err(|e| {
            ApiError::invalid_request(format!("invalid {} base URL {}: {e}", self.name, self.base_url))
        })?;

        let mut headers = self.headers;
        let mut query_credential = None;
        match self.credential {
            Some(Credential::AuthToken(token)) => {
                let mut value = HeaderValue::from_str(&format!("token {token}")).map_err(|_| {
                    ApiError::invalid_request(format!(
                        "{} token contains characters not allowed in a header",
                        self.name
                    ))
                })?;
                value.set_sensitive(true);
                let _ = headers.insert(AUTHORIZATION, value);
            }
            Some(Credential::QueryParam { name, value }) => {
                query_credential = Some((name, value));
            }
            None => {}
        }

        let client = build_api_client(self.name, headers, self.timeouts, self.cookie_store)?;

        Ok(RequestExecutor {
            name: self.name,
            client,
            base_url,
            query_credential,
            fixed_params: self.fixed_params,
            policy: self.policy,
            forbidden_may_throttle: self.forbidden_may_throttle,
            session: Mutex::new(SessionState::default()),
        })
    }
}

/// Issues GET requests against one upstream API with throttle handling.
///
/// All calls are sequential from the caller's point of view; the session
/// lock is only held to copy the small state in or out, never across an
/// `.await`.
pub struct RequestExecutor {
    name: &'static str,
    client: Client,
    base_url: Url,
    query_credential: Option<(String, String)>,
    fixed_params: Vec<(String, String)>,
    policy: ThrottlePolicy,
    forbidden_may_throttle: bool,
    session: Mutex<SessionState>,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("name", &self.name)
            .field("base_url", &self.base_url.as_str())
            .field("has_credential", &self.query_credential.is_some())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RequestExecutor {
    /// Starts building an executor for the API named `name` rooted at `base_url`.
    pub fn builder(name: &'static str, base_url: impl Into<String>) -> RequestExecutorBuilder {
        RequestExecutorBuilder {
            name,
            base_url: base_url.into(),
            credential: None,
            fixed_params: Vec::new(),
            headers: HeaderMap::new(),
            policy: ThrottlePolicy::default(),
            timeouts: HttpTimeouts::default(),
            forbidden_may_throttle: false,
            cookie_store: false,
        }
    }

    /// The API root this executor resolves endpoints against.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Quota reported by the most recent response.
    #[must_use]
    pub fn rate_limit(&self) -> RateLimitState {
        self.session().rate_limit
    }

    /// Overrides the remaining count with a value reported in a response body.
    ///
    /// For APIs that report quota in the payload instead of headers.
    pub fn observe_quota_remaining(&self, remaining: u64) {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        session.rate_limit.remaining = Some(remaining);
    }

    /// Delays the next request until `delay` has elapsed from now.
    ///
    /// A shorter delay never shortens an existing backoff.
    pub fn defer_for(&self, delay: Duration) {
        let until = Instant::now() + delay;
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if session.backoff_until.is_none_or(|current| current < until) {
            session.backoff_until = Some(until);
        }
    }

    /// Issues a GET and parses the body as JSON.
    ///
    /// `endpoint` is either a path relative to the base URL or an absolute URL.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] for transport failures, non-success statuses,
    /// exhausted throttle retries, and bodies that are not valid JSON.
    pub async fn execute(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<serde_json::Value, ApiError> {
        self.execute_json(endpoint, params).await
    }

    /// Issues a GET and deserializes the JSON body into `T`.
    ///
    /// # Errors
    ///
    /// Same as [`RequestExecutor::execute`], with shape mismatches reported
    /// as [`ApiError::MalformedResponse`].
    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let (display_url, body) = self.fetch(endpoint, params).await?;
        serde_json::from_slice(&body).map_err(|e| ApiError::malformed(display_url, e.to_string()))
    }

    /// Issues a GET and returns the body as text.
    ///
    /// # Errors
    ///
    /// Same as [`RequestExecutor::execute`], with non-UTF-8 bodies reported
    /// as [`ApiError::MalformedResponse`].
    pub async fn execute_text(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<String, ApiError> {
        let (display_url, body) = self.fetch(endpoint, params).await?;
        String::from_utf8(body).map_err(|e| ApiError::malformed(display_url, e.to_string()))
    }

    async fn fetch(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<(String, Vec<u8>), ApiError> {
        let (url, display_url) = self.request_url(endpoint, params)?;
        let mut attempt = 1;

        loop {
            self.wait_for_backoff().await;
            debug!(api = self.name, url = %display_url, attempt, "sending request");

            let response = match self.client.get(url.clone()).send().await {
                Ok(response) => response,
                Err(e) => {
                    let e = e.without_url();
                    error!(api = self.name, url = %display_url, error = %e, "request failed");
                    return Err(ApiError::network(display_url, e));
                }
            };

            let rate_limit = RateLimitState::from_headers(response.headers());
            self.record(rate_limit);
            let status = response.status();
            debug!(
                api = self.name,
                status = status.as_u16(),
                remaining = ?rate_limit.remaining,
                "response received"
            );

            if self.is_throttled(status, &rate_limit, response.headers()) {
                let hint = WaitHint {
                    retry_after: retry_after_from_headers(response.headers()),
                    until_reset: rate_limit.until_reset(Utc::now()),
                };
                match self.policy.decide(attempt, hint) {
                    ThrottleDecision::Wait {
                        delay,
                        attempt: next,
                    } => {
                        warn!(
                            api = self.name,
                            status = status.as_u16(),
                            delay_ms = delay.as_millis(),
                            next_attempt = next,
                            "throttled, waiting before retry"
                        );
                        tokio::time::sleep(delay).await;
                        attempt = next;
                        continue;
                    }
                    ThrottleDecision::GiveUp { attempts } => {
                        warn!(api = self.name, attempts, "still throttled, giving up");
                        return Err(ApiError::retries_exhausted(display_url, attempts));
                    }
                }
            }

            if !status.is_success() {
                debug!(api = self.name, status = status.as_u16(), "upstream error status");
                return Err(ApiError::http_status(display_url, status.as_u16()));
            }

            let bytes = match response.bytes().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    let e = e.without_url();
                    error!(api = self.name, url = %display_url, error = %e, "reading body failed");
                    return Err(ApiError::network(display_url, e));
                }
            };
            let body = decode_body(&display_url, &bytes)?;
            return Ok((display_url, body));
        }
    }

    /// Builds the request URL and a copy without the credential for messages.
    fn request_url(&self, endpoint: &str, params: &[(&str, String)]) -> Result<(Url, String), ApiError> {
        let joined = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!(
                "{}/{}",
                self.base_url.as_str().trim_end_matches('/'),
                endpoint.trim_start_matches('/')
            )
        };
        let mut url = Url::parse(&joined)
            .map_err(|e| ApiError::invalid_request(format!("invalid endpoint {joined}: {e}")))?;

        if !params.is_empty() || !self.fixed_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in params {
                let _ = pairs.append_pair(name, value);
            }
            for (name, value) in &self.fixed_params {
                let _ = pairs.append_pair(name, value);
            }
        }
        let display_url = url.to_string();

        if let Some((name, value)) = &self.query_credential {
            let _ = url.query_pairs_mut().append_pair(name, value);
        }
        Ok((url, display_url))
    }

    fn is_throttled(&self, status: StatusCode, rate_limit: &RateLimitState, headers: &HeaderMap) -> bool {
        match status {
            StatusCode::TOO_MANY_REQUESTS => true,
            StatusCode::FORBIDDEN => {
                self.forbidden_may_throttle
                    && (rate_limit.is_exhausted() || headers.contains_key(RETRY_AFTER))
            }
            _ => false,
        }
    }

    async fn wait_for_backoff(&self) {
        let until = self.session().backoff_until;
        if let Some(until) = until {
            if until > Instant::now() {
                debug!(api = self.name, "honoring server-requested backoff");
                tokio::time::sleep_until(until).await;
            }
        }
    }

    fn record(&self, rate_limit: RateLimitState) {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        session.rate_limit = rate_limit;
    }

    fn session(&self) -> SessionState {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Decompresses gzip bodies the transport did not already decode.
fn decode_body(display_url: &str, bytes: &[u8]) -> Result<Vec<u8>, ApiError> {
    if !bytes.starts_with(&GZIP_MAGIC) {
        return Ok(bytes.to_vec());
    }
    let mut decoded = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut decoded)
        .map_err(|e| ApiError::malformed(display_url, format!("gzip body: {e}")))?;
    Ok(decoded)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    fn executor(credential: Option<Credential>) -> RequestExecutor {
        RequestExecutor::builder("test", "https://api.example.com/2.3/")
            .credential(credential)
            .fixed_param("site", "stackoverflow")
            .build()
            .unwrap()
    }

    #[test]
    fn test_request_url_joins_endpoint_and_params() {
        let exec = executor(None);
        let (url, display) = exec
            .request_url("/tags", &[("pagesize", "10".to_string())])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/2.3/tags?pagesize=10&site=stackoverflow"
        );
        assert_eq!(display, url.as_str());
    }

    #[test]
    fn test_request_url_redacts_query_credential() {
        let exec = executor(Some(Credential::query_param("key", "s3cret")));
        let (url, display) = exec.request_url("tags", &[]).unwrap();
        assert!(url.as_str().ends_with("&key=s3cret"));
        assert!(!display.contains("s3cret"));
    }

    #[test]
    fn test_request_url_accepts_absolute_endpoint() {
        let exec = RequestExecutor::builder("test", "https://api.example.com")
            .build()
            .unwrap();
        let (url, _) = exec
            .request_url("https://other.example.com/feed", &[])
            .unwrap();
        assert_eq!(url.as_str(), "https://other.example.com/feed");
    }

    #[test]
    fn test_request_url_encodes_values() {
        let exec = executor(None);
        let (url, _) = exec
            .request_url("search", &[("tagged", "c#;c++".to_string())])
            .unwrap();
        assert!(url.as_str().contains("tagged=c%23%3Bc%2B%2B"), "{url}");
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let result = RequestExecutor::builder("test", "not a url").build();
        assert!(matches!(result, Err(ApiError::InvalidRequest { .. })));
    }

    #[test]
    fn test_invalid_token_rejected() {
        let result = RequestExecutor::builder("test", "https://api.example.com")
            .credential(Some(Credential::auth_token("bad\ntoken")))
            .build();
        assert!(matches!(result, Err(ApiError::InvalidRequest { .. })));
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let debug = format!("{:?}", Credential::auth_token("ghp_secret"));
        assert!(!debug.contains("ghp_secret"));
    }

    #[test]
    fn test_forbidden_needs_signal_to_count_as_throttling() {
        let exec = RequestExecutor::builder("test", "https://api.example.com")
            .forbidden_may_throttle(true)
            .build()
            .unwrap();
        let empty = HeaderMap::new();
        let exhausted = RateLimitState {
            remaining: Some(0),
            reset_at: None,
        };
        assert!(!exec.is_throttled(StatusCode::FORBIDDEN, &RateLimitState::default(), &empty));
        assert!(exec.is_throttled(StatusCode::FORBIDDEN, &exhausted, &empty));
        assert!(exec.is_throttled(StatusCode::TOO_MANY_REQUESTS, &RateLimitState::default(), &empty));

        let mut with_retry_after = HeaderMap::new();
        let _ = with_retry_after.insert(RETRY_AFTER, HeaderValue::from_static("5"));
        assert!(exec.is_throttled(StatusCode::FORBIDDEN, &RateLimitState::default(), &with_retry_after));
    }

    #[test]
    fn test_forbidden_never_throttles_when_disabled() {
        let exec = executor(None);
        let exhausted = RateLimitState {
            remaining: Some(0),
            reset_at: None,
        };
        assert!(!exec.is_throttled(StatusCode::FORBIDDEN, &exhausted, &HeaderMap::new()));
    }

    #[test]
    fn test_decode_body_passthrough_and_gzip() {
        assert_eq!(decode_body("u", b"{}").unwrap(), b"{}");

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(br#"{"items":[]}"#).unwrap();
        let compressed = encoder.finish().unwrap();
        assert_eq!(decode_body("u", &compressed).unwrap(), br#"{"items":[]}"#);
    }

    #[test]
    fn test_decode_body_truncated_gzip_is_malformed() {
        let result = decode_body("u", &[0x1f, 0x8b, 0x00]);
        assert!(matches!(result, Err(ApiError::MalformedResponse { .. })));
    }

    #[tokio::test]
    async fn test_defer_for_keeps_longest_backoff() {
        let exec = executor(None);
        exec.defer_for(Duration::from_secs(10));
        let first = exec.session().backoff_until.unwrap();
        exec.defer_for(Duration::from_millis(1));
        assert_eq!(exec.session().backoff_until.unwrap(), first);
    }
}
