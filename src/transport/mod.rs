//! Throttled, retrying HTTP access to one remote API.

pub mod rate_limit;
pub mod retry;
#[cfg(test)]
pub mod stub;

use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, LINK, LOCATION, RETRY_AFTER, USER_AGENT};
use reqwest::{Method, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{ApiError, ApiResult};
pub use rate_limit::RateLimiter;
pub use retry::{with_retry, RetryPolicy};

const AGENT: &str = concat!("board-migrate/", env!("CARGO_PKG_VERSION"));

/// Exchanges a refresh credential for a new bearer token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, client: &reqwest::Client) -> ApiResult<String>;
}

/// One page of a paginated listing plus the link to the next one.
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

pub struct HttpTransport {
    label: String,
    client: reqwest::Client,
    limiter: RateLimiter,
    policy: RetryPolicy,
    token: RwLock<String>,
    refresher: Option<Box<dyn TokenRefresher>>,
}

impl HttpTransport {
    pub fn new(label: impl Into<String>, token: String, requests_per_second: f64) -> Self {
        Self {
            label: label.into(),
            client: reqwest::Client::new(),
            limiter: RateLimiter::new(requests_per_second),
            policy: RetryPolicy::default(),
            token: RwLock::new(token),
            refresher: None,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_refresher(mut self, refresher: Box<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Send a request through the limiter and retry wrapper. A 401 triggers
    /// one token refresh and exactly one more attempt.
    pub async fn send(&self, method: Method, url: &str, body: Option<&Value>) -> ApiResult<Response> {
        match self.send_with_retry(&method, url, body).await {
            Err(err) if err.is_unauthorized() => {
                let Some(refresher) = &self.refresher else {
                    return Err(ApiError::Authentication(format!(
                        "{} rejected the access token",
                        self.label
                    )));
                };
                let fresh = refresher
                    .refresh(&self.client)
                    .await
                    .map_err(|e| ApiError::Authentication(format!("token refresh failed: {e}")))?;
                *self.token.write().await = fresh;
                info!("{}: access token refreshed", self.label);

                self.send_with_retry(&method, url, body)
                    .await
                    .map_err(|e| {
                        if e.is_unauthorized() {
                            ApiError::Authentication(format!(
                                "{} rejected the refreshed token",
                                self.label
                            ))
                        } else {
                            e
                        }
                    })
            }
            other => other,
        }
    }

    async fn send_with_retry(
        &self,
        method: &Method,
        url: &str,
        body: Option<&Value>,
    ) -> ApiResult<Response> {
        let label = format!("{} {method} {url}", self.label);
        let client = &self.client;
        let limiter = &self.limiter;
        let token = &self.token;

        with_retry(&self.policy, &label, move || async move {
            limiter.acquire().await;
            let bearer = format!("Bearer {}", token.read().await);
            let mut request = client
                .request(method.clone(), url)
                .header(AUTHORIZATION, bearer)
                .header(ACCEPT, "application/json")
                .header(USER_AGENT, AGENT);
            if let Some(body) = body {
                request = request.json(body);
            }
            debug!("{method} {url}");
            let response = request.send().await?;
            check_status(response).await
        })
        .await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> ApiResult<T> {
        let response = self.send(Method::GET, url, None).await?;
        Ok(response.json().await?)
    }

    pub async fn get_page<T: DeserializeOwned>(&self, url: &str) -> ApiResult<Page<T>> {
        let response = self.send(Method::GET, url, None).await?;
        let next = next_link(response.headers());
        let items = response.json().await?;
        Ok(Page { items, next })
    }

    /// Lazily walk a listing by following `rel="next"` links. Each call starts
    /// a fresh sequence from `url`.
    pub fn paginate<'a, T>(&'a self, url: String) -> impl Stream<Item = ApiResult<Vec<T>>> + 'a
    where
        T: DeserializeOwned + 'a,
    {
        futures::stream::try_unfold(Some(url), move |next| async move {
            let Some(url) = next else {
                return Ok::<_, ApiError>(None);
            };
            let page = self.get_page::<T>(&url).await?;
            Ok(Some((page.items, page.next)))
        })
    }

    /// Create a resource and return the absolute URL from its `Location`.
    pub async fn post_for_location(&self, url: &str, body: &Value) -> ApiResult<String> {
        let response = self.send(Method::POST, url, Some(body)).await?;
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Decode(format!("no Location header from POST {url}")))?;
        response
            .url()
            .join(location)
            .map(|u| u.to_string())
            .map_err(|e| ApiError::Decode(format!("bad Location {location}: {e}")))
    }

    pub async fn post(&self, url: &str, body: Option<&Value>) -> ApiResult<()> {
        self.send(Method::POST, url, body).await?;
        Ok(())
    }

    pub async fn put(&self, url: &str, body: &Value) -> ApiResult<()> {
        self.send(Method::PUT, url, Some(body)).await?;
        Ok(())
    }
}

async fn check_status(response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status: status.as_u16(),
        body,
        retry_after,
    })
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Extract the `rel="next"` target from a `Link` header.
pub fn next_link(headers: &HeaderMap) -> Option<String> {
    let link = headers.get(LINK)?.to_str().ok()?;
    parse_next_link(link)
}

pub fn parse_next_link(link: &str) -> Option<String> {
    link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|p| p.trim().replace(' ', "") == "rel=\"next\"");
        if !is_next {
            return None;
        }
        let target = target.trim();
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(String::from)
    })
}
