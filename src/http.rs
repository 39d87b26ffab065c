//! HTTP client with rate limiting for tag hosts and the remote database.
//!
//! This module provides a wrapper around `reqwest::Client` that adds:
//! * Request rate limiting to keep the load on remote hosts predictable
//! * Consistent timeouts and headers
//!
//! # Rate Limiting
//!
//! * 20 calls per 5-second interval
//! * Allows bursts up to the maximum calls per interval
//! * Requests that would exceed the limit are delayed, never rejected
//!
//! Audio streams are not rate limited: they go through [`Client::unlimited`]
//! directly, since each one is a single long-lived request.
//!
//! # Example
//!
//! ```rust
//! use ongaku::http::Client;
//!
//! let client = Client::new(&config)?;
//! let request = client.head(url);
//! let response = client.execute(request).await?;
//! ```

use std::{future::Future, num::NonZeroU32, time::Duration};

use futures_util::{FutureExt, TryFutureExt};
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{
    header::{HeaderValue, RANGE},
    Body, Method, Url,
};

use crate::{config::Config, error::Result};

/// HTTP client with built-in rate limiting.
pub struct Client {
    /// Unlimited request client for audio streams.
    ///
    /// Direct access to underlying client without rate limiting.
    pub unlimited: reqwest::Client,

    /// Rate limiter shared by all metadata and database requests.
    rate_limiter: DefaultDirectRateLimiter,
}

impl Client {
    /// Rolling window during which at most
    /// [`RATE_LIMIT_CALLS_PER_INTERVAL`](Self::RATE_LIMIT_CALLS_PER_INTERVAL)
    /// calls are made.
    const RATE_LIMIT_INTERVAL: Duration = Duration::from_secs(5);

    /// Maximum allowed calls per interval.
    const RATE_LIMIT_CALLS_PER_INTERVAL: u8 = 20;

    /// Duration to keep idle connections alive.
    ///
    /// Tag batches hit the same host many times in a row.
    const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Duration to wait for individual network reads.
    ///
    /// This bounds a stalled read, not a whole transfer: a host that keeps
    /// trickling bytes still holds its pipeline slot.
    const READ_TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built, for example when
    /// the TLS backend fails to initialize.
    ///
    /// # Panics
    ///
    /// Panics if rate limit parameters are zero.
    pub fn new(config: &Config) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .tcp_keepalive(Self::KEEPALIVE_TIMEOUT)
            .read_timeout(Self::READ_TIMEOUT)
            .user_agent(&config.user_agent);

        let replenish_interval =
            Self::RATE_LIMIT_INTERVAL / u32::from(Self::RATE_LIMIT_CALLS_PER_INTERVAL);
        let quota = Quota::with_period(replenish_interval)
            .expect("quota time interval is zero")
            .allow_burst(
                NonZeroU32::new(Self::RATE_LIMIT_CALLS_PER_INTERVAL.into())
                    .expect("calls per interval is zero"),
            );

        Ok(Self {
            unlimited: http_client.build()?,
            rate_limiter: governor::RateLimiter::direct(quota),
        })
    }

    /// Builds a request with specified method, URL and body.
    pub fn request<U, T>(&self, method: Method, url: U, body: T) -> reqwest::Request
    where
        U: Into<Url>,
        T: Into<Body>,
    {
        let mut request = reqwest::Request::new(method, url.into());
        let body_mut = request.body_mut();
        *body_mut = Some(body.into());

        request
    }

    /// Builds a bodyless HEAD request.
    pub fn head<U>(&self, url: U) -> reqwest::Request
    where
        U: Into<Url>,
    {
        reqwest::Request::new(Method::HEAD, url.into())
    }

    /// Builds a GET request.
    ///
    /// With `range` set, asks for the first `range` bytes only. Hosts may
    /// ignore the header and send the whole resource, so callers must
    /// still bound how much they read.
    pub fn get<U>(&self, url: U, range: Option<u64>) -> reqwest::Request
    where
        U: Into<Url>,
    {
        let mut request = reqwest::Request::new(Method::GET, url.into());
        if let Some(len) = range.filter(|len| *len > 0) {
            let header = format!("bytes=0-{}", len - 1);
            if let Ok(value) = HeaderValue::from_str(&header) {
                request.headers_mut().insert(RANGE, value);
            }
        }

        request
    }

    /// Builds a PATCH request with a JSON body.
    pub fn patch<U, T>(&self, url: U, body: T) -> reqwest::Request
    where
        U: Into<Url>,
        T: Into<Body>,
    {
        let mut request = self.request(Method::PATCH, url, body);
        request.headers_mut().insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        request
    }

    /// Executes a request with rate limiting.
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be sent or no response arrives.
    /// HTTP error statuses are *not* errors at this level; see
    /// [`reqwest::Response::error_for_status`].
    pub fn execute(
        &self,
        request: reqwest::Request,
    ) -> impl Future<Output = Result<reqwest::Response>> + '_ {
        // No need to await with jitter because the level of concurrency is low.
        let throttle = self.rate_limiter.until_ready();
        throttle.then(|()| self.unlimited.execute(request).map_err(Into::into))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> Client {
        Client::new(&Config::new()).unwrap()
    }

    #[test]
    fn get_with_range_sets_header() {
        let url = Url::parse("https://example.com/a.mp3").unwrap();
        let request = client().get(url, Some(1024));
        assert_eq!(request.method(), Method::GET);
        assert_eq!(request.headers()[RANGE], "bytes=0-1023");
    }

    #[test]
    fn get_without_range_has_no_header() {
        let url = Url::parse("https://example.com/a.mp3").unwrap();
        let request = client().get(url.clone(), None);
        assert!(request.headers().get(RANGE).is_none());

        let request = client().get(url, Some(0));
        assert!(request.headers().get(RANGE).is_none());
    }

    #[test]
    fn head_has_no_body() {
        let url = Url::parse("https://example.com/a.mp3").unwrap();
        let request = client().head(url);
        assert_eq!(request.method(), Method::HEAD);
        assert!(request.body().is_none());
    }
}
