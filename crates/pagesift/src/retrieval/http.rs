//! Lightweight retrieval over plain HTTP.
//!
//! One GET per call, no retries. Each request presents a user agent drawn at
//! random from the configured pool.

use crate::error::RetrievalError;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

/// Response from a GET request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Final URL after redirects.
    pub final_url: String,
    pub status: u16,
    pub body: String,
}

/// HTTP fetcher for the lightweight strategy.
///
/// Cheap to clone; clones share the connection pool and the read-only
/// user-agent pool.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    user_agents: Arc<[String]>,
    accept_language: String,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(user_agents: &[String], accept_language: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .unwrap_or_default();

        let user_agents: Arc<[String]> = user_agents
            .iter()
            .filter(|ua| !ua.trim().is_empty())
            .cloned()
            .collect();

        Self {
            client,
            user_agents,
            accept_language: accept_language.to_string(),
            timeout,
        }
    }

    /// Pick a user agent from the pool.
    pub fn pick_user_agent(&self) -> Option<&str> {
        self.user_agents
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
    }

    pub fn accept_language(&self) -> &str {
        &self.accept_language
    }

    /// GET `url`, failing on any non-2xx status.
    ///
    /// The request timeout is clipped to `deadline`.
    pub async fn get(&self, url: &str, deadline: Instant) -> Result<HttpResponse, RetrievalError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(RetrievalError::Timeout);
        }
        let timeout = self.timeout.min(remaining);

        let mut request = self
            .client
            .get(url)
            .timeout(timeout)
            .header(reqwest::header::ACCEPT, ACCEPT)
            .header(reqwest::header::ACCEPT_LANGUAGE, &self.accept_language);
        if let Some(ua) = self.pick_user_agent() {
            request = request.header(reqwest::header::USER_AGENT, ua);
        }

        let response = request.send().await?;
        let status = response.status();
        let final_url = response.url().to_string();
        debug!(url, status = status.as_u16(), final_url = %final_url, "http response");

        if !status.is_success() {
            return Err(RetrievalError::Status(status.as_u16()));
        }

        let body = response.text().await?;
        Ok(HttpResponse {
            final_url,
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(
            &["TestAgent/1.0".to_string(), "TestAgent/2.0".to_string()],
            "fr-FR",
            Duration::from_secs(5),
        )
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(10)
    }

    #[tokio::test]
    async fn sends_browser_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .and(header("accept-language", "fr-FR"))
            .and(header_exists("user-agent"))
            .and(header_exists("accept"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>ok</p>"))
            .expect(1)
            .mount(&server)
            .await;

        let resp = fetcher()
            .get(&format!("{}/page", server.uri()), deadline())
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, "<p>ok</p>");
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let err = fetcher()
            .get(&format!("{}/down", server.uri()), deadline())
            .await
            .unwrap_err();
        assert_eq!(err, RetrievalError::Status(503));
        assert_eq!(err.to_string(), "http status 503");
    }

    #[tokio::test]
    async fn slow_response_times_out_at_deadline() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let err = fetcher()
            .get(
                &format!("{}/slow", server.uri()),
                Instant::now() + Duration::from_millis(200),
            )
            .await
            .unwrap_err();
        assert_eq!(err, RetrievalError::Timeout);
    }

    #[test]
    fn user_agent_comes_from_pool() {
        let f = fetcher();
        let ua = f.pick_user_agent().unwrap();
        assert!(ua.starts_with("TestAgent/"));
        let empty = HttpFetcher::new(&[], "en", Duration::from_secs(1));
        assert!(empty.pick_user_agent().is_none());
    }
}
