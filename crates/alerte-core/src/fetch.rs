//! Network access for requests the cache cannot answer.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::debug;

use crate::error::NetworkError;
use crate::request::{Request, Response};

/// HTTP request timeout in seconds.
/// The agent adds no timeout layer of its own; this is the client's.
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform the request against the network. Error statuses are returned
    /// as responses; only transport failures are errors.
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError>;
}

/// Fetcher backed by reqwest. Relative URLs are resolved against the
/// application origin.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    origin: Url,
}

impl HttpFetcher {
    pub fn new(origin: &str) -> Result<Self, NetworkError> {
        let origin = Url::parse(origin)
            .map_err(|e| NetworkError::InvalidUrl(format!("{}: {}", origin, e)))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client, origin })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    fn resolve_url(&self, url: &str) -> Result<Url, NetworkError> {
        self.origin
            .join(url)
            .map_err(|e| NetworkError::InvalidUrl(format!("{}: {}", url, e)))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        let url = self.resolve_url(&request.url)?;
        debug!(method = %request.method, url = %url, "Fetching from network");

        let response = self
            .client
            .request(request.method.clone(), url)
            .send()
            .await?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

/// Fetcher for hosts without connectivity: every request fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineFetcher;

#[async_trait]
impl Fetcher for OfflineFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
        Err(NetworkError::Unreachable(request.url.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_urls_resolve_against_origin() {
        let fetcher = HttpFetcher::new("https://alerte.example/app/").unwrap();
        assert_eq!(
            fetcher.resolve_url("/index.html").unwrap().as_str(),
            "https://alerte.example/index.html"
        );
        assert_eq!(
            fetcher.resolve_url("icon-192.png").unwrap().as_str(),
            "https://alerte.example/app/icon-192.png"
        );
        assert_eq!(
            fetcher.resolve_url("https://cdn.example/font.woff2").unwrap().as_str(),
            "https://cdn.example/font.woff2"
        );
    }

    #[test]
    fn test_invalid_origin_is_rejected() {
        assert!(matches!(
            HttpFetcher::new("not a url"),
            Err(NetworkError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_offline_fetcher_always_fails() {
        let result = OfflineFetcher.fetch(&Request::navigate("/")).await;
        assert!(matches!(result, Err(NetworkError::Unreachable(url)) if url == "/"));
    }
}
