//! HTTP adapter for [`ImageFetcher`].

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use stride_core::FetchError;
use tracing::debug;

use super::traits::ImageFetcher;

/// Fetches image bytes over HTTP(S) with `reqwest`.
///
/// Any non-2xx response is reported as [`FetchError::HttpStatus`]; the body is
/// not read in that case.
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpImageFetcher {
    /// Build a fetcher whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport {
                reason: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client, timeout })
    }

    /// Wrap an already configured client.
    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn map_error(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                after: self.timeout,
            }
        } else {
            FetchError::Transport {
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch_bytes(&self, locator: &str) -> Result<Bytes, FetchError> {
        let response = self
            .client
            .get(locator)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                code: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| self.map_error(e))?;
        debug!(locator, bytes = body.len(), "Fetched image bytes");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve exactly one canned HTTP response on a random local port.
    async fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind should succeed");
        let addr = listener.local_addr().expect("local addr should resolve");

        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        format!("http://{}/image.png", addr)
    }

    fn fetcher() -> HttpImageFetcher {
        HttpImageFetcher::new(Duration::from_secs(5)).expect("client should build")
    }

    #[tokio::test]
    async fn test_success_returns_body() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        )
        .await;

        let body = fetcher().fetch_bytes(&url).await.expect("fetch should succeed");
        assert_eq!(body, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_not_found_is_http_status() {
        let url = serve_once(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;

        let err = fetcher().fetch_bytes(&url).await.expect_err("fetch should fail");
        assert_eq!(err, FetchError::HttpStatus { code: 404 });
    }

    #[tokio::test]
    async fn test_refused_connection_is_transport() {
        // Bind then drop to get a port nothing listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0")
                .await
                .expect("bind should succeed");
            listener.local_addr().expect("local addr should resolve").port()
        };

        let err = fetcher()
            .fetch_bytes(&format!("http://127.0.0.1:{}/x.png", port))
            .await
            .expect_err("fetch should fail");
        assert!(matches!(err, FetchError::Transport { .. }));
    }
}
