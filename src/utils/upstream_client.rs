//! Scrape client for the upstream GPU exporter
//!
//! Endpoints are given as URLs: `http://host:port/path` for a TCP exporter,
//! `unix:///path/to/socket` for an exporter listening on a unix socket (the
//! request goes to `/metrics`), and `file:///path` for a text file written
//! by a collector.

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::debug;
use url::Url;

use crate::config;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Where the upstream exposition text comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEndpoint {
    Http { url: Url },
    Unix { socket: PathBuf },
    File { path: PathBuf },
}

impl UpstreamEndpoint {
    pub fn parse(endpoint: &str) -> Result<Self> {
        let url = Url::parse(endpoint)
            .with_context(|| format!("invalid upstream endpoint '{}'", endpoint))?;

        match url.scheme() {
            "http" | "https" => {
                if url.host_str().is_none() {
                    return Err(anyhow!("upstream endpoint '{}' has no host", endpoint));
                }
                Ok(UpstreamEndpoint::Http { url })
            }
            "unix" => Ok(UpstreamEndpoint::Unix {
                socket: PathBuf::from(url.path()),
            }),
            "file" => Ok(UpstreamEndpoint::File {
                path: PathBuf::from(url.path()),
            }),
            other => Err(anyhow!(
                "unsupported upstream endpoint scheme '{}' in '{}'",
                other,
                endpoint
            )),
        }
    }
}

impl std::fmt::Display for UpstreamEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamEndpoint::Http { url } => write!(f, "{}", url),
            UpstreamEndpoint::Unix { socket } => write!(f, "unix://{}", socket.display()),
            UpstreamEndpoint::File { path } => write!(f, "file://{}", path.display()),
        }
    }
}

/// Fetches exposition text from one upstream endpoint
pub struct UpstreamClient {
    endpoint: UpstreamEndpoint,
    http: reqwest::Client,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(endpoint: UpstreamEndpoint) -> Result<Self> {
        let timeout = DEFAULT_TIMEOUT;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(UpstreamClient {
            endpoint,
            http,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &UpstreamEndpoint {
        &self.endpoint
    }

    /// Fetch the exposition text
    pub async fn fetch(&self) -> Result<String> {
        debug!(endpoint = %self.endpoint, "Fetching upstream metrics");

        match &self.endpoint {
            UpstreamEndpoint::Http { url } => {
                let response = self
                    .http
                    .get(url.clone())
                    .header(reqwest::header::ACCEPT, "text/plain")
                    .send()
                    .await
                    .with_context(|| format!("request to {} failed", url))?
                    .error_for_status()?;
                Ok(response.text().await?)
            }
            UpstreamEndpoint::Unix { socket } => {
                let body = do_get_unix_socket(socket, config::METRICS_URL, self.timeout).await?;
                Ok(String::from_utf8_lossy(&body).into_owned())
            }
            UpstreamEndpoint::File { path } => tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failure reading {}", path.display())),
        }
    }
}

/// Perform HTTP GET over a Unix socket
async fn do_get_unix_socket(
    socket: &std::path::Path,
    path: &str,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let request = format!(
        "GET {} HTTP/1.0\r\nHost: localhost\r\nAccept: text/plain\r\nConnection: close\r\n\r\n",
        path
    );

    let mut stream = tokio::time::timeout(timeout, UnixStream::connect(socket))
        .await
        .map_err(|_| anyhow!("timeout connecting to unix://{}", socket.display()))??;

    let mut buffer = Vec::new();
    tokio::time::timeout(timeout, async {
        stream.write_all(request.as_bytes()).await?;
        stream.read_to_end(&mut buffer).await
    })
    .await
    .map_err(|_| anyhow!("timeout reading {}", path))??;

    split_response(&buffer, path)
}

/// Check the status line and return the body
fn split_response(response: &[u8], path: &str) -> Result<Vec<u8>> {
    let header_end = response
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .ok_or_else(|| anyhow!("malformed HTTP response from {}", path))?;

    let head = String::from_utf8_lossy(&response[..header_end]);
    let status_line = head.lines().next().unwrap_or("Unknown");
    let status = status_line.split_whitespace().nth(1);
    if status != Some("200") {
        return Err(anyhow!(
            "unexpected status from {}: {}",
            path,
            status_line
        ));
    }

    Ok(response[header_end + 4..].to_vec())
}
