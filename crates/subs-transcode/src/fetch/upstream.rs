use super::store::HeaderSubset;
use crate::config::HttpSettings;
use crate::error::UpstreamError;
use async_trait::async_trait;
use std::time::Duration;

/// Raw upstream answer before shape validation.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    /// Every response header, names lowercased.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One HTTP GET against a subscription URL.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn get(&self, url: &str) -> Result<UpstreamResponse, UpstreamError>;
}

/// reqwest client with separate connect and total timeouts and a fixed
/// identifying user agent.
#[derive(Debug, Clone)]
pub struct ReqwestUpstream {
    client: reqwest::Client,
}

impl ReqwestUpstream {
    pub fn new(settings: &HttpSettings) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(settings.connect_timeout_ms))
            .timeout(Duration::from_millis(settings.timeout_ms))
            .user_agent(settings.user_agent.as_str())
            .build()
            .map_err(|e| UpstreamError::Transport(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl UpstreamClient for ReqwestUpstream {
    async fn get(&self, url: &str) -> Result<UpstreamResponse, UpstreamError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.without_url().to_string()))?;
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_ascii_lowercase(), v.to_string())))
            .collect();
        let body = if (200..300).contains(&status) {
            resp.text()
                .await
                .map_err(|e| UpstreamError::Transport(e.without_url().to_string()))?
        } else {
            String::new()
        };
        Ok(UpstreamResponse { status, headers, body })
    }
}

/// Keep only allow-listed headers (case-insensitive), under the allow-list's
/// spelling. The first value of a repeated header wins.
pub fn filter_headers(headers: &[(String, String)], allow: &[String]) -> HeaderSubset {
    allow
        .iter()
        .filter_map(|name| {
            headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| (name.clone(), v.clone()))
        })
        .collect()
}
