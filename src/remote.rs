//! HTTP boundary. Every failure leaving this module is a [`RemoteError`].

use crate::config::HttpSettings;
use crate::error::RemoteError;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteResponse {
    pub status: u16,
    pub body: String,
}

impl RemoteResponse {
    pub fn json(&self) -> Result<Value, RemoteError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Thin reqwest wrapper; cheap to clone.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    base_url: Option<String>,
}

impl RemoteClient {
    pub fn new(settings: &HttpSettings) -> Result<Self, RemoteError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &settings.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| RemoteError::InvalidRequest(format!("Invalid auth token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .timeout(settings.timeout())
            .user_agent(settings.user_agent.as_str())
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: settings
                .base_url
                .as_ref()
                .map(|url| url.trim_end_matches('/').to_string()),
        })
    }

    /// Absolute URLs pass through; anything else is joined to the base URL.
    pub fn resolve(&self, path: &str) -> Result<String, RemoteError> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Ok(path.to_string());
        }

        match &self.base_url {
            Some(base) => Ok(format!("{base}/{}", path.trim_start_matches('/'))),
            None => Err(RemoteError::InvalidRequest(format!(
                "relative path '{path}' without a base URL"
            ))),
        }
    }

    /// One GET, whatever the status.
    pub async fn send(&self, path: &str) -> Result<RemoteResponse, RemoteError> {
        let url = self.resolve(path)?;
        log::debug!("GET {url}");

        let response = self.http.get(&url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(RemoteResponse { status, body })
    }

    /// One GET; non-2xx statuses become [`RemoteError::Status`].
    pub async fn get(&self, path: &str) -> Result<RemoteResponse, RemoteError> {
        let response = self.send(path).await?;
        if (200..300).contains(&response.status) {
            Ok(response)
        } else {
            Err(RemoteError::status(response.status, response.body))
        }
    }

    pub async fn get_json(&self, path: &str) -> Result<Value, RemoteError> {
        self.get(path).await?.json()
    }
}
