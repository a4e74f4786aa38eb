//! HTTP client for the Quorum API server.

use anyhow::{Context, Result};
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// API response wrapper matching the server's `ApiResponse` format.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
}

/// Error body returned by the server for failed requests.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorInfo,
}

#[derive(Debug, Deserialize)]
struct ErrorInfo {
    code: String,
    message: String,
}

/// Keys identifying this participant to the server.
#[derive(Debug, Clone)]
pub struct ParticipantKeys {
    pub device: String,
    pub session: String,
    pub account: Option<String>,
}

/// HTTP client for the Quorum API.
pub struct ApiClient {
    client: Client,
    base_url: String,
    keys: ParticipantKeys,
}

impl ApiClient {
    /// Create a new API client pointing at the given base URL.
    pub fn new(base_url: &str, keys: ParticipantKeys) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            keys,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn keys(&self) -> &ParticipantKeys {
        &self.keys
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self
            .client
            .request(method, url)
            .header("x-device-key", &self.keys.device)
            .header("x-session-key", &self.keys.session);
        if let Some(account) = &self.keys.account {
            builder = builder.header("x-account-id", account);
        }
        builder
    }

    async fn send<T: DeserializeOwned>(&self, label: String, builder: RequestBuilder) -> Result<T> {
        let resp = builder
            .send()
            .await
            .with_context(|| format!("{} failed", label))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            match serde_json::from_str::<ErrorBody>(&body) {
                Ok(err) => anyhow::bail!("{} ({}): {}", err.error.code, status, err.error.message),
                Err(_) => anyhow::bail!("API error ({}): {}", status, body),
            }
        }

        let api_resp: ApiResponse<T> = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", label))?;

        if !api_resp.success {
            anyhow::bail!("API reported failure for {}", label);
        }
        api_resp
            .data
            .ok_or_else(|| anyhow::anyhow!("API returned success but no data"))
    }

    /// Perform a GET request and deserialize the response data.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(format!("GET {}", path), self.request(Method::GET, path))
            .await
    }

    /// Perform a POST request with a JSON body and deserialize the response data.
    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        self.send(format!("POST {}", path), self.request(Method::POST, path).json(body))
            .await
    }

    /// Perform a POST request without a body.
    pub async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(format!("POST {}", path), self.request(Method::POST, path))
            .await
    }

    /// Perform a raw GET request and return the full JSON value (for the health endpoint).
    pub async fn get_raw(&self, path: &str) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        // An unhealthy server still answers with a JSON body.
        resp.json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }
}
