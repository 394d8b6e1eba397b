//! REST client for the Kodama server
//!
//! Single-shot calls, never retried.

use kodama_client_core::protocol::event::{CameraInfo, ServerStatus};
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Server returned HTTP {status}")]
    Upstream { status: u16 },

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid base URL: {0}")]
    InvalidUrl(String),
}

/// Client for `/api/*` endpoints
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Client for a base URL such as `http://localhost:3000`
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let base_url = base_url.trim_end_matches('/');
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ApiError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: base_url.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /api/cameras`
    pub async fn list_cameras(&self) -> Result<Vec<CameraInfo>, ApiError> {
        self.get("/api/cameras").await
    }

    /// `GET /api/status`
    pub async fn get_status(&self) -> Result<ServerStatus, ApiError> {
        self.get("/api/status").await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!(%url, status = status.as_u16(), "API request failed");
            return Err(ApiError::Upstream {
                status: status.as_u16(),
            });
        }
        Ok(response.json().await?)
    }
}
