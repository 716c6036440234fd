//! HTTP client for the courier platform's authentication endpoints.
//!
//! This module provides the `Authority` trait the session manager talks to and
//! `HttpAuthority`, its production implementation over the platform REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::Credential;

use super::AuthorityError;

// ============================================================================
// Constants
// ============================================================================

/// Default HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const LOGIN_PATH: &str = "auth/login";
const REFRESH_PATH: &str = "auth/refresh";

/// The remote party that issues and renews credentials.
///
/// Each call is a single exchange; implementations must not retry internally.
#[async_trait]
pub trait Authority: Send + Sync {
    async fn authenticate(&self, identifier: &str, secret: &str)
        -> Result<Credential, AuthorityError>;

    async fn renew(&self, current: &Credential) -> Result<Credential, AuthorityError>;
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    identifier: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

/// Authority backed by the platform REST API.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpAuthority {
    client: Client,
    base_url: String,
}

impl HttpAuthority {
    pub fn new(base_url: impl Into<String>) -> Result<Self, AuthorityError> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AuthorityError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, AuthorityError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(AuthorityError::from_status(status, &body))
        }
    }

    async fn read_credential(response: reqwest::Response) -> Result<Credential, AuthorityError> {
        let response = Self::check_response(response).await?;
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthorityError::InvalidResponse(format!("Failed to parse token response: {}", e)))?;
        Ok(Credential::decode(body.token)?)
    }
}

#[async_trait]
impl Authority for HttpAuthority {
    async fn authenticate(
        &self,
        identifier: &str,
        secret: &str,
    ) -> Result<Credential, AuthorityError> {
        let url = self.url(LOGIN_PATH);
        debug!(url = %url, identifier = identifier, "Sending authentication request");

        let response = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .json(&LoginRequest {
                identifier,
                password: secret,
            })
            .send()
            .await?;

        Self::read_credential(response).await
    }

    async fn renew(&self, current: &Credential) -> Result<Credential, AuthorityError> {
        let url = self.url(REFRESH_PATH);
        debug!(url = %url, subject = %current.claims().subject, "Sending renewal request");

        let response = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .bearer_auth(current.token())
            .send()
            .await?;

        Self::read_credential(response).await
    }
}
