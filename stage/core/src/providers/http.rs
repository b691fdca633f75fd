//! HTTP Credential Issuer
//!
//! Exchanges a credential reference for a session token over HTTP.
//!
//! # Protocol
//!
//! ```text
//! POST <endpoint>
//! {"credential_ref": "<ref>"}
//!
//! 200 {"token": "<token>", "expires_in": 300}
//! ```
//!
//! `session_token` is accepted as an alias for `token`. Any non-2xx status
//! is reported as [`CredentialError::Rejected`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Credential, CredentialError, CredentialIssuer};
use crate::persona::CredentialRef;

#[derive(Serialize)]
struct TokenRequest<'a> {
    credential_ref: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(alias = "session_token")]
    token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Credential issuer backed by an HTTP endpoint
#[derive(Clone, Debug)]
pub struct HttpCredentialIssuer {
    endpoint: String,
    http_client: reqwest::Client,
}

impl HttpCredentialIssuer {
    /// Create an issuer for `endpoint` with a per-request timeout
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, CredentialError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CredentialError::Unreachable(format!("http client: {e}")))?;

        Ok(Self {
            endpoint: endpoint.into(),
            http_client,
        })
    }

    /// The endpoint requests go to
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CredentialIssuer for HttpCredentialIssuer {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn request_credential(
        &self,
        credential_ref: &CredentialRef,
    ) -> Result<Credential, CredentialError> {
        tracing::debug!(endpoint = %self.endpoint, "Requesting session credential");

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&TokenRequest {
                credential_ref: credential_ref.as_str(),
            })
            .send()
            .await
            .map_err(|e| CredentialError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| CredentialError::Unreachable(e.to_string()))?;
        let parsed: TokenResponse =
            serde_json::from_str(&body).map_err(|e| CredentialError::Malformed(e.to_string()))?;

        if parsed.token.is_empty() {
            return Err(CredentialError::Malformed("empty token".into()));
        }

        Ok(Credential {
            token: parsed.token,
            expires_in: parsed.expires_in,
        })
    }
}
