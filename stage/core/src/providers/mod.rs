//! External Providers
//!
//! Trait seams for the two collaborators a session needs: something that
//! turns a persona's credential reference into a short-lived token, and
//! something that builds the interactive surface from that token.
//!
//! # Design
//!
//! The session manager only ever talks to `Arc<dyn CredentialIssuer>` and
//! `Arc<dyn SurfaceProvider>`. [`HttpCredentialIssuer`] talks to a real
//! token endpoint; the `simulated` types let the stage run headless with
//! controllable latency and failures.

mod http;
mod simulated;

pub use http::HttpCredentialIssuer;
pub use simulated::{SimulatedSurfaceConfig, SimulatedSurfaceProvider, StaticCredentialIssuer};

use std::fmt;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::persona::CredentialRef;

/// Short-lived access token for one session
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// The token itself
    pub token: String,
    /// Lifetime in seconds, when the issuer reports one
    #[serde(default)]
    pub expires_in: Option<u64>,
}

impl Credential {
    /// Create a credential without an expiry
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_in: None,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"[redacted]")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Credential acquisition failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    /// The issuer could not be reached
    #[error("credential issuer unreachable: {0}")]
    Unreachable(String),

    /// The issuer answered with an error status
    #[error("credential rejected ({status}): {body}")]
    Rejected {
        /// HTTP-like status code
        status: u16,
        /// Response body, for diagnostics
        body: String,
    },

    /// The issuer answered with something that is not a credential
    #[error("malformed credential response: {0}")]
    Malformed(String),
}

/// Opaque handle to a constructed surface
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceHandle(pub String);

impl fmt::Display for SurfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Surface provider failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SurfaceError {
    /// The surface could not be built
    #[error("surface construction failed: {0}")]
    Construction(String),

    /// Teardown reported a problem (the surface is considered gone anyway)
    #[error("surface teardown failed: {0}")]
    Teardown(String),
}

/// Future that resolves when a surface emits its "ready" event
pub type ReadySignal = BoxFuture<'static, ()>;

/// Source of per-session credentials
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    /// Issuer name for diagnostics
    fn name(&self) -> &str;

    /// Exchange a credential reference for a credential
    async fn request_credential(
        &self,
        credential_ref: &CredentialRef,
    ) -> Result<Credential, CredentialError>;
}

/// Builder and owner of interactive surfaces
#[async_trait]
pub trait SurfaceProvider: Send + Sync {
    /// Provider name for diagnostics
    fn name(&self) -> &str;

    /// Build a surface for `persona_ref` authenticated with `credential`
    async fn construct(
        &self,
        credential: &Credential,
        persona_ref: &str,
    ) -> Result<SurfaceHandle, SurfaceError>;

    /// Readiness event for a surface, if the provider can emit one
    fn observe_readiness(&self, handle: &SurfaceHandle) -> Option<ReadySignal>;

    /// Whether the surface currently shows live output
    fn has_active_output(&self, handle: &SurfaceHandle) -> bool;

    /// Make the surface's output perceptible
    fn reveal(&self, handle: &SurfaceHandle);

    /// Tear the surface down. Must tolerate repeated calls.
    fn destroy(&self, handle: &SurfaceHandle) -> Result<(), SurfaceError>;
}
