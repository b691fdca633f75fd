//! Simulated providers
//!
//! In-process issuer and surface provider with configurable latency and
//! failure modes. Used by the daemon's headless mode and throughout the
//! test suite.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{
    Credential, CredentialError, CredentialIssuer, ReadySignal, SurfaceError, SurfaceHandle,
    SurfaceProvider,
};
use crate::persona::CredentialRef;

// ============================================================================
// Credential issuer
// ============================================================================

/// Issuer that hands out a fixed token after an optional delay
#[derive(Debug)]
pub struct StaticCredentialIssuer {
    token: String,
    delay: Duration,
    failing: HashSet<String>,
    requests: AtomicUsize,
}

impl StaticCredentialIssuer {
    /// Issuer answering immediately with `token`
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            delay: Duration::ZERO,
            failing: HashSet::new(),
            requests: AtomicUsize::new(0),
        }
    }

    /// Answer only after `delay`
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Reject requests for this credential reference
    #[must_use]
    pub fn failing_for(mut self, credential_ref: impl Into<String>) -> Self {
        self.failing.insert(credential_ref.into());
        self
    }

    /// Number of requests received so far
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialIssuer for StaticCredentialIssuer {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn request_credential(
        &self,
        credential_ref: &CredentialRef,
    ) -> Result<Credential, CredentialError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.contains(credential_ref.as_str()) {
            return Err(CredentialError::Rejected {
                status: 401,
                body: format!("unknown credential {}", credential_ref.as_str()),
            });
        }
        Ok(Credential::new(self.token.clone()))
    }
}

// ============================================================================
// Surface provider
// ============================================================================

/// Behaviour of a [`SimulatedSurfaceProvider`]
#[derive(Clone, Debug, Default)]
pub struct SimulatedSurfaceConfig {
    /// Time `construct` takes
    pub construct_latency: Duration,
    /// Delay from construction to the ready event (`None` = never emits one)
    pub ready_event_after: Option<Duration>,
    /// Delay from construction until output is live (`None` = never)
    pub output_after: Option<Duration>,
    /// Make every construction fail
    pub fail_construct: bool,
}

#[derive(Debug)]
struct LiveSurface {
    constructed_at: Instant,
    persona_ref: String,
}

#[derive(Debug, Default)]
struct ProviderState {
    next_id: u64,
    live: HashMap<SurfaceHandle, LiveSurface>,
    constructed: usize,
    destroyed: usize,
    revealed: usize,
}

/// Headless surface provider with scripted timing
#[derive(Clone, Debug, Default)]
pub struct SimulatedSurfaceProvider {
    config: SimulatedSurfaceConfig,
    state: Arc<Mutex<ProviderState>>,
}

impl SimulatedSurfaceProvider {
    /// Provider with explicit behaviour
    #[must_use]
    pub fn new(config: SimulatedSurfaceConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(ProviderState::default())),
        }
    }

    /// Surfaces take `latency` to build and report ready straight away
    #[must_use]
    pub fn ready_after(latency: Duration) -> Self {
        Self::new(SimulatedSurfaceConfig {
            construct_latency: latency,
            ready_event_after: Some(Duration::ZERO),
            output_after: Some(Duration::ZERO),
            fail_construct: false,
        })
    }

    /// Surfaces build instantly but never become ready
    #[must_use]
    pub fn never_ready() -> Self {
        Self::new(SimulatedSurfaceConfig::default())
    }

    /// Provider whose constructions always fail
    #[must_use]
    pub fn failing() -> Self {
        Self::new(SimulatedSurfaceConfig {
            fail_construct: true,
            ..SimulatedSurfaceConfig::default()
        })
    }

    /// Number of surfaces not yet destroyed
    #[must_use]
    pub fn live_surfaces(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Number of successful constructions
    #[must_use]
    pub fn constructed_count(&self) -> usize {
        self.state.lock().constructed
    }

    /// Number of surfaces actually torn down
    #[must_use]
    pub fn destroyed_count(&self) -> usize {
        self.state.lock().destroyed
    }

    /// Number of reveal calls on live surfaces
    #[must_use]
    pub fn revealed_count(&self) -> usize {
        self.state.lock().revealed
    }
}

#[async_trait]
impl SurfaceProvider for SimulatedSurfaceProvider {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn construct(
        &self,
        credential: &Credential,
        persona_ref: &str,
    ) -> Result<SurfaceHandle, SurfaceError> {
        if !self.config.construct_latency.is_zero() {
            tokio::time::sleep(self.config.construct_latency).await;
        }
        if self.config.fail_construct {
            return Err(SurfaceError::Construction(format!(
                "simulated failure for {persona_ref}"
            )));
        }
        if credential.token.is_empty() {
            return Err(SurfaceError::Construction("empty credential".into()));
        }

        let mut state = self.state.lock();
        state.next_id += 1;
        let handle = SurfaceHandle(format!("surface_{}", state.next_id));
        state.live.insert(
            handle.clone(),
            LiveSurface {
                constructed_at: Instant::now(),
                persona_ref: persona_ref.to_string(),
            },
        );
        state.constructed += 1;
        tracing::trace!(%handle, persona_ref, "Simulated surface constructed");
        Ok(handle)
    }

    fn observe_readiness(&self, handle: &SurfaceHandle) -> Option<ReadySignal> {
        let after = self.config.ready_event_after?;
        let constructed_at = self.state.lock().live.get(handle)?.constructed_at;
        Some(tokio::time::sleep_until(constructed_at + after).boxed())
    }

    fn has_active_output(&self, handle: &SurfaceHandle) -> bool {
        let Some(after) = self.config.output_after else {
            return false;
        };
        self.state
            .lock()
            .live
            .get(handle)
            .is_some_and(|s| s.constructed_at.elapsed() >= after)
    }

    fn reveal(&self, handle: &SurfaceHandle) {
        let mut state = self.state.lock();
        if let Some(surface) = state.live.get(handle) {
            tracing::trace!(%handle, persona_ref = %surface.persona_ref, "Simulated surface revealed");
            state.revealed += 1;
        }
    }

    fn destroy(&self, handle: &SurfaceHandle) -> Result<(), SurfaceError> {
        let mut state = self.state.lock();
        if state.live.remove(handle).is_some() {
            state.destroyed += 1;
            tracing::trace!(%handle, "Simulated surface destroyed");
        }
        Ok(())
    }
}
