//! Session Lifecycle Manager
//!
//! A session is one attempt to bring a persona's interactive surface up:
//! request a credential, construct the surface, decide when it is ready,
//! reveal it, destroy it. At most one session is live at a time.
//!
//! # Flow
//!
//! ```text
//!  acquire ──► Requesting ──credential──► Constructing ──surface──► AwaitingReady
//!                  │                          │                         │
//!                  └──── error ──► Failed ◄───┘           event | poll | timeout
//!                                                                       ▼
//!                         destroy (any phase) ──► Destroyed ◄──────── Ready
//! ```
//!
//! Every asynchronous step runs in a spawned task that reports back through
//! the stage's event channel tagged with the [`SessionId`] it belongs to.
//! Reports for anything but the current, non-cancelled session are stale:
//! they are dropped, and an orphaned surface is torn down on arrival.
//!
//! In-flight credential requests and constructions are never aborted; their
//! results are simply discarded. The readiness detector is aborted
//! synchronously on destroy.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::events::StageEvent;
use crate::persona::{Persona, PersonaId};
use crate::providers::{
    Credential, CredentialError, CredentialIssuer, ReadySignal, SurfaceError, SurfaceHandle,
    SurfaceProvider,
};

/// Session identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new unique session ID
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};

        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let count = COUNTER.fetch_add(1, Ordering::SeqCst);
        Self(format!("session_{count}"))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a session is in its life
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SessionPhase {
    /// Waiting on the credential issuer
    Requesting,
    /// Waiting on the surface provider
    Constructing,
    /// Surface exists, readiness detector running
    AwaitingReady,
    /// Ready (detected or forced)
    Ready,
    /// Credential or construction failed
    Failed,
    /// Torn down
    Destroyed,
}

/// Which readiness prong fired
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ReadySource {
    /// The surface emitted its ready event
    Event,
    /// Polling saw live output
    Poll,
    /// Nothing fired before the hard timeout
    Timeout,
}

/// Readiness detector tuning
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadinessConfig {
    /// Delay between output polls
    pub poll_interval: Duration,
    /// Maximum number of polls
    pub poll_attempts: u32,
    /// Hard bound after which the surface is assumed ready
    pub timeout: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            poll_attempts: 20,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Why a session could not be established
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionFailure {
    /// Credential request failed
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Surface construction failed
    #[error(transparent)]
    Surface(#[from] SurfaceError),
}

/// What the stage should make of a lifecycle report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// Progress, nothing for the stage to do
    Pending,
    /// The session just became ready
    Ready {
        /// Which prong decided
        source: ReadySource,
    },
    /// The session failed; the attempt is over
    Failed {
        /// What went wrong
        error: SessionFailure,
    },
    /// The report belongs to a superseded session
    Stale,
}

/// One live attempt to establish a surface for a persona
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    persona: Arc<Persona>,
    phase: SessionPhase,
    ready_at: Option<Instant>,
    cancelled: bool,
    surface: Option<SurfaceHandle>,
    detector: Option<AbortHandle>,
    revealed: bool,
    reveal_pending: bool,
}

impl Session {
    fn new(persona: Arc<Persona>) -> Self {
        Self {
            id: SessionId::new(),
            persona,
            phase: SessionPhase::Requesting,
            ready_at: None,
            cancelled: false,
            surface: None,
            detector: None,
            revealed: false,
            reveal_pending: false,
        }
    }

    /// Session ID
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Persona this session is for
    #[must_use]
    pub fn persona(&self) -> &Arc<Persona> {
        &self.persona
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// When the session first became ready
    #[must_use]
    pub fn ready_at(&self) -> Option<Instant> {
        self.ready_at
    }

    /// Whether the session has been cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Constructed surface, if any
    #[must_use]
    pub fn surface(&self) -> Option<&SurfaceHandle> {
        self.surface.as_ref()
    }

    /// Whether the surface has been revealed
    #[must_use]
    pub fn is_revealed(&self) -> bool {
        self.revealed
    }

    fn mark_ready(&mut self) {
        self.phase = SessionPhase::Ready;
        if self.ready_at.is_none() {
            self.ready_at = Some(Instant::now());
        }
    }

    fn stop_detector(&mut self) {
        if let Some(detector) = self.detector.take() {
            detector.abort();
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            persona: self.persona.id.clone(),
            phase: self.phase,
            surface: self.surface.clone(),
            revealed: self.revealed,
        }
    }
}

/// Observable record of the current session
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    /// Session ID
    pub id: SessionId,
    /// Persona
    pub persona: PersonaId,
    /// Phase
    pub phase: SessionPhase,
    /// Surface handle
    pub surface: Option<SurfaceHandle>,
    /// Whether the surface has been revealed
    pub revealed: bool,
}

/// Owner of the single current session
pub struct SessionManager {
    issuer: Arc<dyn CredentialIssuer>,
    provider: Arc<dyn SurfaceProvider>,
    readiness: ReadinessConfig,
    events: mpsc::Sender<StageEvent>,
    current: Option<Session>,
}

impl SessionManager {
    /// Create a manager with no session
    pub fn new(
        issuer: Arc<dyn CredentialIssuer>,
        provider: Arc<dyn SurfaceProvider>,
        readiness: ReadinessConfig,
        events: mpsc::Sender<StageEvent>,
    ) -> Self {
        Self {
            issuer,
            provider,
            readiness,
            events,
            current: None,
        }
    }

    /// The current session
    #[must_use]
    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    /// Snapshot of the current session
    #[must_use]
    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.current.as_ref().map(Session::snapshot)
    }

    fn current_mut(&mut self, id: &SessionId) -> Option<&mut Session> {
        self.current
            .as_mut()
            .filter(|s| &s.id == id && !s.cancelled)
    }

    /// Start a new session for `persona`, replacing any current one.
    ///
    /// Returns immediately; progress arrives as `CredentialIssued`.
    pub fn acquire(&mut self, persona: Arc<Persona>) -> SessionId {
        self.destroy_current();

        let session = Session::new(Arc::clone(&persona));
        let id = session.id.clone();
        tracing::info!(session = %id, persona = %persona.id, issuer = self.issuer.name(), "Acquiring session");

        let issuer = Arc::clone(&self.issuer);
        let events = self.events.clone();
        let session_id = id.clone();
        tokio::spawn(async move {
            let result = issuer.request_credential(&persona.credential_ref).await;
            let _ = events
                .send(StageEvent::CredentialIssued {
                    session: session_id,
                    result,
                })
                .await;
        });

        self.current = Some(session);
        id
    }

    /// Handle the issuer's answer
    pub fn on_credential(
        &mut self,
        id: &SessionId,
        result: Result<Credential, CredentialError>,
    ) -> LifecycleSignal {
        let provider = Arc::clone(&self.provider);
        let events = self.events.clone();

        let Some(session) = self.current_mut(id) else {
            tracing::debug!(session = %id, "Discarding credential for a superseded session");
            return LifecycleSignal::Stale;
        };

        let credential = match result {
            Ok(credential) => credential,
            Err(e) => {
                tracing::error!(session = %id, persona = %session.persona.id, error = %e, "Credential request failed");
                session.phase = SessionPhase::Failed;
                return LifecycleSignal::Failed { error: e.into() };
            }
        };

        if session.phase == SessionPhase::Requesting {
            session.phase = SessionPhase::Constructing;
        }
        tracing::debug!(session = %id, provider = provider.name(), "Credential issued, constructing surface");

        let persona = Arc::clone(&session.persona);
        let session_id = id.clone();
        tokio::spawn(async move {
            let result = provider.construct(&credential, persona.persona_ref()).await;
            let _ = events
                .send(StageEvent::SurfaceConstructed {
                    session: session_id,
                    result,
                })
                .await;
        });

        LifecycleSignal::Pending
    }

    /// Handle the provider's construction answer
    pub fn on_surface_constructed(
        &mut self,
        id: &SessionId,
        result: Result<SurfaceHandle, SurfaceError>,
    ) -> LifecycleSignal {
        let provider = Arc::clone(&self.provider);
        let readiness = self.readiness;
        let events = self.events.clone();

        let Some(session) = self.current_mut(id) else {
            if let Ok(handle) = result {
                tracing::debug!(session = %id, %handle, "Tearing down surface of a superseded session");
                if let Err(e) = provider.destroy(&handle) {
                    tracing::warn!(%handle, error = %e, "Orphan surface teardown failed");
                }
            }
            return LifecycleSignal::Stale;
        };

        let handle = match result {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(session = %id, persona = %session.persona.id, error = %e, "Surface construction failed");
                session.phase = SessionPhase::Failed;
                return LifecycleSignal::Failed { error: e.into() };
            }
        };
        session.surface = Some(handle.clone());

        if session.phase == SessionPhase::Ready {
            // Forced ready before the surface existed
            if session.reveal_pending {
                provider.reveal(&handle);
                session.revealed = true;
                session.reveal_pending = false;
            }
            return LifecycleSignal::Pending;
        }

        session.phase = SessionPhase::AwaitingReady;
        let signal = provider.observe_readiness(&handle);
        let session_id = id.clone();
        let task = tokio::spawn(async move {
            let source = detect_readiness(provider, handle, signal, readiness).await;
            let _ = events
                .send(StageEvent::SessionReady {
                    session: session_id,
                    source,
                })
                .await;
        });
        session.detector = Some(task.abort_handle());

        LifecycleSignal::Pending
    }

    /// Handle the readiness detector's decision
    pub fn on_ready(&mut self, id: &SessionId, source: ReadySource) -> LifecycleSignal {
        let Some(session) = self.current_mut(id) else {
            tracing::debug!(session = %id, "Discarding readiness of a superseded session");
            return LifecycleSignal::Stale;
        };
        if session.phase != SessionPhase::AwaitingReady {
            return LifecycleSignal::Stale;
        }

        session.detector = None;
        session.mark_ready();
        if source == ReadySource::Timeout {
            tracing::warn!(session = %id, "Readiness not observed, assuming ready");
        } else {
            tracing::debug!(session = %id, ?source, "Session ready");
        }
        LifecycleSignal::Ready { source }
    }

    /// Declare the current session ready without waiting any longer
    pub fn force_ready(&mut self) -> bool {
        let Some(session) = self.current.as_mut().filter(|s| !s.cancelled) else {
            return false;
        };
        match session.phase {
            SessionPhase::Ready | SessionPhase::Failed | SessionPhase::Destroyed => false,
            _ => {
                session.stop_detector();
                session.mark_ready();
                true
            }
        }
    }

    /// Let the surface accept input and output.
    ///
    /// Deferred until construction finishes if the surface is not there yet.
    pub fn reveal(&mut self) {
        let Some(session) = self.current.as_mut().filter(|s| !s.cancelled) else {
            return;
        };
        match &session.surface {
            Some(handle) => {
                if !session.revealed {
                    self.provider.reveal(handle);
                    session.revealed = true;
                }
            }
            None => session.reveal_pending = true,
        }
    }

    /// Destroy the session with this ID. Returns `false` if it is not the
    /// current one (already destroyed or never existed).
    pub fn destroy(&mut self, id: &SessionId) -> bool {
        if self.current.as_ref().is_some_and(|s| &s.id == id) {
            self.destroy_current();
            true
        } else {
            false
        }
    }

    /// Tear down whatever session is current. Safe in any phase.
    pub fn destroy_current(&mut self) -> Option<Session> {
        let mut session = self.current.take()?;
        session.stop_detector();
        session.cancelled = true;
        session.reveal_pending = false;

        if let Some(handle) = session.surface.take() {
            if let Err(e) = self.provider.destroy(&handle) {
                tracing::warn!(session = %session.id, %handle, error = %e, "Surface teardown failed");
            }
        }

        tracing::debug!(session = %session.id, phase = ?session.phase, "Session destroyed");
        session.phase = SessionPhase::Destroyed;
        Some(session)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.destroy_current();
    }
}

/// Race the ready event against bounded output polling and a hard timeout
async fn detect_readiness(
    provider: Arc<dyn SurfaceProvider>,
    handle: SurfaceHandle,
    signal: Option<ReadySignal>,
    config: ReadinessConfig,
) -> ReadySource {
    let event = async {
        match signal {
            Some(signal) => signal.await,
            None => std::future::pending().await,
        }
    };

    let poll = async {
        let mut ticker = tokio::time::interval_at(
            Instant::now() + config.poll_interval,
            config.poll_interval,
        );
        for _ in 0..config.poll_attempts {
            ticker.tick().await;
            if provider.has_active_output(&handle) {
                return;
            }
        }
        tracing::debug!(%handle, attempts = config.poll_attempts, "Output polling exhausted");
        std::future::pending::<()>().await;
    };

    tokio::select! {
        biased;
        () = event => ReadySource::Event,
        () = poll => ReadySource::Poll,
        () = tokio::time::sleep(config.timeout) => ReadySource::Timeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{SimulatedSurfaceConfig, SimulatedSurfaceProvider, StaticCredentialIssuer};
    use pretty_assertions::assert_eq;

    fn persona(id: &str) -> Arc<Persona> {
        Arc::new(Persona::new(id, format!("cred-{id}"), vec!["...".into()]))
    }

    fn manager(
        issuer: StaticCredentialIssuer,
        provider: SimulatedSurfaceProvider,
    ) -> (SessionManager, mpsc::Receiver<StageEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let manager = SessionManager::new(
            Arc::new(issuer),
            Arc::new(provider),
            ReadinessConfig {
                poll_interval: Duration::from_millis(100),
                poll_attempts: 5,
                timeout: Duration::from_secs(3),
            },
            tx,
        );
        (manager, rx)
    }

    /// Feed lifecycle events back until something other than Pending comes out
    async fn drive(
        manager: &mut SessionManager,
        rx: &mut mpsc::Receiver<StageEvent>,
    ) -> LifecycleSignal {
        loop {
            let signal = match rx.recv().await.unwrap() {
                StageEvent::CredentialIssued { session, result } => {
                    manager.on_credential(&session, result)
                }
                StageEvent::SurfaceConstructed { session, result } => {
                    manager.on_surface_constructed(&session, result)
                }
                StageEvent::SessionReady { session, source } => manager.on_ready(&session, source),
                other => panic!("unexpected event: {other:?}"),
            };
            if signal != LifecycleSignal::Pending {
                return signal;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_reaches_ready_via_event() {
        let provider = SimulatedSurfaceProvider::ready_after(Duration::from_millis(500));
        let (mut manager, mut rx) = manager(StaticCredentialIssuer::new("tok"), provider.clone());

        let start = Instant::now();
        manager.acquire(persona("bigfoot"));
        assert_eq!(manager.current().unwrap().phase(), SessionPhase::Requesting);

        let signal = drive(&mut manager, &mut rx).await;
        assert_eq!(signal, LifecycleSignal::Ready { source: ReadySource::Event });
        assert_eq!(start.elapsed(), Duration::from_millis(500));
        assert_eq!(manager.current().unwrap().phase(), SessionPhase::Ready);
        assert!(manager.current().unwrap().ready_at().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_detects_output_without_event() {
        let provider = SimulatedSurfaceProvider::new(SimulatedSurfaceConfig {
            output_after: Some(Duration::from_millis(250)),
            ..SimulatedSurfaceConfig::default()
        });
        let (mut manager, mut rx) = manager(StaticCredentialIssuer::new("tok"), provider);

        let start = Instant::now();
        manager.acquire(persona("riley"));
        let signal = drive(&mut manager, &mut rx).await;

        assert_eq!(signal, LifecycleSignal::Ready { source: ReadySource::Poll });
        // Third poll (100ms interval) is the first to see output
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_forces_ready() {
        let (mut manager, mut rx) = manager(
            StaticCredentialIssuer::new("tok"),
            SimulatedSurfaceProvider::never_ready(),
        );

        let start = Instant::now();
        manager.acquire(persona("hazel"));
        let signal = drive(&mut manager, &mut rx).await;

        assert_eq!(signal, LifecycleSignal::Ready { source: ReadySource::Timeout });
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_credential_failure_marks_failed() {
        let issuer = StaticCredentialIssuer::new("tok").failing_for("cred-mabel");
        let provider = SimulatedSurfaceProvider::ready_after(Duration::ZERO);
        let (mut manager, mut rx) = manager(issuer, provider.clone());

        manager.acquire(persona("mabel"));
        let signal = drive(&mut manager, &mut rx).await;

        assert!(matches!(
            signal,
            LifecycleSignal::Failed {
                error: SessionFailure::Credential(CredentialError::Rejected { .. })
            }
        ));
        assert_eq!(manager.current().unwrap().phase(), SessionPhase::Failed);
        assert_eq!(provider.constructed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_mid_request_discards_credential() {
        let issuer = StaticCredentialIssuer::new("tok").with_delay(Duration::from_millis(400));
        let provider = SimulatedSurfaceProvider::ready_after(Duration::ZERO);
        let (mut manager, mut rx) = manager(issuer, provider.clone());

        let id = manager.acquire(persona("bigfoot"));
        let destroyed = manager.destroy_current().unwrap();
        assert_eq!(destroyed.phase(), SessionPhase::Destroyed);
        assert!(destroyed.is_cancelled());

        let StageEvent::CredentialIssued { session, result } = rx.recv().await.unwrap() else {
            panic!("expected CredentialIssued");
        };
        assert_eq!(session, id);
        assert_eq!(manager.on_credential(&session, result), LifecycleSignal::Stale);
        assert_eq!(provider.constructed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_orphan_surface_is_torn_down() {
        let provider = SimulatedSurfaceProvider::ready_after(Duration::from_millis(300));
        let (mut manager, mut rx) = manager(StaticCredentialIssuer::new("tok"), provider.clone());

        manager.acquire(persona("bigfoot"));
        let StageEvent::CredentialIssued { session, result } = rx.recv().await.unwrap() else {
            panic!("expected CredentialIssued");
        };
        assert_eq!(manager.on_credential(&session, result), LifecycleSignal::Pending);
        assert_eq!(manager.current().unwrap().phase(), SessionPhase::Constructing);

        // Destroyed mid-construction
        assert!(manager.destroy(&session));
        let StageEvent::SurfaceConstructed { session, result } = rx.recv().await.unwrap() else {
            panic!("expected SurfaceConstructed");
        };
        assert_eq!(
            manager.on_surface_constructed(&session, result),
            LifecycleSignal::Stale
        );
        assert_eq!(provider.live_surfaces(), 0);
        assert_eq!(provider.destroyed_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_is_idempotent() {
        let provider = SimulatedSurfaceProvider::ready_after(Duration::ZERO);
        let (mut manager, mut rx) = manager(StaticCredentialIssuer::new("tok"), provider.clone());

        let id = manager.acquire(persona("riley"));
        drive(&mut manager, &mut rx).await;

        assert!(manager.destroy(&id));
        assert!(!manager.destroy(&id));
        assert!(manager.destroy_current().is_none());
        assert_eq!(provider.destroyed_count(), 1);
        assert!(manager.current().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_replaces_previous_session() {
        let provider = SimulatedSurfaceProvider::ready_after(Duration::ZERO);
        let (mut manager, mut rx) = manager(StaticCredentialIssuer::new("tok"), provider.clone());

        manager.acquire(persona("riley"));
        drive(&mut manager, &mut rx).await;
        assert_eq!(provider.live_surfaces(), 1);

        let second = manager.acquire(persona("hazel"));
        assert_eq!(provider.live_surfaces(), 0);
        assert_eq!(manager.current().unwrap().id(), &second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_ready_reveals_once_constructed() {
        let provider = SimulatedSurfaceProvider::ready_after(Duration::from_millis(800));
        let (mut manager, mut rx) = manager(StaticCredentialIssuer::new("tok"), provider.clone());

        manager.acquire(persona("hazel"));
        assert!(manager.force_ready());
        assert!(!manager.force_ready());
        manager.reveal();
        assert_eq!(provider.revealed_count(), 0);

        let StageEvent::CredentialIssued { session, result } = rx.recv().await.unwrap() else {
            panic!("expected CredentialIssued");
        };
        manager.on_credential(&session, result);
        let StageEvent::SurfaceConstructed { session, result } = rx.recv().await.unwrap() else {
            panic!("expected SurfaceConstructed");
        };
        assert_eq!(
            manager.on_surface_constructed(&session, result),
            LifecycleSignal::Pending
        );

        let current = manager.current().unwrap();
        assert_eq!(current.phase(), SessionPhase::Ready);
        assert!(current.is_revealed());
        assert_eq!(provider.revealed_count(), 1);
    }
}
