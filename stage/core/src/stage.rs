//! Stage
//!
//! The presentation state machine. One task owns every piece of mutable
//! presentation state (state, active persona, rendezvous flags, layers,
//! session, status rotation) and processes [`StageEvent`]s strictly one at
//! a time.
//!
//! # States
//!
//! ```text
//!          activate                rendezvous            speech
//!   Idle ───────────► Entering ─────────────────► Active ◄──────► Listening
//!    ▲                   │                          │   response      │
//!    │                   │ dismiss                  │ dismiss         │
//!    │  exit complete    ▼                          ▼                 │
//!    └─────────────── Exiting ◄─────────────────────┴─────────────────┘
//!
//!   force reset (or session failure): any state ──► Idle
//! ```
//!
//! # Rendezvous
//!
//! `Entering → Active` fires once both the entry transition has ended and
//! the session is ready, in whichever order they arrive, or when the
//! fallback timer armed at activation elapses. Every activation and reset
//! bumps the [`Generation`]; a timer from an earlier generation is ignored.

use std::ops::ControlFlow;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::assets::AssetSelector;
use crate::compositor::{Compositor, MediaPlayer, PlaybackOutcome, PlaybackToken};
use crate::config::{StageConfig, TimingConfig};
use crate::events::{Generation, StageCommand, StageEvent};
use crate::messages::{
    RendezvousKind, StageNotification, StageRequest, StageSnapshot, StageState, StateChange,
    TransitionCause,
};
use crate::persona::{ClipRole, Persona, PersonaId, PersonaRegistry};
use crate::providers::{CredentialIssuer, SurfaceProvider};
use crate::session::{LifecycleSignal, SessionManager};
use crate::status::StatusMessenger;

/// Capacity of the stage event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the notification broadcast channel
const NOTIFICATION_CAPACITY: usize = 64;

/// Errors talking to the stage
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageError {
    /// The stage task has stopped
    #[error("stage is not running")]
    Stopped,
}

/// Everything a stage is built from
pub struct StageParts {
    /// Loaded configuration
    pub config: StageConfig,
    /// Credential source
    pub issuer: Arc<dyn CredentialIssuer>,
    /// Surface source
    pub provider: Arc<dyn SurfaceProvider>,
    /// Layer renderer
    pub player: Arc<dyn MediaPlayer>,
    /// Clip picker
    pub selector: AssetSelector,
}

impl StageParts {
    /// Bundle collaborators with an entropy-seeded selector
    pub fn new(
        config: StageConfig,
        issuer: Arc<dyn CredentialIssuer>,
        provider: Arc<dyn SurfaceProvider>,
        player: Arc<dyn MediaPlayer>,
    ) -> Self {
        Self {
            config,
            issuer,
            provider,
            player,
            selector: AssetSelector::new(),
        }
    }

    /// Use a specific selector (e.g. a seeded one)
    #[must_use]
    pub fn with_selector(mut self, selector: AssetSelector) -> Self {
        self.selector = selector;
        self
    }
}

/// Progress toward the `Entering → Active` rendezvous
#[derive(Clone, Copy, Debug, Default)]
struct Rendezvous {
    transition_done: bool,
    session_ready: bool,
}

impl Rendezvous {
    fn complete(self) -> bool {
        self.transition_done && self.session_ready
    }
}

/// The stage state machine
pub struct Stage {
    personas: Arc<PersonaRegistry>,
    timing: TimingConfig,
    compositor: Compositor,
    sessions: SessionManager,
    status: StatusMessenger,

    state: StageState,
    active: Option<Arc<Persona>>,
    generation: Generation,
    rendezvous: Rendezvous,
    fallback: Option<AbortHandle>,

    events_tx: mpsc::Sender<StageEvent>,
    events: mpsc::Receiver<StageEvent>,
    notifications: broadcast::Sender<StageNotification>,
    snapshot: watch::Sender<StageSnapshot>,
}

impl Stage {
    /// Build a stage and the handle controllers use to drive it.
    ///
    /// Nothing happens until [`run`](Self::run) is polled.
    pub fn new(parts: StageParts) -> (Self, StageHandle) {
        let (events_tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let (snapshot, snapshot_rx) = watch::channel(StageSnapshot::default());

        let config = parts.config;
        let personas = Arc::new(config.registry());

        let compositor = Compositor::new(
            parts.player,
            parts.selector,
            config.perpetual_pools(),
            config.timing.retry_delay,
            events_tx.clone(),
        );
        let sessions = SessionManager::new(
            parts.issuer,
            parts.provider,
            config.timing.readiness,
            events_tx.clone(),
        );
        let status = StatusMessenger::new(config.timing.status_interval, events_tx.clone());

        let handle = StageHandle {
            events: events_tx.clone(),
            notifications: notifications.clone(),
            snapshot: snapshot_rx,
            personas: Arc::clone(&personas),
        };

        let stage = Self {
            personas,
            timing: config.timing,
            compositor,
            sessions,
            status,
            state: StageState::Idle,
            active: None,
            generation: Generation::default(),
            rendezvous: Rendezvous::default(),
            fallback: None,
            events_tx,
            events,
            notifications,
            snapshot,
        };

        (stage, handle)
    }

    /// Build a stage and run it on a new task
    pub fn spawn(parts: StageParts) -> StageHandle {
        let (stage, handle) = Self::new(parts);
        tokio::spawn(stage.run());
        handle
    }

    /// Run the event loop until shutdown
    pub async fn run(mut self) {
        tracing::info!(personas = self.personas.len(), "Stage starting");

        self.compositor.start_overlays();
        self.compositor.show_ambient();
        self.compositor.ensure_ambient_loop();
        self.publish_snapshot();

        while let Some(event) = self.events.recv().await {
            let flow = self.handle_event(event);
            self.publish_snapshot();
            if flow.is_break() {
                break;
            }
        }

        self.shutdown();
        tracing::info!("Stage stopped");
    }

    fn handle_event(&mut self, event: StageEvent) -> ControlFlow<()> {
        match event {
            StageEvent::Command(command) => return self.handle_command(command),
            StageEvent::TransitionEnded { token, outcome } => {
                self.on_transition_ended(token, outcome);
            }
            StageEvent::PerpetualEnded { layer, token } => {
                self.compositor.on_perpetual_ended(layer, token);
            }
            StageEvent::FallbackElapsed { generation } => self.on_fallback(generation),
            StageEvent::CredentialIssued { session, result } => {
                let signal = self.sessions.on_credential(&session, result);
                self.apply_lifecycle(signal);
            }
            StageEvent::SurfaceConstructed { session, result } => {
                let signal = self.sessions.on_surface_constructed(&session, result);
                self.apply_lifecycle(signal);
            }
            StageEvent::SessionReady { session, source } => {
                let signal = self.sessions.on_ready(&session, source);
                self.apply_lifecycle(signal);
            }
            StageEvent::StatusTick { epoch } => {
                if let Some(message) = self.status.on_tick(epoch) {
                    let message = message.to_string();
                    self.notify(StageNotification::Status {
                        message: Some(message),
                    });
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn handle_command(&mut self, command: StageCommand) -> ControlFlow<()> {
        match command {
            StageCommand::Activate(id) => self.activate(id),
            StageCommand::Dismiss => self.dismiss(),
            StageCommand::ForceReset => self.force_reset(TransitionCause::Reset, None),
            StageCommand::SpeechDetected => self.speech_detected(),
            StageCommand::ResponseStarted => self.response_started(),
            StageCommand::Settle(reply) => {
                let _ = reply.send(());
            }
            StageCommand::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    // ========================================================================
    // Activation and rendezvous
    // ========================================================================

    fn activate(&mut self, id: PersonaId) {
        if self.state != StageState::Idle {
            let reason = format!("cannot activate while {}", self.state);
            self.reject(StageRequest::Activate(id), reason);
            return;
        }
        let Some(persona) = self.personas.get(&id) else {
            let reason = format!("unknown persona '{id}'");
            self.reject(StageRequest::Activate(id), reason);
            return;
        };

        self.generation = self.generation.next();
        self.rendezvous = Rendezvous::default();
        self.compositor
            .set_ambient_override(Some(persona.ambient_override_clips.clone()));

        self.sessions.acquire(Arc::clone(&persona));

        match self.compositor.select_clip(&persona, ClipRole::Entry) {
            Some(clip) => {
                tracing::debug!(persona = %id, %clip, "Playing entry transition");
                self.compositor.play_transition(clip);
            }
            None => self.rendezvous.transition_done = true,
        }

        self.arm_fallback();
        self.active = Some(persona);
        self.transition_to(StageState::Entering, TransitionCause::Activate, None);
    }

    fn arm_fallback(&mut self) {
        self.cancel_fallback();
        let generation = self.generation;
        let delay = self.timing.fallback;
        let events = self.events_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(StageEvent::FallbackElapsed { generation }).await;
        });
        self.fallback = Some(task.abort_handle());
    }

    fn cancel_fallback(&mut self) {
        if let Some(fallback) = self.fallback.take() {
            fallback.abort();
        }
    }

    fn on_fallback(&mut self, generation: Generation) {
        if generation != self.generation || self.state != StageState::Entering {
            tracing::debug!(%generation, current = %self.generation, "Ignoring stale fallback timer");
            return;
        }
        self.fallback = None;

        tracing::warn!(
            persona = ?self.active_id(),
            transition_done = self.rendezvous.transition_done,
            session_ready = self.rendezvous.session_ready,
            ms = self.timing.fallback.as_millis(),
            "Rendezvous fallback elapsed, proceeding"
        );
        if !self.rendezvous.session_ready {
            self.sessions.force_ready();
            self.rendezvous.session_ready = true;
        }
        self.fire_rendezvous(RendezvousKind::Fallback);
    }

    fn on_transition_ended(&mut self, token: PlaybackToken, outcome: PlaybackOutcome) {
        if !self.compositor.finish_transition(token, outcome) {
            tracing::debug!(?token, "Ignoring end of a replaced transition");
            return;
        }
        if outcome == PlaybackOutcome::Failed {
            tracing::warn!(state = %self.state, "Transition clip unavailable, treating as ended");
        }

        match self.state {
            StageState::Entering => {
                self.rendezvous.transition_done = true;
                self.try_rendezvous();
            }
            StageState::Exiting => self.complete_exit(),
            _ => {}
        }
    }

    fn apply_lifecycle(&mut self, signal: LifecycleSignal) {
        match signal {
            LifecycleSignal::Pending | LifecycleSignal::Stale => {}
            LifecycleSignal::Ready { .. } => {
                if self.state == StageState::Entering {
                    self.rendezvous.session_ready = true;
                    self.try_rendezvous();
                }
            }
            LifecycleSignal::Failed { error } => {
                if self.state == StageState::Exiting {
                    tracing::debug!(error = %error, "Ignoring session failure while exiting");
                } else if self.state != StageState::Idle {
                    tracing::error!(persona = ?self.active_id(), error = %error, "Session failed, resetting stage");
                    self.force_reset(TransitionCause::Failure, Some(error.to_string()));
                }
            }
        }
    }

    fn try_rendezvous(&mut self) {
        if self.state == StageState::Entering && self.rendezvous.complete() {
            self.fire_rendezvous(RendezvousKind::Clean);
        }
    }

    fn fire_rendezvous(&mut self, kind: RendezvousKind) {
        self.cancel_fallback();
        self.compositor.hide_transition();
        self.compositor.hide_ambient();
        self.compositor.show_interactive_surface();
        self.sessions.reveal();
        self.transition_to(
            StageState::Active,
            TransitionCause::Rendezvous(kind),
            None,
        );
    }

    // ========================================================================
    // Listening
    // ========================================================================

    fn speech_detected(&mut self) {
        if self.state != StageState::Active {
            let reason = format!("not listening for speech while {}", self.state);
            self.reject(StageRequest::SpeechDetected, reason);
            return;
        }
        let Some(persona) = self.active.clone() else {
            return;
        };

        self.status.start(&persona.status_messages);
        self.transition_to(StageState::Listening, TransitionCause::SpeechDetected, None);
        let message = self.status.current().map(str::to_string);
        self.notify(StageNotification::Status { message });
    }

    fn response_started(&mut self) {
        if self.state != StageState::Listening {
            let reason = format!("no pending response while {}", self.state);
            self.reject(StageRequest::ResponseStarted, reason);
            return;
        }
        self.stop_status();
        self.transition_to(StageState::Active, TransitionCause::ResponseStarted, None);
    }

    fn stop_status(&mut self) {
        if self.status.is_running() {
            self.status.stop();
            self.notify(StageNotification::Status { message: None });
        }
    }

    // ========================================================================
    // Dismissal and reset
    // ========================================================================

    fn dismiss(&mut self) {
        match self.state {
            StageState::Idle | StageState::Exiting => {
                let reason = format!("nothing to dismiss while {}", self.state);
                self.reject(StageRequest::Dismiss, reason);
            }
            StageState::Entering => {
                self.cancel_fallback();
                self.sessions.destroy_current();
                self.compositor.hide_transition();
                self.begin_exit();
            }
            StageState::Active | StageState::Listening => {
                // Late construction results must not reveal or fail the exit
                self.stop_status();
                self.sessions.destroy_current();
                self.compositor.hide_interactive_surface();
                self.begin_exit();
            }
        }
    }

    fn begin_exit(&mut self) {
        self.transition_to(StageState::Exiting, TransitionCause::Dismiss, None);

        let clip = self
            .active
            .clone()
            .and_then(|persona| self.compositor.select_clip(&persona, ClipRole::Exit));
        match clip {
            Some(clip) => {
                tracing::debug!(persona = ?self.active_id(), %clip, "Playing exit transition");
                self.compositor.play_transition(clip);
            }
            None => self.complete_exit(),
        }
    }

    fn complete_exit(&mut self) {
        self.compositor.hide_transition();
        self.sessions.destroy_current();
        self.compositor.set_ambient_override(None);
        self.compositor.show_ambient();
        self.compositor.ensure_ambient_loop();
        self.generation = self.generation.next();
        self.rendezvous = Rendezvous::default();
        self.transition_to(StageState::Idle, TransitionCause::ExitComplete, None);
        self.active = None;
    }

    fn force_reset(&mut self, cause: TransitionCause, error: Option<String>) {
        let previous = self.state;
        self.generation = self.generation.next();
        self.cancel_fallback();
        self.stop_status();
        self.sessions.destroy_current();
        self.compositor.hide_transition();
        self.compositor.hide_interactive_surface();
        self.compositor.set_ambient_override(None);
        self.compositor.show_ambient();
        self.compositor.ensure_ambient_loop();
        self.rendezvous = Rendezvous::default();

        if previous == StageState::Idle {
            tracing::debug!("Reset while idle");
        } else {
            self.transition_to(StageState::Idle, cause, error);
        }
        self.active = None;
    }

    fn shutdown(&mut self) {
        self.cancel_fallback();
        self.status.stop();
        self.sessions.destroy_current();
        self.compositor.shutdown();
    }

    // ========================================================================
    // Notifications
    // ========================================================================

    fn active_id(&self) -> Option<&PersonaId> {
        self.active.as_ref().map(|p| &p.id)
    }

    fn transition_to(&mut self, state: StageState, cause: TransitionCause, error: Option<String>) {
        let previous = std::mem::replace(&mut self.state, state);
        let change = StateChange {
            previous,
            state,
            persona: self.active_id().cloned(),
            cause,
            error,
            at: Instant::now(),
        };
        tracing::info!(
            from = %previous,
            to = %state,
            persona = ?change.persona,
            ?cause,
            generation = %self.generation,
            "Stage transition"
        );
        self.notify(StageNotification::StateChanged(change));
    }

    fn reject(&self, request: StageRequest, reason: String) {
        tracing::warn!(?request, state = %self.state, %reason, "Request rejected");
        self.notify(StageNotification::Rejected {
            request,
            state: self.state,
            reason,
        });
    }

    fn notify(&self, notification: StageNotification) {
        // No subscribers is fine
        let _ = self.notifications.send(notification);
    }

    fn publish_snapshot(&self) {
        self.snapshot.send_replace(StageSnapshot {
            state: self.state,
            persona: self.active_id().cloned(),
            session: self.sessions.snapshot(),
            layers: self.compositor.snapshot(),
            status_message: self.status.current().map(str::to_string),
        });
    }
}

/// Controller-side handle to a running stage
///
/// Cheap to clone. Requests are fire-and-forget; outcomes arrive as
/// notifications.
#[derive(Clone)]
pub struct StageHandle {
    events: mpsc::Sender<StageEvent>,
    notifications: broadcast::Sender<StageNotification>,
    snapshot: watch::Receiver<StageSnapshot>,
    personas: Arc<PersonaRegistry>,
}

impl StageHandle {
    async fn send(&self, command: StageCommand) -> Result<(), StageError> {
        self.events
            .send(StageEvent::Command(command))
            .await
            .map_err(|_| StageError::Stopped)
    }

    /// Bring a persona on stage
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Stopped`] if the stage is no longer running.
    pub async fn activate(&self, persona: impl Into<PersonaId>) -> Result<(), StageError> {
        self.send(StageCommand::Activate(persona.into())).await
    }

    /// Dismiss the active persona
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Stopped`] if the stage is no longer running.
    pub async fn dismiss(&self) -> Result<(), StageError> {
        self.send(StageCommand::Dismiss).await
    }

    /// Return to idle from any state
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Stopped`] if the stage is no longer running.
    pub async fn force_reset(&self) -> Result<(), StageError> {
        self.send(StageCommand::ForceReset).await
    }

    /// Report that the user started speaking
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Stopped`] if the stage is no longer running.
    pub async fn speech_detected(&self) -> Result<(), StageError> {
        self.send(StageCommand::SpeechDetected).await
    }

    /// Report that the persona started responding
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Stopped`] if the stage is no longer running.
    pub async fn response_started(&self) -> Result<(), StageError> {
        self.send(StageCommand::ResponseStarted).await
    }

    /// Wait until every event queued before this call has been handled
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Stopped`] if the stage is no longer running.
    pub async fn settle(&self) -> Result<(), StageError> {
        let (tx, rx) = oneshot::channel();
        self.send(StageCommand::Settle(tx)).await?;
        rx.await.map_err(|_| StageError::Stopped)
    }

    /// Tear everything down and stop the stage
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Stopped`] if the stage already stopped.
    pub async fn shutdown(&self) -> Result<(), StageError> {
        self.send(StageCommand::Shutdown).await
    }

    /// Subscribe to notifications from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StageNotification> {
        self.notifications.subscribe()
    }

    /// Latest published snapshot
    #[must_use]
    pub fn snapshot(&self) -> StageSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Watch snapshots as they change
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<StageSnapshot> {
        self.snapshot.clone()
    }

    /// Current presentation state
    #[must_use]
    pub fn state(&self) -> StageState {
        self.snapshot.borrow().state
    }

    /// Configured personas
    #[must_use]
    pub fn personas(&self) -> &PersonaRegistry {
        &self.personas
    }
}
