//! Stage Notifications
//!
//! What the stage tells the outside world. Controllers (UI buttons, a remote
//! command channel, the daemon's stdout) subscribe to [`StageNotification`]s
//! for every state change and every rejected request, and can read the
//! latest [`StageSnapshot`] at any time.
//!
//! Notifications are fire-and-forget: a slow or absent listener never holds
//! the stage up.

use serde::Serialize;
use tokio::time::Instant;

use crate::compositor::LayerSnapshot;
use crate::persona::PersonaId;
use crate::session::SessionSnapshot;

/// Presentation states
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub enum StageState {
    /// Ambient only, waiting for an activation
    #[default]
    Idle,
    /// Entry transition and session setup in progress
    Entering,
    /// Persona on stage
    Active,
    /// Persona on stage, user speaking
    Listening,
    /// Exit transition in progress
    Exiting,
}

impl StageState {
    /// Get a human-readable description
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Entering => "Entering",
            Self::Active => "Active",
            Self::Listening => "Listening",
            Self::Exiting => "Exiting",
        }
    }
}

impl std::fmt::Display for StageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// How the rendezvous was reached
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RendezvousKind {
    /// Transition ended and session became ready
    Clean,
    /// Fallback timer elapsed first
    Fallback,
}

/// Why a state change happened
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TransitionCause {
    /// Activation request accepted
    Activate,
    /// Rendezvous fired
    Rendezvous(RendezvousKind),
    /// User started speaking
    SpeechDetected,
    /// Persona started responding
    ResponseStarted,
    /// Dismiss request accepted
    Dismiss,
    /// Exit transition ended
    ExitComplete,
    /// Reset requested
    Reset,
    /// Session failed; reset automatically
    Failure,
}

/// One state change
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StateChange {
    /// State before the change
    pub previous: StageState,
    /// State after the change
    pub state: StageState,
    /// Persona on stage (or leaving it)
    pub persona: Option<PersonaId>,
    /// What caused it
    pub cause: TransitionCause,
    /// Failure description for failure-driven resets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When it happened
    #[serde(skip)]
    pub at: Instant,
}

/// Requests a controller can make
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum StageRequest {
    /// `activate(persona)`
    Activate(PersonaId),
    /// `dismiss()`
    Dismiss,
    /// `forceReset()`
    ForceReset,
    /// Speech detected
    SpeechDetected,
    /// Response started
    ResponseStarted,
}

/// Messages from the stage to its listeners
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageNotification {
    /// The state changed
    StateChanged(StateChange),

    /// A request was not valid in the current state
    Rejected {
        /// The request
        request: StageRequest,
        /// State it arrived in
        state: StageState,
        /// Why it was rejected
        reason: String,
    },

    /// The status line changed (`None` = cleared)
    Status {
        /// Line now shown
        message: Option<String>,
    },
}

/// Full observable state of the stage
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StageSnapshot {
    /// Presentation state
    pub state: StageState,
    /// Persona on stage
    pub persona: Option<PersonaId>,
    /// Current session
    pub session: Option<SessionSnapshot>,
    /// Layers, bottom to top
    pub layers: Vec<LayerSnapshot>,
    /// Status line shown
    pub status_message: Option<String>,
}

impl StageSnapshot {
    /// Whether a layer is visible in this snapshot
    #[must_use]
    pub fn is_visible(&self, kind: crate::compositor::LayerKind) -> bool {
        self.layers.iter().any(|l| l.kind == kind && l.visible)
    }
}
