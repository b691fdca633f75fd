//! Stage Events
//!
//! Everything the stage reacts to arrives as a [`StageEvent`] on one
//! channel: requests from external controllers and completions reported by
//! the tasks the stage spawned. The stage consumes them one at a time, so
//! no two handlers ever interleave.
//!
//! Completions carry the identity of the work that produced them (a
//! playback token, a generation, a session ID). Handlers compare it with
//! what is current and drop anything that belongs to a superseded attempt.

use tokio::sync::oneshot;

use crate::compositor::{LayerKind, PlaybackOutcome, PlaybackToken};
use crate::persona::PersonaId;
use crate::providers::{Credential, CredentialError, SurfaceError, SurfaceHandle};
use crate::session::{ReadySource, SessionId};

/// Monotonic activation attempt counter
///
/// Bumped on every activation and every reset. Timers armed for one
/// generation are ignored once it has moved on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(pub u64);

impl Generation {
    /// The following generation
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status rotation counter
///
/// Bumped whenever a rotation starts or stops. Ticks carry the epoch they
/// were scheduled for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StatusEpoch(pub u64);

impl StatusEpoch {
    /// The following epoch
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Requests from external controllers
#[derive(Debug)]
pub enum StageCommand {
    /// Bring a persona on stage
    Activate(PersonaId),
    /// Leave the active persona
    Dismiss,
    /// Return to idle from anywhere
    ForceReset,
    /// The user started speaking
    SpeechDetected,
    /// The persona started answering
    ResponseStarted,
    /// Reply once every earlier event has been handled
    Settle(oneshot::Sender<()>),
    /// Tear everything down and stop the event loop
    Shutdown,
}

/// Input to the stage event loop
#[derive(Debug)]
pub enum StageEvent {
    /// External request
    Command(StageCommand),

    /// A transition clip ended or failed to start
    TransitionEnded {
        /// Playback that ended
        token: PlaybackToken,
        /// How it ended
        outcome: PlaybackOutcome,
    },

    /// A perpetual layer finished its current clip
    PerpetualEnded {
        /// Which layer
        layer: LayerKind,
        /// Playback that ended
        token: PlaybackToken,
    },

    /// The rendezvous fallback timer elapsed
    FallbackElapsed {
        /// Generation the timer was armed for
        generation: Generation,
    },

    /// The credential issuer answered
    CredentialIssued {
        /// Session that asked
        session: SessionId,
        /// Issuer answer
        result: Result<Credential, CredentialError>,
    },

    /// The surface provider finished constructing
    SurfaceConstructed {
        /// Session that asked
        session: SessionId,
        /// Provider answer
        result: Result<SurfaceHandle, SurfaceError>,
    },

    /// The readiness detector decided
    SessionReady {
        /// Session being watched
        session: SessionId,
        /// Which prong fired
        source: ReadySource,
    },

    /// Time to rotate the status message
    StatusTick {
        /// Rotation the tick belongs to
        epoch: StatusEpoch,
    },
}
