//! Stage Core - Headless Presentation Orchestration for Interactive Personas
//!
//! This crate drives a layered presentation stage on which interactive
//! personas appear and leave. It decides *when* the layers change and *when*
//! a persona's interactive surface may be shown; rendering, credential
//! issuance and the surface itself are supplied from outside through traits.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Controllers                               │
//! │   UI buttons · remote command channel · daemon stdin             │
//! │                           │                                      │
//! │          StageHandle (requests down, notifications up)           │
//! └───────────────────────────┼──────────────────────────────────────┘
//!                             │  StageEvent (single queue)
//! ┌───────────────────────────┼──────────────────────────────────────┐
//! │                        STAGE CORE                                │
//! │  ┌────────────────────────┴────────────────────────────────────┐ │
//! │  │                   Stage (state machine)                     │ │
//! │  │  ┌────────────┐  ┌────────────┐  ┌─────────┐  ┌───────────┐ │ │
//! │  │  │ Compositor │  │  Session   │  │ Status  │  │   Asset   │ │ │
//! │  │  │ (5 layers) │  │  Manager   │  │Messenger│  │ Selector  │ │ │
//! │  │  └─────┬──────┘  └─────┬──────┘  └─────────┘  └───────────┘ │ │
//! │  └────────┼───────────────┼────────────────────────────────────┘ │
//! └───────────┼───────────────┼──────────────────────────────────────┘
//!             │               │
//!       MediaPlayer   CredentialIssuer + SurfaceProvider
//! ```
//!
//! # Key Types
//!
//! - [`Stage`] / [`StageHandle`]: the state machine and its controller handle
//! - [`StageNotification`]: state changes and rejected requests
//! - [`Compositor`]: the five stacked layers
//! - [`SessionManager`]: credential, surface construction, readiness, teardown
//! - [`StatusMessenger`]: rotating status lines while listening
//! - [`AssetSelector`]: clip selection from candidate pools
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use stage_core::{
//!     load_config, ClockedPlayer, SimulatedSurfaceProvider, Stage, StageParts,
//!     StaticCredentialIssuer,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     let player = ClockedPlayer::new(config.clip_catalog());
//!     let handle = Stage::spawn(StageParts::new(
//!         config,
//!         Arc::new(StaticCredentialIssuer::new("demo")),
//!         Arc::new(SimulatedSurfaceProvider::never_ready()),
//!         Arc::new(player),
//!     ));
//!
//!     let mut notes = handle.subscribe();
//!     handle.activate("bigfoot").await?;
//!     while let Ok(note) = notes.recv().await {
//!         println!("{note:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`stage`]: the state machine and its handle
//! - [`compositor`]: layers and the media player seam
//! - [`session`]: session lifecycle and readiness detection
//! - [`providers`]: credential issuer and surface provider seams
//! - [`status`]: status-line rotation
//! - [`assets`]: clip selection
//! - [`persona`]: persona descriptors and registry
//! - [`events`]: the stage's input queue
//! - [`messages`]: notifications and snapshots
//! - [`config`]: TOML configuration

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod assets;
pub mod compositor;
pub mod config;
pub mod events;
pub mod messages;
pub mod persona;
pub mod providers;
pub mod session;
pub mod stage;
pub mod status;

// Re-exports for convenience
pub use assets::{AssetSelector, SelectionPolicy};
pub use compositor::{
    ClipCatalog, ClockedPlayer, Compositor, LayerKind, LayerSnapshot, MediaError, MediaPlayer,
    PerpetualPools, PlayHead, PlaybackOutcome, PlaybackToken,
};
pub use events::{Generation, StageCommand, StageEvent, StatusEpoch};
pub use messages::{
    RendezvousKind, StageNotification, StageRequest, StageSnapshot, StageState, StateChange,
    TransitionCause,
};
pub use persona::{AssetRef, ClipRole, CredentialRef, Persona, PersonaId, PersonaInfo, PersonaRegistry};
pub use providers::{
    Credential, CredentialError, CredentialIssuer, HttpCredentialIssuer, ReadySignal,
    SimulatedSurfaceConfig, SimulatedSurfaceProvider, StaticCredentialIssuer, SurfaceError,
    SurfaceHandle, SurfaceProvider,
};
pub use session::{
    LifecycleSignal, ReadinessConfig, ReadySource, Session, SessionFailure, SessionId,
    SessionManager, SessionPhase, SessionSnapshot,
};
pub use stage::{Stage, StageError, StageHandle, StageParts};
pub use status::StatusMessenger;

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, load_config_from_str,
    ConfigError, ConfigOverrides, ConfigSource, StageConfig, StageToml, TimingConfig,
};
