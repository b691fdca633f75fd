//! Layer Compositor
//!
//! Owns the five stacked layers of the stage and turns named operations
//! (play, show, hide) into [`MediaPlayer`] calls.
//!
//! ```text
//!   z  layer                 lifetime
//!   4  OverlayTop            perpetual
//!   3  InteractiveSurface    session-scoped (surface owned by the provider)
//!   2  Transition            session-scoped
//!   1  OverlayBottom         perpetual
//!   0  AmbientLoop           perpetual
//! ```
//!
//! Perpetual layers restart with a freshly selected clip every time their
//! current one ends. Transition playback reports its end exactly once via
//! [`StageEvent::TransitionEnded`]; a clip that fails to start reports a
//! failed end immediately so nothing upstream ever waits on a missing asset.

mod player;

pub use player::{ClipCatalog, ClockedPlayer, MediaError, MediaPlayer};

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::assets::{AssetSelector, SelectionPolicy};
use crate::events::StageEvent;
use crate::persona::{AssetRef, ClipRole, Persona};

/// The fixed set of layers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerKind {
    /// Always-animating background
    AmbientLoop,
    /// Entry/exit clip
    Transition,
    /// The provider's interactive surface
    InteractiveSurface,
    /// Decorative overlay above everything
    OverlayTop,
    /// Decorative overlay above the background
    OverlayBottom,
}

impl LayerKind {
    /// Every layer, bottom to top
    pub const ALL: [LayerKind; 5] = [
        LayerKind::AmbientLoop,
        LayerKind::OverlayBottom,
        LayerKind::Transition,
        LayerKind::InteractiveSurface,
        LayerKind::OverlayTop,
    ];

    /// Whether the layer plays continuously regardless of sessions
    #[must_use]
    pub fn is_perpetual(self) -> bool {
        matches!(self, Self::AmbientLoop | Self::OverlayTop | Self::OverlayBottom)
    }

    /// Stacking order (higher = on top)
    #[must_use]
    pub fn z_index(self) -> i32 {
        match self {
            Self::AmbientLoop => 0,
            Self::OverlayBottom => 1,
            Self::Transition => 2,
            Self::InteractiveSurface => 3,
            Self::OverlayTop => 4,
        }
    }

    fn slot(self) -> usize {
        match self {
            Self::AmbientLoop => 0,
            Self::OverlayBottom => 1,
            Self::Transition => 2,
            Self::InteractiveSurface => 3,
            Self::OverlayTop => 4,
        }
    }

    fn pool_key(self) -> &'static str {
        match self {
            Self::AmbientLoop => "ambient",
            Self::OverlayBottom => "overlay_bottom",
            Self::OverlayTop => "overlay_top",
            Self::Transition => "transition",
            Self::InteractiveSurface => "surface",
        }
    }
}

/// Identity of one playback on one layer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PlaybackToken(u64);

/// How a transition playback ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackOutcome {
    /// Reached its natural end
    Completed,
    /// Could not be started
    Failed,
}

/// Play-head position of a layer
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayHead {
    /// Nothing playing
    #[default]
    Stopped,
    /// Clip in progress
    Playing,
    /// Held on the last frame
    Ended,
}

/// Observable record of a layer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSnapshot {
    /// Which layer
    pub kind: LayerKind,
    /// Mounted asset
    pub asset: Option<AssetRef>,
    /// Whether the layer loops
    pub looped: bool,
    /// Whether the layer is shown
    pub visible: bool,
    /// Play-head state
    pub play_head: PlayHead,
}

struct LayerState {
    kind: LayerKind,
    asset: Option<AssetRef>,
    looped: bool,
    visible: bool,
    play_head: PlayHead,
    token: Option<PlaybackToken>,
    task: Option<AbortHandle>,
}

impl LayerState {
    fn new(kind: LayerKind) -> Self {
        Self {
            kind,
            asset: None,
            looped: kind.is_perpetual(),
            visible: false,
            play_head: PlayHead::Stopped,
            token: None,
            task: None,
        }
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.token = None;
    }

    fn snapshot(&self) -> LayerSnapshot {
        LayerSnapshot {
            kind: self.kind,
            asset: self.asset.clone(),
            looped: self.looped,
            visible: self.visible,
            play_head: self.play_head,
        }
    }
}

/// Candidate pools for the perpetual layers
#[derive(Clone, Debug, Default)]
pub struct PerpetualPools {
    /// Ambient candidates
    pub ambient: Vec<AssetRef>,
    /// How the ambient pool advances
    pub ambient_policy: SelectionPolicy,
    /// Top overlay candidates
    pub overlay_top: Vec<AssetRef>,
    /// Bottom overlay candidates
    pub overlay_bottom: Vec<AssetRef>,
}

/// The layer compositor
pub struct Compositor {
    player: Arc<dyn MediaPlayer>,
    selector: AssetSelector,
    pools: PerpetualPools,
    ambient_override: Option<Vec<AssetRef>>,
    layers: [LayerState; 5],
    events: mpsc::Sender<StageEvent>,
    next_token: u64,
    retry_delay: Duration,
}

impl Compositor {
    /// Create a compositor. Nothing plays until [`start_overlays`] and
    /// [`ensure_ambient_loop`] are called.
    ///
    /// [`start_overlays`]: Self::start_overlays
    /// [`ensure_ambient_loop`]: Self::ensure_ambient_loop
    pub fn new(
        player: Arc<dyn MediaPlayer>,
        selector: AssetSelector,
        pools: PerpetualPools,
        retry_delay: Duration,
        events: mpsc::Sender<StageEvent>,
    ) -> Self {
        Self {
            player,
            selector,
            pools,
            ambient_override: None,
            layers: [
                LayerState::new(LayerKind::AmbientLoop),
                LayerState::new(LayerKind::OverlayBottom),
                LayerState::new(LayerKind::Transition),
                LayerState::new(LayerKind::InteractiveSurface),
                LayerState::new(LayerKind::OverlayTop),
            ],
            events,
            next_token: 0,
            retry_delay,
        }
    }

    fn layer(&self, kind: LayerKind) -> &LayerState {
        &self.layers[kind.slot()]
    }

    fn layer_mut(&mut self, kind: LayerKind) -> &mut LayerState {
        &mut self.layers[kind.slot()]
    }

    fn issue_token(&mut self) -> PlaybackToken {
        self.next_token += 1;
        PlaybackToken(self.next_token)
    }

    fn set_visible(&mut self, kind: LayerKind, visible: bool) {
        let layer = self.layer_mut(kind);
        if layer.visible == visible {
            return;
        }
        layer.visible = visible;
        self.player.set_visible(kind, visible);
    }

    /// Pick a clip from a persona's pool
    pub fn select_clip(&mut self, persona: &Persona, role: ClipRole) -> Option<AssetRef> {
        self.selector.select(persona, role)
    }

    // ------------------------------------------------------------------
    // Transition layer
    // ------------------------------------------------------------------

    /// Mount `clip` on the transition layer, show it and play it once.
    ///
    /// Replaces whatever the layer was playing. The end (or failure to
    /// start) is reported once as `TransitionEnded` with the returned token.
    pub fn play_transition(&mut self, clip: AssetRef) -> PlaybackToken {
        let token = self.issue_token();
        let player = Arc::clone(&self.player);
        let events = self.events.clone();
        let asset = clip.clone();

        let task = tokio::spawn(async move {
            let outcome = match player.play(LayerKind::Transition, &asset).await {
                Ok(()) => PlaybackOutcome::Completed,
                Err(e) => {
                    tracing::warn!(%asset, error = %e, "Transition clip failed to start");
                    PlaybackOutcome::Failed
                }
            };
            let _ = events
                .send(StageEvent::TransitionEnded { token, outcome })
                .await;
        });

        let layer = self.layer_mut(LayerKind::Transition);
        layer.abort();
        layer.asset = Some(clip);
        layer.looped = false;
        layer.play_head = PlayHead::Playing;
        layer.token = Some(token);
        layer.task = Some(task.abort_handle());
        self.set_visible(LayerKind::Transition, true);

        token
    }

    /// Record the end of a transition playback.
    ///
    /// Returns `false` for a token that is no longer mounted. A completed
    /// clip holds its last frame; a failed one is hidden and released so no
    /// broken frame stays on screen.
    pub fn finish_transition(&mut self, token: PlaybackToken, outcome: PlaybackOutcome) -> bool {
        let layer = self.layer_mut(LayerKind::Transition);
        if layer.token != Some(token) {
            return false;
        }
        layer.task = None;
        layer.token = None;
        if outcome == PlaybackOutcome::Completed {
            layer.play_head = PlayHead::Ended;
        } else {
            self.hide_transition();
        }
        true
    }

    /// Hide the transition layer and release its asset. Safe when hidden.
    pub fn hide_transition(&mut self) {
        self.set_visible(LayerKind::Transition, false);
        let layer = self.layer_mut(LayerKind::Transition);
        layer.abort();
        layer.play_head = PlayHead::Stopped;
        if layer.asset.take().is_some() {
            self.player.release(LayerKind::Transition);
        }
    }

    // ------------------------------------------------------------------
    // Interactive surface layer
    // ------------------------------------------------------------------

    /// Show the externally supplied interactive surface
    pub fn show_interactive_surface(&mut self) {
        self.set_visible(LayerKind::InteractiveSurface, true);
    }

    /// Hide the interactive surface
    pub fn hide_interactive_surface(&mut self) {
        self.set_visible(LayerKind::InteractiveSurface, false);
    }

    // ------------------------------------------------------------------
    // Perpetual layers
    // ------------------------------------------------------------------

    /// Show the ambient layer (it keeps playing while hidden)
    pub fn show_ambient(&mut self) {
        self.set_visible(LayerKind::AmbientLoop, true);
    }

    /// Hide the ambient layer without stopping it
    pub fn hide_ambient(&mut self) {
        self.set_visible(LayerKind::AmbientLoop, false);
    }

    /// Make sure the ambient layer is playing. Idempotent.
    pub fn ensure_ambient_loop(&mut self) {
        if self.layer(LayerKind::AmbientLoop).play_head != PlayHead::Playing {
            self.start_perpetual(LayerKind::AmbientLoop);
        }
    }

    /// Start both overlays. Idempotent; called once at startup.
    pub fn start_overlays(&mut self) {
        for kind in [LayerKind::OverlayBottom, LayerKind::OverlayTop] {
            if self.layer(kind).play_head != PlayHead::Playing {
                self.start_perpetual(kind);
                self.set_visible(kind, true);
            }
        }
    }

    /// Replace the ambient pool from the next loop restart on
    pub fn set_ambient_override(&mut self, clips: Option<Vec<AssetRef>>) {
        self.ambient_override = clips.filter(|c| !c.is_empty());
    }

    /// A perpetual layer finished a clip: queue the next one
    pub fn on_perpetual_ended(&mut self, kind: LayerKind, token: PlaybackToken) {
        if self.layer(kind).token != Some(token) {
            tracing::debug!(?kind, "Ignoring end of a replaced perpetual clip");
            return;
        }
        self.start_perpetual(kind);
    }

    fn start_perpetual(&mut self, kind: LayerKind) {
        let asset = match kind {
            LayerKind::AmbientLoop => {
                let pool = self
                    .ambient_override
                    .as_deref()
                    .unwrap_or(&self.pools.ambient);
                self.selector
                    .select_with_policy(kind.pool_key(), pool, self.pools.ambient_policy)
            }
            LayerKind::OverlayTop => self.selector.pick(&self.pools.overlay_top),
            LayerKind::OverlayBottom => self.selector.pick(&self.pools.overlay_bottom),
            LayerKind::Transition | LayerKind::InteractiveSurface => None,
        };

        let Some(asset) = asset else {
            tracing::debug!(?kind, "No clip available for perpetual layer");
            let layer = self.layer_mut(kind);
            layer.abort();
            layer.play_head = PlayHead::Stopped;
            return;
        };

        let token = self.issue_token();
        let player = Arc::clone(&self.player);
        let events = self.events.clone();
        let retry_delay = self.retry_delay;
        let clip = asset.clone();

        let task = tokio::spawn(async move {
            if let Err(e) = player.play(kind, &clip).await {
                tracing::warn!(?kind, %clip, error = %e, "Perpetual clip failed, retrying later");
                tokio::time::sleep(retry_delay).await;
            }
            let _ = events.send(StageEvent::PerpetualEnded { layer: kind, token }).await;
        });

        let layer = self.layer_mut(kind);
        layer.abort();
        layer.asset = Some(asset);
        layer.looped = true;
        layer.play_head = PlayHead::Playing;
        layer.token = Some(token);
        layer.task = Some(task.abort_handle());
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// Whether a layer is shown
    #[must_use]
    pub fn is_visible(&self, kind: LayerKind) -> bool {
        self.layer(kind).visible
    }

    /// Snapshot of a single layer
    #[must_use]
    pub fn layer_snapshot(&self, kind: LayerKind) -> LayerSnapshot {
        self.layer(kind).snapshot()
    }

    /// Snapshot of every layer, bottom to top
    #[must_use]
    pub fn snapshot(&self) -> Vec<LayerSnapshot> {
        self.layers.iter().map(LayerState::snapshot).collect()
    }

    /// Stop every playback task
    pub fn shutdown(&mut self) {
        for layer in &mut self.layers {
            layer.abort();
            layer.play_head = PlayHead::Stopped;
        }
    }
}

impl Drop for Compositor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
