//! Shared fixtures for the stage integration tests
//!
//! Every test runs on a paused tokio clock, so durations below are exact.
//! Each test binary compiles its own copy, so helpers only one of them uses
//! carry `#[allow(dead_code)]`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::Instant;

use stage_core::{
    AssetRef, AssetSelector, ClipCatalog, ClockedPlayer, CredentialIssuer, LayerKind, MediaError,
    MediaPlayer, Persona, SimulatedSurfaceProvider, Stage, StageConfig, StageHandle,
    StageNotification, StageParts, StageState, StateChange, StaticCredentialIssuer,
};

// =============================================================================
// Recording player
// =============================================================================

#[derive(Default)]
struct Recording {
    visible: HashSet<LayerKind>,
    shows: Vec<LayerKind>,
    hides: Vec<LayerKind>,
    exclusivity_violations: usize,
}

/// Clocked player that records every visibility change
pub struct RecordingPlayer {
    inner: ClockedPlayer,
    recording: Mutex<Recording>,
}

impl RecordingPlayer {
    pub fn new(catalog: ClipCatalog) -> Self {
        Self {
            inner: ClockedPlayer::new(catalog),
            recording: Mutex::new(Recording::default()),
        }
    }

    /// How many times a layer was hidden
    pub fn hide_count(&self, layer: LayerKind) -> usize {
        self.recording.lock().hides.iter().filter(|&&l| l == layer).count()
    }

    /// How many times a layer was shown
    #[allow(dead_code)]
    pub fn show_count(&self, layer: LayerKind) -> usize {
        self.recording.lock().shows.iter().filter(|&&l| l == layer).count()
    }

    /// Whether the player currently shows a layer
    #[allow(dead_code)]
    pub fn is_visible(&self, layer: LayerKind) -> bool {
        self.recording.lock().visible.contains(&layer)
    }

    /// Times Transition and InteractiveSurface were visible together
    pub fn exclusivity_violations(&self) -> usize {
        self.recording.lock().exclusivity_violations
    }
}

#[async_trait]
impl MediaPlayer for RecordingPlayer {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn play(&self, layer: LayerKind, asset: &AssetRef) -> Result<(), MediaError> {
        self.inner.play(layer, asset).await
    }

    fn set_visible(&self, layer: LayerKind, visible: bool) {
        let mut rec = self.recording.lock();
        if visible {
            rec.visible.insert(layer);
            rec.shows.push(layer);
        } else {
            rec.visible.remove(&layer);
            rec.hides.push(layer);
        }
        if rec.visible.contains(&LayerKind::Transition)
            && rec.visible.contains(&LayerKind::InteractiveSurface)
        {
            rec.exclusivity_violations += 1;
        }
    }

    fn release(&self, _layer: LayerKind) {}
}

// =============================================================================
// Fixture configuration
// =============================================================================

pub const FALLBACK: Duration = Duration::from_millis(8000);
#[allow(dead_code)]
pub const STATUS_INTERVAL: Duration = Duration::from_millis(2500);

pub fn catalog() -> ClipCatalog {
    ClipCatalog::new()
        .with_clip("forest_day.mp4", Duration::from_secs(60))
        .with_clip("fireflies.mp4", Duration::from_secs(45))
        .with_clip("fog.mp4", Duration::from_secs(50))
        .with_clip("bigfoot_in.mp4", Duration::from_millis(2000))
        .with_clip("bigfoot_out.mp4", Duration::from_millis(1500))
        .with_clip("hazel_in.mp4", Duration::from_millis(1000))
        .with_clip("mabel_in.mp4", Duration::from_millis(2000))
}

pub fn personas() -> Vec<Persona> {
    vec![
        Persona::new(
            "bigfoot",
            "cred-bigfoot",
            vec!["Sniffing the air...".into(), "Checking the trail...".into()],
        )
        .with_entry_clips(["bigfoot_in.mp4"])
        .with_exit_clips(["bigfoot_out.mp4"]),
        Persona::new("riley", "cred-riley", vec!["Thinking...".into()]),
        Persona::new("hazel", "cred-hazel", vec!["One moment...".into()])
            .with_entry_clips(["hazel_in.mp4"]),
        Persona::new("mabel", "cred-mabel", vec!["Hmm...".into()])
            .with_entry_clips(["mabel_in.mp4"]),
        Persona::new("ghost", "cred-ghost", vec!["...".into()])
            .with_entry_clips(["ghost_in_missing.mp4"]),
    ]
}

pub fn config() -> StageConfig {
    let mut config = StageConfig::default();
    config.timing.fallback = FALLBACK;
    config.timing.status_interval = STATUS_INTERVAL;
    config.ambient = vec![AssetRef::from("forest_day.mp4")];
    config.overlay_top = vec![AssetRef::from("fireflies.mp4")];
    config.overlay_bottom = vec![AssetRef::from("fog.mp4")];
    config.personas = personas();
    config
}

// =============================================================================
// Harness
// =============================================================================

/// A running stage plus everything needed to observe it
pub struct Harness {
    pub handle: StageHandle,
    pub notes: broadcast::Receiver<StageNotification>,
    pub player: Arc<RecordingPlayer>,
    pub provider: SimulatedSurfaceProvider,
    pub start: Instant,
}

impl Harness {
    /// Stage with an always-succeeding issuer
    pub async fn start(provider: SimulatedSurfaceProvider) -> Self {
        Self::start_with(provider, StaticCredentialIssuer::new("session-token")).await
    }

    /// Stage with a specific issuer
    #[allow(dead_code)]
    pub async fn start_with(
        provider: SimulatedSurfaceProvider,
        issuer: impl CredentialIssuer + 'static,
    ) -> Self {
        let player = Arc::new(RecordingPlayer::new(catalog()));
        let parts = StageParts::new(
            config(),
            Arc::new(issuer),
            Arc::new(provider.clone()),
            Arc::clone(&player) as Arc<dyn MediaPlayer>,
        )
        .with_selector(AssetSelector::seeded(11));

        let handle = Stage::spawn(parts);
        let notes = handle.subscribe();
        handle.settle().await.unwrap();

        Self {
            handle,
            notes,
            player,
            provider,
            start: Instant::now(),
        }
    }

    /// Time since the harness started
    #[allow(dead_code)]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Offset of a state change from the harness start
    pub fn offset(&self, change: &StateChange) -> Duration {
        change.at.duration_since(self.start)
    }

    /// Next state change, skipping status updates and rejections
    pub async fn next_change(&mut self) -> StateChange {
        loop {
            match self.notes.recv().await.unwrap() {
                StageNotification::StateChanged(change) => return change,
                StageNotification::Status { .. } | StageNotification::Rejected { .. } => {}
            }
        }
    }

    /// Next state change into `state`
    pub async fn wait_for(&mut self, state: StageState) -> StateChange {
        loop {
            let change = self.next_change().await;
            if change.state == state {
                return change;
            }
        }
    }

    /// Next notification of any kind
    #[allow(dead_code)]
    pub async fn next_note(&mut self) -> StageNotification {
        self.notes.recv().await.unwrap()
    }

    /// State changes already delivered, without waiting
    pub fn drain_changes(&mut self) -> Vec<StateChange> {
        let mut changes = Vec::new();
        loop {
            match self.notes.try_recv() {
                Ok(StageNotification::StateChanged(change)) => changes.push(change),
                Ok(_) => {}
                Err(TryRecvError::Empty | TryRecvError::Closed) => return changes,
                Err(TryRecvError::Lagged(n)) => panic!("notification receiver lagged by {n}"),
            }
        }
    }
}
