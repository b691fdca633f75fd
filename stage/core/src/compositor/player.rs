//! Media Player Seam
//!
//! The compositor decides *what* plays on which layer; a [`MediaPlayer`]
//! decides *how*. A browser surface would drive `<video>` elements, a native
//! surface a decoder pipeline. [`ClockedPlayer`] is the headless player: a
//! clip "plays" for the duration listed in its catalog.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::LayerKind;
use crate::persona::AssetRef;

/// Errors starting or running playback
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    /// The asset is unknown to the player
    #[error("asset not found: {0}")]
    AssetMissing(AssetRef),

    /// Playback started but could not continue
    #[error("playback of {asset} failed: {reason}")]
    Playback {
        /// Asset that failed
        asset: AssetRef,
        /// Player-specific reason
        reason: String,
    },
}

/// Rendering backend for the compositor's layers
#[async_trait]
pub trait MediaPlayer: Send + Sync {
    /// Player name for diagnostics
    fn name(&self) -> &str;

    /// Mount `asset` on `layer` and play it once.
    ///
    /// Resolves when playback reaches its natural end. Returns an error if
    /// the asset cannot be started. Dropping the future stops playback.
    async fn play(&self, layer: LayerKind, asset: &AssetRef) -> Result<(), MediaError>;

    /// Show or hide a layer
    fn set_visible(&self, layer: LayerKind, visible: bool);

    /// Release whatever the layer has mounted
    fn release(&self, layer: LayerKind);
}

/// Known clips and their durations
#[derive(Clone, Debug, Default)]
pub struct ClipCatalog {
    durations: HashMap<AssetRef, Duration>,
}

impl ClipCatalog {
    /// Create an empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an existing map
    #[must_use]
    pub fn from_durations(durations: HashMap<AssetRef, Duration>) -> Self {
        Self { durations }
    }

    /// Add a clip
    #[must_use]
    pub fn with_clip(mut self, name: impl Into<String>, duration: Duration) -> Self {
        self.durations.insert(AssetRef::new(name), duration);
        self
    }

    /// Duration of a clip, if known
    #[must_use]
    pub fn duration(&self, asset: &AssetRef) -> Option<Duration> {
        self.durations.get(asset).copied()
    }

    /// Number of clips
    #[must_use]
    pub fn len(&self) -> usize {
        self.durations.len()
    }

    /// Whether the catalog is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.durations.is_empty()
    }
}

/// Headless player driven by the runtime clock
#[derive(Clone, Debug, Default)]
pub struct ClockedPlayer {
    catalog: ClipCatalog,
}

impl ClockedPlayer {
    /// Create a player over a catalog
    #[must_use]
    pub fn new(catalog: ClipCatalog) -> Self {
        Self { catalog }
    }

    /// The catalog this player plays from
    #[must_use]
    pub fn catalog(&self) -> &ClipCatalog {
        &self.catalog
    }
}

#[async_trait]
impl MediaPlayer for ClockedPlayer {
    fn name(&self) -> &'static str {
        "clocked"
    }

    async fn play(&self, layer: LayerKind, asset: &AssetRef) -> Result<(), MediaError> {
        let duration = self
            .catalog
            .duration(asset)
            .ok_or_else(|| MediaError::AssetMissing(asset.clone()))?;

        tracing::trace!(?layer, %asset, ms = duration.as_millis(), "Clip started");
        tokio::time::sleep(duration).await;
        tracing::trace!(?layer, %asset, "Clip ended");
        Ok(())
    }

    fn set_visible(&self, layer: LayerKind, visible: bool) {
        tracing::trace!(?layer, visible, "Layer visibility");
    }

    fn release(&self, layer: LayerKind) {
        tracing::trace!(?layer, "Layer released");
    }
}
