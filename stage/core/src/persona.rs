//! Personas
//!
//! A persona is a named, preconfigured interactive identity: the credential
//! reference handed to the issuer, the reference passed to the surface
//! provider, its candidate clips and the status lines shown while it thinks.
//!
//! Personas are loaded once with the configuration and never mutated. The
//! stage shares them as `Arc<Persona>` so a live session can hold on to its
//! persona without copying it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Persona identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonaId(pub String);

impl PersonaId {
    /// Create a persona ID from a string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PersonaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PersonaId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Reference to a concrete media asset (a clip file name)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetRef(pub String);

impl AssetRef {
    /// Create an asset reference
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the asset name
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AssetRef {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Opaque credential reference passed to the credential issuer
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialRef(pub String);

impl CredentialRef {
    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Which clip a persona is asked for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClipRole {
    /// Played while the session is being established
    Entry,
    /// Played when the persona is dismissed
    Exit,
    /// Replaces the ambient pool while the persona is on stage
    AmbientOverride,
}

/// Immutable persona descriptor
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Persona {
    /// Unique identifier used in activation requests
    pub id: PersonaId,

    /// Credential reference forwarded to the issuer
    pub credential_ref: CredentialRef,

    /// Reference forwarded to the surface provider (defaults to the ID)
    #[serde(default)]
    pub avatar_ref: Option<String>,

    /// Candidate entry clips (empty = no entry transition)
    #[serde(default)]
    pub entry_clips: Vec<AssetRef>,

    /// Candidate exit clips (empty = exit immediately)
    #[serde(default)]
    pub exit_clips: Vec<AssetRef>,

    /// Candidate ambient clips used while this persona is active
    #[serde(default)]
    pub ambient_override_clips: Vec<AssetRef>,

    /// Status lines rotated while the persona is thinking
    pub status_messages: Vec<String>,

    /// Display name
    #[serde(default)]
    pub name: Option<String>,

    /// Short title shown under the name
    #[serde(default)]
    pub title: Option<String>,

    /// Longer description
    #[serde(default)]
    pub description: Option<String>,

    /// Greeting line
    #[serde(default)]
    pub greeting: Option<String>,
}

impl Persona {
    /// Create a persona with only the required fields set
    pub fn new(
        id: impl Into<String>,
        credential_ref: impl Into<String>,
        status_messages: Vec<String>,
    ) -> Self {
        Self {
            id: PersonaId::new(id),
            credential_ref: CredentialRef(credential_ref.into()),
            avatar_ref: None,
            entry_clips: Vec::new(),
            exit_clips: Vec::new(),
            ambient_override_clips: Vec::new(),
            status_messages,
            name: None,
            title: None,
            description: None,
            greeting: None,
        }
    }

    /// Set the entry clip candidates
    #[must_use]
    pub fn with_entry_clips<I, S>(mut self, clips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entry_clips = clips.into_iter().map(AssetRef::new).collect();
        self
    }

    /// Set the exit clip candidates
    #[must_use]
    pub fn with_exit_clips<I, S>(mut self, clips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exit_clips = clips.into_iter().map(AssetRef::new).collect();
        self
    }

    /// Set the ambient override candidates
    #[must_use]
    pub fn with_ambient_override<I, S>(mut self, clips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ambient_override_clips = clips.into_iter().map(AssetRef::new).collect();
        self
    }

    /// Set the display name
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Candidate pool for a clip role
    #[must_use]
    pub fn clips(&self, role: ClipRole) -> &[AssetRef] {
        match role {
            ClipRole::Entry => &self.entry_clips,
            ClipRole::Exit => &self.exit_clips,
            ClipRole::AmbientOverride => &self.ambient_override_clips,
        }
    }

    /// Reference handed to the surface provider
    #[must_use]
    pub fn persona_ref(&self) -> &str {
        self.avatar_ref.as_deref().unwrap_or(self.id.as_str())
    }

    /// Name to show, falling back to the ID
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }

    /// Public metadata for listings
    #[must_use]
    pub fn info(&self) -> PersonaInfo {
        PersonaInfo {
            id: self.id.clone(),
            name: self.display_name().to_string(),
            title: self.title.clone(),
            description: self.description.clone(),
            greeting: self.greeting.clone(),
            has_avatar: self.avatar_ref.is_some(),
            has_entry_clip: !self.entry_clips.is_empty(),
            has_exit_clip: !self.exit_clips.is_empty(),
        }
    }
}

/// Display metadata about a persona, safe to hand to any controller
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaInfo {
    /// Persona ID
    pub id: PersonaId,
    /// Display name
    pub name: String,
    /// Title
    pub title: Option<String>,
    /// Description
    pub description: Option<String>,
    /// Greeting line
    pub greeting: Option<String>,
    /// Whether an explicit avatar reference is configured
    pub has_avatar: bool,
    /// Whether activation plays an entry transition
    pub has_entry_clip: bool,
    /// Whether dismissal plays an exit transition
    pub has_exit_clip: bool,
}

/// All configured personas, in configuration order
#[derive(Clone, Debug, Default)]
pub struct PersonaRegistry {
    personas: Vec<Arc<Persona>>,
    index: HashMap<PersonaId, usize>,
}

impl PersonaRegistry {
    /// Build a registry. A later persona with an already-seen ID is ignored;
    /// configuration loading rejects duplicates before this point.
    #[must_use]
    pub fn new(personas: Vec<Persona>) -> Self {
        let mut registry = Self::default();
        for persona in personas {
            if registry.index.contains_key(&persona.id) {
                tracing::warn!(persona = %persona.id, "Duplicate persona ignored");
                continue;
            }
            registry
                .index
                .insert(persona.id.clone(), registry.personas.len());
            registry.personas.push(Arc::new(persona));
        }
        registry
    }

    /// Look up a persona
    #[must_use]
    pub fn get(&self, id: &PersonaId) -> Option<Arc<Persona>> {
        self.index.get(id).map(|&i| Arc::clone(&self.personas[i]))
    }

    /// Whether a persona exists
    #[must_use]
    pub fn contains(&self, id: &PersonaId) -> bool {
        self.index.contains_key(id)
    }

    /// Persona IDs in configuration order
    #[must_use]
    pub fn ids(&self) -> Vec<PersonaId> {
        self.personas.iter().map(|p| p.id.clone()).collect()
    }

    /// Metadata for every persona
    #[must_use]
    pub fn info(&self) -> Vec<PersonaInfo> {
        self.personas.iter().map(|p| p.info()).collect()
    }

    /// Number of personas
    #[must_use]
    pub fn len(&self) -> usize {
        self.personas.len()
    }

    /// Whether no personas are configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }
}
