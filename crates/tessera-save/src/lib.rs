//! Versioned, hashed save files for Tessera worlds.
//!
//! A [`SaveFile`] wraps a [`SnapshotDocument`] with a format version and a
//! BLAKE3 hex digest of the document's canonical JSON. Reading a file checks
//! both before anything is decoded, so a corrupted or hand-edited save is
//! rejected instead of half-restored.
//!
//! # Usage
//!
//! ```
//! use tessera_ecs::prelude::*;
//! use tessera_save::SaveFile;
//!
//! #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
//! struct Score(u32);
//! impl Component for Score {}
//!
//! let builder = || WorldBuilder::new().register_component::<Score>("score");
//!
//! let mut world = builder().build(None);
//! let e = world.create_entity();
//! world.add_component(e, Score(7)).unwrap();
//!
//! let save = SaveFile::capture(&world.save()).unwrap();
//! assert_eq!(save.hash.len(), 64);
//!
//! let template = builder();
//! let snapshot = save.into_snapshot(template.registry()).unwrap();
//! let restored = template.build(Some(snapshot));
//! assert_eq!(restored.get_component::<Score>(e), Some(&Score(7)));
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tessera_ecs::component::ComponentRegistry;
use tessera_ecs::snapshot::{Snapshot, SnapshotDocument};
use tessera_ecs::EcsError;

/// Current save format version.
pub const FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced while writing or reading save files.
#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    /// Filesystem failure.
    #[error("save file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid save-file JSON.
    #[error("save file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The file was written by an incompatible format version.
    #[error("save format version {found} is not supported (expected {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// The recorded digest does not match the document.
    #[error(
        "save file hash mismatch: recorded {recorded} but recomputed {computed}. \
         The file may be corrupted or tampered with."
    )]
    HashMismatch { recorded: String, computed: String },

    /// The document could not be decoded into a snapshot.
    #[error(transparent)]
    Ecs(#[from] EcsError),
}

// ---------------------------------------------------------------------------
// SaveFile
// ---------------------------------------------------------------------------

/// On-disk form of a world snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveFile {
    /// Format version; see [`FORMAT_VERSION`].
    pub version: u32,
    /// Live entities and encoded components.
    pub world: SnapshotDocument,
    /// BLAKE3 hex digest (64 lowercase hex chars) of `world`'s JSON.
    pub hash: String,
}

/// BLAKE3 hex digest of the document's JSON. Component maps are ordered, so
/// equal documents hash equally.
fn compute_hash(document: &SnapshotDocument) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(document)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

impl SaveFile {
    /// Encode `snapshot` and stamp it with the current version and digest.
    ///
    /// # Errors
    ///
    /// Returns [`SaveError::Ecs`] if a component fails to encode.
    pub fn capture(snapshot: &Snapshot) -> Result<Self, SaveError> {
        let world = snapshot.to_document()?;
        let hash = compute_hash(&world)?;
        Ok(Self {
            version: FORMAT_VERSION,
            world,
            hash,
        })
    }

    /// Check the version and recompute the digest.
    ///
    /// # Errors
    ///
    /// [`SaveError::UnsupportedVersion`] or [`SaveError::HashMismatch`].
    pub fn verify(&self) -> Result<(), SaveError> {
        if self.version != FORMAT_VERSION {
            return Err(SaveError::UnsupportedVersion {
                found: self.version,
                supported: FORMAT_VERSION,
            });
        }
        let computed = compute_hash(&self.world)?;
        if computed != self.hash {
            return Err(SaveError::HashMismatch {
                recorded: self.hash.clone(),
                computed,
            });
        }
        Ok(())
    }

    /// Write as pretty-printed JSON to `path`.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), SaveError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        tracing::debug!(
            path = %path.display(),
            entities = self.world.live.len(),
            hash = %self.hash,
            "wrote save file"
        );
        Ok(())
    }

    /// Read and verify a save file.
    ///
    /// # Errors
    ///
    /// I/O and JSON failures, plus everything [`verify`](Self::verify)
    /// reports.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, SaveError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let save: SaveFile = serde_json::from_str(&text)?;
        save.verify()?;
        tracing::debug!(
            path = %path.display(),
            entities = save.world.live.len(),
            "read save file"
        );
        Ok(save)
    }

    /// Decode into a [`Snapshot`] using `registry`'s component codecs.
    ///
    /// # Errors
    ///
    /// Returns [`SaveError::Ecs`] if the document names an unregistered
    /// component or a value fails to decode.
    pub fn into_snapshot(self, registry: &ComponentRegistry) -> Result<Snapshot, SaveError> {
        Ok(Snapshot::from_document(&self.world, registry)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
