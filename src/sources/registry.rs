//! Snapshot of the configured source remotes.
//!
//! The registry itself (credential entries, metadata edits) is owned by the
//! settings layer. A sync run only ever sees a read-only snapshot: the list of
//! [`SourceRemote`]s in caller order plus the per-remote [`RemoteMetadata`].
//!
//! Metadata is persisted as a small JSON map keyed by remote name:
//!
//! ```json
//! {
//!   "gdrive1": { "kind": "subfolder", "subfolder": "notes" },
//!   "box": { "kind": "full" }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Source name that is never mirrored.
///
/// Kept as a single special case; other names are not reserved.
pub const RESERVED_SOURCE_NAME: &str = "remotes";

/// Storage provider behind a remote.
///
/// Opaque to the sync engine apart from display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Drive,
    OneDrive,
    Box,
    Dropbox,
    Local,
    #[default]
    #[serde(other)]
    Other,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Drive => write!(f, "drive"),
            Self::OneDrive => write!(f, "onedrive"),
            Self::Box => write!(f, "box"),
            Self::Dropbox => write!(f, "dropbox"),
            Self::Local => write!(f, "local"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// A configured source remote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRemote {
    /// Remote name, matching a section of the merged rclone config.
    pub name: String,
    /// Provider kind.
    #[serde(default)]
    pub kind: ProviderKind,
    /// Optional relative path restricting what gets mirrored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subfolder: Option<String>,
}

impl SourceRemote {
    /// Create a source covering the whole remote.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Restrict the source to a subfolder.
    pub fn with_subfolder(mut self, subfolder: impl Into<String>) -> Self {
        self.subfolder = Some(subfolder.into());
        self
    }

    pub fn with_kind(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }

    /// Whether this is the reserved `remotes` entry.
    pub fn is_reserved(&self) -> bool {
        self.name == RESERVED_SOURCE_NAME
    }
}

/// How much of a remote is mirrored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    /// The whole remote.
    #[default]
    Full,
    /// Only the recorded subfolder.
    Subfolder,
}

/// Metadata recorded per remote, independent of its credential entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMetadata {
    #[serde(default)]
    pub kind: ScopeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subfolder: Option<String>,
}

impl RemoteMetadata {
    pub fn subfolder(path: impl Into<String>) -> Self {
        Self {
            kind: ScopeKind::Subfolder,
            subfolder: Some(path.into()),
        }
    }

    /// Subfolder restriction, if the recorded kind says there is one.
    pub fn restriction(&self) -> Option<&str> {
        match self.kind {
            ScopeKind::Subfolder => self
                .subfolder
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty()),
            ScopeKind::Full => None,
        }
    }
}

/// Metadata for every remote, keyed by remote name.
pub type MetadataMap = HashMap<String, RemoteMetadata>;

/// Resolve the subfolder restriction for a source.
///
/// Recorded metadata wins when there is an entry for the name; otherwise the
/// subfolder carried on the source itself is used.
pub fn resolve_subfolder<'a>(
    source: &'a SourceRemote,
    metadata: &'a MetadataMap,
) -> Option<&'a str> {
    match metadata.get(&source.name) {
        Some(meta) => meta.restriction(),
        None => source
            .subfolder
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty()),
    }
}

/// Errors reading or writing the metadata file.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("failed to read metadata file: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Load remote metadata from disk.
///
/// A missing file is an empty map.
pub fn load_metadata(path: &Path) -> Result<MetadataMap, RegistryError> {
    if !path.exists() {
        return Ok(MetadataMap::new());
    }
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(MetadataMap::new());
    }
    Ok(serde_json::from_str(&content)?)
}

/// Save remote metadata to disk, creating parent directories.
pub fn save_metadata(path: &Path, metadata: &MetadataMap) -> Result<(), RegistryError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(metadata)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_restriction() {
        assert_eq!(RemoteMetadata::subfolder("notes").restriction(), Some("notes"));
        assert_eq!(RemoteMetadata::subfolder("  ").restriction(), None);

        let full = RemoteMetadata {
            kind: ScopeKind::Full,
            subfolder: Some("ignored".into()),
        };
        assert_eq!(full.restriction(), None);
    }

    #[test]
    fn test_resolve_subfolder_prefers_metadata() {
        let source = SourceRemote::new("gdrive1").with_subfolder("from-source");
        let mut metadata = MetadataMap::new();
        assert_eq!(resolve_subfolder(&source, &metadata), Some("from-source"));

        metadata.insert("gdrive1".into(), RemoteMetadata::subfolder("notes"));
        assert_eq!(resolve_subfolder(&source, &metadata), Some("notes"));

        metadata.insert("gdrive1".into(), RemoteMetadata::default());
        assert_eq!(resolve_subfolder(&source, &metadata), None);
    }

    #[test]
    fn test_reserved_name() {
        assert!(SourceRemote::new("remotes").is_reserved());
        assert!(!SourceRemote::new("Remotes").is_reserved());
        assert!(!SourceRemote::new("gdrive1").is_reserved());
    }

    #[test]
    fn test_provider_kind_unknown_deserializes_to_other() {
        let kind: ProviderKind = serde_json::from_str("\"s3\"").unwrap();
        assert_eq!(kind, ProviderKind::Other);
        let kind: ProviderKind = serde_json::from_str("\"onedrive\"").unwrap();
        assert_eq!(kind, ProviderKind::OneDrive);
    }

    #[test]
    fn test_metadata_roundtrip_on_disk() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("metadata.json");

        assert!(load_metadata(&path).unwrap().is_empty());

        let mut metadata = MetadataMap::new();
        metadata.insert("gdrive1".into(), RemoteMetadata::subfolder("notes"));
        save_metadata(&path, &metadata).unwrap();

        let loaded = load_metadata(&path).unwrap();
        assert_eq!(loaded, metadata);
    }

    #[test]
    fn test_metadata_parse_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("metadata.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(load_metadata(&path), Err(RegistryError::Parse(_))));
    }
}
