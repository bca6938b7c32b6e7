//! File records and the file lifecycle state machine.

use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unique identifier for a registered file.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(Uuid);

impl FileId {
    /// Generate a new random file ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidId(format!("invalid file ID: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Digest of a complete assembled file.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileHash(ContentHash);

impl FileHash {
    pub fn from_content_hash(hash: ContentHash) -> Self {
        Self(hash)
    }

    pub fn content_hash(&self) -> &ContentHash {
        &self.0
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        Ok(Self(ContentHash::from_hex(s)?))
    }

    /// Encode as hex string.
    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }

    /// Object store key of the assembled file.
    pub fn to_object_key(&self) -> String {
        self.0.fanout_key("files")
    }
}

impl fmt::Debug for FileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for FileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// File lifecycle state.
///
/// States only ever advance: `Incomplete -> Processing -> Finished`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    /// Registered; chunks are still arriving.
    Incomplete,
    /// All chunks committed and finalization claimed.
    Processing,
    /// Finalization succeeded.
    Finished,
}

impl FileState {
    /// The only state from which `self` may be entered.
    pub fn predecessor(self) -> Option<FileState> {
        match self {
            Self::Incomplete => None,
            Self::Processing => Some(Self::Incomplete),
            Self::Finished => Some(Self::Processing),
        }
    }

    /// Check whether a direct transition to `next` is allowed.
    pub fn can_advance_to(self, next: FileState) -> bool {
        next.predecessor() == Some(self)
    }

    /// Check whether chunks may still be added.
    pub fn accepts_chunks(self) -> bool {
        matches!(self, Self::Incomplete)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Incomplete => "incomplete",
            Self::Processing => "processing",
            Self::Finished => "finished",
        }
    }

    /// Parse the persisted string form.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "incomplete" => Ok(Self::Incomplete),
            "processing" => Ok(Self::Processing),
            "finished" => Ok(Self::Finished),
            other => Err(crate::Error::InvalidState(other.to_string())),
        }
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub id: FileId,
    /// Digest of the complete file; unique across the registry.
    pub hash: FileHash,
    /// Total size in bytes.
    pub size: u64,
    /// Number of chunks the client declared it will send.
    pub num_chunks: u32,
    pub name: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub state: FileState,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Registration request for a new file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegisterFile {
    /// Hex digest of the complete file.
    pub hash: String,
    pub size: u64,
    #[serde(alias = "chunks")]
    pub num_chunks: u32,
    pub name: String,
    #[serde(rename = "type", default)]
    pub content_type: String,
}

impl RegisterFile {
    /// Validate the descriptor and return the parsed whole-file hash.
    pub fn validate(&self) -> crate::Result<FileHash> {
        if self.num_chunks < 1 {
            return Err(crate::Error::InvalidDescriptor(
                "num_chunks must be at least 1".to_string(),
            ));
        }
        // Every chunk carries at least one byte.
        if self.size < u64::from(self.num_chunks) {
            return Err(crate::Error::InvalidDescriptor(format!(
                "size {} cannot hold {} non-empty chunks",
                self.size, self.num_chunks
            )));
        }
        if self.name.trim().is_empty() {
            return Err(crate::Error::InvalidDescriptor(
                "name must not be empty".to_string(),
            ));
        }
        FileHash::from_hex(&self.hash.to_ascii_lowercase())
    }
}
