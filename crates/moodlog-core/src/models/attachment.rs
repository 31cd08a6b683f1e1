//! Attachment model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::entry::SyncId;

/// A unique identifier for an attachment, using UUID v7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentId(Uuid);

impl AttachmentId {
    /// Create a new unique attachment ID using UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID.
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for AttachmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AttachmentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// What an uploaded object holds.
///
/// Thumbnails are their own kind so that they deduplicate independently of
/// the original they were derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Photo,
    Audio,
    Video,
    File,
    Thumbnail,
}

impl AttachmentKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::File => "file",
            Self::Thumbnail => "thumbnail",
        }
    }

    /// Guess a kind from a MIME type.
    #[must_use]
    pub fn from_mime_type(mime_type: &str) -> Self {
        let mime_type = mime_type.trim().to_ascii_lowercase();
        if mime_type.starts_with("image/") {
            Self::Photo
        } else if mime_type.starts_with("audio/") {
            Self::Audio
        } else if mime_type.starts_with("video/") {
            Self::Video
        } else {
            Self::File
        }
    }
}

impl fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttachmentKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "photo" => Ok(Self::Photo),
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            "file" => Ok(Self::File),
            "thumbnail" => Ok(Self::Thumbnail),
            other => Err(Error::InvalidInput(format!(
                "Unknown attachment kind: {other}"
            ))),
        }
    }
}

/// Locally stored binary attachment belonging to an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Unique attachment identifier.
    pub id: AttachmentId,
    /// Owning entry.
    pub entry_id: SyncId,
    /// Attachment kind.
    pub kind: AttachmentKind,
    /// Content MIME type.
    pub mime_type: String,
    /// Payload size in bytes.
    pub size_bytes: i64,
    /// Payload location on this device.
    pub local_path: PathBuf,
    /// Optional thumbnail location on this device.
    pub thumbnail_path: Option<PathBuf>,
    /// Thumbnail size in bytes.
    pub thumbnail_size_bytes: Option<i64>,
    /// Creation timestamp (Unix ms).
    pub created_at: i64,
}

impl Attachment {
    /// Create a new attachment record.
    pub fn new(
        entry_id: SyncId,
        kind: AttachmentKind,
        mime_type: impl Into<String>,
        size_bytes: i64,
        local_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let mime_type = mime_type.into().trim().to_string();
        let local_path = local_path.into();

        if mime_type.is_empty() {
            return Err(Error::InvalidInput(
                "Attachment mime_type cannot be empty".to_string(),
            ));
        }
        if local_path.as_os_str().is_empty() {
            return Err(Error::InvalidInput(
                "Attachment path cannot be empty".to_string(),
            ));
        }
        if size_bytes < 0 {
            return Err(Error::InvalidInput(
                "Attachment size_bytes cannot be negative".to_string(),
            ));
        }
        if kind == AttachmentKind::Thumbnail {
            return Err(Error::InvalidInput(
                "Thumbnails are attached to an original, not stored on their own".to_string(),
            ));
        }

        Ok(Self {
            id: AttachmentId::new(),
            entry_id,
            kind,
            mime_type,
            size_bytes,
            local_path,
            thumbnail_path: None,
            thumbnail_size_bytes: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        })
    }

    /// Attach a thumbnail file.
    #[must_use]
    pub fn with_thumbnail(mut self, path: impl Into<PathBuf>, size_bytes: i64) -> Self {
        self.thumbnail_path = Some(path.into());
        self.thumbnail_size_bytes = Some(size_bytes.max(0));
        self
    }

    /// File name of the payload, for object key building.
    #[must_use]
    pub fn file_name(&self) -> String {
        self.local_path
            .file_name()
            .map_or_else(|| "file".to_string(), |name| name.to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attachment_id_parse() {
        let id = AttachmentId::new();
        let parsed: AttachmentId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_attachment_new() {
        let attachment = Attachment::new(
            SyncId::new(),
            AttachmentKind::Photo,
            "image/png",
            1234,
            "/tmp/sunrise.png",
        )
        .unwrap()
        .with_thumbnail("/tmp/sunrise-thumb.png", 120);

        assert_eq!(attachment.mime_type, "image/png");
        assert_eq!(attachment.size_bytes, 1234);
        assert_eq!(attachment.file_name(), "sunrise.png");
        assert_eq!(attachment.thumbnail_size_bytes, Some(120));
    }

    #[test]
    fn test_attachment_validation() {
        let entry_id = SyncId::new();

        assert!(Attachment::new(entry_id, AttachmentKind::Photo, "", 1, "a.png").is_err());
        assert!(Attachment::new(entry_id, AttachmentKind::Photo, "image/png", 1, "").is_err());
        assert!(Attachment::new(entry_id, AttachmentKind::Photo, "image/png", -1, "a").is_err());
        assert!(Attachment::new(entry_id, AttachmentKind::Thumbnail, "image/png", 1, "a").is_err());
    }

    #[test]
    fn test_kind_from_mime_type() {
        assert_eq!(AttachmentKind::from_mime_type("image/jpeg"), AttachmentKind::Photo);
        assert_eq!(AttachmentKind::from_mime_type("audio/wav"), AttachmentKind::Audio);
        assert_eq!(AttachmentKind::from_mime_type("video/mp4"), AttachmentKind::Video);
        assert_eq!(AttachmentKind::from_mime_type("application/pdf"), AttachmentKind::File);
        assert_eq!("PHOTO".parse::<AttachmentKind>().unwrap(), AttachmentKind::Photo);
    }
}
