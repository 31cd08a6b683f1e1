//! Data models for Moodlog

mod attachment;
mod entry;
mod settings;
mod sync_metadata;

pub use attachment::{Attachment, AttachmentId, AttachmentKind};
pub use entry::{
    extract_tags, next_updated_at, normalize_tags, Entry, EntryContent, Mood, PendingDelete,
    SyncId,
};
pub use settings::Settings;
pub use sync_metadata::{SyncCursor, SyncMetadata};
