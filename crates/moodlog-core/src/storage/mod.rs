//! Object storage for attachment payloads.

mod memory;
mod r2;

pub use memory::MemoryContentStore;
pub use r2::{R2Config, R2Storage};

use chrono::Utc;
use uuid::Uuid;

use crate::models::AttachmentKind;
use crate::{Error, Result};

/// Destination for attachment bytes.
#[allow(async_fn_in_trait)]
pub trait ContentStore {
    /// Store `bytes` under `object_key`, replacing any existing object.
    async fn put_object(
        &self,
        object_key: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<()>;
}

/// Build a unique object key for an attachment payload.
///
/// Keys look like `entries/{entry}/{kind}/{ts}-{uuid}-{file}`. Thumbnails get
/// a `thumb-` file prefix under their original's kind.
pub fn build_object_key(
    entry_key: &str,
    kind: AttachmentKind,
    file_name: &str,
    thumbnail: bool,
) -> Result<String> {
    let entry_key = sanitize_token(entry_key);
    if entry_key.is_empty() {
        return Err(Error::InvalidInput(
            "Attachment entry key cannot be empty".to_string(),
        ));
    }

    let file_name = sanitize_file_name(file_name);
    let file_name = if thumbnail {
        format!("thumb-{file_name}")
    } else {
        file_name
    };
    let ts = Utc::now().timestamp_millis();
    let id = Uuid::now_v7();

    Ok(format!("entries/{entry_key}/{kind}/{ts}-{id}-{file_name}"))
}

pub(crate) fn normalize_object_key(object_key: &str) -> Result<String> {
    let object_key = object_key.trim().trim_matches('/').to_string();
    if object_key.is_empty() {
        return Err(Error::InvalidInput(
            "Attachment object_key cannot be empty".to_string(),
        ));
    }
    Ok(object_key)
}

pub(crate) fn normalize_content_type(content_type: Option<&str>) -> Option<String> {
    content_type
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn sanitize_file_name(file_name: &str) -> String {
    let trimmed = file_name.trim().trim_matches('/');
    if trimmed.is_empty() {
        return "file".to_string();
    }

    let (stem, ext) = trimmed
        .rsplit_once('.')
        .map_or((trimmed, ""), |parts| parts);
    let stem = sanitize_token(stem);
    let stem = if stem.is_empty() {
        "file".to_string()
    } else {
        stem
    };
    let ext = sanitize_token(ext);

    if ext.is_empty() {
        stem
    } else {
        format!("{stem}.{ext}")
    }
}

fn sanitize_token(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut last_dash = false;

    for ch in input.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }

    out.trim_matches('-').to_string()
}
