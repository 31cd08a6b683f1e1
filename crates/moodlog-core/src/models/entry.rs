//! Journal entry model

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Stable sync identifier for an entry, using UUID v7 (time-sortable).
///
/// Generated once when the entry is created and never reused; every device
/// agrees on it, unlike the device-local row id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SyncId(Uuid);

impl SyncId {
    /// Create a new unique sync ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SyncId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SyncId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s.trim())?))
    }
}

/// Mood score from 1 (worst) to 5 (best).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Mood(u8);

impl Mood {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }
}

impl Default for Mood {
    fn default() -> Self {
        Self(3)
    }
}

impl TryFrom<u8> for Mood {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(Error::InvalidInput(format!(
                "Mood must be between {} and {}, got {value}",
                Self::MIN,
                Self::MAX
            )))
        }
    }
}

impl TryFrom<i64> for Mood {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self> {
        let value = u8::try_from(value)
            .map_err(|_| Error::InvalidInput(format!("Mood out of range: {value}")))?;
        Self::try_from(value)
    }
}

impl From<Mood> for u8 {
    fn from(mood: Mood) -> Self {
        mood.0
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User-editable and derived content of an entry.
///
/// This is exactly the set of fields that travels to the remote mirror and is
/// replaced wholesale when a newer remote version wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryContent {
    /// Day the entry is about
    pub date: NaiveDate,
    /// Free text body
    pub text: String,
    /// Self-reported mood
    pub mood: Mood,
    /// Normalized tag set
    pub tags: Vec<String>,
    /// Private entries stay on the device unless private sync is enabled
    pub is_private: bool,
    /// Mood suggested by text analysis
    pub ai_mood: Option<Mood>,
    /// Tags suggested by text analysis
    pub ai_tags: Vec<String>,
    /// Optional derived title
    pub title: Option<String>,
}

impl EntryContent {
    /// Content for today with the given text and mood.
    ///
    /// Hashtags found in the text are merged into the tag set.
    #[must_use]
    pub fn new(text: impl Into<String>, mood: Mood) -> Self {
        let text = text.into();
        let tags = extract_tags(&text);
        Self {
            date: chrono::Local::now().date_naive(),
            text,
            mood,
            tags,
            is_private: false,
            ai_mood: None,
            ai_tags: Vec::new(),
            title: None,
        }
    }

    /// Get first line as title preview, truncated to `max_len` characters
    #[must_use]
    pub fn title_preview(&self, max_len: usize) -> String {
        self.title
            .as_deref()
            .unwrap_or_else(|| self.text.lines().next().unwrap_or(""))
            .chars()
            .take(max_len)
            .collect()
    }

    /// Normalize tags in place (see [`normalize_tags`]).
    pub fn normalize(&mut self) {
        let mut tags = self.tags.clone();
        tags.extend(extract_tags(&self.text));
        self.tags = normalize_tags(tags);
        self.ai_tags = normalize_tags(self.ai_tags.clone());
        self.title = crate::util::normalize_text_option(self.title.take());
    }
}

/// A journal entry as stored on this device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Device-local row id, meaningless on other devices
    pub local_id: i64,
    /// Stable identifier shared by every device
    pub sync_id: SyncId,
    /// Entry content
    pub content: EntryContent,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last modification timestamp (Unix ms), bumped on every local edit
    pub updated_at: i64,
    /// `updated_at` as of the last confirmed push (Unix ms, 0 = never pushed)
    pub sync_updated_at: i64,
}

impl Entry {
    /// Whether this entry has local changes the remote mirror has not seen.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.updated_at > self.sync_updated_at
    }

    /// Whether this entry has reached the remote mirror at least once.
    #[must_use]
    pub const fn was_synced(&self) -> bool {
        self.sync_updated_at > 0
    }
}

/// Local deletion waiting for the remote mirror to acknowledge it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDelete {
    /// Deleted entry
    pub sync_id: SyncId,
    /// Deletion timestamp (Unix ms)
    pub deleted_at: i64,
}

/// Next `updated_at` value for a local mutation.
///
/// Never goes backwards, even if the wall clock does.
#[must_use]
pub fn next_updated_at(previous: i64, now: i64) -> i64 {
    now.max(previous.saturating_add(1))
}

/// Trim, lowercase, deduplicate and sort tags, dropping empties and a
/// leading `#`.
#[must_use]
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .map(|tag| tag.as_ref().trim().trim_start_matches('#').to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Extract #tags from text
///
/// Valid tags match the pattern: `#[a-zA-Z][a-zA-Z0-9_-]*`
/// Tags are returned in lowercase, deduplicated and sorted.
///
/// # Examples
///
/// ```
/// use moodlog_core::models::extract_tags;
///
/// let tags = extract_tags("Long walk #outdoors with #Family");
/// assert_eq!(tags, vec!["family".to_string(), "outdoors".to_string()]);
/// ```
#[must_use]
pub fn extract_tags(text: &str) -> Vec<String> {
    let re = Regex::new(r"#([a-zA-Z][a-zA-Z0-9_-]*)").expect("Invalid regex");
    normalize_tags(re.captures_iter(text).map(|cap| cap[1].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_id_unique() {
        let id1 = SyncId::new();
        let id2 = SyncId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_sync_id_parse() {
        let id = SyncId::new();
        let parsed: SyncId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_mood_bounds() {
        assert!(Mood::try_from(0_u8).is_err());
        assert!(Mood::try_from(6_u8).is_err());
        assert!(Mood::try_from(-1_i64).is_err());
        assert_eq!(Mood::try_from(5_u8).unwrap().value(), 5);
    }

    #[test]
    fn test_mood_deserialize_rejects_out_of_range() {
        assert!(serde_json::from_str::<Mood>("9").is_err());
        assert_eq!(serde_json::from_str::<Mood>("2").unwrap().value(), 2);
    }

    #[test]
    fn test_entry_content_new_collects_hashtags() {
        let content = EntryContent::new("Ran 5k #running #Outdoors", Mood::default());
        assert_eq!(content.tags, vec!["outdoors", "running"]);
        assert!(!content.is_private);
    }

    #[test]
    fn test_normalize_merges_explicit_and_text_tags() {
        let mut content = EntryContent::new("Quiet day #home", Mood::default());
        content.tags = vec![" Work ".to_string(), "#home".to_string(), String::new()];
        content.title = Some("   ".to_string());
        content.normalize();
        assert_eq!(content.tags, vec!["home", "work"]);
        assert_eq!(content.title, None);
    }

    #[test]
    fn test_title_preview_prefers_title() {
        let mut content = EntryContent::new("First line\nSecond", Mood::default());
        assert_eq!(content.title_preview(5), "First");
        content.title = Some("Sunday".to_string());
        assert_eq!(content.title_preview(50), "Sunday");
    }

    #[test]
    fn test_next_updated_at_is_monotonic() {
        assert_eq!(next_updated_at(100, 500), 500);
        assert_eq!(next_updated_at(500, 100), 501);
        assert_eq!(next_updated_at(500, 500), 501);
    }

    #[test]
    fn test_extract_tags_invalid() {
        // Tags starting with numbers are invalid
        let tags = extract_tags("#123 #456test");
        assert!(tags.is_empty());
    }

    #[test]
    fn test_entry_dirty_flags() {
        let entry = Entry {
            local_id: 1,
            sync_id: SyncId::new(),
            content: EntryContent::new("x", Mood::default()),
            created_at: 1,
            updated_at: 2,
            sync_updated_at: 0,
        };
        assert!(entry.is_dirty());
        assert!(!entry.was_synced());
    }
}
