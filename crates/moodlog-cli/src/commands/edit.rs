use std::path::Path;

use crate::cli::Toggle;
use crate::commands::common::{
    capture_editor_input_with_initial, normalize_content, normalize_entry_identifier,
    open_database, parse_mood, parse_tags, resolve_entry,
};
use crate::error::CliError;

pub struct EditOptions<'a> {
    pub id: &'a str,
    pub text: Option<&'a str>,
    pub mood: Option<u8>,
    pub tags: &'a [String],
    pub private: Option<Toggle>,
}

impl EditOptions<'_> {
    const fn has_field_changes(&self) -> bool {
        self.text.is_some() || self.mood.is_some() || !self.tags.is_empty() || self.private.is_some()
    }
}

pub async fn run_edit(options: EditOptions<'_>, db_path: &Path) -> Result<(), CliError> {
    let normalized_id = normalize_entry_identifier(options.id)?;
    let db = open_database(db_path).await?;
    let entry = resolve_entry(&normalized_id, &db).await?;
    let mut content = entry.content.clone();

    if options.has_field_changes() {
        if let Some(text) = options.text {
            content.text = normalize_content(text).ok_or(CliError::EmptyEditedContent)?;
        }
        if let Some(mood) = options.mood {
            content.mood = parse_mood(mood)?;
        }
        if !options.tags.is_empty() {
            content.tags = parse_tags(options.tags);
        }
        if let Some(private) = options.private {
            content.is_private = private.enabled();
        }
    } else {
        let Some(text) = capture_editor_input_with_initial(&entry.content.text)? else {
            return Err(CliError::EmptyEditedContent);
        };
        content.text = text;
    }

    if content == entry.content {
        println!("{}", entry.sync_id);
        return Ok(());
    }

    let updated = db.update_entry(&entry.sync_id, content).await?;
    println!("{}", updated.sync_id);
    Ok(())
}
