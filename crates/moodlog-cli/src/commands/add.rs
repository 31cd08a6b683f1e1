use std::path::Path;

use moodlog_core::EntryContent;

use crate::commands::common::{open_database, parse_date, parse_mood, parse_tags, resolve_entry_text};
use crate::error::CliError;

pub struct AddOptions<'a> {
    pub text: &'a [String],
    pub mood: u8,
    pub tags: &'a [String],
    pub private: bool,
    pub date: Option<&'a str>,
}

pub async fn run_add(options: AddOptions<'_>, db_path: &Path) -> Result<(), CliError> {
    let mood = parse_mood(options.mood)?;
    let date = options.date.map(parse_date).transpose()?;
    let text = resolve_entry_text(options.text)?;

    let mut content = EntryContent::new(text, mood);
    content.tags.extend(parse_tags(options.tags));
    content.is_private = options.private;
    if let Some(date) = date {
        content.date = date;
    }

    let db = open_database(db_path).await?;
    let entry = db.create_entry(content).await?;

    println!("{}", entry.sync_id);
    Ok(())
}
