use std::path::Path;

use moodlog_core::models::{Attachment, AttachmentKind};

use crate::cli::KindArg;
use crate::commands::common::{
    guess_mime_type, normalize_entry_identifier, open_database, resolve_entry,
};
use crate::error::CliError;

pub struct AttachOptions<'a> {
    pub id: &'a str,
    pub path: &'a Path,
    pub kind: Option<KindArg>,
    pub thumbnail: Option<&'a Path>,
}

pub async fn run_attach(options: AttachOptions<'_>, db_path: &Path) -> Result<(), CliError> {
    let normalized_id = normalize_entry_identifier(options.id)?;
    let path = std::fs::canonicalize(options.path)?;
    let size_bytes = file_size(&path)?;
    let mime_type = guess_mime_type(&path);
    let kind = options
        .kind
        .map_or_else(|| AttachmentKind::from_mime_type(mime_type), AttachmentKind::from);

    let db = open_database(db_path).await?;
    let entry = resolve_entry(&normalized_id, &db).await?;

    let mut attachment = Attachment::new(entry.sync_id, kind, mime_type, size_bytes, path)?;
    if let Some(thumbnail) = options.thumbnail {
        let thumbnail = std::fs::canonicalize(thumbnail)?;
        let thumbnail_size = file_size(&thumbnail)?;
        attachment = attachment.with_thumbnail(thumbnail, thumbnail_size);
    }

    db.add_attachment(&attachment).await?;
    println!("{}", attachment.id);
    Ok(())
}

fn file_size(path: &Path) -> Result<i64, CliError> {
    let metadata = std::fs::metadata(path)?;
    if !metadata.is_file() {
        return Err(CliError::InvalidArgument(format!(
            "{} is not a regular file",
            path.display()
        )));
    }
    i64::try_from(metadata.len())
        .map_err(|_| CliError::InvalidArgument(format!("{} is too large", path.display())))
}
