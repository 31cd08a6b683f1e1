//! Database layer for Moodlog

mod connection;
mod migrations;
mod repository;
mod settings_repository;

pub use connection::Database;
pub use repository::{EntryRepository, LibSqlEntryRepository};
pub use settings_repository::{LibSqlSettingsRepository, SettingsRepository};
