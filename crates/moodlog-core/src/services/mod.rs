//! Service layer shared by Moodlog clients.

mod database;

pub use database::DatabaseService;
