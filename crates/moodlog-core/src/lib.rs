//! moodlog-core - Core library for Moodlog
//!
//! This crate contains the journal models, the on-device libSQL store, and the
//! multi-device sync engine shared by the CLI and the mirror service.

pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod storage;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{Entry, EntryContent, Mood, SyncId};
