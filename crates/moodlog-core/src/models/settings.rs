//! Application settings model

use serde::{Deserialize, Serialize};

/// Device-local settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Whether privacy-flagged entries take part in sync at all.
    pub sync_private_entries: bool,
}
