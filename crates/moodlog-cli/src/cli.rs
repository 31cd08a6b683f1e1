use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "moodlog")]
#[command(about = "Keep a mood journal from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a new entry
    #[command(alias = "new")]
    Add {
        /// Entry text (read from stdin or $EDITOR when omitted)
        text: Vec<String>,
        /// Mood from 1 (worst) to 5 (best)
        #[arg(short, long, default_value = "3")]
        mood: u8,
        /// Tag to attach (repeatable)
        #[arg(short, long = "tag", value_name = "TAG")]
        tags: Vec<String>,
        /// Keep this entry on this device unless private sync is enabled
        #[arg(long)]
        private: bool,
        /// Day the entry is about (YYYY-MM-DD, defaults to today)
        #[arg(long, value_name = "DATE")]
        date: Option<String>,
    },
    /// List recent entries
    List {
        /// Number of entries to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit an existing entry
    Edit {
        /// Entry ID or unique ID prefix
        id: String,
        /// Replacement text (opens $EDITOR when no field is given)
        #[arg(long)]
        text: Option<String>,
        /// New mood
        #[arg(short, long)]
        mood: Option<u8>,
        /// Replacement tag set (repeatable)
        #[arg(short, long = "tag", value_name = "TAG")]
        tags: Vec<String>,
        /// Change the privacy flag
        #[arg(long, value_enum)]
        private: Option<Toggle>,
    },
    /// Delete an entry on every device
    Delete {
        /// Entry ID or unique ID prefix
        id: String,
    },
    /// Attach a file to an entry
    Attach {
        /// Entry ID or unique ID prefix
        id: String,
        /// File to attach
        path: PathBuf,
        /// Attachment kind (guessed from the file extension when omitted)
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
        /// Pre-rendered thumbnail for the file
        #[arg(long, value_name = "PATH")]
        thumbnail: Option<PathBuf>,
    },
    /// Sync entries and attachments with the remote mirror
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
    },
    /// Keep syncing on an interval and when connectivity returns
    Watch {
        /// Seconds between scheduled runs (defaults to MOODLOG_SYNC_INTERVAL_SECS or 60)
        #[arg(long, value_name = "SECS")]
        interval_secs: Option<u64>,
    },
    /// Change device settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Sign in to the sync account
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    pub const fn enabled(self) -> bool {
        matches!(self, Self::On)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum KindArg {
    Photo,
    Audio,
    Video,
    File,
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Show the last sync time and pending changes
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Include private entries in sync
    PrivateSync {
        #[arg(value_enum)]
        state: Toggle,
    },
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Sign in with email/password and store the session in the keychain
    Login {
        /// Account email
        #[arg(long, value_name = "EMAIL")]
        email: String,
        /// Account password
        #[arg(long, value_name = "PASSWORD")]
        password: String,
    },
    /// Show whether this device is signed in
    Status,
    /// Sign out and clear the stored session
    Logout,
}
