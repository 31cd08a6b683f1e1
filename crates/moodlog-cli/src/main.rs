//! Moodlog CLI - a mood journal that syncs across devices
//!
//! Entries are written to a local database first; `moodlog sync` and
//! `moodlog watch` reconcile them with the remote mirror.

mod auth;
mod cli;
mod commands;
mod error;

use clap::Parser;

use crate::cli::{Cli, Commands, SyncCommands};
use crate::commands::add::{run_add, AddOptions};
use crate::commands::attach::{run_attach, AttachOptions};
use crate::commands::auth_cmd::run_auth;
use crate::commands::common::resolve_db_path;
use crate::commands::config::run_config;
use crate::commands::delete::run_delete;
use crate::commands::edit::{run_edit, EditOptions};
use crate::commands::list::run_list;
use crate::commands::sync::{run_sync, run_sync_status};
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("moodlog=info,moodlog_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Add {
            text,
            mood,
            tags,
            private,
            date,
        } => {
            let options = AddOptions {
                text: &text,
                mood,
                tags: &tags,
                private,
                date: date.as_deref(),
            };
            run_add(options, &db_path).await
        }
        Commands::List { limit, json } => run_list(limit, json, &db_path).await,
        Commands::Edit {
            id,
            text,
            mood,
            tags,
            private,
        } => {
            let options = EditOptions {
                id: &id,
                text: text.as_deref(),
                mood,
                tags: &tags,
                private,
            };
            run_edit(options, &db_path).await
        }
        Commands::Delete { id } => run_delete(&id, &db_path).await,
        Commands::Attach {
            id,
            path,
            kind,
            thumbnail,
        } => {
            let options = AttachOptions {
                id: &id,
                path: &path,
                kind,
                thumbnail: thumbnail.as_deref(),
            };
            run_attach(options, &db_path).await
        }
        Commands::Sync { command } => match command {
            None => run_sync(&db_path).await,
            Some(SyncCommands::Status { json }) => run_sync_status(json, &db_path).await,
        },
        Commands::Watch { interval_secs } => run_watch(interval_secs, &db_path).await,
        Commands::Config { command } => run_config(command, &db_path).await,
        Commands::Auth { command } => run_auth(command).await,
    }
}
