use std::path::Path;

use crate::cli::ConfigCommands;
use crate::commands::common::open_database;
use crate::error::CliError;

pub async fn run_config(command: ConfigCommands, db_path: &Path) -> Result<(), CliError> {
    match command {
        ConfigCommands::PrivateSync { state } => {
            let db = open_database(db_path).await?;
            let mut settings = db.load_settings().await?;
            settings.sync_private_entries = state.enabled();
            db.save_settings(&settings).await?;

            if settings.sync_private_entries {
                println!("Private entries will sync on the next run");
            } else {
                println!("Private entries stay on this device");
            }
            Ok(())
        }
    }
}
