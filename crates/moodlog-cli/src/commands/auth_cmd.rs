use crate::auth::{auth_client, clear_stored_session, load_stored_session};
use crate::cli::AuthCommands;
use crate::error::CliError;

pub async fn run_auth(command: AuthCommands) -> Result<(), CliError> {
    match command {
        AuthCommands::Login { email, password } => {
            let client = auth_client()?.ok_or_else(|| {
                CliError::Auth(
                    "Supabase auth is not configured. Set SUPABASE_URL and SUPABASE_ANON_KEY."
                        .to_string(),
                )
            })?;
            let session = client.sign_in(&email, &password).await?;
            let email_label = session.user.email.as_deref().unwrap_or("(no email)");
            println!("Signed in as {email_label}");
            Ok(())
        }
        AuthCommands::Status => {
            let session = if let Some(client) = auth_client()? {
                client.restore_session().await?
            } else {
                load_stored_session()?
            };

            if let Some(session) = session {
                let email_label = session.user.email.as_deref().unwrap_or("(no email)");
                println!(
                    "Signed in as {} (expires_at={})",
                    email_label, session.expires_at
                );
            } else {
                println!("Not signed in.");
            }
            Ok(())
        }
        AuthCommands::Logout => {
            let stored_session = load_stored_session()?;
            match (auth_client()?, stored_session) {
                (Some(client), Some(session)) => {
                    if let Err(error) = client.sign_out(&session.access_token).await {
                        // Still forget the local session when the server is unreachable.
                        tracing::warn!("Remote sign-out failed: {}", error);
                        client.forget_session()?;
                    }
                }
                _ => clear_stored_session()?,
            }

            println!("Signed out");
            Ok(())
        }
    }
}
