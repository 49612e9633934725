use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

use super::console::{ConsoleHooks, LoggedDisconnects};
use crate::auth::{AuthOrchestrator, MemoryCarrier, SessionCarrier};
use crate::cli::{commands::auth::Options, globals::GlobalArgs};
use crate::error::AuthError;
use crate::storage::PgStore;

#[derive(Debug)]
pub enum Operation {
    RequestCode { email: String },
    SubmitCode { email: String, code: SecretString },
    Session { token: SecretString },
    Logout { token: SecretString },
    Revoke { email: String },
    Prune,
}

#[derive(Debug)]
pub struct Args {
    pub globals: GlobalArgs,
    pub options: Options,
    pub operation: Operation,
}

/// Execute one auth operation against PostgreSQL and print the result as JSON.
/// # Errors
/// Returns an error if the database is unreachable or the operation fails.
pub async fn execute(args: Args) -> Result<()> {
    let database_url = args.globals.database_url()?;
    let store = Arc::new(
        PgStore::connect(database_url.expose_secret())
            .await
            .context("Failed to connect to database")?,
    );
    debug!("database pool ready");

    let hooks = Arc::new(ConsoleHooks::new(args.options.allowed_domains));
    let orchestrator =
        AuthOrchestrator::new(args.options.config, store.clone(), store, hooks.clone())?
            .with_live_connections(Arc::new(LoggedDisconnects));

    let output = run(&orchestrator, &hooks, args.operation).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Run `operation` and describe its outcome. A requested code is reported
/// in the output, next to its expiry.
///
/// # Errors
/// Returns the operation's error; user-facing ones carry the translated message.
pub async fn run(
    orchestrator: &AuthOrchestrator,
    hooks: &ConsoleHooks,
    operation: Operation,
) -> Result<Value> {
    match operation {
        Operation::RequestCode { email } => {
            let requested = orchestrator
                .request_code(&email)
                .await
                .map_err(|err| report(orchestrator, err, Some(&email)))?;
            let code = hooks
                .take_code(&requested.identity)
                .context("issued code was not delivered")?;
            Ok(json!({
                "identity": requested.identity,
                "code": code.expose_secret(),
                "expires_at": requested.expires_at,
            }))
        }
        Operation::SubmitCode { email, code } => {
            let mut carrier = MemoryCarrier::new();
            let outcome = orchestrator
                .submit_code(&mut carrier, &email, &code)
                .await
                .map_err(|err| report(orchestrator, err, Some(&email)))?;
            Ok(json!({
                "identity": outcome.identity,
                "session_token": carrier.session_token(),
                "live_connection_id": outcome.live_connection_id,
                "remembered": outcome.remembered,
                "created_at": outcome.created_at,
            }))
        }
        Operation::Session { token } => {
            let mut carrier = MemoryCarrier::with_session_token(token.expose_secret());
            let session = orchestrator
                .require_session(&mut carrier)
                .await
                .map_err(|err| report(orchestrator, err, None))?;
            Ok(serde_json::to_value(session)?)
        }
        Operation::Logout { token } => {
            let mut carrier = MemoryCarrier::with_session_token(token.expose_secret());
            orchestrator.logout(&mut carrier).await?;
            Ok(json!({ "logged_out": true }))
        }
        Operation::Revoke { email } => {
            let revoked = orchestrator.revoke_identity(&email).await?;
            Ok(json!({ "identity": email, "revoked": revoked }))
        }
        Operation::Prune => Ok(serde_json::to_value(orchestrator.prune().await?)?),
    }
}

fn report(orchestrator: &AuthOrchestrator, err: AuthError, identity: Option<&str>) -> anyhow::Error {
    match orchestrator.user_message(&err, identity) {
        Some(message) => anyhow::Error::new(err).context(message),
        None => anyhow::Error::new(err),
    }
}
