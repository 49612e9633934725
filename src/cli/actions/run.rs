use crate::cli::actions::{Action, auth};
use anyhow::Result;

/// Execute the provided action.
// Single dispatch point: a new `Action::*` variant gets its `*::execute` call here.
/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action) -> Result<()> {
    match action {
        Action::Auth(args) => auth::execute(args).await,
    }
}
