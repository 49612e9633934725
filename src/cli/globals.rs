use anyhow::{Context, Result, anyhow};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

/// Connection settings shared by every subcommand.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub dsn: String,
    pub db_password: Option<SecretString>,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(dsn: String) -> Self {
        Self {
            dsn,
            db_password: None,
        }
    }

    pub fn set_db_password(&mut self, password: SecretString) {
        self.db_password = Some(password);
    }

    /// DSN with the password injected, when one was supplied separately.
    ///
    /// # Errors
    /// Returns an error if the DSN is not a valid URL or cannot carry a password.
    pub fn database_url(&self) -> Result<SecretString> {
        let Some(password) = &self.db_password else {
            return Ok(SecretString::from(self.dsn.clone()));
        };

        let mut dsn = Url::parse(&self.dsn).context("invalid database connection string")?;
        dsn.set_password(Some(password.expose_secret()))
            .map_err(|()| anyhow!("Error setting password"))?;
        Ok(SecretString::from(dsn.to_string()))
    }
}
