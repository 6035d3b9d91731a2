//! Runtime secret resolution.
//!
//! Config YAML stores only env var NAMES (`durable.database_url_env`).
//! Binaries call [`resolve_secrets`] once at startup and pass the result to
//! constructors. Errors name the variable, never its value, and `Debug`
//! redacts every value.

use anyhow::{bail, Result};

use crate::EngineConfig;

#[derive(Clone)]
pub struct ResolvedSecrets {
    /// Env var the database URL was read from.
    pub database_url_var: String,
    /// `None` when the variable is unset or blank: run on in-memory stores.
    pub database_url: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("database_url_var", &self.database_url_var)
            .field("database_url", &self.database_url.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

impl ResolvedSecrets {
    /// The database URL, or an error naming the missing variable.
    pub fn require_database_url(&self) -> Result<&str> {
        match self.database_url.as_deref() {
            Some(url) => Ok(url),
            None => bail!(
                "SECRETS_MISSING: required env var '{}' (database url) is not set or empty",
                self.database_url_var
            ),
        }
    }
}

fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

pub fn resolve_secrets(cfg: &EngineConfig) -> ResolvedSecrets {
    let var = cfg.durable.database_url_env.trim().to_string();
    ResolvedSecrets {
        database_url: resolve_env(&var),
        database_url_var: var,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_url() {
        let s = ResolvedSecrets {
            database_url_var: "HS_DATABASE_URL".to_string(),
            database_url: Some("postgres://hs:pw@localhost/hs".to_string()),
        };
        let dbg = format!("{s:?}");
        assert!(!dbg.contains("pw@"), "leaked: {dbg}");
        assert!(dbg.contains("<REDACTED>"));
    }

    #[test]
    fn missing_url_error_names_the_variable() {
        let mut cfg = EngineConfig::default();
        cfg.durable.database_url_env = "HS_TEST_DB_URL_DEFINITELY_UNSET".to_string();
        let s = resolve_secrets(&cfg);
        let err = s.require_database_url().unwrap_err().to_string();
        assert!(err.contains("HS_TEST_DB_URL_DEFINITELY_UNSET"));
    }
}
