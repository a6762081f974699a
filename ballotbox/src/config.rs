use crate::*;
use std::env::var;

pub const ENCRYPTION_KEY_VAR: &str = "BALLOTBOX_ENCRYPTION_KEY";
pub const DATABASE_URL_VAR: &str = "BALLOTBOX_DATABASE_URL";
pub const RECEIPT_RETRIES_VAR: &str = "BALLOTBOX_RECEIPT_RETRIES";

pub const DEFAULT_DATABASE_URL: &str = "sqlite://ballotbox.db";
pub const DEFAULT_RECEIPT_RETRIES: usize = 3;

/// Process-wide settings, loaded once at startup
#[derive(Debug, Clone)]
pub struct Config {
    pub cipher: BallotCipher,
    pub database_url: String,

    /// How many receipt ids to try before giving up on a cast
    pub receipt_retries: usize,
}

impl Config {
    /// Load from the process environment. Fails if the encryption key is absent or malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| var(name).ok())
    }

    /// Load from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let cipher = match lookup(ENCRYPTION_KEY_VAR) {
            Some(key) => BallotCipher::from_hex(&key)?,
            None => return Err(ConfigError::Missing(ENCRYPTION_KEY_VAR)),
        };

        let database_url = lookup(DATABASE_URL_VAR)
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_owned());

        let receipt_retries = match lookup(RECEIPT_RETRIES_VAR) {
            Some(val) => match val.trim().parse::<usize>() {
                Ok(n) if n >= 1 => n,
                _ => return Err(ConfigError::Invalid(RECEIPT_RETRIES_VAR, val)),
            },
            None => DEFAULT_RECEIPT_RETRIES,
        };

        Ok(Config {
            cipher,
            database_url,
            receipt_retries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn key_is_required() {
        assert!(matches!(
            load(&[]),
            Err(ConfigError::Missing(ENCRYPTION_KEY_VAR))
        ));
        assert!(matches!(
            load(&[(ENCRYPTION_KEY_VAR, "abcd")]),
            Err(ConfigError::Cipher(CipherError::InvalidKey))
        ));
    }

    #[test]
    fn defaults_and_overrides() {
        let key = hex::encode([3u8; 32]);
        let config = load(&[(ENCRYPTION_KEY_VAR, &key)]).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.receipt_retries, DEFAULT_RECEIPT_RETRIES);

        let config = load(&[
            (ENCRYPTION_KEY_VAR, &key),
            (DATABASE_URL_VAR, "sqlite::memory:"),
            (RECEIPT_RETRIES_VAR, "5"),
        ])
        .unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.receipt_retries, 5);

        assert!(matches!(
            load(&[(ENCRYPTION_KEY_VAR, &key), (RECEIPT_RETRIES_VAR, "0")]),
            Err(ConfigError::Invalid(RECEIPT_RETRIES_VAR, _))
        ));
    }
}
