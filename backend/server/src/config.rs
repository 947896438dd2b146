use std::{env, fmt::Display, path::PathBuf, str::FromStr};

use tracing::{info, warn};

use crate::error::ServerError;

pub struct Config {
    pub port: u16,
    pub database_path: PathBuf,
    pub sync_max_age_secs: u32,
    pub sync_stale_secs: u32,
    pub qa_limit: u32,
    pub init_schema: bool,
}

impl Config {
    pub fn load() -> Result<Self, ServerError> {
        Ok(Self {
            port: try_load("RUST_PORT", "8080")?,
            database_path: try_load("DATABASE_PATH", "council.db")?,
            sync_max_age_secs: try_load("SYNC_MAX_AGE_SECS", "1")?,
            sync_stale_secs: try_load("SYNC_STALE_SECS", "2")?,
            qa_limit: try_load("QA_LIMIT", "50")?,
            init_schema: try_load("INIT_SCHEMA", "true")?,
        })
    }

    /// `Cache-Control` value for sync responses. Short enough to keep pollers fresh.
    pub fn sync_cache_control(&self) -> String {
        format!(
            "s-maxage={}, stale-while-revalidate={}",
            self.sync_max_age_secs, self.sync_stale_secs
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            database_path: PathBuf::from("council.db"),
            sync_max_age_secs: 1,
            sync_stale_secs: 2,
            qa_limit: 50,
            init_schema: true,
        }
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T, ServerError>
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e: T::Err| {
            warn!("Invalid {key} value: {e}");

            ServerError::Config {
                key: key.to_string(),
                reason: e.to_string(),
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_control_header() {
        let config = Config::default();

        assert_eq!(
            config.sync_cache_control(),
            "s-maxage=1, stale-while-revalidate=2"
        );
    }

    #[test]
    fn test_invalid_value_is_an_error() {
        // Unset in any sane environment, so the default is parsed.
        let parsed: Result<u16, _> = try_load("COUNCIL_TEST_UNSET_PORT", "not-a-port");

        assert!(matches!(parsed, Err(ServerError::Config { .. })));
    }
}
