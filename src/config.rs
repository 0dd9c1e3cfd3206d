//! Runtime settings, read from the environment.

use std::path::PathBuf;

use anyhow::anyhow;

use crate::identity::Identity;

pub const DATA_DIR_ENV: &str = "FAMHEALTH_DATA_DIR";
pub const DATABASE_URL_ENV: &str = "FAMHEALTH_DATABASE_URL";
pub const ID_TOKEN_ENV: &str = "FAMHEALTH_ID_TOKEN";
pub const USER_ID_ENV: &str = "FAMHEALTH_USER_ID";
pub const USER_NAME_ENV: &str = "FAMHEALTH_USER_NAME";
pub const LOG_DIR_ENV: &str = "FAMHEALTH_LOG_DIR";

const APP_DIR: &str = "famhealth";
const STORE_FILE: &str = "store.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Realtime database root, e.g. `https://example.firebaseio.com`. Without
    /// it the device works offline only.
    pub database_url: Option<String>,
    pub identity: Option<Identity>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let data_dir = match var(DATA_DIR_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_dir()
                .or_else(|| std::env::current_dir().ok())
                .ok_or_else(|| anyhow!("failed to resolve application data directory"))?
                .join(APP_DIR),
        };
        let log_dir = var(LOG_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("logs"));
        let database_url = var(DATABASE_URL_ENV).map(|url| url.trim_end_matches('/').to_string());
        let identity = var(USER_ID_ENV).map(|uid| Identity {
            uid,
            display_name: var(USER_NAME_ENV),
            id_token: var(ID_TOKEN_ENV),
        });

        Ok(Self {
            data_dir,
            log_dir,
            database_url,
            identity,
        })
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(STORE_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn explicit_dirs_and_identity() {
        let config = Config::from_lookup(lookup(&[
            (DATA_DIR_ENV, "/tmp/fh"),
            (DATABASE_URL_ENV, "https://db.example.com/"),
            (USER_ID_ENV, "u1"),
            (ID_TOKEN_ENV, "tok"),
        ]))
        .unwrap();
        assert_eq!(config.store_path(), PathBuf::from("/tmp/fh/store.json"));
        assert_eq!(config.log_dir, PathBuf::from("/tmp/fh/logs"));
        assert_eq!(config.database_url.as_deref(), Some("https://db.example.com"));
        let identity = config.identity.unwrap();
        assert_eq!(identity.uid, "u1");
        assert_eq!(identity.id_token.as_deref(), Some("tok"));
        assert_eq!(identity.display_name, None);
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = Config::from_lookup(lookup(&[
            (DATA_DIR_ENV, "/tmp/fh"),
            (USER_ID_ENV, "   "),
            (DATABASE_URL_ENV, ""),
        ]))
        .unwrap();
        assert!(config.identity.is_none());
        assert!(config.database_url.is_none());
    }
}
