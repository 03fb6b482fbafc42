use std::{
    env, fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// Dotenv files read by [`Config::load`], in order. Earlier files win.
pub const DOTENV_FILES: &[&str] = &["bot.env", ".env"];

/// Typed configuration for the bot.
#[derive(Clone, Debug)]
pub struct Config {
    pub telegram_bot_token: Secret,
    pub storage: StorageConfig,

    // Rate limiting
    pub rate_limit_enabled: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,

    // Audit
    pub audit_log_path: Option<PathBuf>,
    pub audit_log_json: bool,
}

#[derive(Clone, Debug)]
pub enum StorageConfig {
    Postgres(DatabaseConfig),
    /// Listings live in process memory and are lost on restart.
    Memory,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub target: DatabaseTarget,
    pub max_connections: u32,
    pub connect_retries: u32,
    pub connect_delay: Duration,
}

#[derive(Clone, Debug)]
pub enum DatabaseTarget {
    Url(Secret),
    Params {
        host: String,
        port: u16,
        user: String,
        password: Secret,
        database: String,
    },
}

/// A string that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        for file in DOTENV_FILES {
            load_dotenv_if_present(Path::new(file));
        }
        Self::from_env()
    }

    /// Build the config from the current process environment only.
    pub fn from_env() -> Result<Self> {
        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN")
            .or_else(|| env_str("BOT_TOKEN"))
            .and_then(non_empty)
            .ok_or_else(|| {
                Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
            })?;

        let storage = load_storage()?;

        // Rate limiting
        let rate_limit_enabled = env_bool("RATE_LIMIT_ENABLED").unwrap_or(true);
        let rate_limit_requests = env_u32("RATE_LIMIT_REQUESTS").unwrap_or(20);
        let rate_limit_window = Duration::from_secs(env_u64("RATE_LIMIT_WINDOW").unwrap_or(60));

        // Audit logging
        let audit_log_path = env_str("AUDIT_LOG_PATH")
            .and_then(non_empty)
            .map(PathBuf::from);
        let audit_log_json = env_bool("AUDIT_LOG_JSON").unwrap_or(false);

        Ok(Self {
            telegram_bot_token: Secret::new(telegram_bot_token),
            storage,
            rate_limit_enabled,
            rate_limit_requests,
            rate_limit_window,
            audit_log_path,
            audit_log_json,
        })
    }
}

fn load_storage() -> Result<StorageConfig> {
    let kind = env_str("STORAGE")
        .map(|s| s.trim().to_lowercase())
        .unwrap_or_else(|| "postgres".to_string());

    match kind.as_str() {
        "memory" => Ok(StorageConfig::Memory),
        "postgres" | "postgresql" => Ok(StorageConfig::Postgres(load_database()?)),
        other => Err(Error::Config(format!(
            "STORAGE must be `postgres` or `memory`, got `{other}`"
        ))),
    }
}

fn load_database() -> Result<DatabaseConfig> {
    let target = if let Some(url) = env_str("DATABASE_URL").and_then(non_empty) {
        DatabaseTarget::Url(Secret::new(url))
    } else {
        let required = |key: &str| {
            env_str(key).and_then(non_empty).ok_or_else(|| {
                Error::Config(format!(
                    "{key} is required when DATABASE_URL is not set (or use STORAGE=memory)"
                ))
            })
        };
        let port = match env_str("DB_PORT").and_then(non_empty) {
            Some(p) => p
                .trim()
                .parse::<u16>()
                .map_err(|_| Error::Config(format!("DB_PORT is not a port number: {p}")))?,
            None => 5432,
        };
        DatabaseTarget::Params {
            host: required("DB_HOST")?,
            port,
            user: required("DB_USER")?,
            password: Secret::new(env_str("DB_PASSWORD").unwrap_or_default()),
            database: required("DB_NAME")?,
        }
    };

    Ok(DatabaseConfig {
        target,
        max_connections: env_u32("DB_MAX_CONNECTIONS").unwrap_or(5).max(1),
        connect_retries: env_u32("DB_CONNECT_RETRIES").unwrap_or(5).max(1),
        connect_delay: Duration::from_secs(env_u64("DB_CONNECT_DELAY_SECS").unwrap_or(5)),
    })
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

/// Minimal dotenv reader: `KEY=value` lines, `#` comments, optional quotes.
/// Variables already present in the environment are left alone.
fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue;
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
