use std::{net::SocketAddr, str::FromStr};

use anyhow::{Context, bail};

/// Server settings, read from the environment (a `.env` file is honoured).
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub database_url: String,
    /// Path of the WebSocket endpoint; clients must use the same one.
    pub socket_path: String,
    /// Origin allowed to make credentialed cross-origin requests.
    pub frontend_url: String,
    pub session_minutes: i64,
    /// Mounts `/api/dev/login/{identity}`. Never enable in production.
    pub dev_login: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: "sqlite://gigchat.db?mode=rwc".to_owned(),
            socket_path: "/api/socketio".to_owned(),
            frontend_url: "http://localhost:3000".to_owned(),
            session_minutes: 60,
            dev_login: false,
        }
    }
}

fn var(key: &str) -> Option<String> {
    dotenv::var(key).ok().filter(|value| !value.is_empty())
}

fn parse_var<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(key)
        .map(|value| value.parse::<T>().with_context(|| format!("invalid {key}={value}")))
        .transpose()
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        let defaults = Config::default();
        let config = Config {
            bind: parse_var("GIGCHAT_BIND")?.unwrap_or(defaults.bind),
            database_url: var("DATABASE_URL").unwrap_or(defaults.database_url),
            socket_path: var("GIGCHAT_SOCKET_PATH").unwrap_or(defaults.socket_path),
            frontend_url: var("GIGCHAT_FRONTEND_URL").unwrap_or(defaults.frontend_url),
            session_minutes: parse_var("GIGCHAT_SESSION_MINUTES")?.unwrap_or(defaults.session_minutes),
            dev_login: parse_var("GIGCHAT_DEV_LOGIN")?.unwrap_or(defaults.dev_login),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.socket_path.starts_with('/') {
            bail!("GIGCHAT_SOCKET_PATH must start with '/', got {:?}", self.socket_path);
        }
        if self.session_minutes <= 0 {
            bail!("GIGCHAT_SESSION_MINUTES must be positive");
        }
        Ok(())
    }
}
