use std::env;

use secrecy::SecretString;
use thiserror::Error;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8081";

/// Channel the `notify_task_change` trigger publishes on. Fixed by the
/// migration, so it is not configurable at runtime.
pub const TASK_CHANGE_CHANNEL: &str = "task_changes";

#[derive(Debug)]
pub struct RemoteServerConfig {
    pub database_url: String,
    pub listen_addr: String,
    pub jwt_secret: SecretString,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable `{0}` is not set")]
    MissingVar(&'static str),
    #[error("environment variable `{0}` must not be empty")]
    EmptyVar(&'static str),
}

impl RemoteServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("SERVER_DATABASE_URL")
            .or_else(|_| env::var("DATABASE_URL"))
            .map_err(|_| ConfigError::MissingVar("SERVER_DATABASE_URL"))?;

        let listen_addr =
            env::var("SERVER_LISTEN_ADDR").unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string());

        let jwt_secret = env::var("SERVER_JWT_SECRET")
            .map_err(|_| ConfigError::MissingVar("SERVER_JWT_SECRET"))?;
        if jwt_secret.trim().is_empty() {
            return Err(ConfigError::EmptyVar("SERVER_JWT_SECRET"));
        }

        Ok(Self {
            database_url,
            listen_addr,
            jwt_secret: SecretString::from(jwt_secret),
        })
    }
}
