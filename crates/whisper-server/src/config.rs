use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "changeme",
    "secret",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
    pub jwt_audience: Option<String>,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = lookup("WHISPER_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("WHISPER_JWT_SECRET is unset or still a placeholder");
        }

        let port = match lookup("WHISPER_PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("WHISPER_PORT '{}' is not a port number", raw))?,
            None => 3000,
        };

        Ok(Self {
            jwt_secret,
            jwt_issuer: lookup("WHISPER_JWT_ISSUER").filter(|s| !s.is_empty()),
            jwt_audience: lookup("WHISPER_JWT_AUDIENCE").filter(|s| !s.is_empty()),
            db_path: PathBuf::from(lookup("WHISPER_DB_PATH").unwrap_or_else(|| "whisper.db".into())),
            host: lookup("WHISPER_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("bad listen address {}:{}", self.host, self.port))
    }
}
