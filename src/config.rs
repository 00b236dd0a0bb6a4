//! Server configuration, read from the environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

/// Default request body cap. Profile photos and post images may be inlined
/// as data URLs, so this sits well above a plain JSON document.
const DEFAULT_BODY_LIMIT: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: String,
    pub host: String,
    pub port: u16,
    /// Directory holding one `<key>.json` file per document.
    pub data_dir: PathBuf,
    /// The key of the single profile this deployment serves.
    pub profile_key: String,
    pub keep_alive_secs: u64,
    pub body_limit_bytes: usize,
    pub log_dir: PathBuf,
    pub log_level: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            host: std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env_or("PORT", 3001),
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/profiles")),
            profile_key: std::env::var("PROFILE_KEY").unwrap_or_else(|_| "ben".to_string()),
            keep_alive_secs: env_or("STREAM_KEEP_ALIVE_SECS", 15),
            body_limit_bytes: env_or("BODY_LIMIT_BYTES", DEFAULT_BODY_LIMIT),
            log_dir: std::env::var("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("logs")),
            log_level: std::env::var("LOG_LEVEL").ok(),
        }
    }
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn bind_addr(&self) -> std::io::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("invalid HOST/PORT configuration: {}", e),
                )
            })
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
