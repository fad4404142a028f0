use std::path::PathBuf;

use lipwire_shared::constants::{ACCESS_TTL_MINUTES, DEFAULT_PORT, REFRESH_TTL_DAYS};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// PEM certificate chain / private key. When either is absent the server
    /// listens in plaintext and TLS termination is someone else's job.
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    /// SQLite database file. Platform data dir when unset.
    pub database_path: Option<PathBuf>,
    /// Hex-encoded 32-byte Ed25519 seed used to sign tokens. An ephemeral
    /// key is generated when unset (tokens die with the process).
    pub token_key_path: Option<PathBuf>,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_days: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            tls_cert: None,
            tls_key: None,
            database_path: None,
            token_key_path: None,
            access_ttl_minutes: ACCESS_TTL_MINUTES,
            refresh_ttl_days: REFRESH_TTL_DAYS,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("LIPWIRE_HOST") {
            config.host = host;
        }

        if let Ok(port) = std::env::var("LIPWIRE_PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                config.port = parsed;
            } else {
                tracing::warn!(value = %port, "Invalid LIPWIRE_PORT, using default");
            }
        }

        if let Ok(path) = std::env::var("LIPWIRE_TLS_CERT") {
            if !path.is_empty() {
                config.tls_cert = Some(PathBuf::from(path));
            }
        }

        if let Ok(path) = std::env::var("LIPWIRE_TLS_KEY") {
            if !path.is_empty() {
                config.tls_key = Some(PathBuf::from(path));
            }
        }

        if let Ok(path) = std::env::var("LIPWIRE_DB_PATH") {
            if !path.is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Ok(path) = std::env::var("LIPWIRE_TOKEN_KEY") {
            if !path.is_empty() {
                config.token_key_path = Some(PathBuf::from(path));
            }
        }

        if let Ok(val) = std::env::var("LIPWIRE_ACCESS_TTL_MINUTES") {
            match val.parse::<i64>() {
                Ok(n) if n > 0 => config.access_ttl_minutes = n,
                _ => tracing::warn!(value = %val, "Invalid LIPWIRE_ACCESS_TTL_MINUTES, using default"),
            }
        }

        if let Ok(val) = std::env::var("LIPWIRE_REFRESH_TTL_DAYS") {
            match val.parse::<i64>() {
                Ok(n) if n > 0 => config.refresh_ttl_days = n,
                _ => tracing::warn!(value = %val, "Invalid LIPWIRE_REFRESH_TTL_DAYS, using default"),
            }
        }

        config
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_cert.is_some() && self.tls_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.access_ttl_minutes, 15);
        assert_eq!(config.refresh_ttl_days, 7);
        assert!(!config.tls_enabled());
    }

    #[test]
    fn test_listen_addr() {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 9001,
            ..Default::default()
        };
        assert_eq!(config.listen_addr(), "127.0.0.1:9001");
    }

    #[test]
    fn test_tls_requires_both_paths() {
        let config = ServerConfig {
            tls_cert: Some(PathBuf::from("cert.pem")),
            ..Default::default()
        };
        assert!(!config.tls_enabled());
    }
}
