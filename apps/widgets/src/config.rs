//! # Server Configuration
//!
//! Everything the server needs to know at startup, in one struct.
//!
//! ## Sources (later wins)
//!
//! 1. Built-in defaults
//! 2. A TOML file passed with `-c/--config`
//! 3. Environment variables:
//!    - `WIDGETS_HOST`, `WIDGETS_PORT`
//!    - `WIDGETS_DB` (database path)
//!    - `WIDGETS_BACKUP_DIR`, `WIDGETS_BACKUP_INTERVAL` (seconds)
//!    - `WIDGETS_ADMIN_SOCKET`
//! 4. Command-line flags
//!
//! ## Example
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 8888
//! database_path = "/var/lib/widgets/widgets.redb"
//! backup_dir = "/var/backups/widgets"
//! backup_interval_secs = 3600
//! log_file = "/var/log/widgets.log"
//! admin_socket = "/run/widgets/admin.sock"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use widgets_core::WidgetsError;

/// Maximum config file size. Anything larger is not a config file.
const MAX_CONFIG_FILE_SIZE: u64 = 64 * 1024;

/// TLS certificate paths.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    pub certfile: PathBuf,
    pub keyfile: PathBuf,
}

/// Startup configuration for the server and backup scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_path: PathBuf,
    pub backup_dir: PathBuf,
    /// Seconds between periodic backups; `0` disables them.
    pub backup_interval_secs: u64,
    /// Append logs here instead of stdout.
    pub log_file: Option<PathBuf>,
    /// Unix socket for user commands against a running server.
    /// Defaults to the database path with `.sock` appended.
    pub admin_socket: Option<PathBuf>,
    pub tls: Option<TlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8888,
            database_path: PathBuf::from("widgets.redb"),
            backup_dir: PathBuf::from("backups"),
            backup_interval_secs: 3600,
            log_file: None,
            admin_socket: None,
            tls: None,
        }
    }
}

impl ServerConfig {
    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, WidgetsError> {
        toml::from_str(source).map_err(|e| WidgetsError::Config(e.to_string()))
    }

    /// Load defaults, the optional file, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, WidgetsError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, WidgetsError> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            WidgetsError::Config(format!("Cannot read '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(WidgetsError::Config(format!(
                "'{}' is {} bytes; config files are limited to {} bytes",
                path.display(),
                metadata.len(),
                MAX_CONFIG_FILE_SIZE
            )));
        }
        let source = std::fs::read_to_string(path).map_err(|e| {
            WidgetsError::Config(format!("Cannot read '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&source)
    }

    /// Apply `WIDGETS_*` overrides read through `lookup`.
    pub fn apply_env_with(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), WidgetsError> {
        if let Some(host) = lookup("WIDGETS_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("WIDGETS_PORT") {
            self.port = port
                .parse()
                .map_err(|_| WidgetsError::Config(format!("WIDGETS_PORT: invalid port '{}'", port)))?;
        }
        if let Some(db) = lookup("WIDGETS_DB") {
            self.database_path = PathBuf::from(db);
        }
        if let Some(dir) = lookup("WIDGETS_BACKUP_DIR") {
            self.backup_dir = PathBuf::from(dir);
        }
        if let Some(socket) = lookup("WIDGETS_ADMIN_SOCKET") {
            self.admin_socket = Some(PathBuf::from(socket));
        }
        if let Some(secs) = lookup("WIDGETS_BACKUP_INTERVAL") {
            self.backup_interval_secs = secs.parse().map_err(|_| {
                WidgetsError::Config(format!(
                    "WIDGETS_BACKUP_INTERVAL: invalid number of seconds '{}'",
                    secs
                ))
            })?;
        }
        Ok(())
    }

    /// `host:port` for the listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Where the server listens for user commands.
    pub fn admin_socket_path(&self) -> PathBuf {
        match &self.admin_socket {
            Some(path) => path.clone(),
            None => {
                let mut path = self.database_path.clone().into_os_string();
                path.push(".sock");
                PathBuf::from(path)
            }
        }
    }

    /// Period of the backup timer, or `None` when periodic backups are off.
    pub fn backup_interval(&self) -> Option<Duration> {
        (self.backup_interval_secs > 0).then(|| Duration::from_secs(self.backup_interval_secs))
    }

    /// Reject settings the server cannot honor.
    ///
    /// TLS is terminated by a proxy in front of the service; a `[tls]`
    /// section here would otherwise be silently served as plain HTTP.
    pub fn check_serveable(&self) -> Result<(), WidgetsError> {
        if let Some(tls) = &self.tls {
            return Err(WidgetsError::Config(format!(
                "TLS is configured (certfile '{}', keyfile '{}') but this server only speaks plain HTTP; \
                 terminate TLS in a reverse proxy and remove the [tls] section",
                tls.certfile.display(),
                tls.keyfile.display()
            )));
        }
        if self.host.is_empty() {
            return Err(WidgetsError::Config("host must not be empty".to_string()));
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr(), "127.0.0.1:8888");
        assert_eq!(config.backup_interval(), Some(Duration::from_secs(3600)));
        assert!(config.check_serveable().is_ok());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = ServerConfig::from_toml_str("port = 9000\nbackup_interval_secs = 0\n").unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.backup_interval(), None);
    }

    #[test]
    fn full_file() {
        let config = ServerConfig::from_toml_str(
            r#"
            host = "0.0.0.0"
            port = 443
            database_path = "/data/w.redb"
            backup_dir = "/data/backups"
            backup_interval_secs = 60
            log_file = "/var/log/widgets.log"

            [tls]
            certfile = "cert.pem"
            keyfile = "key.pem"
            "#,
        )
        .unwrap();
        assert_eq!(config.database_path, PathBuf::from("/data/w.redb"));
        assert_eq!(config.log_file, Some(PathBuf::from("/var/log/widgets.log")));
        assert_eq!(
            config.tls,
            Some(TlsConfig {
                certfile: PathBuf::from("cert.pem"),
                keyfile: PathBuf::from("key.pem"),
            })
        );
        assert!(matches!(
            config.check_serveable(),
            Err(WidgetsError::Config(_))
        ));
    }

    #[test]
    fn admin_socket_follows_database() {
        let mut config = ServerConfig {
            database_path: PathBuf::from("/data/w.redb"),
            ..ServerConfig::default()
        };
        assert_eq!(config.admin_socket_path(), PathBuf::from("/data/w.redb.sock"));

        config
            .apply_env_with(|k| (k == "WIDGETS_ADMIN_SOCKET").then(|| "/run/a.sock".to_string()))
            .unwrap();
        assert_eq!(config.admin_socket_path(), PathBuf::from("/run/a.sock"));
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(ServerConfig::from_toml_str("prot = 1").is_err());
        assert!(ServerConfig::from_toml_str("[tls]\ncertfile = \"a\"\nkeyfile = \"b\"\nca = \"c\"").is_err());
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = [
            ("WIDGETS_HOST", "10.0.0.1"),
            ("WIDGETS_PORT", "7000"),
            ("WIDGETS_DB", "env.redb"),
            ("WIDGETS_BACKUP_DIR", "env-backups"),
            ("WIDGETS_BACKUP_INTERVAL", "5"),
        ]
        .into_iter()
        .collect();

        let mut config = ServerConfig::default();
        config
            .apply_env_with(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.listen_addr(), "10.0.0.1:7000");
        assert_eq!(config.database_path, PathBuf::from("env.redb"));
        assert_eq!(config.backup_dir, PathBuf::from("env-backups"));
        assert_eq!(config.backup_interval(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn bad_env_numbers() {
        let mut config = ServerConfig::default();
        assert!(
            config
                .apply_env_with(|k| (k == "WIDGETS_PORT").then(|| "eighty".to_string()))
                .is_err()
        );
        assert!(
            config
                .apply_env_with(|k| (k == "WIDGETS_BACKUP_INTERVAL").then(|| "-1".to_string()))
                .is_err()
        );
    }

    #[test]
    fn load_from_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("widgets.toml");
        std::fs::write(&path, "port = 1234\n").unwrap();
        let config = ServerConfig::from_file(&path).unwrap();
        assert_eq!(config.port, 1234);

        assert!(ServerConfig::from_file(&temp.path().join("missing.toml")).is_err());
    }
}
