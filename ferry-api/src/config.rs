//! Layered configuration
//!
//! Sources, highest precedence first:
//! 1. `FERRY_` environment variables, nested keys split on `__`
//!    (`FERRY_DATABASE__URL`)
//! 2. `./{name}.toml`
//! 3. `$XDG_CONFIG_HOME/ferry/{name}.toml`
//! 4. `/etc/ferry/{name}.toml`
//! 5. built-in defaults
//!
//! ```toml
//! [service]
//! name = "ferry"
//! port = 8445
//!
//! [database]
//! url = "postgres://ferry@db.example.org/ferry"
//!
//! [[access.accessors]]
//! name = "/DC=org/DC=example/OU=Services/CN=sync.example.org"
//! type = "dn_role"
//! write = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::auth::AccessorKind;
use crate::error::Result;

const ENV_PREFIX: &str = "FERRY_";
const ENV_SPLIT: &str = "__";
const SYSTEM_DIR: &str = "/etc/ferry";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub middleware: MiddlewareConfig,
    /// Without it the server cannot start unless a connector is supplied
    pub database: Option<DatabaseConfig>,
    pub access: AccessConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Reported by `ping` and in startup logs
    pub name: String,
    pub port: u16,
    /// Bare level or a full `tracing` filter directive
    pub log_level: String,
    /// Requests running longer are answered with 408
    pub timeout_secs: u64,
    pub environment: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "ferry".to_string(),
            port: 8445,
            log_level: "info".to_string(),
            timeout_secs: 30,
            environment: "production".to_string(),
        }
    }
}

impl ServiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Seconds to wait for a pooled connection
    pub connection_timeout_secs: u64,
    /// Connection attempts after the first, at startup only
    pub max_retries: u32,
    /// First retry delay; doubles on each attempt
    pub retry_delay_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/ferry".to_string(),
            max_connections: 20,
            min_connections: 2,
            connection_timeout_secs: 10,
            max_retries: 5,
            retry_delay_secs: 2,
        }
    }
}

/// Known clients and where their identity is found
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Header carrying the verified client certificate DN, set by the TLS proxy
    pub dn_header: String,
    pub accessors: Vec<AccessorConfig>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            dn_header: "x-ssl-client-s-dn".to_string(),
            accessors: Vec::new(),
        }
    }
}

/// One known client, identified by certificate DN or IP address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessorConfig {
    /// DN in `/`-separated form, or IP address
    pub name: String,

    #[serde(rename = "type")]
    pub kind: AccessorKind,

    /// Role accessors may also call write endpoints
    #[serde(default)]
    pub write: bool,

    #[serde(default = "active_by_default")]
    pub active: bool,
}

fn active_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MiddlewareConfig {
    pub body_limit_mb: usize,
    pub catch_panic: bool,
    pub cors_mode: CorsMode,
    pub request_id_header: String,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            body_limit_mb: 1,
            catch_panic: true,
            cors_mode: CorsMode::Restrictive,
            request_id_header: "x-request-id".to_string(),
        }
    }
}

/// Cross-origin policy for browser clients
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorsMode {
    /// Any origin, method and header
    Permissive,
    /// No cross-origin access
    #[default]
    Restrictive,
    /// Same as restrictive
    Disabled,
}

impl Config {
    /// Load `{name}.toml` from the search path
    ///
    /// Every file found is merged, so a local file only needs the keys it
    /// overrides.
    pub fn discover(name: &str) -> Result<Self> {
        let mut figment = Self::defaults();
        for path in Self::search_path(name).iter().rev() {
            if path.exists() {
                tracing::info!(path = %path.display(), "loading configuration");
                figment = figment.merge(Toml::file(path));
            } else {
                tracing::debug!(path = %path.display(), "no configuration file");
            }
        }
        Ok(figment.merge(Self::environment()).extract()?)
    }

    /// Load a single file, skipping the search path
    ///
    /// A missing file leaves the defaults in place.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::defaults()
            .merge(Toml::file(path.as_ref()))
            .merge(Self::environment())
            .extract()?)
    }

    /// Candidate files for `name`, highest priority first
    fn search_path(name: &str) -> Vec<PathBuf> {
        let file = format!("{name}.toml");
        let mut paths = vec![PathBuf::from(&file)];

        if let Some(path) = xdg::BaseDirectories::with_prefix("ferry").find_config_file(&file) {
            paths.push(path);
        }
        paths.push(Path::new(SYSTEM_DIR).join(&file));
        paths
    }

    fn defaults() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
    }

    fn environment() -> Env {
        Env::prefixed(ENV_PREFIX).split(ENV_SPLIT)
    }

    pub fn database_url(&self) -> Option<&str> {
        self.database.as_ref().map(|db| db.url.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service.port, 8445);
        assert_eq!(config.service.log_level, "info");
        assert_eq!(config.access.dn_header, "x-ssl-client-s-dn");
        assert_eq!(config.middleware.request_id_header, "x-request-id");
        assert!(config.database_url().is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[service]
name = "ferry-test"
port = 9000

[middleware]
cors_mode = "permissive"

[database]
url = "postgres://ferry@localhost/ferry"
max_connections = 4

[[access.accessors]]
name = "10.0.0.5"
type = "ip_whitelist"

[[access.accessors]]
name = "/DC=org/CN=sync"
type = "dn_role"
write = true
"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();

        assert_eq!(config.service.name, "ferry-test");
        assert_eq!(config.service.port, 9000);
        assert_eq!(config.service.log_level, "info");
        assert_eq!(config.middleware.cors_mode, CorsMode::Permissive);
        let database = config.database.unwrap();
        assert_eq!(database.max_connections, 4);
        assert_eq!(database.retry_delay_secs, 2);
        assert_eq!(config.access.accessors.len(), 2);
        assert_eq!(config.access.accessors[0].kind, AccessorKind::IpWhitelist);
        assert!(!config.access.accessors[0].write);
        assert!(config.access.accessors[1].write);
        assert!(config.access.accessors[1].active);
    }

    #[test]
    fn test_missing_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.service.name, "ferry");
    }

    #[test]
    fn test_search_path_order() {
        let paths = Config::search_path("staging");
        assert_eq!(paths.first(), Some(&PathBuf::from("staging.toml")));
        assert_eq!(paths.last(), Some(&PathBuf::from("/etc/ferry/staging.toml")));
    }
}
