use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::{Backoff, EndpointConfig};
use crate::error::ClientError;
use crate::store::DEFAULT_USERNAME;

// =============================================================================
// File config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [connection]
//                    origin = "https://chat.example.com"
//
//   env var:         CHATTR_CONNECTION__ORIGIN=https://chat.example.com
//                    (double underscore = nesting)
//
//   CLI flag:        --origin https://chat.example.com

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub connection: ConnectionFileConfig,
    #[serde(default)]
    pub session: SessionFileConfig,
}

/// Connection tunables (lives under `[connection]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionFileConfig {
    #[serde(default = "default_origin")]
    pub origin: String,
    /// Opaque credential handed to the server as `?token=`.
    #[serde(default)]
    pub token: String,
    /// Frontend dev-server port whose traffic goes to `dev_backend` (0 = off).
    #[serde(default = "default_dev_port")]
    pub dev_port: u16,
    #[serde(default = "default_dev_backend")]
    pub dev_backend: String,
    /// Raised to `MIN_RECONNECT_DELAY` if lower.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Cap for exponential backoff. Equal to `reconnect_delay_ms` = flat delay.
    #[serde(default = "default_reconnect_delay_ms")]
    pub max_reconnect_delay_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionFileConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            token: String::new(),
            dev_port: default_dev_port(),
            dev_backend: default_dev_backend(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_delay_ms: default_reconnect_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// Session tunables (lives under `[session]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionFileConfig {
    /// Username assumed until the server sends its settings.
    #[serde(default = "default_username")]
    pub default_username: String,
}

impl Default for SessionFileConfig {
    fn default() -> Self {
        Self {
            default_username: default_username(),
        }
    }
}

fn default_origin() -> String {
    "http://127.0.0.1:8300".to_string()
}
fn default_dev_port() -> u16 {
    5173
}
fn default_dev_backend() -> String {
    "localhost:8300".to_string()
}
fn default_reconnect_delay_ms() -> u64 {
    2000
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_username() -> String {
    DEFAULT_USERNAME.to_string()
}

/// Build a figment that layers: defaults → config.toml → CHATTR_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `CHATTR_CONNECTION__TOKEN=abc`  →  `connection.token = "abc"`
///   `CHATTR_SESSION__DEFAULT_USERNAME=ben`  →  `session.default_username = "ben"`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("CHATTR_").split("__"))
}

/// Ephemeral overrides from the command line. Applied on top of the figment.
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub origin: Option<String>,
    pub token: Option<String>,
    pub username: Option<String>,
}

impl CliOverrides {
    pub fn apply(&self, fc: &mut FileConfig) {
        if let Some(origin) = &self.origin {
            fc.connection.origin = origin.clone();
        }
        if let Some(token) = &self.token {
            fc.connection.token = token.clone();
        }
        if let Some(username) = &self.username {
            fc.session.default_username = username.clone();
        }
    }
}

// =============================================================================
// Runtime config (derived from FileConfig)
// =============================================================================

/// Lowest reconnect delay `from_file` will produce.
pub const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub endpoint: EndpointConfig,
    pub token: String,
    pub backoff: Backoff,
    pub connect_timeout: Duration,
    pub default_username: String,
}

impl ClientConfig {
    pub fn from_file(fc: &FileConfig) -> Result<Self, ClientError> {
        let conn = &fc.connection;
        let mut endpoint = EndpointConfig::new(&conn.origin)?;
        if conn.dev_port != 0 {
            endpoint = endpoint.with_dev_override(conn.dev_port, conn.dev_backend.clone());
        }
        Ok(Self {
            endpoint,
            token: conn.token.clone(),
            backoff: Backoff::capped(
                Duration::from_millis(conn.reconnect_delay_ms).max(MIN_RECONNECT_DELAY),
                Duration::from_millis(conn.max_reconnect_delay_ms),
            ),
            connect_timeout: Duration::from_millis(conn.connect_timeout_ms),
            default_username: fc.session.default_username.clone(),
        })
    }
}

/// `~/.chattr`, where config.toml is looked up by default.
pub fn default_data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".chattr"))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ────────────────────────────────────────────────────────

    #[test]
    fn test_connection_file_config_defaults() {
        let d = ConnectionFileConfig::default();
        assert_eq!(d.origin, "http://127.0.0.1:8300");
        assert!(d.token.is_empty());
        assert_eq!(d.dev_port, 5173);
        assert_eq!(d.dev_backend, "localhost:8300");
        assert_eq!(d.reconnect_delay_ms, 2000);
        assert_eq!(d.max_reconnect_delay_ms, 2000);
        assert_eq!(d.connect_timeout_ms, 10_000);
    }

    #[test]
    fn test_session_file_config_defaults() {
        assert_eq!(SessionFileConfig::default().default_username, "user");
    }

    // ── from_file ───────────────────────────────────────────────────────

    #[test]
    fn test_client_config_defaults_to_flat_backoff() {
        let cfg = ClientConfig::from_file(&FileConfig::default()).unwrap();
        assert_eq!(cfg.backoff, Backoff::flat(Duration::from_secs(2)));
        assert_eq!(cfg.connect_timeout, Duration::from_secs(10));
        assert_eq!(cfg.endpoint.dev_port, Some(5173));
        assert_eq!(
            cfg.endpoint.socket_url("").unwrap().as_str(),
            "ws://127.0.0.1:8300/ws?token="
        );
    }

    #[test]
    fn test_dev_port_zero_disables_override() {
        let mut fc = FileConfig::default();
        fc.connection.dev_port = 0;
        let cfg = ClientConfig::from_file(&fc).unwrap();
        assert_eq!(cfg.endpoint.dev_port, None);
    }

    #[test]
    fn test_zero_reconnect_delay_is_raised_to_floor() {
        let mut fc = FileConfig::default();
        fc.connection.reconnect_delay_ms = 0;
        fc.connection.max_reconnect_delay_ms = 0;
        let cfg = ClientConfig::from_file(&fc).unwrap();
        assert_eq!(cfg.backoff, Backoff::flat(MIN_RECONNECT_DELAY));
        assert_eq!(cfg.backoff.delay(0), MIN_RECONNECT_DELAY);
        assert_eq!(cfg.backoff.delay(5), MIN_RECONNECT_DELAY);

        // A cap above the floor still grows from the floor.
        fc.connection.max_reconnect_delay_ms = 1000;
        let cfg = ClientConfig::from_file(&fc).unwrap();
        assert_eq!(cfg.backoff.delay(0), MIN_RECONNECT_DELAY);
        assert_eq!(cfg.backoff.delay(1), Duration::from_millis(200));
        assert_eq!(cfg.backoff.delay(6), Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_origin_is_an_error() {
        let mut fc = FileConfig::default();
        fc.connection.origin = "::nope".to_string();
        assert!(ClientConfig::from_file(&fc).is_err());
    }

    #[test]
    fn test_cli_overrides_win() {
        let mut fc = FileConfig::default();
        CliOverrides {
            origin: Some("https://chat.example.com".into()),
            token: Some("abc".into()),
            username: None,
        }
        .apply(&mut fc);
        assert_eq!(fc.connection.origin, "https://chat.example.com");
        assert_eq!(fc.connection.token, "abc");
        assert_eq!(fc.session.default_username, "user");
    }

    // ── load_config ─────────────────────────────────────────────────────

    #[test]
    fn test_load_config_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.connection.origin, "http://127.0.0.1:8300");
        assert_eq!(fc.session.default_username, "user");
    }

    #[test]
    fn test_load_config_toml_sets_values() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "[connection]\norigin = \"https://chat.example.com\"\nreconnect_delay_ms = 500\nmax_reconnect_delay_ms = 8000\n\n[session]\ndefault_username = \"ben\"\n",
        )
        .unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.connection.origin, "https://chat.example.com");
        assert_eq!(fc.connection.reconnect_delay_ms, 500);
        assert_eq!(fc.session.default_username, "ben");
        // Untouched keys keep their defaults
        assert_eq!(fc.connection.dev_port, 5173);

        let cfg = ClientConfig::from_file(&fc).unwrap();
        assert_eq!(
            cfg.backoff,
            Backoff::capped(Duration::from_millis(500), Duration::from_secs(8))
        );
        assert!(cfg.endpoint.is_secure());
    }
}
