//! Configuration types for the relay server

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default cap on a single websocket message, in bytes
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

/// Environment variable that supersedes the configured port.
///
/// When both listeners were configured, TLS is deactivated as well: hosting
/// platforms that inject a port expect a single plain listener behind their
/// own terminating proxy.
pub const PORT_ENV_VAR: &str = "PORT";

/// Main configuration for the relay server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application namespaces, one pool per entry
    #[serde(default)]
    pub apps: Vec<AppConfig>,

    /// Single-frame size cap enforced by the websocket transport
    #[serde(rename = "maxPayload", default = "default_max_payload")]
    pub max_payload: usize,

    /// Plain websocket listener endpoint
    #[serde(rename = "httpConfig", default, skip_serializing_if = "Option::is_none")]
    pub http_config: Option<HttpConfig>,

    /// TLS websocket listener endpoint
    #[serde(rename = "httpsConfig", default, skip_serializing_if = "Option::is_none")]
    pub https_config: Option<HttpsConfig>,

    /// Lower the default log filter to debug when no RUST_LOG is set
    #[serde(default)]
    pub log_verbose: bool,

    /// Admin token enabling user-token admission checks (open admission if unset)
    #[serde(rename = "adminToken", default, skip_serializing_if = "Option::is_none")]
    pub admin_token: Option<String>,
}

/// One application namespace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Logical name used in logs
    pub name: String,

    /// URL path sockets are routed by (must start with '/')
    pub path: String,

    /// Allow multiple sessions to listen on the same address and
    /// auto-connect to each other
    #[serde(default)]
    pub address_sharing: bool,
}

/// Plain listener endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Bind host
    pub host: String,

    /// Bind port (0 selects an ephemeral port)
    pub port: u16,
}

/// TLS listener endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpsConfig {
    /// Bind host
    pub host: String,

    /// Bind port
    pub port: u16,

    /// PEM file holding the private key (PKCS#8 or RSA)
    pub ssl_key_file: PathBuf,

    /// PEM file holding the certificate chain
    pub ssl_cert_file: PathBuf,
}

fn default_max_payload() -> usize {
    DEFAULT_MAX_PAYLOAD
}

impl Default for Config {
    fn default() -> Self {
        Self {
            apps: vec![AppConfig {
                name: "relay".to_string(),
                path: "/".to_string(),
                address_sharing: false,
            }],
            max_payload: DEFAULT_MAX_PAYLOAD,
            http_config: Some(HttpConfig {
                host: "0.0.0.0".to_string(),
                port: 12776,
            }),
            https_config: None,
            log_verbose: false,
            admin_token: None,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `apps` is empty, a path does not start with '/', or two apps share a path
    /// - `max_payload` is zero
    /// - neither `http_config` nor `https_config` is present
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.apps.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one app entry is required".to_string(),
            ));
        }

        let mut seen_paths = std::collections::HashSet::new();
        for app in &self.apps {
            if !app.path.starts_with('/') {
                return Err(Error::InvalidConfig(format!(
                    "app path must start with '/', got {:?}",
                    app.path
                )));
            }
            if !seen_paths.insert(app.path.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate app path {:?}",
                    app.path
                )));
            }
        }

        if self.max_payload == 0 {
            return Err(Error::InvalidConfig(
                "maxPayload must be greater than zero".to_string(),
            ));
        }

        if self.http_config.is_none() && self.https_config.is_none() {
            return Err(Error::InvalidConfig(
                "either httpConfig or httpsConfig is required".to_string(),
            ));
        }

        Ok(())
    }

    /// Force the configured listener onto `port`.
    ///
    /// When both listeners were configured the TLS listener is deactivated
    /// and the plain one moves to the override port; a TLS-only deployment
    /// keeps TLS and moves it to the override port instead.
    pub fn apply_port_override(&mut self, port: u16) {
        if self.http_config.is_some() {
            if self.https_config.take().is_some() {
                warn!("port override active, TLS listener deactivated");
            }
        } else if let Some(https) = self.https_config.as_mut() {
            https.port = port;
            return;
        }
        match self.http_config.as_mut() {
            Some(http) => http.port = port,
            None => {
                self.http_config = Some(HttpConfig {
                    host: "0.0.0.0".to_string(),
                    port,
                });
            }
        }
    }

    /// Apply the `PORT` environment override if present
    pub fn apply_env_override(&mut self) {
        if let Ok(value) = std::env::var(PORT_ENV_VAR) {
            match value.parse::<u16>() {
                Ok(port) => {
                    info!(port, "using port from {} environment variable", PORT_ENV_VAR);
                    self.apply_port_override(port);
                }
                Err(_) => warn!(
                    %value,
                    "ignoring unparsable {} environment variable", PORT_ENV_VAR
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_apps_fails() {
        let mut config = Config::default();
        config.apps.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_app_path_fails() {
        let mut config = Config::default();
        config.apps[0].path = "callapp".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_app_path_fails() {
        let mut config = Config::default();
        let dup = config.apps[0].clone();
        config.apps.push(dup);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_listeners_fails() {
        let mut config = Config::default();
        config.http_config = None;
        config.https_config = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_wire_field_names() {
        let json = r#"{
            "apps": [
                { "name": "chat", "path": "/chatapp" },
                { "name": "call", "path": "/callapp", "address_sharing": true }
            ],
            "maxPayload": 65536,
            "httpConfig": { "host": "0.0.0.0", "port": 8080 },
            "adminToken": "secret",
            "log_verbose": true
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.apps.len(), 2);
        assert!(!config.apps[0].address_sharing);
        assert!(config.apps[1].address_sharing);
        assert_eq!(config.max_payload, 65536);
        assert_eq!(config.http_config.as_ref().unwrap().port, 8080);
        assert!(config.https_config.is_none());
        assert_eq!(config.admin_token.as_deref(), Some("secret"));
        assert!(config.log_verbose);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_port_override_drops_tls() {
        let mut config = Config::default();
        config.https_config = Some(HttpsConfig {
            host: "0.0.0.0".to_string(),
            port: 443,
            ssl_key_file: PathBuf::from("key.pem"),
            ssl_cert_file: PathBuf::from("cert.pem"),
        });
        config.apply_port_override(9000);
        assert_eq!(config.http_config.as_ref().unwrap().port, 9000);
        assert!(config.https_config.is_none());
    }

    #[test]
    fn test_port_override_creates_http_listener() {
        let mut config = Config::default();
        config.http_config = None;
        config.apply_port_override(9000);
        assert_eq!(config.http_config.as_ref().unwrap().port, 9000);
    }

    #[test]
    fn test_port_override_keeps_tls_only_listener() {
        let mut config = Config::default();
        config.http_config = None;
        config.https_config = Some(HttpsConfig {
            host: "0.0.0.0".to_string(),
            port: 443,
            ssl_key_file: PathBuf::from("key.pem"),
            ssl_cert_file: PathBuf::from("cert.pem"),
        });
        config.apply_port_override(9000);
        let https = config.https_config.as_ref().expect("TLS listener must survive");
        assert_eq!(https.port, 9000);
        assert!(config.http_config.is_none());
    }
}
