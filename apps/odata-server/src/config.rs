//! Layered application configuration.
//!
//! Precedence, lowest first: built-in defaults, the YAML file given with
//! `--config`, `ODATA__*` environment variables (`__` separates sections),
//! then command-line overrides.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use odata_core::{QueryLimits, ServiceConfig};
use serde::{Deserialize, Serialize};

use crate::schema_config::SchemaConfig;

pub const ENV_PREFIX: &str = "ODATA__";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub query: QueryLimits,
    pub schema: SchemaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Public scheme and authority used in `@odata.id` links.
    pub base_url: String,
    pub route_prefix: String,
    /// Allowed CORS origins; empty disables CORS.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8087),
            base_url: "http://localhost:8087".to_owned(),
            route_prefix: "/odata".to_owned(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::Text,
        }
    }
}

impl AppConfig {
    /// Merge defaults, the optional YAML file and `ODATA__*` env vars.
    ///
    /// # Errors
    /// Returns an error if the file is missing or any layer fails to
    /// deserialize into the config shape.
    pub fn load_layered(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Some(path) = path {
            if !path.is_file() {
                anyhow::bail!("config file does not exist: {}", path.display());
            }
            figment = figment.merge(Yaml::file(path));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("invalid configuration")
    }

    /// `--port` replaces the bind port; `-v` raises the log level.
    pub fn apply_cli_overrides(&mut self, port: Option<u16>, verbose: u8) {
        if let Some(port) = port {
            self.server.bind_addr.set_port(port);
        }
        match verbose {
            0 => {}
            1 => "info".clone_into(&mut self.logging.level),
            2 => "debug".clone_into(&mut self.logging.level),
            _ => "trace".clone_into(&mut self.logging.level),
        }
    }

    /// Engine settings for the request service.
    #[must_use]
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            base_url: self.server.base_url.clone(),
            route_prefix: self.server.route_prefix.clone(),
            limits: self.query.clone(),
        }
    }

    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_yaml(&self) -> Result<String> {
        serde_saphyr::to_string(self).context("failed to render configuration as YAML")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use std::io::Write;

    #[test]
    fn defaults_without_file() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.server.bind_addr.to_string(), "127.0.0.1:8087");
        assert_eq!(cfg.server.route_prefix, "/odata");
        assert_eq!(cfg.logging.format, LogFormat::Text);
        assert_eq!(cfg.query, QueryLimits::default());
        assert!(cfg.schema.entities.is_empty());
    }

    #[test]
    fn yaml_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "server:\n  base_url: http://api.example\nquery:\n  max_top: 50\n  strict_expand: true\nlogging:\n  format: json"
        )
        .unwrap();

        let cfg = AppConfig::load_layered(Some(file.path())).unwrap();

        assert_eq!(cfg.server.base_url, "http://api.example");
        assert_eq!(cfg.query.max_top, Some(50));
        assert!(cfg.query.strict_expand);
        assert_eq!(cfg.logging.format, LogFormat::Json);
    }

    #[test]
    fn sample_config_builds_a_registry() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/odata-server.yaml");
        let cfg = AppConfig::load_layered(Some(&path)).unwrap();

        assert_eq!(cfg.query.max_top, Some(1000));
        let registry = cfg.schema.build_registry().unwrap();
        assert_eq!(registry.namespace(), "Demo");
        assert_eq!(registry.collections().len(), 2);
    }

    #[test]
    fn unknown_keys_in_leaf_sections_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "query:\n  max_tops: 5").unwrap();
        assert!(AppConfig::load_layered(Some(file.path())).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = AppConfig::load_layered(Some(Path::new("/nonexistent/odata.yaml"))).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn env_overrides_yaml() {
        Jail::expect_with(|jail| {
            jail.create_file("odata.yaml", "server:\n  route_prefix: /api\n")?;
            jail.set_env("ODATA__SERVER__ROUTE_PREFIX", "/v2");
            jail.set_env("ODATA__QUERY__MAX_ORDERBY_FIELDS", "2");

            let cfg = AppConfig::load_layered(Some(Path::new("odata.yaml")))
                .map_err(|e| e.to_string())?;

            assert_eq!(cfg.server.route_prefix, "/v2");
            assert_eq!(cfg.query.max_orderby_fields, 2);
            Ok(())
        });
    }

    #[test]
    fn cli_overrides_win() {
        let mut cfg = AppConfig::default();
        cfg.apply_cli_overrides(Some(9000), 2);
        assert_eq!(cfg.server.bind_addr.port(), 9000);
        assert_eq!(cfg.logging.level, "debug");

        let mut cfg = AppConfig::default();
        cfg.apply_cli_overrides(None, 0);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn yaml_dump_round_trips() {
        let cfg = AppConfig::default();
        let yaml = cfg.to_yaml().unwrap();
        assert!(yaml.contains("route_prefix"));
        let back: AppConfig = serde_saphyr::from_str(&yaml).unwrap();
        assert_eq!(back.server.base_url, cfg.server.base_url);
    }
}
