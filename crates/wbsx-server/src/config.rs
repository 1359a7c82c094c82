//! Startup configuration for the export service.
//!
//! Values come from an optional TOML file first; command-line flags and
//! their environment variables override the file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use wbsx_core::TemplateVersion;
use wbsx_writer::{WriterConfig, WriterKind};

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Everything the service needs at startup
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Template workbook every export starts from
    pub template: PathBuf,
    pub layout: TemplateVersion,
    pub writer: WriterKind,
    pub host_program: Option<PathBuf>,
    pub host_args: Option<Vec<String>>,
    pub export_timeout_secs: u64,
    /// Allowed CORS origins; `*` allows any
    pub cors_origins: Vec<String>,
    /// Reject exports whose elements carry no region
    pub require_region: bool,
    /// Download name when the request does not name the export
    pub download_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            template: PathBuf::from("templates/wbs_template_actual.xlsm"),
            layout: TemplateVersion::Shared,
            writer: WriterKind::Native,
            host_program: None,
            host_args: None,
            export_timeout_secs: 60,
            cors_origins: vec!["*".into()],
            require_region: true,
            download_name: "wbs_export.xlsm".into(),
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.export_timeout_secs == 0 {
            return Err(ConfigError::Invalid("export_timeout_secs must be positive".into()));
        }
        if self.writer == WriterKind::Automation && self.host_program.is_none() {
            return Err(ConfigError::Invalid(
                "writer = \"automation\" needs host_program".into(),
            ));
        }
        if !self.download_name.ends_with(".xlsm") {
            return Err(ConfigError::Invalid("download_name must end with .xlsm".into()));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("bad listen address {}:{}: {e}", self.host, self.port)))
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_secs(self.export_timeout_secs)
    }

    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            kind: self.writer,
            host_program: self.host_program.clone(),
            host_args: self.host_args.clone(),
            timeout: Some(self.export_timeout()),
        }
    }
}

/// Command line of `wbsx-server`
#[derive(Debug, Default, Parser)]
#[command(name = "wbsx-server")]
#[command(author, version, about = "WBS Excel export API", long_about = None)]
pub struct ServerArgs {
    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// TOML configuration file
    #[arg(short, long, env = "WBSX_CONFIG")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "WBSX_HOST")]
    pub host: Option<String>,

    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Template workbook (.xlsm)
    #[arg(short, long, env = "WBSX_TEMPLATE")]
    pub template: Option<PathBuf>,

    #[arg(long, env = "WBSX_LAYOUT")]
    pub layout: Option<TemplateVersion>,

    #[arg(long, env = "WBSX_WRITER")]
    pub writer: Option<WriterKind>,

    /// Automation host program
    #[arg(long, env = "WBSX_HOST_PROGRAM")]
    pub host_program: Option<PathBuf>,

    /// Per-export timeout in seconds
    #[arg(long, value_name = "SECS", env = "WBSX_EXPORT_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Allowed CORS origins, comma separated
    #[arg(long = "cors-origin", env = "WBSX_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    /// Accept exports without a region
    #[arg(long)]
    pub allow_missing_region: bool,
}

impl ServerArgs {
    /// Resolve the final configuration: file (if any), then overrides
    pub fn resolve(&self) -> Result<ServerConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, config: &mut ServerConfig) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(template) = &self.template {
            config.template = template.clone();
        }
        if let Some(layout) = self.layout {
            config.layout = layout;
        }
        if let Some(writer) = self.writer {
            config.writer = writer;
        }
        if let Some(program) = &self.host_program {
            config.host_program = Some(program.clone());
        }
        if let Some(timeout) = self.timeout {
            config.export_timeout_secs = timeout;
        }
        if let Some(origins) = &self.cors_origins {
            config.cors_origins = origins.iter().map(|o| o.trim().to_string()).collect();
        }
        if self.allow_missing_region {
            config.require_region = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.cors_origins, vec!["*".to_string()]);
        assert!(config.require_region);
        assert_eq!(config.export_timeout(), Duration::from_secs(60));
        config.validate().unwrap();
    }

    #[test]
    fn parses_partial_toml() {
        let config = ServerConfig::from_toml_str(
            r#"
port = 9000
template = "/srv/wbs.xlsm"
layout = "legacy"
cors_origins = ["https://mdm.example.com"]
"#,
            Path::new("wbsx.toml"),
        )
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.template, PathBuf::from("/srv/wbs.xlsm"));
        assert_eq!(config.layout, TemplateVersion::Legacy);
        assert_eq!(config.writer, WriterKind::Native);
        assert_eq!(config.cors_origins, vec!["https://mdm.example.com".to_string()]);
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = ServerConfig::from_toml_str("prot = 1", Path::new("wbsx.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn automation_needs_program() {
        let config = ServerConfig {
            writer: WriterKind::Automation,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wbsx.toml");
        std::fs::write(&path, "port = 9000\nrequire_region = true\n").unwrap();

        let args = ServerArgs {
            config: Some(path),
            port: Some(9100),
            cors_origins: Some(vec!["http://localhost:3000".into(), " http://127.0.0.1:3000".into()]),
            allow_missing_region: true,
            ..ServerArgs::default()
        };
        let config = args.resolve().unwrap();
        assert_eq!(config.port, 9100);
        assert!(!config.require_region);
        assert_eq!(
            config.cors_origins,
            vec!["http://localhost:3000".to_string(), "http://127.0.0.1:3000".to_string()]
        );
    }

    #[test]
    fn bind_address() {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 8080,
            ..ServerConfig::default()
        };
        assert_eq!(config.bind_addr().unwrap().to_string(), "127.0.0.1:8080");
    }
}
