//! Service configuration
//!
//! Layered with figment: built-in defaults, then an optional YAML/TOML/JSON file,
//! then `CALSRV_` environment variables (`CALSRV_SERIAL__PORT=/dev/ttyS1`).

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::communicator::CommunicationConfig;
use crate::error::{CalSrvError, Result};
use crate::executor::ExecutionConfig;
use crate::steps::CalibrationParameters;
use crate::transport::{SerialTransportConfig, TransportConfig};

const ENV_PREFIX: &str = "CALSRV_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter level, overridden by `RUST_LOG`
    pub level: String,
    pub console: bool,
    /// Write daily rolling files here when set
    pub log_dir: Option<PathBuf>,
    /// JSON lines instead of the human-readable format
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: true,
            log_dir: None,
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalsrvConfig {
    pub serial: SerialTransportConfig,
    pub communication: CommunicationConfig,
    pub execution: ExecutionConfig,
    pub parameters: CalibrationParameters,
    pub logging: LoggingConfig,
}

impl CalsrvConfig {
    /// Load defaults, the optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(CalsrvConfig::default()));

        if let Some(path) = path {
            let extension = path
                .extension()
                .and_then(|s| s.to_str())
                .ok_or_else(|| CalSrvError::config(format!("No file extension: {}", path.display())))?;

            if !path.exists() {
                return Err(CalSrvError::config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }

            figment = match extension {
                "json" => figment.merge(Json::file(path)),
                "toml" => figment.merge(Toml::file(path)),
                "yaml" | "yml" => figment.merge(Yaml::file(path)),
                _ => {
                    return Err(CalSrvError::config(format!(
                        "Unsupported config format: {extension}"
                    )))
                },
            };
            debug!(path = %path.display(), "Loading configuration file");
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: CalsrvConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.serial.validate()?;
        self.communication.validate()?;
        self.parameters.validate()?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::transport::Parity;
    use figment::Jail;
    use std::io::Write;

    fn write_config(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    // Every test that loads runs in a jail, so environment overrides stay isolated
    #[test]
    fn test_defaults() {
        Jail::expect_with(|_| {
            let config = CalsrvConfig::load(None).unwrap();
            assert_eq!(config.serial.parity, Parity::Even);
            assert_eq!(config.communication.max_retries, 3);
            assert_eq!(config.execution.step_delay_ms, 500);
            assert_eq!(config.parameters.standard_voltage, 220.0);
            Ok(())
        });
    }

    #[test]
    fn test_yaml_overrides_defaults() {
        Jail::expect_with(|_| {
            let file = write_config(
                ".yaml",
                r#"
serial:
  port: /dev/ttyS3
  baud_rate: 2400
communication:
  timeout_ms: 1500
parameters:
  standard_voltage: 230.0
  power_factor: 0.5
"#,
            );

            let config = CalsrvConfig::load(Some(file.path())).unwrap();
            assert_eq!(config.serial.port, "/dev/ttyS3");
            assert_eq!(config.serial.baud_rate, 2400);
            assert_eq!(config.serial.data_bits, 8);
            assert_eq!(config.communication.timeout_ms, 1500);
            assert_eq!(config.communication.max_retries, 3);
            assert_eq!(config.parameters.standard_voltage, 230.0);
            assert_eq!(config.parameters.power_factor, 0.5);
            Ok(())
        });
    }

    #[test]
    fn test_toml_file() {
        Jail::expect_with(|_| {
            let file = write_config(
                ".toml",
                r#"
[execution]
stop_on_error = true
max_step_retries = 5
"#,
            );

            let config = CalsrvConfig::load(Some(file.path())).unwrap();
            assert!(config.execution.stop_on_error);
            assert_eq!(config.execution.max_step_retries, 5);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_rejected() {
        Jail::expect_with(|_| {
            let file = write_config(".json", r#"{"parameters": {"standard_voltage": 900.0}}"#);
            assert!(matches!(
                CalsrvConfig::load(Some(file.path())),
                Err(CalSrvError::Codec(_))
            ));

            let file = write_config(".json", r#"{"serial": {"parity": "Mark"}}"#);
            assert!(CalsrvConfig::load(Some(file.path())).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_unsupported_or_missing_file() {
        let file = write_config(".ini", "port=COM1");
        assert!(matches!(
            CalsrvConfig::load(Some(file.path())),
            Err(CalSrvError::Config(_))
        ));
        assert!(CalsrvConfig::load(Some(Path::new("/nonexistent/calsrv.yaml"))).is_err());
    }

    #[test]
    fn test_environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("calsrv.yaml", "serial:\n  port: /dev/ttyS3\n")?;
            jail.set_env("CALSRV_SERIAL__PORT", "/dev/ttyUSB7");
            jail.set_env("CALSRV_COMMUNICATION__MAX_RETRIES", "1");

            let config = CalsrvConfig::load(Some(Path::new("calsrv.yaml")))
                .map_err(|e| figment::Error::from(e.to_string()))?;
            assert_eq!(config.serial.port, "/dev/ttyUSB7");
            assert_eq!(config.communication.max_retries, 1);
            Ok(())
        });
    }
}
