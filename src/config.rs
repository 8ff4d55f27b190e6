//! Configuration module for csb-probe.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::protocols::csb::frame::DEFAULT_MAX_PAYLOAD;
use crate::protocols::csb::MessageType;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the probe
#[derive(Parser, Debug)]
#[command(name = "csb-probe")]
#[command(author = "csb-probe authors")]
#[command(version = "0.1.0")]
#[command(
    about = "Send repeated requests over one TCP connection to validate a per-connection request cap",
    long_about = None
)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Target host
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Target port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Number of requests to send on the connection
    #[arg(short = 'n', long)]
    pub count: Option<u32>,

    /// Echo payload text (sent as UTF-8)
    #[arg(long)]
    pub payload: Option<String>,

    /// Request type to send
    #[arg(long, value_enum)]
    pub kind: Option<RequestKind>,

    /// Seconds to wait after each successful exchange (0 = no delay)
    #[arg(short, long)]
    pub delay: Option<f64>,

    /// Per-read/write timeout in seconds
    #[arg(short, long)]
    pub timeout: Option<f64>,

    /// Connect timeout in seconds
    #[arg(long)]
    pub connect_timeout: Option<f64>,

    /// Expected per-connection request cap; the run passes only if the server
    /// serves exactly this many requests and then closes
    #[arg(long)]
    pub expect_cap: Option<u32>,

    /// Largest response payload accepted, in bytes
    #[arg(long)]
    pub max_payload: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Kind of request sent on every exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    #[default]
    Echo,
    Ping,
    Sysinfo,
}

impl RequestKind {
    pub fn message_type(self) -> MessageType {
        match self {
            RequestKind::Echo => MessageType::Echo,
            RequestKind::Ping => MessageType::Ping,
            RequestKind::Sysinfo => MessageType::Sysinfo,
        }
    }
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Target server configuration
#[derive(Debug, Deserialize)]
pub struct TargetConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Connect timeout in seconds
    #[serde(default = "default_timeout")]
    pub connect_timeout: f64,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout: default_timeout(),
        }
    }
}

/// Request sequence configuration
#[derive(Debug, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default = "default_payload")]
    pub payload: String,
    #[serde(default)]
    pub kind: RequestKind,
    /// Delay between requests in seconds
    #[serde(default)]
    pub delay: f64,
    /// Per-read/write timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    pub expect_cap: Option<u32>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            count: default_count(),
            payload: default_payload(),
            kind: RequestKind::default(),
            delay: 0.0,
            timeout: default_timeout(),
            expect_cap: None,
        }
    }
}

/// Wire protocol limits
#[derive(Debug, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default = "default_max_payload")]
    pub max_payload: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_payload: default_max_payload(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9090
}

fn default_count() -> u32 {
    5
}

fn default_payload() -> String {
    "hello".to_string()
}

fn default_timeout() -> f64 {
    5.0
}

fn default_max_payload() -> u32 {
    DEFAULT_MAX_PAYLOAD
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub count: u32,
    pub kind: RequestKind,
    /// Request payload bytes, already derived from `kind`.
    pub payload: Vec<u8>,
    pub delay: Duration,
    pub timeout: Duration,
    pub expect_cap: Option<u32>,
    pub max_payload: u32,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args over TOML values and validate the result.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let TomlConfig {
            target,
            run,
            protocol,
            logging,
        } = toml_config;

        let count = cli.count.unwrap_or(run.count);
        if count == 0 {
            return Err(ConfigError::Invalid("count must be at least 1".to_string()));
        }

        let kind = cli.kind.unwrap_or(run.kind);
        let payload = match kind {
            RequestKind::Echo => cli.payload.unwrap_or(run.payload).into_bytes(),
            RequestKind::Ping => b"ping".to_vec(),
            RequestKind::Sysinfo => Vec::new(),
        };
        if u32::try_from(payload.len()).is_err() {
            return Err(ConfigError::Invalid(format!(
                "payload of {} bytes does not fit a frame",
                payload.len()
            )));
        }

        Ok(Config {
            host: cli.host.unwrap_or(target.host),
            port: cli.port.unwrap_or(target.port),
            connect_timeout: seconds(
                "connect_timeout",
                cli.connect_timeout.unwrap_or(target.connect_timeout),
                false,
            )?,
            count,
            kind,
            payload,
            delay: seconds("delay", cli.delay.unwrap_or(run.delay), true)?,
            timeout: seconds("timeout", cli.timeout.unwrap_or(run.timeout), false)?,
            expect_cap: cli.expect_cap.or(run.expect_cap),
            max_payload: cli.max_payload.unwrap_or(protocol.max_payload),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                logging.level
            },
        })
    }
}

/// Convert a seconds value, rejecting negatives, NaN, and (unless allowed) zero.
fn seconds(name: &str, value: f64, allow_zero: bool) -> Result<Duration, ConfigError> {
    let valid = value.is_finite() && (value > 0.0 || (allow_zero && value == 0.0));
    if !valid {
        let bound = if allow_zero { "non-negative" } else { "positive" };
        return Err(ConfigError::Invalid(format!(
            "{name} must be a {bound} number of seconds, got {value}"
        )));
    }
    Duration::try_from_secs_f64(value)
        .map_err(|e| ConfigError::Invalid(format!("{name}: {e}")))
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        CliArgs::parse_from(std::iter::once("csb-probe").chain(args.iter().copied()))
    }

    #[test]
    fn test_default_config() {
        let config = Config::merge(cli(&[]), TomlConfig::default()).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9090);
        assert_eq!(config.count, 5);
        assert_eq!(config.payload, b"hello");
        assert_eq!(config.kind, RequestKind::Echo);
        assert_eq!(config.delay, Duration::ZERO);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.max_payload, 32 * 1024 * 1024);
        assert_eq!(config.expect_cap, None);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [target]
            host = "10.0.0.7"
            port = 7000
            connect_timeout = 1.5

            [run]
            count = 10
            payload = "abc"
            kind = "echo"
            delay = 0.25
            timeout = 2.0
            expect_cap = 3

            [protocol]
            max_payload = 4096

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.target.host, "10.0.0.7");
        assert_eq!(config.target.port, 7000);
        assert_eq!(config.run.count, 10);
        assert_eq!(config.run.expect_cap, Some(3));
        assert_eq!(config.protocol.max_payload, 4096);
        assert_eq!(config.logging.level, "debug");

        let merged = Config::merge(cli(&[]), config).unwrap();
        assert_eq!(merged.delay, Duration::from_millis(250));
        assert_eq!(merged.connect_timeout, Duration::from_millis(1500));
        assert_eq!(merged.log_level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [target]
            port = 7000
            [run]
            count = 10
            payload = "from-file"
            "#,
        )
        .unwrap();

        let config = Config::merge(
            cli(&["-p", "9191", "-n", "4", "--payload", "from-cli"]),
            toml_config,
        )
        .unwrap();
        assert_eq!(config.port, 9191);
        assert_eq!(config.count, 4);
        assert_eq!(config.payload, b"from-cli");
    }

    #[test]
    fn test_kind_payloads() {
        let ping = Config::merge(cli(&["--kind", "ping"]), TomlConfig::default()).unwrap();
        assert_eq!(ping.payload, b"ping");
        assert_eq!(ping.kind.message_type(), MessageType::Ping);

        let sysinfo = Config::merge(cli(&["--kind", "sysinfo"]), TomlConfig::default()).unwrap();
        assert!(sysinfo.payload.is_empty());
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            Config::merge(cli(&["-n", "0"]), TomlConfig::default()),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::merge(cli(&["-t", "0"]), TomlConfig::default()),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::merge(cli(&["--delay=-1"]), TomlConfig::default()),
            Err(ConfigError::Invalid(_))
        ));
        assert!(Config::merge(cli(&["-d", "0"]), TomlConfig::default()).is_ok());
    }
}
