use crate::error::{CodedError, ErrorCode, TelnetResult};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "telnetd.toml";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    #[default]
    Echo,
    Shell,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub tls: TlsConfig,
    pub session: SessionConfig,
    pub shell: ShellConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Empty means the standard TELNET or TELNETS port on all interfaces.
    pub listen: String,
    /// Per-connection deadline; 0 disables it.
    pub timeout_ms: u64,
    pub handler: HandlerKind,
}

impl ServerConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TlsConfig {
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
}

impl TlsConfig {
    /// Certificate and key paths when TLS is configured. Setting only one of
    /// them is an error.
    pub fn files(&self) -> TelnetResult<Option<(PathBuf, PathBuf)>> {
        match (&self.cert_path, &self.key_path) {
            (Some(cert), Some(key)) => Ok(Some((cert.clone(), key.clone()))),
            (None, None) => Ok(None),
            _ => Err(CodedError::new(
                ErrorCode::InvalidArgument,
                "missing certificate file and key file",
            )
            .with_details("tls.cert_path and tls.key_path must be set together")
            .into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub line_discipline: bool,
    pub request_window_size: bool,
    pub naws_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            line_discipline: true,
            request_window_size: true,
            naws_timeout_ms: 2_000,
        }
    }
}

impl SessionConfig {
    pub fn naws_timeout(&self) -> Duration {
        Duration::from_millis(self.naws_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    pub prompt: String,
    pub welcome: String,
    pub exit_command: String,
    pub exit_message: String,
    pub command_not_found: String,
    pub commands: Vec<CommandConfig>,
    pub auth: Option<AuthConfig>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            prompt: "$ ".to_string(),
            welcome: "\r\nWelcome!\r\n".to_string(),
            exit_command: "exit".to_string(),
            exit_message: "Goodbye!\r\n".to_string(),
            command_not_found: ": command not found\n".to_string(),
            commands: vec![
                CommandConfig {
                    regex: "^help$".to_string(),
                    response: "Available commands: help, uname, exit\n".to_string(),
                },
                CommandConfig {
                    regex: "^uname".to_string(),
                    response: "telnetd\n".to_string(),
                },
            ],
            auth: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    pub regex: String,
    pub response: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    3_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Run a TELNET (or TELNETS) server.
    Serve(ServeArgs),
    /// Connect to a TELNET server using stdin and stdout.
    Call(CallArgs),
}

#[derive(Debug, Parser, Clone, Default)]
pub struct ServeArgs {
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub listen: Option<String>,
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    #[arg(long)]
    pub handler: Option<HandlerKind>,
    #[arg(long)]
    pub tls_cert: Option<PathBuf>,
    #[arg(long)]
    pub tls_key: Option<PathBuf>,
    #[arg(long)]
    pub log_level: Option<String>,
    #[arg(long)]
    pub log_format: Option<String>,
}

#[derive(Debug, Parser, Clone)]
pub struct CallArgs {
    /// Server address, defaults to 127.0.0.1:23.
    pub addr: Option<String>,
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

impl Config {
    pub fn load(args: &ServeArgs) -> TelnetResult<Self> {
        let mut config = if let Some(path) = &args.config {
            Self::from_file(path)?
        } else if Path::new(DEFAULT_CONFIG_FILE).exists() {
            Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
        } else {
            Self::default()
        };

        config.apply_env();
        config.apply_cli(args);
        Ok(config)
    }

    fn from_file(path: &Path) -> TelnetResult<Self> {
        let content = fs::read_to_string(path).map_err(|err| {
            CodedError::new(ErrorCode::IoError, "Failed to read config file")
                .with_details(err.to_string())
        })?;
        let parsed: Self = toml::from_str(&content).map_err(|err| {
            CodedError::new(ErrorCode::InvalidArgument, "Failed to parse config file")
                .with_details(err.to_string())
        })?;
        Ok(parsed)
    }

    fn apply_env(&mut self) {
        if let Ok(value) = env::var("TELNETD_LISTEN") {
            self.server.listen = value;
        }
        if let Ok(value) = env::var("TELNETD_TIMEOUT_MS")
            && let Ok(timeout_ms) = value.parse()
        {
            self.server.timeout_ms = timeout_ms;
        }
        if let Ok(value) = env::var("TELNETD_HANDLER")
            && let Some(handler) = parse_handler(&value)
        {
            self.server.handler = handler;
        }
        if let Ok(value) = env::var("TELNETD_TLS_CERT") {
            self.tls.cert_path = Some(PathBuf::from(value));
        }
        if let Ok(value) = env::var("TELNETD_TLS_KEY") {
            self.tls.key_path = Some(PathBuf::from(value));
        }
        if let Ok(value) = env::var("TELNETD_LOG_LEVEL") {
            self.logging.level = value;
        }
    }

    fn apply_cli(&mut self, args: &ServeArgs) {
        if let Some(listen) = &args.listen {
            self.server.listen = listen.clone();
        }
        if let Some(timeout_ms) = args.timeout_ms {
            self.server.timeout_ms = timeout_ms;
        }
        if let Some(handler) = args.handler {
            self.server.handler = handler;
        }
        if let Some(path) = &args.tls_cert {
            self.tls.cert_path = Some(path.clone());
        }
        if let Some(path) = &args.tls_key {
            self.tls.key_path = Some(path.clone());
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if let Some(format) = &args.log_format {
            self.logging.format = format.clone();
        }
    }
}

fn parse_handler(value: &str) -> Option<HandlerKind> {
    <HandlerKind as ValueEnum>::from_str(value, true).ok()
}
