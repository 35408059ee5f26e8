use clap::{Parser, ValueEnum};
use pinhole_telemetry::LogFormat;
use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use std::path::PathBuf;

pub const LISTEN_ADDR_ENV: &str = "PINHOLE_LISTEN_ADDR";
pub const BASE_URL_ENV: &str = "PINHOLE_BASE_URL";
pub const DEFAULT_KEY_ENV: &str = "PINHOLE_DEFAULT_KEY";
pub const STORAGE_BACKEND_ENV: &str = "PINHOLE_STORAGE_BACKEND";
pub const RECORDS_FILE_ENV: &str = "PINHOLE_RECORDS_FILE";
pub const ASSOCIATIONS_FILE_ENV: &str = "PINHOLE_ASSOCIATIONS_FILE";
pub const POSTGRES_DSN_ENV: &str = "PINHOLE_POSTGRES_DSN";
pub const AUTH_SECRET_ENV: &str = "PINHOLE_AUTH_SECRET";
pub const LOG_FORMAT_ENV: &str = "PINHOLE_LOG_FORMAT";
pub const DELETION_WORKERS_ENV: &str = "PINHOLE_DELETION_WORKERS";
pub const DELETION_DEADLINE_ENV: &str = "PINHOLE_DELETION_DEADLINE_SECS";

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_RECORDS_FILE: &str = "/tmp/short-url-db.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackendArg {
    #[value(name = "file")]
    File,
    #[value(name = "postgres")]
    Postgres,
}

impl Display for StorageBackendArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackendArg::File => write!(f, "file"),
            StorageBackendArg::Postgres => write!(f, "postgres"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "pinhole-gateway")]
pub struct CLI {
    #[arg(long, env = LISTEN_ADDR_ENV, default_value = DEFAULT_LISTEN_ADDR)]
    pub listen_addr: SocketAddr,

    /// Prefix of rendered short URLs. Defaults to `http://<listen-addr>`.
    #[arg(long, env = BASE_URL_ENV)]
    pub base_url: Option<String>,

    /// Key used for every URL shortened without a custom key.
    #[arg(long, env = DEFAULT_KEY_ENV)]
    pub default_key: Option<String>,

    #[arg(
        long,
        env = STORAGE_BACKEND_ENV,
        value_enum,
        default_value_t = StorageBackendArg::File
    )]
    pub storage: StorageBackendArg,

    #[arg(long, env = RECORDS_FILE_ENV, default_value = DEFAULT_RECORDS_FILE)]
    pub records_file: PathBuf,

    /// Defaults to the records file with `2` appended to its stem.
    #[arg(long, env = ASSOCIATIONS_FILE_ENV)]
    pub associations_file: Option<PathBuf>,

    #[arg(long, env = POSTGRES_DSN_ENV, required_if_eq("storage", "postgres"))]
    pub postgres_dsn: Option<String>,

    #[arg(long, env = AUTH_SECRET_ENV, hide_env_values = true)]
    pub auth_secret: String,

    #[arg(long, env = LOG_FORMAT_ENV, value_enum, default_value = "text")]
    pub log_format: LogFormatArg,

    #[arg(long, env = DELETION_WORKERS_ENV, default_value_t = pinhole_shortener::deletion::DEFAULT_WORKERS)]
    pub deletion_workers: usize,

    #[arg(long, env = DELETION_DEADLINE_ENV, default_value_t = 10)]
    pub deletion_deadline_secs: u64,
}

impl CLI {
    pub fn base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}", self.listen_addr))
    }
}
