use clap::Parser;
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(name = "mixtape", about = "Mixtape - pluggable storage for accounts and media collections")]
pub struct CliArgs {
    /// Path to config file
    #[arg(short, long, default_value = "mixtape.toml")]
    pub config: String,

    /// Storage backend to use (overrides config file)
    #[arg(short, long)]
    pub backend: Option<String>,

    /// Log level (overrides config file)
    #[arg(short, long)]
    pub log_level: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_database")]
    pub database: DatabaseConfig,

    #[serde(default = "default_logging")]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Backend family: "sled" or "postgres".
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Data directory for the sled backend.
    #[serde(default = "default_sled_path")]
    pub sled_path: String,

    /// Connection URL for the postgres backend.
    #[serde(default = "default_postgres_url")]
    pub postgres_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

fn default_database() -> DatabaseConfig {
    DatabaseConfig {
        backend: default_backend(),
        sled_path: default_sled_path(),
        postgres_url: default_postgres_url(),
    }
}

fn default_logging() -> LoggingConfig {
    LoggingConfig {
        level: default_log_level(),
        json: false,
    }
}

fn default_backend() -> String {
    "sled".to_string()
}

fn default_sled_path() -> String {
    "./data/mixtape".to_string()
}

fn default_postgres_url() -> String {
    "postgres://localhost:5432/mixtape".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database: default_database(),
            logging: default_logging(),
        }
    }
}

impl Config {
    pub fn load(cli: &CliArgs) -> Self {
        let mut config = match std::fs::read_to_string(&cli.config) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse config file: {}", e);
                Config::default()
            }),
            Err(_) => Config::default(),
        };

        // CLI overrides
        if let Some(ref backend) = cli.backend {
            config.database.backend = backend.clone();
        }
        if let Some(ref level) = cli.log_level {
            config.logging.level = level.clone();
        }

        config
    }
}
