//! Configuration management for the server.

use clap::Parser;
use std::env;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "notably-server", about = "Notably record store server")]
pub struct Cli {
    /// Listen address; a bare ":port" binds every interface
    #[arg(long, env = "NOTABLY_ADDR", default_value = ":8080")]
    pub addr: String,
}

/// Server configuration from CLI flags and environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address
    pub addr: String,
    /// Physical DynamoDB table name
    pub table_name: String,
    /// Optional endpoint override, for a local emulator
    pub endpoint_url: Option<String>,
}

impl Config {
    /// Load configuration from the parsed CLI and environment variables.
    pub fn from_env(cli: &Cli) -> Result<Self, ConfigError> {
        let table_name =
            env::var("DYNAMODB_TABLE_NAME").map_err(|_| ConfigError::MissingTableName)?;
        let endpoint_url = env::var("DYNAMODB_ENDPOINT_URL").ok();

        Ok(Self {
            addr: normalize_addr(&cli.addr),
            table_name,
            endpoint_url,
        })
    }
}

fn normalize_addr(addr: &str) -> String {
    match addr.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => addr.to_string(),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DYNAMODB_TABLE_NAME environment variable is required")]
    MissingTableName,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_port_binds_all_interfaces() {
        assert_eq!(normalize_addr(":8080"), "0.0.0.0:8080");
        assert_eq!(normalize_addr("127.0.0.1:9000"), "127.0.0.1:9000");
    }
}
