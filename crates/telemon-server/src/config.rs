use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::durability::DurabilityMode;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address, `host:port`.
    #[serde(default = "default_address")]
    pub address: String,
    /// gRPC listen address; gRPC is off when unset.
    #[serde(default)]
    pub grpc_address: Option<String>,
    /// Snapshot period in seconds; `0` writes a snapshot on every update.
    #[serde(default = "default_store_interval")]
    pub store_interval_secs: u64,
    /// Snapshot file; empty disables snapshots.
    #[serde(default = "default_file_storage_path")]
    pub file_storage_path: String,
    #[serde(default = "default_restore")]
    pub restore: bool,
    /// Shared MAC secret.
    #[serde(default)]
    pub key: Option<String>,
    /// Private key (PEM) for encrypted request bodies.
    #[serde(default)]
    pub crypto_key: Option<PathBuf>,
    /// CIDR of admitted agents.
    #[serde(default)]
    pub trusted_subnet: Option<String>,
    /// Relational store; the in-memory store is used when unset.
    #[serde(default)]
    pub database_dsn: Option<String>,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_address() -> String {
    "localhost:8080".to_string()
}

fn default_store_interval() -> u64 {
    300
}

fn default_file_storage_path() -> String {
    "/tmp/metrics-db.json".to_string()
}

fn default_restore() -> bool {
    true
}

fn default_shutdown_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            grpc_address: None,
            store_interval_secs: default_store_interval(),
            file_storage_path: default_file_storage_path(),
            restore: default_restore(),
            key: None,
            crypto_key: None,
            trusted_subnet: None,
            database_dsn: None,
            shutdown_timeout_secs: default_shutdown_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Command line of the server binary. Flags fall back to their
/// environment variables, then to the config file and built-in defaults.
#[derive(Debug, Default, Parser)]
#[command(name = "telemon-server", about = "Collects gauge and counter metrics from agents")]
pub struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(short = 'a', long, env = "ADDRESS")]
    pub address: Option<String>,

    #[arg(short = 'g', long = "grpc-address", env = "GRPC_ADDRESS")]
    pub grpc_address: Option<String>,

    /// Snapshot period in seconds (0 = on every update).
    #[arg(short = 'i', long = "store-interval", env = "STORE_INTERVAL")]
    pub store_interval: Option<u64>,

    #[arg(short = 'f', long = "file-storage-path", env = "FILE_STORAGE_PATH")]
    pub file_storage_path: Option<String>,

    #[arg(short = 'r', long, env = "RESTORE")]
    pub restore: Option<bool>,

    #[arg(short = 'k', long, env = "KEY")]
    pub key: Option<String>,

    #[arg(long = "crypto-key", env = "CRYPTO_KEY")]
    pub crypto_key: Option<PathBuf>,

    #[arg(short = 't', long = "trusted-subnet", env = "TRUSTED_SUBNET")]
    pub trusted_subnet: Option<String>,

    #[arg(short = 'd', long = "database-dsn", env = "DATABASE_DSN")]
    pub database_dsn: Option<String>,
}

impl ServerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Defaults, then the file named by `--config`, then flags and env.
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply(cli);
        Ok(config)
    }

    fn apply(&mut self, cli: &Cli) {
        if let Some(address) = &cli.address {
            self.address = address.clone();
        }
        if let Some(address) = &cli.grpc_address {
            self.grpc_address = Some(address.clone());
        }
        if let Some(v) = cli.store_interval {
            self.store_interval_secs = v;
        }
        if let Some(path) = &cli.file_storage_path {
            self.file_storage_path = path.clone();
        }
        if let Some(v) = cli.restore {
            self.restore = v;
        }
        if let Some(key) = &cli.key {
            self.key = Some(key.clone());
        }
        if let Some(path) = &cli.crypto_key {
            self.crypto_key = Some(path.clone());
        }
        if let Some(cidr) = &cli.trusted_subnet {
            self.trusted_subnet = Some(cidr.clone());
        }
        if let Some(dsn) = &cli.database_dsn {
            self.database_dsn = Some(dsn.clone());
        }
        // Empty values from the environment mean "unset".
        for slot in [
            &mut self.key,
            &mut self.trusted_subnet,
            &mut self.database_dsn,
            &mut self.grpc_address,
        ] {
            if slot.as_deref().is_some_and(|v| v.trim().is_empty()) {
                *slot = None;
            }
        }
        if self
            .crypto_key
            .as_deref()
            .is_some_and(|p| p.as_os_str().is_empty())
        {
            self.crypto_key = None;
        }
    }

    /// Snapshot file, or `None` when snapshots are disabled.
    pub fn snapshot_path(&self) -> Option<&Path> {
        let path = self.file_storage_path.trim();
        (!path.is_empty()).then(|| Path::new(path))
    }

    pub fn durability_mode(&self) -> DurabilityMode {
        DurabilityMode::from_interval_secs(self.store_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
