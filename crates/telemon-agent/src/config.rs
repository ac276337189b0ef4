use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Wire protocol used to reach the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Http,
    Grpc,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentConfig {
    /// Server address, `host:port` or a full URL.
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    /// Shared MAC secret; requests are signed when set.
    #[serde(default)]
    pub key: Option<String>,
    /// Server public key (PEM); bodies are encrypted when set.
    #[serde(default)]
    pub crypto_key: Option<PathBuf>,
    /// Maximum outbound requests in flight.
    #[serde(default = "default_rate_limit")]
    pub rate_limit: usize,
    #[serde(default = "default_transport")]
    pub transport: TransportKind,
    /// One bulk request per report instead of one request per metric.
    #[serde(default = "default_batch")]
    pub batch: bool,
}

fn default_address() -> String {
    "localhost:8080".to_string()
}

fn default_poll_interval() -> u64 {
    2
}

fn default_report_interval() -> u64 {
    10
}

fn default_rate_limit() -> usize {
    1
}

fn default_transport() -> TransportKind {
    TransportKind::Http
}

fn default_batch() -> bool {
    true
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            poll_interval_secs: default_poll_interval(),
            report_interval_secs: default_report_interval(),
            key: None,
            crypto_key: None,
            rate_limit: default_rate_limit(),
            transport: default_transport(),
            batch: default_batch(),
        }
    }
}

/// Command line of the agent binary. Every flag falls back to its
/// environment variable; anything left unset comes from the config file
/// or the built-in default.
#[derive(Debug, Default, Parser)]
#[command(name = "telemon-agent", about = "Samples process and host metrics and reports them")]
pub struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(short = 'a', long, env = "ADDRESS")]
    pub address: Option<String>,

    /// Sampling period in seconds.
    #[arg(short = 'p', long = "poll-interval", env = "POLL_INTERVAL")]
    pub poll_interval: Option<u64>,

    /// Reporting period in seconds.
    #[arg(short = 'r', long = "report-interval", env = "REPORT_INTERVAL")]
    pub report_interval: Option<u64>,

    #[arg(short = 'k', long, env = "KEY")]
    pub key: Option<String>,

    #[arg(long = "crypto-key", env = "CRYPTO_KEY")]
    pub crypto_key: Option<PathBuf>,

    #[arg(short = 'l', long = "rate-limit", env = "RATE_LIMIT")]
    pub rate_limit: Option<usize>,

    #[arg(long, env = "TRANSPORT", value_enum)]
    pub transport: Option<TransportKind>,

    #[arg(long, env = "BATCH")]
    pub batch: Option<bool>,
}

impl AgentConfig {
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
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, cli: &Cli) {
        if let Some(address) = &cli.address {
            self.address = address.clone();
        }
        if let Some(v) = cli.poll_interval {
            self.poll_interval_secs = v;
        }
        if let Some(v) = cli.report_interval {
            self.report_interval_secs = v;
        }
        if let Some(key) = &cli.key {
            self.key = Some(key.clone());
        }
        if let Some(path) = &cli.crypto_key {
            self.crypto_key = Some(path.clone());
        }
        if let Some(v) = cli.rate_limit {
            self.rate_limit = v;
        }
        if let Some(v) = cli.transport {
            self.transport = v;
        }
        if let Some(v) = cli.batch {
            self.batch = v;
        }
        // An empty KEY= in the environment means "no key".
        if self.key.as_deref() == Some("") {
            self.key = None;
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_secs == 0 {
            bail!("poll interval must be at least 1 second");
        }
        if self.report_interval_secs == 0 {
            bail!("report interval must be at least 1 second");
        }
        if self.rate_limit == 0 {
            bail!("rate limit must be at least 1");
        }
        Ok(())
    }

    /// Base URL of the server, adding `http://` when no scheme is given.
    pub fn server_url(&self) -> String {
        let addr = self.address.trim().trim_end_matches('/');
        if addr.contains("://") {
            return addr.to_string();
        }
        format!("http://{addr}")
    }
}
