use crate::model::{
    AddressBlock, Config, ExclusionRule, IncludeEntry, OutputConfig, OutputFormat,
    PortClassification, Protocol,
};
use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const DEFAULT_DIAL_TIMEOUT_MS: u64 = 3000;
const DEFAULT_READ_TIMEOUT_MS: u64 = 5000;
const DEFAULT_WEBHOOK_TIMEOUT_MS: u64 = 5000;
const DEFAULT_OVERALL_TIMEOUT_MS: u64 = 15000;
const DEFAULT_SCAN_INTERVAL_SECS: u64 = 3600;

/// On-disk YAML layout. Every key is optional; zero timeouts fall back to
/// their defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub webhook_url: String,
    pub token: String,
    pub machine_id: String,
    pub dial_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub webhook_timeout_ms: u64,
    pub overall_timeout_ms: u64,
    pub concurrency_limit: i64,
    pub ports: Vec<u16>,
    pub include_list: Vec<IncludeItem>,
    pub exclude_list: Vec<String>,
    pub exclude_certs: Vec<ExclusionRule>,
    pub allowed_protocols: Vec<String>,
    pub web_ports: Vec<u16>,
    pub smtp_ports: Vec<u16>,
    pub enable_ipv6: bool,
    pub scan_throttle_delay_ms: u64,
    pub scan_interval_seconds: u64,
    pub debug: bool,
}

/// Include entries may be written as a bare string or as a mapping with an
/// explicit protocol.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IncludeItem {
    Plain(String),
    Entry(IncludeEntry),
}

impl From<IncludeItem> for IncludeEntry {
    fn from(item: IncludeItem) -> Self {
        match item {
            IncludeItem::Plain(target) => IncludeEntry {
                target,
                protocol: String::new(),
            },
            IncludeItem::Entry(entry) => entry,
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            token: String::new(),
            machine_id: String::new(),
            dial_timeout_ms: DEFAULT_DIAL_TIMEOUT_MS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            webhook_timeout_ms: DEFAULT_WEBHOOK_TIMEOUT_MS,
            overall_timeout_ms: DEFAULT_OVERALL_TIMEOUT_MS,
            concurrency_limit: 1,
            ports: vec![443],
            include_list: Vec::new(),
            exclude_list: Vec::new(),
            exclude_certs: Vec::new(),
            allowed_protocols: Vec::new(),
            web_ports: Vec::new(),
            smtp_ports: Vec::new(),
            enable_ipv6: false,
            scan_throttle_delay_ms: 0,
            scan_interval_seconds: DEFAULT_SCAN_INTERVAL_SECS,
            debug: false,
        }
    }
}

/// Reads the YAML file at `path`. A missing file is only an error when the
/// caller asked for that file explicitly.
pub fn load(path: &Path, required: bool) -> anyhow::Result<FileConfig> {
    if !required && !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(FileConfig::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read config {}", path.display()))?;
    parse(&raw).with_context(|| format!("invalid config {}", path.display()))
}

pub fn parse(raw: &str) -> anyhow::Result<FileConfig> {
    if raw.trim().is_empty() {
        return Ok(FileConfig::default());
    }
    Ok(serde_yaml::from_str(raw)?)
}

impl FileConfig {
    pub fn into_config(self) -> anyhow::Result<Config> {
        let allowed_protocols = if self.allowed_protocols.is_empty() {
            Protocol::ALL.to_vec()
        } else {
            self.allowed_protocols
                .iter()
                .map(|name| name.parse::<Protocol>())
                .collect::<Result<Vec<_>, _>>()
                .context("allowed_protocols")?
        };

        let defaults = PortClassification::default();
        let port_classes = PortClassification {
            web_ports: if self.web_ports.is_empty() {
                defaults.web_ports
            } else {
                self.web_ports.into_iter().collect()
            },
            smtp_ports: if self.smtp_ports.is_empty() {
                defaults.smtp_ports
            } else {
                self.smtp_ports.into_iter().collect()
            },
        };

        let webhook_url = Some(self.webhook_url.trim().to_string()).filter(|u| !u.is_empty());

        Ok(Config {
            webhook_url,
            token: self.token.trim().to_string(),
            machine_id: self.machine_id,
            dial_timeout: millis_or(self.dial_timeout_ms, DEFAULT_DIAL_TIMEOUT_MS),
            read_timeout: millis_or(self.read_timeout_ms, DEFAULT_READ_TIMEOUT_MS),
            webhook_timeout: millis_or(self.webhook_timeout_ms, DEFAULT_WEBHOOK_TIMEOUT_MS),
            overall_timeout: millis_or(self.overall_timeout_ms, DEFAULT_OVERALL_TIMEOUT_MS),
            concurrency: usize::try_from(self.concurrency_limit).unwrap_or(0).max(1),
            ports: if self.ports.is_empty() {
                vec![443]
            } else {
                self.ports
            },
            include: self.include_list.into_iter().map(Into::into).collect(),
            exclude_addrs: self
                .exclude_list
                .iter()
                .filter(|entry| !entry.trim().is_empty())
                .map(|entry| entry.parse::<AddressBlock>())
                .collect::<Result<Vec<_>, _>>()
                .context("exclude_list")?,
            exclude_certs: self.exclude_certs,
            allowed_protocols,
            port_classes,
            enable_ipv6: self.enable_ipv6,
            throttle_delay: Duration::from_millis(self.scan_throttle_delay_ms),
            scan_interval: Duration::from_secs(if self.scan_interval_seconds == 0 {
                DEFAULT_SCAN_INTERVAL_SECS
            } else {
                self.scan_interval_seconds
            }),
            debug: self.debug,
            output: OutputConfig {
                format: OutputFormat::Jsonl,
            },
        })
    }
}

fn millis_or(value: u64, default: u64) -> Duration {
    Duration::from_millis(if value == 0 { default } else { value })
}

/// Checks run once the file and the command line are merged.
pub fn validate(cfg: &Config) -> anyhow::Result<()> {
    if let Some(url) = &cfg.webhook_url {
        validate_webhook_url(url)?;
    }
    if cfg.include.iter().all(|entry| entry.target.trim().is_empty()) {
        anyhow::bail!("no targets: add include_list entries or pass --host");
    }
    if cfg.ports.contains(&0) {
        anyhow::bail!("port 0 is not a valid scan port");
    }
    Ok(())
}

pub fn validate_webhook_url(raw: &str) -> anyhow::Result<()> {
    let url = url::Url::parse(raw).with_context(|| format!("invalid webhook url {raw:?}"))?;
    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(()),
        "http" | "https" => anyhow::bail!("webhook url {raw:?} has no host"),
        other => anyhow::bail!("webhook url must be http or https, got {other}"),
    }
}
