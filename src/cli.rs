use crate::config;
use crate::model::{Config, IncludeEntry, OutputFormat};
use anyhow::Context;
use clap::{ArgAction, Parser};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Debug, Parser)]
#[command(author, version, about = "TLS certificate discovery agent", long_about = None)]
pub struct Cli {
    /// YAML configuration file (defaults to ./config.yaml when present)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Scan a single host in addition to the include list
    #[arg(short = 'H', long = "host", value_name = "HOST")]
    pub host: Option<String>,

    /// Port for --host; without it the configured port list is used
    #[arg(short = 'p', long = "port", value_name = "PORT", requires = "host")]
    pub port: Option<u16>,

    /// Protocol for --host (http1, h2, h3, smtp, ldap, imap, pop3, custom)
    #[arg(long = "protocol", value_name = "PROTO", requires = "host")]
    pub protocol: Option<String>,

    /// Concurrent port probes per target
    #[arg(long = "concurrency")]
    pub concurrency: Option<usize>,

    /// Dial timeout in milliseconds
    #[arg(long = "dial-timeout", value_name = "MS")]
    pub dial_timeout_ms: Option<u64>,

    /// Webhook receiving the results; without one results go to stdout
    #[arg(long = "webhook-url", value_name = "URL")]
    pub webhook_url: Option<String>,

    /// Bearer token for the webhook
    #[arg(long = "token", env = "CERTSCAN_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Output format for dry runs
    #[arg(long = "output", default_value_t = OutputFormat::Jsonl)]
    pub output: OutputFormat,

    /// Shorthand for --output pretty
    #[arg(long = "pretty", action = ArgAction::SetTrue)]
    pub pretty: bool,

    /// Repeat the scan every scan_interval_seconds
    #[arg(short = 'd', long = "daemon", action = ArgAction::SetTrue)]
    pub daemon: bool,

    /// Debug logging
    #[arg(long = "debug", action = ArgAction::SetTrue)]
    pub debug: bool,
}

impl Cli {
    /// Loads the config file and lays the command-line overrides on top.
    pub fn into_config(self) -> anyhow::Result<Config> {
        let (path, required) = match &self.config {
            Some(path) => (path.clone(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };
        let mut cfg = config::load(&path, required)?.into_config()?;
        self.apply(&mut cfg)?;
        config::validate(&cfg)?;
        Ok(cfg)
    }

    pub fn apply(&self, cfg: &mut Config) -> anyhow::Result<()> {
        if let Some(host) = &self.host {
            let host = host.trim();
            if host.is_empty() {
                anyhow::bail!("--host must not be empty");
            }
            let target = match (self.port, host.parse::<IpAddr>()) {
                (Some(port), Ok(IpAddr::V6(ip))) => format!("[{ip}]:{port}"),
                (Some(port), _) => format!("{host}:{port}"),
                (None, _) => host.to_string(),
            };
            if let Some(protocol) = &self.protocol {
                protocol
                    .parse::<crate::model::Protocol>()
                    .context("--protocol")?;
            }
            cfg.include.push(IncludeEntry {
                target,
                protocol: self.protocol.clone().unwrap_or_default(),
            });
        }

        if let Some(concurrency) = self.concurrency {
            cfg.concurrency = concurrency.max(1);
        }
        if let Some(ms) = self.dial_timeout_ms {
            if ms == 0 {
                anyhow::bail!("--dial-timeout must be greater than zero");
            }
            cfg.dial_timeout = Duration::from_millis(ms);
        }
        if let Some(url) = &self.webhook_url {
            cfg.webhook_url = Some(url.trim().to_string()).filter(|u| !u.is_empty());
        }
        if let Some(token) = &self.token {
            cfg.token = token.trim().to_string();
        }
        cfg.output.format = if self.pretty {
            OutputFormat::Pretty
        } else {
            self.output.clone()
        };
        cfg.debug |= self.debug;
        Ok(())
    }
}
