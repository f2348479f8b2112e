use crate::model::{AddressBlock, Config, IncludeEntry, ScanTarget};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use tokio::net::lookup_host;
use tracing::{debug, warn};

/// One include entry split into host and optional port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    pub host: String,
    pub port: Option<u16>,
}

/// Accepts `ip`, `host`, `host:port`, `[v6]:port` and bare IPv6 literals.
pub fn parse_entry(entry: &str) -> Option<HostEntry> {
    let entry = entry.trim();
    if entry.is_empty() {
        return None;
    }

    if let Ok(addr) = entry.parse::<SocketAddr>() {
        return Some(HostEntry {
            host: addr.ip().to_string(),
            port: Some(addr.port()),
        });
    }
    if let Ok(ip) = entry.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
        return Some(HostEntry {
            host: ip.to_string(),
            port: None,
        });
    }

    match entry.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            let port: u16 = port.parse().ok().filter(|p| *p != 0)?;
            let host = host.trim();
            (!host.is_empty()).then(|| HostEntry {
                host: host.to_string(),
                port: Some(port),
            })
        }
        Some(_) => None,
        None => Some(HostEntry {
            host: entry.to_string(),
            port: None,
        }),
    }
}

/// Turns the include list into scan targets. Entries that fail to parse or
/// resolve are logged and skipped; an entry repeated with the same protocol
/// is scanned once.
pub async fn resolve_targets(cfg: &Config) -> Vec<ScanTarget> {
    let mut seen = HashSet::new();
    let mut targets = Vec::new();
    let exclusions = Exclusions::new(cfg);

    for include in &cfg.include {
        let key = (
            include.target.trim().to_ascii_lowercase(),
            include.protocol.trim().to_ascii_lowercase(),
        );
        if !seen.insert(key) {
            debug!(
                entry = %include.target,
                protocol = %include.protocol,
                "duplicate include entry"
            );
            continue;
        }
        targets.extend(resolve_entry(include, cfg, &exclusions).await);
    }

    targets
}

/// `exclude_list` plus the addresses the include list names literally, which
/// are always scanned.
struct Exclusions<'a> {
    blocks: &'a [AddressBlock],
    included: HashSet<IpAddr>,
}

impl<'a> Exclusions<'a> {
    fn new(cfg: &'a Config) -> Self {
        let included: HashSet<IpAddr> = cfg
            .include
            .iter()
            .filter_map(|include| parse_entry(&include.target))
            .filter_map(|entry| entry.host.parse().ok())
            .collect();
        Self {
            blocks: &cfg.exclude_addrs,
            included,
        }
    }

    fn skips(&self, ip: IpAddr) -> bool {
        !self.included.contains(&ip) && self.blocks.iter().any(|block| block.contains(ip))
    }
}

async fn resolve_entry(
    include: &IncludeEntry,
    cfg: &Config,
    exclusions: &Exclusions<'_>,
) -> Vec<ScanTarget> {
    let Some(entry) = parse_entry(&include.target) else {
        warn!(entry = %include.target, "skipping invalid include entry");
        return Vec::new();
    };

    let ports: Vec<u16> = match entry.port {
        Some(port) => vec![port],
        None => cfg.ports.clone(),
    };
    let protocol = Some(include.protocol.clone());

    if let Ok(ip) = entry.host.parse::<IpAddr>() {
        if ip.is_ipv6() && !cfg.enable_ipv6 {
            debug!(%ip, "skipping IPv6 address (IPv6 disabled)");
            return Vec::new();
        }
        if exclusions.skips(ip) {
            debug!(%ip, "skipping excluded address");
            return Vec::new();
        }
        return vec![ScanTarget::new(ip, entry.host.clone(), ports, protocol)];
    }

    let addrs = match lookup_host((entry.host.as_str(), 0)).await {
        Ok(addrs) => addrs,
        Err(err) => {
            warn!(host = %entry.host, error = %err, "could not resolve host");
            return Vec::new();
        }
    };

    let mut ips: Vec<IpAddr> = Vec::new();
    for addr in addrs {
        let ip = addr.ip();
        if ip.is_ipv6() && !cfg.enable_ipv6 {
            debug!(host = %entry.host, %ip, "skipping resolved IPv6 address");
            continue;
        }
        if exclusions.skips(ip) {
            debug!(host = %entry.host, %ip, "skipping excluded address");
            continue;
        }
        if !ips.contains(&ip) {
            ips.push(ip);
        }
    }

    ips.into_iter()
        .map(|ip| ScanTarget::new(ip, entry.host.clone(), ports.clone(), protocol.clone()))
        .collect()
}
