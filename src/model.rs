use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::util::now_unix;

/// Ceiling on one handshake or STARTTLS attempt, dial included.
pub const DEFAULT_OVERALL_TIMEOUT: Duration = Duration::from_secs(15);

/// One host scanned as a unit: every port runs in parallel, the scan returns
/// once all of them finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTarget {
    pub ip: IpAddr,
    pub hostname: String,
    pub ports: BTreeSet<u16>,
    pub protocol: Option<String>,
}

impl ScanTarget {
    pub fn new(
        ip: IpAddr,
        hostname: impl Into<String>,
        ports: impl IntoIterator<Item = u16>,
        protocol: Option<String>,
    ) -> Self {
        Self {
            ip,
            hostname: hostname.into(),
            ports: ports.into_iter().collect(),
            protocol: protocol.filter(|p| !p.trim().is_empty()),
        }
    }

    pub fn port_target(&self, port: u16) -> PortTarget {
        PortTarget {
            ip: self.ip,
            hostname: self.hostname.clone(),
            port,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortTarget {
    pub ip: IpAddr,
    pub hostname: String,
    pub port: u16,
}

impl PortTarget {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Name announced through SNI, falling back to the address when the
    /// target was given as a bare IP.
    pub fn server_name(&self) -> String {
        if self.hostname.is_empty() {
            self.ip.to_string()
        } else {
            self.hostname.clone()
        }
    }
}

impl fmt::Display for PortTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hostname.is_empty() {
            write!(f, "{}", self.addr())
        } else {
            write!(f, "{} ({})", self.addr(), self.hostname)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http1,
    H2,
    H3,
    Smtp,
    Ldap,
    Imap,
    Pop3,
    Custom,
}

impl Protocol {
    pub const ALL: [Protocol; 8] = [
        Protocol::Http1,
        Protocol::H2,
        Protocol::H3,
        Protocol::Smtp,
        Protocol::Ldap,
        Protocol::Imap,
        Protocol::Pop3,
        Protocol::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http1 => "http1",
            Protocol::H2 => "h2",
            Protocol::H3 => "h3",
            Protocol::Smtp => "smtp",
            Protocol::Ldap => "ldap",
            Protocol::Imap => "imap",
            Protocol::Pop3 => "pop3",
            Protocol::Custom => "custom",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown protocol {0:?}")]
pub struct UnknownProtocol(pub String);

impl FromStr for Protocol {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Protocol::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownProtocol(s.to_string()))
    }
}

/// Key type the offered cipher suites authenticate with. Probing each family
/// on its own surfaces dual ECDSA/RSA deployments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CipherFamily {
    Ecdsa,
    Rsa,
}

impl CipherFamily {
    pub const ALL: [CipherFamily; 2] = [CipherFamily::Ecdsa, CipherFamily::Rsa];

    pub fn as_str(&self) -> &'static str {
        match self {
            CipherFamily::Ecdsa => "ecdsa",
            CipherFamily::Rsa => "rsa",
        }
    }

    /// Suites offered for the family, newest and strongest first. The legacy
    /// CBC, 3DES and RC4 suites stay in so old servers still answer.
    pub fn cipher_suites(&self) -> &'static [u16] {
        match self {
            CipherFamily::Ecdsa => &[
                0xc02b, // TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256
                0xc02c, // TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384
                0xcca9, // TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256
                0xc023, // TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA256
                0xc00a, // TLS_ECDHE_ECDSA_WITH_AES_256_CBC_SHA
                0xc009, // TLS_ECDHE_ECDSA_WITH_AES_128_CBC_SHA
                0xc007, // TLS_ECDHE_ECDSA_WITH_RC4_128_SHA
            ],
            CipherFamily::Rsa => &[
                0xc02f, // TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256
                0xc030, // TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384
                0xcca8, // TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256
                0xc027, // TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA256
                0xc014, // TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA
                0xc013, // TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA
                0xc012, // TLS_ECDHE_RSA_WITH_3DES_EDE_CBC_SHA
                0xc011, // TLS_ECDHE_RSA_WITH_RC4_128_SHA
                0x009c, // TLS_RSA_WITH_AES_128_GCM_SHA256
                0x009d, // TLS_RSA_WITH_AES_256_GCM_SHA384
                0x003c, // TLS_RSA_WITH_AES_128_CBC_SHA256
                0x0035, // TLS_RSA_WITH_AES_256_CBC_SHA
                0x002f, // TLS_RSA_WITH_AES_128_CBC_SHA
                0x000a, // TLS_RSA_WITH_3DES_EDE_CBC_SHA
                0x0005, // TLS_RSA_WITH_RC4_128_SHA
            ],
        }
    }

    pub fn signature_schemes(&self) -> &'static [u16] {
        match self {
            CipherFamily::Ecdsa => &[
                0x0403, // ecdsa_secp256r1_sha256
                0x0503, // ecdsa_secp384r1_sha384
                0x0603, // ecdsa_secp521r1_sha512
            ],
            CipherFamily::Rsa => &[
                0x0401, // rsa_pkcs1_sha256
                0x0501, // rsa_pkcs1_sha384
                0x0601, // rsa_pkcs1_sha512
                0x0804, // rsa_pss_rsae_sha256
                0x0805, // rsa_pss_rsae_sha384
                0x0806, // rsa_pss_rsae_sha512
            ],
        }
    }
}

impl fmt::Display for CipherFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw material harvested by one handshake, before it is tied to a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub handshake_type: Option<CipherFamily>,
    pub certificates: Vec<Vec<u8>>,
    pub timestamp: i64,
}

impl ProbeOutcome {
    pub fn new(handshake_type: Option<CipherFamily>, certificates: Vec<Vec<u8>>) -> Self {
        Self {
            handshake_type,
            certificates,
            timestamp: now_unix(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub ip: String,
    pub port: u16,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handshake_type: Option<CipherFamily>,
    #[serde(serialize_with = "serialize_der_list")]
    pub certificates: Vec<Vec<u8>>,
    pub timestamp: i64,
}

impl ScanResult {
    pub fn from_outcome(target: &PortTarget, outcome: ProbeOutcome) -> Self {
        Self {
            ip: target.ip.to_string(),
            port: target.port,
            hostname: target.hostname.clone(),
            handshake_type: outcome.handshake_type,
            certificates: dedup_certificates(outcome.certificates),
            timestamp: outcome.timestamp,
        }
    }

    pub fn with_certificates(self, certificates: Vec<Vec<u8>>) -> Self {
        Self {
            certificates,
            ..self
        }
    }
}

/// Drops byte-identical repeats, keeping the first occurrence in place.
pub fn dedup_certificates(mut certificates: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
    let mut seen = HashSet::new();
    certificates.retain(|der| seen.insert(der.clone()));
    certificates
}

fn serialize_der_list<S: Serializer>(certs: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
    use base64::Engine;
    use serde::ser::SerializeSeq;

    let mut seq = serializer.serialize_seq(Some(certs.len()))?;
    for der in certs {
        seq.serialize_element(&base64::engine::general_purpose::STANDARD.encode(der))?;
    }
    seq.end()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionRule {
    #[serde(default)]
    pub issuer: String,
    #[serde(default)]
    pub cn: String,
}

/// One `exclude_list` entry: a single address or a CIDR block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressBlock {
    network: IpAddr,
    prefix: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid address or CIDR block {0:?}")]
pub struct InvalidAddressBlock(pub String);

impl AddressBlock {
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                prefix_eq(&net.octets(), &ip.octets(), self.prefix)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                prefix_eq(&net.octets(), &ip.octets(), self.prefix)
            }
            _ => false,
        }
    }
}

fn prefix_eq(net: &[u8], ip: &[u8], prefix: u8) -> bool {
    let full = usize::from(prefix / 8);
    let rest = prefix % 8;
    if net[..full] != ip[..full] {
        return false;
    }
    if rest == 0 {
        return true;
    }
    let mask = 0xffu8 << (8 - rest);
    net[full] & mask == ip[full] & mask
}

impl FromStr for AddressBlock {
    type Err = InvalidAddressBlock;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidAddressBlock(s.to_string());
        let raw = s.trim();
        let (addr, prefix) = match raw.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (raw, None),
        };
        let network: IpAddr = addr.parse().map_err(|_| invalid())?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(prefix) => prefix.parse::<u8>().map_err(|_| invalid())?,
            None => max,
        };
        if prefix > max {
            return Err(invalid());
        }
        Ok(Self { network, prefix })
    }
}

impl fmt::Display for AddressBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

/// Ports whose protocol is implied when the target does not name one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortClassification {
    pub web_ports: BTreeSet<u16>,
    pub smtp_ports: BTreeSet<u16>,
}

impl Default for PortClassification {
    fn default() -> Self {
        Self {
            web_ports: [443, 8443, 4433, 5001, 10443].into_iter().collect(),
            smtp_ports: [25, 465, 587].into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jsonl,
    Pretty,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Jsonl => write!(f, "jsonl"),
            OutputFormat::Pretty => write!(f, "pretty"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncludeEntry {
    pub target: String,
    #[serde(default)]
    pub protocol: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub webhook_url: Option<String>,
    pub token: String,
    pub machine_id: String,
    pub dial_timeout: Duration,
    pub read_timeout: Duration,
    pub webhook_timeout: Duration,
    pub overall_timeout: Duration,
    pub concurrency: usize,
    pub ports: Vec<u16>,
    pub include: Vec<IncludeEntry>,
    pub exclude_addrs: Vec<AddressBlock>,
    pub exclude_certs: Vec<ExclusionRule>,
    pub allowed_protocols: Vec<Protocol>,
    pub port_classes: PortClassification,
    pub enable_ipv6: bool,
    pub throttle_delay: Duration,
    pub scan_interval: Duration,
    pub debug: bool,
    pub output: OutputConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            webhook_url: None,
            token: String::new(),
            machine_id: String::new(),
            dial_timeout: Duration::from_millis(3000),
            read_timeout: Duration::from_millis(5000),
            webhook_timeout: Duration::from_millis(5000),
            overall_timeout: DEFAULT_OVERALL_TIMEOUT,
            concurrency: 1,
            ports: vec![443],
            include: Vec::new(),
            exclude_addrs: Vec::new(),
            exclude_certs: Vec::new(),
            allowed_protocols: Protocol::ALL.to_vec(),
            port_classes: PortClassification::default(),
            enable_ipv6: false,
            throttle_delay: Duration::ZERO,
            scan_interval: Duration::from_secs(3600),
            debug: false,
            output: OutputConfig {
                format: OutputFormat::Jsonl,
            },
        }
    }
}
