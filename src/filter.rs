use crate::model::ExclusionRule;
use openssl::nid::Nid;
use openssl::x509::{X509NameRef, X509};
use tracing::debug;

/// Case-insensitive match supporting `*`, `prefix*`, `*suffix` and
/// `*contains*`. An empty pattern matches nothing.
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    let pattern = pattern.to_lowercase();
    let value = value.to_lowercase();

    if pattern == "*" {
        return true;
    }
    match (pattern.strip_prefix('*'), pattern.strip_suffix('*')) {
        (Some(_), Some(_)) => value.contains(&pattern[1..pattern.len() - 1]),
        (Some(suffix), None) => value.ends_with(suffix),
        (None, Some(prefix)) => value.starts_with(prefix),
        (None, None) => value == pattern,
    }
}

pub fn is_excluded(issuer: &str, common_name: &str, rules: &[ExclusionRule]) -> bool {
    rules.iter().any(|rule| {
        wildcard_match(&rule.issuer, issuer) || wildcard_match(&rule.cn, common_name)
    })
}

/// Keeps the certificates no rule excludes, in their original DER form and
/// order. Bytes that do not parse as X.509 are dropped.
pub fn filter_certificates(raw: &[Vec<u8>], rules: &[ExclusionRule]) -> Vec<Vec<u8>> {
    raw.iter()
        .filter(|der| {
            let cert = match X509::from_der(der) {
                Ok(cert) => cert,
                Err(err) => {
                    debug!(error = %err, len = der.len(), "dropping unparsable certificate");
                    return false;
                }
            };
            let issuer = distinguished_name(cert.issuer_name());
            let cn = common_name(cert.subject_name());
            if is_excluded(&issuer, &cn, rules) {
                debug!(%cn, %issuer, "skipping certificate matched by exclude_certs");
                return false;
            }
            true
        })
        .cloned()
        .collect()
}

/// Renders a name as `CN=..,O=..,C=..`, most specific attribute first.
pub fn distinguished_name(name: &X509NameRef) -> String {
    let mut parts = Vec::new();
    for entry in name.entries() {
        let key = entry.object().nid().short_name().unwrap_or("UNKNOWN");
        let value = entry.data().to_string().unwrap_or_default();
        if !value.is_empty() {
            parts.push(format!("{key}={value}"));
        }
    }
    parts.reverse();
    parts.join(",")
}

pub fn common_name(name: &X509NameRef) -> String {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().to_string().ok())
        .unwrap_or_default()
}
