//! Connection target grammar.
//!
//! A target is either a bare host list (`host`, `host:port`, `h1,h2`) or the
//! same list prefixed with `couchbase://` / `couchbases://`. Hosts under the
//! managed-cloud domain always get the secure scheme and relaxed certificate
//! checks, whatever the ssl flag says.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::ExplorerError;
use crate::models::enums::Scheme;

pub const CLOUD_DOMAIN_SUFFIX: &str = ".cloud.couchbase.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    /// Normalised connection string including the scheme prefix.
    pub connection_string: String,
    pub scheme: Scheme,
    pub hosts: Vec<String>,
    pub tls: bool,
    pub relaxed_certificates: bool,
    pub dns_srv: bool,
    pub force_ipv4: bool,
}

impl ConnectTarget {
    pub fn is_cloud(&self) -> bool {
        self.relaxed_certificates
    }

    /// Host (without port) used for the HTTP management and query endpoints.
    pub fn primary_host(&self) -> &str {
        self.hosts
            .first()
            .map(|h| strip_port(h))
            .unwrap_or("localhost")
    }
}

static TARGET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:([A-Za-z][A-Za-z0-9+.\-]*)://)?([^/?]*)(?:[/?].*)?$").expect("target pattern")
});

static HOST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\[[0-9A-Fa-f:.]+\]|[A-Za-z0-9._\-]+)(?::[0-9]{1,5})?$").expect("host pattern")
});

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host.split(']').next().map(|h| &h[1..]).unwrap_or(host);
    }
    host.split(':').next().unwrap_or(host)
}

/// True when any host in `raw` belongs to the managed-cloud domain.
///
/// Parses `raw` exactly as [`resolve_target`] does; unparseable input is
/// never cloud.
pub fn is_cloud_host(raw: &str) -> bool {
    resolve_target(raw, false).is_ok_and(|t| t.is_cloud())
}

fn host_in_cloud_domain(host: &str) -> bool {
    strip_port(host)
        .to_ascii_lowercase()
        .ends_with(CLOUD_DOMAIN_SUFFIX)
}

pub fn resolve_target(raw: &str, use_ssl: bool) -> Result<ConnectTarget, ExplorerError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ExplorerError::validation("host", "Host is required"));
    }

    let caps = TARGET_RE
        .captures(trimmed)
        .ok_or_else(|| ExplorerError::validation("host", format!("Invalid host '{}'", raw)))?;

    let explicit_scheme = match caps.get(1).map(|m| m.as_str().to_ascii_lowercase()) {
        None => None,
        Some(s) if s == "couchbase" => Some(Scheme::Plain),
        Some(s) if s == "couchbases" => Some(Scheme::Secure),
        Some(other) => {
            return Err(ExplorerError::validation(
                "host",
                format!("Unsupported scheme '{}://'", other),
            ));
        }
    };

    let host_list = caps.get(2).map(|m| m.as_str()).unwrap_or("");
    let hosts: Vec<String> = host_list
        .split([',', ';'])
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect();

    if hosts.is_empty() {
        return Err(ExplorerError::validation("host", "Host is required"));
    }
    if let Some(bad) = hosts.iter().find(|h| !HOST_RE.is_match(h)) {
        return Err(ExplorerError::validation(
            "host",
            format!("Invalid host '{}'", bad),
        ));
    }

    let cloud = hosts.iter().any(|h| host_in_cloud_domain(h));

    let scheme = if cloud {
        Scheme::Secure
    } else {
        explicit_scheme.unwrap_or(if use_ssl { Scheme::Secure } else { Scheme::Plain })
    };

    Ok(ConnectTarget {
        connection_string: format!("{}{}", scheme.prefix(), hosts.join(",")),
        scheme,
        tls: scheme == Scheme::Secure,
        relaxed_certificates: cloud,
        dns_srv: cloud,
        force_ipv4: cloud,
        hosts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_follows_ssl_flag() {
        let plain = resolve_target("localhost", false).unwrap();
        assert_eq!(plain.connection_string, "couchbase://localhost");
        assert!(!plain.tls);
        assert!(!plain.relaxed_certificates);

        let secure = resolve_target("10.0.0.5", true).unwrap();
        assert_eq!(secure.connection_string, "couchbases://10.0.0.5");
        assert!(secure.tls);
        assert!(!secure.relaxed_certificates);
    }

    #[test]
    fn explicit_scheme_wins_over_flag() {
        let t = resolve_target("couchbase://db1,db2", true).unwrap();
        assert_eq!(t.scheme, Scheme::Plain);
        assert_eq!(t.hosts, vec!["db1".to_string(), "db2".to_string()]);

        let t = resolve_target("COUCHBASES://db1:11207", false).unwrap();
        assert_eq!(t.scheme, Scheme::Secure);
        assert_eq!(t.primary_host(), "db1");
    }

    #[test]
    fn cloud_host_forces_secure_and_relaxed() {
        let t = resolve_target("cb.abc123.cloud.couchbase.com", false).unwrap();
        assert_eq!(t.scheme, Scheme::Secure);
        assert!(t.tls && t.relaxed_certificates && t.dns_srv && t.force_ipv4);

        let t = resolve_target("couchbase://cb.abc123.cloud.couchbase.com", false).unwrap();
        assert_eq!(t.connection_string, "couchbases://cb.abc123.cloud.couchbase.com");
    }

    #[test]
    fn rejects_bad_input() {
        assert!(resolve_target("   ", false).is_err());
        assert!(resolve_target("http://localhost", false).is_err());
        assert!(resolve_target("couchbase://", false).is_err());
        assert!(resolve_target("bad host", false).is_err());
    }

    #[test]
    fn trailing_path_and_params_are_dropped() {
        let t = resolve_target("couchbase://db1/default?network=external", false).unwrap();
        assert_eq!(t.connection_string, "couchbase://db1");
    }

    #[test]
    fn cloud_detection_is_case_insensitive() {
        assert!(is_cloud_host("CB.X.Cloud.Couchbase.com"));
        assert!(!is_cloud_host("localhost"));
        assert!(is_cloud_host("couchbases://cb.x.cloud.couchbase.com:18091"));
    }

    #[test]
    fn cloud_suffix_must_end_the_host() {
        let host = "x.cloud.couchbase.com.example.org";
        assert!(!is_cloud_host(host));
        assert!(!resolve_target(host, false).unwrap().is_cloud());
        assert!(!is_cloud_host("bad host.cloud.couchbase.com"));
    }

    #[test]
    fn ipv6_literal_host() {
        let t = resolve_target("[::1]:8091", false).unwrap();
        assert_eq!(t.primary_host(), "::1");
    }
}
