/*
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::{
    fmt::Display,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use log::{error, warn};
use trust_dns_resolver::{
    config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts},
    error::{ResolveError, ResolveErrorKind},
    Resolver as SyncResolver,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsError {
    /// NXDOMAIN or an answer section without usable records.
    NotFound,
    Timeout,
    /// Resolver-infrastructure failure, e.g. no reachable nameservers.
    Resolution(String),
}

impl Display for DnsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DnsError::NotFound => write!(f, "Record not found"),
            DnsError::Timeout => write!(f, "Timeout"),
            DnsError::Resolution(err) => write!(f, "{}", err),
        }
    }
}

/// The two queries the analyzer issues, kept behind a capability trait
/// so tests can substitute a deterministic table for live DNS.
pub trait Lookup {
    fn ipv4_lookup(&self, name: &str) -> Result<Vec<Ipv4Addr>, DnsError>;
    fn txt_lookup(&self, name: &str) -> Result<Vec<String>, DnsError>;
}

/// Blocking resolver over a configurable nameserver set. Lookups block
/// for up to the configured timeout per query.
pub struct Resolver {
    resolver: SyncResolver,
}

impl Resolver {
    pub fn new_system_conf() -> crate::Result<Self> {
        SyncResolver::from_system_conf()
            .map(|resolver| Resolver { resolver })
            .map_err(|err| crate::Error::Resolver(err.to_string()))
    }

    pub fn with_nameservers(addrs: &[IpAddr], timeout: Duration) -> crate::Result<Self> {
        let mut config = ResolverConfig::new();
        for addr in addrs {
            config.add_name_server(NameServerConfig::new(
                SocketAddr::new(*addr, 53),
                Protocol::Udp,
            ));
        }
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        SyncResolver::new(config, opts)
            .map(|resolver| Resolver { resolver })
            .map_err(|err| crate::Error::Resolver(err.to_string()))
    }
}

impl Lookup for Resolver {
    fn ipv4_lookup(&self, name: &str) -> Result<Vec<Ipv4Addr>, DnsError> {
        let lookup = self.resolver.ipv4_lookup(name)?;
        Ok(lookup
            .as_lookup()
            .record_iter()
            .filter_map(|r| (*r.data()?.as_a()?).into())
            .collect())
    }

    fn txt_lookup(&self, name: &str) -> Result<Vec<String>, DnsError> {
        let lookup = self.resolver.txt_lookup(name)?;
        Ok(lookup
            .as_lookup()
            .record_iter()
            .filter_map(|r| {
                let txt_data = r.data()?.as_txt()?.txt_data();
                let mut entry = String::with_capacity(255 * txt_data.len());
                for data in txt_data {
                    entry.push_str(&String::from_utf8_lossy(data));
                }
                Some(entry)
            })
            .collect())
    }
}

impl From<ResolveError> for DnsError {
    fn from(err: ResolveError) -> Self {
        match err.kind() {
            ResolveErrorKind::NoRecordsFound { .. } => DnsError::NotFound,
            ResolveErrorKind::Timeout => DnsError::Timeout,
            _ => DnsError::Resolution(err.to_string()),
        }
    }
}

/// Listed/not-listed status for one source IP against one DNSBL zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlocklistStatus {
    pub listed: bool,
    pub detail: String,
}

impl BlocklistStatus {
    fn not_listed() -> Self {
        BlocklistStatus {
            listed: false,
            detail: "Not listed".to_string(),
        }
    }

    fn not_checked(detail: &str) -> Self {
        BlocklistStatus {
            listed: false,
            detail: detail.to_string(),
        }
    }
}

/// Checks a source IP against one DNSBL zone using the reverse-octet
/// query form. The query shape is IPv4-specific, so IPv6 and unparsable
/// source addresses short-circuit to "not checked" instead of producing
/// a malformed name. Lookup failures are contained here; a run never
/// aborts over one query.
pub fn check_blocklist(resolver: &impl Lookup, source_ip: &str, zone: &str) -> BlocklistStatus {
    let ip = match source_ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => ip,
        Ok(IpAddr::V6(_)) => return BlocklistStatus::not_checked("Not checked (IPv6 address)"),
        Err(_) => return BlocklistStatus::not_checked("Not checked (invalid address)"),
    };
    let [a, b, c, d] = ip.octets();
    let query = format!("{}.{}.{}.{}.{}", d, c, b, a, zone);

    match resolver.ipv4_lookup(&query) {
        Ok(addrs) if !addrs.is_empty() => BlocklistStatus {
            listed: true,
            detail: addrs
                .iter()
                .map(|addr| addr.to_string())
                .collect::<Vec<_>>()
                .join(" "),
        },
        Ok(_) | Err(DnsError::NotFound) => BlocklistStatus::not_listed(),
        Err(DnsError::Timeout) => {
            warn!("Timeout querying {} against {}", source_ip, zone);
            BlocklistStatus {
                listed: false,
                detail: "Timeout".to_string(),
            }
        }
        Err(DnsError::Resolution(err)) => {
            error!("Error querying {} against {}: {}", source_ip, zone, err);
            BlocklistStatus {
                listed: false,
                detail: format!("DNS error: {}", err),
            }
        }
    }
}
