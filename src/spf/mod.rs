/*
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::net::IpAddr;

use crate::dns::{DnsError, Lookup};

/// Returns the domain portion of a mailbox address: the substring after
/// the last '@', or the whole input when no '@' is present.
pub fn domain_part(addr: &str) -> &str {
    addr.rsplit_once('@').map_or(addr, |(_, domain)| domain)
}

/// SPF alignment: the header From domain must equal the envelope sender
/// domain, compared verbatim.
pub fn is_aligned(header_from: &str, envelope_from: &str) -> bool {
    domain_part(header_from) == domain_part(envelope_from)
}

/// Signature diagnostics are out of scope for this version; every DKIM
/// failure carries the same rationale.
pub fn dkim_failure_reason() -> String {
    "Failed DKIM check (details not implemented)".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Qualifier {
    Pass,
    Fail,
    SoftFail,
    Neutral,
}

impl Qualifier {
    fn as_result(&self) -> &'static str {
        match self {
            Qualifier::Pass => "pass",
            Qualifier::Fail => "fail",
            Qualifier::SoftFail => "softfail",
            Qualifier::Neutral => "neutral",
        }
    }
}

/// Evaluates the envelope sender's published policy against the source
/// IP and renders a "result: explanation" rationale. Errors never
/// propagate; they become descriptive strings inside the rationale.
pub fn spf_failure_reason(
    resolver: &impl Lookup,
    source_ip: &str,
    envelope_from: &str,
) -> String {
    let ip = match source_ip.parse::<IpAddr>() {
        Ok(ip) => ip,
        Err(_) => return format!("evaluation error: invalid source address {:?}", source_ip),
    };
    let domain = domain_part(envelope_from);
    if domain.is_empty() || domain == "unknown" || !domain.contains('.') {
        return format!(
            "evaluation error: no usable sender domain in {:?}",
            envelope_from
        );
    }

    let records = match resolver.txt_lookup(domain) {
        Ok(records) => records,
        Err(DnsError::NotFound) => return "none: no sender policy published".to_string(),
        Err(err) => return format!("evaluation error: {}", err),
    };
    let record = match records
        .iter()
        .map(|record| record.trim())
        .find(|record| *record == "v=spf1" || record.starts_with("v=spf1 "))
    {
        Some(record) => record,
        None => return "none: no sender policy published".to_string(),
    };

    match check_host(resolver, ip, domain, record) {
        Ok(rationale) => rationale,
        Err(err) => format!("evaluation error: {}", err),
    }
}

// Direct evaluation of ip4/ip6/a/all mechanisms. Terms needing
// recursive expansion (include, mx, exists, macros) are skipped; when
// nothing matches the result is neutral.
fn check_host(
    resolver: &impl Lookup,
    ip: IpAddr,
    domain: &str,
    record: &str,
) -> Result<String, String> {
    for term in record.split_ascii_whitespace().skip(1) {
        if term.contains('=') {
            // redirect=/exp= modifiers never match by themselves
            continue;
        }
        let (qualifier, mechanism) = match term.as_bytes().first() {
            Some(b'+') => (Qualifier::Pass, &term[1..]),
            Some(b'-') => (Qualifier::Fail, &term[1..]),
            Some(b'~') => (Qualifier::SoftFail, &term[1..]),
            Some(b'?') => (Qualifier::Neutral, &term[1..]),
            _ => (Qualifier::Pass, term),
        };

        let matched = if mechanism.eq_ignore_ascii_case("all") {
            true
        } else if let Some(cidr) = mechanism.strip_prefix("ip4:") {
            cidr_matches(ip, cidr, 32)?
        } else if let Some(cidr) = mechanism.strip_prefix("ip6:") {
            cidr_matches(ip, cidr, 128)?
        } else if mechanism.eq_ignore_ascii_case("a")
            || mechanism.starts_with("a:")
            || mechanism.starts_with("a/")
        {
            a_matches(resolver, ip, domain, mechanism)?
        } else {
            continue;
        };

        if matched {
            return Ok(format!(
                "{}: mechanism '{}' matched {} for {}",
                qualifier.as_result(),
                term,
                ip,
                domain
            ));
        }
    }

    Ok(format!("neutral: no mechanism matched {} for {}", ip, domain))
}

fn cidr_matches(ip: IpAddr, cidr: &str, max_prefix: u32) -> Result<bool, String> {
    let (addr, prefix) = match cidr.split_once('/') {
        Some((addr, prefix)) => (
            addr,
            prefix
                .parse::<u32>()
                .map_err(|_| format!("invalid prefix length in {:?}", cidr))?,
        ),
        None => (cidr, max_prefix),
    };
    if prefix > max_prefix {
        return Err(format!("invalid prefix length in {:?}", cidr));
    }
    let network = addr
        .parse::<IpAddr>()
        .map_err(|_| format!("invalid address in {:?}", cidr))?;
    Ok(ip_in_network(ip, network, prefix))
}

fn a_matches(
    resolver: &impl Lookup,
    ip: IpAddr,
    domain: &str,
    mechanism: &str,
) -> Result<bool, String> {
    // a, a:<domain>, a/<prefix>, a:<domain>/<prefix>
    let rest = &mechanism[1..];
    let (target, prefix) = match rest.split_once('/') {
        Some((target, prefix)) => (
            target,
            prefix
                .parse::<u32>()
                .map_err(|_| format!("invalid prefix length in {:?}", mechanism))?,
        ),
        None => (rest, 32),
    };
    if prefix > 32 {
        return Err(format!("invalid prefix length in {:?}", mechanism));
    }
    let target = target.strip_prefix(':').unwrap_or(target);
    let target = if target.is_empty() { domain } else { target };

    let addrs = match resolver.ipv4_lookup(target) {
        Ok(addrs) => addrs,
        Err(DnsError::NotFound) => return Ok(false),
        Err(err) => return Err(err.to_string()),
    };
    Ok(addrs
        .iter()
        .any(|addr| ip_in_network(ip, IpAddr::V4(*addr), prefix)))
}

fn ip_in_network(ip: IpAddr, network: IpAddr, prefix: u32) -> bool {
    match (ip, network) {
        (IpAddr::V4(ip), IpAddr::V4(network)) => {
            let mask = if prefix == 0 {
                0
            } else {
                u32::MAX << (32 - prefix)
            };
            u32::from(ip) & mask == u32::from(network) & mask
        }
        (IpAddr::V6(ip), IpAddr::V6(network)) => {
            let mask = if prefix == 0 {
                0
            } else {
                u128::MAX << (128 - prefix)
            };
            u128::from(ip) & mask == u128::from(network) & mask
        }
        _ => false,
    }
}
