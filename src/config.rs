/*
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::{
    fs,
    net::IpAddr,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

/// Run configuration consumed by the analyzer. All DNS and blocklist
/// plumbing is explicit here instead of living in module-level state, so
/// two runs with different settings never interfere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Root directory scanned recursively for report containers.
    pub directory: PathBuf,
    /// Nameservers used for blocklist and sender-policy lookups. Empty
    /// means the system resolver configuration.
    #[serde(default)]
    pub nameservers: Vec<IpAddr>,
    #[serde(default = "default_dns_timeout_secs")]
    pub dns_timeout_secs: u64,
    /// DNSBL zone suffixes, checked independently per source IP. Keyed
    /// zones carry their query key as a leading label, e.g.
    /// "<key>.zen.dq.spamhaus.net".
    #[serde(default = "default_blocklists")]
    pub blocklists: Vec<String>,
    #[serde(default = "default_summary_file")]
    pub summary_file: PathBuf,
    #[serde(default = "default_table_file")]
    pub table_file: PathBuf,
}

fn default_dns_timeout_secs() -> u64 {
    5
}

fn default_blocklists() -> Vec<String> {
    vec!["zen.spamhaus.org".to_string()]
}

fn default_summary_file() -> PathBuf {
    PathBuf::from("summary.txt")
}

fn default_table_file() -> PathBuf {
    PathBuf::from("dmarc_report_analysis.csv")
}

impl Default for Config {
    fn default() -> Self {
        Config {
            directory: PathBuf::from("dmarc_check"),
            nameservers: Vec::new(),
            dns_timeout_secs: default_dns_timeout_secs(),
            blocklists: default_blocklists(),
            summary_file: default_summary_file(),
            table_file: default_table_file(),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let raw = fs::read_to_string(path)?;
        serde_yaml::from_str(&raw).map_err(|err| crate::Error::Config(err.to_string()))
    }
}
