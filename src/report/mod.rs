/*
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

pub mod extract;
pub mod parse;

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Policy evaluation outcome as stated by the reporting receiver.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PolicyResult {
    #[default]
    None,
    Pass,
    Fail,
    SoftFail,
    Neutral,
    TempError,
    PermError,
}

impl Display for PolicyResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PolicyResult::None => "none",
            PolicyResult::Pass => "pass",
            PolicyResult::Fail => "fail",
            PolicyResult::SoftFail => "softfail",
            PolicyResult::Neutral => "neutral",
            PolicyResult::TempError => "temperror",
            PolicyResult::PermError => "permerror",
        })
    }
}

/// One (source IP, evaluated policy) row extracted from an aggregate
/// report. Created by the parser and immutable afterwards; the engine
/// only reads it.
#[derive(Debug, Clone, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub source_ip: String,
    pub count: u64,
    pub spf_result: PolicyResult,
    pub dkim_result: PolicyResult,
    pub header_from: String,
    pub envelope_from: String,
}

impl Default for ReportRecord {
    fn default() -> Self {
        ReportRecord {
            source_ip: "unknown".to_string(),
            count: 0,
            spf_result: PolicyResult::None,
            dkim_result: PolicyResult::None,
            header_from: "unknown".to_string(),
            envelope_from: "unknown".to_string(),
        }
    }
}

impl ReportRecord {
    pub fn has_failure(&self) -> bool {
        self.spf_result == PolicyResult::Fail || self.dkim_result == PolicyResult::Fail
    }
}
