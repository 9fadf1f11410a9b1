/*
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

pub mod output;

use std::fs;
use std::path::Path;

use log::{info, warn};

use crate::dns::{check_blocklist, Lookup};
use crate::report::{extract, parse, PolicyResult, ReportRecord};
use crate::spf;

/// Annotations attached to each failing record during the single
/// annotation pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FailureAnnotation {
    pub blacklisted: bool,
    pub spf_failure_reason: String,
    pub dkim_failure_reason: String,
    pub spf_alignment: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatedRecord {
    pub record: ReportRecord,
    pub annotation: FailureAnnotation,
}

/// Aggregates over the failing subset; all totals are scoped to the
/// records under analysis, not to the full report traffic.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryStatistics {
    pub total_emails: u64,
    pub failed_spf: u64,
    pub failed_dkim: u64,
    pub failed_both: u64,
    /// Messages rejected under a strict p=reject policy.
    pub lost_emails: u64,
    pub lost_ratio: f64,
    pub lost_spf_only: u64,
    pub lost_dkim_only: u64,
    pub lost_both: u64,
    pub blacklisted_emails: u64,
}

impl SummaryStatistics {
    pub fn compute(failing: &[ReportRecord]) -> Self {
        let mut total_emails = 0;
        let mut failed_spf = 0;
        let mut failed_dkim = 0;
        let mut failed_both = 0;

        for record in failing {
            total_emails += record.count;
            let spf_failed = record.spf_result == PolicyResult::Fail;
            let dkim_failed = record.dkim_result == PolicyResult::Fail;
            if spf_failed {
                failed_spf += record.count;
            }
            if dkim_failed {
                failed_dkim += record.count;
            }
            if spf_failed && dkim_failed {
                failed_both += record.count;
            }
        }

        let lost_emails = total_emails;
        let lost_ratio = if total_emails > 0 {
            lost_emails as f64 / total_emails as f64
        } else {
            0.0
        };

        SummaryStatistics {
            total_emails,
            failed_spf,
            failed_dkim,
            failed_both,
            lost_emails,
            lost_ratio,
            lost_spf_only: failed_spf - failed_both,
            lost_dkim_only: failed_dkim - failed_both,
            lost_both: failed_both,
            blacklisted_emails: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub rows: Vec<AnnotatedRecord>,
    pub summary: SummaryStatistics,
}

/// Outcome of one analysis run.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// No records could be parsed anywhere under the root directory.
    NoRecords,
    /// Records were found but none failed SPF or DKIM.
    NoFailures,
    Complete(Analysis),
}

pub struct Analyzer<T: Lookup> {
    resolver: T,
    blocklists: Vec<String>,
}

impl<T: Lookup> Analyzer<T> {
    pub fn new(resolver: T, blocklists: Vec<String>) -> Self {
        Analyzer {
            resolver,
            blocklists,
        }
    }

    /// Runs the full pipeline over a directory tree. Only an unreadable
    /// root directory is fatal; every per-file and per-record problem is
    /// logged and contained at that granularity.
    pub fn analyze(&self, directory: &Path) -> crate::Result<Outcome> {
        info!(
            "Scanning directory {} for aggregate reports...",
            directory.display()
        );
        let records = self.scan(directory)?;
        if records.is_empty() {
            warn!("No valid DMARC records found.");
            return Ok(Outcome::NoRecords);
        }

        let failing: Vec<ReportRecord> = records
            .into_iter()
            .filter(|record| record.has_failure())
            .collect();
        if failing.is_empty() {
            info!("No records found that fail SPF or DKIM.");
            return Ok(Outcome::NoFailures);
        }

        info!("Analyzing {} failing record(s)...", failing.len());
        let mut summary = SummaryStatistics::compute(&failing);

        info!(
            "Checking {} blocklist(s) for {} source address(es)...",
            self.blocklists.len(),
            failing.len()
        );
        let mut rows = Vec::with_capacity(failing.len());
        for record in failing {
            let annotation = self.annotate(&record);
            if annotation.blacklisted {
                summary.blacklisted_emails += record.count;
            }
            rows.push(AnnotatedRecord { record, annotation });
        }

        Ok(Outcome::Complete(Analysis { rows, summary }))
    }

    fn annotate(&self, record: &ReportRecord) -> FailureAnnotation {
        let spf_failure_reason = if record.spf_result == PolicyResult::Fail {
            spf::spf_failure_reason(&self.resolver, &record.source_ip, &record.envelope_from)
        } else {
            String::new()
        };
        let dkim_failure_reason = if record.dkim_result == PolicyResult::Fail {
            spf::dkim_failure_reason()
        } else {
            String::new()
        };
        let blacklisted = self
            .blocklists
            .iter()
            .any(|zone| check_blocklist(&self.resolver, &record.source_ip, zone).listed);

        FailureAnnotation {
            blacklisted,
            spf_failure_reason,
            dkim_failure_reason,
            spf_alignment: spf::is_aligned(&record.header_from, &record.envelope_from),
        }
    }

    fn scan(&self, directory: &Path) -> crate::Result<Vec<ReportRecord>> {
        let mut records = Vec::new();
        self.scan_dir(directory, true, &mut records)?;
        Ok(records)
    }

    fn scan_dir(
        &self,
        directory: &Path,
        is_root: bool,
        records: &mut Vec<ReportRecord>,
    ) -> crate::Result<()> {
        let entries = match fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(err) if is_root => return Err(err.into()),
            Err(err) => {
                warn!(
                    "Skipping unreadable directory {}: {}",
                    directory.display(),
                    err
                );
                return Ok(());
            }
        };

        // Sorted so repeated runs over an unchanged tree are
        // byte-identical.
        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .collect();
        paths.sort();

        for path in paths {
            if path.is_dir() {
                self.scan_dir(&path, false, records)?;
            } else {
                for buffer in extract::extract(&path) {
                    info!("Parsing {}...", path.display());
                    records.extend(parse::parse(&buffer));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::net::Ipv4Addr;
    use std::path::PathBuf;

    use crate::dns::mock::MockLookup;
    use crate::report::{PolicyResult, ReportRecord};

    use super::{Analyzer, Outcome, SummaryStatistics};

    fn record(spf: PolicyResult, dkim: PolicyResult, count: u64) -> ReportRecord {
        ReportRecord {
            source_ip: "192.0.2.10".to_string(),
            count,
            spf_result: spf,
            dkim_result: dkim,
            header_from: "example.org".to_string(),
            envelope_from: "example.org".to_string(),
        }
    }

    #[test]
    fn summary_partitions_counts() {
        // A: spf=fail dkim=pass count=10, B: spf=fail dkim=fail count=5
        let failing = vec![
            record(PolicyResult::Fail, PolicyResult::Pass, 10),
            record(PolicyResult::Fail, PolicyResult::Fail, 5),
        ];
        let summary = SummaryStatistics::compute(&failing);
        assert_eq!(summary.total_emails, 15);
        assert_eq!(summary.failed_spf, 15);
        assert_eq!(summary.failed_dkim, 5);
        assert_eq!(summary.failed_both, 5);
        assert_eq!(summary.lost_spf_only, 10);
        assert_eq!(summary.lost_dkim_only, 0);
        assert_eq!(summary.lost_both, 5);
        assert_eq!(summary.lost_emails, 15);
        assert!((summary.lost_ratio - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_total_yields_zero_ratio() {
        let failing = vec![record(PolicyResult::Fail, PolicyResult::None, 0)];
        let summary = SummaryStatistics::compute(&failing);
        assert_eq!(summary.total_emails, 0);
        assert_eq!(summary.lost_ratio, 0.0);
    }

    #[test]
    fn full_total_yields_ratio_one() {
        let failing = vec![record(PolicyResult::Fail, PolicyResult::Fail, 100)];
        let summary = SummaryStatistics::compute(&failing);
        assert_eq!(summary.total_emails, 100);
        assert_eq!(summary.lost_ratio, 1.0);
    }

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "dmarc-audit-analyze-{}-{}",
            name,
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    const REPORT: &str = r#"<feedback>
  <record>
    <row>
      <source_ip>192.0.2.10</source_ip>
      <count>10</count>
      <policy_evaluated><dkim>pass</dkim><spf>fail</spf></policy_evaluated>
    </row>
    <identifiers>
      <header_from>example.org</header_from>
      <envelope_from>bounce@mail.example.org</envelope_from>
    </identifiers>
  </record>
  <record>
    <row>
      <source_ip>198.51.100.7</source_ip>
      <count>5</count>
      <policy_evaluated><dkim>fail</dkim><spf>fail</spf></policy_evaluated>
    </row>
    <identifiers>
      <header_from>example.org</header_from>
      <envelope_from>bounce@example.org</envelope_from>
    </identifiers>
  </record>
  <record>
    <row>
      <source_ip>203.0.113.1</source_ip>
      <count>80</count>
      <policy_evaluated><dkim>pass</dkim><spf>pass</spf></policy_evaluated>
    </row>
    <identifiers>
      <header_from>example.org</header_from>
      <envelope_from>bounce@example.org</envelope_from>
    </identifiers>
  </record>
</feedback>"#;

    fn mock_resolver() -> MockLookup {
        MockLookup::default()
            .with_a(
                "7.100.51.198.zen.example.net",
                Ok(vec![Ipv4Addr::new(127, 0, 0, 2)]),
            )
            .with_txt(
                "mail.example.org",
                Ok(vec!["v=spf1 ip4:192.0.2.0/24 -all".to_string()]),
            )
            .with_txt(
                "example.org",
                Ok(vec!["v=spf1 ip4:203.0.113.0/24 -all".to_string()]),
            )
    }

    #[test]
    fn pipeline_filters_annotates_and_summarizes() {
        let dir = test_dir("pipeline");
        fs::write(dir.join("report.xml"), REPORT).unwrap();

        let analyzer = Analyzer::new(mock_resolver(), vec!["zen.example.net".to_string()]);
        let analysis = match analyzer.analyze(&dir).unwrap() {
            Outcome::Complete(analysis) => analysis,
            other => panic!("unexpected outcome: {:?}", other),
        };

        // The passing record is excluded from the analysis set.
        assert_eq!(analysis.rows.len(), 2);
        assert_eq!(analysis.summary.total_emails, 15);
        assert_eq!(analysis.summary.failed_spf, 15);
        assert_eq!(analysis.summary.failed_dkim, 5);
        assert_eq!(analysis.summary.failed_both, 5);
        assert_eq!(analysis.summary.blacklisted_emails, 5);

        let first = &analysis.rows[0];
        assert_eq!(first.record.source_ip, "192.0.2.10");
        assert!(!first.annotation.blacklisted);
        // 192.0.2.10 is inside mail.example.org's published network
        assert!(first.annotation.spf_failure_reason.starts_with("pass:"));
        assert!(first.annotation.dkim_failure_reason.is_empty());
        assert!(!first.annotation.spf_alignment);

        let second = &analysis.rows[1];
        assert!(second.annotation.blacklisted);
        assert!(second.annotation.spf_failure_reason.starts_with("fail:"));
        assert_eq!(
            second.annotation.dkim_failure_reason,
            "Failed DKIM check (details not implemented)"
        );
        assert!(second.annotation.spf_alignment);
    }

    #[test]
    fn repeated_runs_are_identical() {
        let dir = test_dir("determinism");
        fs::write(dir.join("report.xml"), REPORT).unwrap();

        let analyzer = Analyzer::new(mock_resolver(), vec!["zen.example.net".to_string()]);
        let first = analyzer.analyze(&dir).unwrap();
        let second = analyzer.analyze(&dir).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn run_without_failures_stops_after_filtering() {
        let dir = test_dir("no-failures");
        fs::write(
            dir.join("report.xml"),
            r#"<feedback><record><row>
                <source_ip>192.0.2.1</source_ip><count>4</count>
                <policy_evaluated><dkim>pass</dkim><spf>pass</spf></policy_evaluated>
            </row></record></feedback>"#,
        )
        .unwrap();

        let analyzer = Analyzer::new(MockLookup::default(), vec!["zen.example.net".to_string()]);
        assert_eq!(analyzer.analyze(&dir).unwrap(), Outcome::NoFailures);
    }

    #[test]
    fn run_without_records_stops_after_parsing() {
        let dir = test_dir("no-records");
        fs::write(dir.join("notes.txt"), "nothing to see").unwrap();

        let analyzer = Analyzer::new(MockLookup::default(), vec!["zen.example.net".to_string()]);
        assert_eq!(analyzer.analyze(&dir).unwrap(), Outcome::NoRecords);
    }

    #[test]
    fn unreadable_root_is_fatal() {
        let analyzer = Analyzer::new(MockLookup::default(), Vec::new());
        assert!(analyzer
            .analyze(&PathBuf::from("/nonexistent/dmarc-audit-root"))
            .is_err());
    }

    #[test]
    fn subdirectories_are_walked() {
        let dir = test_dir("nested");
        let sub = dir.join("2023").join("07");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("report.xml"), REPORT).unwrap();

        let analyzer = Analyzer::new(mock_resolver(), vec!["zen.example.net".to_string()]);
        assert!(matches!(
            analyzer.analyze(&dir).unwrap(),
            Outcome::Complete(_)
        ));
    }
}
