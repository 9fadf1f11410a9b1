/*
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::borrow::Cow;
use std::fmt::Write;
use std::fs;
use std::path::Path;

use super::{Analysis, AnnotatedRecord, SummaryStatistics};

// Column order is fixed for downstream compatibility.
const TABLE_HEADER: &str = "source_ip,count,spf_result,dkim_result,header_from,envelope_from,\
blacklisted,spf_failure_reason,dkim_failure_reason,spf_alignment";

pub fn render_summary(summary: &SummaryStatistics) -> String {
    format!(
        "Total emails: {}\n\
         Emails that would have been lost if DMARC had p=reject: {}\n\
         Ratio of emails that would have been lost if DMARC had p=reject: {:.2}%\n\
         Emails lost due to SPF failure: {}\n\
         Emails lost due to DKIM failure: {}\n\
         Emails lost due to both SPF and DKIM failure: {}\n\
         Total emails lost due to blacklisting: {}\n",
        summary.total_emails,
        summary.lost_emails,
        summary.lost_ratio * 100.0,
        summary.lost_spf_only,
        summary.lost_dkim_only,
        summary.lost_both,
        summary.blacklisted_emails,
    )
}

pub fn render_table(rows: &[AnnotatedRecord]) -> String {
    let mut table = String::with_capacity(TABLE_HEADER.len() + 1 + rows.len() * 96);
    table.push_str(TABLE_HEADER);
    table.push('\n');

    for row in rows {
        let record = &row.record;
        let annotation = &row.annotation;
        let _ = writeln!(
            table,
            "{},{},{},{},{},{},{},{},{},{}",
            field(&record.source_ip),
            record.count,
            record.spf_result,
            record.dkim_result,
            field(&record.header_from),
            field(&record.envelope_from),
            annotation.blacklisted,
            field(&annotation.spf_failure_reason),
            field(&annotation.dkim_failure_reason),
            annotation.spf_alignment,
        );
    }

    table
}

fn field(value: &str) -> Cow<'_, str> {
    if value
        .chars()
        .any(|c| matches!(c, ',' | '"' | '\n' | '\r'))
    {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

pub fn write_analysis(
    analysis: &Analysis,
    summary_file: &Path,
    table_file: &Path,
) -> crate::Result<()> {
    fs::write(summary_file, render_summary(&analysis.summary))?;
    fs::write(table_file, render_table(&analysis.rows))?;
    Ok(())
}
