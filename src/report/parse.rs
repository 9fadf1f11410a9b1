/*
 * SPDX-License-Identifier: Apache-2.0 OR MIT
 */

use std::io::BufRead;
use std::net::IpAddr;
use std::str::FromStr;

use log::error;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use super::{PolicyResult, ReportRecord};

/// Parses an aggregate report document and yields its records in
/// document order. A structurally invalid document is logged and yields
/// an empty sequence; callers treat "no records" and "unparsable"
/// identically and move on to the next file.
pub fn parse(report: &[u8]) -> Vec<ReportRecord> {
    match parse_xml(report) {
        Ok(records) => records,
        Err(err) => {
            error!("Error parsing report: {}", err);
            Vec::new()
        }
    }
}

pub fn parse_xml(report: &[u8]) -> Result<Vec<ReportRecord>, String> {
    let mut records = Vec::new();

    let mut reader = Reader::from_reader(report);
    reader.trim_text(true);

    let mut buf = Vec::with_capacity(128);
    let mut found_feedback = false;

    while let Some(tag) = reader.next_tag(&mut buf)? {
        match tag.name().as_ref() {
            b"feedback" if !found_feedback => {
                found_feedback = true;
            }
            b"record" if found_feedback => {
                if let Some(record) = ReportRecord::parse(&mut reader, &mut buf)? {
                    records.push(record);
                }
            }
            b"" => {}
            other if !found_feedback => {
                return Err(format!(
                    "Unexpected tag {} at position {}.",
                    String::from_utf8_lossy(other),
                    reader.buffer_position()
                ));
            }
            _ => {
                reader.skip_tag(&mut buf)?;
            }
        }
    }

    Ok(records)
}

#[derive(Default)]
struct Row {
    source_ip: Option<IpAddr>,
    count: u64,
    policy_evaluated: Option<PolicyEvaluated>,
}

#[derive(Default)]
struct PolicyEvaluated {
    spf: PolicyResult,
    dkim: PolicyResult,
}

#[derive(Default)]
struct Identifiers {
    header_from: Option<String>,
    envelope_from: Option<String>,
}

impl ReportRecord {
    pub(crate) fn parse<R: BufRead>(
        reader: &mut Reader<R>,
        buf: &mut Vec<u8>,
    ) -> Result<Option<Self>, String> {
        let mut row = None;
        let mut identifiers = None;

        while let Some(tag) = reader.next_tag(buf)? {
            match tag.name().as_ref() {
                b"row" => {
                    row = Row::parse(reader, buf)?.into();
                }
                b"identifiers" => {
                    identifiers = Identifiers::parse(reader, buf)?.into();
                }
                b"" => (),
                _ => {
                    reader.skip_tag(buf)?;
                }
            }
        }

        // A usable record needs both a row and its evaluated policy;
        // entries missing either coexist with valid ones and are skipped.
        let (source_ip, count, policy) = match row {
            Some(Row {
                source_ip,
                count,
                policy_evaluated: Some(policy),
            }) => (source_ip, count, policy),
            _ => return Ok(None),
        };
        let identifiers = identifiers.unwrap_or_default();

        Ok(Some(ReportRecord {
            source_ip: source_ip.map_or_else(|| "unknown".to_string(), |ip| ip.to_string()),
            count,
            spf_result: policy.spf,
            dkim_result: policy.dkim,
            header_from: identifiers
                .header_from
                .unwrap_or_else(|| "unknown".to_string()),
            envelope_from: identifiers
                .envelope_from
                .unwrap_or_else(|| "unknown".to_string()),
        }))
    }
}

impl Row {
    fn parse<R: BufRead>(reader: &mut Reader<R>, buf: &mut Vec<u8>) -> Result<Self, String> {
        let mut r = Row::default();

        while let Some(tag) = reader.next_tag(buf)? {
            match tag.name().as_ref() {
                b"source_ip" => {
                    r.source_ip = reader.next_value::<IpAddr>(buf)?;
                }
                b"count" => {
                    r.count = reader.next_value(buf)?.unwrap_or_default();
                }
                b"policy_evaluated" => {
                    r.policy_evaluated = PolicyEvaluated::parse(reader, buf)?.into();
                }
                b"" => (),
                _ => {
                    reader.skip_tag(buf)?;
                }
            }
        }

        Ok(r)
    }
}

impl PolicyEvaluated {
    fn parse<R: BufRead>(reader: &mut Reader<R>, buf: &mut Vec<u8>) -> Result<Self, String> {
        let mut pe = PolicyEvaluated::default();

        while let Some(tag) = reader.next_tag(buf)? {
            match tag.name().as_ref() {
                b"spf" => {
                    pe.spf = reader.next_value(buf)?.unwrap_or_default();
                }
                b"dkim" => {
                    pe.dkim = reader.next_value(buf)?.unwrap_or_default();
                }
                b"" => (),
                _ => {
                    reader.skip_tag(buf)?;
                }
            }
        }

        Ok(pe)
    }
}

impl Identifiers {
    fn parse<R: BufRead>(reader: &mut Reader<R>, buf: &mut Vec<u8>) -> Result<Self, String> {
        let mut i = Identifiers::default();

        while let Some(tag) = reader.next_tag(buf)? {
            match tag.name().as_ref() {
                b"header_from" => {
                    i.header_from = reader.next_value(buf)?;
                }
                b"envelope_from" => {
                    i.envelope_from = reader.next_value(buf)?;
                }
                b"" => (),
                _ => {
                    reader.skip_tag(buf)?;
                }
            }
        }

        Ok(i)
    }
}

impl FromStr for PolicyResult {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.as_bytes() {
            b"pass" => PolicyResult::Pass,
            b"fail" => PolicyResult::Fail,
            b"softfail" => PolicyResult::SoftFail,
            b"neutral" => PolicyResult::Neutral,
            b"temperror" => PolicyResult::TempError,
            b"permerror" => PolicyResult::PermError,
            _ => PolicyResult::None,
        })
    }
}

trait ReaderHelper {
    fn next_tag<'x>(&mut self, buf: &'x mut Vec<u8>) -> Result<Option<BytesStart<'x>>, String>;
    fn next_value<T: FromStr>(&mut self, buf: &mut Vec<u8>) -> Result<Option<T>, String>;
    fn skip_tag(&mut self, buf: &mut Vec<u8>) -> Result<(), String>;
}

impl<R: BufRead> ReaderHelper for Reader<R> {
    fn next_tag<'x>(&mut self, buf: &'x mut Vec<u8>) -> Result<Option<BytesStart<'x>>, String> {
        match self.read_event_into(buf) {
            Ok(Event::Start(e)) => Ok(Some(e)),
            Ok(Event::End(_)) | Ok(Event::Eof) => Ok(None),
            Err(e) => Err(format!(
                "Error at position {}: {:?}",
                self.buffer_position(),
                e
            )),
            _ => Ok(Some(BytesStart::new(""))),
        }
    }

    // Leaf values are parsed leniently: unparsable text is treated as
    // absent and the caller substitutes the documented default.
    fn next_value<T: FromStr>(&mut self, buf: &mut Vec<u8>) -> Result<Option<T>, String> {
        let mut value = None;
        loop {
            match self.read_event_into(buf) {
                Ok(Event::Text(e)) => {
                    value = e.unescape().ok().and_then(|v| T::from_str(v.as_ref()).ok());
                }
                Ok(Event::End(_)) => {
                    break;
                }
                Ok(Event::Start(e)) => {
                    return Err(format!(
                        "Expected value, found unexpected tag {} at position {}.",
                        String::from_utf8_lossy(e.name().as_ref()),
                        self.buffer_position()
                    ));
                }
                Ok(Event::Eof) => {
                    return Err(format!(
                        "Expected value, found unexpected EOF at position {}.",
                        self.buffer_position()
                    ))
                }
                _ => (),
            }
        }

        Ok(value)
    }

    fn skip_tag(&mut self, buf: &mut Vec<u8>) -> Result<(), String> {
        let mut tag_count = 0;
        loop {
            match self.read_event_into(buf) {
                Ok(Event::End(_)) => {
                    if tag_count == 0 {
                        break;
                    } else {
                        tag_count -= 1;
                    }
                }
                Ok(Event::Start(_)) => {
                    tag_count += 1;
                }
                Ok(Event::Eof) => {
                    return Err(format!(
                        "Expected value, found unexpected EOF at position {}.",
                        self.buffer_position()
                    ))
                }
                _ => (),
            }
        }
        Ok(())
    }
}
