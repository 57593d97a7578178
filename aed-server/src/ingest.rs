//! Decoded-report input.
//!
//! One report per line, either as a JSON object or in the compact form
//! `source;category[;lat;lon[;course;speed]]`. Empty fields mean unknown.
//! Blank lines and `#` comments are skipped.

use std::io::{self, BufRead};
use std::path::Path;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};

use aed_core::{DecodedReport, Position, ReportCategory};

/// Parse one input line. `now` stamps compact lines, which carry no time.
pub fn parse_report_line(line: &str, now: DateTime<Utc>) -> anyhow::Result<Option<DecodedReport>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    if line.starts_with('{') {
        let report = serde_json::from_str(line).context("invalid JSON report")?;
        return Ok(Some(report));
    }

    parse_compact(line, now).map(Some)
}

fn parse_compact(line: &str, now: DateTime<Utc>) -> anyhow::Result<DecodedReport> {
    let fields: Vec<&str> = line.split(';').map(str::trim).collect();
    if fields.len() < 2 {
        bail!("expected at least source;category, got {line:?}");
    }

    let category: ReportCategory = fields[1].parse()?;

    let position = match (opt_field(&fields, 2), opt_field(&fields, 3)) {
        (Some(lat), Some(lon)) => Some(Position::new(
            lat.parse().with_context(|| format!("bad latitude {lat:?}"))?,
            lon.parse().with_context(|| format!("bad longitude {lon:?}"))?,
        )),
        (None, None) => None,
        _ => bail!("latitude and longitude must be given together"),
    };

    let course = opt_field(&fields, 4)
        .map(|c| c.parse::<u16>().with_context(|| format!("bad course {c:?}")))
        .transpose()?;
    let speed = opt_field(&fields, 5)
        .map(|s| s.parse::<f64>().with_context(|| format!("bad speed {s:?}")))
        .transpose()?;

    Ok(DecodedReport {
        source_id: fields[0].to_string(),
        position,
        course,
        speed,
        category,
        received_at: now,
    })
}

fn opt_field<'a>(fields: &[&'a str], idx: usize) -> Option<&'a str> {
    fields.get(idx).copied().filter(|f| !f.is_empty())
}

/// Open a report source; `-` is stdin.
pub fn open_input(path: &Path) -> anyhow::Result<Box<dyn BufRead>> {
    if path.to_str() == Some("-") {
        return Ok(Box::new(io::stdin().lock()));
    }
    let f = std::fs::File::open(path)
        .with_context(|| format!("cannot open {}", path.display()))?;
    Ok(Box::new(io::BufReader::new(f)))
}

/// Iterates `(line_no, parsed)` over a line source, skipping blank and
/// comment lines. Invalid UTF-8 is replaced, not fatal; only a real read
/// error ends the iteration, after being yielded.
pub struct ReportReader<R> {
    reader: R,
    buf: Vec<u8>,
    line_no: usize,
    done: bool,
}

impl<R: BufRead> ReportReader<R> {
    pub fn new(reader: R) -> Self {
        ReportReader {
            reader,
            buf: Vec::new(),
            line_no: 0,
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for ReportReader<R> {
    type Item = (usize, anyhow::Result<DecodedReport>);

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    self.line_no += 1;
                    let line = String::from_utf8_lossy(&self.buf);
                    match parse_report_line(&line, Utc::now()) {
                        Ok(Some(report)) => return Some((self.line_no, Ok(report))),
                        Ok(None) => {}
                        Err(e) => return Some((self.line_no, Err(e))),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.done = true;
                    return Some((self.line_no + 1, Err(e).context("read error")));
                }
            }
        }
        None
    }
}
