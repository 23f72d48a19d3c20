//! LCOV tracefile reader
//!
//! Understands the `SF`, `DA`, `BRDA` and `end_of_record` records; every
//! other record type is accepted and ignored.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;

use crate::models::{BranchId, Probe};

/// Tracefile parse errors
#[derive(Error, Debug)]
pub enum LcovError {
    #[error("line {line}: {record} record outside of an SF section")]
    OutsideSection { line: usize, record: &'static str },

    #[error("line {line}: malformed {record} record '{text}'")]
    Malformed {
        line: usize,
        record: &'static str,
        text: String,
    },

    #[error("line {line}: not an LCOV record '{text}'")]
    Unrecognized { line: usize, text: String },

    #[error("failed to read tracefile {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Hit counts for one source file
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileTrace {
    pub lines: BTreeMap<u32, u64>,
    pub branches: BTreeMap<(u32, BranchId), u64>,
}

/// Parsed tracefile keyed by source file
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tracefile {
    pub files: BTreeMap<String, FileTrace>,
}

impl Tracefile {
    /// Parse tracefile text
    pub fn parse(content: &str) -> Result<Self, LcovError> {
        let mut tracefile = Tracefile::default();
        let mut current: Option<String> = None;

        for (idx, raw) in content.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            if line == "end_of_record" {
                current = None;
                continue;
            }

            let unrecognized = || LcovError::Unrecognized {
                line: line_no,
                text: line.to_string(),
            };
            let (tag, value) = line.split_once(':').ok_or_else(unrecognized)?;
            if tag.is_empty() || !tag.bytes().all(|b| b.is_ascii_uppercase()) {
                return Err(unrecognized());
            }

            match tag {
                "SF" => {
                    let file = value.trim().to_string();
                    tracefile.files.entry(file.clone()).or_default();
                    current = Some(file);
                }
                "DA" => {
                    let file = current.as_ref().ok_or(LcovError::OutsideSection {
                        line: line_no,
                        record: "DA",
                    })?;
                    let (number, hits) = parse_da(value).ok_or_else(|| LcovError::Malformed {
                        line: line_no,
                        record: "DA",
                        text: line.to_string(),
                    })?;
                    if let Some(trace) = tracefile.files.get_mut(file) {
                        let count = trace.lines.entry(number).or_insert(0);
                        *count = count.saturating_add(hits);
                    }
                }
                "BRDA" => {
                    let file = current.as_ref().ok_or(LcovError::OutsideSection {
                        line: line_no,
                        record: "BRDA",
                    })?;
                    let (number, id, taken) =
                        parse_brda(value).ok_or_else(|| LcovError::Malformed {
                            line: line_no,
                            record: "BRDA",
                            text: line.to_string(),
                        })?;
                    if let Some(trace) = tracefile.files.get_mut(file) {
                        let count = trace.branches.entry((number, id)).or_insert(0);
                        *count = count.saturating_add(taken);
                    }
                }
                _ => {}
            }
        }

        Ok(tracefile)
    }

    /// Read and parse a tracefile from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LcovError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| LcovError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    /// All declared probes, hit or not
    pub fn instrumented(&self) -> BTreeSet<Probe> {
        self.probes(|_| true)
    }

    /// Probes with a non-zero hit count
    pub fn executed(&self) -> BTreeSet<Probe> {
        self.probes(|hits| hits > 0)
    }

    fn probes(&self, keep: impl Fn(u64) -> bool) -> BTreeSet<Probe> {
        let mut probes = BTreeSet::new();
        for (file, trace) in &self.files {
            for (&line, &hits) in &trace.lines {
                if keep(hits) {
                    probes.insert(Probe::line(file.as_str(), line));
                }
            }
            for (&(line, id), &hits) in &trace.branches {
                if keep(hits) {
                    probes.insert(Probe::branch(file.as_str(), line, id.block, id.branch));
                }
            }
        }
        probes
    }
}

/// `DA:<line>,<hits>[,<checksum>]`
fn parse_da(value: &str) -> Option<(u32, u64)> {
    let mut parts = value.split(',');
    let line = parts.next()?.trim().parse().ok()?;
    let hits = parse_hits(parts.next()?.trim())?;
    Some((line, hits))
}

/// `BRDA:<line>,<block>,<branch>,<taken>` where taken may be `-`
fn parse_brda(value: &str) -> Option<(u32, BranchId, u64)> {
    let mut parts = value.split(',').map(str::trim);
    let line = parts.next()?.parse().ok()?;
    let block = parts.next()?.parse().ok()?;
    let branch = parts.next()?.parse().ok()?;
    let taken = match parts.next()? {
        "-" => 0,
        other => parse_hits(other)?,
    };
    Some((line, BranchId { block, branch }, taken))
}

/// Hit counts are integers, but some generators emit negative or float values
fn parse_hits(value: &str) -> Option<u64> {
    if let Ok(n) = value.parse::<u64>() {
        return Some(n);
    }
    if let Ok(n) = value.parse::<i64>() {
        return Some(if n > 0 { n as u64 } else { 0 });
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(|f| if f > 0.0 { f.ceil() as u64 } else { 0 })
}
