//! Genomic intervals and the interval-list input format.
//!
//! Intervals are half-open `[start, stop)` with a chromosome id resolved
//! against a [`CpgIndex`](crate::index::CpgIndex). Input files are
//! BED-style: `chrom<TAB>start<TAB>stop`, one interval per line; extra
//! columns are ignored.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{IntervalError, Result};
use crate::index::CpgIndex;

/// Id of a chromosome unknown to the index
pub const UNKNOWN_CHROM: i32 = -1;

/// A half-open genomic interval on one chromosome
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GenomicInterval {
    pub ch_id: i32,
    pub start: u32,
    pub stop: u32,
}

impl GenomicInterval {
    #[must_use]
    pub fn new(ch_id: i32, start: u32, stop: u32) -> Self {
        Self { ch_id, start, stop }
    }
}

/// Reads intervals from a BED-style file, resolving chromosome names
/// through `index`. Input order is preserved.
pub fn read_intervals<P: AsRef<Path>>(path: P, index: &CpgIndex) -> Result<Vec<GenomicInterval>> {
    let reader = BufReader::new(File::open(path)?);
    let mut intervals = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim_end();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        intervals.push(parse_line(trimmed, lineno + 1, index)?);
    }
    Ok(intervals)
}

fn parse_line(line: &str, lineno: usize, index: &CpgIndex) -> Result<GenomicInterval> {
    let malformed = || IntervalError::MalformedLine(lineno, line.to_string());
    let mut fields = line.split('\t');
    let chrom = fields.next().ok_or_else(malformed)?;
    let start: u32 = fields
        .next()
        .and_then(|f| f.parse().ok())
        .ok_or_else(malformed)?;
    let stop: u32 = fields
        .next()
        .and_then(|f| f.parse().ok())
        .ok_or_else(malformed)?;
    let ch_id = index
        .chrom_id(chrom)
        .ok_or_else(|| IntervalError::UnknownChromosome(chrom.to_string()))?;
    Ok(GenomicInterval::new(ch_id, start, stop))
}
