//! Text writers for lookup results.
//!
//! Two shapes: the count table (`chrom start stop n_meth n_unmeth`) and a
//! BEDGRAPH of weighted methylation (`chrom start stop score`).

use std::io::Write;

use crate::error::Result;
use crate::index::CpgIndex;
use crate::interval::GenomicInterval;
use crate::methylome::CountsRecord;

/// Writes one line per interval with its aggregated counts.
pub fn write_intervals<W: Write>(
    out: &mut W,
    index: &CpgIndex,
    intervals: &[GenomicInterval],
    counts: &[CountsRecord],
) -> Result<()> {
    for (interval, record) in intervals.iter().zip(counts) {
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}",
            index.chrom_order[interval.ch_id as usize],
            interval.start,
            interval.stop,
            record.n_meth,
            record.n_unmeth,
        )?;
    }
    Ok(())
}

/// Writes one BEDGRAPH line per interval; the score is the methylated
/// fraction of reads, zero for uncovered intervals.
pub fn write_bedgraph<W: Write>(
    out: &mut W,
    index: &CpgIndex,
    intervals: &[GenomicInterval],
    counts: &[CountsRecord],
) -> Result<()> {
    for (interval, record) in intervals.iter().zip(counts) {
        let total = record.n_meth + record.n_unmeth;
        let score = f64::from(record.n_meth) / f64::from(total).max(1.0);
        writeln!(
            out,
            "{}\t{}\t{}\t{:.6}",
            index.chrom_order[interval.ch_id as usize],
            interval.start,
            interval.stop,
            score,
        )?;
    }
    Ok(())
}
