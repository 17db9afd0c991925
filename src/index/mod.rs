//! CpG index: per-chromosome sorted CpG positions for one reference build.
//!
//! The index maps genomic coordinates to offsets into the dense per-CpG
//! count vector of a methylome. It is constructed once from a reference
//! FASTA, persisted as a raw little-endian `u32` position stream with a
//! JSON metadata sibling, and immutable afterwards.

mod metadata;
mod set;

pub use metadata::{
    assembly_from_genome_filename, assembly_from_index_filename, metadata_path, IndexMetadata,
    INDEX_EXTENSION,
};
pub use set::IndexSet;

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use paraseq::{fastx, Record};

use crate::error::{IndexError, Result};
use crate::interval::GenomicInterval;

/// A CpG index for one reference assembly.
///
/// Invariants: `positions[i]` is strictly increasing with every entry below
/// `chrom_size[i]`; `chrom_offset[0] == 0` and
/// `chrom_offset[i + 1] == chrom_offset[i] + positions[i].len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpgIndex {
    /// Chromosome names in source FASTA order
    pub chrom_order: Vec<String>,
    /// Length in bases of each chromosome
    pub chrom_size: Vec<u32>,
    /// Sorted 0-based CpG positions per chromosome
    pub positions: Vec<Vec<u32>>,
    /// Global index of the first CpG of each chromosome
    pub chrom_offset: Vec<u32>,
    /// Chromosome name to rank in `chrom_order`
    pub chrom_index: HashMap<String, i32>,
    /// Total CpGs across all chromosomes
    pub n_cpgs_total: u32,
}

/// 0-based positions `p` where base `p` is `C`/`c` and base `p+1` is `G`/`g`
fn collect_cpgs(seq: &[u8]) -> Vec<u32> {
    // typical mammalian CpG density is ~1 per 50 bases
    let mut cpgs = Vec::with_capacity(seq.len() / 50);
    for (pos, pair) in seq.windows(2).enumerate() {
        if matches!(pair[0], b'C' | b'c') && matches!(pair[1], b'G' | b'g') {
            cpgs.push(pos as u32);
        }
    }
    cpgs
}

/// First whitespace-delimited token of a FASTA header line
fn chrom_name(id: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(id)
        .map_err(|_| IndexError::GenomeParse("chromosome name is not UTF-8".to_string()))?;
    text.split_whitespace()
        .next()
        .map(ToString::to_string)
        .ok_or_else(|| IndexError::GenomeParse("empty chromosome name".to_string()).into())
}

impl CpgIndex {
    /// Assembles an index from its constituent vectors, computing the
    /// derived offset and name-lookup tables.
    #[must_use]
    pub fn from_parts(
        chrom_order: Vec<String>,
        chrom_size: Vec<u32>,
        positions: Vec<Vec<u32>>,
    ) -> Self {
        let mut chrom_offset = Vec::with_capacity(positions.len());
        let mut total: u32 = 0;
        for chrom_positions in &positions {
            chrom_offset.push(total);
            total += chrom_positions.len() as u32;
        }
        let chrom_index = chrom_order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i as i32))
            .collect();
        Self {
            chrom_order,
            chrom_size,
            positions,
            chrom_offset,
            chrom_index,
            n_cpgs_total: total,
        }
    }

    /// Builds an index by scanning a reference FASTA.
    pub fn from_genome<P: AsRef<Path>>(genome: P) -> Result<Self> {
        let mut reader = fastx::Reader::from_path(genome)
            .map_err(|err| IndexError::GenomeParse(err.to_string()))?;
        let mut rset = reader.new_record_set();

        let mut chrom_order = Vec::new();
        let mut chrom_size = Vec::new();
        let mut positions = Vec::new();
        while rset
            .fill(&mut reader)
            .map_err(|err| IndexError::GenomeParse(err.to_string()))?
        {
            for record in rset.iter() {
                let record = record.map_err(|err| IndexError::GenomeParse(err.to_string()))?;
                let seq = record.seq();
                chrom_order.push(chrom_name(record.id())?);
                chrom_size.push(seq.len() as u32);
                positions.push(collect_cpgs(&seq));
            }
        }
        if chrom_order.is_empty() {
            return Err(IndexError::EmptyGenome.into());
        }
        Ok(Self::from_parts(chrom_order, chrom_size, positions))
    }

    /// Writes the position stream: per chromosome in `chrom_order`, each
    /// CpG position as little-endian `u32`, no delimiters.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        for chrom_positions in &self.positions {
            for &pos in chrom_positions {
                out.write_u32::<LittleEndian>(pos)?;
            }
        }
        out.flush()?;
        Ok(())
    }

    /// Reads the position stream back, split per chromosome by the counts
    /// recorded in `metadata`.
    pub fn read<P: AsRef<Path>>(path: P, metadata: &IndexMetadata) -> Result<Self> {
        let path = path.as_ref();
        let expected_total: u64 = metadata.n_cpgs_per_chrom.iter().map(|&n| u64::from(n)).sum();
        let file_size = std::fs::metadata(path)?.len();
        if file_size != expected_total * 4 {
            return Err(IndexError::Truncated {
                expected: expected_total,
                found: file_size / 4,
            }
            .into());
        }
        let mut input = BufReader::new(File::open(path)?);
        let mut positions = Vec::with_capacity(metadata.n_cpgs_per_chrom.len());
        for &n_cpgs in &metadata.n_cpgs_per_chrom {
            let mut chrom_positions = vec![0u32; n_cpgs as usize];
            input.read_u32_into::<LittleEndian>(&mut chrom_positions)?;
            positions.push(chrom_positions);
        }
        Ok(Self::from_parts(
            metadata.chrom_order.clone(),
            metadata.chrom_size.clone(),
            positions,
        ))
    }

    /// Rank of `name` in the chromosome order, if present
    #[must_use]
    pub fn chrom_id(&self, name: &str) -> Option<i32> {
        self.chrom_index.get(name).copied()
    }

    fn chrom_rank(&self, ch_id: i32) -> Result<usize> {
        usize::try_from(ch_id)
            .ok()
            .filter(|&i| i < self.positions.len())
            .ok_or_else(|| IndexError::UnknownChromosomeId(ch_id).into())
    }

    /// Number of CpGs on chromosome `ch_id` strictly before `pos`
    pub fn get_offset_within_chrom(&self, ch_id: i32, pos: u32) -> Result<u32> {
        let rank = self.chrom_rank(ch_id)?;
        Ok(self.positions[rank].partition_point(|&p| p < pos) as u32)
    }

    /// Maps intervals to `(global_begin, global_end)` offset pairs into the
    /// concatenated CpG vector. Interval endpoints are clamped to the
    /// chromosome size; input order is preserved.
    pub fn get_offsets(&self, intervals: &[GenomicInterval]) -> Result<Vec<(u32, u32)>> {
        intervals
            .iter()
            .map(|interval| {
                let rank = self.chrom_rank(interval.ch_id)?;
                if interval.start > interval.stop {
                    return Err(IndexError::InvalidIntervalBounds {
                        start: interval.start,
                        stop: interval.stop,
                    }
                    .into());
                }
                let size = self.chrom_size[rank];
                let start = interval.start.min(size);
                let stop = interval.stop.min(size);
                let chrom_positions = &self.positions[rank];
                let begin = chrom_positions.partition_point(|&p| p < start) as u32;
                let end = chrom_positions.partition_point(|&p| p < stop) as u32;
                let offset = self.chrom_offset[rank];
                Ok((offset + begin, offset + end))
            })
            .collect()
    }

    /// One line per chromosome: rank, name, size, CpG count, global offset
    #[must_use]
    pub fn summary(&self) -> String {
        let mut out = String::from("idx\tchrom\tsize\tcpgs\toffset\n");
        for (rank, name) in self.chrom_order.iter().enumerate() {
            out.push_str(&format!(
                "{}\t{}\t{}\t{}\t{}\n",
                rank,
                name,
                self.chrom_size[rank],
                self.positions[rank].len(),
                self.chrom_offset[rank],
            ));
        }
        out.push_str(&format!("n_cpgs_total: {}", self.n_cpgs_total));
        out
    }
}
