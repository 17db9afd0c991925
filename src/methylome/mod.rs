//! Methylome: a dense per-CpG vector of methylated/unmethylated counts.
//!
//! One methylome covers every CpG of one reference assembly, in the order
//! defined by that assembly's [`CpgIndex`](crate::index::CpgIndex). Counts
//! are 16-bit with saturation; storage is 64-byte aligned so long range
//! sums vectorize; the on-disk form is a zlib stream of the raw pairs.

mod metadata;
mod set;

pub use metadata::{methylome_path, metadata_path, MethylomeMetadata, M16_EXTENSION};
pub use set::{MethylomeSet, MethylomeSetConfig};

use std::path::Path;

use bytemuck::{Pod, Zeroable};

use crate::error::{MethylomeError, Result, ZlibError};
use crate::hash::sha256_hex;
use crate::zlib;

/// Per-site count type
pub type MCount = u16;

/// Largest representable per-site count
pub const M_COUNT_MAX: u32 = MCount::MAX as u32;

/// One CpG site: methylated and unmethylated read counts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct MPair {
    pub n_meth: MCount,
    pub n_unmeth: MCount,
}

impl MPair {
    #[must_use]
    pub fn new(n_meth: MCount, n_unmeth: MCount) -> Self {
        Self { n_meth, n_unmeth }
    }

    /// True if any read covers this site
    #[must_use]
    pub fn is_covered(self) -> bool {
        self.n_meth != 0 || self.n_unmeth != 0
    }
}

/// Aggregated counts over a range of sites
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct CountsRecord {
    pub n_meth: u32,
    pub n_unmeth: u32,
}

/// Aggregated counts plus the number of covered sites
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CountsRecordCov {
    pub n_meth: u32,
    pub n_unmeth: u32,
    pub n_covered: u32,
}

/// Backing storage unit; the raised alignment carries over to the
/// allocation so the site vector starts on a cache line.
#[derive(Clone, Copy, Debug)]
#[repr(C, align(64))]
struct CountBlock([u8; 64]);

// Plain bytes; the align attribute introduces no padding (64 % 64 == 0).
unsafe impl Zeroable for CountBlock {}
unsafe impl Pod for CountBlock {}

const PAIR_SIZE: usize = std::mem::size_of::<MPair>();
const PAIRS_PER_BLOCK: usize = std::mem::size_of::<CountBlock>() / PAIR_SIZE;

/// Scales `(m, u)` down when either exceeds [`M_COUNT_MAX`]: the larger
/// value pins to the maximum and the other keeps its ratio to it, rounded
/// to nearest. Values already in range are untouched.
pub fn conditional_round_to_fit(m: &mut u32, u: &mut u32) {
    if (*m).max(*u) > M_COUNT_MAX {
        round_to_fit(m, u);
    }
}

fn round_to_fit(m: &mut u32, u: &mut u32) {
    let largest = (*m).max(*u);
    let scale = |x: u32| {
        if x == largest {
            M_COUNT_MAX
        } else {
            ((f64::from(x) / f64::from(largest)) * f64::from(M_COUNT_MAX)).round() as u32
        }
    };
    *m = scale(*m);
    *u = scale(*u);
}

/// A methylome resident in memory.
#[derive(Debug)]
pub struct Methylome {
    blocks: Vec<CountBlock>,
    n_cpgs: usize,
}

impl Methylome {
    /// An all-zero methylome of `n_cpgs` sites
    #[must_use]
    pub fn new(n_cpgs: usize) -> Self {
        Self {
            blocks: vec![CountBlock([0; 64]); n_cpgs.div_ceil(PAIRS_PER_BLOCK)],
            n_cpgs,
        }
    }

    #[must_use]
    pub fn from_pairs(pairs: &[MPair]) -> Self {
        let mut methylome = Self::new(pairs.len());
        methylome.sites_mut().copy_from_slice(pairs);
        methylome
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let mut methylome = Self::new(bytes.len() / PAIR_SIZE);
        bytemuck::cast_slice_mut::<CountBlock, u8>(&mut methylome.blocks)[..bytes.len()]
            .copy_from_slice(bytes);
        methylome
    }

    #[must_use]
    pub fn n_cpgs(&self) -> u32 {
        self.n_cpgs as u32
    }

    #[must_use]
    pub fn sites(&self) -> &[MPair] {
        &bytemuck::cast_slice(&self.blocks)[..self.n_cpgs]
    }

    pub fn sites_mut(&mut self) -> &mut [MPair] {
        &mut bytemuck::cast_slice_mut(&mut self.blocks)[..self.n_cpgs]
    }

    /// Raw little-endian pair bytes, the form that is hashed and compressed
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<CountBlock, u8>(&self.blocks)[..self.n_cpgs * PAIR_SIZE]
    }

    /// SHA-256 hex of the uncompressed pair bytes
    #[must_use]
    pub fn content_hash(&self) -> String {
        sha256_hex(self.as_bytes())
    }

    /// Loads a methylome from its zlib-compressed file. The expected site
    /// count comes from metadata; any other inflated size is an error.
    pub fn read<P: AsRef<Path>>(path: P, expected_n_cpgs: u32) -> Result<Self> {
        let compressed = std::fs::read(path)?;
        let bytes = zlib::decompress(&compressed, expected_n_cpgs as usize * PAIR_SIZE).map_err(
            |err| match err {
                crate::error::Error::ZlibError(ZlibError::OutputSizeMismatch(_, produced)) => {
                    crate::error::Error::MethylomeError(MethylomeError::SizeMismatch {
                        expected: expected_n_cpgs,
                        found: (produced / PAIR_SIZE) as u32,
                    })
                }
                other => other,
            },
        )?;
        Ok(Self::from_bytes(&bytes))
    }

    /// Writes the zlib-compressed pair vector.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let compressed = zlib::compress(self.as_bytes())?;
        std::fs::write(path, compressed)?;
        Ok(())
    }

    /// Sums counts over sites `[begin, end)`. Endpoints beyond the site
    /// vector clamp to its end.
    #[must_use]
    pub fn counts(&self, range: (u32, u32)) -> CountsRecord {
        let mut record = CountsRecord::default();
        for site in self.range_sites(range) {
            record.n_meth += u32::from(site.n_meth);
            record.n_unmeth += u32::from(site.n_unmeth);
        }
        record
    }

    /// Like [`counts`](Self::counts), also counting covered sites.
    #[must_use]
    pub fn counts_cov(&self, range: (u32, u32)) -> CountsRecordCov {
        let mut record = CountsRecordCov::default();
        for site in self.range_sites(range) {
            record.n_meth += u32::from(site.n_meth);
            record.n_unmeth += u32::from(site.n_unmeth);
            record.n_covered += u32::from(site.is_covered());
        }
        record
    }

    fn range_sites(&self, (begin, end): (u32, u32)) -> &[MPair] {
        let begin = (begin as usize).min(self.n_cpgs);
        let end = (end as usize).clamp(begin, self.n_cpgs);
        &self.sites()[begin..end]
    }

    /// Aggregates each offset range, preserving input order.
    #[must_use]
    pub fn counts_batch(&self, ranges: &[(u32, u32)]) -> Vec<CountsRecord> {
        ranges.iter().map(|&range| self.counts(range)).collect()
    }

    /// Coverage-aware variant of [`counts_batch`](Self::counts_batch)
    #[must_use]
    pub fn counts_batch_cov(&self, ranges: &[(u32, u32)]) -> Vec<CountsRecordCov> {
        ranges.iter().map(|&range| self.counts_cov(range)).collect()
    }

    #[must_use]
    pub fn total_counts(&self) -> CountsRecord {
        self.counts((0, self.n_cpgs()))
    }

    #[must_use]
    pub fn total_counts_cov(&self) -> CountsRecordCov {
        self.counts_cov((0, self.n_cpgs()))
    }

    /// Adds `other` site-wise with per-site saturation.
    pub fn merge(&mut self, other: &Methylome) -> Result<()> {
        if self.n_cpgs != other.n_cpgs {
            return Err(
                MethylomeError::MergeSizeMismatch(self.n_cpgs(), other.n_cpgs()).into(),
            );
        }
        for (site, rhs) in self.sites_mut().iter_mut().zip(other.sites()) {
            let mut m = u32::from(site.n_meth) + u32::from(rhs.n_meth);
            let mut u = u32::from(site.n_unmeth) + u32::from(rhs.n_unmeth);
            conditional_round_to_fit(&mut m, &mut u);
            site.n_meth = m as MCount;
            site.n_unmeth = u as MCount;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;

    fn toy() -> Methylome {
        Methylome::from_pairs(&[MPair::new(1, 0), MPair::new(0, 0), MPair::new(2, 3)])
    }

    // ==================== Saturation ====================

    #[test]
    fn saturation_pins_both_when_both_overflow() {
        let (mut m, mut u) = (65536, 65536);
        conditional_round_to_fit(&mut m, &mut u);
        assert_eq!((m, u), (65535, 65535));
    }

    #[test]
    fn saturation_preserves_ratio_of_smaller_value() {
        let (mut m, mut u) = (131_070, 65_535);
        conditional_round_to_fit(&mut m, &mut u);
        assert_eq!((m, u), (65_535, 32_767));
    }

    #[test]
    fn saturation_leaves_in_range_values_alone() {
        let (mut m, mut u) = (100, 65_535);
        conditional_round_to_fit(&mut m, &mut u);
        assert_eq!((m, u), (100, 65_535));
    }

    #[test]
    fn saturation_with_zero_partner() {
        let (mut m, mut u) = (1_000_000, 0);
        conditional_round_to_fit(&mut m, &mut u);
        assert_eq!((m, u), (65_535, 0));
    }

    #[test]
    fn saturated_values_always_fit() {
        let mut rng = rand::rng();
        for _ in 0..1000 {
            let mut m: u32 = rng.random_range(0..500_000);
            let mut u: u32 = rng.random_range(0..500_000);
            let before = (m, u);
            conditional_round_to_fit(&mut m, &mut u);
            assert!(m <= M_COUNT_MAX && u <= M_COUNT_MAX);
            if before.0 <= M_COUNT_MAX && before.1 <= M_COUNT_MAX {
                assert_eq!((m, u), before);
            }
        }
    }

    // ==================== Aggregation ====================

    #[test]
    fn counts_cov_over_toy_methylome() {
        let record = toy().counts_cov((0, 3));
        assert_eq!(
            record,
            CountsRecordCov {
                n_meth: 3,
                n_unmeth: 3,
                n_covered: 2
            }
        );
    }

    #[test]
    fn counts_batch_preserves_order() {
        let methylome = toy();
        let records = methylome.counts_batch(&[(2, 3), (0, 1), (0, 0)]);
        assert_eq!(
            records,
            vec![
                CountsRecord {
                    n_meth: 2,
                    n_unmeth: 3
                },
                CountsRecord {
                    n_meth: 1,
                    n_unmeth: 0
                },
                CountsRecord::default(),
            ]
        );
    }

    #[test]
    fn adjacent_ranges_sum_to_enclosing_range() {
        let mut rng = rand::rng();
        let pairs: Vec<MPair> = (0..512)
            .map(|_| MPair::new(rng.random_range(0..100), rng.random_range(0..100)))
            .collect();
        let methylome = Methylome::from_pairs(&pairs);
        for _ in 0..100 {
            let mut cuts = [
                rng.random_range(0..=512u32),
                rng.random_range(0..=512u32),
                rng.random_range(0..=512u32),
            ];
            cuts.sort_unstable();
            let [a, b, c] = cuts;
            let left = methylome.counts((a, b));
            let right = methylome.counts((b, c));
            let whole = methylome.counts((a, c));
            assert_eq!(left.n_meth + right.n_meth, whole.n_meth);
            assert_eq!(left.n_unmeth + right.n_unmeth, whole.n_unmeth);
        }
    }

    #[test]
    fn out_of_range_endpoints_clamp() {
        let methylome = toy();
        assert_eq!(methylome.counts((0, 1000)), methylome.total_counts());
        assert_eq!(methylome.counts((5, 1000)), CountsRecord::default());
    }

    #[test]
    fn totals_match_full_range() {
        let methylome = toy();
        assert_eq!(
            methylome.total_counts(),
            CountsRecord {
                n_meth: 3,
                n_unmeth: 3
            }
        );
        assert_eq!(methylome.total_counts_cov().n_covered, 2);
    }

    // ==================== Storage ====================

    #[test]
    fn site_vector_is_cache_line_aligned() {
        let methylome = Methylome::new(1000);
        assert_eq!(methylome.sites().as_ptr() as usize % 64, 0);
        assert_eq!(methylome.n_cpgs(), 1000);
    }

    #[test]
    fn file_round_trip() {
        let mut rng = rand::rng();
        let pairs: Vec<MPair> = (0..10_000)
            .map(|_| MPair::new(rng.random_range(0..50), rng.random_range(0..50)))
            .collect();
        let methylome = Methylome::from_pairs(&pairs);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.m16");
        methylome.write(&path).unwrap();

        let restored = Methylome::read(&path, 10_000).unwrap();
        assert_eq!(restored.sites(), methylome.sites());
        assert_eq!(restored.content_hash(), methylome.content_hash());
    }

    #[test]
    fn read_rejects_wrong_site_count() {
        let methylome = toy();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.m16");
        methylome.write(&path).unwrap();
        let err = Methylome::read(&path, 100).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::MethylomeError(MethylomeError::SizeMismatch { expected: 100, .. })
                | crate::error::Error::ZlibError(_)
        ));
    }

    // ==================== Merge ====================

    #[test]
    fn merge_adds_sites() {
        let mut left = toy();
        let right = toy();
        left.merge(&right).unwrap();
        assert_eq!(
            left.sites(),
            &[MPair::new(2, 0), MPair::new(0, 0), MPair::new(4, 6)]
        );
    }

    #[test]
    fn merge_saturates_per_site() {
        let mut left = Methylome::from_pairs(&[MPair::new(65_535, 1)]);
        let right = Methylome::from_pairs(&[MPair::new(1, 0)]);
        left.merge(&right).unwrap();
        let site = left.sites()[0];
        assert_eq!(site.n_meth, 65_535);
        assert_eq!(site.n_unmeth, 1);
    }

    #[test]
    fn merge_rejects_different_sizes() {
        let mut left = Methylome::new(3);
        let right = Methylome::new(4);
        assert!(left.merge(&right).is_err());
    }
}
