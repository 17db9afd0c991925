//! Human-readable metadata persisted alongside the index binary.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::util;

use super::CpgIndex;

/// Canonical extension of the index binary
pub const INDEX_EXTENSION: &str = "cpg_idx";

/// Suffixes recognized on reference genome filenames
const FASTA_SUFFIXES: &[&str] = &[".fa.gz", ".faa.gz", ".fasta.gz", ".fa", ".faa", ".fasta"];

/// Sibling metadata of a `.cpg_idx` file, stored as one line of JSON.
///
/// `index_hash` is the SHA-256 of the binary position stream and ties a
/// methylome to the index it was built against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct IndexMetadata {
    pub version: String,
    pub host: String,
    pub user: String,
    pub creation_time: String,
    pub assembly: String,
    pub chrom_order: Vec<String>,
    pub chrom_size: Vec<u32>,
    pub n_cpgs_per_chrom: Vec<u32>,
    pub n_cpgs_total: u32,
    pub index_hash: String,
}

impl IndexMetadata {
    /// Captures the metadata of a freshly built index.
    #[must_use]
    pub fn new(assembly: &str, index: &CpgIndex, index_hash: String) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            host: util::hostname(),
            user: util::username(),
            creation_time: util::now_secs(),
            assembly: assembly.to_string(),
            chrom_order: index.chrom_order.clone(),
            chrom_size: index.chrom_size.clone(),
            n_cpgs_per_chrom: index.positions.iter().map(|p| p.len() as u32).collect(),
            n_cpgs_total: index.n_cpgs_total,
            index_hash,
        }
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|err| IndexError::MetadataParse(err.to_string()).into())
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut line = serde_json::to_string(self)
            .map_err(|err| IndexError::MetadataParse(err.to_string()))?;
        line.push('\n');
        util::write_atomic(path.as_ref(), line.as_bytes())
    }
}

/// Path of the metadata sibling for an index file
#[must_use]
pub fn metadata_path(index_path: &Path) -> PathBuf {
    let mut path = index_path.as_os_str().to_owned();
    path.push(".json");
    PathBuf::from(path)
}

/// Extracts the assembly name from a filename of the form
/// `<assembly>.cpg_idx` where the stem is `[A-Za-z0-9_]+`.
#[must_use]
pub fn assembly_from_index_filename(filename: &str) -> Option<&str> {
    let stem = filename.strip_suffix(&format!(".{INDEX_EXTENSION}"))?;
    (!stem.is_empty() && stem.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_'))
        .then_some(stem)
}

/// Derives the canonical assembly tag from a reference genome filename by
/// stripping a recognized FASTA suffix.
pub fn assembly_from_genome_filename<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| IndexError::MalformedAssemblyName(path.display().to_string()))?;
    let stem = FASTA_SUFFIXES
        .iter()
        .find_map(|suffix| name.strip_suffix(suffix))
        .ok_or_else(|| IndexError::MalformedAssemblyName(name.to_string()))?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        return Err(IndexError::MalformedAssemblyName(name.to_string()).into());
    }
    Ok(stem.to_string())
}
