//! Metadata persisted alongside a methylome file.
//!
//! The sibling JSON links a methylome to the CpG index it was built
//! against (`assembly`, `index_hash`) and records a content hash so a
//! loaded methylome can be verified before it is served.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MethylomeError, Result};
use crate::util;

use super::Methylome;

/// Canonical extension of the methylome binary
pub const M16_EXTENSION: &str = "m16";

/// Sibling metadata of a `.m16` file, stored as one line of JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MethylomeMetadata {
    pub version: String,
    pub host: String,
    pub user: String,
    pub creation_time: String,
    pub assembly: String,
    /// Hash of the index binary this methylome was built against
    pub index_hash: String,
    /// Hash of the uncompressed count bytes
    pub methylome_hash: String,
    pub n_cpgs: u32,
}

impl MethylomeMetadata {
    /// Captures the metadata of `methylome` built against the index
    /// identified by `index_hash`.
    #[must_use]
    pub fn new(assembly: &str, index_hash: &str, methylome: &Methylome) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            host: util::hostname(),
            user: util::username(),
            creation_time: util::now_secs(),
            assembly: assembly.to_string(),
            index_hash: index_hash.to_string(),
            methylome_hash: methylome.content_hash(),
            n_cpgs: methylome.n_cpgs(),
        }
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|err| MethylomeError::MetadataParse(err.to_string()).into())
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut line = serde_json::to_string(self)
            .map_err(|err| MethylomeError::MetadataParse(err.to_string()))?;
        line.push('\n');
        util::write_atomic(path.as_ref(), line.as_bytes())
    }
}

/// Path of the metadata sibling for a methylome file
#[must_use]
pub fn metadata_path(methylome_path: &Path) -> PathBuf {
    let mut path = methylome_path.as_os_str().to_owned();
    path.push(".json");
    PathBuf::from(path)
}

/// Path of the methylome file for `accession` in `dir`
#[must_use]
pub fn methylome_path(dir: &Path, accession: &str) -> PathBuf {
    dir.join(format!("{accession}.{M16_EXTENSION}"))
}
