//! The pool of loaded CpG indexes, one per reference assembly.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{IndexError, Result};

use super::{assembly_from_index_filename, metadata_path, CpgIndex, IndexMetadata};

/// Immutable set of CpG indexes found in a directory at startup.
///
/// Loading fails closed: if any candidate index or its metadata cannot be
/// read, the whole set construction reports the error so the server refuses
/// to start with a partial pool.
pub struct IndexSet {
    indexes: HashMap<String, (Arc<CpgIndex>, IndexMetadata)>,
}

impl IndexSet {
    /// Scans `dir` for `<assembly>.cpg_idx` files and loads each together
    /// with its metadata sibling.
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let mut indexes = HashMap::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let filename = entry.file_name();
            let Some(name) = filename.to_str() else {
                continue;
            };
            let Some(assembly) = assembly_from_index_filename(name) else {
                continue;
            };
            let index_path = entry.path();
            let metadata = IndexMetadata::read(metadata_path(&index_path))?;
            let index = CpgIndex::read(&index_path, &metadata)?;
            debug!(assembly, n_cpgs = index.n_cpgs_total, "loaded cpg index");
            indexes.insert(assembly.to_string(), (Arc::new(index), metadata));
        }
        info!(dir = %dir.display(), n_indexes = indexes.len(), "index scan complete");
        Ok(Self { indexes })
    }

    /// Index and metadata for `assembly`.
    pub fn get(&self, assembly: &str) -> Result<(&Arc<CpgIndex>, &IndexMetadata)> {
        self.indexes
            .get(assembly)
            .map(|(index, metadata)| (index, metadata))
            .ok_or_else(|| IndexError::AssemblyNotFound(assembly.to_string()).into())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    /// Assembly names, unordered
    pub fn assemblies(&self) -> impl Iterator<Item = &str> {
        self.indexes.keys().map(String::as_str)
    }
}
