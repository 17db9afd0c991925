//! # xfrase
//!
//! Client/server for querying per-CpG methylation levels over genomic
//! intervals at interactive latencies.
//!
//! A methylome is a dense vector of `(methylated, unmethylated)` read
//! counts, one entry per CpG dinucleotide of a reference genome. A CpG
//! index records where those CpGs are and maps genomic coordinates to
//! vector offsets. The server holds a pool of indexes and a bounded cache
//! of resident methylomes; a client names a methylome and a list of offset
//! ranges and receives aggregated counts per range.
//!
//! The pieces:
//!
//! - [`index`]: CpG index construction, persistence, coordinate lookup,
//!   and the per-assembly index pool
//! - [`methylome`]: the count vector, saturation arithmetic, range
//!   aggregation, and the resident cache with single-flight loads
//! - [`net`]: the framed wire protocol, connection lifecycle, server,
//!   and lookup client
//! - [`zlib`]: the deflate codec used by the methylome file format
//!
//! # Example: local aggregation
//!
//! ```
//! use xfrase::methylome::{Methylome, MPair};
//!
//! let methylome = Methylome::from_pairs(&[
//!     MPair::new(1, 0),
//!     MPair::new(0, 0),
//!     MPair::new(2, 3),
//! ]);
//! let counts = methylome.counts_cov((0, 3));
//! assert_eq!((counts.n_meth, counts.n_unmeth, counts.n_covered), (3, 3, 2));
//! ```

/// Server configuration resolution
pub mod config;

/// Error definitions and wire status codes
pub mod error;

/// Content hashing helpers
pub mod hash;

/// CpG index and the per-assembly index pool
pub mod index;

/// Genomic intervals and interval-list input
pub mod interval;

/// Methylome data, persistence, and the resident cache
pub mod methylome;

/// Wire protocol, server, and client
pub mod net;

/// Output writers for lookup results
pub mod output;

/// Shared metadata/file helpers
mod util;

/// Zlib codec for methylome payloads
pub mod zlib;

pub use error::{Error, Result, StatusCode};
pub use index::{CpgIndex, IndexMetadata, IndexSet};
pub use interval::GenomicInterval;
pub use methylome::{CountsRecord, Methylome, MethylomeMetadata, MethylomeSet};
