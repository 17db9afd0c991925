use std::fmt;

/// Custom Result type for xfrase operations, wrapping the custom [`Error`] type
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for the xfrase library, encompassing all error cases
/// that can occur while building indexes, loading methylomes, or serving
/// requests.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Errors from the zlib codec
    #[error("Zlib codec error: {0}")]
    ZlibError(#[from] ZlibError),

    /// Errors related to the CpG index
    #[error("Index error: {0}")]
    IndexError(#[from] IndexError),

    /// Errors related to methylome data
    #[error("Methylome error: {0}")]
    MethylomeError(#[from] MethylomeError),

    /// Errors related to the resident methylome cache
    #[error("Cache error: {0}")]
    CacheError(#[from] CacheError),

    /// Errors related to wire request/response framing
    #[error("Request error: {0}")]
    RequestError(#[from] RequestError),

    /// Errors related to genomic interval input
    #[error("Interval error: {0}")]
    IntervalError(#[from] IntervalError),

    /// Errors related to configuration resolution
    #[error("Config error: {0}")]
    ConfigError(#[from] ConfigError),

    /// Standard I/O errors
    #[error("Error with IO: {0}")]
    IoError(#[from] std::io::Error),

    /// UTF-8 conversion errors
    #[error("Error with UTF8: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
}

/// Errors surfaced by the deflate/inflate codec.
///
/// These mirror the underlying zlib condition set so a failure in a
/// compressed artifact can be reported precisely.
#[derive(thiserror::Error, Debug)]
pub enum ZlibError {
    #[error("Inconsistent stream state")]
    StreamError,

    /// The compressed stream is corrupt or ends early
    #[error("Corrupt deflate stream: {0}")]
    DataError(String),

    #[error("Out of memory in codec")]
    MemError,

    #[error("No progress possible in codec buffers")]
    BufError,

    #[error("Incompatible zlib version")]
    VersionError,

    #[error("Stream requires a preset dictionary")]
    NeedDict,

    /// The stream inflated to a different length than the caller expected
    ///
    /// The first parameter is the expected byte count, the second is what the
    /// stream actually produced.
    #[error("Decompressed size mismatch: expected {0} bytes, produced {1}")]
    OutputSizeMismatch(usize, usize),

    #[error("Unexpected return from zlib: {0}")]
    Unexpected(String),
}

/// Errors specific to building, persisting, and querying a CpG index
#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    /// The genome file contained no chromosome records
    #[error("No chromosomes found in genome file")]
    EmptyGenome,

    /// The genome FASTA could not be read or parsed
    #[error("Failed reading genome: {0}")]
    GenomeParse(String),

    /// A chromosome id is outside the index's chromosome list
    #[error("Unknown chromosome id: {0}")]
    UnknownChromosomeId(i32),

    /// A chromosome name has no entry in the index
    #[error("Unknown chromosome: {0}")]
    UnknownChromosome(String),

    /// An interval has its endpoints out of order
    #[error("Invalid interval bounds: start {start} > stop {stop}")]
    InvalidIntervalBounds { start: u32, stop: u32 },

    /// The index binary does not contain the position count promised by its
    /// metadata
    #[error("Index file truncated: expected {expected} positions, found room for {found}")]
    Truncated { expected: u64, found: u64 },

    /// No index is loaded for the requested assembly
    #[error("No index for assembly: {0}")]
    AssemblyNotFound(String),

    /// A genome filename does not reduce to a usable assembly name
    #[error("Cannot derive assembly from filename: {0}")]
    MalformedAssemblyName(String),

    /// An index filename must use the canonical extension
    #[error("Index filename must end in .{expected}: {path}")]
    BadExtension {
        expected: &'static str,
        path: String,
    },

    /// The sibling metadata file failed to parse
    #[error("Failed parsing index metadata: {0}")]
    MetadataParse(String),
}

/// Errors that can occur while reading, writing, or combining methylomes
#[derive(thiserror::Error, Debug)]
pub enum MethylomeError {
    /// The decompressed record count does not match the expectation from the
    /// index or metadata
    #[error("Methylome size mismatch: expected {expected} sites, found {found}")]
    SizeMismatch { expected: u32, found: u32 },

    /// Two methylomes being combined cover different site counts
    #[error("Cannot merge methylomes of different sizes ({0} vs {1})")]
    MergeSizeMismatch(u32, u32),

    /// The sibling metadata file failed to parse
    #[error("Failed parsing methylome metadata: {0}")]
    MetadataParse(String),
}

/// Errors reported by the resident methylome cache.
///
/// These are cloneable so a single failed load can be delivered to every
/// waiter of the same in-flight request.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// No methylome file exists for the accession
    #[error("Methylome not found: {0}")]
    NotFound(String),

    /// The loaded bytes disagree with the metadata hash
    #[error("Methylome content does not match its metadata: {0}")]
    MetadataMismatch(String),

    /// The compressed stream failed to inflate to the expected form
    #[error("Corrupt methylome data: {0}")]
    CorruptData(String),

    /// The file holds a different number of sites than expected
    #[error("Methylome size mismatch: expected {expected} sites, found {found}")]
    SizeMismatch { expected: u32, found: u32 },

    /// Every resident entry is pinned by an active request
    #[error("Cache full: all resident methylomes are in use")]
    CacheFull,

    /// I/O failure while loading
    #[error("I/O error loading methylome: {0}")]
    Io(String),
}

/// Errors in the framed wire request/response
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RequestError {
    /// The accession field is missing or not valid UTF-8
    #[error("Malformed accession in request header")]
    MalformedAccession,

    /// The methylome size field is missing or not a decimal u32
    #[error("Malformed methylome size in request header")]
    MalformedMethylomeSize,

    /// The interval count field is missing or not a decimal u32
    #[error("Malformed interval count in request header")]
    MalformedNIntervals,

    /// The accession uses characters outside the accepted set
    #[error("Invalid accession: {0}")]
    InvalidAccession(String),

    /// The request declares more intervals than the server accepts
    #[error("Too many intervals: {n} (maximum {max})")]
    TooManyIntervals { n: u32, max: u32 },

    /// The offsets payload length is not a whole number of records
    #[error("Offsets payload has partial record ({0} bytes)")]
    PartialOffsets(usize),

    /// An offset pair is out of order or past the end of the methylome
    #[error("Invalid offset range ({begin}, {end}) for methylome of size {size}")]
    InvalidOffsets { begin: u32, end: u32, size: u32 },

    /// The status field of a response header is missing or unknown
    #[error("Malformed status in response header")]
    MalformedStatus,

    /// The size field of a response header is missing or not a decimal u32
    #[error("Malformed response size in response header")]
    MalformedResponseSize,

    /// A composed header would overflow the fixed frame
    #[error("Header fields exceed frame size")]
    HeaderOverflow,
}

/// Errors in genomic interval input files
#[derive(thiserror::Error, Debug)]
pub enum IntervalError {
    /// A line does not have the chrom/start/stop columns
    #[error("Malformed interval line {0}: {1}")]
    MalformedLine(usize, String),

    /// An interval names a chromosome absent from the index
    #[error("Unknown chromosome in intervals: {0}")]
    UnknownChromosome(String),
}

/// Errors in server configuration resolution
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Failed parsing config file {0}: {1}")]
    Parse(String, String),

    #[error("Missing required option: {0}")]
    MissingOption(&'static str),
}

/// Stable numeric status carried in the response header.
///
/// The decimal value of each variant is part of the wire contract and must
/// never be reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum StatusCode {
    Ok = 0,
    BadRequest = 1,
    UnknownMethylome = 2,
    UnknownChromosome = 3,
    SizeMismatch = 4,
    MetadataMismatch = 5,
    CorruptData = 6,
    IoError = 7,
    Timeout = 8,
    CacheFull = 9,
    InternalError = 10,
}

impl StatusCode {
    #[must_use]
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            1 => Some(Self::BadRequest),
            2 => Some(Self::UnknownMethylome),
            3 => Some(Self::UnknownChromosome),
            4 => Some(Self::SizeMismatch),
            5 => Some(Self::MetadataMismatch),
            6 => Some(Self::CorruptData),
            7 => Some(Self::IoError),
            8 => Some(Self::Timeout),
            9 => Some(Self::CacheFull),
            10 => Some(Self::InternalError),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    #[must_use]
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::BadRequest => "bad_request",
            Self::UnknownMethylome => "unknown_methylome",
            Self::UnknownChromosome => "unknown_chromosome",
            Self::SizeMismatch => "size_mismatch",
            Self::MetadataMismatch => "metadata_mismatch",
            Self::CorruptData => "corrupt_data",
            Self::IoError => "io_error",
            Self::Timeout => "timeout",
            Self::CacheFull => "cache_full",
            Self::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&CacheError> for StatusCode {
    fn from(err: &CacheError) -> Self {
        match err {
            CacheError::NotFound(_) => Self::UnknownMethylome,
            CacheError::MetadataMismatch(_) => Self::MetadataMismatch,
            CacheError::CorruptData(_) => Self::CorruptData,
            CacheError::SizeMismatch { .. } => Self::SizeMismatch,
            CacheError::CacheFull => Self::CacheFull,
            CacheError::Io(_) => Self::IoError,
        }
    }
}

impl From<&Error> for StatusCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::RequestError(_) => Self::BadRequest,
            Error::IndexError(IndexError::UnknownChromosome(_))
            | Error::IndexError(IndexError::UnknownChromosomeId(_)) => Self::UnknownChromosome,
            Error::IndexError(IndexError::AssemblyNotFound(_)) => Self::MetadataMismatch,
            Error::MethylomeError(MethylomeError::SizeMismatch { .. }) => Self::SizeMismatch,
            Error::CacheError(err) => Self::from(err),
            Error::ZlibError(_) => Self::CorruptData,
            Error::IoError(_) => Self::IoError,
            _ => Self::InternalError,
        }
    }
}
