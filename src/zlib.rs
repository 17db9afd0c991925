//! Deflate/inflate codec for on-disk methylome payloads.
//!
//! Compressed artifacts are plain zlib streams. The compression level is
//! pinned so the same input always produces the same bytes; callers always
//! know the decompressed size from sibling metadata, and [`decompress`]
//! enforces that size exactly.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::{Result, ZlibError};

/// Fixed compression level. Part of the stored-bytes contract.
fn level() -> Compression {
    Compression::fast()
}

/// Upper bound on deflate output for an input of `n` bytes
fn compress_bound(n: usize) -> usize {
    n + n / 1000 + 64
}

/// Compresses `bytes` into a zlib stream.
pub fn compress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = Compress::new(level(), true);
    let mut out = Vec::with_capacity(compress_bound(bytes.len()));
    loop {
        let consumed = usize::try_from(encoder.total_in()).unwrap_or(usize::MAX);
        let status = encoder
            .compress_vec(&bytes[consumed..], &mut out, FlushCompress::Finish)
            .map_err(|err| ZlibError::Unexpected(err.to_string()))?;
        match status {
            Status::StreamEnd => break,
            Status::Ok | Status::BufError => out.reserve(compress_bound(bytes.len() - consumed)),
        }
    }
    Ok(out)
}

/// Inflates `bytes` into exactly `expected_output_size` bytes.
///
/// # Errors
///
/// Returns [`ZlibError::DataError`] if the stream is corrupt or ends early,
/// and [`ZlibError::OutputSizeMismatch`] if the stream inflates to a length
/// other than `expected_output_size`.
pub fn decompress(bytes: &[u8], expected_output_size: usize) -> Result<Vec<u8>> {
    let mut decoder = Decompress::new(true);
    let mut out = vec![0u8; expected_output_size];
    loop {
        let in_pos = usize::try_from(decoder.total_in()).unwrap_or(usize::MAX);
        let out_pos = usize::try_from(decoder.total_out()).unwrap_or(usize::MAX);
        let status = decoder
            .decompress(&bytes[in_pos..], &mut out[out_pos..], FlushDecompress::Finish)
            .map_err(|err| {
                if err.needs_dictionary().is_some() {
                    ZlibError::NeedDict
                } else {
                    ZlibError::DataError(err.to_string())
                }
            })?;
        match status {
            Status::StreamEnd => break,
            Status::Ok | Status::BufError => {
                let produced = usize::try_from(decoder.total_out()).unwrap_or(usize::MAX);
                if produced == expected_output_size {
                    // output budget exhausted but the stream wants to continue
                    return Err(
                        ZlibError::OutputSizeMismatch(expected_output_size, produced + 1).into()
                    );
                }
                if usize::try_from(decoder.total_in()).unwrap_or(usize::MAX) == bytes.len() {
                    return Err(
                        ZlibError::DataError("deflate stream ended early".to_string()).into()
                    );
                }
            }
        }
    }

    let produced = usize::try_from(decoder.total_out()).unwrap_or(usize::MAX);
    if produced != expected_output_size {
        return Err(ZlibError::OutputSizeMismatch(expected_output_size, produced).into());
    }
    let consumed = usize::try_from(decoder.total_in()).unwrap_or(usize::MAX);
    if consumed < bytes.len() {
        return Err(ZlibError::DataError("trailing bytes after deflate stream".to_string()).into());
    }
    Ok(out)
}
