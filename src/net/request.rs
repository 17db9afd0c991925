//! Request framing: the fixed-size header and the offsets payload.

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{RequestError, Result};

use super::{MAX_ACCESSION_LEN, RECORD_SIZE, REQUEST_HEADER_SIZE};

/// Parsed request header.
///
/// On the wire this is a 256-byte frame whose active prefix is
/// `"<accession>\t<methylome_size>\t<n_intervals>\n"`, padded with zero
/// bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    pub accession: String,
    pub methylome_size: u32,
    pub n_intervals: u32,
}

impl RequestHeader {
    #[must_use]
    pub fn new(accession: &str, methylome_size: u32, n_intervals: u32) -> Self {
        Self {
            accession: accession.to_string(),
            methylome_size,
            n_intervals,
        }
    }

    /// Renders the fixed-size frame.
    pub fn compose(&self) -> Result<[u8; REQUEST_HEADER_SIZE]> {
        let text = format!(
            "{}\t{}\t{}\n",
            self.accession, self.methylome_size, self.n_intervals
        );
        if text.len() > REQUEST_HEADER_SIZE {
            return Err(RequestError::HeaderOverflow.into());
        }
        let mut frame = [0u8; REQUEST_HEADER_SIZE];
        frame[..text.len()].copy_from_slice(text.as_bytes());
        Ok(frame)
    }

    /// Parses a received frame, reporting which field is malformed.
    pub fn parse(frame: &[u8; REQUEST_HEADER_SIZE]) -> Result<Self> {
        let tab = frame
            .iter()
            .position(|&b| b == b'\t')
            .ok_or(RequestError::MalformedAccession)?;
        let accession = std::str::from_utf8(&frame[..tab])
            .map_err(|_| RequestError::MalformedAccession)?
            .to_string();

        let rest = &frame[tab + 1..];
        let tab = rest
            .iter()
            .position(|&b| b == b'\t')
            .ok_or(RequestError::MalformedMethylomeSize)?;
        let methylome_size =
            parse_u32(&rest[..tab]).ok_or(RequestError::MalformedMethylomeSize)?;

        let rest = &rest[tab + 1..];
        let newline = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or(RequestError::MalformedNIntervals)?;
        let n_intervals = parse_u32(&rest[..newline]).ok_or(RequestError::MalformedNIntervals)?;

        Ok(Self {
            accession,
            methylome_size,
            n_intervals,
        })
    }

    /// Length in bytes of the offsets payload this header announces
    #[must_use]
    pub fn offsets_n_bytes(&self) -> usize {
        self.n_intervals as usize * RECORD_SIZE
    }

    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "accession={} methylome_size={} n_intervals={}",
            self.accession, self.methylome_size, self.n_intervals
        )
    }
}

fn parse_u32(bytes: &[u8]) -> Option<u32> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// Accessions are file stems; restrict them to a filesystem-safe charset.
pub fn validate_accession(accession: &str) -> Result<()> {
    let valid = !accession.is_empty()
        && accession.len() <= MAX_ACCESSION_LEN
        && accession
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'));
    if valid {
        Ok(())
    } else {
        Err(RequestError::InvalidAccession(accession.to_string()).into())
    }
}

/// Encodes offset ranges as consecutive little-endian `(u32, u32)` records.
#[must_use]
pub fn encode_offsets(offsets: &[(u32, u32)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(offsets.len() * RECORD_SIZE);
    for &(begin, end) in offsets {
        out.extend_from_slice(&begin.to_le_bytes());
        out.extend_from_slice(&end.to_le_bytes());
    }
    out
}

/// Decodes an offsets payload; the length must be a whole number of
/// records.
pub fn decode_offsets(bytes: &[u8]) -> Result<Vec<(u32, u32)>> {
    if bytes.len() % RECORD_SIZE != 0 {
        return Err(RequestError::PartialOffsets(bytes.len()).into());
    }
    let mut cursor = std::io::Cursor::new(bytes);
    let mut offsets = Vec::with_capacity(bytes.len() / RECORD_SIZE);
    for _ in 0..bytes.len() / RECORD_SIZE {
        let begin = cursor.read_u32::<LittleEndian>()?;
        let end = cursor.read_u32::<LittleEndian>()?;
        offsets.push((begin, end));
    }
    Ok(offsets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn header_round_trip() {
        let header = RequestHeader::new("SRX12345", 28_000_000, 3);
        let frame = header.compose().unwrap();
        assert_eq!(frame.len(), REQUEST_HEADER_SIZE);
        assert!(frame.starts_with(b"SRX12345\t28000000\t3\n"));
        assert!(frame[b"SRX12345\t28000000\t3\n".len()..].iter().all(|&b| b == 0));
        assert_eq!(RequestHeader::parse(&frame).unwrap(), header);
    }

    #[test]
    fn missing_delimiters_are_field_errors() {
        let mut frame = [0u8; REQUEST_HEADER_SIZE];
        frame[..4].copy_from_slice(b"SRX1");
        let err = RequestHeader::parse(&frame).unwrap_err();
        assert!(matches!(
            err,
            Error::RequestError(RequestError::MalformedAccession)
        ));

        let mut frame = [0u8; REQUEST_HEADER_SIZE];
        frame[..6].copy_from_slice(b"SRX1\t5");
        let err = RequestHeader::parse(&frame).unwrap_err();
        assert!(matches!(
            err,
            Error::RequestError(RequestError::MalformedMethylomeSize)
        ));

        let mut frame = [0u8; REQUEST_HEADER_SIZE];
        frame[..8].copy_from_slice(b"SRX1\t5\t2");
        let err = RequestHeader::parse(&frame).unwrap_err();
        assert!(matches!(
            err,
            Error::RequestError(RequestError::MalformedNIntervals)
        ));
    }

    #[test]
    fn non_numeric_size_is_rejected() {
        let mut frame = [0u8; REQUEST_HEADER_SIZE];
        frame[..11].copy_from_slice(b"SRX1\tten\t2\n");
        assert!(RequestHeader::parse(&frame).is_err());
    }

    #[test]
    fn oversized_header_is_rejected() {
        let header = RequestHeader::new(&"A".repeat(REQUEST_HEADER_SIZE), 1, 1);
        assert!(header.compose().is_err());
    }

    #[test]
    fn accession_charset() {
        assert!(validate_accession("SRX12345").is_ok());
        assert!(validate_accession("sample_2024.rep-1").is_ok());
        assert!(validate_accession("").is_err());
        assert!(validate_accession("bad/accession").is_err());
        assert!(validate_accession("tab\there").is_err());
        assert!(validate_accession(&"A".repeat(MAX_ACCESSION_LEN + 1)).is_err());
    }

    #[test]
    fn offsets_round_trip() {
        let offsets = vec![(0u32, 10u32), (10, 10), (4_000_000_000, 4_000_000_001)];
        let bytes = encode_offsets(&offsets);
        assert_eq!(bytes.len(), offsets.len() * RECORD_SIZE);
        assert_eq!(decode_offsets(&bytes).unwrap(), offsets);
    }

    #[test]
    fn offsets_are_little_endian() {
        let bytes = encode_offsets(&[(1, 256)]);
        assert_eq!(bytes, [1, 0, 0, 0, 0, 1, 0, 0]);
    }

    #[test]
    fn partial_offsets_record_is_rejected() {
        assert!(decode_offsets(&[0u8; 12]).is_err());
        assert!(decode_offsets(&[]).unwrap().is_empty());
    }
}
