//! Response framing: the fixed-size status header and the counts payload.

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{RequestError, Result, StatusCode};
use crate::methylome::CountsRecord;

use super::{RECORD_SIZE, RESPONSE_HEADER_SIZE};

/// Parsed response header.
///
/// On the wire this is a 256-byte frame whose active prefix is
/// `"<status>\t<response_size>\n"`, padded with zero bytes. `status` is
/// the decimal [`StatusCode`]; `response_size` is the number of counts
/// records that follow (always zero for errors).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub status: StatusCode,
    pub response_size: u32,
}

impl ResponseHeader {
    #[must_use]
    pub fn ok(response_size: u32) -> Self {
        Self {
            status: StatusCode::Ok,
            response_size,
        }
    }

    /// An error header; no body follows.
    #[must_use]
    pub fn error(status: StatusCode) -> Self {
        Self {
            status,
            response_size: 0,
        }
    }

    /// Renders the fixed-size frame.
    #[must_use]
    pub fn compose(&self) -> [u8; RESPONSE_HEADER_SIZE] {
        let text = format!("{}\t{}\n", self.status.as_u32(), self.response_size);
        // status and u32 size cannot overflow the 256-byte frame
        let mut frame = [0u8; RESPONSE_HEADER_SIZE];
        frame[..text.len()].copy_from_slice(text.as_bytes());
        frame
    }

    /// Parses a received frame.
    pub fn parse(frame: &[u8; RESPONSE_HEADER_SIZE]) -> Result<Self> {
        let tab = frame
            .iter()
            .position(|&b| b == b'\t')
            .ok_or(RequestError::MalformedStatus)?;
        let status_value: u32 = std::str::from_utf8(&frame[..tab])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(RequestError::MalformedStatus)?;
        let status = StatusCode::from_u32(status_value).ok_or(RequestError::MalformedStatus)?;

        let rest = &frame[tab + 1..];
        let newline = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or(RequestError::MalformedResponseSize)?;
        let response_size: u32 = std::str::from_utf8(&rest[..newline])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(RequestError::MalformedResponseSize)?;

        Ok(Self {
            status,
            response_size,
        })
    }

    /// Length in bytes of the counts payload this header announces
    #[must_use]
    pub fn counts_n_bytes(&self) -> usize {
        self.response_size as usize * RECORD_SIZE
    }

    #[must_use]
    pub fn summary(&self) -> String {
        format!("status={} response_size={}", self.status, self.response_size)
    }
}

/// Bulk view of counts records as wire bytes
#[must_use]
pub fn counts_as_bytes(counts: &[CountsRecord]) -> &[u8] {
    bytemuck::cast_slice(counts)
}

/// Decodes a counts payload; the length must be a whole number of records.
pub fn decode_counts(bytes: &[u8]) -> Result<Vec<CountsRecord>> {
    if bytes.len() % RECORD_SIZE != 0 {
        return Err(RequestError::PartialOffsets(bytes.len()).into());
    }
    let mut cursor = std::io::Cursor::new(bytes);
    let mut counts = Vec::with_capacity(bytes.len() / RECORD_SIZE);
    for _ in 0..bytes.len() / RECORD_SIZE {
        let n_meth = cursor.read_u32::<LittleEndian>()?;
        let n_unmeth = cursor.read_u32::<LittleEndian>()?;
        counts.push(CountsRecord { n_meth, n_unmeth });
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let header = ResponseHeader::ok(42);
        let frame = header.compose();
        assert!(frame.starts_with(b"0\t42\n"));
        assert!(frame[5..].iter().all(|&b| b == 0));
        assert_eq!(ResponseHeader::parse(&frame).unwrap(), header);
    }

    #[test]
    fn error_header_has_empty_body() {
        let header = ResponseHeader::error(StatusCode::Timeout);
        assert_eq!(header.response_size, 0);
        let frame = header.compose();
        assert!(frame.starts_with(b"8\t0\n"));
        assert_eq!(ResponseHeader::parse(&frame).unwrap(), header);
    }

    #[test]
    fn unknown_status_is_rejected() {
        let mut frame = [0u8; RESPONSE_HEADER_SIZE];
        frame[..5].copy_from_slice(b"99\t0\n");
        assert!(ResponseHeader::parse(&frame).is_err());
    }

    #[test]
    fn missing_newline_is_rejected() {
        let mut frame = [0u8; RESPONSE_HEADER_SIZE];
        frame[..4].copy_from_slice(b"0\t42");
        assert!(ResponseHeader::parse(&frame).is_err());
    }

    #[test]
    fn counts_encode_decode_round_trip() {
        let counts = vec![
            CountsRecord {
                n_meth: 1,
                n_unmeth: 2,
            },
            CountsRecord {
                n_meth: u32::MAX,
                n_unmeth: 0,
            },
        ];
        let bytes = counts_as_bytes(&counts);
        assert_eq!(bytes.len(), counts.len() * RECORD_SIZE);
        assert_eq!(decode_counts(bytes).unwrap(), counts);
    }

    #[test]
    fn counts_wire_layout_is_little_endian() {
        let counts = [CountsRecord {
            n_meth: 1,
            n_unmeth: 256,
        }];
        assert_eq!(counts_as_bytes(&counts), &[1, 0, 0, 0, 0, 1, 0, 0]);
    }
}
