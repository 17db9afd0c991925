//! Lookup client: one request/response transaction per connection.

use std::time::Instant;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::error::{Result, StatusCode};
use crate::methylome::CountsRecord;

use super::request::{encode_offsets, RequestHeader};
use super::response::{decode_counts, ResponseHeader};
use super::RESPONSE_HEADER_SIZE;

/// What the server answered: the status it reported and, when `status` is
/// ok, one counts record per requested offset range.
#[derive(Debug, Clone)]
pub struct LookupOutcome {
    pub status: StatusCode,
    pub counts: Vec<CountsRecord>,
}

/// Runs one lookup transaction against a server.
///
/// Writes the fixed-size request header and the offsets payload, then
/// reads the response header and, on success, the counts payload. The
/// connection is not reused.
pub async fn lookup(
    hostname: &str,
    port: u16,
    accession: &str,
    methylome_size: u32,
    offsets: &[(u32, u32)],
) -> Result<LookupOutcome> {
    let started = Instant::now();
    let mut socket = TcpStream::connect((hostname, port)).await?;
    debug!(hostname, port, elapsed = ?started.elapsed(), "connected");

    let header = RequestHeader::new(accession, methylome_size, offsets.len() as u32);
    socket.write_all(&header.compose()?).await?;
    socket.write_all(&encode_offsets(offsets)).await?;
    debug!(header = %header.summary(), "request sent");

    let mut frame = [0u8; RESPONSE_HEADER_SIZE];
    socket.read_exact(&mut frame).await?;
    let resp = ResponseHeader::parse(&frame)?;
    info!(header = %resp.summary(), "received response header");

    if !resp.status.is_ok() {
        return Ok(LookupOutcome {
            status: resp.status,
            counts: Vec::new(),
        });
    }

    let mut payload = vec![0u8; resp.counts_n_bytes()];
    socket.read_exact(&mut payload).await?;
    let counts = decode_counts(&payload)?;
    let _ = socket.shutdown().await;
    debug!(
        n_counts = counts.len(),
        elapsed = ?started.elapsed(),
        "transaction complete"
    );

    Ok(LookupOutcome {
        status: resp.status,
        counts,
    })
}
