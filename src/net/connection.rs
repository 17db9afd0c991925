//! Per-connection lifecycle.
//!
//! Each accepted socket becomes one task that walks the transaction in
//! stages: read the header frame, validate it, read the offsets payload
//! (looping over fragmented receives), compute, write the response header,
//! write the counts. Every stage runs under the per-step deadline; an
//! expired deadline or I/O failure half-closes the socket and ends the
//! task, which drops the connection.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::StatusCode;

use super::handler::RequestHandler;
use super::request::{decode_offsets, RequestHeader};
use super::response::{counts_as_bytes, ResponseHeader};
use super::REQUEST_HEADER_SIZE;

/// Default per-step deadline
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(3);

enum ConnError {
    Timeout(&'static str),
    Io {
        stage: &'static str,
        err: std::io::Error,
    },
}

/// Wraps one stage of socket I/O with the per-step deadline.
async fn step<T, F>(deadline: Duration, stage: &'static str, io: F) -> Result<T, ConnError>
where
    F: Future<Output = std::io::Result<T>>,
{
    match timeout(deadline, io).await {
        Err(_) => Err(ConnError::Timeout(stage)),
        Ok(Err(err)) => Err(ConnError::Io { stage, err }),
        Ok(Ok(value)) => Ok(value),
    }
}

/// One accepted connection, serving exactly one transaction.
pub struct Connection {
    socket: TcpStream,
    handler: Arc<RequestHandler>,
    id: u64,
    deadline: Duration,
}

impl Connection {
    #[must_use]
    pub fn new(socket: TcpStream, handler: Arc<RequestHandler>, id: u64, deadline: Duration) -> Self {
        Self {
            socket,
            handler,
            id,
            deadline,
        }
    }

    /// Drives the transaction to completion and closes the socket.
    pub async fn run(mut self) {
        match self.serve().await {
            Ok(()) => debug!(conn = self.id, "connection closed"),
            Err(ConnError::Timeout(stage)) => {
                warn!(conn = self.id, stage, "timeout");
                let _ = self.socket.shutdown().await;
            }
            Err(ConnError::Io { stage, err }) => {
                warn!(conn = self.id, stage, %err, "connection error");
                let _ = self.socket.shutdown().await;
            }
        }
    }

    async fn serve(&mut self) -> Result<(), ConnError> {
        let deadline = self.deadline;

        let mut frame = [0u8; REQUEST_HEADER_SIZE];
        step(
            deadline,
            "reading request header",
            self.socket.read_exact(&mut frame),
        )
        .await?;

        let req = match RequestHeader::parse(&frame) {
            Ok(req) => req,
            Err(err) => {
                warn!(conn = self.id, %err, "request parse error");
                return self.respond_error(StatusCode::BadRequest).await;
            }
        };
        debug!(conn = self.id, header = %req.summary(), "received request header");

        let (resp_hdr, metadata) = self.handler.handle_header(&req);
        let Some(metadata) = metadata else {
            warn!(conn = self.id, header = %resp_hdr.summary(), "responding with error");
            return self.write_header_and_close(resp_hdr).await;
        };

        // the transport may fragment the payload arbitrarily
        let mut payload = vec![0u8; req.offsets_n_bytes()];
        let mut offset_byte = 0;
        while offset_byte < payload.len() {
            let read = step(
                deadline,
                "reading offsets",
                self.socket.read(&mut payload[offset_byte..]),
            )
            .await;
            match read {
                Ok(0) => {
                    warn!(conn = self.id, offset_byte, "peer closed during offsets");
                    return self.respond_error(StatusCode::IoError).await;
                }
                Ok(n) => offset_byte += n,
                // deadline expiry closes without a response
                Err(err @ ConnError::Timeout(_)) => return Err(err),
                Err(ConnError::Io { stage, err }) => {
                    warn!(conn = self.id, stage, %err, "error reading offsets");
                    return self.respond_error(StatusCode::IoError).await;
                }
            }
        }
        debug!(conn = self.id, n_bytes = offset_byte, "finished reading offsets");

        let offsets = match decode_offsets(&payload) {
            Ok(offsets) => offsets,
            Err(err) => {
                warn!(conn = self.id, %err, "offsets decode error");
                return self.respond_error(StatusCode::BadRequest).await;
            }
        };

        let (resp_hdr, counts) = self.handler.handle_get_counts(&req, &offsets, &metadata).await;
        step(
            deadline,
            "writing response header",
            self.socket.write_all(&resp_hdr.compose()),
        )
        .await?;
        if resp_hdr.status.is_ok() && !counts.is_empty() {
            step(
                deadline,
                "writing counts",
                self.socket.write_all(counts_as_bytes(&counts)),
            )
            .await?;
        }
        info!(conn = self.id, header = %resp_hdr.summary(), "responded");
        let _ = self.socket.shutdown().await;
        Ok(())
    }

    async fn respond_error(&mut self, status: StatusCode) -> Result<(), ConnError> {
        self.write_header_and_close(ResponseHeader::error(status))
            .await
    }

    async fn write_header_and_close(&mut self, resp: ResponseHeader) -> Result<(), ConnError> {
        step(
            self.deadline,
            "writing error header",
            self.socket.write_all(&resp.compose()),
        )
        .await?;
        let _ = self.socket.shutdown().await;
        Ok(())
    }
}
