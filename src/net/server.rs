//! Acceptor and server lifecycle.
//!
//! The server binds one listener, spawns a task per accepted connection,
//! and on SIGINT/SIGTERM stops accepting and drains in-flight connections;
//! per-step deadlines bound how long the drain can take.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::Result;

use super::connection::Connection;
use super::handler::{build_handler, RequestHandler};

/// Everything the server needs beyond logging setup
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub hostname: String,
    pub port: u16,
    pub methylome_dir: PathBuf,
    pub index_dir: PathBuf,
    pub max_resident: usize,
    pub deadline: Duration,
}

/// A bound server ready to accept connections.
pub struct Server {
    listener: TcpListener,
    handler: Arc<RequestHandler>,
    deadline: Duration,
}

impl Server {
    /// Loads the index pool (fail-closed), prepares the methylome cache,
    /// and binds the listener.
    pub async fn bind(options: &ServerOptions) -> Result<Self> {
        let handler = build_handler(
            &options.index_dir,
            &options.methylome_dir,
            options.max_resident,
        )?;
        Self::bind_with_handler(options, handler).await
    }

    pub async fn bind_with_handler(
        options: &ServerOptions,
        handler: Arc<RequestHandler>,
    ) -> Result<Self> {
        let listener =
            TcpListener::bind((options.hostname.as_str(), options.port)).await?;
        let local = listener.local_addr()?;
        if local.ip().is_loopback() {
            warn!(%local, "bound to a loopback address; not reachable from other hosts");
        }
        info!(%local, "listening");
        Ok(Self {
            listener,
            handler,
            deadline: options.deadline,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    #[must_use]
    pub fn handler(&self) -> &Arc<RequestHandler> {
        &self.handler
    }

    /// Accepts until SIGINT/SIGTERM, then drains in-flight connections.
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Accepts until `shutdown` resolves, then drains.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut tasks = JoinSet::new();
        let mut next_id: u64 = 0;
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            next_id += 1;
                            debug!(conn = next_id, %peer, "accepted connection");
                            let connection = Connection::new(
                                socket,
                                Arc::clone(&self.handler),
                                next_id,
                                self.deadline,
                            );
                            tasks.spawn(connection.run());
                            // reap whatever already finished
                            while tasks.try_join_next().is_some() {}
                        }
                        Err(err) => warn!(%err, "accept failed"),
                    }
                }
                () = &mut shutdown => {
                    info!("shutdown requested; no longer accepting");
                    break;
                }
            }
        }
        drop(self.listener);
        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "draining connections");
        }
        while tasks.join_next().await.is_some() {}
        Ok(())
    }
}

/// Resolves when the process receives SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler");
                std::future::pending::<()>().await;
                return;
            }
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(sigint) => sigint,
            Err(err) => {
                warn!(%err, "failed to register SIGINT handler");
                std::future::pending::<()>().await;
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StatusCode;
    use crate::net::client;
    use crate::net::handler::tests::toy_fixture;
    use crate::net::request::RequestHeader;
    use crate::net::RESPONSE_HEADER_SIZE;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    struct TestServer {
        addr: SocketAddr,
        handler: Arc<RequestHandler>,
        stop: Option<oneshot::Sender<()>>,
        task: tokio::task::JoinHandle<()>,
    }

    impl TestServer {
        async fn start(deadline: Duration, max_resident: usize) -> (Self, tempfile::TempDir) {
            let dir = tempfile::tempdir().unwrap();
            let (index_dir, methylome_dir) = toy_fixture(dir.path());
            let options = ServerOptions {
                hostname: "127.0.0.1".to_string(),
                port: 0,
                methylome_dir,
                index_dir,
                max_resident,
                deadline,
            };
            let server = Server::bind(&options).await.unwrap();
            let addr = server.local_addr().unwrap();
            let handler = Arc::clone(server.handler());
            let (stop, stopped) = oneshot::channel::<()>();
            let task = tokio::spawn(async move {
                server
                    .run_until(async {
                        let _ = stopped.await;
                    })
                    .await
                    .unwrap();
            });
            (
                Self {
                    addr,
                    handler,
                    stop: Some(stop),
                    task,
                },
                dir,
            )
        }

        async fn shutdown(mut self) {
            let _ = self.stop.take().unwrap().send(());
            self.task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn full_transaction_round_trip() {
        let (server, _dir) = TestServer::start(Duration::from_secs(3), 4).await;
        let outcome = client::lookup(
            &server.addr.ip().to_string(),
            server.addr.port(),
            "SRX1",
            3,
            &[(0, 3), (1, 2)],
        )
        .await
        .unwrap();
        assert_eq!(outcome.status, StatusCode::Ok);
        assert_eq!(outcome.counts.len(), 2);
        assert_eq!(outcome.counts[0].n_meth, 3);
        assert_eq!(outcome.counts[0].n_unmeth, 3);
        assert_eq!(outcome.counts[1].n_meth, 0);
        assert_eq!(outcome.counts[1].n_unmeth, 0);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn empty_interval_list_yields_empty_ok_response() {
        let (server, _dir) = TestServer::start(Duration::from_secs(3), 4).await;
        let outcome = client::lookup(
            &server.addr.ip().to_string(),
            server.addr.port(),
            "SRX1",
            3,
            &[],
        )
        .await
        .unwrap();
        assert_eq!(outcome.status, StatusCode::Ok);
        assert!(outcome.counts.is_empty());
        server.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_methylome_status_reaches_client() {
        let (server, _dir) = TestServer::start(Duration::from_secs(3), 4).await;
        let outcome = client::lookup(
            &server.addr.ip().to_string(),
            server.addr.port(),
            "SRX404",
            3,
            &[(0, 1)],
        )
        .await
        .unwrap();
        assert_eq!(outcome.status, StatusCode::UnknownMethylome);
        assert!(outcome.counts.is_empty());
        server.shutdown().await;
    }

    #[tokio::test]
    async fn stale_index_hash_reaches_client_as_metadata_mismatch() {
        let (server, dir) = TestServer::start(Duration::from_secs(3), 4).await;
        // repoint the methylome metadata at a nonexistent index build
        let m16 = crate::methylome::methylome_path(&dir.path().join("methylomes"), "SRX1");
        let meta_path = crate::methylome::metadata_path(&m16);
        let mut metadata = crate::methylome::MethylomeMetadata::read(&meta_path).unwrap();
        metadata.index_hash = "f".repeat(64);
        metadata.write(&meta_path).unwrap();

        let outcome = client::lookup(
            &server.addr.ip().to_string(),
            server.addr.port(),
            "SRX1",
            3,
            &[(0, 3)],
        )
        .await
        .unwrap();
        assert_eq!(outcome.status, StatusCode::MetadataMismatch);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn garbage_header_yields_bad_request() {
        let (server, _dir) = TestServer::start(Duration::from_secs(3), 4).await;
        let mut socket = TcpStream::connect(server.addr).await.unwrap();
        socket.write_all(&[0xffu8; 256]).await.unwrap();
        let mut frame = [0u8; RESPONSE_HEADER_SIZE];
        socket.read_exact(&mut frame).await.unwrap();
        let resp = crate::net::response::ResponseHeader::parse(&frame).unwrap();
        assert_eq!(resp.status, StatusCode::BadRequest);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn stalled_offsets_write_times_out() {
        let (server, _dir) = TestServer::start(Duration::from_millis(200), 4).await;
        let mut socket = TcpStream::connect(server.addr).await.unwrap();

        // declare two intervals but send only one record, then stall
        let header = RequestHeader::new("SRX1", 3, 2);
        socket.write_all(&header.compose().unwrap()).await.unwrap();
        socket.write_all(&[0u8; 8]).await.unwrap();

        // the server half-closes without writing a response header
        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(5), socket.read(&mut buf))
            .await
            .expect("server should close the connection");
        assert_eq!(read.unwrap(), 0);
        server.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_clients_share_one_methylome_load() {
        let (server, _dir) = TestServer::start(Duration::from_secs(3), 1).await;
        let addr = server.addr;
        let mut tasks = Vec::new();
        for _ in 0..2 {
            tasks.push(tokio::spawn(async move {
                client::lookup(&addr.ip().to_string(), addr.port(), "SRX1", 3, &[(0, 3)])
                    .await
                    .unwrap()
            }));
        }
        let mut outcomes = Vec::new();
        for task in tasks {
            outcomes.push(task.await.unwrap());
        }
        assert_eq!(server.handler.methylomes().n_loads(), 1);
        assert_eq!(outcomes[0].status, StatusCode::Ok);
        assert_eq!(outcomes[0].counts, outcomes[1].counts);
        server.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_drains_and_stops_accepting() {
        let (server, _dir) = TestServer::start(Duration::from_secs(3), 4).await;
        let addr = server.addr;
        server.shutdown().await;
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
