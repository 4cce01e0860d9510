//! Listener loops tying transports to the protocol engine.

use std::future::Future;

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    sync::broadcast,
    time::{self, Duration},
};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info};

use aquila_core::Result;

use crate::{
    connection::{ClientWriter, PacketReader, StreamSink},
    engine::ProtocolEngine,
    registry::{BrokerOptions, Registry},
    shutdown::Shutdown,
    tls::TlsConfig,
    ws,
};

struct TcpServer {
    listener: TcpListener,
    tls_acceptor: Option<TlsAcceptor>,
    registry: Registry,
    notify_shutdown: broadcast::Sender<()>,
}

/// Run the broker until `shutdown` completes.
///
/// `tcp` serves MQTT over TCP, wrapped in TLS when `tls` is given; `ws`
/// serves MQTT over WebSocket, upgraded at path `/socket`. Either listener
/// may be absent. A TLS configuration that fails to load disables the TCP
/// listener entirely.
pub async fn run(
    tcp: Option<TcpListener>,
    tls: Option<TlsConfig>,
    ws: Option<TcpListener>,
    options: BrokerOptions,
    shutdown: impl Future,
) {
    let (notify_shutdown, _) = broadcast::channel(1);
    let registry = Registry::new(options);

    let (tcp, tls_acceptor) = match tls {
        Some(config) => match config.build_acceptor() {
            Ok(acceptor) => {
                info!("TLS enabled");
                (tcp, Some(acceptor))
            }
            Err(e) => {
                error!("invalid TLS configuration, disabling the TCP listener: {}", e);
                (None, None)
            }
        },
        None => (tcp, None),
    };

    let tcp_server = tcp.map(|listener| TcpServer {
        listener,
        tls_acceptor,
        registry: registry.clone(),
        notify_shutdown: notify_shutdown.clone(),
    });

    let ws_server = ws.map(|listener| {
        ws::WsServer::new(listener, registry.clone(), notify_shutdown.clone())
    });

    tokio::select! {
        result = serve_tcp(tcp_server) => {
            if let Err(e) = result {
                error!("TCP listener failed: {}", e);
            }
        }
        result = serve_ws(ws_server) => {
            if let Err(e) = result {
                error!("WebSocket listener failed: {}", e);
            }
        }
        _ = shutdown => {
            info!("shutting down");
        }
    }
}

async fn serve_tcp(server: Option<TcpServer>) -> Result<()> {
    match server {
        Some(mut server) => server.run().await,
        None => std::future::pending().await,
    }
}

async fn serve_ws(server: Option<ws::WsServer>) -> Result<()> {
    match server {
        Some(mut server) => server.run().await,
        None => std::future::pending().await,
    }
}

impl TcpServer {
    async fn run(&mut self) -> Result<()> {
        info!("listening on {}", self.listener.local_addr()?);

        loop {
            let socket = self.accept().await?;
            let peer = socket.peer_addr().ok();

            debug!("accepted connection from {:?}", peer);

            let registry = self.registry.clone();
            let shutdown = Shutdown::new(self.notify_shutdown.subscribe());

            match &self.tls_acceptor {
                Some(acceptor) => {
                    let acceptor = acceptor.clone();
                    tokio::spawn(async move {
                        match acceptor.accept(socket).await {
                            Ok(stream) => handle_stream(stream, registry, shutdown).await,
                            Err(e) => error!("TLS handshake failed for {:?}: {}", peer, e),
                        }
                    });
                }
                None => {
                    tokio::spawn(async move {
                        handle_stream(socket, registry, shutdown).await;
                    });
                }
            }
        }
    }

    /// Accept with exponential backoff on transient errors.
    async fn accept(&mut self) -> Result<TcpStream> {
        let mut backoff = 1;

        loop {
            match self.listener.accept().await {
                Ok((socket, _)) => return Ok(socket),
                Err(err) => {
                    if backoff > 64 {
                        return Err(err.into());
                    }
                }
            }

            time::sleep(Duration::from_secs(backoff)).await;

            backoff *= 2;
        }
    }
}

/// Frame a byte stream and run a protocol engine over it.
pub async fn handle_stream<S>(stream: S, registry: Registry, shutdown: Shutdown)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);

    let source = PacketReader::new(read_half);
    let writer = ClientWriter::new(Box::new(StreamSink::new(write_half)));

    let engine = ProtocolEngine::new(source, writer, registry, shutdown);
    if let Err(e) = engine.run().await {
        error!(cause = ?e, "connection error");
    }
}
