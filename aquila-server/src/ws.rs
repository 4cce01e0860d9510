//! MQTT over WebSocket.
//!
//! The HTTP upgrade is accepted only at path `/socket`; binary frames carry
//! the MQTT byte stream and are fed through the same frame parser as the
//! TCP transport.

use std::io;

use async_trait::async_trait;
use bytes::BytesMut;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::broadcast,
};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::StatusCode,
        Message,
    },
    WebSocketStream,
};
use tracing::{debug, error, info};

use aquila_core::{codec::Encoder, error::Error, Result};
use aquila_packets::ControlPacket;

use crate::{
    connection::{next_frame, ClientWriter, PacketSink, PacketSource},
    engine::ProtocolEngine,
    registry::Registry,
    shutdown::Shutdown,
};

const MQTT_WS_PATH: &str = "/socket";

pub(crate) struct WsServer {
    listener: TcpListener,
    registry: Registry,
    notify_shutdown: broadcast::Sender<()>,
}

impl WsServer {
    pub(crate) fn new(
        listener: TcpListener,
        registry: Registry,
        notify_shutdown: broadcast::Sender<()>,
    ) -> WsServer {
        WsServer {
            listener,
            registry,
            notify_shutdown,
        }
    }

    pub(crate) async fn run(&mut self) -> Result<()> {
        info!("websocket listening on {}", self.listener.local_addr()?);

        loop {
            let (socket, peer) = self.listener.accept().await?;

            let registry = self.registry.clone();
            let shutdown = Shutdown::new(self.notify_shutdown.subscribe());

            tokio::spawn(async move {
                let callback = |request: &Request, response: Response| {
                    if request.uri().path() == MQTT_WS_PATH {
                        Ok(response)
                    } else {
                        let mut not_found = ErrorResponse::new(Some("not found".to_string()));
                        *not_found.status_mut() = StatusCode::NOT_FOUND;
                        Err(not_found)
                    }
                };

                match accept_hdr_async(socket, callback).await {
                    Ok(stream) => {
                        debug!("websocket session established with {}", peer);
                        handle_socket(stream, registry, shutdown).await;
                    }
                    Err(e) => debug!("websocket upgrade failed for {}: {}", peer, e),
                }
            });
        }
    }
}

async fn handle_socket(
    stream: WebSocketStream<TcpStream>,
    registry: Registry,
    shutdown: Shutdown,
) {
    let (sink, source) = stream.split();

    let writer = ClientWriter::new(Box::new(WsSink::new(sink)));
    let engine = ProtocolEngine::new(WsPacketReader::new(source), writer, registry, shutdown);

    if let Err(e) = engine.run().await {
        error!(cause = ?e, "websocket connection error");
    }
}

fn ws_error(e: tokio_tungstenite::tungstenite::Error) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, e))
}

struct WsSink {
    sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    buffer: BytesMut,
}

impl WsSink {
    fn new(sink: SplitSink<WebSocketStream<TcpStream>, Message>) -> WsSink {
        WsSink {
            sink,
            buffer: BytesMut::new(),
        }
    }
}

#[async_trait]
impl PacketSink for WsSink {
    async fn write_packet(&mut self, packet: &ControlPacket) -> Result<()> {
        self.buffer.clear();
        packet.encode(&mut self.buffer);

        self.sink
            .send(Message::Binary(self.buffer.to_vec()))
            .await
            .map_err(ws_error)?;

        Ok(())
    }
}

struct WsPacketReader {
    stream: SplitStream<WebSocketStream<TcpStream>>,
    buffer: BytesMut,
}

impl WsPacketReader {
    fn new(stream: SplitStream<WebSocketStream<TcpStream>>) -> WsPacketReader {
        WsPacketReader {
            stream,
            buffer: BytesMut::new(),
        }
    }
}

#[async_trait]
impl PacketSource for WsPacketReader {
    async fn read_packet(&mut self) -> Result<Option<ControlPacket>> {
        loop {
            if let Some(packet) = next_frame(&mut self.buffer)? {
                return Ok(Some(packet));
            }

            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => self.buffer.extend_from_slice(&data),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                // Control and text frames carry no MQTT bytes.
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(ws_error(e)),
            }
        }
    }
}
