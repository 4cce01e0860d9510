//! Connection framing and the shared per-session writer.
//!
//! The read half of every transport becomes a [`PacketSource`]; the write
//! half is boxed behind a [`ClientWriter`], a cloneable handle the registry
//! shares with the routing fan-out. Writes are serialized by the writer's
//! internal mutex and bounded by [`WRITE_TIMEOUT`] so a stalled subscriber
//! can never wedge a publisher.

use std::io;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter},
    sync::Mutex,
    time::{timeout, Duration},
};
use tracing::warn;

use aquila_core::{codec::Encoder, error::Error, reason::ReasonCode, Result};
use aquila_packets::ControlPacket;

const READ_BUFFER_CAPACITY: usize = 8192;
const WRITE_BUFFER_CAPACITY: usize = 512;

/// Writes slower than this count as a dead subscriber.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Source of decoded control packets; the read half of a connection.
#[async_trait]
pub trait PacketSource: Send {
    /// Read the next packet. `Ok(None)` means the peer closed the stream.
    async fn read_packet(&mut self) -> Result<Option<ControlPacket>>;
}

/// Sink for encoded control packets; the write half of a connection.
#[async_trait]
pub trait PacketSink: Send {
    async fn write_packet(&mut self, packet: &ControlPacket) -> Result<()>;
}

/// Pull the next complete frame out of `buffer`, if one is there.
///
/// Frames that fail to decode are discarded in their entirety and the next
/// frame is tried, so one malformed packet never poisons the stream.
pub(crate) fn next_frame(buffer: &mut BytesMut) -> Result<Option<ControlPacket>> {
    loop {
        let frame_len = match ControlPacket::check(buffer) {
            Ok(len) => len,
            Err(Error::Incomplete) => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut frame = buffer.split_to(frame_len);
        match ControlPacket::parse(&mut frame) {
            Ok(packet) => return Ok(Some(packet)),
            Err(e) => {
                warn!("skipping malformed packet: {}", e);
            }
        }
    }
}

/// Incremental frame parser over a byte-stream read half.
pub struct PacketReader<R> {
    reader: R,
    buffer: BytesMut,
}

impl<R> PacketReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(reader: R) -> PacketReader<R> {
        PacketReader {
            reader,
            buffer: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
        }
    }
}

#[async_trait]
impl<R> PacketSource for PacketReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn read_packet(&mut self) -> Result<Option<ControlPacket>> {
        loop {
            if let Some(packet) = next_frame(&mut self.buffer)? {
                return Ok(Some(packet));
            }

            if 0 == self.reader.read_buf(&mut self.buffer).await? {
                if self.buffer.is_empty() {
                    return Ok(None);
                } else {
                    // The peer went away mid-frame.
                    return Err(ReasonCode::NormalDisconnection.into());
                }
            }
        }
    }
}

/// Byte-stream packet sink with a reusable encode buffer.
pub struct StreamSink<W> {
    writer: BufWriter<W>,
    buffer: BytesMut,
}

impl<W> StreamSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> StreamSink<W> {
        StreamSink {
            writer: BufWriter::new(writer),
            buffer: BytesMut::with_capacity(WRITE_BUFFER_CAPACITY),
        }
    }
}

#[async_trait]
impl<W> PacketSink for StreamSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_packet(&mut self, packet: &ControlPacket) -> Result<()> {
        self.buffer.clear();
        packet.encode(&mut self.buffer);

        self.writer.write_all(&self.buffer).await?;
        self.writer.flush().await?;

        Ok(())
    }
}

struct WriterShared {
    id: u64,
    sink: Mutex<Box<dyn PacketSink>>,
}

/// Cloneable handle to one connection's write half.
///
/// Both the connection's own protocol engine and the routing fan-out write
/// through this handle; the mutex keeps concurrent packets from
/// interleaving on the wire. The numeric ID is process-unique and is how
/// the registry finds the session behind an incoming packet.
#[derive(Clone)]
pub struct ClientWriter {
    shared: Arc<WriterShared>,
}

impl ClientWriter {
    pub fn new(sink: Box<dyn PacketSink>) -> ClientWriter {
        ClientWriter {
            shared: Arc::new(WriterShared {
                id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
                sink: Mutex::new(sink),
            }),
        }
    }

    /// Process-unique ID of the connection backing this writer.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Write one packet, serialized against all other writers of this
    /// connection and bounded by [`WRITE_TIMEOUT`].
    pub async fn write(&self, packet: &ControlPacket) -> Result<()> {
        let mut sink = self.shared.sink.lock().await;

        match timeout(WRITE_TIMEOUT, sink.write_packet(packet)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "packet write timed out",
            ))),
        }
    }
}
