//! Receive side of the transport, used by monitoring tools and tests.

use std::net::SocketAddr;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info};

use crate::error::{Result, StreamError};
use crate::transport::address::{AddressMode, TransportAddress};
use crate::transport::handshake::{Handshaken, handshake};
use crate::transport::zmtp::{DEFAULT_MAX_FRAME_SIZE, SocketType, SubscriptionChange, ZmtpCodec};

/// A single-peer SUB socket.
pub struct Subscriber {
    reader: FramedRead<OwnedReadHalf, ZmtpCodec>,
    writer: FramedWrite<OwnedWriteHalf, ZmtpCodec>,
    remote: SocketAddr,
}

impl Subscriber {
    /// Open `address`. Connects unless the address carries `@`, in which
    /// case the first publisher to dial in is accepted.
    pub async fn connect(address: &str) -> Result<Self> {
        let address = TransportAddress::parse(address, AddressMode::Connect)?;
        match address.mode() {
            AddressMode::Connect => {
                let stream = TcpStream::connect(address.socket_addr()).await?;
                Self::establish(stream).await
            }
            AddressMode::Bind => {
                let listener = TcpListener::bind(address.socket_addr()).await?;
                info!(local = %listener.local_addr()?, "waiting for publisher");
                Self::accept(&listener).await
            }
        }
    }

    /// Accept one publisher from an already-bound listener.
    pub async fn accept(listener: &TcpListener) -> Result<Self> {
        let (stream, _) = listener.accept().await?;
        Self::establish(stream).await
    }

    async fn establish(stream: TcpStream) -> Result<Self> {
        let Handshaken {
            reader,
            writer,
            remote,
            ..
        } = handshake(stream, SocketType::Sub, DEFAULT_MAX_FRAME_SIZE).await?;
        info!(%remote, "subscribed to publisher");
        Ok(Self {
            reader,
            writer,
            remote,
        })
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Receive messages whose topic starts with `prefix`. An empty
    /// prefix receives everything.
    pub async fn subscribe(&mut self, prefix: &[u8]) -> Result<()> {
        let change = SubscriptionChange::Subscribe(Bytes::copy_from_slice(prefix));
        self.writer.send(change.to_frame()).await
    }

    /// Cancel one earlier [`subscribe`](Self::subscribe) of `prefix`.
    pub async fn unsubscribe(&mut self, prefix: &[u8]) -> Result<()> {
        let change = SubscriptionChange::Cancel(Bytes::copy_from_slice(prefix));
        self.writer.send(change.to_frame()).await
    }

    /// Next complete multipart message, or `None` once the publisher
    /// closes the connection between messages.
    pub async fn recv(&mut self) -> Result<Option<Vec<Bytes>>> {
        let mut parts = Vec::new();
        loop {
            let Some(frame) = self.reader.next().await else {
                if parts.is_empty() {
                    return Ok(None);
                }
                return Err(StreamError::ProtocolViolation(
                    "connection closed mid-message",
                ));
            };
            let frame = frame?;
            if frame.is_command() {
                debug!(remote = %self.remote, "ignoring command frame");
                continue;
            }
            let more = frame.has_more();
            parts.push(frame.body);
            if !more {
                return Ok(Some(parts));
            }
        }
    }
}
