//! Greeting and NULL-mechanism handshake over a fresh TCP stream.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::debug;

use crate::error::{Result, StreamError};
use crate::transport::zmtp::{self, GREETING_SIZE, SocketType, ZmtpCodec, ZmtpFrame};

/// How long a peer gets to complete greeting + READY.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// A stream that completed the handshake, split for independent reading
/// and writing.
pub struct Handshaken {
    pub reader: FramedRead<OwnedReadHalf, ZmtpCodec>,
    pub writer: FramedWrite<OwnedWriteHalf, ZmtpCodec>,
    pub peer_type: SocketType,
    pub remote: SocketAddr,
}

/// Run the ZMTP 3.0 NULL handshake as `local`, bounded by
/// [`HANDSHAKE_TIMEOUT`].
pub async fn handshake(
    stream: TcpStream,
    local: SocketType,
    max_frame_size: usize,
) -> Result<Handshaken> {
    tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake_inner(stream, local, max_frame_size))
        .await
        .map_err(|_| StreamError::Timeout(HANDSHAKE_TIMEOUT))?
}

async fn handshake_inner(
    stream: TcpStream,
    local: SocketType,
    max_frame_size: usize,
) -> Result<Handshaken> {
    stream.set_nodelay(true)?;
    let remote = stream.peer_addr()?;
    let (mut read_half, mut write_half) = stream.into_split();

    write_half.write_all(&zmtp::greeting()).await?;
    let mut peer_greeting = [0u8; GREETING_SIZE];
    read_half.read_exact(&mut peer_greeting).await?;
    let (major, minor) = zmtp::check_greeting(&peer_greeting)?;
    debug!(%remote, "peer speaks ZMTP {major}.{minor}");

    let mut reader = FramedRead::new(read_half, ZmtpCodec::new(max_frame_size));
    let mut writer = FramedWrite::new(write_half, ZmtpCodec::new(max_frame_size));

    writer.send(ZmtpFrame::ready(local)).await?;
    let ready = reader
        .next()
        .await
        .ok_or_else(|| StreamError::Handshake("peer closed before READY".into()))??;
    let peer_type = zmtp::parse_ready(&ready)?;

    if !local.accepts(peer_type) {
        return Err(StreamError::Handshake(format!(
            "{} socket cannot talk to {}",
            local.as_str(),
            peer_type.as_str()
        )));
    }

    Ok(Handshaken {
        reader,
        writer,
        peer_type,
        remote,
    })
}
