//! ZMTP 3.0 framing: the ZeroMQ wire protocol spoken by pub/sub peers.
//!
//! ## Greeting (64 bytes, exchanged raw before any frame)
//! ```text
//! signature:  FF 00 00 00 00 00 00 00 00 7F   (10)
//! version:    major=3 minor=0                  (2)
//! mechanism:  "NULL" zero-padded               (20)
//! as-server:  u8                               (1)
//! filler:     zeros                            (31)
//! ```
//!
//! ## Frame
//! ```text
//! flags:  u8  MORE=0x01 LONG=0x02 COMMAND=0x04
//! size:   u8, or u64 big-endian when LONG
//! body:   [u8; size]
//! ```
//!
//! A multipart message is a run of frames where every frame but the
//! last carries `MORE`.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{Result, StreamError};

// ── Constants ────────────────────────────────────────────────────

/// Greeting length on the wire.
pub const GREETING_SIZE: usize = 64;

/// Largest body accepted by the decoder unless configured otherwise.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

const MECHANISM_NULL: &[u8] = b"NULL";
const READY: &[u8] = b"READY";
const ERROR: &[u8] = b"ERROR";
const SUBSCRIBE: &[u8] = b"SUBSCRIBE";
const CANCEL: &[u8] = b"CANCEL";
const SOCKET_TYPE: &str = "Socket-Type";

// ── Greeting ─────────────────────────────────────────────────────

/// Build the local greeting.
pub fn greeting() -> [u8; GREETING_SIZE] {
    let mut buf = [0u8; GREETING_SIZE];
    buf[0] = 0xFF;
    buf[9] = 0x7F;
    buf[10] = 3;
    buf[11] = 0;
    buf[12..12 + MECHANISM_NULL.len()].copy_from_slice(MECHANISM_NULL);
    buf
}

/// Validate a peer greeting and return its protocol version.
pub fn check_greeting(buf: &[u8; GREETING_SIZE]) -> Result<(u8, u8)> {
    if buf[0] != 0xFF || buf[9] != 0x7F {
        return Err(StreamError::Handshake("bad greeting signature".into()));
    }
    let (major, minor) = (buf[10], buf[11]);
    if major < 3 {
        return Err(StreamError::Handshake(format!(
            "unsupported ZMTP version {major}.{minor}"
        )));
    }
    let mechanism = &buf[12..32];
    let end = mechanism.iter().position(|&b| b == 0).unwrap_or(mechanism.len());
    if &mechanism[..end] != MECHANISM_NULL {
        return Err(StreamError::Handshake(format!(
            "unsupported security mechanism {:?}",
            String::from_utf8_lossy(&mechanism[..end])
        )));
    }
    Ok((major, minor))
}

// ── SocketType ───────────────────────────────────────────────────

/// Socket types relevant to publish/subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    Pub,
    Sub,
    XPub,
    XSub,
}

impl SocketType {
    pub const fn as_str(self) -> &'static str {
        match self {
            SocketType::Pub => "PUB",
            SocketType::Sub => "SUB",
            SocketType::XPub => "XPUB",
            SocketType::XSub => "XSUB",
        }
    }

    pub fn parse(name: &[u8]) -> Option<Self> {
        match name {
            b"PUB" => Some(SocketType::Pub),
            b"SUB" => Some(SocketType::Sub),
            b"XPUB" => Some(SocketType::XPub),
            b"XSUB" => Some(SocketType::XSub),
            _ => None,
        }
    }

    /// Whether a socket of this type may talk to `peer`.
    pub fn accepts(self, peer: SocketType) -> bool {
        use SocketType::*;
        matches!(
            (self, peer),
            (Pub | XPub, Sub | XSub) | (Sub | XSub, Pub | XPub)
        )
    }
}

// ── Frames ───────────────────────────────────────────────────────

bitflags! {
    /// Frame flag byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FrameFlags: u8 {
        const MORE = 0x01;
        const LONG = 0x02;
        const COMMAND = 0x04;
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZmtpFrame {
    pub flags: FrameFlags,
    pub body: Bytes,
}

impl ZmtpFrame {
    /// A single-frame data message.
    pub fn data(body: impl Into<Bytes>) -> Self {
        Self {
            flags: FrameFlags::empty(),
            body: body.into(),
        }
    }

    /// A command frame: `name-size name data`.
    pub fn command(name: &[u8], data: &[u8]) -> Self {
        let mut body = BytesMut::with_capacity(1 + name.len() + data.len());
        body.put_u8(name.len() as u8);
        body.put_slice(name);
        body.put_slice(data);
        Self {
            flags: FrameFlags::COMMAND,
            body: body.freeze(),
        }
    }

    /// `READY` carrying the local socket type.
    pub fn ready(socket_type: SocketType) -> Self {
        let value = socket_type.as_str().as_bytes();
        let mut props = BytesMut::with_capacity(1 + SOCKET_TYPE.len() + 4 + value.len());
        props.put_u8(SOCKET_TYPE.len() as u8);
        props.put_slice(SOCKET_TYPE.as_bytes());
        props.put_u32(value.len() as u32);
        props.put_slice(value);
        Self::command(READY, &props)
    }

    pub fn is_command(&self) -> bool {
        self.flags.contains(FrameFlags::COMMAND)
    }

    pub fn has_more(&self) -> bool {
        self.flags.contains(FrameFlags::MORE)
    }

    /// Split a command body into `(name, data)`.
    pub fn command_parts(&self) -> Result<(&[u8], &[u8])> {
        let body = &self.body[..];
        let Some((&len, rest)) = body.split_first() else {
            return Err(StreamError::ProtocolViolation("empty command frame"));
        };
        let len = len as usize;
        if rest.len() < len {
            return Err(StreamError::ProtocolViolation("truncated command name"));
        }
        Ok(rest.split_at(len))
    }
}

/// Peer socket type from a `READY` command. An `ERROR` command is
/// surfaced as a handshake failure.
pub fn parse_ready(frame: &ZmtpFrame) -> Result<SocketType> {
    if !frame.is_command() {
        return Err(StreamError::Handshake("expected READY command".into()));
    }
    let (name, mut props) = frame.command_parts()?;
    if name == ERROR {
        let reason = props.split_first().map(|(_, r)| r).unwrap_or_default();
        return Err(StreamError::Handshake(format!(
            "peer sent ERROR: {}",
            String::from_utf8_lossy(reason)
        )));
    }
    if name != READY {
        return Err(StreamError::Handshake(format!(
            "expected READY, got {}",
            String::from_utf8_lossy(name)
        )));
    }

    let truncated = || StreamError::ProtocolViolation("truncated READY property");
    while !props.is_empty() {
        let name_len = props[0] as usize;
        props = &props[1..];
        if props.len() < name_len + 4 {
            return Err(truncated());
        }
        let (prop_name, rest) = props.split_at(name_len);
        let value_len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        let rest = &rest[4..];
        if rest.len() < value_len {
            return Err(truncated());
        }
        let (value, rest) = rest.split_at(value_len);
        if prop_name.eq_ignore_ascii_case(SOCKET_TYPE.as_bytes()) {
            return SocketType::parse(value).ok_or_else(|| {
                StreamError::Handshake(format!(
                    "unknown socket type {}",
                    String::from_utf8_lossy(value)
                ))
            });
        }
        props = rest;
    }
    Err(StreamError::Handshake("READY without Socket-Type".into()))
}

// ── Subscription messages ────────────────────────────────────────

/// A subscription change sent upstream by a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionChange {
    Subscribe(Bytes),
    Cancel(Bytes),
}

impl SubscriptionChange {
    /// Interpret an inbound frame. Both the ZMTP 3.0 message form
    /// (`0x01`/`0x00` + prefix) and the 3.1 `SUBSCRIBE`/`CANCEL`
    /// commands are understood. Anything else yields `None`.
    pub fn from_frame(frame: &ZmtpFrame) -> Option<Self> {
        if frame.is_command() {
            let (name, data) = frame.command_parts().ok()?;
            let prefix = frame.body.slice_ref(data);
            return match name {
                SUBSCRIBE => Some(Self::Subscribe(prefix)),
                CANCEL => Some(Self::Cancel(prefix)),
                _ => None,
            };
        }
        match frame.body.first() {
            Some(0x01) => Some(Self::Subscribe(frame.body.slice(1..))),
            Some(0x00) => Some(Self::Cancel(frame.body.slice(1..))),
            _ => None,
        }
    }

    /// Encode in the ZMTP 3.0 message form.
    pub fn to_frame(&self) -> ZmtpFrame {
        let (tag, prefix) = match self {
            Self::Subscribe(p) => (0x01u8, p),
            Self::Cancel(p) => (0x00u8, p),
        };
        let mut body = BytesMut::with_capacity(1 + prefix.len());
        body.put_u8(tag);
        body.put_slice(prefix);
        ZmtpFrame::data(body.freeze())
    }
}

// ── Multipart ────────────────────────────────────────────────────

/// A borrowed multipart message, encoded without copying the parts into
/// an intermediate allocation.
#[derive(Debug, Clone, Copy)]
pub struct Multipart<'a> {
    parts: &'a [&'a [u8]],
}

impl<'a> Multipart<'a> {
    pub fn new(parts: &'a [&'a [u8]]) -> Self {
        Self { parts }
    }

    pub fn parts(&self) -> &'a [&'a [u8]] {
        self.parts
    }

    /// The first part, used for subscription matching.
    pub fn topic(&self) -> &'a [u8] {
        self.parts.first().copied().unwrap_or_default()
    }

    /// Bytes on the wire including frame headers.
    pub fn encoded_len(&self) -> usize {
        self.parts.iter().map(|p| header_len(p.len()) + p.len()).sum()
    }
}

fn header_len(body_len: usize) -> usize {
    if body_len > u8::MAX as usize { 9 } else { 2 }
}

fn put_frame_header(dst: &mut BytesMut, mut flags: FrameFlags, body_len: usize) {
    if body_len > u8::MAX as usize {
        flags |= FrameFlags::LONG;
        dst.put_u8(flags.bits());
        dst.put_u64(body_len as u64);
    } else {
        dst.put_u8(flags.bits());
        dst.put_u8(body_len as u8);
    }
}

// ── Codec ────────────────────────────────────────────────────────

/// Frame codec for `tokio_util::codec::{FramedRead, FramedWrite}`.
#[derive(Debug, Clone)]
pub struct ZmtpCodec {
    max_frame_size: usize,
}

impl ZmtpCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for ZmtpCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for ZmtpCodec {
    type Item = ZmtpFrame;
    type Error = StreamError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let Some(&flag_byte) = src.first() else {
            return Ok(None);
        };
        let flags = FrameFlags::from_bits(flag_byte)
            .ok_or(StreamError::ProtocolViolation("reserved frame flag bits set"))?;

        let (header, size) = if flags.contains(FrameFlags::LONG) {
            if src.len() < 9 {
                return Ok(None);
            }
            let size = u64::from_be_bytes([
                src[1], src[2], src[3], src[4], src[5], src[6], src[7], src[8],
            ]);
            (9, size)
        } else {
            if src.len() < 2 {
                return Ok(None);
            }
            (2, src[1] as u64)
        };

        if size > self.max_frame_size as u64 {
            return Err(StreamError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }
        let size = size as usize;

        if src.len() < header + size {
            src.reserve(header + size - src.len());
            return Ok(None);
        }

        src.advance(header);
        let body = src.split_to(size).freeze();
        Ok(Some(ZmtpFrame {
            flags: flags - FrameFlags::LONG,
            body,
        }))
    }
}

impl Encoder<ZmtpFrame> for ZmtpCodec {
    type Error = StreamError;

    fn encode(&mut self, item: ZmtpFrame, dst: &mut BytesMut) -> Result<()> {
        let flags = item.flags - FrameFlags::LONG;
        dst.reserve(header_len(item.body.len()) + item.body.len());
        put_frame_header(dst, flags, item.body.len());
        dst.put_slice(&item.body);
        Ok(())
    }
}

impl<'a> Encoder<Multipart<'a>> for ZmtpCodec {
    type Error = StreamError;

    fn encode(&mut self, item: Multipart<'a>, dst: &mut BytesMut) -> Result<()> {
        let parts = item.parts();
        if parts.is_empty() {
            return Err(StreamError::ProtocolViolation("empty multipart message"));
        }
        dst.reserve(item.encoded_len());
        let last = parts.len() - 1;
        for (i, part) in parts.iter().enumerate() {
            let flags = if i < last {
                FrameFlags::MORE
            } else {
                FrameFlags::empty()
            };
            put_frame_header(dst, flags, part.len());
            dst.put_slice(part);
        }
        Ok(())
    }
}
