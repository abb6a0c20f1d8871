//! Outbound packet format for the WAN link.
//!
//! Every frame is a big-endian `u32` body length followed by the body:
//!
//! ```text
//! version:u8 | tag:u8 | fields...
//!
//! tag 0x01 REPLICATION_MERGE  name_len:u16 | name | key_len:u32 | key | value_len:u32 | value
//! tag 0x02 AUTH               group_len:u16 | group | pass_len:u16 | pass
//! ```
//!
//! Encoding is pure. [`decode`] is the exact inverse and is what the peer
//! cluster's ingestion path runs.

use crate::error::{GridwanError, Result};
use crate::types::{LinkCredentials, PendingUpdate};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

pub const WIRE_VERSION: u8 = 1;

/// Upper bound on a single frame body, enforced on both sides.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const LEN_PREFIX: usize = 4;
const HEADER_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OperationTag {
    /// Apply the entry as a replication merge, not as a user-initiated write.
    ReplicationMerge = 0x01,
    /// Group identity handshake, first frame on every connection.
    Auth = 0x02,
}

impl TryFrom<u8> for OperationTag {
    type Error = GridwanError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(OperationTag::ReplicationMerge),
            0x02 => Ok(OperationTag::Auth),
            other => Err(GridwanError::Decode(format!(
                "unknown operation tag 0x{:02x}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Merge(PendingUpdate),
    Auth(LinkCredentials),
}

impl Packet {
    pub fn tag(&self) -> OperationTag {
        match self {
            Packet::Merge(_) => OperationTag::ReplicationMerge,
            Packet::Auth(_) => OperationTag::Auth,
        }
    }
}

/// Encode a pending update as a complete REPLICATION_MERGE frame.
pub fn encode_update(update: &PendingUpdate) -> Result<Bytes> {
    let name = update.container_name().as_bytes();
    let key = update.key();
    let value = update.value_envelope();

    let name_len = u16_len(name.len(), "container name")?;
    let key_len = u32_len(key.len(), "key")?;
    let value_len = u32_len(value.len(), "value envelope")?;

    let body_len = HEADER_LEN + 2 + name.len() + 4 + key.len() + 4 + value.len();
    let mut buf = frame_buffer(body_len, OperationTag::ReplicationMerge)?;
    buf.put_u16(name_len);
    buf.put_slice(name);
    buf.put_u32(key_len);
    buf.put_slice(key);
    buf.put_u32(value_len);
    buf.put_slice(value);
    Ok(buf.freeze())
}

/// Encode the group handshake frame.
pub fn encode_auth(credentials: &LinkCredentials) -> Result<Bytes> {
    let group = credentials.group_name.as_bytes();
    let password = credentials.password.as_bytes();

    let group_len = u16_len(group.len(), "group name")?;
    let password_len = u16_len(password.len(), "group password")?;

    let body_len = HEADER_LEN + 2 + group.len() + 2 + password.len();
    let mut buf = frame_buffer(body_len, OperationTag::Auth)?;
    buf.put_u16(group_len);
    buf.put_slice(group);
    buf.put_u16(password_len);
    buf.put_slice(password);
    Ok(buf.freeze())
}

pub fn encode(packet: &Packet) -> Result<Bytes> {
    match packet {
        Packet::Merge(update) => encode_update(update),
        Packet::Auth(credentials) => encode_auth(credentials),
    }
}

/// Decode a frame body (length prefix already stripped).
pub fn decode(mut body: Bytes) -> Result<Packet> {
    if body.remaining() < HEADER_LEN {
        return Err(truncated("header"));
    }
    let version = body.get_u8();
    if version != WIRE_VERSION {
        return Err(GridwanError::Decode(format!(
            "unsupported wire version {}",
            version
        )));
    }

    let packet = match OperationTag::try_from(body.get_u8())? {
        OperationTag::ReplicationMerge => {
            let name_len = read_u16(&mut body, "container name length")? as usize;
            let name = read_string(&mut body, name_len, "container name")?;
            let key_len = read_u32(&mut body, "key length")? as usize;
            let key = read_bytes(&mut body, key_len, "key")?;
            let value_len = read_u32(&mut body, "value length")? as usize;
            let value = read_bytes(&mut body, value_len, "value envelope")?;
            Packet::Merge(PendingUpdate::new(name, key, value))
        }
        OperationTag::Auth => {
            let group_len = read_u16(&mut body, "group name length")? as usize;
            let group_name = read_string(&mut body, group_len, "group name")?;
            let password_len = read_u16(&mut body, "group password length")? as usize;
            let password = read_string(&mut body, password_len, "group password")?;
            Packet::Auth(LinkCredentials::new(group_name, password))
        }
    };

    if body.has_remaining() {
        return Err(GridwanError::Decode(format!(
            "{} trailing bytes after packet",
            body.remaining()
        )));
    }
    Ok(packet)
}

/// Decode a complete frame including its length prefix.
pub fn decode_frame(mut frame: Bytes) -> Result<Packet> {
    if frame.remaining() < LEN_PREFIX {
        return Err(truncated("length prefix"));
    }
    let len = frame.get_u32() as usize;
    if len != frame.remaining() {
        return Err(GridwanError::Decode(format!(
            "length prefix says {} bytes, frame has {}",
            len,
            frame.remaining()
        )));
    }
    decode(frame)
}

/// Read one frame body from a stream.
///
/// Returns `Ok(None)` on a clean end of stream at a frame boundary.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(GridwanError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(Bytes::from(body)))
}

fn frame_buffer(body_len: usize, tag: OperationTag) -> Result<BytesMut> {
    if body_len > MAX_FRAME_LEN {
        return Err(GridwanError::FrameTooLarge {
            size: body_len,
            max: MAX_FRAME_LEN,
        });
    }
    let mut buf = BytesMut::with_capacity(LEN_PREFIX + body_len);
    buf.put_u32(body_len as u32);
    buf.put_u8(WIRE_VERSION);
    buf.put_u8(tag as u8);
    Ok(buf)
}

fn u16_len(len: usize, what: &str) -> Result<u16> {
    u16::try_from(len)
        .map_err(|_| GridwanError::Encode(format!("{} too long: {} bytes", what, len)))
}

fn u32_len(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len)
        .map_err(|_| GridwanError::Encode(format!("{} too long: {} bytes", what, len)))
}

fn truncated(what: &str) -> GridwanError {
    GridwanError::Decode(format!("truncated packet: missing {}", what))
}

fn read_u16(buf: &mut Bytes, what: &str) -> Result<u16> {
    if buf.remaining() < 2 {
        return Err(truncated(what));
    }
    Ok(buf.get_u16())
}

fn read_u32(buf: &mut Bytes, what: &str) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(truncated(what));
    }
    Ok(buf.get_u32())
}

fn read_bytes(buf: &mut Bytes, len: usize, what: &str) -> Result<Bytes> {
    if buf.remaining() < len {
        return Err(truncated(what));
    }
    Ok(buf.split_to(len))
}

fn read_string(buf: &mut Bytes, len: usize, what: &str) -> Result<String> {
    let raw = read_bytes(buf, len, what)?;
    String::from_utf8(raw.to_vec())
        .map_err(|_| GridwanError::Decode(format!("{} is not valid UTF-8", what)))
}
