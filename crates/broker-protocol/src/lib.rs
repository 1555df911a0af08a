//! Wire format for the broker: opcode, string lengths, and body all sit in a
//! single little-endian frame. See `Message::encode`/`Message::decode`.

use std::fmt;

pub mod meta;

/// Hard ceiling on `body`, shared by the codec and the connection read loop.
/// `512 * 500` bytes, matching the read limit the transport enforces per frame.
pub const MAX_MESSAGE_SIZE: usize = 512 * 500;

/// Stable wire values. Order matches the external interface table: do not
/// renumber existing variants, only append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    Bind = 0,
    Unbind = 1,
    Write = 2,
    Server = 3,
    CleanUp = 4,
    StreamStart = 5,
    StreamEnd = 6,
    StreamWrite = 7,
    MetaQuery = 8,
    MetaQueryResponse = 9,
}

impl Opcode {
    /// `StreamStart`/`StreamEnd`/`StreamWrite` ride the same fan-out path as
    /// `Write`: same auth check, same storage hook, same sister forwarding.
    pub fn is_write_like(self) -> bool {
        matches!(
            self,
            Opcode::Write | Opcode::StreamStart | Opcode::StreamEnd | Opcode::StreamWrite
        )
    }
}

impl TryFrom<u16> for Opcode {
    type Error = DecodeError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Opcode::Bind),
            1 => Ok(Opcode::Unbind),
            2 => Ok(Opcode::Write),
            3 => Ok(Opcode::Server),
            4 => Ok(Opcode::CleanUp),
            5 => Ok(Opcode::StreamStart),
            6 => Ok(Opcode::StreamEnd),
            7 => Ok(Opcode::StreamWrite),
            8 => Ok(Opcode::MetaQuery),
            9 => Ok(Opcode::MetaQueryResponse),
            other => Err(DecodeError::UnknownOpcode(other)),
        }
    }
}

/// The sole wire object. `id`/`channel` are UTF-8; `body` is opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub opcode: Opcode,
    pub id: String,
    pub channel: String,
    pub body: Vec<u8>,
}

impl Message {
    pub fn new(opcode: Opcode, id: impl Into<String>, channel: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            opcode,
            id: id.into(),
            channel: channel.into(),
            body,
        }
    }

    /// A message addressing no channel (`Server`, `MetaQuery`, `MetaQueryResponse`).
    pub fn unchanneled(opcode: Opcode, id: impl Into<String>, body: Vec<u8>) -> Self {
        Self::new(opcode, id, String::new(), body)
    }

    /// The synthetic internal event the connection lifecycle posts to the hub.
    /// Never put on the wire.
    pub fn clean_up() -> Self {
        Self::new(Opcode::CleanUp, String::new(), String::new(), Vec::new())
    }

    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let id_bytes = self.id.as_bytes();
        let channel_bytes = self.channel.as_bytes();

        let id_size: u16 = id_bytes
            .len()
            .try_into()
            .map_err(|_| EncodeError::IdTooLong(id_bytes.len()))?;
        let name_size: u16 = channel_bytes
            .len()
            .try_into()
            .map_err(|_| EncodeError::ChannelTooLong(channel_bytes.len()))?;
        let body_size: u32 = self
            .body
            .len()
            .try_into()
            .map_err(|_| EncodeError::BodyTooLarge(self.body.len()))?;
        if self.body.len() > MAX_MESSAGE_SIZE {
            return Err(EncodeError::BodyTooLarge(self.body.len()));
        }

        let mut buf = Vec::with_capacity(2 + 2 + id_bytes.len() + 2 + channel_bytes.len() + 4 + self.body.len());
        buf.extend_from_slice(&(self.opcode as u16).to_le_bytes());
        buf.extend_from_slice(&id_size.to_le_bytes());
        buf.extend_from_slice(id_bytes);
        buf.extend_from_slice(&name_size.to_le_bytes());
        buf.extend_from_slice(channel_bytes);
        buf.extend_from_slice(&body_size.to_le_bytes());
        buf.extend_from_slice(&self.body);
        Ok(buf)
    }

    /// Decodes exactly one frame from `buf`. Never reads past `bodySize + header`;
    /// trailing bytes beyond the declared frame are simply ignored by the caller
    /// (a WebSocket binary message carries exactly one frame in this protocol).
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut cursor = Cursor::new(buf);

        let opcode = Opcode::try_from(cursor.read_u16()?)?;

        let id_size = cursor.read_u16()? as usize;
        let id_bytes = cursor.read_bytes(id_size)?;
        let id = String::from_utf8(id_bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8("id"))?;

        let name_size = cursor.read_u16()? as usize;
        let channel_bytes = cursor.read_bytes(name_size)?;
        let channel =
            String::from_utf8(channel_bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8("channel"))?;

        let body_size = cursor.read_u32()? as usize;
        if body_size > MAX_MESSAGE_SIZE {
            return Err(DecodeError::BodyTooLarge(body_size));
        }
        let body = cursor.read_bytes(body_size)?.to_vec();

        if opcode.requires_channel() && channel.is_empty() {
            return Err(DecodeError::MissingChannel);
        }

        Ok(Message {
            opcode,
            id,
            channel,
            body,
        })
    }
}

impl Opcode {
    /// `Bind`/`Unbind`/`Write` (and the stream variants) must address a channel;
    /// `Server`/`MetaQuery`/`MetaQueryResponse` must not.
    pub fn requires_channel(self) -> bool {
        matches!(
            self,
            Opcode::Bind | Opcode::Unbind | Opcode::Write | Opcode::StreamStart | Opcode::StreamEnd | Opcode::StreamWrite
        )
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let remaining = self.buf.len().saturating_sub(self.pos);
        if len > remaining {
            return Err(DecodeError::Truncated);
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    IdTooLong(usize),
    ChannelTooLong(usize),
    BodyTooLarge(usize),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::IdTooLong(n) => write!(f, "id of {n} bytes exceeds u16 length prefix"),
            EncodeError::ChannelTooLong(n) => write!(f, "channel of {n} bytes exceeds u16 length prefix"),
            EncodeError::BodyTooLarge(n) => write!(f, "body of {n} bytes exceeds maxMessageSize"),
        }
    }
}

impl std::error::Error for EncodeError {}

/// A frame failed to decode. Every variant means "drop the frame, drain the
/// connection" per the error handling design — none of these are recoverable
/// mid-stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// A length prefix claims more bytes than remain in the buffer.
    Truncated,
    /// Opcode outside the enumerated set.
    UnknownOpcode(u16),
    /// Declared body size exceeds `MAX_MESSAGE_SIZE`.
    BodyTooLarge(usize),
    /// `id` or `channel` was not valid UTF-8.
    InvalidUtf8(&'static str),
    /// Opcode requires a non-empty channel and none was given.
    MissingChannel,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated => write!(f, "frame truncated: length prefix exceeds remaining buffer"),
            DecodeError::UnknownOpcode(code) => write!(f, "unknown opcode {code}"),
            DecodeError::BodyTooLarge(n) => write!(f, "body of {n} bytes exceeds maxMessageSize"),
            DecodeError::InvalidUtf8(field) => write!(f, "{field} is not valid UTF-8"),
            DecodeError::MissingChannel => write!(f, "opcode requires a non-empty channel"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Mints a fresh RFC 4122 v4 id. Every originating `Write` needs one of these;
/// federation correctness depends on it being globally unique.
pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
