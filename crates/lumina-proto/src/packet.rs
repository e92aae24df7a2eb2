//! Packet envelope framing.
//!
//! Every RPC exchange travels in the same fixed frame: a 4-byte big-endian
//! payload length, a 1-byte opcode, then exactly `length` bytes of payload.
//! Framing and payload grammar are kept independent on purpose: the envelope
//! is parsed first into `(code, payload_bytes)` and the grammar is selected
//! by the code afterwards, so a malformed payload can never desynchronize
//! the stream past its declared length.
//!
//! Unknown and reserved opcodes pass through the envelope untouched; only
//! [`RpcMessage::from_packet`] rejects them, which lets the session layer
//! answer them politely instead of dropping the connection mid-frame.

use bytes::{Buf, BufMut, Bytes};

use crate::{
    errors::{ProtocolError, Result},
    message::RpcMessage,
};

/// The RPC opcode table.
///
/// Codes `0x12..=0x1F` are reserved by the protocol but carry no payload
/// grammar here; the client never sends them in practice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RpcCode {
    /// Success, empty payload
    Ok = 0x0A,
    /// Failure with status and message
    Fail = 0x0B,
    /// Out-of-band notification
    Notify = 0x0C,
    /// Client handshake
    Helo = 0x0D,
    /// Metadata lookup request
    PullMd = 0x0E,
    /// Metadata lookup response
    PullMdResult = 0x0F,
    /// Metadata upload request
    PushMd = 0x10,
    /// Metadata upload response
    PushMdResult = 0x11,
    /// Reserved
    GetPop = 0x12,
    /// Reserved
    GetPopResult = 0x13,
    /// Reserved
    ListPeers = 0x14,
    /// Reserved
    ListPeersResult = 0x15,
    /// Reserved
    KillSessions = 0x16,
    /// Reserved
    KillSessionsResult = 0x17,
    /// Reserved
    DelEntries = 0x18,
    /// Reserved
    DelEntriesResult = 0x19,
    /// Reserved
    ShowEntries = 0x1A,
    /// Reserved
    ShowEntriesResult = 0x1B,
    /// Reserved
    DumpMd = 0x1C,
    /// Reserved
    DumpMdResult = 0x1D,
    /// Reserved
    CleanDb = 0x1E,
    /// Reserved
    Debugctl = 0x1F,
}

impl RpcCode {
    /// Map a raw opcode byte onto the table. `None` for bytes outside it.
    pub fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            0x0A => Self::Ok,
            0x0B => Self::Fail,
            0x0C => Self::Notify,
            0x0D => Self::Helo,
            0x0E => Self::PullMd,
            0x0F => Self::PullMdResult,
            0x10 => Self::PushMd,
            0x11 => Self::PushMdResult,
            0x12 => Self::GetPop,
            0x13 => Self::GetPopResult,
            0x14 => Self::ListPeers,
            0x15 => Self::ListPeersResult,
            0x16 => Self::KillSessions,
            0x17 => Self::KillSessionsResult,
            0x18 => Self::DelEntries,
            0x19 => Self::DelEntriesResult,
            0x1A => Self::ShowEntries,
            0x1B => Self::ShowEntriesResult,
            0x1C => Self::DumpMd,
            0x1D => Self::DumpMdResult,
            0x1E => Self::CleanDb,
            0x1F => Self::Debugctl,
            _ => return None,
        })
    }

    /// The raw opcode byte.
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// One framed packet: raw opcode byte plus undecoded payload bytes.
///
/// Holds bytes, not an [`RpcMessage`]: the envelope can be read, logged and
/// routed without committing to a payload grammar. Codes without a grammar
/// still produce a valid `Packet`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Raw opcode byte, possibly outside the [`RpcCode`] table
    pub code: u8,
    /// Payload bytes, exactly as framed
    pub payload: Bytes,
}

impl Packet {
    /// Envelope size: 4-byte length plus 1-byte opcode.
    pub const HEADER_SIZE: usize = 5;

    /// Payload cap (16 MB). The length field is peer-controlled; anything
    /// claiming more than this is rejected before a single payload byte is
    /// read or buffered.
    pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

    /// Wrap an opcode and payload into a packet.
    pub fn new(code: u8, payload: impl Into<Bytes>) -> Self {
        Self { code, payload: payload.into() }
    }

    /// The opcode as a table entry, `None` if the byte is outside it.
    pub fn code_enum(&self) -> Option<RpcCode> {
        RpcCode::from_u8(self.code)
    }

    /// Write the framed packet: BE length, opcode, payload.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if self.payload.len() > Self::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }

        dst.put_u32(self.payload.len() as u32);
        dst.put_u8(self.code);
        dst.put_slice(&self.payload);
        Ok(())
    }

    /// Consume one framed packet from the front of `src`.
    ///
    /// Validates the length field before touching the payload. On error the
    /// read position of `src` is unspecified; callers framing off a socket
    /// should drop the stream.
    pub fn decode(src: &mut Bytes) -> Result<Self> {
        if src.remaining() < Self::HEADER_SIZE {
            return Err(ProtocolError::ShortRead {
                what: "packet header",
                expected: Self::HEADER_SIZE,
                actual: src.remaining(),
            });
        }

        let length = src.get_u32();
        let code = src.get_u8();

        if length > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: length as usize,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }

        let length = length as usize;
        if src.remaining() < length {
            return Err(ProtocolError::ShortRead {
                what: "packet payload",
                expected: length,
                actual: src.remaining(),
            });
        }

        Ok(Self { code, payload: src.split_to(length) })
    }
}

impl RpcMessage {
    /// Frame this message into a packet.
    pub fn to_packet(&self) -> Result<Packet> {
        let mut payload = bytes::BytesMut::new();
        self.encode_payload(&mut payload)?;
        Ok(Packet::new(self.code().to_u8(), payload.freeze()))
    }

    /// Parse a packet's payload according to its opcode.
    ///
    /// Fails with [`ProtocolError::UnknownCode`] for codes without a
    /// grammar, and with [`ProtocolError::TrailingBytes`] if a well-formed
    /// grammar does not exhaust the payload exactly.
    pub fn from_packet(packet: &Packet) -> Result<Self> {
        let code = packet.code_enum().ok_or(ProtocolError::UnknownCode(packet.code))?;

        let mut payload = packet.payload.clone();
        let message = Self::decode_payload(code, &mut payload)?;

        if payload.has_remaining() {
            return Err(ProtocolError::TrailingBytes {
                code: packet.code,
                remaining: payload.remaining(),
            });
        }

        Ok(message)
    }
}
