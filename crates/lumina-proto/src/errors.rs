//! Error types for the lumina wire codec.
//!
//! Two layers: [`RangeError`] for encode-side domain violations (a value that
//! cannot be represented in the chosen varint width) and [`ProtocolError`]
//! for everything that can go wrong while parsing bytes off the wire.
//!
//! We avoid `std::io::Error` here so the codec stays sans-IO: callers decide
//! how a malformed packet maps onto their transport.

use thiserror::Error;

/// Result alias used throughout the codec.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// A value that does not fit the varint domain it is being encoded into.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeError {
    /// A length (string, buffer, or list count) exceeds the 32-bit varint
    /// domain. Lengths on the wire are always VarInt32.
    #[error("length {0} does not fit in a 32-bit varint")]
    LengthOverflow(usize),
}

/// Errors raised while decoding wire data.
///
/// All of these are fatal for the packet being parsed. The session layer
/// answers with an `RPC_NOTIFY` where the socket is still writable, then
/// closes the connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The input ended before the grammar was satisfied.
    #[error("short read while decoding {what}: needed {expected} byte(s), had {actual}")]
    ShortRead {
        /// Wire element being decoded when the input ran out
        what: &'static str,
        /// Bytes the element still required
        expected: usize,
        /// Bytes that were actually available
        actual: usize,
    },

    /// A payload grammar finished without consuming the whole payload.
    ///
    /// The envelope's length field covers the payload exactly; leftover bytes
    /// mean the peer and this codec disagree about the message shape.
    #[error("payload for code {code:#04x} left {remaining} trailing byte(s)")]
    TrailingBytes {
        /// Opcode of the offending packet
        code: u8,
        /// Bytes left unconsumed after the grammar completed
        remaining: usize,
    },

    /// The envelope length field exceeds the payload cap.
    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge {
        /// Claimed payload size
        size: usize,
        /// Maximum accepted payload size
        max: usize,
    },

    /// A null-terminated string ran to the end of the payload without a NUL.
    #[error("unterminated string while decoding {0}")]
    MissingNul(&'static str),

    /// String bytes were not valid UTF-8.
    #[error("invalid UTF-8 while decoding {0}")]
    InvalidUtf8(&'static str),

    /// No payload grammar is defined for this opcode.
    ///
    /// Covers both codes outside the RPC table and reserved codes the server
    /// does not implement. The session layer answers "Unknown command".
    #[error("no message grammar for RPC code {0:#04x}")]
    UnknownCode(u8),

    /// Encode-side domain violation surfaced through the decode path.
    #[error(transparent)]
    Range(#[from] RangeError),
}
