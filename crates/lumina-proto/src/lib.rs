//! Wire codec for the lumina function-metadata protocol.
//!
//! The disassembler client shares reverse-engineering metadata through a
//! length-prefixed binary RPC protocol. This crate is the sans-IO codec for
//! it: no sockets, no async, just bytes in and typed values out.
//!
//! Three layers, leaves first:
//!
//! - [`varint`]: the client's three packed integer widths (`dw`/`dd`/`dq`)
//!   plus the shifted effective-address adapter.
//! - [`message`]: the typed message grammar built on the varints, one
//!   [`RpcMessage`] variant per handled opcode.
//! - [`packet`]: the envelope frame (big-endian length, opcode byte,
//!   payload) and the glue between envelopes and messages.
//!
//! Compatibility note: the peer is a closed-source client, so the grammar
//! here is bit-exact by construction, including its quirks (the `0x7F`
//! two-byte mask, the two little-endian license fields, the +1 address
//! shift). Round-trip properties are enforced in `tests/`.

#![forbid(unsafe_code)]

pub mod errors;
pub mod message;
pub mod packet;
pub mod varint;

pub use errors::{ProtocolError, RangeError};
pub use message::{
    Fail, FuncInfo, FuncMd, Helo, Metadata, Notify, PROTOCOL_VERSION, PullMd, PullMdResult,
    PushMd, PushMdResult, RpcMessage, SIGNATURE_VERSION, Signature,
};
pub use packet::{Packet, RpcCode};
