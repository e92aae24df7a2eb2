//! Typed RPC message grammar.
//!
//! Payload grammars are built from a small set of helpers over the varint
//! codec: length-prefixed strings and buffers, null-terminated strings, and
//! count-prefixed lists. Every handled opcode maps to exactly one
//! [`RpcMessage`] variant; the opcode itself is carried by the packet
//! envelope, never inside the payload, so encoding a message writes only the
//! variant's fields (see [`crate::packet`]).
//!
//! The only fixed-width little-endian fields in the whole protocol are the
//! license id and watermark inside HELO. Everything else is varint or UTF-8.

use bytes::{Buf, BufMut, Bytes};
use serde::{Deserialize, Serialize};

use crate::{
    errors::{ProtocolError, Result},
    packet::RpcCode,
    varint,
};

/// Protocol version the server speaks in its own replies.
///
/// Clients announcing a different version are not rejected.
pub const PROTOCOL_VERSION: u32 = 2;

/// The only signature version with well-defined semantics.
///
/// Other versions are carried through and logged, never refused.
pub const SIGNATURE_VERSION: u32 = 1;

// -- grammar helpers ---------------------------------------------------------

/// Encode a length-prefixed UTF-8 string (VarInt32 length, then the bytes).
pub fn encode_var_string(dst: &mut impl BufMut, value: &str) -> Result<()> {
    varint::encode_len(dst, value.len())?;
    dst.put_slice(value.as_bytes());
    Ok(())
}

/// Decode a length-prefixed UTF-8 string.
pub fn decode_var_string(src: &mut Bytes) -> Result<String> {
    let len = varint::decode_dd(src)? as usize;
    if src.remaining() < len {
        return Err(ProtocolError::ShortRead {
            what: "VarString body",
            expected: len,
            actual: src.remaining(),
        });
    }
    let raw = src.split_to(len);
    std::str::from_utf8(&raw)
        .map(str::to_owned)
        .map_err(|_| ProtocolError::InvalidUtf8("VarString"))
}

/// Encode a length-prefixed byte buffer (VarInt32 length, then raw bytes).
pub fn encode_var_buff(dst: &mut impl BufMut, value: &[u8]) -> Result<()> {
    varint::encode_len(dst, value.len())?;
    dst.put_slice(value);
    Ok(())
}

/// Decode a length-prefixed byte buffer.
pub fn decode_var_buff(src: &mut Bytes) -> Result<Bytes> {
    let len = varint::decode_dd(src)? as usize;
    if src.remaining() < len {
        return Err(ProtocolError::ShortRead {
            what: "VarBuff body",
            expected: len,
            actual: src.remaining(),
        });
    }
    Ok(src.split_to(len))
}

/// Encode a null-terminated UTF-8 string.
pub fn encode_cstring(dst: &mut impl BufMut, value: &str) {
    debug_assert!(!value.as_bytes().contains(&0), "embedded NUL would truncate on decode");
    dst.put_slice(value.as_bytes());
    dst.put_u8(0);
}

/// Decode a null-terminated UTF-8 string, consuming the terminator.
pub fn decode_cstring(src: &mut Bytes, what: &'static str) -> Result<String> {
    let nul = src.iter().position(|&b| b == 0).ok_or(ProtocolError::MissingNul(what))?;
    let raw = src.split_to(nul);
    src.advance(1);
    std::str::from_utf8(&raw).map(str::to_owned).map_err(|_| ProtocolError::InvalidUtf8(what))
}

/// Encode a count-prefixed list (VarInt32 count, then each element in order).
pub fn encode_list<B: BufMut, T>(
    dst: &mut B,
    items: &[T],
    mut encode_item: impl FnMut(&mut B, &T) -> Result<()>,
) -> Result<()> {
    varint::encode_len(dst, items.len())?;
    for item in items {
        encode_item(dst, item)?;
    }
    Ok(())
}

/// Decode a count-prefixed list.
///
/// The claimed count is peer-controlled, so the initial reservation is
/// capped; a lying count fails on the first short element read instead of
/// allocating up front.
pub fn decode_list<T>(
    src: &mut Bytes,
    mut decode_item: impl FnMut(&mut Bytes) -> Result<T>,
) -> Result<Vec<T>> {
    let count = varint::decode_dd(src)? as usize;
    let mut items = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        items.push(decode_item(src)?);
    }
    Ok(items)
}

fn decode_md5(src: &mut Bytes) -> Result<[u8; 16]> {
    if src.remaining() < 16 {
        return Err(ProtocolError::ShortRead {
            what: "input md5",
            expected: 16,
            actual: src.remaining(),
        });
    }
    let mut md5 = [0u8; 16];
    src.copy_to_slice(&mut md5);
    Ok(md5)
}

// -- data shapes -------------------------------------------------------------

/// A function signature: version tag plus opaque signature bytes.
///
/// The bytes are the primary key material for the store; the version rides
/// along and is not part of the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    /// Signature scheme version, expected to be [`SIGNATURE_VERSION`]
    pub version: u32,
    /// Opaque signature bytes computed by the client
    pub bytes: Bytes,
}

impl Signature {
    /// Wire encoding: packed version, then a VarBuff of signature bytes.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        varint::encode_dd(dst, self.version);
        encode_var_buff(dst, &self.bytes)
    }

    /// Decode a signature from the payload.
    pub fn decode(src: &mut Bytes) -> Result<Self> {
        let version = varint::decode_dd(src)?;
        let bytes = decode_var_buff(src)?;
        Ok(Self { version, bytes })
    }
}

/// Per-function metadata as produced by the client.
///
/// `serialized_data` is an opaque blob; the server stores and replays it
/// without interpretation. Serde derives exist because the store snapshot
/// persists this shape verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Function name, null-terminated on the wire
    pub func_name: String,
    /// Function size in bytes
    pub func_size: u32,
    /// Opaque serialized metadata blob
    pub serialized_data: Bytes,
}

impl Metadata {
    fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        encode_cstring(dst, &self.func_name);
        varint::encode_dd(dst, self.func_size);
        encode_var_buff(dst, &self.serialized_data)
    }

    fn decode(src: &mut Bytes) -> Result<Self> {
        let func_name = decode_cstring(src, "func_name")?;
        let func_size = varint::decode_dd(src)?;
        let serialized_data = decode_var_buff(src)?;
        Ok(Self { func_name, func_size, serialized_data })
    }
}

/// Metadata plus its popularity counter, the pull result unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncInfo {
    /// The stored metadata
    pub metadata: Metadata,
    /// Number of pushes accepted for the matching signature
    pub popularity: u32,
}

impl FuncInfo {
    fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        self.metadata.encode(dst)?;
        varint::encode_dd(dst, self.popularity);
        Ok(())
    }

    fn decode(src: &mut Bytes) -> Result<Self> {
        let metadata = Metadata::decode(src)?;
        let popularity = varint::decode_dd(src)?;
        Ok(Self { metadata, popularity })
    }
}

/// Metadata plus the signature it belongs to, the push unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncMd {
    /// Metadata being pushed
    pub metadata: Metadata,
    /// Signature keying the metadata
    pub signature: Signature,
}

impl FuncMd {
    fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        self.metadata.encode(dst)?;
        self.signature.encode(dst)
    }

    fn decode(src: &mut Bytes) -> Result<Self> {
        let metadata = Metadata::decode(src)?;
        let signature = Signature::decode(src)?;
        Ok(Self { metadata, signature })
    }
}

// -- message payloads --------------------------------------------------------

/// RPC_FAIL payload: status code and a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fail {
    /// Numeric status
    pub status: u32,
    /// Explanation for the peer
    pub message: String,
}

/// RPC_NOTIFY payload: out-of-band text for the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notify {
    /// Protocol version of the sender
    pub protocol: u32,
    /// Notification text
    pub message: String,
}

/// RPC_HELO payload: the client's opening handshake.
///
/// The license fields are opaque to the server; they are handed to the
/// license predicate and otherwise ignored. `field_0x36` has unknown
/// semantics and is carried without interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Helo {
    /// Protocol version announced by the client
    pub protocol: u32,
    /// License file contents
    pub license_blob: Bytes,
    /// License id, little-endian on the wire
    pub hexrays_id: u32,
    /// License watermark, little-endian on the wire
    pub watermark: u16,
    /// Unknown, observed always zero
    pub field_0x36: u32,
}

/// PULL_MD payload: signatures the client wants metadata for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullMd {
    /// Request flags, uninterpreted
    pub flags: u32,
    /// Unknown list, uninterpreted
    pub ukn_list: Vec<u32>,
    /// Signatures to look up, answered positionally
    pub func_sigs: Vec<Signature>,
}

/// PULL_MD_RESULT payload: per-request hit flags plus the hits themselves.
///
/// `found` has one entry per requested signature; `results` carries only the
/// hits, in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullMdResult {
    /// 1 where the matching request hit, 0 where it missed
    pub found: Vec<u32>,
    /// One entry per hit, in request order
    pub results: Vec<FuncInfo>,
}

/// PUSH_MD payload: metadata the client wants the server to keep.
///
/// The provenance fields (paths, md5, hostname) describe where the metadata
/// came from; the server accepts them without interpretation. `field_0x10`
/// and `func_eas` have unknown semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMd {
    /// Unknown, uninterpreted
    pub field_0x10: u32,
    /// Absolute path of the client's database file
    pub idb_path: String,
    /// Absolute path of the analyzed input file
    pub input_path: String,
    /// MD5 of the analyzed input file, 16 raw bytes
    pub input_md5: [u8; 16],
    /// Client machine name
    pub hostname: String,
    /// Functions being pushed
    pub func_mds: Vec<FuncMd>,
    /// Address of each pushed function, uninterpreted
    pub func_eas: Vec<u64>,
}

/// PUSH_MD_RESULT payload: one status flag per pushed function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMdResult {
    /// 1 where the push created a new signature entry, 0 where it appended
    pub results_flags: Vec<u32>,
}

/// A parsed RPC message, one variant per handled opcode.
///
/// Reserved opcodes (`0x12..=0x1F`) have no variant: they decode through the
/// packet envelope and surface as [`ProtocolError::UnknownCode`], which the
/// session layer answers with a notify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcMessage {
    /// RPC_OK, empty payload
    Ok,
    /// RPC_FAIL
    Fail(Fail),
    /// RPC_NOTIFY
    Notify(Notify),
    /// RPC_HELO
    Helo(Helo),
    /// PULL_MD
    PullMd(PullMd),
    /// PULL_MD_RESULT
    PullMdResult(PullMdResult),
    /// PUSH_MD
    PushMd(PushMd),
    /// PUSH_MD_RESULT
    PushMdResult(PushMdResult),
}

impl RpcMessage {
    /// The opcode this message travels under.
    pub fn code(&self) -> RpcCode {
        match self {
            Self::Ok => RpcCode::Ok,
            Self::Fail(_) => RpcCode::Fail,
            Self::Notify(_) => RpcCode::Notify,
            Self::Helo(_) => RpcCode::Helo,
            Self::PullMd(_) => RpcCode::PullMd,
            Self::PullMdResult(_) => RpcCode::PullMdResult,
            Self::PushMd(_) => RpcCode::PushMd,
            Self::PushMdResult(_) => RpcCode::PushMdResult,
        }
    }

    /// Build a notify carrying the server's own protocol version.
    pub fn notify(message: impl Into<String>) -> Self {
        Self::Notify(Notify { protocol: PROTOCOL_VERSION, message: message.into() })
    }

    /// Encode the payload fields only; the envelope writes the opcode.
    pub fn encode_payload(&self, dst: &mut impl BufMut) -> Result<()> {
        match self {
            Self::Ok => Ok(()),
            Self::Fail(m) => {
                varint::encode_dd(dst, m.status);
                encode_cstring(dst, &m.message);
                Ok(())
            },
            Self::Notify(m) => {
                varint::encode_dd(dst, m.protocol);
                encode_cstring(dst, &m.message);
                Ok(())
            },
            Self::Helo(m) => {
                varint::encode_dd(dst, m.protocol);
                encode_var_buff(dst, &m.license_blob)?;
                dst.put_u32_le(m.hexrays_id);
                dst.put_u16_le(m.watermark);
                varint::encode_dd(dst, m.field_0x36);
                Ok(())
            },
            Self::PullMd(m) => {
                varint::encode_dd(dst, m.flags);
                encode_list(dst, &m.ukn_list, |dst, &v| {
                    varint::encode_dd(dst, v);
                    Ok(())
                })?;
                encode_list(dst, &m.func_sigs, |dst, sig| sig.encode(dst))
            },
            Self::PullMdResult(m) => {
                encode_list(dst, &m.found, |dst, &v| {
                    varint::encode_dd(dst, v);
                    Ok(())
                })?;
                encode_list(dst, &m.results, |dst, info| info.encode(dst))
            },
            Self::PushMd(m) => {
                varint::encode_dd(dst, m.field_0x10);
                encode_cstring(dst, &m.idb_path);
                encode_cstring(dst, &m.input_path);
                dst.put_slice(&m.input_md5);
                encode_cstring(dst, &m.hostname);
                encode_list(dst, &m.func_mds, |dst, md| md.encode(dst))?;
                encode_list(dst, &m.func_eas, |dst, &ea| {
                    varint::encode_dq(dst, ea);
                    Ok(())
                })
            },
            Self::PushMdResult(m) => encode_list(dst, &m.results_flags, |dst, &v| {
                varint::encode_dd(dst, v);
                Ok(())
            }),
        }
    }

    /// Decode a payload according to `code`.
    ///
    /// The caller is responsible for checking that `src` was fully consumed;
    /// [`crate::packet`] enforces this when parsing whole packets.
    pub fn decode_payload(code: RpcCode, src: &mut Bytes) -> Result<Self> {
        match code {
            RpcCode::Ok => Ok(Self::Ok),
            RpcCode::Fail => {
                let status = varint::decode_dd(src)?;
                let message = decode_cstring(src, "fail message")?;
                Ok(Self::Fail(Fail { status, message }))
            },
            RpcCode::Notify => {
                let protocol = varint::decode_dd(src)?;
                let message = decode_cstring(src, "notify message")?;
                Ok(Self::Notify(Notify { protocol, message }))
            },
            RpcCode::Helo => {
                let protocol = varint::decode_dd(src)?;
                let license_blob = decode_var_buff(src)?;
                if src.remaining() < 6 {
                    return Err(ProtocolError::ShortRead {
                        what: "helo license id",
                        expected: 6,
                        actual: src.remaining(),
                    });
                }
                let hexrays_id = src.get_u32_le();
                let watermark = src.get_u16_le();
                let field_0x36 = varint::decode_dd(src)?;
                Ok(Self::Helo(Helo { protocol, license_blob, hexrays_id, watermark, field_0x36 }))
            },
            RpcCode::PullMd => {
                let flags = varint::decode_dd(src)?;
                let ukn_list = decode_list(src, |src| varint::decode_dd(src))?;
                let func_sigs = decode_list(src, Signature::decode)?;
                Ok(Self::PullMd(PullMd { flags, ukn_list, func_sigs }))
            },
            RpcCode::PullMdResult => {
                let found = decode_list(src, |src| varint::decode_dd(src))?;
                let results = decode_list(src, FuncInfo::decode)?;
                Ok(Self::PullMdResult(PullMdResult { found, results }))
            },
            RpcCode::PushMd => {
                let field_0x10 = varint::decode_dd(src)?;
                let idb_path = decode_cstring(src, "idb path")?;
                let input_path = decode_cstring(src, "input path")?;
                let input_md5 = decode_md5(src)?;
                let hostname = decode_cstring(src, "hostname")?;
                let func_mds = decode_list(src, FuncMd::decode)?;
                let func_eas = decode_list(src, |src| varint::decode_dq(src))?;
                Ok(Self::PushMd(PushMd {
                    field_0x10,
                    idb_path,
                    input_path,
                    input_md5,
                    hostname,
                    func_mds,
                    func_eas,
                }))
            },
            RpcCode::PushMdResult => {
                let results_flags = decode_list(src, |src| varint::decode_dd(src))?;
                Ok(Self::PushMdResult(PushMdResult { results_flags }))
            },
            reserved => Err(ProtocolError::UnknownCode(reserved.to_u8())),
        }
    }
}
