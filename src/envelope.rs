//! # Wire Envelope Codec
//!
//! Pure, stateless (de)framing of the two envelope shapes that ever cross a
//! transport connection: a **call** envelope (client to server) and a
//! **reply** envelope (server to client). A third shape, the interface
//! handshake, reuses the call envelope layout with a reserved `method_id`.
//!
//! Layouts (all integers big-endian):
//!
//! ```text
//! call:  magic(4) | version(1) | flags(1) | method_id(u32) | arg_blob_len(u32) | arg_blob
//! reply: magic(4) | version(1) | status(u8)                | payload_len(u32)  | payload
//! ```
//!
//! Neither direction allocates beyond the inbound buffer: decoding borrows
//! slices of the buffer handed in by the caller and copies only the blob.

use crate::error::{RpcError, Status};

pub const MAGIC: [u8; 4] = [0x43, 0x32, 0x52, 0x50];
pub const VERSION: u8 = 0x01;

/// Reserved `method_id` marking the first frame of a connection as an
/// interface handshake rather than a real method call.
pub const HANDSHAKE_METHOD_ID: u32 = 0xFFFF_FFFF;

/// Default cap on `arg_blob_len` / `payload_len`, matching `CCRPC_MAX_PAYLOAD`'s
/// default. Callers needing a different cap pass it explicitly to the
/// `*_checked` decoders.
pub const DEFAULT_MAX_PAYLOAD: u32 = 64 * 1024 * 1024;

const CALL_HEADER_LEN: usize = 4 + 1 + 1 + 4 + 4;
const REPLY_HEADER_LEN: usize = 4 + 1 + 1 + 4;

/// Bits of the call envelope's `flags` byte.
///
/// Bit 0 marks that the arg blob begins with a one-byte presence bitmap (up
/// to 8 positional arguments) ahead of the count-prefixed argument list,
/// letting a caller omit nullable trailing arguments without encoding a
/// placeholder value. Bit 7 is reserved for a future cancellation mark and
/// must currently always be clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallFlags(u8);

impl CallFlags {
    pub const HAS_PRESENCE_BITMAP: CallFlags = CallFlags(0b0000_0001);
    pub const RESERVED_CANCEL: CallFlags = CallFlags(0b1000_0000);

    pub const fn empty() -> Self {
        CallFlags(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Decode a wire byte, silently dropping any bits this version of the
    /// crate does not assign meaning to.
    pub fn from_bits_truncate(byte: u8) -> Self {
        CallFlags(byte & (Self::HAS_PRESENCE_BITMAP.0 | Self::RESERVED_CANCEL.0))
    }

    pub fn contains(self, other: CallFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for CallFlags {
    type Output = CallFlags;
    fn bitor(self, rhs: CallFlags) -> CallFlags {
        CallFlags(self.0 | rhs.0)
    }
}

/// A decoded call envelope, borrowing its argument blob from the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEnvelope {
    pub flags: CallFlags,
    pub method_id: u32,
    pub arg_blob: Vec<u8>,
}

/// A decoded reply envelope, borrowing its payload from the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyEnvelope {
    pub status: Status,
    pub payload: Vec<u8>,
}

/// Encode a call envelope ready to hand to a transport's `send`.
pub fn encode_call(method_id: u32, flags: CallFlags, arg_blob: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(CALL_HEADER_LEN + arg_blob.len());
    out.extend_from_slice(&MAGIC);
    out.push(VERSION);
    out.push(flags.bits());
    out.extend_from_slice(&method_id.to_be_bytes());
    out.extend_from_slice(&(arg_blob.len() as u32).to_be_bytes());
    out.extend_from_slice(arg_blob);
    out
}

/// Build the first frame of a connection: the interface handshake.
///
/// Arg blob layout: `utf8(namespace) | utf8(name) | u32(major) | u32(minor)`,
/// each string itself length-prefixed by a `u32` so the blob is
/// self-delimiting.
pub fn encode_handshake(namespace: &str, name: &str, major: u32, minor: u32) -> Vec<u8> {
    let mut blob = Vec::new();
    encode_str(&mut blob, namespace);
    encode_str(&mut blob, name);
    blob.extend_from_slice(&major.to_be_bytes());
    blob.extend_from_slice(&minor.to_be_bytes());
    encode_call(HANDSHAKE_METHOD_ID, CallFlags::empty(), &blob)
}

/// Decoded contents of a handshake's arg blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeIdentity {
    pub namespace: String,
    pub name: String,
    pub major: u32,
    pub minor: u32,
}

pub fn decode_handshake(arg_blob: &[u8]) -> Result<HandshakeIdentity, RpcError> {
    let mut cursor = 0usize;
    let namespace = decode_str(arg_blob, &mut cursor)?;
    let name = decode_str(arg_blob, &mut cursor)?;
    let major = take_u32(arg_blob, &mut cursor)?;
    let minor = take_u32(arg_blob, &mut cursor)?;
    Ok(HandshakeIdentity {
        namespace,
        name,
        major,
        minor,
    })
}

/// Decode a call envelope, rejecting bad magic/version and over-cap blobs.
pub fn decode_call(bytes: &[u8], max_payload: u32) -> Result<CallEnvelope, RpcError> {
    if bytes.len() < CALL_HEADER_LEN {
        return Err(RpcError::invalid("truncated call envelope"));
    }
    if bytes[0..4] != MAGIC {
        return Err(RpcError::invalid("bad magic in call envelope"));
    }
    if bytes[4] != VERSION {
        return Err(RpcError::invalid(format!(
            "unsupported envelope version {}",
            bytes[4]
        )));
    }
    let flags = CallFlags::from_bits_truncate(bytes[5]);
    let method_id = u32::from_be_bytes(bytes[6..10].try_into().unwrap());
    let arg_blob_len = u32::from_be_bytes(bytes[10..14].try_into().unwrap());
    if arg_blob_len > max_payload {
        return Err(RpcError::invalid("payload too large"));
    }
    let end = CALL_HEADER_LEN
        .checked_add(arg_blob_len as usize)
        .ok_or_else(|| RpcError::invalid("arg blob length overflow"))?;
    if bytes.len() < end {
        return Err(RpcError::invalid("truncated call envelope body"));
    }
    Ok(CallEnvelope {
        flags,
        method_id,
        arg_blob: bytes[CALL_HEADER_LEN..end].to_vec(),
    })
}

/// Encode a success or error reply envelope.
pub fn encode_reply(status: Status, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(REPLY_HEADER_LEN + payload.len());
    out.extend_from_slice(&MAGIC);
    out.push(VERSION);
    out.push(status.to_wire());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Encode an error reply whose payload is the UTF-8 message.
pub fn encode_error_reply(status: Status, message: &str) -> Vec<u8> {
    encode_reply(status, message.as_bytes())
}

pub fn decode_reply(bytes: &[u8], max_payload: u32) -> Result<ReplyEnvelope, RpcError> {
    if bytes.len() < REPLY_HEADER_LEN {
        return Err(RpcError::invalid("truncated reply envelope"));
    }
    if bytes[0..4] != MAGIC {
        return Err(RpcError::invalid("bad magic in reply envelope"));
    }
    if bytes[4] != VERSION {
        return Err(RpcError::invalid(format!(
            "unsupported envelope version {}",
            bytes[4]
        )));
    }
    let status = Status::from_wire(bytes[5]);
    let payload_len = u32::from_be_bytes(bytes[6..10].try_into().unwrap());
    if payload_len > max_payload {
        return Err(RpcError::invalid("payload too large"));
    }
    let end = REPLY_HEADER_LEN
        .checked_add(payload_len as usize)
        .ok_or_else(|| RpcError::invalid("payload length overflow"))?;
    if bytes.len() < end {
        return Err(RpcError::invalid("truncated reply envelope body"));
    }
    Ok(ReplyEnvelope {
        status,
        payload: bytes[REPLY_HEADER_LEN..end].to_vec(),
    })
}

fn encode_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn decode_str(bytes: &[u8], cursor: &mut usize) -> Result<String, RpcError> {
    let len = take_u32(bytes, cursor)? as usize;
    let end = cursor
        .checked_add(len)
        .ok_or_else(|| RpcError::invalid("string length overflow in handshake blob"))?;
    if bytes.len() < end {
        return Err(RpcError::invalid("truncated string in handshake blob"));
    }
    let s = std::str::from_utf8(&bytes[*cursor..end])
        .map_err(|_| RpcError::invalid("non-UTF-8 string in handshake blob"))?
        .to_string();
    *cursor = end;
    Ok(s)
}

fn take_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32, RpcError> {
    let end = cursor
        .checked_add(4)
        .ok_or_else(|| RpcError::invalid("cursor overflow decoding u32"))?;
    if bytes.len() < end {
        return Err(RpcError::invalid("truncated u32 in handshake blob"));
    }
    let v = u32::from_be_bytes(bytes[*cursor..end].try_into().unwrap());
    *cursor = end;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_round_trip() {
        let blob = b"hello".to_vec();
        let encoded = encode_call(3, CallFlags::empty(), &blob);
        let decoded = decode_call(&encoded, DEFAULT_MAX_PAYLOAD).unwrap();
        assert_eq!(decoded.method_id, 3);
        assert_eq!(decoded.arg_blob, blob);
        assert_eq!(decoded.flags, CallFlags::empty());
    }

    #[test]
    fn reply_round_trip() {
        let encoded = encode_reply(Status::Success, b"world");
        let decoded = decode_reply(&encoded, DEFAULT_MAX_PAYLOAD).unwrap();
        assert_eq!(decoded.status, Status::Success);
        assert_eq!(decoded.payload, b"world");
    }

    #[test]
    fn handshake_round_trip() {
        let encoded = encode_handshake("cc.test", "Echo", 0, 1);
        let call = decode_call(&encoded, DEFAULT_MAX_PAYLOAD).unwrap();
        assert_eq!(call.method_id, HANDSHAKE_METHOD_ID);
        let identity = decode_handshake(&call.arg_blob).unwrap();
        assert_eq!(identity.namespace, "cc.test");
        assert_eq!(identity.name, "Echo");
        assert_eq!(identity.major, 0);
        assert_eq!(identity.minor, 1);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut encoded = encode_call(1, CallFlags::empty(), b"x");
        encoded[0] = 0x00;
        let err = decode_call(&encoded, DEFAULT_MAX_PAYLOAD).unwrap_err();
        assert_eq!(err.status, Status::ErrorInvalid);
    }

    #[test]
    fn bad_version_is_rejected() {
        let mut encoded = encode_reply(Status::Success, b"x");
        encoded[4] = 0x02;
        let err = decode_reply(&encoded, DEFAULT_MAX_PAYLOAD).unwrap_err();
        assert_eq!(err.status, Status::ErrorInvalid);
    }

    #[test]
    fn payload_cap_is_enforced() {
        let encoded = encode_call(1, CallFlags::empty(), &vec![0u8; 4096]);
        let err = decode_call(&encoded, 1024).unwrap_err();
        assert_eq!(err.status, Status::ErrorInvalid);
        assert!(err.message.contains("payload too large"));
    }

    #[test]
    fn encoding_is_deterministic() {
        let a = encode_call(7, CallFlags::HAS_PRESENCE_BITMAP, b"abc");
        let b = encode_call(7, CallFlags::HAS_PRESENCE_BITMAP, b"abc");
        assert_eq!(a, b);
    }

    #[test]
    fn truncated_envelope_is_rejected() {
        let err = decode_call(&[0x43, 0x32], DEFAULT_MAX_PAYLOAD).unwrap_err();
        assert_eq!(err.status, Status::ErrorInvalid);
    }
}
