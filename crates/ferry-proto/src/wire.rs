// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Deterministic framing for pull responses.
//!
//! Packet layout:
//!
//! ``MAGIC(4) || VERSION(2) || FLAGS(2) || LENGTH(4) || PAYLOAD || CHECKSUM(32)``
//!
//! * PAYLOAD is a CBOR [`Envelope`] wrapping a [`PullResponse`]
//! * CHECKSUM = blake3-256 over HEADER (first 12 bytes) || PAYLOAD

use blake3::Hasher;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::PullResponse;

/// Protocol magic constant "FRY!".
pub const MAGIC: [u8; 4] = [0x46, 0x52, 0x59, 0x21];
/// Wire protocol version (big-endian u16).
pub const VERSION: u16 = 0x0001;
/// Reserved flags (set to zero for v1).
pub const FLAGS: u16 = 0x0000;
/// Header length in bytes.
pub const HEADER_BYTES: usize = 12;
/// Checksum length in bytes.
pub const CHECKSUM_BYTES: usize = 32;

const OP_PULL_RESPONSE: &str = "pull_response";

/// Errors produced while framing or unframing packets.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// Fewer bytes than the header or declared payload requires.
    #[error("incomplete packet: need {need} bytes, have {have}")]
    Incomplete {
        /// Bytes required.
        need: usize,
        /// Bytes available.
        have: usize,
    },
    /// Packet does not start with [`MAGIC`].
    #[error("bad magic")]
    BadMagic,
    /// Packet version is not [`VERSION`].
    #[error("unsupported version {0:#06x}")]
    UnsupportedVersion(u16),
    /// Checksum over header and payload does not match.
    #[error("checksum mismatch")]
    ChecksumMismatch,
    /// Payload does not fit the 32-bit length field.
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    /// Envelope op is not the one expected by the decoder.
    #[error("unexpected op {0}")]
    UnexpectedOp(String),
    /// CBOR encoding failed.
    #[error("encode error: {0}")]
    Encode(String),
    /// CBOR decoding failed.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Envelope carried as the CBOR payload of a packet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope<P> {
    /// Operation name.
    pub op: String,
    /// Per-connection sequence number assigned by the sender.
    pub seq: u64,
    /// Operation-specific body.
    pub payload: P,
}

/// Encode a value to CBOR bytes.
pub fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out).map_err(|e| WireError::Encode(e.to_string()))?;
    Ok(out)
}

/// Decode a value from CBOR bytes.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WireError> {
    ciborium::de::from_reader(bytes).map_err(|e| WireError::Decode(e.to_string()))
}

fn checksum(header: &[u8], payload: &[u8]) -> [u8; CHECKSUM_BYTES] {
    let mut hasher = Hasher::new();
    hasher.update(header);
    hasher.update(payload);
    *hasher.finalize().as_bytes()
}

/// Frame a CBOR payload into a full packet.
pub fn frame(payload: &[u8]) -> Result<Vec<u8>, WireError> {
    let len = u32::try_from(payload.len()).map_err(|_| WireError::PayloadTooLarge(payload.len()))?;
    let mut header = [0u8; HEADER_BYTES];
    header[0..4].copy_from_slice(&MAGIC);
    header[4..6].copy_from_slice(&VERSION.to_be_bytes());
    header[6..8].copy_from_slice(&FLAGS.to_be_bytes());
    header[8..12].copy_from_slice(&len.to_be_bytes());

    let sum = checksum(&header, payload);
    let mut out = Vec::with_capacity(HEADER_BYTES + payload.len() + CHECKSUM_BYTES);
    out.extend_from_slice(&header);
    out.extend_from_slice(payload);
    out.extend_from_slice(&sum);
    Ok(out)
}

/// Validate a packet and return its payload slice plus total bytes consumed.
pub fn unframe(bytes: &[u8]) -> Result<(&[u8], usize), WireError> {
    if bytes.len() < HEADER_BYTES + CHECKSUM_BYTES {
        return Err(WireError::Incomplete {
            need: HEADER_BYTES + CHECKSUM_BYTES,
            have: bytes.len(),
        });
    }
    if bytes[0..4] != MAGIC {
        return Err(WireError::BadMagic);
    }
    let version = u16::from_be_bytes([bytes[4], bytes[5]]);
    if version != VERSION {
        return Err(WireError::UnsupportedVersion(version));
    }
    let len = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    let total = HEADER_BYTES + len + CHECKSUM_BYTES;
    if bytes.len() < total {
        return Err(WireError::Incomplete {
            need: total,
            have: bytes.len(),
        });
    }
    let header = &bytes[..HEADER_BYTES];
    let payload = &bytes[HEADER_BYTES..HEADER_BYTES + len];
    if checksum(header, payload)[..] != bytes[HEADER_BYTES + len..total] {
        return Err(WireError::ChecksumMismatch);
    }
    Ok((payload, total))
}

/// Encode a response into a packet with the provided sequence number.
pub fn encode_response(resp: &PullResponse, seq: u64) -> Result<Vec<u8>, WireError> {
    let env = Envelope {
        op: OP_PULL_RESPONSE.to_string(),
        seq,
        payload: resp,
    };
    frame(&to_cbor(&env)?)
}

/// Decode bytes into (response, seq, bytes_consumed).
pub fn decode_response(bytes: &[u8]) -> Result<(PullResponse, u64, usize), WireError> {
    let (payload, used) = unframe(bytes)?;
    let env: Envelope<PullResponse> = from_cbor(payload)?;
    if env.op != OP_PULL_RESPONSE {
        return Err(WireError::UnexpectedOp(env.op));
    }
    Ok((env.payload, env.seq, used))
}
