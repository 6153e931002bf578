use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing an identifier string.
#[derive(Debug, thiserror::Error)]
pub enum IdError {
    #[error("identifier must be {expected} hex characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("identifier is not valid hexadecimal")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("identifier payload must be exactly 32 bytes")]
    InvalidPayloadLength,
}

/// Number of raw bytes in an account or peer identifier.
pub const ID_BYTES: usize = 32;
/// Expected string length of an encoded identifier (64 hex chars, no prefix).
pub const ID_STRING_LENGTH: usize = ID_BYTES * 2;

/// Opaque pool identifier.
pub type PoolId = u32;

/// Participant (peer) identifier, scoped to a pool.
pub type PeerId = [u8; ID_BYTES];

/// Account identifier; owns peers and receives payouts.
pub type AccountId = [u8; ID_BYTES];

/// Token amount in base units.
pub type Tokens = u128;

/// Encode a 32-byte identifier as lowercase hex.
pub fn encode_id(bytes: &[u8; ID_BYTES]) -> String {
    hex::encode(bytes)
}

/// Decode a 64 character hex string (an optional `0x` prefix is accepted).
pub fn decode_id(value: &str) -> Result<[u8; ID_BYTES], IdError> {
    let payload = value.strip_prefix("0x").unwrap_or(value);

    if payload.len() != ID_STRING_LENGTH {
        return Err(IdError::InvalidLength {
            expected: ID_STRING_LENGTH,
            actual: payload.len(),
        });
    }

    let decoded = hex::decode(payload)?;
    decoded.try_into().map_err(|_| IdError::InvalidPayloadLength)
}

/// Deterministic identifier derived from a human readable label.
///
/// Lets configuration files name accounts and peers (`"alice"`,
/// `"peer-1"`) instead of spelling out raw hex.
pub fn id_from_label(label: &str) -> [u8; ID_BYTES] {
    *blake3::hash(label.as_bytes()).as_bytes()
}

/// Parse either a hex identifier or, failing that, derive one from a label.
pub fn parse_id_or_label(value: &str) -> [u8; ID_BYTES] {
    decode_id(value).unwrap_or_else(|_| id_from_label(value))
}

/// Convenience wrapper for serialising/deserialising identifiers as hex in JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HexId(pub [u8; ID_BYTES]);

impl From<[u8; ID_BYTES]> for HexId {
    fn from(value: [u8; ID_BYTES]) -> Self {
        HexId(value)
    }
}

impl From<HexId> for String {
    fn from(value: HexId) -> Self {
        encode_id(&value.0)
    }
}

impl TryFrom<String> for HexId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        decode_id(&value).map(HexId)
    }
}
