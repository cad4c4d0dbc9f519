//! 7-bit payload armour.
//!
//! Sysex data bytes cannot carry the high bit, so text and MsgPack payloads
//! are wrapped in standard base64 before framing.

use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;

use super::MsgPackCodec;
use crate::error::Result;

/// Base64 wrapper for payloads.
pub struct Armour;

impl Armour {
    /// Armour raw bytes.
    #[inline]
    pub fn encode(data: &[u8]) -> Bytes {
        Bytes::from(STANDARD.encode(data))
    }

    /// Remove armour.
    ///
    /// # Errors
    ///
    /// Returns error if `payload` is not valid base64.
    #[inline]
    pub fn decode(payload: &[u8]) -> Result<Vec<u8>> {
        Ok(STANDARD.decode(payload)?)
    }

    /// Armour UTF-8 text.
    pub fn encode_text(text: &str) -> Bytes {
        Self::encode(text.as_bytes())
    }

    /// Remove armour and read UTF-8 text.
    pub fn decode_text(payload: &[u8]) -> Result<String> {
        Ok(String::from_utf8(Self::decode(payload)?)?)
    }

    /// Serialize with MsgPack, then armour.
    pub fn encode_value<T: serde::Serialize>(value: &T) -> Result<Bytes> {
        Ok(Self::encode(&MsgPackCodec::encode(value)?))
    }

    /// Remove armour, then deserialize MsgPack.
    pub fn decode_value<T: serde::de::DeserializeOwned>(payload: &[u8]) -> Result<T> {
        MsgPackCodec::decode(&Self::decode(payload)?)
    }
}
