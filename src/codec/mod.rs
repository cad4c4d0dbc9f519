//! Codec module - payload serialization.
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (`to_vec_named`)
//! - [`Armour`] - base64 wrapper keeping payloads 7-bit clean
//!
//! Codecs are marker structs with static methods.
//!
//! # Example
//!
//! ```
//! use sysexwire::codec::Armour;
//! use sysexwire::value::Value;
//!
//! let payload = Armour::encode_value(&Value::Int(4)).unwrap();
//! assert!(payload.iter().all(|&b| b < 0x80));
//! let decoded: Value = Armour::decode_value(&payload).unwrap();
//! assert_eq!(decoded, Value::Int(4));
//! ```

mod armour;
mod msgpack;

pub use armour::Armour;
pub use msgpack::MsgPackCodec;
