//! Values and faults carried across the wire.
//!
//! EVAL results travel as a [`Value`], faults raised by remote execution as a
//! [`Fault`]. Neither requires the receiver to understand the host's native
//! types; a [`Fault`] keeps the kind name and message so the client can report
//! it meaningfully.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec::Armour;
use crate::error::{Error, Result};
use crate::protocol::Status;

/// A result value returned by EVAL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    /// No value.
    #[default]
    Nil,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 text.
    Str(String),
    /// Raw bytes.
    Bytes(#[serde(with = "serde_bytes")] Vec<u8>),
    /// Ordered sequence.
    List(Vec<Value>),
    /// String-keyed mapping.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Integer content, if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float content, widening integers.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Boolean content, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Text content, if this is a `Str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Whether this is `Nil`.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "{:?}", v),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, item)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}: {}", key, item)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

/// A fault raised by remote execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    /// Kind name of the fault, e.g. `ValueError`.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// Optional extra context, such as a traceback.
    #[serde(default)]
    pub detail: Option<String>,
}

impl Fault {
    /// Create a fault without detail.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            detail: None,
        }
    }

    /// Attach detail text.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Fault {}

/// Result of one request as seen by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Processed; carries the result (`Nil` for EXEC).
    Ok(Value),
    /// Remote execution raised a fault.
    AppFault(Fault),
    /// Server could not process the message.
    ServerFailure {
        /// Diagnostic text.
        message: String,
    },
}

impl Outcome {
    /// Decode a response payload according to its status.
    ///
    /// An empty OK payload decodes as `Nil`.
    pub fn from_payload(status: Status, payload: &[u8]) -> Result<Self> {
        match status {
            Status::Ok if payload.is_empty() => Ok(Outcome::Ok(Value::Nil)),
            Status::Ok => Ok(Outcome::Ok(Armour::decode_value(payload)?)),
            Status::Err => Ok(Outcome::AppFault(Armour::decode_value(payload)?)),
            Status::Fail => Ok(Outcome::ServerFailure {
                message: Armour::decode_text(payload)?,
            }),
        }
    }

    /// Encode as a response status and payload.
    ///
    /// `Ok(Nil)` encodes as an empty payload.
    pub fn into_payload(self) -> Result<(Status, Bytes)> {
        match self {
            Outcome::Ok(Value::Nil) => Ok((Status::Ok, Bytes::new())),
            Outcome::Ok(value) => Ok((Status::Ok, Armour::encode_value(&value)?)),
            Outcome::AppFault(fault) => Ok((Status::Err, Armour::encode_value(&fault)?)),
            Outcome::ServerFailure { message } => Ok((Status::Fail, Armour::encode_text(&message))),
        }
    }

    /// Convert into a value, mapping failures to errors.
    pub fn into_result(self) -> Result<Value> {
        match self {
            Outcome::Ok(value) => Ok(value),
            Outcome::AppFault(fault) => Err(Error::Application(fault)),
            Outcome::ServerFailure { message } => Err(Error::ServerFailure(message)),
        }
    }
}

impl From<std::result::Result<Value, Fault>> for Outcome {
    fn from(result: std::result::Result<Value, Fault>) -> Self {
        match result {
            Ok(value) => Outcome::Ok(value),
            Err(fault) => Outcome::AppFault(fault),
        }
    }
}
