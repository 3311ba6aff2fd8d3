//! OSC message value types.
//!
//! An [`OscMessage`] is an address plus an ordered list of typed
//! [`OscArg`]s. The byte-level encoding lives in `xairlib-osc`; these types
//! are plain values shared by every crate in the workspace.

use std::fmt;

/// A single OSC argument.
///
/// The mixer protocol only uses the four OSC 1.0 core types.
#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    /// 32-bit signed integer (type tag `i`).
    Int(i32),
    /// 32-bit IEEE 754 float (type tag `f`).
    Float(f32),
    /// NUL-terminated string (type tag `s`).
    String(String),
    /// Opaque length-prefixed byte blob (type tag `b`).
    Blob(Vec<u8>),
}

impl OscArg {
    /// The OSC type tag character for this argument.
    pub fn type_tag(&self) -> char {
        match self {
            OscArg::Int(_) => 'i',
            OscArg::Float(_) => 'f',
            OscArg::String(_) => 's',
            OscArg::Blob(_) => 'b',
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            OscArg::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            OscArg::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OscArg::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            OscArg::Blob(b) => Some(b),
            _ => None,
        }
    }
}

impl From<i32> for OscArg {
    fn from(v: i32) -> Self {
        OscArg::Int(v)
    }
}

impl From<f32> for OscArg {
    fn from(v: f32) -> Self {
        OscArg::Float(v)
    }
}

impl From<&str> for OscArg {
    fn from(v: &str) -> Self {
        OscArg::String(v.to_string())
    }
}

impl From<String> for OscArg {
    fn from(v: String) -> Self {
        OscArg::String(v)
    }
}

impl From<Vec<u8>> for OscArg {
    fn from(v: Vec<u8>) -> Self {
        OscArg::Blob(v)
    }
}

impl fmt::Display for OscArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OscArg::Int(v) => write!(f, "{v}"),
            OscArg::Float(v) => write!(f, "{v}"),
            OscArg::String(s) => write!(f, "{s:?}"),
            OscArg::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// An OSC message: an address pattern and its arguments.
///
/// A message with no arguments is a read request; the same address with
/// arguments is a write (or, coming from the mixer, a value report).
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    /// Address, always starting with `/` (e.g. `"/lr/mix/on"`).
    pub address: String,
    /// Ordered argument list.
    pub args: Vec<OscArg>,
}

impl OscMessage {
    /// Create a message from an address and arguments.
    pub fn new(address: impl Into<String>, args: Vec<OscArg>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }

    /// Create a no-argument message (a read request or heartbeat).
    pub fn query(address: impl Into<String>) -> Self {
        Self::new(address, Vec::new())
    }

    /// Whether this message carries no arguments.
    pub fn is_query(&self) -> bool {
        self.args.is_empty()
    }
}

impl fmt::Display for OscMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}
