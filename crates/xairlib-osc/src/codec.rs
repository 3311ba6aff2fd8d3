//! OSC 1.0 message encoder/decoder.
//!
//! X-Air mixers speak a subset of OSC 1.0 over UDP: one message per
//! datagram, no bundles, and only the four core argument types.
//!
//! # Message format
//!
//! ```text
//! <address>\0[pad]  ,<tags>\0[pad]  <arg>...
//! ```
//!
//! - Strings are NUL-terminated and padded with NULs to a 4-byte boundary
//! - `i`: 32-bit big-endian signed integer
//! - `f`: 32-bit big-endian IEEE 754 float
//! - `s`: padded string
//! - `b`: 32-bit big-endian length, then the bytes, padded to 4 bytes
//!
//! All encoding/decoding in this module is pure -- no I/O is performed.

use bytes::{BufMut, BytesMut};
use xairlib_core::{Error, OscArg, OscMessage, Result};

/// Round `len` up to the next multiple of four.
fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

fn put_padded_str(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    let total = padded_len(s.len() + 1);
    buf.put_bytes(0, total - s.len());
}

fn check_string(what: &str, s: &str) -> Result<()> {
    if s.as_bytes().contains(&0) {
        return Err(Error::Encode(format!("{what} contains a NUL byte: {s:?}")));
    }
    Ok(())
}

/// Encode a message into a single OSC datagram.
///
/// # Errors
///
/// Returns [`Error::Encode`] if the address does not start with `/`, a
/// string contains an interior NUL (it could not be terminated), or a blob
/// is too long for its 32-bit length prefix.
///
/// # Example
///
/// ```
/// use xairlib_core::OscMessage;
/// use xairlib_osc::codec::encode;
///
/// let bytes = encode(&OscMessage::query("/xinfo")).unwrap();
/// assert_eq!(bytes, b"/xinfo\0\0,\0\0\0");
/// ```
pub fn encode(message: &OscMessage) -> Result<Vec<u8>> {
    if !message.address.starts_with('/') {
        return Err(Error::Encode(format!(
            "address must start with '/': {:?}",
            message.address
        )));
    }
    check_string("address", &message.address)?;

    let mut tags = String::with_capacity(message.args.len() + 1);
    tags.push(',');
    for arg in &message.args {
        tags.push(arg.type_tag());
    }

    let mut buf = BytesMut::with_capacity(
        padded_len(message.address.len() + 1) + padded_len(tags.len() + 1) + 4 * message.args.len(),
    );
    put_padded_str(&mut buf, &message.address);
    put_padded_str(&mut buf, &tags);

    for arg in &message.args {
        match arg {
            OscArg::Int(v) => buf.put_i32(*v),
            OscArg::Float(v) => buf.put_f32(*v),
            OscArg::String(s) => {
                check_string("string argument", s)?;
                put_padded_str(&mut buf, s);
            }
            OscArg::Blob(data) => {
                let len = i32::try_from(data.len()).map_err(|_| {
                    Error::Encode(format!("blob of {} bytes is too long", data.len()))
                })?;
                buf.put_i32(len);
                buf.put_slice(data);
                buf.put_bytes(0, padded_len(data.len()) - data.len());
            }
        }
    }

    Ok(buf.to_vec())
}

/// Cursor over an inbound datagram.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::Decode(format!(
                "truncated {what}: need {n} bytes at offset {}, have {}",
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u32_be(&mut self, what: &str) -> Result<[u8; 4]> {
        let bytes = self.take(4, what)?;
        Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    fn read_string(&mut self, what: &str) -> Result<String> {
        let rest = &self.data[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::Decode(format!("unterminated {what} at offset {}", self.pos)))?;
        let s = std::str::from_utf8(&rest[..nul])
            .map_err(|_| Error::Decode(format!("{what} is not valid UTF-8")))?
            .to_string();
        self.take(padded_len(nul + 1), what)?;
        Ok(s)
    }

    fn read_blob(&mut self) -> Result<Vec<u8>> {
        let len = i32::from_be_bytes(self.read_u32_be("blob length")?);
        let len = usize::try_from(len)
            .map_err(|_| Error::Decode(format!("negative blob length {len}")))?;
        let data = self.take(len, "blob")?.to_vec();
        // Trailing pad may be missing on the final argument of some senders.
        let pad = (padded_len(len) - len).min(self.remaining());
        self.pos += pad;
        Ok(data)
    }
}

/// Decode a single OSC datagram into a message.
///
/// A datagram that ends right after the address (no type tag string) is
/// accepted as a message with no arguments, as OSC 1.0 permits.
///
/// # Errors
///
/// Returns [`Error::Decode`] on truncated input, unterminated strings,
/// negative or oversized blob lengths, a type tag string not starting with
/// `,`, or an unsupported type tag.
pub fn decode(data: &[u8]) -> Result<OscMessage> {
    let mut reader = Reader::new(data);

    let address = reader.read_string("address")?;
    if !address.starts_with('/') {
        return Err(Error::Decode(format!(
            "address must start with '/': {address:?}"
        )));
    }

    if reader.remaining() == 0 {
        return Ok(OscMessage::query(address));
    }

    let tags = reader.read_string("type tag string")?;
    let tags = tags
        .strip_prefix(',')
        .ok_or_else(|| Error::Decode(format!("type tag string must start with ',': {tags:?}")))?;

    let mut args = Vec::with_capacity(tags.len());
    for tag in tags.chars() {
        let arg = match tag {
            'i' => OscArg::Int(i32::from_be_bytes(reader.read_u32_be("int argument")?)),
            'f' => OscArg::Float(f32::from_be_bytes(reader.read_u32_be("float argument")?)),
            's' => OscArg::String(reader.read_string("string argument")?),
            'b' => OscArg::Blob(reader.read_blob()?),
            other => {
                return Err(Error::Decode(format!("unsupported type tag '{other}'")));
            }
        };
        args.push(arg);
    }

    Ok(OscMessage { address, args })
}
