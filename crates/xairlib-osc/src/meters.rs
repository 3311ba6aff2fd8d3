//! X-Air meter stream requests and binary frame decoding.
//!
//! Meter telemetry is opt-in: the client sends `/meters ["/meters/<id>"]`
//! (optionally with a channel argument) and the mixer streams
//! `/meters/<id>` messages for roughly ten seconds. Each message carries a
//! single blob laid out as:
//!
//! ```text
//! <count: i32 LE> <sample: i16 LE> * count
//! ```
//!
//! The samples are signed 1/256 dB values.

use xairlib_core::{Error, OscArg, OscMessage, Result};

/// Address meter refresh requests are sent to.
pub const METERS_ADDRESS: &str = "/meters";

/// Prefix of every meter telemetry address.
pub const METER_STREAM_PREFIX: &str = "/meters/";

/// Whether `address` is a meter telemetry stream (`/meters/<id>`).
pub fn is_meter_address(address: &str) -> bool {
    address.starts_with(METER_STREAM_PREFIX)
}

/// Stream name for meter `id` (e.g. `"/meters/2"`).
pub fn stream_name(id: u32) -> String {
    format!("{METER_STREAM_PREFIX}{id}")
}

/// Arguments of the `/meters` request that keeps meter `id` streaming.
pub fn request_args(id: u32, channel: Option<i32>) -> Vec<OscArg> {
    let mut args = vec![OscArg::String(stream_name(id))];
    if let Some(channel) = channel {
        args.push(OscArg::Int(channel));
    }
    args
}

/// Decode a meter blob into its samples.
///
/// # Errors
///
/// Returns [`Error::Decode`] if the count prefix is missing, negative or too
/// large, or the blob holds fewer samples than the count announces.
pub fn decode_frame(blob: &[u8]) -> Result<Vec<i16>> {
    if blob.len() < 4 {
        return Err(Error::Decode(format!(
            "meter blob of {} bytes has no sample count",
            blob.len()
        )));
    }

    let count = i32::from_le_bytes([blob[0], blob[1], blob[2], blob[3]]);
    let count = usize::try_from(count)
        .map_err(|_| Error::Decode(format!("negative meter sample count {count}")))?;

    let needed = count
        .checked_mul(2)
        .ok_or_else(|| Error::Decode(format!("meter sample count {count} is too large")))?;

    let payload = &blob[4..];
    if payload.len() < needed {
        return Err(Error::Decode(format!(
            "meter blob announces {} samples but carries {} bytes",
            count,
            payload.len()
        )));
    }

    Ok(payload[..needed]
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Replace a meter message's blob argument with its decoded samples.
///
/// The resulting message has one [`OscArg::Int`] per sample.
pub fn expand_message(message: OscMessage) -> Result<OscMessage> {
    let blob = match message.args.as_slice() {
        [OscArg::Blob(blob)] => blob,
        _ => {
            return Err(Error::Decode(format!(
                "meter message {} must carry exactly one blob",
                message.address
            )));
        }
    };

    let samples = decode_frame(blob)?;
    Ok(OscMessage {
        address: message.address,
        args: samples.into_iter().map(|s| OscArg::Int(i32::from(s))).collect(),
    })
}
