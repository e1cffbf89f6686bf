//! Request body decoding.
//!
//! Payloads arrive as bare JSON, gzip or deflate compressed JSON, or as a
//! base64-wrapped zlib stream (the legacy envelope, also used by the
//! `sentry_data` query parameter on GET). Decompression is streamed
//! through a hard cap so a small compressed body cannot expand without
//! bound.

use crate::errors::DecodeError;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::read::{GzDecoder, ZlibDecoder};
use serde_json::{Map, Value};
use std::io::Read;

/// Decodes a request body into raw JSON bytes. `limit` bounds the
/// decompressed size.
pub fn decode_body(
    raw: &[u8],
    content_encoding: Option<&str>,
    limit: usize,
) -> Result<Vec<u8>, DecodeError> {
    match content_encoding {
        Some("gzip") => decompress(GzDecoder::new(raw), limit),
        Some("deflate") => decompress(ZlibDecoder::new(raw), limit),
        None | Some("") => decode_bare(raw, limit),
        Some(other) => Err(DecodeError::UnsupportedEncoding(other.to_string())),
    }
}

/// Parses decoded bytes as a top-level JSON object.
pub fn parse_json(bytes: &[u8]) -> Result<Map<String, Value>, DecodeError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|err| DecodeError::InvalidJson(err.to_string()))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(DecodeError::InvalidJson(
            "expected a json object".to_string(),
        )),
    }
}

/// Reads at most `limit` decompressed bytes; one byte more is proof the
/// stream would blow the cap, without ever buffering the excess.
fn decompress<R: Read>(reader: R, limit: usize) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::new();
    reader
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|err| DecodeError::CorruptStream(err.to_string()))?;
    if out.len() > limit {
        return Err(DecodeError::SizeExceeded);
    }
    Ok(out)
}

fn decode_bare(raw: &[u8], limit: usize) -> Result<Vec<u8>, DecodeError> {
    if raw.len() > limit {
        return Err(DecodeError::SizeExceeded);
    }
    let first = raw.iter().find(|byte| !byte.is_ascii_whitespace());
    if first == Some(&b'{') {
        return Ok(raw.to_vec());
    }
    // Legacy envelope: base64 over a zlib stream. Whitespace is stripped
    // because clients wrap the base64 text.
    let cleaned: Vec<u8> = raw
        .iter()
        .copied()
        .filter(|byte| !byte.is_ascii_whitespace())
        .collect();
    let decoded = BASE64
        .decode(&cleaned)
        .map_err(|err| DecodeError::CorruptStream(err.to_string()))?;
    decompress(ZlibDecoder::new(decoded.as_slice()), limit)
}
