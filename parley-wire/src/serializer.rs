//! Payload codec contract and the JSON implementation
//!
//! The framer reserves a fixed delimiter that must never appear inside a
//! serialized payload. JSON cannot promise that on its own, since `<` is a
//! legal character in a JSON string, so [`JsonSerializer`] writes `<` as the
//! `\u003c` escape, which keeps every encoded payload delimiter-free while
//! decoding back to the identical value.

use parley_core::{Envelope, ParleyError, ParleyResult};
use serde::Serialize;
use std::io;

/// Pluggable payload codec
///
/// `decode(encode(v))` must reconstruct a value equal to `v` for every
/// protocol-representable envelope. Decode failures must be reported as
/// [`ParleyError::Decode`]; they fail a single request, never the
/// connection.
pub trait Serializer: Send + Sync {
    /// Encode an envelope into delimiter-free bytes
    fn encode(&self, envelope: &Envelope) -> ParleyResult<Vec<u8>>;

    /// Decode one frame payload into an envelope
    fn decode(&self, bytes: &[u8]) -> ParleyResult<Envelope>;
}

/// JSON codec with delimiter-safe string escaping
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    /// Create a new JSON serializer
    pub fn new() -> Self {
        Self
    }
}

impl Serializer for JsonSerializer {
    fn encode(&self, envelope: &Envelope) -> ParleyResult<Vec<u8>> {
        let mut out = Vec::new();
        let mut ser =
            serde_json::Serializer::with_formatter(&mut out, DelimiterSafeFormatter::default());
        envelope
            .serialize(&mut ser)
            .map_err(|e| ParleyError::Client(format!("failed to encode envelope: {}", e)))?;
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> ParleyResult<Envelope> {
        serde_json::from_slice(bytes).map_err(|e| ParleyError::Decode(e.to_string()))
    }
}

/// JSON formatter that escapes `<` inside strings
///
/// Only string fragments need attention: every other JSON token is drawn
/// from `[]{}:,0-9eE+-."` plus the literals `true`/`false`/`null`.
#[derive(Debug, Default)]
struct DelimiterSafeFormatter;

impl serde_json::ser::Formatter for DelimiterSafeFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut start = 0;
        for (idx, byte) in fragment.bytes().enumerate() {
            if byte == b'<' {
                if start < idx {
                    writer.write_all(fragment[start..idx].as_bytes())?;
                }
                writer.write_all(b"\\u003c")?;
                start = idx + 1;
            }
        }
        writer.write_all(fragment[start..].as_bytes())
    }
}
