//! Base64 text form of an envelope
//!
//! Browser clients upload envelopes as standard base64 text. Both magic
//! markers start with `Salted`, which encodes to exactly `U2FsdGVk`, so the
//! armored form is recognisable from its first eight characters.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::EnvelopeError;

/// Base64 of `Salted`, shared by every armored envelope
pub const ARMOR_PREFIX: &[u8] = b"U2FsdGVk";

/// Encode a binary envelope as base64 text.
pub fn armor(envelope: &[u8]) -> Vec<u8> {
    STANDARD.encode(envelope).into_bytes()
}

/// True if `input` looks like an armored envelope (leading whitespace ignored).
pub fn is_armored(input: &[u8]) -> bool {
    input.trim_ascii_start().starts_with(ARMOR_PREFIX)
}

/// Decode armored text back to the binary envelope.
///
/// Line breaks and other ASCII whitespace are ignored, so `openssl enc -a`
/// output (wrapped at 64 columns) decodes as well.
pub fn unarmor(input: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let compact: Vec<u8> = input
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    STANDARD
        .decode(compact)
        .map_err(|_| EnvelopeError::Malformed("armored envelope is not valid base64"))
}
