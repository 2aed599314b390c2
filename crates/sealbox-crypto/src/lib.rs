//! sealbox-crypto: password envelopes for shared files
//!
//! Envelope format (binary):
//! ```text
//! [8 bytes: magic][8 bytes: random salt][N bytes: AES-256-CBC ciphertext, PKCS#7]
//! authenticated mode appends: [32 bytes: HMAC-SHA256 over magic||salt||ciphertext]
//! ```
//!
//! Key derivation follows the OpenSSL `EVP_BytesToKey` convention (MD5, one
//! iteration), so legacy envelopes interoperate with `openssl enc -md md5` and
//! browser clients that emit the `Salted__` format.
//!
//! The legacy format carries no integrity tag. A wrong password is detected
//! only through invalid padding or an empty result; on rare occasions it yields
//! plausible garbage instead. Use [`EnvelopeMode::Authenticated`] when the
//! recipient must be able to tell the difference.

pub mod armor;
pub mod envelope;
pub mod error;
pub mod kdf;

pub use envelope::{
    decrypt, encrypt, encrypt_with, inspect, looks_sealed, EnvelopeInfo, EnvelopeMode,
    EnvelopeOptions,
};
pub use error::EnvelopeError;
pub use kdf::{derive_key_iv, DerivedKey};

/// Magic marker of the legacy (untagged) format
pub const MAGIC_LEGACY: [u8; 8] = *b"Salted__";

/// Magic marker of the authenticated format: `Salted_` + version byte 0x01
pub const MAGIC_AUTHENTICATED: [u8; 8] = *b"Salted_\x01";

/// Size of the magic marker
pub const MAGIC_SIZE: usize = 8;

/// Size of the random per-envelope salt
pub const SALT_SIZE: usize = 8;

/// AES-256 key size
pub const KEY_SIZE: usize = 32;

/// CBC initialization vector size
pub const IV_SIZE: usize = 16;

/// AES block size
pub const BLOCK_SIZE: usize = 16;

/// HMAC-SHA256 tag size (authenticated mode only)
pub const TAG_SIZE: usize = 32;
