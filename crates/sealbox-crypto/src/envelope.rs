//! Envelope encrypt/decrypt
//!
//! ```text
//! legacy:        "Salted__"    || salt(8) || AES-256-CBC(plaintext)
//! authenticated: "Salted_\x01" || salt(8) || AES-256-CBC(plaintext) || HMAC-SHA256(32)
//! ```
//!
//! The authenticated tag covers magic, salt and ciphertext (encrypt-then-MAC)
//! and is keyed with HKDF-SHA256 over the derived AES key.

use std::borrow::Cow;

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;
use zeroize::Zeroizing;

use crate::armor;
use crate::error::EnvelopeError;
use crate::kdf::{derive_key_iv, DerivedKey};
use crate::{
    BLOCK_SIZE, MAGIC_AUTHENTICATED, MAGIC_LEGACY, MAGIC_SIZE, SALT_SIZE, TAG_SIZE,
};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

const HEADER_SIZE: usize = MAGIC_SIZE + SALT_SIZE;
const MAC_INFO: &[u8] = b"sealbox-envelope-mac";

/// Envelope variant, identified on the wire by its magic marker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeMode {
    /// OpenSSL-compatible, no integrity tag
    #[default]
    Legacy,
    /// Legacy layout plus a trailing HMAC-SHA256 tag
    Authenticated,
}

impl EnvelopeMode {
    pub fn magic(&self) -> &'static [u8; MAGIC_SIZE] {
        match self {
            EnvelopeMode::Legacy => &MAGIC_LEGACY,
            EnvelopeMode::Authenticated => &MAGIC_AUTHENTICATED,
        }
    }

    pub fn from_magic(magic: &[u8]) -> Option<Self> {
        if magic == MAGIC_LEGACY {
            Some(EnvelopeMode::Legacy)
        } else if magic == MAGIC_AUTHENTICATED {
            Some(EnvelopeMode::Authenticated)
        } else {
            None
        }
    }

    fn tag_len(&self) -> usize {
        match self {
            EnvelopeMode::Legacy => 0,
            EnvelopeMode::Authenticated => TAG_SIZE,
        }
    }
}

impl std::fmt::Display for EnvelopeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvelopeMode::Legacy => f.write_str("legacy"),
            EnvelopeMode::Authenticated => f.write_str("authenticated"),
        }
    }
}

impl std::str::FromStr for EnvelopeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" => Ok(EnvelopeMode::Legacy),
            "authenticated" => Ok(EnvelopeMode::Authenticated),
            other => Err(format!(
                "unknown envelope mode {other:?} (expected \"legacy\" or \"authenticated\")"
            )),
        }
    }
}

/// Output settings for [`encrypt_with`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvelopeOptions {
    pub mode: EnvelopeMode,
    /// Emit base64 text instead of raw bytes
    pub armor: bool,
}

/// Structural description of an envelope, readable without the password
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeInfo {
    pub mode: EnvelopeMode,
    pub armored: bool,
    pub salt: [u8; SALT_SIZE],
    pub ciphertext_len: usize,
    /// Binary envelope length (after removing armor)
    pub envelope_len: usize,
}

struct Parsed<'a> {
    mode: EnvelopeMode,
    salt: [u8; SALT_SIZE],
    /// magic || salt || ciphertext, the bytes covered by the tag
    signed: &'a [u8],
    ciphertext: &'a [u8],
    tag: &'a [u8],
}

/// Encrypt `plaintext` into a legacy binary envelope under a fresh salt.
pub fn encrypt(plaintext: &[u8], password: &SecretString) -> Result<Vec<u8>, EnvelopeError> {
    encrypt_with(plaintext, password, &EnvelopeOptions::default())
}

/// Encrypt with an explicit mode and output form.
///
/// Empty plaintexts are refused: an empty decrypt result is reserved as the
/// wrong-password signal, so an empty payload could never be opened again.
pub fn encrypt_with(
    plaintext: &[u8],
    password: &SecretString,
    options: &EnvelopeOptions,
) -> Result<Vec<u8>, EnvelopeError> {
    if plaintext.is_empty() {
        return Err(EnvelopeError::EncryptionFailure(
            "refusing to encrypt an empty payload".into(),
        ));
    }

    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);

    let envelope = seal_with_salt(plaintext, password, &salt, options.mode)?;
    debug!(
        mode = %options.mode,
        armored = options.armor,
        plaintext_len = plaintext.len(),
        envelope_len = envelope.len(),
        "sealed envelope"
    );

    Ok(if options.armor {
        armor::armor(&envelope)
    } else {
        envelope
    })
}

pub(crate) fn seal_with_salt(
    plaintext: &[u8],
    password: &SecretString,
    salt: &[u8; SALT_SIZE],
    mode: EnvelopeMode,
) -> Result<Vec<u8>, EnvelopeError> {
    let derived = derive_key_iv(password, salt);
    let cipher = Aes256CbcEnc::new_from_slices(derived.key(), derived.iv())
        .map_err(|e| EnvelopeError::EncryptionFailure(format!("cipher init: {e}")))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut out = Vec::with_capacity(HEADER_SIZE + ciphertext.len() + mode.tag_len());
    out.extend_from_slice(mode.magic());
    out.extend_from_slice(salt);
    out.extend_from_slice(&ciphertext);

    if mode == EnvelopeMode::Authenticated {
        let mut mac = keyed_mac(&derived).ok_or_else(|| {
            EnvelopeError::EncryptionFailure("tag key derivation failed".into())
        })?;
        mac.update(&out);
        out.extend_from_slice(&mac.finalize().into_bytes());
    }

    Ok(out)
}

/// Decrypt a binary or armored envelope.
///
/// Structural problems are [`EnvelopeError::Malformed`]. Bad padding, an
/// empty result, or a tag mismatch are all [`EnvelopeError::WrongPasswordOrCorruptData`].
/// In legacy mode a wrong password can still, rarely, pass the padding check
/// and return garbage.
pub fn decrypt(envelope: &[u8], password: &SecretString) -> Result<Vec<u8>, EnvelopeError> {
    let bytes = unwrap_armor(envelope)?;
    let parsed = parse(&bytes)?;
    let derived = derive_key_iv(password, &parsed.salt);

    if parsed.mode == EnvelopeMode::Authenticated {
        let mut mac = keyed_mac(&derived).ok_or(EnvelopeError::WrongPasswordOrCorruptData)?;
        mac.update(parsed.signed);
        mac.verify_slice(parsed.tag)
            .map_err(|_| EnvelopeError::WrongPasswordOrCorruptData)?;
    }

    let cipher = Aes256CbcDec::new_from_slices(derived.key(), derived.iv())
        .map_err(|_| EnvelopeError::WrongPasswordOrCorruptData)?;
    let plaintext = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(parsed.ciphertext)
        .map_err(|_| EnvelopeError::WrongPasswordOrCorruptData)?;

    if plaintext.is_empty() {
        return Err(EnvelopeError::WrongPasswordOrCorruptData);
    }

    debug!(mode = %parsed.mode, plaintext_len = plaintext.len(), "opened envelope");
    Ok(plaintext)
}

/// Parse an envelope's structure without decrypting it.
pub fn inspect(envelope: &[u8]) -> Result<EnvelopeInfo, EnvelopeError> {
    let armored = armor::is_armored(envelope);
    let bytes = unwrap_armor(envelope)?;
    let parsed = parse(&bytes)?;
    Ok(EnvelopeInfo {
        mode: parsed.mode,
        armored,
        salt: parsed.salt,
        ciphertext_len: parsed.ciphertext.len(),
        envelope_len: bytes.len(),
    })
}

/// Cheap check whether `bytes` starts like an envelope (binary or armored).
pub fn looks_sealed(bytes: &[u8]) -> bool {
    armor::is_armored(bytes)
        || (bytes.len() >= MAGIC_SIZE && EnvelopeMode::from_magic(&bytes[..MAGIC_SIZE]).is_some())
}

fn unwrap_armor(envelope: &[u8]) -> Result<Cow<'_, [u8]>, EnvelopeError> {
    if armor::is_armored(envelope) {
        Ok(Cow::Owned(armor::unarmor(envelope)?))
    } else {
        Ok(Cow::Borrowed(envelope))
    }
}

fn parse(bytes: &[u8]) -> Result<Parsed<'_>, EnvelopeError> {
    if bytes.len() < MAGIC_SIZE {
        return Err(EnvelopeError::Malformed("shorter than the magic marker"));
    }
    let mode = EnvelopeMode::from_magic(&bytes[..MAGIC_SIZE])
        .ok_or(EnvelopeError::Malformed("unknown magic marker"))?;

    let tag_len = mode.tag_len();
    if bytes.len() < HEADER_SIZE + BLOCK_SIZE + tag_len {
        return Err(EnvelopeError::Malformed(
            "too short to hold a salt and one cipher block",
        ));
    }

    let body_end = bytes.len() - tag_len;
    let ciphertext = &bytes[HEADER_SIZE..body_end];
    if ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(EnvelopeError::Malformed(
            "ciphertext is not a whole number of blocks",
        ));
    }

    let mut salt = [0u8; SALT_SIZE];
    salt.copy_from_slice(&bytes[MAGIC_SIZE..HEADER_SIZE]);

    Ok(Parsed {
        mode,
        salt,
        signed: &bytes[..body_end],
        ciphertext,
        tag: &bytes[body_end..],
    })
}

fn keyed_mac(derived: &DerivedKey) -> Option<HmacSha256> {
    let mut mac_key = Zeroizing::new([0u8; TAG_SIZE]);
    Hkdf::<Sha256>::new(None, derived.key())
        .expand(MAC_INFO, mac_key.as_mut_slice())
        .ok()?;
    HmacSha256::new_from_slice(mac_key.as_slice()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pw(s: &str) -> SecretString {
        SecretString::from(s)
    }

    // printf 'HELLO WRLD' | openssl enc -aes-256-cbc -md md5 -pass pass:p@ss -S 0102030405060708
    const OPENSSL_HELLO: &str = "53616c7465645f5f0102030405060708a176b6a3ec20b4983f4a004759297b45";

    // printf 'The quick brown fox jumps over the lazy dog' \
    //   | openssl enc -aes-256-cbc -md md5 -pass pass:correct-horse -a
    const OPENSSL_FOX_ARMORED: &str = "U2FsdGVkX18H4QgXP8qxtmamynZCrC9EoTx6RWz9yRfnAt1mW0pCknWdQ+4gKT6d\nc4tcNUakCVFHSTrPtAfGeA==\n";

    fn unhex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn test_encrypt_matches_openssl() {
        let env = seal_with_salt(
            b"HELLO WRLD",
            &pw("p@ss"),
            &[1, 2, 3, 4, 5, 6, 7, 8],
            EnvelopeMode::Legacy,
        )
        .unwrap();
        assert_eq!(env, unhex(OPENSSL_HELLO));
    }

    #[test]
    fn test_decrypt_openssl_binary() {
        let plaintext = decrypt(&unhex(OPENSSL_HELLO), &pw("p@ss")).unwrap();
        assert_eq!(plaintext, b"HELLO WRLD");
    }

    #[test]
    fn test_decrypt_openssl_armored() {
        let plaintext = decrypt(OPENSSL_FOX_ARMORED.as_bytes(), &pw("correct-horse")).unwrap();
        assert_eq!(plaintext, b"The quick brown fox jumps over the lazy dog");
    }

    #[test]
    fn test_roundtrip_legacy() {
        let env = encrypt(b"hello, sealed world!", &pw("hunter2")).unwrap();
        assert_eq!(&env[..MAGIC_SIZE], b"Salted__");
        assert_eq!(decrypt(&env, &pw("hunter2")).unwrap(), b"hello, sealed world!");
    }

    #[test]
    fn test_roundtrip_authenticated_armored() {
        let opts = EnvelopeOptions {
            mode: EnvelopeMode::Authenticated,
            armor: true,
        };
        let env = encrypt_with(b"tagged payload", &pw("pw"), &opts).unwrap();
        assert!(env.starts_with(b"U2FsdGVk"));

        let info = inspect(&env).unwrap();
        assert_eq!(info.mode, EnvelopeMode::Authenticated);
        assert!(info.armored);
        assert_eq!(info.ciphertext_len, BLOCK_SIZE);
        assert_eq!(info.envelope_len, HEADER_SIZE + BLOCK_SIZE + TAG_SIZE);

        assert_eq!(decrypt(&env, &pw("pw")).unwrap(), b"tagged payload");
    }

    #[test]
    fn test_salt_freshness() {
        let a = encrypt(b"same input", &pw("same password")).unwrap();
        let b = encrypt(b"same input", &pw("same password")).unwrap();

        assert_ne!(a[MAGIC_SIZE..HEADER_SIZE], b[MAGIC_SIZE..HEADER_SIZE], "salts must differ");
        assert_ne!(a, b);
        assert_eq!(decrypt(&a, &pw("same password")).unwrap(), b"same input");
        assert_eq!(decrypt(&b, &pw("same password")).unwrap(), b"same input");
    }

    #[test]
    fn test_wrong_password_never_returns_plaintext() {
        let plaintext = b"attack at dawn";
        let env = encrypt(plaintext, &pw("right")).unwrap();
        match decrypt(&env, &pw("wrong")) {
            Err(e) => assert_eq!(e, EnvelopeError::WrongPasswordOrCorruptData),
            Ok(garbage) => assert_ne!(garbage, plaintext),
        }
    }

    #[test]
    fn test_wrong_password_authenticated_always_fails() {
        let opts = EnvelopeOptions {
            mode: EnvelopeMode::Authenticated,
            armor: false,
        };
        let env = encrypt_with(b"attack at dawn", &pw("right"), &opts).unwrap();
        assert_eq!(
            decrypt(&env, &pw("wrong")),
            Err(EnvelopeError::WrongPasswordOrCorruptData)
        );
    }

    #[test]
    fn test_tampering_detected_in_authenticated_mode() {
        let opts = EnvelopeOptions {
            mode: EnvelopeMode::Authenticated,
            armor: false,
        };
        let env = encrypt_with(b"do not touch", &pw("pw"), &opts).unwrap();

        for idx in [MAGIC_SIZE + 1, HEADER_SIZE + 2, env.len() - 1] {
            let mut tampered = env.clone();
            tampered[idx] ^= 0x01;
            assert_eq!(
                decrypt(&tampered, &pw("pw")),
                Err(EnvelopeError::WrongPasswordOrCorruptData),
                "flip at {idx} must be rejected"
            );
        }
    }

    #[test]
    fn test_malformed_inputs() {
        let cases: [&[u8]; 5] = [
            b"",
            b"Salted_",
            b"Salted__\x01\x02\x03\x04\x05\x06\x07\x08",
            b"NotSalt!\x01\x02\x03\x04\x05\x06\x07\x08\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00",
            b"Salted__\x01\x02\x03\x04\x05\x06\x07\x08\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00",
        ];
        for case in cases {
            assert!(
                matches!(decrypt(case, &pw("pw")), Err(EnvelopeError::Malformed(_))),
                "{case:?} must be malformed"
            );
        }
    }

    #[test]
    fn test_authenticated_without_room_for_tag_is_malformed() {
        let mut env = Vec::from(MAGIC_AUTHENTICATED);
        env.extend_from_slice(&[0u8; SALT_SIZE + BLOCK_SIZE]);
        assert!(matches!(
            decrypt(&env, &pw("pw")),
            Err(EnvelopeError::Malformed(_))
        ));
    }

    #[test]
    fn test_empty_plaintext_refused() {
        assert!(matches!(
            encrypt(b"", &pw("pw")),
            Err(EnvelopeError::EncryptionFailure(_))
        ));
    }

    #[test]
    fn test_looks_sealed() {
        let env = encrypt(b"x", &pw("pw")).unwrap();
        assert!(looks_sealed(&env));
        assert!(looks_sealed(&armor::armor(&env)));
        assert!(!looks_sealed(b"plain text file"));
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("legacy".parse::<EnvelopeMode>().unwrap(), EnvelopeMode::Legacy);
        assert_eq!(
            " Authenticated ".parse::<EnvelopeMode>().unwrap(),
            EnvelopeMode::Authenticated
        );
        assert!("aead".parse::<EnvelopeMode>().is_err());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn roundtrip_any_payload(
            payload in proptest::collection::vec(any::<u8>(), 1..2048),
            password in ".{0,32}",
            authenticated in any::<bool>(),
            armored in any::<bool>(),
        ) {
            let opts = EnvelopeOptions {
                mode: if authenticated { EnvelopeMode::Authenticated } else { EnvelopeMode::Legacy },
                armor: armored,
            };
            let secret = SecretString::from(password);
            let env = encrypt_with(&payload, &secret, &opts).unwrap();
            prop_assert_eq!(decrypt(&env, &secret).unwrap(), payload);
        }

        #[test]
        fn wrong_password_never_yields_plaintext(
            payload in proptest::collection::vec(any::<u8>(), 1..256),
            right in "[a-z]{1,16}",
            wrong in "[A-Z]{1,16}",
        ) {
            let env = encrypt(&payload, &SecretString::from(right)).unwrap();
            if let Ok(out) = decrypt(&env, &SecretString::from(wrong)) {
                prop_assert_ne!(out, payload);
            }
        }

        #[test]
        fn decrypt_arbitrary_bytes_never_panics(
            bytes in proptest::collection::vec(any::<u8>(), 0..128),
        ) {
            let _ = decrypt(&bytes, &SecretString::from("pw"));
            let _ = inspect(&bytes);
        }
    }
}
