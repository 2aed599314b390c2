//! Key derivation: password + salt → AES key and IV (EVP_BytesToKey, MD5, 1 round)

use md5::{Digest, Md5};
use secrecy::{ExposeSecret, SecretString};
use zeroize::{Zeroize, Zeroizing};

use crate::{IV_SIZE, KEY_SIZE, SALT_SIZE};

/// AES-256 key and CBC IV derived from a password. Zeroized on drop.
#[derive(Clone)]
pub struct DerivedKey {
    key: [u8; KEY_SIZE],
    iv: [u8; IV_SIZE],
}

impl DerivedKey {
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.key.zeroize();
        self.iv.zeroize();
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("key", &"[REDACTED]")
            .field("iv", &"[REDACTED]")
            .finish()
    }
}

/// Derive key and IV from `(password, salt)`.
///
/// `D_1 = MD5(password || salt)`, `D_i = MD5(D_{i-1} || password || salt)`;
/// digests are concatenated until 48 bytes exist, then split 32/16.
/// Deterministic: the same password and salt always give the same output.
pub fn derive_key_iv(password: &SecretString, salt: &[u8; SALT_SIZE]) -> DerivedKey {
    let secret = password.expose_secret().as_bytes();
    let mut material = Zeroizing::new(Vec::with_capacity(KEY_SIZE + IV_SIZE + 16));
    let mut previous = Zeroizing::new([0u8; 16]);
    let mut first = true;

    while material.len() < KEY_SIZE + IV_SIZE {
        let mut hasher = Md5::new();
        if !first {
            hasher.update(previous.as_slice());
        }
        hasher.update(secret);
        hasher.update(salt);
        previous.copy_from_slice(&hasher.finalize());
        material.extend_from_slice(previous.as_slice());
        first = false;
    }

    let mut key = [0u8; KEY_SIZE];
    let mut iv = [0u8; IV_SIZE];
    key.copy_from_slice(&material[..KEY_SIZE]);
    iv.copy_from_slice(&material[KEY_SIZE..KEY_SIZE + IV_SIZE]);
    DerivedKey { key, iv }
}
