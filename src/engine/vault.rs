use std::fmt;

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use log::warn;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use crate::{Error, Result};

/// PBKDF2-HMAC-SHA256 rounds used by [`derive_key`].
pub const KDF_ITERATIONS: u32 = 100_000;

/// Shown in place of a field whose token could not be decrypted.
pub const DECRYPTION_FAILED: &str = "[decryption failed]";

const NONCE_LEN: usize = 12;

/// A 256-bit symmetric key.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey([REDACTED])")
    }
}

/// Derives the field key from the master secret and salt with PBKDF2.
pub fn derive_key(master_secret: &str, salt: &[u8]) -> EncryptionKey {
    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(master_secret.as_bytes(), salt, KDF_ITERATIONS, &mut key);
    EncryptionKey(key)
}

/// Encrypts and decrypts individual field values.
///
/// The ledger holds one of these behind an `Arc<dyn FieldCipher>`, chosen at
/// construction time: [`Vault`] when encryption is enabled, [`Plaintext`]
/// when it is not.
pub trait FieldCipher: Send + Sync {
    /// Turns a plaintext value into a storable token. Empty stays empty.
    fn encrypt(&self, plaintext: &str) -> Result<String>;

    /// Reverses [`encrypt`](Self::encrypt), reporting failures.
    fn try_decrypt(&self, token: &str) -> Result<String>;

    /// Like [`try_decrypt`](Self::try_decrypt) but never fails: a corrupt or
    /// foreign token yields [`DECRYPTION_FAILED`].
    fn decrypt(&self, token: &str) -> String {
        match self.try_decrypt(token) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!("Field decryption failed: {}", e);
                DECRYPTION_FAILED.to_string()
            }
        }
    }

    /// Whether tokens written by this codec are ciphertext.
    fn is_encrypting(&self) -> bool;
}

/// AES-256-GCM field codec.
///
/// Tokens are URL-safe base64 of the 12-byte nonce followed by the
/// ciphertext and its authentication tag, so tampering is detected.
#[derive(Clone)]
pub struct Vault {
    cipher: Aes256Gcm,
}

impl Vault {
    pub fn new(key: &EncryptionKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes())),
        }
    }

    /// Derives the key from a master secret and salt, then builds the codec.
    pub fn from_secret(master_secret: &SecretString, salt: &str) -> Self {
        Self::new(&derive_key(master_secret.expose_secret(), salt.as_bytes()))
    }
}

impl fmt::Debug for Vault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Vault")
    }
}

impl FieldCipher for Vault {
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| Error::Crypto(e.to_string()))?;

        let mut combined = nonce.to_vec();
        combined.extend_from_slice(&ciphertext);
        Ok(URL_SAFE.encode(combined))
    }

    fn try_decrypt(&self, token: &str) -> Result<String> {
        if token.is_empty() {
            return Ok(String::new());
        }
        let combined = URL_SAFE
            .decode(token.trim())
            .map_err(|e| Error::Crypto(e.to_string()))?;
        if combined.len() < NONCE_LEN {
            return Err(Error::Crypto("ciphertext too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| Error::Crypto("decryption failed (wrong key or tampered data)".to_string()))?;
        String::from_utf8(plaintext).map_err(|e| Error::Crypto(e.to_string()))
    }

    fn is_encrypting(&self) -> bool {
        true
    }
}

/// Passthrough codec for deployments that run with encryption disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct Plaintext;

impl FieldCipher for Plaintext {
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        Ok(plaintext.to_string())
    }

    fn try_decrypt(&self, token: &str) -> Result<String> {
        Ok(token.to_string())
    }

    fn is_encrypting(&self) -> bool {
        false
    }
}
