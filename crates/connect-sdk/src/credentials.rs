//! Password sealing of the wallet mnemonic.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{Error, Result};

/// Argon2-keyed AES-256-GCM envelope, every field base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedMnemonic {
    pub salt: String,
    pub nonce: String,
    pub ciphertext: String,
}

fn derive_key(password: &str, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let mut key_bytes = Zeroizing::new([0u8; 32]);
    argon2::Argon2::default()
        .hash_password_into(password.as_bytes(), salt, key_bytes.as_mut())
        .map_err(|e| Error::Crypto(e.to_string()))?;
    Ok(key_bytes)
}

fn decode(field: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(field)
        .map_err(|e| Error::Crypto(e.to_string()))
}

impl EncryptedMnemonic {
    pub fn seal(mnemonic: &str, password: &str) -> Result<Self> {
        let salt: [u8; 16] = rand::random();
        let key = derive_key(password, &salt)?;

        let cipher =
            Aes256Gcm::new_from_slice(key.as_ref()).map_err(|e| Error::Crypto(e.to_string()))?;
        let nonce_bytes: [u8; 12] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, mnemonic.as_bytes())
            .map_err(|e| Error::Crypto(e.to_string()))?;

        Ok(Self {
            salt: BASE64.encode(salt),
            nonce: BASE64.encode(nonce_bytes),
            ciphertext: BASE64.encode(ciphertext),
        })
    }

    /// Decrypt the mnemonic. A failed authentication tag means the password
    /// is wrong and maps to [`Error::InvalidCredential`].
    pub fn open(&self, password: &str) -> Result<Zeroizing<String>> {
        let salt = decode(&self.salt)?;
        let key = derive_key(password, &salt)?;

        let cipher =
            Aes256Gcm::new_from_slice(key.as_ref()).map_err(|e| Error::Crypto(e.to_string()))?;
        let nonce_bytes = decode(&self.nonce)?;
        if nonce_bytes.len() != 12 {
            return Err(Error::Crypto("nonce must be 12 bytes".into()));
        }
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = decode(&self.ciphertext)?;

        let mut plaintext = cipher
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|_| Error::InvalidCredential)?;

        let mnemonic = String::from_utf8(plaintext.clone()).map_err(|e| Error::Crypto(e.to_string()));
        plaintext.zeroize();
        Ok(Zeroizing::new(mnemonic?))
    }
}
