use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::Engine;

const NONCE_LEN: usize = 12;

/// AES-256-GCM encryption for IMAI API keys at rest.
pub struct EncryptionService {
    cipher: Aes256Gcm,
}

impl EncryptionService {
    /// Create from a base64-encoded 32-byte key.
    pub fn new(key_base64: &str) -> Result<Self, EncryptionError> {
        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(key_base64)
            .map_err(|_| EncryptionError::InvalidKey)?;

        if key_bytes.len() != 32 {
            return Err(EncryptionError::InvalidKey);
        }

        let cipher =
            Aes256Gcm::new_from_slice(&key_bytes).map_err(|_| EncryptionError::InvalidKey)?;

        Ok(Self { cipher })
    }

    /// Encrypt data, returning nonce (12 bytes) prepended to ciphertext.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| EncryptionError::EncryptFailed)?;

        let mut output = nonce.to_vec();
        output.extend(ciphertext);
        Ok(output)
    }

    /// Decrypt data where the first 12 bytes are the nonce.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        if data.len() < NONCE_LEN {
            return Err(EncryptionError::DecryptFailed);
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| EncryptionError::DecryptFailed)
    }

    /// Encrypt a secret for storage in a text column (base64 of nonce || ciphertext).
    pub fn encrypt_to_string(&self, plaintext: &str) -> Result<String, EncryptionError> {
        let sealed = self.encrypt(plaintext.as_bytes())?;
        Ok(base64::engine::general_purpose::STANDARD.encode(sealed))
    }

    /// Reverse of [`encrypt_to_string`](Self::encrypt_to_string).
    pub fn decrypt_from_string(&self, encoded: &str) -> Result<String, EncryptionError> {
        let sealed = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|_| EncryptionError::DecryptFailed)?;
        let plaintext = self.decrypt(&sealed)?;
        String::from_utf8(plaintext).map_err(|_| EncryptionError::DecryptFailed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncryptionError {
    #[error("Invalid encryption key (must be 32 bytes, base64-encoded)")]
    InvalidKey,

    #[error("Encryption failed")]
    EncryptFailed,

    #[error("Decryption failed")]
    DecryptFailed,
}
