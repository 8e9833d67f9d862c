//! Symmetric cipher for the legacy `{"data": "<base64>"}` payload envelope.
//!
//! Both directions use AES-256-CBC with PKCS#7 padding and a fixed IV taken
//! from the key file. Unpadding is strict: the pad length must be in
//! `1..=16` and every pad byte must equal it.

use std::fmt;
use std::path::Path;

use aes::Aes256;
use base64::{engine::general_purpose::STANDARD, Engine};
use cbc::cipher::block_padding::{NoPadding, Pkcs7};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

pub const BLOCK_SIZE: usize = 16;
pub const KEY_SIZE: usize = 32;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("invalid base64 ciphertext: {0}")]
    Base64(String),

    #[error("ciphertext is empty")]
    Empty,

    #[error("ciphertext length {0} is not a multiple of the block size")]
    NotBlockAligned(usize),

    #[error("invalid padding length {0}")]
    InvalidPaddingLength(u8),

    #[error("invalid padding")]
    InvalidPadding,
}

/// On-disk key file: `{"secret_key": "<base64>", "iv": "<base64>"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyFile {
    pub secret_key: String,
    pub iv: String,
}

/// Decoded key and IV. Loaded once at startup.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub secret_key: [u8; KEY_SIZE],
    pub iv: [u8; BLOCK_SIZE],
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("secret_key", &"[REDACTED]")
            .field("iv", &"[REDACTED]")
            .finish()
    }
}

impl KeyMaterial {
    pub fn new(secret_key: [u8; KEY_SIZE], iv: [u8; BLOCK_SIZE]) -> Self {
        Self { secret_key, iv }
    }

    /// Read and decode a key file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::KeyFile(format!("{}: {}", path.display(), e)))?;
        let file: KeyFile = serde_json::from_str(&raw)
            .map_err(|e| ConfigError::KeyFile(format!("{}: {}", path.display(), e)))?;
        Self::try_from(&file)
    }

    pub fn to_key_file(&self) -> KeyFile {
        KeyFile {
            secret_key: STANDARD.encode(self.secret_key),
            iv: STANDARD.encode(self.iv),
        }
    }
}

impl TryFrom<&KeyFile> for KeyMaterial {
    type Error = ConfigError;

    fn try_from(file: &KeyFile) -> Result<Self, Self::Error> {
        let key = STANDARD
            .decode(&file.secret_key)
            .map_err(|e| ConfigError::KeyFile(format!("secret_key: {e}")))?;
        let iv = STANDARD
            .decode(&file.iv)
            .map_err(|e| ConfigError::KeyFile(format!("iv: {e}")))?;

        let secret_key: [u8; KEY_SIZE] = key.as_slice().try_into().map_err(|_| {
            ConfigError::KeyFile(format!(
                "secret_key must be {KEY_SIZE} bytes, got {}",
                key.len()
            ))
        })?;
        let iv: [u8; BLOCK_SIZE] = iv.as_slice().try_into().map_err(|_| {
            ConfigError::KeyFile(format!("iv must be {BLOCK_SIZE} bytes, got {}", iv.len()))
        })?;

        Ok(Self { secret_key, iv })
    }
}

/// Encrypt `plaintext` and return the base64 ciphertext.
pub fn encrypt(plaintext: &[u8], keys: &KeyMaterial) -> String {
    let ciphertext = Aes256CbcEnc::new(&keys.secret_key.into(), &keys.iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    STANDARD.encode(ciphertext)
}

/// Decrypt a base64 ciphertext produced by [`encrypt`].
pub fn decrypt(encoded: &str, keys: &KeyMaterial) -> Result<Vec<u8>, CipherError> {
    let ciphertext = STANDARD
        .decode(encoded.trim())
        .map_err(|e| CipherError::Base64(e.to_string()))?;

    if ciphertext.is_empty() {
        return Err(CipherError::Empty);
    }
    if ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CipherError::NotBlockAligned(ciphertext.len()));
    }

    let decrypted = Aes256CbcDec::new(&keys.secret_key.into(), &keys.iv.into())
        .decrypt_padded_vec_mut::<NoPadding>(&ciphertext)
        .map_err(|_| CipherError::InvalidPadding)?;

    pkcs7_unpad(decrypted)
}

fn pkcs7_unpad(mut data: Vec<u8>) -> Result<Vec<u8>, CipherError> {
    let len = data.len();
    if len == 0 {
        return Err(CipherError::Empty);
    }
    if len % BLOCK_SIZE != 0 {
        return Err(CipherError::NotBlockAligned(len));
    }

    let pad = data[len - 1];
    if pad == 0 || pad as usize > BLOCK_SIZE {
        return Err(CipherError::InvalidPaddingLength(pad));
    }
    if data[len - pad as usize..].iter().any(|&b| b != pad) {
        return Err(CipherError::InvalidPadding);
    }

    data.truncate(len - pad as usize);
    Ok(data)
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    data: String,
}

/// Unwrap a `{"data": "<base64>"}` request body into its JSON plaintext.
pub fn open_envelope(body: &[u8], keys: &KeyMaterial) -> Result<Vec<u8>, crate::GatewayError> {
    let envelope: Envelope = serde_json::from_slice(body)
        .map_err(|e| crate::GatewayError::Decode(format!("invalid envelope JSON: {e}")))?;

    let plaintext = decrypt(&envelope.data, keys)?;

    if serde_json::from_slice::<serde::de::IgnoredAny>(&plaintext).is_err() {
        return Err(crate::GatewayError::Crypto(
            "decrypted payload is not valid JSON".to_string(),
        ));
    }
    Ok(plaintext)
}

/// Wrap a response body into a `{"data": "<base64>"}` envelope.
pub fn seal_envelope(body: &[u8], keys: &KeyMaterial) -> Vec<u8> {
    let envelope = Envelope {
        data: encrypt(body, keys),
    };
    // Serializing a single string field cannot fail.
    serde_json::to_vec(&envelope).unwrap_or_default()
}
