use std::io::Write;

use aes_gcm::aead::{Aead, AeadCore, OsRng};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::write::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;

use crate::config::CodecConfig;
use crate::error::{EngineError, Result};

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Transforms applied to blob payloads on their way to and from the local
/// store. Compression runs before encryption; the encrypted layout is
/// `IV(12) || ciphertext || tag(16)`.
#[derive(Clone, Default)]
pub struct Codec {
    compress: bool,
    key: Option<[u8; KEY_LEN]>,
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec")
            .field("compress", &self.compress)
            .field("encrypt", &self.key.is_some())
            .finish()
    }
}

impl Codec {
    /// Builds the codec from tenant configuration. Key material is resolved
    /// here so a malformed key is rejected at tenant-open time, not on the
    /// first write.
    pub fn from_config(cfg: &CodecConfig) -> Result<Self> {
        let key = if cfg.encrypt_data {
            let material = cfg.encryption_key.as_deref().ok_or_else(|| {
                EngineError::InvalidArgument(
                    "encrypt_data is set but no encryption key is configured".into(),
                )
            })?;
            Some(resolve_key(material)?)
        } else {
            None
        };

        Ok(Self {
            compress: cfg.compress_data,
            key,
        })
    }

    pub fn is_encryption_enabled(&self) -> bool {
        self.key.is_some()
    }

    pub fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        let mut out = if self.compress {
            compress(data)?
        } else {
            data.to_vec()
        };
        if let Some(key) = &self.key {
            out = encrypt(key, &out)?;
        }
        Ok(out)
    }

    pub fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Ok(Vec::new());
        }
        let mut out = if let Some(key) = &self.key {
            decrypt(key, data)?
        } else {
            data.to_vec()
        };
        if self.compress {
            out = inflate(&out)?;
        }
        Ok(out)
    }
}

/// Resolves key material given either as 64 hex characters or as base64.
/// Anything that does not decode to exactly 32 bytes is rejected.
pub fn resolve_key(material: &str) -> Result<[u8; KEY_LEN]> {
    let bytes = if material.len() == KEY_LEN * 2 {
        hex::decode(material)
            .map_err(|e| EngineError::InvalidArgument(format!("invalid hex key: {e}")))?
    } else {
        BASE64
            .decode(material)
            .map_err(|e| EngineError::InvalidArgument(format!("invalid base64 key: {e}")))?
    };

    <[u8; KEY_LEN]>::try_from(bytes.as_slice()).map_err(|_| {
        EngineError::InvalidArgument(format!(
            "encryption key must be {KEY_LEN} bytes, got {}",
            bytes.len()
        ))
    })
}

pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| EngineError::CryptoFailure(format!("deflate failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| EngineError::CryptoFailure(format!("deflate failed: {e}")))
}

pub fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(Vec::new());
    decoder
        .write_all(data)
        .map_err(|e| EngineError::CryptoFailure(format!("inflate failed: {e}")))?;
    decoder
        .finish()
        .map_err(|e| EngineError::CryptoFailure(format!("inflate failed: {e}")))
}

fn encrypt(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| EngineError::CryptoFailure(format!("bad key: {e}")))?;
    let iv = Aes256Gcm::generate_nonce(&mut OsRng);
    let sealed = cipher
        .encrypt(&iv, plaintext)
        .map_err(|_| EngineError::CryptoFailure("encryption failed".into()))?;

    let mut out = Vec::with_capacity(IV_LEN + sealed.len());
    out.extend_from_slice(iv.as_slice());
    out.extend_from_slice(&sealed);
    Ok(out)
}

fn decrypt(key: &[u8; KEY_LEN], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < IV_LEN + TAG_LEN {
        return Err(EngineError::CryptoFailure(
            "encrypted payload shorter than IV plus tag".into(),
        ));
    }
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| EngineError::CryptoFailure(format!("bad key: {e}")))?;
    let (iv, sealed) = data.split_at(IV_LEN);
    cipher
        .decrypt(Nonce::from_slice(iv), sealed)
        .map_err(|_| EngineError::CryptoFailure("tag verification failed".into()))
}
