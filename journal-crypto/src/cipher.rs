//! AES-256-GCM authenticated encryption.

use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// GCM nonce size in bytes (96 bits).
pub const IV_SIZE: usize = 12;

/// GCM authentication tag size in bytes, appended to the ciphertext.
pub const TAG_SIZE: usize = 16;

/// Ciphertext plus the IV it was produced with.
///
/// Serializes as `{"cipher": "<base64>", "iv": "<base64>"}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedData {
    #[serde(with = "b64")]
    pub cipher: Vec<u8>,
    #[serde(with = "b64_iv")]
    pub iv: [u8; IV_SIZE],
}

impl EncryptedData {
    pub fn to_json(&self) -> CryptoResult<String> {
        serde_json::to_string(self).map_err(|e| CryptoError::Malformed(e.to_string()))
    }

    /// Parses an envelope. Bad base64 or a wrong-length IV is a decryption
    /// failure: the stored value can never be opened.
    pub fn from_json(json: &str) -> CryptoResult<Self> {
        serde_json::from_str(json).map_err(|e| CryptoError::Decryption(e.to_string()))
    }
}

/// Encrypts `plaintext` under `key` with a fresh random IV.
pub fn encrypt(key: &DerivedKey, plaintext: &[u8]) -> CryptoResult<EncryptedData> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut iv = [0u8; IV_SIZE];
    rand::rng().fill_bytes(&mut iv);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(EncryptedData {
        cipher: ciphertext,
        iv,
    })
}

/// Decrypts and authenticates `data`.
pub fn decrypt(key: &DerivedKey, data: &EncryptedData) -> CryptoResult<Vec<u8>> {
    if data.cipher.len() < TAG_SIZE {
        return Err(CryptoError::Decryption("ciphertext shorter than tag".into()));
    }

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::Decryption(e.to_string()))?;

    cipher
        .decrypt(Nonce::from_slice(&data.iv), data.cipher.as_slice())
        .map_err(|_| CryptoError::Decryption("authentication failed".into()))
}

pub fn encrypt_string(key: &DerivedKey, plaintext: &str) -> CryptoResult<EncryptedData> {
    encrypt(key, plaintext.as_bytes())
}

pub fn decrypt_string(key: &DerivedKey, data: &EncryptedData) -> CryptoResult<String> {
    let bytes = decrypt(key, data)?;
    String::from_utf8(bytes).map_err(|e| CryptoError::Decryption(format!("invalid utf-8: {e}")))
}

mod b64 {
    use super::*;
    use serde::{de, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD.decode(encoded).map_err(de::Error::custom)
    }
}

mod b64_iv {
    use super::*;
    use serde::{de, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(iv: &[u8; IV_SIZE], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(iv))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; IV_SIZE], D::Error> {
        let encoded = String::deserialize(d)?;
        let bytes = STANDARD.decode(encoded).map_err(de::Error::custom)?;
        <[u8; IV_SIZE]>::try_from(bytes.as_slice()).map_err(|_| {
            de::Error::custom(format!("iv must be {IV_SIZE} bytes, got {}", bytes.len()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::generate_random_key;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = generate_random_key();
        let data = encrypt(&key, b"dear diary").unwrap();
        assert_eq!(data.cipher.len(), b"dear diary".len() + TAG_SIZE);
        assert_eq!(decrypt(&key, &data).unwrap(), b"dear diary");
    }

    #[test]
    fn each_encryption_uses_a_fresh_iv() {
        let key = generate_random_key();
        let a = encrypt(&key, b"same").unwrap();
        let b = encrypt(&key, b"same").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.cipher, b.cipher);
    }

    #[test]
    fn envelope_has_cipher_and_iv_fields() {
        let key = generate_random_key();
        let json = encrypt_string(&key, "x").unwrap().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        assert!(obj["cipher"].is_string());
        assert_eq!(STANDARD.decode(obj["iv"].as_str().unwrap()).unwrap().len(), IV_SIZE);
    }

    #[test]
    fn bad_iv_length_is_decryption_error() {
        let json = r#"{"cipher":"AAAAAAAAAAAAAAAAAAAAAA==","iv":"AAAA"}"#;
        assert!(matches!(
            EncryptedData::from_json(json),
            Err(CryptoError::Decryption(_))
        ));
    }

    #[test]
    fn short_ciphertext_is_rejected() {
        let key = generate_random_key();
        let data = EncryptedData {
            cipher: vec![1, 2, 3],
            iv: [0u8; IV_SIZE],
        };
        assert!(matches!(decrypt(&key, &data), Err(CryptoError::Decryption(_))));
    }
}
