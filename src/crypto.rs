//! AES-256-GCM sealing of session payloads.
//!
//! A sealed blob is the unpadded URL-safe base64 encoding of
//!
//! ```text
//! [nonce: 12 bytes][ciphertext: variable][tag: 16 bytes]
//! ```
//!
//! where the plaintext is the JSON serialization of the payload. Every call to [`encrypt`] draws
//! a fresh nonce from the operating system CSPRNG. Tag verification is done by `aes-gcm`, which
//! compares in constant time and never releases plaintext for a blob that fails to verify.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hkdf::Hkdf;
use rand::{RngCore, rngs::OsRng};
use serde::{Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Key size in bytes (256 bits).
pub const KEY_LEN: usize = 32;
/// Nonce size in bytes (96 bits).
pub const NONCE_LEN: usize = 12;
/// Authentication tag size in bytes (128 bits).
pub const TAG_LEN: usize = 16;

const KDF_INFO: &[u8] = b"tower-cookie-session aes-256-gcm v1";

/// An encryption key derived from a secret's key material, ready to seal and open blobs.
///
/// Key material of exactly [`KEY_LEN`] bytes is used as the key. Anything else is stretched with
/// HKDF-SHA256. The raw key bytes are wiped once the cipher is initialised.
#[derive(Clone)]
pub struct SessionKey {
    cipher: Aes256Gcm,
    fingerprint: [u8; 8],
}

impl SessionKey {
    pub fn derive(material: &[u8]) -> Result<Self, hkdf::InvalidLength> {
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        if material.len() == KEY_LEN {
            bytes.copy_from_slice(material);
        } else {
            Hkdf::<Sha256>::new(None, material).expand(KDF_INFO, &mut bytes[..])?;
        }

        let digest = Sha256::digest(&bytes[..]);
        let mut fingerprint = [0u8; 8];
        fingerprint.copy_from_slice(&digest[..8]);

        Ok(Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&bytes[..])),
            fingerprint,
        })
    }

    /// Short hex digest of the derived key, safe to log.
    pub fn fingerprint(&self) -> String {
        self.fingerprint.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// Serialize `payload` to JSON and seal it under `key`.
pub fn encrypt<T: Serialize + ?Sized>(payload: &T, key: &SessionKey) -> Result<String, CryptoError> {
    let plaintext = Zeroizing::new(serde_json::to_vec(payload).map_err(CryptoError::Serialize)?);

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = key
        .cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
        .map_err(|_| CryptoError::Encrypt)?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);

    Ok(URL_SAFE_NO_PAD.encode(sealed))
}

/// Open a blob produced by [`encrypt`] and deserialize the JSON object inside it.
///
/// Every failure, including a payload that is valid JSON but not an object, is reported as
/// [`CryptoError::AuthenticationFailure`].
pub fn decrypt<T: DeserializeOwned>(blob: &str, key: &SessionKey) -> Result<T, CryptoError> {
    let sealed = URL_SAFE_NO_PAD
        .decode(blob.as_bytes())
        .map_err(|_| CryptoError::AuthenticationFailure("invalid encoding"))?;

    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::AuthenticationFailure("blob too short"));
    }

    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    let plaintext = Zeroizing::new(
        key.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::AuthenticationFailure("tag mismatch"))?,
    );

    let value: serde_json::Value = serde_json::from_slice(&plaintext)
        .map_err(|_| CryptoError::AuthenticationFailure("payload is not json"))?;
    if !value.is_object() {
        return Err(CryptoError::AuthenticationFailure("payload is not an object"));
    }

    serde_json::from_value(value)
        .map_err(|_| CryptoError::AuthenticationFailure("unexpected payload shape"))
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, Value, json};

    use super::*;

    fn key(material: &[u8]) -> SessionKey {
        SessionKey::derive(material).expect("key derivation succeeds")
    }

    #[test]
    fn roundtrip() {
        let key = key(b"a secret that is not 32 bytes long");
        let payload = json!({ "user": "alice", "views": [1, 2, 3], "nested": { "ok": true } });

        let blob = encrypt(&payload, &key).expect("encrypt succeeds");
        let opened: Value = decrypt(&blob, &key).expect("decrypt succeeds");

        assert_eq!(opened, payload);
    }

    #[test]
    fn special_characters_roundtrip() {
        let key = key(&[7u8; KEY_LEN]);
        let payload = json!({ "text": "äöü &id=2; \"quoted\" \u{1f980} =;," });

        let blob = encrypt(&payload, &key).expect("encrypt succeeds");
        let opened: Value = decrypt(&blob, &key).expect("decrypt succeeds");

        assert_eq!(opened, payload);
    }

    #[test]
    fn fresh_nonce_per_call() {
        let key = key(b"secret");
        let payload = json!({ "a": 1 });

        let first = encrypt(&payload, &key).expect("encrypt succeeds");
        let second = encrypt(&payload, &key).expect("encrypt succeeds");

        assert_ne!(first, second);
        assert_ne!(first[..16], second[..16]);
    }

    #[test]
    fn blob_is_cookie_safe() {
        let key = key(b"secret");
        let blob = encrypt(&json!({ "a": "b" }), &key).expect("encrypt succeeds");

        assert!(
            blob.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn every_bit_flip_is_rejected() {
        let key = key(b"secret");
        let blob = encrypt(&json!({ "role": "user" }), &key).expect("encrypt succeeds");
        let sealed = URL_SAFE_NO_PAD.decode(&blob).expect("blob is base64");

        for byte in 0..sealed.len() {
            for bit in 0..8 {
                let mut tampered = sealed.clone();
                tampered[byte] ^= 1 << bit;
                let tampered = URL_SAFE_NO_PAD.encode(tampered);

                let result = decrypt::<Map<String, Value>>(&tampered, &key);
                assert!(matches!(
                    result,
                    Err(CryptoError::AuthenticationFailure(_))
                ));
            }
        }
    }

    #[test]
    fn wrong_key_is_rejected() {
        let blob = encrypt(&json!({ "a": 1 }), &key(b"one")).expect("encrypt succeeds");

        assert!(matches!(
            decrypt::<Value>(&blob, &key(b"two")),
            Err(CryptoError::AuthenticationFailure("tag mismatch"))
        ));
    }

    #[test]
    fn malformed_text_is_rejected() {
        let key = key(b"secret");

        for input in ["", "0", "bogus", "!!!not base64!!!", "AAAA", "AAAAAAAAAAAAAAAAAAAAAA"] {
            assert!(matches!(
                decrypt::<Value>(input, &key),
                Err(CryptoError::AuthenticationFailure(_))
            ));
        }
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let key = key(b"secret");
        let blob = encrypt(&json!([1, 2, 3]), &key).expect("encrypt succeeds");

        assert!(matches!(
            decrypt::<Value>(&blob, &key),
            Err(CryptoError::AuthenticationFailure("payload is not an object"))
        ));
    }

    #[test]
    fn full_length_material_is_used_directly() {
        let material = [42u8; KEY_LEN];
        let direct = key(&material);
        let stretched = key(&material[..31]);

        assert_ne!(direct.fingerprint(), stretched.fingerprint());
        assert_eq!(direct.fingerprint(), key(&material).fingerprint());
        assert_eq!(direct.fingerprint().len(), 16);
    }

    #[test]
    fn debug_does_not_leak_key() {
        let key = key(&[1u8; KEY_LEN]);
        let rendered = format!("{key:?}");

        assert!(rendered.contains("fingerprint"));
        assert!(!rendered.contains("cipher"));
    }
}
