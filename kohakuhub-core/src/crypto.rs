// Copyright 2025 KohakuHub Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Token cryptography.
//!
//! Three concerns live here:
//! - symmetric encryption of stored upstream tokens (AES-256-CBC with an
//!   HMAC-SHA256 tag, key derived from `DATABASE_KEY`),
//! - one-way hashing of API tokens at rest (SHA3-512, constant-time
//!   comparison),
//! - masking for display.
//!
//! Plaintext tokens never appear in logs or responses.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use sha3::Sha3_512;
use subtle::ConstantTimeEq;

use crate::error::{HubError, Result};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

const VERSION_BYTE: u8 = 0x80;
const IV_LEN: usize = 16;
const TAG_LEN: usize = 32;

/// Symmetric cipher for tokens at rest, keyed from `DATABASE_KEY`.
#[derive(Clone)]
pub struct TokenCipher {
    enc_key: [u8; 32],
    mac_key: [u8; 32],
}

impl TokenCipher {
    /// Derive the encryption and signing keys from the configured
    /// database key. Any non-empty string works; `openssl rand -hex 32`
    /// is the recommended source.
    pub fn new(database_key: &str) -> Result<Self> {
        if database_key.is_empty() {
            return Err(HubError::Internal(
                "DATABASE_KEY not configured; set KOHAKU_HUB_DATABASE_KEY (generate with: openssl rand -hex 32)"
                    .into(),
            ));
        }
        let root: [u8; 32] = Sha256::digest(database_key.as_bytes()).into();
        let enc_key: [u8; 32] = Sha256::new()
            .chain_update(root)
            .chain_update(b"encrypt")
            .finalize()
            .into();
        let mac_key: [u8; 32] = Sha256::new()
            .chain_update(root)
            .chain_update(b"sign")
            .finalize()
            .into();
        Ok(Self { enc_key, mac_key })
    }

    /// Encrypt a token. Empty input encrypts to the empty string so that
    /// "no token" round-trips cleanly through the database.
    pub fn encrypt(&self, token: &str) -> Result<String> {
        if token.is_empty() {
            return Ok(String::new());
        }

        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let ciphertext = Aes256CbcEnc::new(&self.enc_key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(token.as_bytes());

        let mut blob = Vec::with_capacity(1 + IV_LEN + ciphertext.len() + TAG_LEN);
        blob.push(VERSION_BYTE);
        blob.extend_from_slice(&iv);
        blob.extend_from_slice(&ciphertext);

        let mut mac = HmacSha256::new_from_slice(&self.mac_key)
            .map_err(|e| HubError::Internal(format!("HMAC init failed: {e}")))?;
        mac.update(&blob);
        blob.extend_from_slice(&mac.finalize().into_bytes());

        Ok(URL_SAFE.encode(blob))
    }

    /// Decrypt a token produced by [`TokenCipher::encrypt`].
    pub fn decrypt(&self, encrypted: &str) -> Result<String> {
        if encrypted.is_empty() {
            return Ok(String::new());
        }

        let blob = URL_SAFE
            .decode(encrypted)
            .map_err(|_| HubError::Internal("Failed to decrypt token: invalid encoding".into()))?;

        if blob.len() < 1 + IV_LEN + TAG_LEN || blob[0] != VERSION_BYTE {
            return Err(HubError::Internal(
                "Failed to decrypt token: malformed payload".into(),
            ));
        }

        let (signed, tag) = blob.split_at(blob.len() - TAG_LEN);
        let mut mac = HmacSha256::new_from_slice(&self.mac_key)
            .map_err(|e| HubError::Internal(format!("HMAC init failed: {e}")))?;
        mac.update(signed);
        mac.verify_slice(tag).map_err(|_| {
            HubError::Internal("Failed to decrypt token: invalid token or wrong key".into())
        })?;

        let iv: [u8; IV_LEN] = signed[1..1 + IV_LEN]
            .try_into()
            .map_err(|_| HubError::Internal("Failed to decrypt token: malformed payload".into()))?;
        let plaintext = Aes256CbcDec::new(&self.enc_key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&signed[1 + IV_LEN..])
            .map_err(|_| HubError::Internal("Failed to decrypt token: bad padding".into()))?;

        String::from_utf8(plaintext)
            .map_err(|_| HubError::Internal("Failed to decrypt token: not utf-8".into()))
    }
}

/// SHA3-512 hex digest used for API tokens at rest.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha3_512::digest(token.as_bytes()))
}

/// Constant-time equality for token hashes.
pub fn verify_token_hash(token: &str, stored_hash: &str) -> bool {
    let computed = hash_token(token);
    if computed.len() != stored_hash.len() {
        return false;
    }
    computed.as_bytes().ct_eq(stored_hash.as_bytes()).into()
}

/// Constant-time string equality for shared secrets (admin token).
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Random URL-safe token (hex, `bytes * 2` chars).
pub fn generate_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Mask a token for display: first `show_chars` characters plus `***`.
pub fn mask_token(token: &str, show_chars: usize) -> String {
    if token.is_empty() {
        return String::new();
    }
    if token.len() <= show_chars {
        return "***".to_string();
    }
    format!("{}***", &token[..show_chars])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let cipher = TokenCipher::new("0123abcd").unwrap();
        let token = "hf_abcdefgh123456";
        let encrypted = cipher.encrypt(token).unwrap();
        assert_ne!(encrypted, token);
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), token);
    }

    #[test]
    fn empty_token_round_trips_empty() {
        let cipher = TokenCipher::new("k").unwrap();
        assert_eq!(cipher.encrypt("").unwrap(), "");
        assert_eq!(cipher.decrypt("").unwrap(), "");
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let a = TokenCipher::new("key-a").unwrap();
        let b = TokenCipher::new("key-b").unwrap();
        let encrypted = a.encrypt("secret").unwrap();
        assert!(b.decrypt(&encrypted).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails_mac() {
        let cipher = TokenCipher::new("k").unwrap();
        let encrypted = cipher.encrypt("secret").unwrap();
        let mut blob = URL_SAFE.decode(&encrypted).unwrap();
        blob[20] ^= 0x01;
        assert!(cipher.decrypt(&URL_SAFE.encode(blob)).is_err());
    }

    #[test]
    fn missing_key_is_an_error() {
        assert!(TokenCipher::new("").is_err());
    }

    #[test]
    fn token_hash_verifies_constant_time() {
        let token = "kh_sometoken";
        let stored = hash_token(token);
        assert!(verify_token_hash(token, &stored));
        assert!(!verify_token_hash("kh_other", &stored));
        assert!(!verify_token_hash(token, "short"));
    }

    #[test]
    fn masking() {
        assert_eq!(mask_token("hf_abcdefgh123456", 4), "hf_a***");
        assert_eq!(mask_token("ab", 4), "***");
        assert_eq!(mask_token("", 4), "");
    }

    #[test]
    fn generated_tokens_are_distinct() {
        assert_ne!(generate_token(24), generate_token(24));
        assert_eq!(generate_token(24).len(), 48);
    }
}
