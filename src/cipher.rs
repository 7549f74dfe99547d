//! Reversible encryption for the stored service-account secret.
//!
//! Two formats coexist:
//!
//! | Scheme       | Stored form                           | Notes                                  |
//! |--------------|---------------------------------------|----------------------------------------|
//! | `legacy-cbc` | `base64(ciphertext)`                  | AES-256-CBC, PKCS#7, all-zero IV       |
//! | `aes-gcm`    | `v2:base64(salt):base64(nonce):base64(ct)` | Argon2id key per record, random nonce |
//!
//! The configured scheme decides how new secrets are written. Decryption looks
//! at the stored form, so a deployment can switch to `aes-gcm` and keep reading
//! old records until they are re-encrypted.
//!
//! The legacy scheme is deterministic: the same secret under the same key always
//! produces the same ciphertext. It is kept as the default so existing records
//! stay readable.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Result};
use argon2::{password_hash::SaltString, Argon2};
use base64::{engine::general_purpose, Engine as _};
use rand::RngCore;
use std::fmt;
use std::str::FromStr;
use tracing::warn;
use zeroize::Zeroizing;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Key string used when none is configured.
pub const DEFAULT_KEY: &str = "PCGroupCloning2025DefaultKey32Char";

const KEY_LEN: usize = 32;
const LEGACY_IV: [u8; 16] = [0u8; 16];
const V2_PREFIX: &str = "v2:";

/// How newly written secrets are encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CipherScheme {
    #[default]
    LegacyCbc,
    AesGcm,
}

impl fmt::Display for CipherScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CipherScheme::LegacyCbc => write!(f, "legacy-cbc"),
            CipherScheme::AesGcm => write!(f, "aes-gcm"),
        }
    }
}

impl FromStr for CipherScheme {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy-cbc" | "legacy" | "cbc" => Ok(CipherScheme::LegacyCbc),
            "aes-gcm" | "gcm" | "v2" => Ok(CipherScheme::AesGcm),
            other => Err(format!("unknown cipher scheme '{}'", other)),
        }
    }
}

/// Symmetric cipher keyed from a configured string.
pub struct SymmetricCipher {
    key: Zeroizing<[u8; KEY_LEN]>,
    scheme: CipherScheme,
}

impl fmt::Debug for SymmetricCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricCipher")
            .field("key", &"[REDACTED]")
            .field("scheme", &self.scheme)
            .finish()
    }
}

/// Pads the key string's UTF-8 bytes with spaces, or truncates them, to 32 bytes.
///
/// Matches padding the string to 32 characters and keeping the first 32 bytes
/// of its encoding, so multi-byte keys derive the same prefix either way.
fn derive_fixed_key(key: &str) -> Zeroizing<[u8; KEY_LEN]> {
    let mut out = Zeroizing::new([b' '; KEY_LEN]);
    let bytes = key.as_bytes();
    let n = bytes.len().min(KEY_LEN);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

impl SymmetricCipher {
    pub fn new(key: &str, scheme: CipherScheme) -> Self {
        Self {
            key: derive_fixed_key(key),
            scheme,
        }
    }

    pub fn scheme(&self) -> CipherScheme {
        self.scheme
    }

    /// Encrypts with the configured scheme. Empty input yields empty output.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }
        match self.scheme {
            CipherScheme::LegacyCbc => Ok(self.encrypt_legacy(plaintext)),
            CipherScheme::AesGcm => self.encrypt_v2(plaintext),
        }
    }

    /// Decrypts either stored form. Any failure (bad encoding, wrong key,
    /// tampering) yields an empty string, which surfaces downstream as a
    /// rejected bind rather than a crash.
    pub fn decrypt(&self, ciphertext: &str) -> String {
        match self.try_decrypt(ciphertext) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!("Secret decryption failed: {}", e);
                String::new()
            }
        }
    }

    /// Decrypts, reporting the reason on failure.
    pub fn try_decrypt(&self, ciphertext: &str) -> Result<String> {
        if ciphertext.is_empty() {
            return Ok(String::new());
        }
        match ciphertext.strip_prefix(V2_PREFIX) {
            Some(rest) => self.decrypt_v2(rest),
            None => self.decrypt_legacy(ciphertext),
        }
    }

    /// Whether a stored value was written with a scheme other than the configured one.
    pub fn needs_reencryption(&self, ciphertext: &str) -> bool {
        if ciphertext.is_empty() {
            return false;
        }
        let is_v2 = ciphertext.starts_with(V2_PREFIX);
        match self.scheme {
            CipherScheme::LegacyCbc => is_v2,
            CipherScheme::AesGcm => !is_v2,
        }
    }

    fn encrypt_legacy(&self, plaintext: &str) -> String {
        let ct = Aes256CbcEnc::new(&(*self.key).into(), &LEGACY_IV.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        general_purpose::STANDARD.encode(ct)
    }

    fn decrypt_legacy(&self, ciphertext: &str) -> Result<String> {
        let ct = general_purpose::STANDARD
            .decode(ciphertext.trim())
            .map_err(|e| anyhow!("Failed to decode ciphertext: {}", e))?;
        let pt = Aes256CbcDec::new(&(*self.key).into(), &LEGACY_IV.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ct)
            .map_err(|_| anyhow!("Invalid padding (wrong key or corrupted data)"))?;
        String::from_utf8(pt).map_err(|e| anyhow!("Invalid UTF-8 in decrypted secret: {}", e))
    }

    fn derive_record_key(&self, salt: &SaltString) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        let mut key_bytes = Zeroizing::new([0u8; KEY_LEN]);
        Argon2::default()
            .hash_password_into(&*self.key, salt.as_str().as_bytes(), &mut *key_bytes)
            .map_err(|e| anyhow!("Key derivation failed: {}", e))?;
        Ok(key_bytes)
    }

    fn encrypt_v2(&self, plaintext: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let key_bytes = self.derive_record_key(&salt)?;
        let cipher = Aes256Gcm::new_from_slice(&*key_bytes)
            .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        Ok(format!(
            "{}{}:{}:{}",
            V2_PREFIX,
            general_purpose::STANDARD.encode(salt.as_str()),
            general_purpose::STANDARD.encode(nonce_bytes),
            general_purpose::STANDARD.encode(&ciphertext)
        ))
    }

    fn decrypt_v2(&self, encoded: &str) -> Result<String> {
        let parts: Vec<&str> = encoded.split(':').collect();
        if parts.len() != 3 {
            return Err(anyhow!("Invalid encrypted secret format"));
        }

        let salt_str = general_purpose::STANDARD
            .decode(parts[0])
            .map_err(|e| anyhow!("Failed to decode salt: {}", e))?;
        let salt = SaltString::from_b64(&String::from_utf8(salt_str)?)
            .map_err(|e| anyhow!("Invalid salt format: {}", e))?;

        let nonce_bytes = general_purpose::STANDARD
            .decode(parts[1])
            .map_err(|e| anyhow!("Failed to decode nonce: {}", e))?;
        if nonce_bytes.len() != 12 {
            return Err(anyhow!("Invalid nonce length {}", nonce_bytes.len()));
        }
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = general_purpose::STANDARD
            .decode(parts[2])
            .map_err(|e| anyhow!("Failed to decode ciphertext: {}", e))?;

        let key_bytes = self.derive_record_key(&salt)?;
        let cipher = Aes256Gcm::new_from_slice(&*key_bytes)
            .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

        let plaintext = cipher
            .decrypt(nonce, ciphertext.as_ref())
            .map_err(|e| anyhow!("Decryption failed: {}", e))?;

        String::from_utf8(plaintext)
            .map_err(|e| anyhow!("Invalid UTF-8 in decrypted secret: {}", e))
    }
}
