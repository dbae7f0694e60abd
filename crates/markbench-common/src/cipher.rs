//! Registry URL Cipher
//!
//! Endpoint URLs in a published registry may be obfuscated so that private
//! backends are not advertised in plain text. This module implements the
//! passphrase-based string cipher used for that.
//!
//! # Format
//!
//! ```text
//! base64( salt[16] || iv[16] || AES-128-CBC-PKCS7(utf8(plaintext)) )
//! ```
//!
//! The key is derived with PBKDF2-HMAC-SHA1 (1000 iterations, 16 bytes) from
//! the passphrase and the salt. Salt and IV are random for every encryption,
//! so encrypting the same string twice gives different ciphertexts.
//!
//! # Example
//!
//! ```
//! use markbench_common::cipher::StringCipher;
//!
//! let secret = StringCipher::encrypt("https://backend.example/render", "passphrase").unwrap();
//! let plain = StringCipher::decrypt(&secret, "passphrase").unwrap();
//! assert_eq!(plain, "https://backend.example/render");
//! ```

use aes::Aes128;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use sha1::Sha1;

use crate::protocol::error::{MarkbenchError, Result};

/// Size of the AES key in bytes.
const KEY_SIZE: usize = 16;

/// Size of the random salt prefix in bytes.
const SALT_SIZE: usize = 16;

/// Size of the CBC initialization vector in bytes.
const IV_SIZE: usize = 16;

/// PBKDF2 iteration count.
const DERIVATION_ITERATIONS: u32 = 1000;

type Encryptor = cbc::Encryptor<Aes128>;
type Decryptor = cbc::Decryptor<Aes128>;

/// Passphrase-based string encryption for registry URLs.
pub struct StringCipher;

impl StringCipher {
    /// Encrypts `plaintext` with a key derived from `passphrase`.
    ///
    /// # Arguments
    ///
    /// * `plaintext` - Any UTF-8 string, including the empty string
    /// * `passphrase` - The registry passphrase
    ///
    /// # Returns
    ///
    /// The base64 ciphertext
    pub fn encrypt(plaintext: &str, passphrase: &str) -> Result<String> {
        let mut salt = [0u8; SALT_SIZE];
        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut iv);

        let key = derive_key(passphrase, &salt);
        let encryptor = Encryptor::new_from_slices(&key, &iv)
            .map_err(|e| MarkbenchError::Cipher(format!("Invalid key material: {}", e)))?;
        let body = encryptor.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        let mut out = Vec::with_capacity(SALT_SIZE + IV_SIZE + body.len());
        out.extend_from_slice(&salt);
        out.extend_from_slice(&iv);
        out.extend_from_slice(&body);
        Ok(STANDARD.encode(out))
    }

    /// Decrypts a ciphertext produced by [`StringCipher::encrypt`].
    ///
    /// A wrong passphrase almost always fails the padding check. When it
    /// happens to pass, the output is garbage and usually not UTF-8; it never
    /// equals the original plaintext.
    ///
    /// # Errors
    ///
    /// Returns `MarkbenchError::Cipher` on invalid base64, input too short to
    /// hold salt, IV and one block, a padding failure or non-UTF-8 output.
    pub fn decrypt(ciphertext: &str, passphrase: &str) -> Result<String> {
        let raw = STANDARD
            .decode(ciphertext.trim())
            .map_err(|e| MarkbenchError::Cipher(format!("Invalid base64: {}", e)))?;

        if raw.len() < SALT_SIZE + IV_SIZE + 16 {
            return Err(MarkbenchError::Cipher(format!(
                "Ciphertext too short ({} bytes)",
                raw.len()
            )));
        }

        let (salt, rest) = raw.split_at(SALT_SIZE);
        let (iv, body) = rest.split_at(IV_SIZE);

        let key = derive_key(passphrase, salt);
        let decryptor = Decryptor::new_from_slices(&key, iv)
            .map_err(|e| MarkbenchError::Cipher(format!("Invalid key material: {}", e)))?;
        let plain = decryptor
            .decrypt_padded_vec_mut::<Pkcs7>(body)
            .map_err(|_| MarkbenchError::Cipher("Decryption failed (wrong passphrase?)".into()))?;

        String::from_utf8(plain)
            .map_err(|_| MarkbenchError::Cipher("Decrypted value is not valid UTF-8".into()))
    }
}

fn derive_key(passphrase: &str, salt: &[u8]) -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha1>(passphrase.as_bytes(), salt, DERIVATION_ITERATIONS, &mut key);
    key
}
