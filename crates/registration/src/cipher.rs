//! Field-level encryption for targets that want sensitive form fields sealed.
//!
//! Envelopes are interchangeable with `openssl enc -aes-256-cbc -md md5 -a`:
//! base64 of `"Salted__" || salt || ciphertext`, with key and IV derived from the
//! passphrase by MD5-based `EVP_BytesToKey` (one iteration).

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use md5::{Digest, Md5};
use rand::RngCore;
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const MAGIC: &[u8; 8] = b"Salted__";
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const BLOCK: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("envelope is not valid base64: {0}")]
    Base64(String),

    #[error("envelope has no Salted__ header")]
    MissingHeader,

    #[error("ciphertext length {0} is not a positive multiple of the block size")]
    InvalidLength(usize),

    #[error("wrong key or corrupt ciphertext")]
    BadPadding,

    #[error("plaintext is not UTF-8")]
    InvalidUtf8,
}

/// Stateless encoder bound to one pre-shared passphrase
#[derive(Clone)]
pub struct FieldCipher {
    passphrase: Vec<u8>,
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCipher").finish_non_exhaustive()
    }
}

impl FieldCipher {
    pub fn new(passphrase: impl AsRef<[u8]>) -> Self {
        Self { passphrase: passphrase.as_ref().to_vec() }
    }

    /// Encrypt with a fresh random salt
    pub fn encode(&self, plaintext: &str) -> String {
        let mut salt = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut salt);
        self.encode_with_salt(plaintext, &salt)
    }

    pub fn encode_with_salt(&self, plaintext: &str, salt: &[u8; 8]) -> String {
        let (key, iv) = derive_key_iv(&self.passphrase, salt);
        let ciphertext =
            Aes256CbcEnc::new(&key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        let mut envelope = Vec::with_capacity(16 + ciphertext.len());
        envelope.extend_from_slice(MAGIC);
        envelope.extend_from_slice(salt);
        envelope.extend_from_slice(&ciphertext);
        STANDARD.encode(envelope)
    }

    pub fn decode(&self, envelope: &str) -> Result<String, CipherError> {
        let compact: String = envelope.chars().filter(|c| !c.is_whitespace()).collect();
        let raw = STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| CipherError::Base64(e.to_string()))?;

        if raw.len() < 16 || &raw[..8] != MAGIC {
            return Err(CipherError::MissingHeader);
        }
        let mut salt = [0u8; 8];
        salt.copy_from_slice(&raw[8..16]);
        let ciphertext = &raw[16..];
        if ciphertext.is_empty() || ciphertext.len() % BLOCK != 0 {
            return Err(CipherError::InvalidLength(ciphertext.len()));
        }

        let (key, iv) = derive_key_iv(&self.passphrase, &salt);
        let plaintext = Aes256CbcDec::new(&key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CipherError::BadPadding)?;
        String::from_utf8(plaintext).map_err(|_| CipherError::InvalidUtf8)
    }
}

/// `D_i = MD5(D_{i-1} || passphrase || salt)`, concatenated until key and IV are filled
pub fn derive_key_iv(passphrase: &[u8], salt: &[u8; 8]) -> ([u8; KEY_LEN], [u8; IV_LEN]) {
    let mut material = Vec::with_capacity(KEY_LEN + IV_LEN + 16);
    let mut prev: Vec<u8> = Vec::new();
    while material.len() < KEY_LEN + IV_LEN {
        let mut hasher = Md5::new();
        hasher.update(&prev);
        hasher.update(passphrase);
        hasher.update(salt);
        prev = hasher.finalize().to_vec();
        material.extend_from_slice(&prev);
    }

    let mut key = [0u8; KEY_LEN];
    let mut iv = [0u8; IV_LEN];
    key.copy_from_slice(&material[..KEY_LEN]);
    iv.copy_from_slice(&material[KEY_LEN..KEY_LEN + IV_LEN]);
    (key, iv)
}
