//! AES-256-CBC session encryption, keyed by the 32-character hex token the
//! client generates and ships RSA-wrapped during the handshake (§4.2). The
//! key string's UTF-8 bytes are used directly as the 256-bit AES key — the
//! hex-digest truncation is what produces exactly 32 bytes.

use aes::Aes256;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

pub const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

type CbcEnc = cbc::Encryptor<Aes256>;
type CbcDec = cbc::Decryptor<Aes256>;

/// Generate a random 32-hex-character session key, one per authenticated
/// connection, matching the reference's `sha256(random 32 bytes).hexdigest()[:32]`.
pub fn generate_key() -> String {
    let mut seed = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut seed);
    let digest = Sha256::digest(seed);
    hex_encode(&digest)[..KEY_LEN].to_string()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Encrypt `plaintext` under `key`, returning base64(iv || ciphertext).
pub fn encrypt(key: &str, plaintext: &str) -> Result<String, CryptoError> {
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let ciphertext = CbcEnc::new(key.as_bytes().into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(out))
}

/// Encrypt raw bytes (files, profile pictures) the same way.
pub fn encrypt_bytes(key: &str, plaintext: &[u8]) -> Result<String, CryptoError> {
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let ciphertext = CbcEnc::new(key.as_bytes().into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut out = Vec::with_capacity(IV_LEN + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(out))
}

/// Decrypt a base64(iv || ciphertext) payload into a UTF-8 string.
pub fn decrypt(key: &str, message: &str) -> Result<String, CryptoError> {
    let plaintext = decrypt_bytes(key, message)?;
    String::from_utf8(plaintext).map_err(CryptoError::InvalidUtf8)
}

/// Decrypt a base64(iv || ciphertext) payload into raw bytes.
pub fn decrypt_bytes(key: &str, message: &str) -> Result<Vec<u8>, CryptoError> {
    let raw = BASE64.decode(message)?;
    if raw.len() < IV_LEN {
        return Err(CryptoError::CiphertextTooShort(IV_LEN));
    }
    let (iv, ciphertext) = raw.split_at(IV_LEN);

    CbcDec::new(key.as_bytes().into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::AesDecrypt)
}
