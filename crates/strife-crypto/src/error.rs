use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("RSA key generation failed: {0}")]
    KeyGeneration(rsa::Error),

    #[error("invalid PEM-encoded public key")]
    InvalidPublicKeyPem,

    #[error("RSA encryption failed: {0}")]
    RsaEncrypt(rsa::Error),

    #[error("RSA decryption failed: {0}")]
    RsaDecrypt(rsa::Error),

    #[error("AES ciphertext is shorter than the {0}-byte IV")]
    CiphertextTooShort(usize),

    #[error("AES-CBC decryption or padding failed")]
    AesDecrypt,

    #[error("base64 payload is malformed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("decrypted plaintext is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}
