//! Connection-handshake cryptography: a per-connection RSA-2048 keypair
//! wraps a per-connection AES-256-CBC session key, after which every frame
//! on that socket is AES-encrypted and base64-encoded (§4.2).

pub mod aes;
pub mod error;
pub mod rsa;

pub use error::CryptoError;
pub use rsa::RsaKeypair;
