//! RSA-2048 handshake keys — one per-connection keypair is generated when a
//! channel accepts a new socket, advertised as a PEM public key, and used
//! once to unwrap the client's AES session key.

use rsa::pkcs1::{DecodeRsaPublicKey, EncodeRsaPublicKey, LineEnding};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};

use crate::error::CryptoError;

pub const KEY_BITS: usize = 2048;

pub struct RsaKeypair {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
}

impl RsaKeypair {
    pub fn generate() -> Result<Self, CryptoError> {
        let mut rng = rand::thread_rng();
        let private_key =
            RsaPrivateKey::new(&mut rng, KEY_BITS).map_err(CryptoError::KeyGeneration)?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self { private_key, public_key })
    }

    /// PKCS#1 PEM encoding of the public key, sent to the peer as the first
    /// step of the handshake.
    pub fn public_key_pem(&self) -> Result<String, CryptoError> {
        self.public_key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|_| CryptoError::InvalidPublicKeyPem)
            .map(String::from)
    }

    /// Decrypt a PKCS#1 v1.5-encrypted payload with this keypair's private key.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.private_key
            .decrypt(Pkcs1v15Encrypt, ciphertext)
            .map_err(CryptoError::RsaDecrypt)
    }
}

/// Parse a peer's PKCS#1 PEM public key and encrypt `data` for it.
pub fn encrypt_with_public_key_pem(public_key_pem: &str, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let public_key =
        RsaPublicKey::from_pkcs1_pem(public_key_pem).map_err(|_| CryptoError::InvalidPublicKeyPem)?;
    let mut rng = rand::thread_rng();
    public_key
        .encrypt(&mut rng, Pkcs1v15Encrypt, data)
        .map_err(CryptoError::RsaEncrypt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_short_payload() {
        let keypair = RsaKeypair::generate().unwrap();
        let pem = keypair.public_key_pem().unwrap();
        assert!(pem.starts_with("-----BEGIN RSA PUBLIC KEY-----"));

        let ciphertext = encrypt_with_public_key_pem(&pem, b"deadbeefcafebabe00112233445566aa").unwrap();
        let plaintext = keypair.decrypt(&ciphertext).unwrap();
        assert_eq!(plaintext, b"deadbeefcafebabe00112233445566aa");
    }

    #[test]
    fn malformed_pem_is_rejected() {
        let err = encrypt_with_public_key_pem("not a pem", b"x").unwrap_err();
        assert!(matches!(err, CryptoError::InvalidPublicKeyPem));
    }
}
