use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use thiserror::Error;

/// AES-GCM nonce length in bytes
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes
pub const TAG_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum CipherError {
    #[error("Sealed frame too short: {0} bytes")]
    FrameTooShort(usize),

    #[error("Frame authentication failed")]
    AuthFailed,

    #[error("Seal failed")]
    SealFailed,
}

/// Authenticated frame cipher keyed by a derived shared secret.
///
/// Every sealed frame carries its own random 12-byte nonce:
/// `nonce || ciphertext || tag`. The fresh nonce per frame supplies the
/// per-connection randomness the deterministic ECDH output lacks.
pub struct Cipher {
    inner: Aes256Gcm,
}

impl Cipher {
    pub fn new(key: &[u8; 32]) -> Self {
        Cipher {
            inner: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Encrypt one frame. Output layout: `nonce (12) || ciphertext || tag (16)`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .inner
            .encrypt(nonce, plaintext)
            .map_err(|_| CipherError::SealFailed)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt one frame produced by `seal`.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CipherError> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::FrameTooShort(sealed.len()));
        }
        let nonce = Nonce::from_slice(&sealed[..NONCE_LEN]);
        self.inner
            .decrypt(nonce, &sealed[NONCE_LEN..])
            .map_err(|_| CipherError::AuthFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let cipher = Cipher::new(&[7u8; 32]);
        let sealed = cipher.seal(b"hello miner").unwrap();
        assert_eq!(cipher.open(&sealed).unwrap(), b"hello miner");
    }

    #[test]
    fn test_nonce_is_fresh_per_frame() {
        let cipher = Cipher::new(&[7u8; 32]);
        let a = cipher.seal(b"same plaintext").unwrap();
        let b = cipher.seal(b"same plaintext").unwrap();
        assert_ne!(a, b);
        assert_ne!(&a[..NONCE_LEN], &b[..NONCE_LEN]);
    }

    #[test]
    fn test_tampered_frame_rejected() {
        let cipher = Cipher::new(&[7u8; 32]);
        let mut sealed = cipher.seal(b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(
            cipher.open(&sealed).unwrap_err(),
            CipherError::AuthFailed
        ));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let sealer = Cipher::new(&[7u8; 32]);
        let opener = Cipher::new(&[8u8; 32]);
        let sealed = sealer.seal(b"payload").unwrap();
        assert!(opener.open(&sealed).is_err());
    }

    #[test]
    fn test_short_frame_rejected() {
        let cipher = Cipher::new(&[7u8; 32]);
        assert!(matches!(
            cipher.open(&[0u8; 10]).unwrap_err(),
            CipherError::FrameTooShort(10)
        ));
    }

    #[test]
    fn test_empty_plaintext() {
        let cipher = Cipher::new(&[7u8; 32]);
        let sealed = cipher.seal(b"").unwrap();
        assert_eq!(sealed.len(), NONCE_LEN + TAG_LEN);
        assert_eq!(cipher.open(&sealed).unwrap(), Vec::<u8>::new());
    }
}
