use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;

/// Ed25519 keypair used for node identity, header signatures and ECDH.
#[derive(Clone)]
pub struct SigningKeypair {
    pub signing_key: SigningKey,
}

impl SigningKeypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        SigningKeypair {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Rebuild a keypair from the 32-byte secret seed.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        SigningKeypair {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

impl std::fmt::Debug for SigningKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never expose the secret half
        f.debug_struct("SigningKeypair")
            .field("public_key", &hex_prefix(&self.public_key_bytes()))
            .finish()
    }
}

fn hex_prefix(bytes: &[u8; 32]) -> String {
    bytes[..4].iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_secret_bytes_is_deterministic() {
        let keypair = SigningKeypair::generate();
        let restored = SigningKeypair::from_secret_bytes(&keypair.secret_key_bytes());
        assert_eq!(keypair.public_key_bytes(), restored.public_key_bytes());
    }

    #[test]
    fn test_generate_distinct_keys() {
        let a = SigningKeypair::generate();
        let b = SigningKeypair::generate();
        assert_ne!(a.public_key_bytes(), b.public_key_bytes());
    }

    #[test]
    fn test_debug_does_not_leak_secret() {
        let keypair = SigningKeypair::generate();
        let debug = format!("{:?}", keypair);
        let secret_hex: String = keypair
            .secret_key_bytes()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        assert!(!debug.contains(&secret_hex));
    }
}
