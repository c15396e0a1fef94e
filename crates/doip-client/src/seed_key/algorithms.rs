//! Built-in seed-key transforms driven by a configured secret

use sha2::{Digest, Sha256};

use super::{SeedKeyAlgorithm, SeedKeyError, SEED_LEN};

/// Key byte `i` is `seed[i] ^ secret[i % secret.len()]`
#[derive(Clone)]
pub struct XorSecret {
    secret: Vec<u8>,
}

impl XorSecret {
    pub fn new(secret: Vec<u8>) -> Result<Self, SeedKeyError> {
        if secret.is_empty() {
            return Err(SeedKeyError::InvalidSecret("secret is empty".to_string()));
        }
        Ok(Self { secret })
    }
}

impl SeedKeyAlgorithm for XorSecret {
    fn name(&self) -> &'static str {
        "xor"
    }

    fn derive_key(&self, _level: u8, seed: &[u8; SEED_LEN]) -> Vec<u8> {
        seed.iter()
            .enumerate()
            .map(|(i, b)| b ^ self.secret[i % self.secret.len()])
            .collect()
    }
}

/// Key is the first 16 bytes of `SHA-256(secret || level || seed)`
#[derive(Clone)]
pub struct Sha256Digest {
    secret: Vec<u8>,
}

impl Sha256Digest {
    pub fn new(secret: Vec<u8>) -> Result<Self, SeedKeyError> {
        if secret.is_empty() {
            return Err(SeedKeyError::InvalidSecret("secret is empty".to_string()));
        }
        Ok(Self { secret })
    }
}

impl SeedKeyAlgorithm for Sha256Digest {
    fn name(&self) -> &'static str {
        "sha256"
    }

    fn derive_key(&self, level: u8, seed: &[u8; SEED_LEN]) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(&self.secret);
        hasher.update([level]);
        hasher.update(seed);
        hasher.finalize()[..SEED_LEN].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xor_wraps_short_secret() {
        let algo = XorSecret::new(vec![0x01, 0x02, 0x03]).unwrap();
        let key = algo.derive_key(1, &[0u8; SEED_LEN]);
        assert_eq!(
            key,
            vec![1, 2, 3, 1, 2, 3, 1, 2, 3, 1, 2, 3, 1, 2, 3, 1]
        );
    }

    #[test]
    fn test_sha256_depends_on_level() {
        let algo = Sha256Digest::new(b"vehicle".to_vec()).unwrap();
        let seed = [0x5Au8; SEED_LEN];
        let l1 = algo.derive_key(1, &seed);
        let l3 = algo.derive_key(3, &seed);
        assert_eq!(l1.len(), SEED_LEN);
        assert_ne!(l1, l3);
        assert_eq!(l1, algo.derive_key(1, &seed));
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(XorSecret::new(Vec::new()).is_err());
        assert!(Sha256Digest::new(Vec::new()).is_err());
    }
}
