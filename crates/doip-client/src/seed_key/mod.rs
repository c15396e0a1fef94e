//! Security access seed-key derivation
//!
//! Derivation is a pure function of `(level, model, seed)`. The transform
//! itself is vehicle-specific and supplied from outside as a
//! [`SeedKeyAlgorithm`] registered per `(model, level)`.
//!
//! # Example
//!
//! ```
//! use doip_client::seed_key::{EcuModel, SeedKeyRegistry, XorSecret, SEED_LEN};
//!
//! let mut registry = SeedKeyRegistry::new();
//! registry.register(EcuModel::D31L, 1, XorSecret::new(vec![0xA5]).unwrap()).unwrap();
//!
//! let key = registry.decrypt_seed(1, EcuModel::D31L as u8, &[0u8; SEED_LEN]).unwrap();
//! assert_eq!(key, vec![0xA5; SEED_LEN]);
//! ```

mod algorithms;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tracing::debug;

use crate::config::{KeyAlgorithm, SecurityConfig};
use crate::error::ClientError;

pub use algorithms::{Sha256Digest, XorSecret};

/// Seeds issued by the supported ECUs are always 16 bytes
pub const SEED_LEN: usize = 16;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SeedKeyError {
    #[error("Seed must be {expected} bytes, got {actual}")]
    InvalidSeedLength { expected: usize, actual: usize },

    #[error("Unknown ECU model {0}")]
    UnknownModel(String),

    #[error("Security level 0x{0:02X} is not a requestSeed level")]
    InvalidLevel(u8),

    #[error("No seed-key algorithm registered for {model} level 0x{level:02X}")]
    NoAlgorithm { model: EcuModel, level: u8 },

    #[error("Invalid secret: {0}")]
    InvalidSecret(String),
}

impl From<SeedKeyError> for ClientError {
    fn from(err: SeedKeyError) -> Self {
        ClientError::InvalidArgument(err.to_string())
    }
}

/// ECU model selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EcuModel {
    D31L = 1,
    D31F25 = 2,
    D31L24 = 3,
    D21L = 4,
    D31H = 5,
    D31X = 6,
}

impl EcuModel {
    pub const ALL: [EcuModel; 6] = [
        Self::D31L,
        Self::D31F25,
        Self::D31L24,
        Self::D21L,
        Self::D31H,
        Self::D31X,
    ];

    pub fn short_name(self) -> &'static str {
        match self {
            Self::D31L => "D31L",
            Self::D31F25 => "D31F25",
            Self::D31L24 => "D31L24",
            Self::D21L => "D21L",
            Self::D31H => "D31H",
            Self::D31X => "D31X",
        }
    }
}

impl fmt::Display for EcuModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl TryFrom<u8> for EcuModel {
    type Error = SeedKeyError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|model| *model as u8 == value)
            .ok_or_else(|| SeedKeyError::UnknownModel(value.to_string()))
    }
}

impl FromStr for EcuModel {
    type Err = SeedKeyError;

    /// Case-insensitive short name, surrounding whitespace ignored
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|model| model.short_name() == name)
            .ok_or_else(|| SeedKeyError::UnknownModel(s.to_string()))
    }
}

/// requestSeed sub-functions are the odd values 0x01..=0x41 (ISO 14229-1)
pub fn is_seed_level(level: u8) -> bool {
    level % 2 == 1 && level <= 0x41
}

/// A vehicle-specific seed to key transform
pub trait SeedKeyAlgorithm: Send + Sync {
    fn name(&self) -> &'static str;

    /// Derive the key for `seed`. Must be deterministic.
    fn derive_key(&self, level: u8, seed: &[u8; SEED_LEN]) -> Vec<u8>;
}

/// Seed-key algorithms keyed by `(model, level)`
#[derive(Clone, Default)]
pub struct SeedKeyRegistry {
    algorithms: HashMap<(EcuModel, u8), Arc<dyn SeedKeyAlgorithm>>,
}

impl fmt::Debug for SeedKeyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<_> = self
            .algorithms
            .iter()
            .map(|((model, level), algo)| (model.short_name(), *level, algo.name()))
            .collect();
        entries.sort();
        f.debug_struct("SeedKeyRegistry")
            .field("algorithms", &entries)
            .finish()
    }
}

impl SeedKeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configured secrets
    pub fn from_config(config: &SecurityConfig) -> Result<Self, SeedKeyError> {
        let mut registry = Self::new();
        for entry in &config.keys {
            let model: EcuModel = entry.model.parse()?;
            let secret = hex::decode(entry.secret.trim())
                .map_err(|e| SeedKeyError::InvalidSecret(format!("{}: {}", entry.model, e)))?;
            match entry.algorithm {
                KeyAlgorithm::Xor => {
                    registry.register(model, entry.level, XorSecret::new(secret)?)?
                }
                KeyAlgorithm::Sha256 => {
                    registry.register(model, entry.level, Sha256Digest::new(secret)?)?
                }
            }
        }
        Ok(registry)
    }

    /// Register `algorithm` for `(model, level)`, replacing any previous one
    pub fn register(
        &mut self,
        model: EcuModel,
        level: u8,
        algorithm: impl SeedKeyAlgorithm + 'static,
    ) -> Result<(), SeedKeyError> {
        if !is_seed_level(level) {
            return Err(SeedKeyError::InvalidLevel(level));
        }
        self.algorithms.insert((model, level), Arc::new(algorithm));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.algorithms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.algorithms.is_empty()
    }

    /// Derive the key answering `seed` for `level` on `model`
    pub fn decrypt_seed(&self, level: u8, model: u8, seed: &[u8]) -> Result<Vec<u8>, SeedKeyError> {
        let seed: &[u8; SEED_LEN] =
            seed.try_into()
                .map_err(|_| SeedKeyError::InvalidSeedLength {
                    expected: SEED_LEN,
                    actual: seed.len(),
                })?;
        let model = EcuModel::try_from(model)?;
        if !is_seed_level(level) {
            return Err(SeedKeyError::InvalidLevel(level));
        }

        let algorithm = self
            .algorithms
            .get(&(model, level))
            .ok_or(SeedKeyError::NoAlgorithm { model, level })?;

        debug!(%model, level, algorithm = algorithm.name(), "Deriving security key");
        Ok(algorithm.derive_key(level, seed))
    }
}

static REGISTRY: OnceLock<SeedKeyRegistry> = OnceLock::new();

/// Install the process-wide registry used by [`decrypt_seed`].
///
/// Only the first call takes effect; returns whether this call installed it.
pub fn install(registry: SeedKeyRegistry) -> bool {
    REGISTRY.set(registry).is_ok()
}

/// Derive a key with the process-wide registry.
///
/// Fails with `InvalidArgument` until [`install`] has been called.
pub fn decrypt_seed(level: u8, model: u8, seed: &[u8]) -> Result<Vec<u8>, ClientError> {
    let registry = REGISTRY.get().ok_or_else(|| {
        ClientError::InvalidArgument("no seed-key registry installed".to_string())
    })?;
    Ok(registry.decrypt_seed(level, model, seed)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecretKeyConfig;
    use crate::error::ErrorCode;
    use pretty_assertions::assert_eq;

    fn seed() -> [u8; SEED_LEN] {
        [
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD,
            0xEE, 0xFF,
        ]
    }

    fn registry() -> SeedKeyRegistry {
        SeedKeyRegistry::from_config(&SecurityConfig {
            keys: vec![
                SecretKeyConfig {
                    model: "d31l".to_string(),
                    level: 1,
                    algorithm: KeyAlgorithm::Xor,
                    secret: "ff00".to_string(),
                },
                SecretKeyConfig {
                    model: "D31X".to_string(),
                    level: 3,
                    algorithm: KeyAlgorithm::Sha256,
                    secret: "c0ffee".to_string(),
                },
            ],
        })
        .unwrap()
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let registry = registry();
        for (level, model) in [(1, EcuModel::D31L), (3, EcuModel::D31X)] {
            let first = registry.decrypt_seed(level, model as u8, &seed()).unwrap();
            let second = registry.decrypt_seed(level, model as u8, &seed()).unwrap();
            assert_eq!(first, second);
            assert_eq!(first.len(), SEED_LEN);
        }
    }

    #[test]
    fn test_xor_secret_key() {
        let key = registry()
            .decrypt_seed(1, EcuModel::D31L as u8, &seed())
            .unwrap();
        assert_eq!(&key[..4], &[0xFF, 0x11, 0xDD, 0x33]);
    }

    #[test]
    fn test_wrong_seed_length_rejected() {
        let registry = registry();
        for len in [0, 4, 15, 17, 32] {
            let err = registry
                .decrypt_seed(1, EcuModel::D31L as u8, &vec![0u8; len])
                .unwrap_err();
            assert_eq!(
                err,
                SeedKeyError::InvalidSeedLength {
                    expected: SEED_LEN,
                    actual: len
                }
            );
            assert_eq!(ClientError::from(err).code(), ErrorCode::InvalidArgument);
        }
    }

    #[test]
    fn test_unknown_model_and_level_rejected() {
        let registry = registry();
        assert!(matches!(
            registry.decrypt_seed(1, 0, &seed()),
            Err(SeedKeyError::UnknownModel(_))
        ));
        assert!(matches!(
            registry.decrypt_seed(1, 7, &seed()),
            Err(SeedKeyError::UnknownModel(_))
        ));
        assert_eq!(
            registry.decrypt_seed(2, EcuModel::D31L as u8, &seed()),
            Err(SeedKeyError::InvalidLevel(2))
        );
        assert_eq!(
            registry.decrypt_seed(5, EcuModel::D31L as u8, &seed()),
            Err(SeedKeyError::NoAlgorithm {
                model: EcuModel::D31L,
                level: 5
            })
        );
    }

    #[test]
    fn test_model_names() {
        assert_eq!(" d31f25 ".parse::<EcuModel>().unwrap(), EcuModel::D31F25);
        assert_eq!(EcuModel::try_from(4).unwrap(), EcuModel::D21L);
        assert!("D99".parse::<EcuModel>().is_err());
        assert_eq!(EcuModel::D31L24.to_string(), "D31L24");
    }

    #[test]
    fn test_invalid_secret_rejected() {
        let err = SeedKeyRegistry::from_config(&SecurityConfig {
            keys: vec![SecretKeyConfig {
                model: "D31H".to_string(),
                level: 1,
                algorithm: KeyAlgorithm::Xor,
                secret: "zz".to_string(),
            }],
        })
        .unwrap_err();
        assert!(matches!(err, SeedKeyError::InvalidSecret(_)));
    }
}
