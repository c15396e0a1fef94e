//! Process-wide seed-key registry
//!
//! Kept in its own test binary so nothing else installs the registry first.

use doip_client::seed_key::{self, XorSecret, SEED_LEN};
use doip_client::{decrypt_seed, EcuModel, ErrorCode, SeedKeyRegistry};
use pretty_assertions::assert_eq;

#[test]
fn test_install_then_derive() {
    let seed = [0x5A; SEED_LEN];

    let err = decrypt_seed(1, EcuModel::D31L as u8, &seed).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    let mut registry = SeedKeyRegistry::new();
    registry
        .register(EcuModel::D31L, 1, XorSecret::new(vec![0xFF]).unwrap())
        .unwrap();
    assert!(seed_key::install(registry));

    let key = decrypt_seed(1, EcuModel::D31L as u8, &seed).unwrap();
    assert_eq!(key, vec![0xA5; SEED_LEN]);

    // The first registry stays in place
    assert!(!seed_key::install(SeedKeyRegistry::new()));
    let err = decrypt_seed(3, EcuModel::D31L as u8, &seed).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
    assert!(decrypt_seed(1, EcuModel::D31L as u8, &seed).is_ok());
}
