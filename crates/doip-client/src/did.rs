//! Static DID to application category index

use std::fmt;
use std::str::FromStr;

use crate::error::ClientError;

/// Application category owning a data identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AppCategory {
    FdA53 = 0,
    Bcm = 1,
    Vcu = 2,
    Evcc = 3,
    Ota = 4,
    Conn = 5,
    Vnd = 6,
    Aps = 7,
    Tpms = 8,
    Dkc = 9,
    Zev = 10,
    FxnPi = 11,
    Thcm = 12,
    Scp = 13,
    Vmc = 14,
    V2l = 15,
    FdM7 = 16,
}

impl AppCategory {
    pub const ALL: [AppCategory; 17] = [
        Self::FdA53,
        Self::Bcm,
        Self::Vcu,
        Self::Evcc,
        Self::Ota,
        Self::Conn,
        Self::Vnd,
        Self::Aps,
        Self::Tpms,
        Self::Dkc,
        Self::Zev,
        Self::FxnPi,
        Self::Thcm,
        Self::Scp,
        Self::Vmc,
        Self::V2l,
        Self::FdM7,
    ];
}

impl fmt::Display for AppCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl TryFrom<u8> for AppCategory {
    type Error = ClientError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(value as usize)
            .copied()
            .ok_or_else(|| ClientError::Convert(format!("no app category with value {}", value)))
    }
}

impl FromStr for AppCategory {
    type Err = ClientError;

    /// Accepts the category name (any case) or its numeric value
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(value) = s.parse::<u8>() {
            return Self::try_from(value);
        }
        Self::ALL
            .into_iter()
            .find(|c| c.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| ClientError::InvalidArgument(format!("unknown app category '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DidEntry {
    pub did: u16,
    pub category: AppCategory,
}

const fn entry(did: u16, category: AppCategory) -> DidEntry {
    DidEntry { did, category }
}

use AppCategory::*;

/// Known DIDs, ascending by DID
static DID_TABLE: &[DidEntry] = &[
    entry(0x0201, Vcu),
    entry(0x0202, Dkc),
    entry(0x0203, Vcu),
    entry(0x0206, Vcu),
    entry(0x0207, Vcu),
    entry(0x0301, Bcm),
    entry(0x0302, Bcm),
    entry(0x0303, Bcm),
    entry(0x0304, Bcm),
    entry(0x0305, Bcm),
    entry(0x0306, Bcm),
    entry(0x0307, Bcm),
    entry(0x0501, Evcc),
    entry(0x0504, Evcc),
    entry(0x050D, Evcc),
    entry(0x0610, Vnd),
    entry(0x0611, Vnd),
    entry(0x07F1, Conn),
    entry(0x0B01, Tpms),
    entry(0x0B05, Tpms),
    entry(0x0E04, FdA53),
    entry(0x0F05, Ota),
    entry(0x1001, FxnPi),
    entry(0x1002, FxnPi),
    entry(0x1003, FxnPi),
    entry(0x1004, FxnPi),
    entry(0x1005, FxnPi),
    entry(0x1006, FxnPi),
    entry(0x1007, FxnPi),
    entry(0x1008, FxnPi),
    entry(0x1009, FxnPi),
    entry(0x100A, FxnPi),
    entry(0x100B, FxnPi),
    entry(0x100C, FxnPi),
    entry(0x100D, FxnPi),
    entry(0x100E, FxnPi),
    entry(0x100F, FxnPi),
    entry(0x1010, FxnPi),
    entry(0x1011, FxnPi),
    entry(0x1012, FxnPi),
    entry(0xF090, FdA53),
    entry(0xF16F, FdA53),
    entry(0xF181, FdA53),
    entry(0xF184, FdA53),
    entry(0xF187, FdA53),
    entry(0xF190, FdA53),
    entry(0xF193, FdA53),
    entry(0xF195, FdA53),
    entry(0xF199, FdA53),
    entry(0xF400, Zev),
    entry(0xF41C, Zev),
    entry(0xF41F, Zev),
    entry(0xF420, Zev),
    entry(0xF421, Zev),
    entry(0xF430, Zev),
    entry(0xF440, Zev),
    entry(0xF460, Zev),
    entry(0xF480, Zev),
    entry(0xF4A0, Zev),
    entry(0xF4C0, Zev),
    entry(0xF4E0, Zev),
    entry(0xF800, Zev),
    entry(0xF810, Zev),
    entry(0xF820, Zev),
    entry(0xF840, Zev),
    entry(0xF860, Zev),
    entry(0xF880, Zev),
    entry(0xF8A0, Zev),
    entry(0xF8C0, Zev),
    entry(0xF8E0, Zev),
];

/// All DIDs of `category` in ascending order
pub fn lookup_by_category(category: AppCategory) -> Vec<DidEntry> {
    DID_TABLE
        .iter()
        .filter(|e| e.category == category)
        .copied()
        .collect()
}

/// Same as [`lookup_by_category`] for a raw category value; unknown values yield nothing
pub fn lookup_by_category_code(code: u8) -> Vec<DidEntry> {
    AppCategory::try_from(code)
        .map(lookup_by_category)
        .unwrap_or_default()
}

pub fn category_of(did: u16) -> Option<AppCategory> {
    DID_TABLE
        .binary_search_by_key(&did, |e| e.did)
        .ok()
        .map(|i| DID_TABLE[i].category)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_sorted_and_unique() {
        assert!(DID_TABLE.windows(2).all(|w| w[0].did < w[1].did));
    }

    #[test]
    fn test_lookup_bcm() {
        let dids: Vec<u16> = lookup_by_category(Bcm).iter().map(|e| e.did).collect();
        assert_eq!(dids, (0x0301..=0x0307).collect::<Vec<u16>>());
    }

    #[test]
    fn test_lookup_is_total() {
        let total: usize = AppCategory::ALL
            .into_iter()
            .map(|c| lookup_by_category(c).len())
            .sum();
        assert_eq!(total, DID_TABLE.len());
        assert!(lookup_by_category(V2l).is_empty());
        assert!(lookup_by_category_code(17).is_empty());
        assert!(lookup_by_category_code(200).is_empty());
    }

    #[test]
    fn test_category_of() {
        assert_eq!(category_of(0xF190), Some(FdA53));
        assert_eq!(category_of(0x0202), Some(Dkc));
        assert_eq!(category_of(0x1234), None);
    }

    #[test]
    fn test_category_parsing() {
        assert_eq!("zev".parse::<AppCategory>().unwrap(), Zev);
        assert_eq!("16".parse::<AppCategory>().unwrap(), FdM7);
        assert_eq!("FxnPi".parse::<AppCategory>().unwrap(), FxnPi);
        assert!("nope".parse::<AppCategory>().is_err());
        assert!("17".parse::<AppCategory>().is_err());
    }
}
