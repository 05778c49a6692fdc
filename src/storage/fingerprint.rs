//! Validated content fingerprints
//!
//! A fingerprint is the lowercase hexadecimal digest of some content. Only
//! values that went through [`Fingerprint::parse`] (or were produced by the
//! checksum engine) are allowed to derive storage paths.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Minimum number of hex characters accepted as a route key
pub const MIN_FINGERPRINT_LEN: usize = 8;

/// Lowercase hex digest
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Validate and lowercase a fingerprint string
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the value is shorter than
    /// [`MIN_FINGERPRINT_LEN`] or contains non-hex characters.
    pub fn parse(value: &str) -> Result<Self> {
        if value.len() < MIN_FINGERPRINT_LEN || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(AppError::invalid_argument(format!(
                "'{}' is not a valid fingerprint (expected at least {} hex characters)",
                value, MIN_FINGERPRINT_LEN
            )));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    /// Wrap a digest that is already known to be lowercase hex.
    pub(crate) fn from_digest(hex: String) -> Self {
        debug_assert!(hex.len() >= MIN_FINGERPRINT_LEN);
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `[f[0:2], f[2:4], f]`
    pub fn shards(&self) -> [&str; 3] {
        [&self.0[0..2], &self.0[2..4], &self.0]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Fingerprint {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_parse_lowercases() {
        let fp = Fingerprint::parse("ABCDEF0123").unwrap();
        assert_eq!(fp.as_str(), "abcdef0123");
    }

    #[test]
    fn test_parse_rejects_short_and_non_hex() {
        for bad in ["", "abc", "abcdef0", "ghijklmnop", "../../etc", "abcd/efgh12"] {
            let err = Fingerprint::parse(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_shards() {
        let fp = Fingerprint::parse("0123456789abcdef").unwrap();
        assert_eq!(fp.shards(), ["01", "23", "0123456789abcdef"]);
    }

    #[test]
    fn test_serde_validates() {
        let fp: Fingerprint = serde_json::from_str("\"DEADBEEF\"").unwrap();
        assert_eq!(fp.as_str(), "deadbeef");
        assert!(serde_json::from_str::<Fingerprint>("\"nothex!!\"").is_err());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(100))]

            #[test]
            fn prop_valid_hex_always_accepted(value in "[0-9a-fA-F]{8,64}") {
                let fp = Fingerprint::parse(&value).unwrap();
                prop_assert_eq!(fp.as_str(), value.to_ascii_lowercase());
            }

            #[test]
            fn prop_non_hex_always_rejected(prefix in "[0-9a-f]{0,8}", bad in "[g-zG-Z/._ -]", suffix in "[0-9a-f]{0,8}") {
                let value = format!("{}{}{}", prefix, bad, suffix);
                prop_assert!(Fingerprint::parse(&value).is_err());
            }
        }
    }
}
