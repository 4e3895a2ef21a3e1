use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

const BVID_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Bvid(String);

impl Bvid {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Bvid {
    type Error = CoreError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let trimmed = value.trim();
        let Some(rest) = trimmed.strip_prefix("BV") else {
            return Err(CoreError::InvalidVideoId(trimmed.to_string()));
        };
        if trimmed.len() != BVID_LEN || !rest.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            return Err(CoreError::InvalidVideoId(trimmed.to_string()));
        }
        Ok(Bvid(trimmed.to_string()))
    }
}

impl TryFrom<String> for Bvid {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Bvid::try_from(value.as_str())
    }
}

impl From<Bvid> for String {
    fn from(value: Bvid) -> Self {
        value.0
    }
}

impl fmt::Display for Bvid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::Bvid;

    #[test]
    fn accepts_well_formed_bvid() {
        let bvid = Bvid::try_from(" BV1xx411c7mD ").unwrap();
        assert_eq!(bvid.as_str(), "BV1xx411c7mD");
    }

    #[test]
    fn rejects_wrong_prefix_or_length() {
        assert!(Bvid::try_from("av170001").is_err());
        assert!(Bvid::try_from("BV1xx").is_err());
        assert!(Bvid::try_from("BV1xx411c7m!").is_err());
    }

    #[test]
    fn deserialize_rejects_invalid() {
        let parsed: Result<Bvid, _> = serde_json::from_str("\"nope\"");
        assert!(parsed.is_err());
    }
}
