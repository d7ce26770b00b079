//! Strongly-typed identifiers for ward entities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identity of a live ledger entry.
///
/// Stable for a (kind, source, message) triple for as long as the entry stays
/// unresolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorId(Uuid);

impl ErrorId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ErrorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "err:{}", self.0)
    }
}

impl FromStr for ErrorId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("err:").unwrap_or(s);
        Uuid::parse_str(raw).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_id_display_round_trips_through_parse() {
        let id = ErrorId::generate();
        let parsed: ErrorId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);

        let bare: ErrorId = id.as_uuid().to_string().parse().unwrap();
        assert_eq!(bare, id);
    }

    #[test]
    fn test_error_id_rejects_garbage() {
        assert!("err:not-a-uuid".parse::<ErrorId>().is_err());
    }
}
