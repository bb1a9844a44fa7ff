use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::ops::Deref;

/// Identifier for decks, cards and scratch files.
///
/// Freshly generated ids are ULIDs so they sort by creation time; ids coming
/// from interchange documents or older databases are kept verbatim.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Eid(String);

impl Eid {
    #[inline]
    pub fn new() -> Eid {
        Eid(rusty_ulid::generate_ulid_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Eid {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Eid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Deref for Eid {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<&str> for Eid {
    fn from(value: &str) -> Self {
        Eid(value.to_string())
    }
}

impl From<String> for Eid {
    fn from(value: String) -> Self {
        Eid(value)
    }
}

impl From<Eid> for String {
    fn from(value: Eid) -> Self {
        value.0
    }
}
