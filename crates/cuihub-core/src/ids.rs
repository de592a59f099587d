//! String-backed identifier newtypes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier.
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Borrow the identifier text.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_id!(
    /// Operator-chosen account name (e.g. `"rafael"`). Doubles as the
    /// `cuiId` field of hub events.
    AccountId
);

string_id!(
    /// Identifier of one connected dashboard observer socket.
    ObserverId
);

impl ObserverId {
    /// Generate a fresh, time-ordered observer id.
    pub fn generate() -> Self {
        Self(format!("obs_{}", Uuid::now_v7()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_id_serializes_as_plain_string() {
        let id = AccountId::from_raw("rafael");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"rafael\"");
        let back: AccountId = serde_json::from_str("\"rafael\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn observer_ids_are_unique_and_prefixed() {
        let a = ObserverId::generate();
        let b = ObserverId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("obs_"));
    }

    #[test]
    fn display_matches_raw() {
        let id: AccountId = "work".parse().unwrap();
        assert_eq!(id.to_string(), "work");
        assert_eq!(id.as_ref(), "work");
    }
}
