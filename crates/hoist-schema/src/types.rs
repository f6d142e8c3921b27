//! Newtype wrappers for string identifiers, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Lowercase hex digest of a resource's content, as recorded in a manifest.
    ContentHash
);

string_newtype!(
    /// Name of an auxiliary resource group.
    AuxName
);

impl ContentHash {
    /// Leading characters used as the cache shard directory.
    pub fn shard(&self) -> &str {
        let end = self.0.len().min(2);
        &self.0[..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_display_and_as_ref() {
        let h = ContentHash::new("abc123");
        assert_eq!(h.to_string(), "abc123");
        assert_eq!(h.as_str(), "abc123");
        assert_eq!(AsRef::<str>::as_ref(&h), "abc123");
    }

    #[test]
    fn content_hash_serde_roundtrip() {
        let h = ContentHash::new("deadbeef");
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, "\"deadbeef\"");
        let back: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn shard_is_two_char_prefix() {
        assert_eq!(ContentHash::new("deadbeef").shard(), "de");
        assert_eq!(ContentHash::new("a").shard(), "a");
    }

    #[test]
    fn aux_name_equality() {
        assert_eq!(AuxName::from("extras"), "extras");
        assert_ne!(AuxName::from("extras"), AuxName::from("music"));
    }
}
