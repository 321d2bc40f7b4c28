//! Newtype wrappers for hash identifiers.
//!
//! All newtypes serialize/deserialize as plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! hash_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }

            /// First 12 characters, used in logs and human output.
            pub fn short(&self) -> &str {
                self.0
                    .char_indices()
                    .nth(12)
                    .map_or(self.0.as_str(), |(i, _)| &self.0[..i])
            }

            /// True for a lowercase 64-digit blake3 hex digest.
            pub fn is_digest(&self) -> bool {
                self.0.len() == 64
                    && self
                        .0
                        .bytes()
                        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
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

        impl From<blake3::Hash> for $name {
            fn from(h: blake3::Hash) -> Self {
                Self(h.to_hex().to_string())
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

hash_newtype!(
    /// Blake3 digest of an artifact's canonical description.
    ContentId
);

hash_newtype!(
    /// Full 64-character hex environment identifier, derived from locked content.
    EnvId
);

hash_newtype!(
    /// Truncated prefix of an [`EnvId`], used for display.
    ShortId
);
