//! Identifiers stamped on analytics events.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a single event.
///
/// Server-built events get a random id; client-submitted events keep whatever
/// id the client sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

/// Stable pseudo-identity of a browser/agent, persisted in a cookie.
///
/// Values read back from the cookie are kept exactly as stored; no format is
/// enforced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnonymousId(String);

macro_rules! impl_string_newtype {
    ($t:ty) => {
        impl $t {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $t {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $t {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

impl_string_newtype!(MessageId);
impl_string_newtype!(AnonymousId);

impl MessageId {
    /// Random v4 id. Unique per process lifetime for all practical purposes.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl AnonymousId {
    /// Random id for a browser that has no anonymous-id cookie yet.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }
}
