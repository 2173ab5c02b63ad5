//! Core type definitions with validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// Invalid filter mode value.
    #[error("invalid filter mode: {value}")]
    InvalidFilterMode { value: String },

    /// Invalid browser profile name.
    #[error("invalid browser: {value}")]
    InvalidBrowser { value: String },
}

/// Generates a validated string key newtype with common trait implementations.
macro_rules! define_string_key {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new key after validation.
            pub fn new(key: impl Into<String>) -> Result<Self, ValidationError> {
                let key = key.into();
                if key.is_empty() {
                    return Err(ValidationError::Empty { field: $field_name });
                }
                Ok(Self(key))
            }

            /// Returns the key as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(key: $name) -> Self {
                key.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_key!(
    /// The canonical string a duration is aggregated under.
    ///
    /// Either a hostname (`example.com`) or a synthetic bucket such as
    /// `Empty / New Tab`. Produced by [`crate::Classifier`]; never empty.
    AttributionKey, "attribution key"
);

impl AttributionKey {
    /// Wraps a key the classifier built from non-empty parts.
    pub(crate) fn synthetic(key: String) -> Self {
        debug_assert!(!key.is_empty(), "classifier produced an empty key");
        Self(key)
    }
}

/// Browser-assigned tab identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub u32);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Browser-assigned window identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(pub u32);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A point-in-time snapshot of a browser tab, as reported by the host browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    pub id: TabId,
    pub window_id: WindowId,
    #[serde(default)]
    pub active: bool,
    /// Current location. Absent for tabs the extension may not inspect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// What the tracker is currently attributing time to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributionTarget {
    pub tab_id: TabId,
    pub location: Option<String>,
}

impl AttributionTarget {
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }
}

impl From<&Tab> for AttributionTarget {
    fn from(tab: &Tab) -> Self {
        Self {
            tab_id: tab.id,
            location: tab.url.clone(),
        }
    }
}
