use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Characters separating the components of a payload key.
pub const KEY_SEPARATORS: [char; 3] = ['/', '.', '#'];

/// Full identifier under which one serialized model is stored in an archive.
///
/// Keys are opaque strings such as `"Lorg/eclipse/swt/widgets/Button"` or
/// `"Foo#bar"`. The only structure the store relies on is the trailing
/// component, exposed as [`SimpleKey`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayloadKey(String);

impl PayloadKey {
    /// Create a key, rejecting the empty string.
    pub fn new(key: impl Into<String>) -> Result<Self, TypeError> {
        let key = key.into();
        if key.is_empty() {
            return Err(TypeError::EmptyKey);
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The abbreviated form of this key: everything after the last separator.
    pub fn simple_key(&self) -> SimpleKey {
        SimpleKey::derive(&self.0)
    }
}

impl fmt::Debug for PayloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PayloadKey({})", self.0)
    }
}

impl fmt::Display for PayloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for PayloadKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for PayloadKey {
    type Error = TypeError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Abbreviated payload key used for approximate, unqualified lookup.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimpleKey(String);

impl SimpleKey {
    /// Wrap an already-abbreviated name (e.g. user input for a lookup).
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Derive the simple key of a full key.
    ///
    /// A key ending in a separator keeps its full text, so the result is
    /// never empty for a non-empty key.
    pub fn derive(full_key: &str) -> Self {
        match full_key.rfind(KEY_SEPARATORS) {
            Some(pos) if pos + 1 < full_key.len() => Self(full_key[pos + 1..].to_string()),
            _ => Self(full_key.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SimpleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SimpleKey({})", self.0)
    }
}

impl fmt::Display for SimpleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for SimpleKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SimpleKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> PayloadKey {
        PayloadKey::new(s).unwrap()
    }

    #[test]
    fn empty_key_rejected() {
        assert_eq!(PayloadKey::new(""), Err(TypeError::EmptyKey));
    }

    #[test]
    fn simple_key_after_hash() {
        assert_eq!(key("Foo#bar").simple_key().as_str(), "bar");
    }

    #[test]
    fn simple_key_of_type_name() {
        assert_eq!(
            key("Lorg/eclipse/swt/widgets/Button").simple_key().as_str(),
            "Button"
        );
        assert_eq!(key("java.util.List").simple_key().as_str(), "List");
    }

    #[test]
    fn simple_key_uses_last_separator() {
        assert_eq!(key("a/b.c#d").simple_key().as_str(), "d");
    }

    #[test]
    fn simple_key_without_separator_is_identity() {
        assert_eq!(key("Widget").simple_key().as_str(), "Widget");
    }

    #[test]
    fn trailing_separator_keeps_full_text() {
        assert_eq!(key("Foo#").simple_key().as_str(), "Foo#");
    }

    #[test]
    fn keys_order_lexicographically() {
        assert!(key("Foo#bar") < key("Foo#baz"));
    }

    #[test]
    fn serde_transparent() {
        let json = serde_json::to_string(&key("Foo#bar")).unwrap();
        assert_eq!(json, "\"Foo#bar\"");
    }
}
