use std::marker::PhantomData;

use mas_types::PayloadKey;
use serde::de::DeserializeOwned;

/// Failure to turn payload bytes into a model.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct LoadError(String);

impl LoadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<serde_json::Error> for LoadError {
    fn from(e: serde_json::Error) -> Self {
        Self(e.to_string())
    }
}

/// Turns the raw bytes of one payload into an in-memory model.
///
/// The store never interprets payload bytes itself; it hands them to the
/// loader it was constructed with. Implementations must be deterministic
/// and must not retry: a failure means the payload is corrupt.
pub trait PayloadLoader: Send + Sync {
    type Model: Send;

    fn load(&self, key: &PayloadKey, bytes: &[u8]) -> Result<Self::Model, LoadError>;
}

/// Returns payload bytes unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawLoader;

impl PayloadLoader for RawLoader {
    type Model = Vec<u8>;

    fn load(&self, _key: &PayloadKey, bytes: &[u8]) -> Result<Vec<u8>, LoadError> {
        Ok(bytes.to_vec())
    }
}

/// Deserializes payloads as JSON documents of type `T`.
pub struct JsonLoader<T> {
    _model: PhantomData<fn() -> T>,
}

impl<T> JsonLoader<T> {
    pub fn new() -> Self {
        Self {
            _model: PhantomData,
        }
    }
}

impl<T> Default for JsonLoader<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonLoader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLoader")
            .field("model", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: DeserializeOwned + Send> PayloadLoader for JsonLoader<T> {
    type Model = T;

    fn load(&self, _key: &PayloadKey, bytes: &[u8]) -> Result<T, LoadError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct CallModel {
        calls: Vec<String>,
        observations: u32,
    }

    fn key() -> PayloadKey {
        PayloadKey::new("Lorg/eclipse/swt/widgets/Button").unwrap()
    }

    #[test]
    fn raw_loader_copies_bytes() {
        assert_eq!(RawLoader.load(&key(), b"abc").unwrap(), b"abc");
    }

    #[test]
    fn json_loader_parses_model() {
        let loader = JsonLoader::<CallModel>::new();
        let model = loader
            .load(&key(), br#"{"calls":["setText","pack"],"observations":12}"#)
            .unwrap();
        assert_eq!(model.calls, vec!["setText", "pack"]);
        assert_eq!(model.observations, 12);
    }

    #[test]
    fn json_loader_reports_garbage() {
        let loader = JsonLoader::<CallModel>::new();
        let err = loader.load(&key(), b"\x00\x01").unwrap_err();
        assert!(!err.to_string().is_empty());
    }
}
