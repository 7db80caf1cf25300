//! Grant payload serialization

use serde::{Serialize, de::DeserializeOwned};

use crate::error::Result;

/// Serializes typed grant payloads into the opaque `data` column
#[derive(Debug, Clone, Copy, Default)]
pub struct PersistentGrantSerializer;

impl PersistentGrantSerializer {
    /// Serialize a payload
    ///
    /// # Errors
    /// Returns `StoreError::Serialization` if the value cannot be encoded.
    pub fn serialize<T: Serialize>(&self, value: &T) -> Result<String> {
        Ok(serde_json::to_string(value)?)
    }

    /// Deserialize a payload
    ///
    /// # Errors
    /// Returns `StoreError::Serialization` if the data does not decode as `T`.
    pub fn deserialize<T: DeserializeOwned>(&self, data: &str) -> Result<T> {
        Ok(serde_json::from_str(data)?)
    }
}
