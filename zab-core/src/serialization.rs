//! Wire encodings for [`ProtocolMessage`].
//!
//! The protocol itself never encodes anything; transports pick a codec.
//! Binary (`bincode`) is the default, JSON is available for debugging.

use serde::{Deserialize, Serialize};

use crate::{messages::ProtocolMessage, Result};

/// Trait for message serialization
pub trait MessageSerializer {
    fn serialize<T>(&self, data: &T) -> Result<Vec<u8>>
    where
        T: Serialize;

    fn deserialize<T>(&self, bytes: &[u8]) -> Result<T>
    where
        T: for<'de> Deserialize<'de>;
}

#[derive(Debug, Default, Clone)]
pub struct JsonSerializer;

impl MessageSerializer for JsonSerializer {
    fn serialize<T>(&self, data: &T) -> Result<Vec<u8>>
    where
        T: Serialize,
    {
        Ok(serde_json::to_vec(data)?)
    }

    fn deserialize<T>(&self, bytes: &[u8]) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[derive(Debug, Default, Clone)]
pub struct BinarySerializer;

impl MessageSerializer for BinarySerializer {
    fn serialize<T>(&self, data: &T) -> Result<Vec<u8>>
    where
        T: Serialize,
    {
        Ok(bincode::serialize(data)?)
    }

    fn deserialize<T>(&self, bytes: &[u8]) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Enum-based codec so transports can hold one without generics.
#[derive(Debug, Clone)]
pub enum MessageCodec {
    Json(JsonSerializer),
    Binary(BinarySerializer),
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::Binary(BinarySerializer)
    }
}

impl MessageCodec {
    pub fn json() -> Self {
        Self::Json(JsonSerializer)
    }

    pub fn binary() -> Self {
        Self::Binary(BinarySerializer)
    }

    pub fn encode(&self, message: &ProtocolMessage) -> Result<Vec<u8>> {
        self.serialize(message)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<ProtocolMessage> {
        self.deserialize(bytes)
    }
}

impl MessageSerializer for MessageCodec {
    fn serialize<T>(&self, data: &T) -> Result<Vec<u8>>
    where
        T: Serialize,
    {
        match self {
            Self::Json(s) => s.serialize(data),
            Self::Binary(s) => s.serialize(data),
        }
    }

    fn deserialize<T>(&self, bytes: &[u8]) -> Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        match self {
            Self::Json(s) => s.deserialize(bytes),
            Self::Binary(s) => s.deserialize(bytes),
        }
    }
}
