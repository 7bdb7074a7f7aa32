use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{Result, TransportError};

/// One request on a logical stream. `seq` correlates the response on the
/// shared connection; `method` is `"Service.Method"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub method: String,
    pub seq: u64,
    pub body: Vec<u8>,
}

/// Mirror of the request layout with an error slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub seq: u64,
    pub error: Option<String>,
    pub body: Vec<u8>,
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| TransportError::Codec(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| TransportError::Codec(e.to_string()))
}
