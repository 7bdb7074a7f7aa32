//! Tagged transaction envelope.
//!
//! A polymorphic transaction travels as a two-element array:
//! `[marker: u8] [tag: u32 LE] [body: bincode]` where the marker byte is
//! `0xA0 | element_count` (always two elements on encode). A nil transaction
//! encodes as the single byte `0x00`.
//!
//! Decoding validates the container shape and the tag registration as two
//! separate steps with distinct errors. A one-element array yields the
//! registered type's zero value; extra elements are rejected.
//!
//! The tag registry is process-global: populated once at init via
//! [`register_transaction`], read-only afterwards.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Wire byte for a nil envelope
pub const ENVELOPE_NIL: u8 = 0x00;

/// High nibble of the array marker byte
const ARRAY_MARKER: u8 = 0xA0;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("Invalid container type for transaction envelope")]
    InvalidContainerType,

    #[error("Invalid transaction type {0}, can not instantiate transaction")]
    InvalidTransactionType(u32),

    #[error("Transaction body codec failed: {0}")]
    Codec(String),
}

type AnyBox = Box<dyn Any + Send + Sync>;

struct TagCodec {
    new_default: fn() -> AnyBox,
    decode: fn(&[u8]) -> Result<AnyBox, EnvelopeError>,
    encode: fn(&(dyn Any + Send + Sync)) -> Result<Vec<u8>, EnvelopeError>,
}

fn registry() -> &'static RwLock<HashMap<u32, TagCodec>> {
    static REGISTRY: OnceLock<RwLock<HashMap<u32, TagCodec>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register a transaction type under a tag. Call once per tag at process
/// init; a later registration for the same tag replaces the earlier one.
pub fn register_transaction<T>(tag: u32)
where
    T: Serialize + DeserializeOwned + Default + Send + Sync + 'static,
{
    let codec = TagCodec {
        new_default: || Box::new(T::default()),
        decode: |bytes| {
            let value: T =
                bincode::deserialize(bytes).map_err(|e| EnvelopeError::Codec(e.to_string()))?;
            Ok(Box::new(value))
        },
        encode: |value| {
            let value = value
                .downcast_ref::<T>()
                .ok_or_else(|| EnvelopeError::Codec("tag/value type mismatch".to_string()))?;
            bincode::serialize(value).map_err(|e| EnvelopeError::Codec(e.to_string()))
        },
    };
    registry()
        .write()
        .expect("transaction registry poisoned")
        .insert(tag, codec);
}

/// A decoded (or to-be-encoded) transaction together with its type tag.
pub struct TransactionWrapper {
    pub tag: u32,
    body: AnyBox,
}

impl std::fmt::Debug for TransactionWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionWrapper")
            .field("tag", &self.tag)
            .finish()
    }
}

impl TransactionWrapper {
    pub fn wrap<T: Send + Sync + 'static>(tag: u32, value: T) -> Self {
        TransactionWrapper {
            tag,
            body: Box::new(value),
        }
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.body.downcast_ref::<T>()
    }
}

/// Encode a transaction envelope. `None` encodes as a single nil byte.
pub fn encode_transaction(tx: Option<&TransactionWrapper>) -> Result<Vec<u8>, EnvelopeError> {
    let tx = match tx {
        Some(tx) => tx,
        None => return Ok(vec![ENVELOPE_NIL]),
    };

    let reg = registry().read().expect("transaction registry poisoned");
    let codec = reg
        .get(&tx.tag)
        .ok_or(EnvelopeError::InvalidTransactionType(tx.tag))?;
    let body = (codec.encode)(tx.body.as_ref())?;

    let mut out = Vec::with_capacity(1 + 4 + body.len());
    out.push(ARRAY_MARKER | 2);
    out.extend_from_slice(&tx.tag.to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode a transaction envelope. A nil byte yields `None`.
pub fn decode_transaction(bytes: &[u8]) -> Result<Option<TransactionWrapper>, EnvelopeError> {
    let marker = *bytes.first().ok_or(EnvelopeError::InvalidContainerType)?;
    if marker == ENVELOPE_NIL {
        return Ok(None);
    }
    if marker & 0xF0 != ARRAY_MARKER {
        return Err(EnvelopeError::InvalidContainerType);
    }
    let count = marker & 0x0F;
    if count == 0 || count > 2 {
        return Err(EnvelopeError::InvalidContainerType);
    }
    if bytes.len() < 5 {
        return Err(EnvelopeError::InvalidContainerType);
    }

    let mut tag_bytes = [0u8; 4];
    tag_bytes.copy_from_slice(&bytes[1..5]);
    let tag = u32::from_le_bytes(tag_bytes);

    let reg = registry().read().expect("transaction registry poisoned");
    let codec = reg
        .get(&tag)
        .ok_or(EnvelopeError::InvalidTransactionType(tag))?;

    let body = if count == 1 {
        (codec.new_default)()
    } else {
        (codec.decode)(&bytes[5..])?
    };

    Ok(Some(TransactionWrapper { tag, body }))
}
