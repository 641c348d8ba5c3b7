//! Versioned encoding for values that leave the process or hit the disk.
//!
//! Every payload travels inside an envelope carrying an explicit schema version.
//! Readers accept any version up to the one they were built with and refuse
//! anything newer instead of guessing at its layout.

use crate::error::{NetMemError, Result};
use crate::model::{NetworkAttributes, SameL3NetworkResponse};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const ATTRIBUTES_SCHEMA_VERSION: u32 = 1;
pub const SAME_NETWORK_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<T> {
    schema_version: u32,
    payload: T,
}

#[derive(Debug, Deserialize)]
struct VersionProbe {
    schema_version: u32,
}

fn encode<T: Serialize>(version: u32, payload: &T) -> Result<Vec<u8>> {
    let envelope = Envelope {
        schema_version: version,
        payload,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

fn decode<T: DeserializeOwned>(current: u32, bytes: &[u8]) -> Result<T> {
    let probe: VersionProbe = serde_json::from_slice(bytes)
        .map_err(|e| NetMemError::Codec(format!("missing schema version: {}", e)))?;

    if probe.schema_version == 0 || probe.schema_version > current {
        return Err(NetMemError::Codec(format!(
            "unsupported schema version {} (supported 1..={})",
            probe.schema_version, current
        )));
    }

    let envelope: Envelope<T> = serde_json::from_slice(bytes)
        .map_err(|e| NetMemError::Codec(format!("malformed payload: {}", e)))?;
    Ok(envelope.payload)
}

pub fn encode_attributes(attributes: &NetworkAttributes) -> Result<Vec<u8>> {
    encode(ATTRIBUTES_SCHEMA_VERSION, attributes)
}

pub fn decode_attributes(bytes: &[u8]) -> Result<NetworkAttributes> {
    decode(ATTRIBUTES_SCHEMA_VERSION, bytes)
}

pub fn encode_same_network_response(response: &SameL3NetworkResponse) -> Result<Vec<u8>> {
    encode(SAME_NETWORK_SCHEMA_VERSION, response)
}
