//! Utility functions for record ids and serialization

use super::error::{WorkflowError, WorkflowResult};
use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique record id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Opaque id for a stored record, e.g. `req_1...`
pub fn new_record_id(hrp: &str) -> WorkflowResult<String> {
    new_uuid_to_bech32(hrp).map_err(|e| WorkflowError::Encoding(e.to_string()))
}

pub fn encode<T: minicbor::Encode<()>>(value: &T) -> WorkflowResult<Vec<u8>> {
    Ok(minicbor::to_vec(value)?)
}

pub fn decode<T>(bytes: &[u8]) -> WorkflowResult<T>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    Ok(minicbor::decode(bytes)?)
}

// encodes and hashes in one go, the hash is used as a content address
pub fn encode_with_digest<T: minicbor::Encode<()>>(value: &T) -> WorkflowResult<(String, Vec<u8>)> {
    let cbor = encode(value)?;
    let hash = sha256::digest(&cbor);

    Ok((hash, cbor))
}
