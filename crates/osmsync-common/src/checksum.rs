//! MD5 helpers for content-addressed keys

use serde::Serialize;

/// Compute the lowercase hex MD5 digest of bytes
pub fn compute_md5(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Serialize a value to compact JSON and hash it.
///
/// Field order follows the serde declaration order of the value, so two
/// equal payloads always hash to the same key.
pub fn json_md5<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
    let encoded = serde_json::to_vec(value)?;
    Ok(compute_md5(&encoded))
}
