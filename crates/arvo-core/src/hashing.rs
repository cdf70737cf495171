//! Canonicalization/hashing helpers layered on top of `arvo-model::hashing`.
//! Kept as its own module (as in the teacher's `chem-core::hashing`) because
//! this crate additionally needs a stable fingerprint for opaque machine
//! definitions, which `arvo-model` has no reason to know about.

pub use arvo_model::hashing::to_canonical_json;

/// BLAKE3 digest of a canonical-JSON-serializable value, hex-encoded.
/// Grounded on `chem-core::hashing::hash::hash_value`. Used by the machine
/// registry to fingerprint an opaque `machineDefinition` for the persisted
/// orchestration record (spec §3).
pub fn hash_value<T: serde::Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let canonical = to_canonical_json(value)?;
    Ok(blake3::hash(canonical.as_bytes()).to_hex().to_string())
}

pub fn hash_str(s: &str) -> String {
    blake3::hash(s.as_bytes()).to_hex().to_string()
}
