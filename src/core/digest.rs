//! TP-010: BLAKE3 fingerprints for templates, flattened models, and playbooks.
//!
//! Structures are hashed over their YAML serialization, which keeps
//! `IndexMap` declaration order and accepts non-string mapping keys.

use super::error::Result;
use super::flatten::FlattenedModel;
use super::types::Playbook;
use serde::Serialize;

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

fn hash_serialized<T: Serialize>(value: &T) -> Result<String> {
    Ok(hash_string(&serde_yaml_ng::to_string(value)?))
}

/// Fingerprint of the flattened catalogs and reconciled topology.
/// Runtime attribute values are not part of it.
pub fn model_digest(model: &FlattenedModel) -> Result<String> {
    hash_serialized(model)
}

pub fn playbook_digest(playbook: &Playbook) -> Result<String> {
    hash_serialized(playbook)
}
