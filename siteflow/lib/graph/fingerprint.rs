use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::SiteflowResult;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Computes a stable hash of a response for change detection.
///
/// The value is serialized through `serde_json::Value`, whose map type keeps
/// keys lexicographically ordered, so two semantically equal payloads hash
/// identically regardless of struct field order at the call site.
pub fn canonical_fingerprint<T: Serialize>(value: &T) -> SiteflowResult<String> {
    let canonical = serde_json::to_value(value)?;
    let bytes = serde_json::to_vec(&canonical)?;
    let digest = Sha256::digest(&bytes);
    Ok(format!("{digest:x}"))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_equal_values_hash_equal() {
        let a = serde_json::json!({"b": 1, "a": [1, 2, 3]});
        let b = serde_json::json!({"a": [1, 2, 3], "b": 1});
        assert_eq!(
            canonical_fingerprint(&a).unwrap(),
            canonical_fingerprint(&b).unwrap()
        );
    }

    #[test]
    fn test_hashmap_order_is_irrelevant() {
        let mut x = HashMap::new();
        x.insert("zeta", 1);
        x.insert("alpha", 2);
        let mut y = HashMap::new();
        y.insert("alpha", 2);
        y.insert("zeta", 1);
        assert_eq!(
            canonical_fingerprint(&x).unwrap(),
            canonical_fingerprint(&y).unwrap()
        );
    }

    #[test]
    fn test_different_values_differ() {
        let a = serde_json::json!({"status": "running"});
        let b = serde_json::json!({"status": "stopped"});
        assert_ne!(
            canonical_fingerprint(&a).unwrap(),
            canonical_fingerprint(&b).unwrap()
        );
    }
}
