//! Desired-vs-observed comparison for child resources
//!
//! The API server fills in defaults (clusterIP, rollout strategy, probe
//! thresholds, ...) that the compiler never renders. Comparing whole objects
//! would see drift on every pass, so a child only needs an update when some
//! field the operator renders differs from what is stored.
//!
//! A subset check cannot notice a field the manifest stopped rendering.
//! Every applied child therefore carries the hash of its full manifest in
//! the `kagent.dev/spec-hash` annotation; a changed hash means the stored
//! object was written from a different manifest.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::compiler::{short_hash, ChildResource, ANNOTATION_SPEC_HASH};
use crate::Error;

/// Returns true if every field set in `desired` has the same value in `observed`
///
/// Objects match key by key, so keys only present in `observed` are ignored.
/// Arrays must have equal length and match element by element. An empty
/// desired object or array also matches a missing or null observed value.
pub fn is_subset(desired: &Value, observed: &Value) -> bool {
    match (desired, observed) {
        (Value::Null, _) => true,
        (Value::Object(d), Value::Object(o)) => d.iter().all(|(k, dv)| match o.get(k) {
            Some(ov) => is_subset(dv, ov),
            None => is_empty(dv),
        }),
        (Value::Object(d), Value::Null) => d.is_empty(),
        (Value::Array(d), Value::Array(o)) => {
            d.len() == o.len() && d.iter().zip(o).all(|(dv, ov)| is_subset(dv, ov))
        }
        (Value::Array(d), Value::Null) => d.is_empty(),
        (d, o) => d == o,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(m) => m.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

/// Hash of a rendered manifest, as stored in the spec-hash annotation
pub fn spec_hash(child: &ChildResource) -> Result<String, Error> {
    let bytes = serde_json::to_vec(&child.to_value()?)?;
    Ok(short_hash(&bytes, 16))
}

/// Copy of `desired` annotated with its spec hash
pub fn with_spec_hash(desired: &ChildResource) -> Result<ChildResource, Error> {
    let hash = spec_hash(desired)?;
    let mut stamped = desired.clone();
    stamped
        .meta_mut()
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(ANNOTATION_SPEC_HASH.to_string(), hash);
    Ok(stamped)
}

fn stored_hash(child: &ChildResource) -> Option<&str> {
    child
        .meta()
        .annotations
        .as_ref()?
        .get(ANNOTATION_SPEC_HASH)
        .map(String::as_str)
}

/// Returns true if `observed` has drifted from `desired`
///
/// `desired` is expected to carry its spec hash. A different stored hash
/// means the manifest changed, including fields it no longer renders; an
/// equal hash still compares field by field to catch edits made by others.
pub fn needs_update(desired: &ChildResource, observed: &ChildResource) -> Result<bool, Error> {
    if stored_hash(desired) != stored_hash(observed) {
        return Ok(true);
    }
    Ok(!is_subset(&desired.to_value()?, &observed.to_value()?))
}
