//! Finalizer and annotation edits on object metadata
//!
//! Every helper reports whether it changed anything so callers can skip
//! writes that would be no-ops.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

pub fn has_finalizer(meta: &ObjectMeta, finalizer: &str) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|item| item == finalizer))
}

/// Append `finalizer` unless it is already present
pub fn add_finalizer(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    if has_finalizer(meta, finalizer) {
        return false;
    }
    meta.finalizers
        .get_or_insert_with(Vec::new)
        .push(finalizer.to_string());
    true
}

/// Drop every occurrence of `finalizer`
pub fn remove_finalizer(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    match meta.finalizers.as_mut() {
        Some(finalizers) => {
            let before = finalizers.len();
            finalizers.retain(|item| item != finalizer);
            before != finalizers.len()
        }
        None => false,
    }
}

pub fn annotation<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}

/// Remove an annotation, matching the key case-insensitively
pub fn remove_annotation(meta: &mut ObjectMeta, key: &str) -> bool {
    match meta.annotations.as_mut() {
        Some(annotations) => {
            let before = annotations.len();
            annotations.retain(|k, _| !k.eq_ignore_ascii_case(key));
            before != annotations.len()
        }
        None => false,
    }
}

pub fn is_deleting(meta: &ObjectMeta) -> bool {
    meta.deletion_timestamp.is_some()
}
