//! Ownership markers.
//!
//! Every object the operator manages carries exactly one owner reference
//! pointing at the custom resource it was derived from. The cluster's
//! garbage collector uses it for cascading deletes; the synchronizer uses
//! it to detect objects it did not create or whose owner was recreated.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

/// Returns true if `meta` carries exactly one reference to the owner named
/// by `expected`, and that reference has the expected uid.
pub fn has_owner(meta: &ObjectMeta, expected: &OwnerReference) -> bool {
    let mut same_owner = meta
        .owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter(|r| names_owner(r, expected));

    match (same_owner.next(), same_owner.next()) {
        (Some(only), None) => only.uid == expected.uid,
        _ => false,
    }
}

fn names_owner(r: &OwnerReference, expected: &OwnerReference) -> bool {
    r.api_version == expected.api_version && r.kind == expected.kind && r.name == expected.name
}

/// Set `expected` on `meta`, replacing every other reference to the same owner.
///
/// That covers stale references (same api version, kind and name but a
/// different uid, left behind when the owner was recreated) and duplicates.
pub fn set_owner(meta: &mut ObjectMeta, expected: &OwnerReference) {
    let refs = meta.owner_references.get_or_insert_with(Vec::new);
    refs.retain(|r| !names_owner(r, expected));
    refs.push(expected.clone());
}
