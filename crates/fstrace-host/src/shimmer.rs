// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Reversible member wrapping
//!
//! A wrap replaces an own function member with the function produced by a
//! factory that receives the original. The original is kept in a patch record
//! on the target object, and unwrapping puts that exact function back.
//! Wrapping is not stackable: a member that is already wrapped is refused
//! rather than layered.

use tracing::{debug, trace};

use crate::function::Function;
use crate::object::{MemberKey, Object, Property};
use crate::value::Value;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ShimError {
    #[error("no own member {0} to wrap")]
    MissingMember(String),
    #[error("member {0} is not a function")]
    NotAFunction(String),
    #[error("member {0} is already wrapped")]
    AlreadyWrapped(String),
    #[error("member {0} is not wrapped")]
    NotWrapped(String),
}

/// Live wrapper paired with the implementation it replaced.
pub(crate) struct PatchRecord {
    original: Function,
    wrapper: Function,
}

/// Replace `target[key]` with `factory(original)`.
pub fn wrap<F>(target: &Object, key: impl Into<MemberKey>, factory: F) -> Result<(), ShimError>
where
    F: FnOnce(Function) -> Function,
{
    let key = key.into();
    let property = target
        .property(&key)
        .ok_or_else(|| ShimError::MissingMember(key.to_string()))?;
    let original = match property.value {
        Value::Function(function) => function,
        _ => return Err(ShimError::NotAFunction(key.to_string())),
    };
    if target.patches().contains_key(&key) {
        return Err(ShimError::AlreadyWrapped(key.to_string()));
    }

    let wrapper = factory(original.clone());
    target.define(
        &key,
        Property {
            value: Value::Function(wrapper.clone()),
            enumerable: property.enumerable,
        },
    );
    target.patches().insert(key.clone(), PatchRecord { original, wrapper });
    trace!(object = target.id(), member = %key, "wrapped member");
    Ok(())
}

/// Restore the original behind `target[key]` and return it.
pub fn unwrap(target: &Object, key: impl Into<MemberKey>) -> Result<Function, ShimError> {
    let key = key.into();
    let record = target
        .patches()
        .remove(&key)
        .ok_or_else(|| ShimError::NotWrapped(key.to_string()))?;

    let live = target.property(&key);
    let still_ours = matches!(
        live.as_ref().map(|p| &p.value),
        Some(Value::Function(f)) if f.ptr_eq(&record.wrapper)
    );
    if !still_ours {
        debug!(object = target.id(), member = %key, "member was reassigned after wrapping; restoring original anyway");
    }
    target.define(
        &key,
        Property {
            value: Value::Function(record.original.clone()),
            enumerable: live.map(|p| p.enumerable).unwrap_or(true),
        },
    );
    trace!(object = target.id(), member = %key, "unwrapped member");
    Ok(record.original)
}

pub fn is_wrapped(target: &Object, key: impl Into<MemberKey>) -> bool {
    target.patches().contains_key(&key.into())
}

/// The implementation hidden behind a wrapped member.
pub fn original(target: &Object, key: impl Into<MemberKey>) -> Option<Function> {
    target.patches().get(&key.into()).map(|r| r.original.clone())
}
