// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Shared property tables with prototype lookup and symbol-keyed members

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use once_cell::sync::Lazy;

use crate::error::{HostError, HostResult};
use crate::function::Call;
use crate::shimmer::PatchRecord;
use crate::value::Value;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

static ASYNC_ITERATOR: Lazy<Symbol> = Lazy::new(|| Symbol::new("Symbol.asyncIterator"));

/// A unique key with an optional human-readable description.
///
/// Two symbols are equal only when they are the same symbol; a matching
/// description is not enough.
#[derive(Clone)]
pub struct Symbol(Arc<SymbolInner>);

struct SymbolInner {
    description: Option<String>,
}

impl Symbol {
    pub fn new(description: impl Into<String>) -> Self {
        Symbol(Arc::new(SymbolInner {
            description: Some(description.into()),
        }))
    }

    /// The well-known asynchronous iteration entry point.
    pub fn async_iterator() -> Symbol {
        ASYNC_ITERATOR.clone()
    }

    pub fn description(&self) -> Option<&str> {
        self.0.description.as_deref()
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.description().unwrap_or(""))
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Name of an object member.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MemberKey {
    Name(String),
    Symbol(Symbol),
}

impl MemberKey {
    pub fn as_name(&self) -> Option<&str> {
        match self {
            MemberKey::Name(name) => Some(name),
            MemberKey::Symbol(_) => None,
        }
    }
}

impl fmt::Display for MemberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberKey::Name(name) => f.write_str(name),
            MemberKey::Symbol(sym) => write!(f, "[{sym}]"),
        }
    }
}

impl From<&str> for MemberKey {
    fn from(name: &str) -> Self {
        MemberKey::Name(name.to_string())
    }
}

impl From<String> for MemberKey {
    fn from(name: String) -> Self {
        MemberKey::Name(name)
    }
}

impl From<&String> for MemberKey {
    fn from(name: &String) -> Self {
        MemberKey::Name(name.clone())
    }
}

impl From<Symbol> for MemberKey {
    fn from(sym: Symbol) -> Self {
        MemberKey::Symbol(sym)
    }
}

impl From<&Symbol> for MemberKey {
    fn from(sym: &Symbol) -> Self {
        MemberKey::Symbol(sym.clone())
    }
}

impl From<&MemberKey> for MemberKey {
    fn from(key: &MemberKey) -> Self {
        key.clone()
    }
}

/// A member slot. Hidden members do not show up in name enumeration but are
/// still reported by [`Object::own_keys`].
#[derive(Clone, Debug)]
pub struct Property {
    pub value: Value,
    pub enumerable: bool,
}

/// Reference-counted property table.
///
/// Cloning an `Object` clones the handle; all clones observe the same
/// members.
#[derive(Clone)]
pub struct Object(Arc<ObjectInner>);

struct ObjectInner {
    id: u64,
    prototype: Option<Object>,
    properties: RwLock<Vec<(MemberKey, Property)>>,
    patches: Mutex<HashMap<MemberKey, PatchRecord>>,
}

impl Object {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_prototype(prototype: &Object) -> Self {
        Self::build(Some(prototype.clone()))
    }

    fn build(prototype: Option<Object>) -> Self {
        Object(Arc::new(ObjectInner {
            id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
            prototype,
            properties: RwLock::new(Vec::new()),
            patches: Mutex::new(HashMap::new()),
        }))
    }

    /// Build a plain object from name/value pairs.
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<MemberKey>,
    {
        let object = Object::new();
        for (key, value) in entries {
            object.set(key, value);
        }
        object
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn prototype(&self) -> Option<&Object> {
        self.0.prototype.as_ref()
    }

    /// Look the member up on the object, then along the prototype chain.
    pub fn get(&self, key: impl Into<MemberKey>) -> Option<Value> {
        let key = key.into();
        let mut current = Some(self);
        while let Some(object) = current {
            if let Some(value) = object.get_own(&key) {
                return Some(value);
            }
            current = object.prototype();
        }
        None
    }

    pub fn get_own(&self, key: impl Into<MemberKey>) -> Option<Value> {
        self.property(key).map(|p| p.value)
    }

    pub fn has_own(&self, key: impl Into<MemberKey>) -> bool {
        let key = key.into();
        self.read().iter().any(|(k, _)| *k == key)
    }

    pub fn property(&self, key: impl Into<MemberKey>) -> Option<Property> {
        let key = key.into();
        self.read().iter().find(|(k, _)| *k == key).map(|(_, p)| p.clone())
    }

    /// Assign a member. A new member is enumerable; an existing member keeps
    /// its enumerability.
    pub fn set(&self, key: impl Into<MemberKey>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        let mut properties = self.write();
        match properties.iter_mut().find(|(k, _)| *k == key) {
            Some((_, property)) => property.value = value,
            None => properties.push((
                key,
                Property {
                    value,
                    enumerable: true,
                },
            )),
        }
    }

    /// Define a non-enumerable member.
    pub fn define_hidden(&self, key: impl Into<MemberKey>, value: impl Into<Value>) {
        self.define(
            key,
            Property {
                value: value.into(),
                enumerable: false,
            },
        );
    }

    pub fn define(&self, key: impl Into<MemberKey>, property: Property) {
        let key = key.into();
        let mut properties = self.write();
        match properties.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = property,
            None => properties.push((key, property)),
        }
    }

    pub fn remove(&self, key: impl Into<MemberKey>) -> Option<Value> {
        let key = key.into();
        let mut properties = self.write();
        let index = properties.iter().position(|(k, _)| *k == key)?;
        Some(properties.remove(index).1.value)
    }

    /// Every own key, hidden and symbol-keyed ones included, in definition
    /// order.
    pub fn own_keys(&self) -> Vec<MemberKey> {
        self.read().iter().map(|(k, _)| k.clone()).collect()
    }

    /// Own enumerable string keys, in definition order.
    pub fn enumerable_names(&self) -> Vec<String> {
        self.read()
            .iter()
            .filter(|(_, p)| p.enumerable)
            .filter_map(|(k, _)| k.as_name().map(str::to_string))
            .collect()
    }

    /// Call the member `key` with this object as the receiver.
    pub fn invoke(&self, key: impl Into<MemberKey>, args: Vec<Value>) -> HostResult<Value> {
        let key = key.into();
        match self.get(&key) {
            Some(Value::Function(function)) => function.call(Call::method(self.clone(), args)),
            _ => Err(HostError::NotCallable(key.to_string())),
        }
    }

    pub fn get_str(&self, key: impl Into<MemberKey>) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(str::to_string))
    }

    pub(crate) fn patches(&self) -> MutexGuard<'_, HashMap<MemberKey, PatchRecord>> {
        self.0.patches.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<(MemberKey, Property)>> {
        self.0.properties.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<(MemberKey, Property)>> {
        self.0.properties.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("id", &self.id())
            .field("keys", &self.own_keys())
            .finish()
    }
}
