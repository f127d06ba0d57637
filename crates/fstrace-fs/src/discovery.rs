// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Discovery of the hidden per-instance slots a directory handle uses for
//! asynchronous iteration

use std::sync::Arc;

use fstrace_host::{MemberKey, Object, Symbol};
use once_cell::sync::{Lazy, OnceCell};
use tracing::debug;

pub const READ_SLOT_MARKER: &str = "kDirReadPromisified";
pub const CLOSE_SLOT_MARKER: &str = "kDirClosePromisified";

/// Symbol keys of the promisified read and close slots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirSlotKeys {
    pub read: Symbol,
    pub close: Symbol,
}

/// Scan the own symbol keys of `instance` for the two slot markers.
pub fn discover(instance: &Object) -> Option<DirSlotKeys> {
    let mut read = None;
    let mut close = None;
    for key in instance.own_keys() {
        let MemberKey::Symbol(symbol) = key else {
            continue;
        };
        let label = symbol.to_string();
        if read.is_none() && label.contains(READ_SLOT_MARKER) {
            read = Some(symbol);
        } else if close.is_none() && label.contains(CLOSE_SLOT_MARKER) {
            close = Some(symbol);
        }
        if read.is_some() && close.is_some() {
            break;
        }
    }
    Some(DirSlotKeys {
        read: read?,
        close: close?,
    })
}

static PROCESS_CACHE: Lazy<Arc<HandleKeyCache>> = Lazy::new(|| Arc::new(HandleKeyCache::new()));

/// Write-once cache of the discovered slot keys.
///
/// The first directory handle that carries both markers fixes the keys for
/// the lifetime of the cache. A failed discovery leaves the cache empty so a
/// later handle can try again.
#[derive(Debug, Default)]
pub struct HandleKeyCache {
    keys: OnceCell<DirSlotKeys>,
}

impl HandleKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache shared by every instrumentation in this process.
    pub fn process() -> Arc<HandleKeyCache> {
        PROCESS_CACHE.clone()
    }

    pub fn get(&self) -> Option<&DirSlotKeys> {
        self.keys.get()
    }

    pub fn resolve(&self, instance: &Object) -> Option<&DirSlotKeys> {
        if let Some(keys) = self.keys.get() {
            return Some(keys);
        }
        match discover(instance) {
            Some(found) => Some(self.keys.get_or_init(|| found)),
            None => {
                debug!(object = instance.id(), "directory handle has no promisified slots; iteration left untraced");
                None
            }
        }
    }
}
