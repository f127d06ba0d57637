// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Byte streams with event listeners

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{HostError, HostResult};
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    Readable,
    Writable,
}

/// Lifecycle events emitted by a [`FileStream`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamEvent {
    Open,
    Data,
    /// Readable side fully consumed.
    End,
    /// Writable side fully flushed.
    Finish,
    Error,
    Close,
}

type Listener = Box<dyn FnMut(&Value) + Send>;
type Finalizer = Box<dyn FnOnce(FileStream, Vec<u8>) + Send>;

struct Registration {
    event: StreamEvent,
    once: bool,
    listener: Listener,
}

struct StreamInner {
    kind: StreamKind,
    path: Option<String>,
    listeners: Mutex<Vec<Registration>>,
    buffer: Mutex<Vec<u8>>,
    ended: AtomicBool,
    finalizer: Mutex<Option<Finalizer>>,
}

/// Event-emitting byte stream handle.
///
/// Readable streams are driven by their host, which emits `data`, then `end`
/// or `error`. Writable streams buffer [`FileStream::write`] chunks until
/// [`FileStream::end`] hands them to the host-supplied finalizer, which
/// emits `finish` or `error`.
#[derive(Clone)]
pub struct FileStream(Arc<StreamInner>);

impl FileStream {
    pub fn readable(path: Option<String>) -> Self {
        Self::build(StreamKind::Readable, path, None)
    }

    pub fn writable<F>(path: Option<String>, finalizer: F) -> Self
    where
        F: FnOnce(FileStream, Vec<u8>) + Send + 'static,
    {
        Self::build(StreamKind::Writable, path, Some(Box::new(finalizer)))
    }

    fn build(kind: StreamKind, path: Option<String>, finalizer: Option<Finalizer>) -> Self {
        FileStream(Arc::new(StreamInner {
            kind,
            path,
            listeners: Mutex::new(Vec::new()),
            buffer: Mutex::new(Vec::new()),
            ended: AtomicBool::new(false),
            finalizer: Mutex::new(finalizer),
        }))
    }

    pub fn kind(&self) -> StreamKind {
        self.0.kind
    }

    pub fn path(&self) -> Option<&str> {
        self.0.path.as_deref()
    }

    pub fn ptr_eq(&self, other: &FileStream) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn on<F>(&self, event: StreamEvent, listener: F)
    where
        F: FnMut(&Value) + Send + 'static,
    {
        self.register(event, false, Box::new(listener));
    }

    /// Listen for the next `event` only.
    pub fn once<F>(&self, event: StreamEvent, listener: F)
    where
        F: FnOnce(&Value) + Send + 'static,
    {
        let mut slot = Some(listener);
        self.register(
            event,
            true,
            Box::new(move |payload| {
                if let Some(listener) = slot.take() {
                    listener(payload);
                }
            }),
        );
    }

    fn register(&self, event: StreamEvent, once: bool, listener: Listener) {
        self.listeners().push(Registration {
            event,
            once,
            listener,
        });
    }

    pub fn listener_count(&self, event: StreamEvent) -> usize {
        self.listeners().iter().filter(|r| r.event == event).count()
    }

    /// Deliver `event` to its listeners. Returns whether anyone listened.
    ///
    /// Listeners run without the registry lock held, so they may register
    /// further listeners or emit on the same stream.
    pub fn emit(&self, event: StreamEvent, payload: &Value) -> bool {
        let mut matching = {
            let mut listeners = self.listeners();
            let (matching, rest): (Vec<_>, Vec<_>) =
                listeners.drain(..).partition(|r| r.event == event);
            *listeners = rest;
            matching
        };
        if matching.is_empty() {
            return false;
        }
        for registration in matching.iter_mut() {
            (registration.listener)(payload);
        }
        let persistent: Vec<_> = matching.into_iter().filter(|r| !r.once).collect();
        if !persistent.is_empty() {
            let mut listeners = self.listeners();
            let added = std::mem::take(&mut *listeners);
            *listeners = persistent;
            listeners.extend(added);
        }
        true
    }

    /// Queue a chunk on a writable stream.
    pub fn write(&self, chunk: &[u8]) -> HostResult<()> {
        if self.0.kind != StreamKind::Writable {
            return Err(HostError::invalid_argument("stream is not writable"));
        }
        if self.0.ended.load(Ordering::Acquire) {
            return Err(HostError::StreamEnded);
        }
        self.0
            .buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(chunk);
        Ok(())
    }

    /// Finish writing. Later calls are no-ops.
    pub fn end(&self) {
        if self.0.ended.swap(true, Ordering::AcqRel) {
            return;
        }
        let buffered = std::mem::take(&mut *self.0.buffer.lock().unwrap_or_else(|e| e.into_inner()));
        let finalizer = self.0.finalizer.lock().unwrap_or_else(|e| e.into_inner()).take();
        match finalizer {
            Some(finalizer) => finalizer(self.clone(), buffered),
            None => {
                self.emit(StreamEvent::Finish, &Value::Undefined);
            }
        }
    }

    pub fn is_ended(&self) -> bool {
        self.0.ended.load(Ordering::Acquire)
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<Registration>> {
        self.0.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}
