// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Interception engine
//!
//! Builds the wrapper that stands in for an original host function. A
//! wrapper derives tags from the call, opens a span, runs the original, and
//! finishes the span when the call completes under its convention. When no
//! tags can be derived the original runs alone. Arguments, return values,
//! errors, and callback invocations are passed through unchanged; the only
//! substitution is a completion callback that forwards to the caller's.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fstrace_host::{shimmer, Call, Function, HostResult, Object, Promise, StreamEvent, StreamKind, Value};
use fstrace_tracer::{Done, SpanOptions, Tags, Tracer, TracerExt};
use tracing::{debug, trace};

use crate::discovery::{DirSlotKeys, HandleKeyCache};
use crate::registry::{Convention, OperationDescriptor};
use crate::tags::{RuleInput, TagContext};

/// Wrapper factory bound to one tracer and tag context.
#[derive(Clone)]
pub struct Interceptor {
    tracer: Arc<dyn Tracer>,
    ctx: TagContext,
    keys: Arc<HandleKeyCache>,
}

impl Interceptor {
    pub fn new(tracer: Arc<dyn Tracer>, ctx: TagContext, keys: Arc<HandleKeyCache>) -> Self {
        Interceptor { tracer, ctx, keys }
    }

    pub fn context(&self) -> &TagContext {
        &self.ctx
    }

    /// Wrapper for `original` following the convention of `op`.
    pub fn wrap(&self, op: &OperationDescriptor, original: Function) -> Function {
        let engine = self.clone();
        let op = Arc::new(op.clone());
        let name = original.name().to_string();
        Function::new(name, move |call| engine.intercept(&op, &original, call))
    }

    fn intercept(&self, op: &OperationDescriptor, original: &Function, call: Call) -> HostResult<Value> {
        match op.convention {
            Convention::Sync => self.run_sync(op, original, call),
            Convention::Callback => match call.last_arg().as_function().cloned() {
                Some(callback) => self.run_callback(op, original, call, callback),
                None => original.call(call),
            },
            Convention::Promise => match call.last_arg().as_function().cloned() {
                Some(callback) => self.run_callback(op, original, call, callback),
                None => self.run_promise(op, original, call),
            },
            Convention::Stream(kind) => self.run_stream(op, original, call, kind),
            Convention::Exists => self.run_exists(op, original, call),
        }
    }

    fn derive(&self, op: &OperationDescriptor, call: &Call) -> Option<Tags> {
        let tags = op.rule.derive(&self.ctx, &RuleInput::from_call(call));
        if tags.is_none() {
            trace!(operation = %op.name, "no tags derived; running untraced");
        }
        tags
    }

    fn start(&self, op: &OperationDescriptor, tags: Tags) -> Done {
        self.tracer.trace(&op.span_name, SpanOptions::with_tags(tags), |done| done)
    }

    fn run_sync(&self, op: &OperationDescriptor, original: &Function, call: Call) -> HostResult<Value> {
        let Some(tags) = self.derive(op, &call) else {
            return original.call(call);
        };
        self.tracer.trace(&op.span_name, SpanOptions::with_tags(tags), |done| {
            let result = original.call(call);
            done.finish_result(&result);
            result
        })
    }

    /// The caller's callback is swapped for one that finishes the span first.
    /// A synchronous failure of the original finishes the span as well; the
    /// completion handle makes sure only the first of the two counts.
    fn run_callback(
        &self,
        op: &OperationDescriptor,
        original: &Function,
        mut call: Call,
        callback: Function,
    ) -> HostResult<Value> {
        let Some(tags) = self.derive(op, &call) else {
            return original.call(call);
        };
        self.tracer.trace(&op.span_name, SpanOptions::with_tags(tags), |done| {
            if let Some(last) = call.args.last_mut() {
                *last = Value::Function(error_first_completion(callback, done.clone()));
            }
            let result = original.call(call);
            if let Err(err) = &result {
                done.finish_with_error(err);
            }
            result
        })
    }

    fn run_promise(&self, op: &OperationDescriptor, original: &Function, call: Call) -> HostResult<Value> {
        let Some(tags) = self.derive(op, &call) else {
            return original.call(call);
        };
        self.tracer.trace(&op.span_name, SpanOptions::with_tags(tags), |done| {
            settle_with(original.call(call), move |result| {
                done.finish_result(result);
            })
        })
    }

    fn run_stream(
        &self,
        op: &OperationDescriptor,
        original: &Function,
        call: Call,
        kind: StreamKind,
    ) -> HostResult<Value> {
        let Some(tags) = self.derive(op, &call) else {
            return original.call(call);
        };
        self.tracer.trace(&op.span_name, SpanOptions::with_tags(tags), |done| {
            let result = original.call(call);
            match &result {
                Ok(Value::Stream(stream)) => {
                    let terminal = match kind {
                        StreamKind::Readable => StreamEvent::End,
                        StreamKind::Writable => StreamEvent::Finish,
                    };
                    let on_terminal = done.clone();
                    stream.once(terminal, move |_| {
                        on_terminal.finish();
                    });
                    stream.once(StreamEvent::Error, move |payload| {
                        match payload.as_error() {
                            Some(err) => done.finish_with_error(err),
                            None => done.finish(),
                        };
                    });
                }
                Ok(_) => {
                    done.finish();
                }
                Err(err) => {
                    done.finish_with_error(err);
                }
            }
            result
        })
    }

    /// `exists(path, callback)`: the callback takes a bare boolean, so the
    /// span finishes without an error whatever the answer.
    fn run_exists(&self, op: &OperationDescriptor, original: &Function, mut call: Call) -> HostResult<Value> {
        let Some(callback) = call.arg(1).as_function().cloned() else {
            return original.call(call);
        };
        let Some(tags) = self.derive(op, &call) else {
            return original.call(call);
        };
        self.tracer.trace(&op.span_name, SpanOptions::with_tags(tags), |done| {
            let completion = done.clone();
            call.args[1] = Value::Function(Function::new(callback.name().to_string(), move |answer| {
                completion.finish();
                callback.call(answer)
            }));
            let result = original.call(call);
            if let Err(err) = &result {
                done.finish_with_error(err);
            }
            result
        })
    }

    /// Wrapper for a directory handle's asynchronous-iteration entry point.
    ///
    /// While an iteration is running, the handle's hidden read and close slots
    /// are traced too. The decoration is removed when the close slot settles,
    /// or right away when the entry point itself fails.
    pub fn wrap_dir_iterator(&self, original: Function) -> Function {
        let engine = self.clone();
        let name = original.name().to_string();
        Function::new(name, move |call| {
            let scope = call
                .receiver_object()
                .and_then(|dir| engine.decorate_dir(dir).map(|scope| (dir.clone(), scope)));
            let result = original.call(call);
            if result.is_err() {
                if let Some((dir, scope)) = scope {
                    scope.release(&dir);
                }
            }
            result
        })
    }

    fn decorate_dir(&self, dir: &Object) -> Option<Arc<IterationScope>> {
        let keys = self.keys.resolve(dir)?.clone();
        if shimmer::is_wrapped(dir, &keys.read) || shimmer::is_wrapped(dir, &keys.close) {
            debug!(object = dir.id(), "iteration slots already traced");
            return None;
        }
        let read_op = OperationDescriptor::dir("read")?;
        let close_op = OperationDescriptor::dir("close")?;
        let scope = Arc::new(IterationScope {
            keys,
            released: AtomicBool::new(false),
        });

        if let Err(err) = shimmer::wrap(dir, &scope.keys.read, |original| self.wrap(&read_op, original)) {
            debug!(object = dir.id(), %err, "cannot trace directory read slot");
            return None;
        }
        let close_scope = scope.clone();
        if let Err(err) = shimmer::wrap(dir, &scope.keys.close, |original| {
            self.wrap_close_slot(close_op, original, close_scope)
        }) {
            debug!(object = dir.id(), %err, "cannot trace directory close slot");
            scope.release(dir);
            return None;
        }
        Some(scope)
    }

    /// Traced close slot that ends the iteration scope once it settles.
    fn wrap_close_slot(&self, op: OperationDescriptor, original: Function, scope: Arc<IterationScope>) -> Function {
        let engine = self.clone();
        let name = original.name().to_string();
        Function::new(name, move |call| {
            let dir = call.receiver_object().cloned();
            let done = engine.derive(&op, &call).map(|tags| engine.start(&op, tags));
            let scope = scope.clone();
            settle_with(original.call(call), move |result| {
                if let Some(dir) = &dir {
                    scope.release(dir);
                }
                if let Some(done) = done {
                    done.finish_result(result);
                }
            })
        })
    }
}

/// Completion callback `(err, ...)` that finishes `done` and forwards.
fn error_first_completion(callback: Function, done: Done) -> Function {
    Function::new(callback.name().to_string(), move |call| {
        match call.arg(0) {
            Value::Error(err) => done.finish_with_error(err),
            _ => done.finish(),
        };
        callback.call(call)
    })
}

/// Run `on_settle` once `result` is final. A returned promise is replaced by
/// one that settles identically after `on_settle` has seen the outcome.
fn settle_with<F>(result: HostResult<Value>, on_settle: F) -> HostResult<Value>
where
    F: FnOnce(&HostResult<Value>) + Send + 'static,
{
    match result {
        Ok(Value::Promise(promise)) => Ok(Value::Promise(Promise::new(async move {
            let outcome = promise.await;
            on_settle(&outcome);
            outcome
        }))),
        other => {
            on_settle(&other);
            other
        }
    }
}

/// Hidden-slot decoration active for one iteration over a directory handle.
struct IterationScope {
    keys: DirSlotKeys,
    released: AtomicBool,
}

impl IterationScope {
    fn release(&self, dir: &Object) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        for key in [&self.keys.read, &self.keys.close] {
            if shimmer::is_wrapped(dir, key) {
                if let Err(err) = shimmer::unwrap(dir, key) {
                    debug!(object = dir.id(), %err, "failed to restore directory slot");
                }
            }
        }
        trace!(object = dir.id(), "iteration slots restored");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fstrace_host::{FileStream, HostError, Symbol};
    use fstrace_tracer::RecordingTracer;
    use std::sync::Mutex;

    fn interceptor(tracer: &RecordingTracer) -> Interceptor {
        Interceptor::new(
            Arc::new(tracer.clone()),
            TagContext::new("svc-fs"),
            Arc::new(HandleKeyCache::new()),
        )
    }

    fn echo_sync() -> Function {
        Function::new("statSync", |call| Ok(call.arg(0).clone()))
    }

    #[test]
    fn sync_call_is_traced_and_result_passed_through() {
        let tracer = RecordingTracer::default();
        let op = OperationDescriptor::flat("statSync").unwrap();
        let wrapped = interceptor(&tracer).wrap(&op, echo_sync());

        let out = wrapped.apply(vec![Value::from("/etc")]).unwrap();
        assert_eq!(out, Value::from("/etc"));
        let span = tracer.last().unwrap();
        assert_eq!(span.name, "fs.statsync");
        assert!(span.finished);
        assert_eq!(span.tags.get("service.name"), Some("svc-fs"));
    }

    #[test]
    fn sync_failure_marks_span_and_propagates() {
        let tracer = RecordingTracer::default();
        let op = OperationDescriptor::flat("unlinkSync").unwrap();
        let failing = Function::new("unlinkSync", |_| {
            Err(HostError::Io {
                code: "ENOENT".into(),
                message: "missing".into(),
            })
        });
        let wrapped = interceptor(&tracer).wrap(&op, failing);

        let err = wrapped.apply(vec![Value::from("/nope")]).unwrap_err();
        assert_eq!(err.code(), Some("ENOENT"));
        let span = tracer.last().unwrap();
        assert!(span.finished);
        assert!(span.error.unwrap().contains("missing"));
    }

    #[test]
    fn untaggable_call_runs_without_a_span() {
        let tracer = RecordingTracer::default();
        let op = OperationDescriptor::flat("statSync").unwrap();
        let wrapped = interceptor(&tracer).wrap(&op, echo_sync());
        assert_eq!(wrapped.apply(vec![Value::from(3)]).unwrap(), Value::from(3));
        assert!(tracer.is_empty());
    }

    #[test]
    fn callback_span_finishes_before_the_callback_runs() {
        let tracer = RecordingTracer::default();
        let op = OperationDescriptor::flat("readFile").unwrap();
        let original = Function::new("readFile", |call| {
            call.last_arg()
                .as_function()
                .unwrap()
                .apply(vec![Value::Null, Value::from("data")])?;
            Ok(Value::Undefined)
        });
        let wrapped = interceptor(&tracer).wrap(&op, original);

        let seen = Arc::new(Mutex::new(None));
        let (sink, marks) = (seen.clone(), tracer.clone());
        let callback = Function::new("cb", move |call| {
            *sink.lock().unwrap() = Some((call.arg(1).clone(), marks.mark()));
            Ok(Value::Undefined)
        });
        wrapped
            .apply(vec![Value::from("/f"), Value::Function(callback)])
            .unwrap();

        let (data, mark) = seen.lock().unwrap().clone().unwrap();
        assert_eq!(data, Value::from("data"));
        let span = tracer.last().unwrap();
        assert!(span.finished_seq.unwrap() < mark);
        assert!(span.error.is_none());
    }

    #[test]
    fn callback_convention_without_callback_passes_through() {
        let tracer = RecordingTracer::default();
        let op = OperationDescriptor::flat("readFile").unwrap();
        let wrapped = interceptor(&tracer).wrap(&op, Function::new("readFile", |_| Ok(Value::from(1))));
        assert_eq!(wrapped.apply(vec![Value::from("/f")]).unwrap(), Value::from(1));
        assert!(tracer.is_empty());
    }

    #[test]
    fn promise_span_closes_on_settlement() {
        let tracer = RecordingTracer::default();
        let op = OperationDescriptor::promises("readFile").unwrap();
        let original = Function::new("readFile", |_| Ok(Value::Promise(Promise::resolve(Value::from("x")))));
        let wrapped = interceptor(&tracer).wrap(&op, original);

        let out = wrapped.apply(vec![Value::from("/f")]).unwrap();
        assert_eq!(tracer.open_spans().len(), 1);
        let settled = out.as_promise().unwrap().wait().unwrap();
        assert_eq!(settled, Value::from("x"));
        assert!(tracer.open_spans().is_empty());
        assert_eq!(tracer.last().unwrap().name, "fs.promises.readfile");
    }

    #[test]
    fn rejected_promise_marks_the_span() {
        let tracer = RecordingTracer::default();
        let op = OperationDescriptor::promises("rmdir").unwrap();
        let original = Function::new("rmdir", |_| Ok(Value::Promise(Promise::reject(HostError::DirClosed))));
        let wrapped = interceptor(&tracer).wrap(&op, original);

        let out = wrapped.apply(vec![Value::from("/d")]).unwrap();
        assert_eq!(out.as_promise().unwrap().wait(), Err(HostError::DirClosed));
        assert!(tracer.last().unwrap().error.is_some());
    }

    #[test]
    fn stream_span_ends_once_on_first_terminal_event() {
        let tracer = RecordingTracer::default();
        let op = OperationDescriptor::stream(StreamKind::Readable);
        let stream = FileStream::readable(Some("/f".into()));
        let handed_out = stream.clone();
        let original = Function::new("createReadStream", move |_| Ok(Value::Stream(handed_out.clone())));
        let wrapped = interceptor(&tracer).wrap(&op, original);

        wrapped.apply(vec![Value::from("/f")]).unwrap();
        assert_eq!(tracer.open_spans().len(), 1);
        stream.emit(StreamEvent::End, &Value::Undefined);
        stream.emit(StreamEvent::Error, &Value::Error(HostError::StreamEnded));

        let span = tracer.last().unwrap();
        assert!(span.finished);
        assert!(span.error.is_none());
        assert_eq!(span.tags.get("file.flag"), Some("r"));
    }

    #[test]
    fn exists_callback_finishes_span_without_error() {
        let tracer = RecordingTracer::default();
        let op = OperationDescriptor::exists();
        let original = Function::new("exists", |call| {
            if let Some(callback) = call.arg(1).as_function() {
                callback.apply(vec![Value::from(false)])?;
            }
            Ok(Value::Undefined)
        });
        let wrapped = interceptor(&tracer).wrap(&op, original);

        let answer = Arc::new(Mutex::new(None));
        let sink = answer.clone();
        let callback = Function::new("cb", move |call| {
            *sink.lock().unwrap() = call.arg(0).as_bool();
            Ok(Value::Undefined)
        });
        wrapped
            .apply(vec![Value::from("/x"), Value::Function(callback)])
            .unwrap();
        assert_eq!(*answer.lock().unwrap(), Some(false));
        let span = tracer.last().unwrap();
        assert_eq!(span.name, "fs.exists");
        assert!(span.finished && span.error.is_none());

        wrapped.apply(vec![Value::from("/x")]).unwrap();
        assert_eq!(tracer.len(), 1);
    }

    #[test]
    fn dir_iteration_decorates_slots_until_close_settles() {
        let tracer = RecordingTracer::default();
        let engine = interceptor(&tracer);
        let read_key = Symbol::new("kDirReadPromisified");
        let close_key = Symbol::new("kDirClosePromisified");
        let read = Function::new("read", |_| Ok(Value::Promise(Promise::resolve(Value::Null))));
        let close = Function::new("close", |_| Ok(Value::Promise(Promise::resolve(Value::Undefined))));

        let dir = Object::new();
        dir.set("path", "/srv");
        dir.define_hidden(&read_key, read.clone());
        dir.define_hidden(&close_key, close.clone());

        let (rk, ck) = (read_key.clone(), close_key.clone());
        let entry = Function::new("asyncIterator", move |call| {
            let dir = call.receiver_object().unwrap();
            dir.invoke(&rk, vec![])?.as_promise().unwrap().wait()?;
            dir.invoke(&ck, vec![])?.as_promise().unwrap().wait()?;
            Ok(Value::Undefined)
        });
        let wrapped = engine.wrap_dir_iterator(entry);
        wrapped.call(Call::method(dir.clone(), vec![])).unwrap();

        let names: Vec<_> = tracer.spans().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["fs.dir.read", "fs.dir.close"]);
        assert!(tracer.open_spans().is_empty());
        assert!(!shimmer::is_wrapped(&dir, &read_key));
        let live = dir.get(&read_key).unwrap();
        assert!(live.as_function().unwrap().ptr_eq(&read));
        let live = dir.get(&close_key).unwrap();
        assert!(live.as_function().unwrap().ptr_eq(&close));
    }

    #[test]
    fn failing_iteration_entry_restores_slots() {
        let tracer = RecordingTracer::default();
        let engine = interceptor(&tracer);
        let read_key = Symbol::new("kDirReadPromisified");
        let close_key = Symbol::new("kDirClosePromisified");
        let dir = Object::new();
        dir.set("path", "/srv");
        dir.define_hidden(&read_key, Function::new("read", |_| Ok(Value::Null)));
        dir.define_hidden(&close_key, Function::new("close", |_| Ok(Value::Null)));

        let wrapped = engine.wrap_dir_iterator(Function::new("asyncIterator", |_| Err(HostError::DirClosed)));
        assert!(wrapped.call(Call::method(dir.clone(), vec![])).is_err());
        assert!(!shimmer::is_wrapped(&dir, &read_key));
        assert!(!shimmer::is_wrapped(&dir, &close_key));
    }
}
