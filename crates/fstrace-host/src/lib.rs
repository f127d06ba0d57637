// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Host object model for filesystem instrumentation
//!
//! A filesystem surface is represented as a graph of [`Object`]s whose
//! members are [`Function`]s taking dynamically typed [`Value`] arguments.
//! Asynchronous results travel as completion callbacks, [`Promise`]s,
//! [`FileStream`] events, or [`AsyncIter`] items. The [`shimmer`] module
//! swaps members for wrappers and back without losing the originals.

pub mod error;
pub mod event_loop;
pub mod function;
pub mod iter;
pub mod object;
pub mod promise;
pub mod shimmer;
pub mod stream;
pub mod value;

pub use error::{HostError, HostResult};
pub use event_loop::EventLoop;
pub use function::{Call, Function, Receiver};
pub use iter::{AsyncIter, AsyncSource};
pub use object::{MemberKey, Object, Property, Symbol};
pub use promise::Promise;
pub use shimmer::ShimError;
pub use stream::{FileStream, StreamEvent, StreamKind};
pub use value::Value;
