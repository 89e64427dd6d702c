// Copyright 2018 The Cairn Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The in-memory, sequenced, observable key/value store at the heart
//! of the cairn coordination service.
//!
//! A [`Store`] consumes mutations that the surrounding replication
//! layer has already stamped with sequence numbers, applies them in
//! order over a persistent tree of files and directories, and emits
//! exactly one [`Event`] per applied seqn. [`Watch`]es subscribe to
//! that event stream, filtered by a path [`Glob`] and bounded by a
//! seqn window, with registration backfilled from a trimmable event
//! log. Snapshots are O(1): the tree is immutable, so a clone of the
//! published root is a consistent point-in-time view.
//!
//! Writes are conditional: each mutation carries the revision it
//! expects the target file to be at (or [`CLOBBER`] to write
//! unconditionally), and a mismatch produces an error event rather
//! than halting the sequence.

pub mod error;
pub mod event;
pub mod glob;
pub mod mutation;
pub mod path;
pub mod store;
pub mod tree;
pub mod watch;

pub use crate::error::Error;
pub use crate::event::Event;
pub use crate::glob::{Any, Exact, Glob, Pred};
pub use crate::store::{Op, Store};
pub use crate::tree::Node;
pub use crate::watch::Watch;

/// Revision of a file that does not exist.
pub const MISSING: i64 = 0;

/// Pseudo-revision requesting an unconditional write.
pub const CLOBBER: i64 = -1;

/// Revision reported for a path that names a directory.
pub const DIR: i64 = -2;

/// Revision carried by the flush marker event; no file has it.
pub const NOP: i64 = -3;
