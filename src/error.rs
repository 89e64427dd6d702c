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

//! Errors surfaced by the store.

use std::error;
use std::fmt;

/// Errors that can occur while encoding or decoding mutations,
/// applying them, or registering watches.
///
/// Encode-time errors are returned synchronously to the caller.
/// Apply-time errors ride inside the emitted [`Event`](crate::Event)
/// and never stall the sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The path fails syntactic validation.
    BadPath(String),
    /// The mutation string is not parseable.
    BadMutation,
    /// A conditional write did not match the current revision of the
    /// target (this includes writes that target a directory or try to
    /// descend through a file).
    RevMismatch,
    /// The watch would start below the oldest retained event.
    TooLate,
    /// The store's dispatcher has shut down.
    Closed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::BadPath(ref path) => write!(f, "bad path: {}", path),
            Error::BadMutation => write!(f, "bad mutation"),
            Error::RevMismatch => write!(f, "revision mismatch"),
            Error::TooLate => write!(f, "too late"),
            Error::Closed => write!(f, "store closed"),
        }
    }
}

impl error::Error for Error {}
