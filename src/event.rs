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

//! The record emitted for each applied sequence number.

use crate::error::Error;
use crate::mutation;
use crate::tree::Node;

/// What happened at one sequence number.
///
/// Exactly one event exists per seqn that reaches the store, whether
/// the mutation succeeded or not. `getter` is the tree as of this
/// event, so a subscriber can resolve other paths at the same point in
/// time without racing later writes.
#[derive(Debug, Clone)]
pub struct Event {
    /// The applied sequence number.
    pub seqn: i64,
    /// The target path; empty for the nop marker and for mutations
    /// that failed to decode.
    pub path: String,
    /// The body written; empty for deletes.
    pub body: String,
    /// The revision assigned to the node: the seqn for a successful
    /// set, [`MISSING`](crate::MISSING) for a delete,
    /// [`DIR`](crate::DIR) when the mutation targeted a directory, or
    /// [`NOP`](crate::NOP) for the flush marker.
    pub rev: i64,
    /// The raw mutation string, as it arrived.
    pub mutation: String,
    /// Why the mutation was not applied, if it wasn't.
    pub err: Option<Error>,
    /// The tree snapshot as of this event.
    pub getter: Node,
}

impl Event {
    pub(crate) fn new(
        seqn: i64,
        path: &str,
        body: &str,
        rev: i64,
        mutation: &str,
        err: Option<Error>,
        getter: Node,
    ) -> Event {
        Event {
            seqn,
            path: path.to_owned(),
            body: body.to_owned(),
            rev,
            mutation: mutation.to_owned(),
            err,
            getter,
        }
    }

    /// True if this event recorded a successful write.
    pub fn is_set(&self) -> bool {
        self.err.is_none() && self.decoded_keep() == Some(true)
    }

    /// True if this event recorded a successful delete.
    pub fn is_del(&self) -> bool {
        self.err.is_none() && self.decoded_keep() == Some(false)
    }

    /// True for the terminal marker stamped by a flush.
    pub fn is_dummy(&self) -> bool {
        self.mutation == mutation::NOP
    }

    fn decoded_keep(&self) -> Option<bool> {
        mutation::decode(&self.mutation).ok().map(|m| m.keep())
    }
}
