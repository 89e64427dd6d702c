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

//! The persistent tree of directories and files.
//!
//! Nodes are immutable and reference counted; cloning a [`Node`] is a
//! cheap `Arc` clone, so a clone *is* a point-in-time snapshot of the
//! whole namespace. Applying a mutation rebuilds only the nodes on the
//! path from the root to the target and shares every other subtree
//! with the previous root.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Error;
use crate::event::Event;
use crate::mutation;
use crate::path;
use crate::{CLOBBER, DIR, MISSING, NOP};

/// A node in the namespace tree: a file with a body and the revision
/// it was written at, or a directory of named children.
#[derive(Debug, Clone)]
pub struct Node(Arc<NodeBody>);

#[derive(Debug)]
enum NodeBody {
    File { body: String, rev: i64 },
    Dir(HashMap<String, Node>),
}

/// What a walk to a target path found.
enum Found {
    /// An ancestor of the target is a file.
    Blocked,
    Dir,
    File(i64),
    Missing,
}

impl Default for Node {
    /// An empty directory; the root of an empty store.
    fn default() -> Node {
        Node::dir(HashMap::new())
    }
}

impl Node {
    fn file(body: &str, rev: i64) -> Node {
        Node(Arc::new(NodeBody::File { body: body.to_owned(), rev }))
    }

    fn dir(children: HashMap<String, Node>) -> Node {
        Node(Arc::new(NodeBody::Dir(children)))
    }

    /// Resolves `path`: `([body], rev)` for a file, the sorted child
    /// names with [`DIR`] for a directory, `([], MISSING)` for
    /// anything else (including an invalid path).
    pub fn get(&self, path: &str) -> (Vec<String>, i64) {
        if path::validate(path).is_err() {
            return (Vec::new(), MISSING);
        }
        match self.lookup(path) {
            Some(node) => match *node.0 {
                NodeBody::File { ref body, rev } => (vec![body.clone()], rev),
                NodeBody::Dir(ref children) => {
                    let mut names: Vec<String> = children.keys().cloned().collect();
                    names.sort();
                    (names, DIR)
                }
            },
            None => (Vec::new(), MISSING),
        }
    }

    /// Like [`get`](Node::get), but returns only sizes: body length
    /// and rev for a file, child count and [`DIR`] for a directory,
    /// `(0, MISSING)` otherwise.
    pub fn stat(&self, path: &str) -> (u32, i64) {
        if path::validate(path).is_err() {
            return (0, MISSING);
        }
        match self.lookup(path) {
            Some(node) => match *node.0 {
                NodeBody::File { ref body, rev } => (body.len() as u32, rev),
                NodeBody::Dir(ref children) => (children.len() as u32, DIR),
            },
            None => (0, MISSING),
        }
    }

    /// Applies one sequenced mutation, returning the new root and the
    /// event describing what happened. The receiver is unchanged; on
    /// any failure the returned root is (a clone of) the receiver and
    /// the event carries the error.
    pub fn apply(&self, seqn: i64, mutation: &str) -> (Node, Event) {
        if mutation == mutation::NOP {
            let ev = Event::new(seqn, "", "", NOP, mutation, None, self.clone());
            return (self.clone(), ev);
        }

        let decoded = match mutation::decode(mutation) {
            Ok(decoded) => decoded,
            Err(err) => {
                let ev = Event::new(seqn, "", "", MISSING, mutation, Some(err), self.clone());
                return (self.clone(), ev);
            }
        };

        let target = decoded.path;
        let found = self.probe(target);

        // A set cannot descend through a file. A delete of anything
        // under one is a delete of nothing, handled below.
        if let Found::Blocked = found {
            if decoded.keep() {
                return self.unchanged(seqn, target, mutation, MISSING, Error::RevMismatch);
            }
        }
        // Directories cannot be written or deleted, conditionally or not.
        if let Found::Dir = found {
            return self.unchanged(seqn, target, mutation, DIR, Error::RevMismatch);
        }

        let cur_rev = match found {
            Found::File(rev) => rev,
            _ => MISSING,
        };
        if decoded.rev != CLOBBER && decoded.rev != cur_rev {
            return self.unchanged(seqn, target, mutation, MISSING, Error::RevMismatch);
        }

        match decoded.body {
            Some(body) => {
                let segs: Vec<&str> = path::segments(target).collect();
                let root = self.with_set(&segs, body, seqn);
                let ev = Event::new(seqn, target, body, seqn, mutation, None, root.clone());
                (root, ev)
            }
            None => {
                let root = match found {
                    Found::File(_) => {
                        let segs: Vec<&str> = path::segments(target).collect();
                        self.with_del(&segs).unwrap_or_default()
                    }
                    // Deleting what isn't there is a vacuous success.
                    _ => self.clone(),
                };
                let ev = Event::new(seqn, target, "", MISSING, mutation, None, root.clone());
                (root, ev)
            }
        }
    }

    fn unchanged(
        &self,
        seqn: i64,
        path: &str,
        mutation: &str,
        rev: i64,
        err: Error,
    ) -> (Node, Event) {
        let ev = Event::new(seqn, path, "", rev, mutation, Some(err), self.clone());
        (self.clone(), ev)
    }

    fn lookup(&self, path: &str) -> Option<&Node> {
        let mut node = self;
        for seg in path::segments(path) {
            match *node.0 {
                NodeBody::Dir(ref children) => node = children.get(seg)?,
                NodeBody::File { .. } => return None,
            }
        }
        Some(node)
    }

    fn probe(&self, path: &str) -> Found {
        let mut node = self;
        for seg in path::segments(path) {
            match *node.0 {
                NodeBody::Dir(ref children) => match children.get(seg) {
                    Some(child) => node = child,
                    None => return Found::Missing,
                },
                NodeBody::File { .. } => return Found::Blocked,
            }
        }
        match *node.0 {
            NodeBody::File { rev, .. } => Found::File(rev),
            NodeBody::Dir(_) => Found::Dir,
        }
    }

    /// Rebuilds the path down to `segs`, installing a file at the end
    /// and empty directories in between as needed.
    fn with_set(&self, segs: &[&str], body: &str, rev: i64) -> Node {
        if segs.is_empty() {
            return Node::file(body, rev);
        }
        let mut children = match *self.0 {
            NodeBody::Dir(ref children) => children.clone(),
            // apply() never descends a set through a file
            NodeBody::File { .. } => HashMap::new(),
        };
        let child = children.get(segs[0]).cloned().unwrap_or_default();
        children.insert(segs[0].to_owned(), child.with_set(&segs[1..], body, rev));
        Node::dir(children)
    }

    /// Removes the file at `segs`, pruning directories emptied by the
    /// removal. `None` means this whole node goes away.
    fn with_del(&self, segs: &[&str]) -> Option<Node> {
        if segs.is_empty() {
            return None;
        }
        let children = match *self.0 {
            NodeBody::Dir(ref children) => children,
            NodeBody::File { .. } => return Some(self.clone()),
        };
        let child = match children.get(segs[0]) {
            Some(child) => child,
            None => return Some(self.clone()),
        };
        let mut children = children.clone();
        match child.with_del(&segs[1..]) {
            Some(node) => {
                children.insert(segs[0].to_owned(), node);
            }
            None => {
                children.remove(segs[0]);
            }
        }
        if children.is_empty() {
            None
        } else {
            Some(Node::dir(children))
        }
    }
}
