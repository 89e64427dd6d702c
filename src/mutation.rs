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

//! The plain-text mutation codec.
//!
//! Mutations travel through the surrounding replication layer as
//! opaque strings of the form `<rev>:<path>[=<body>]`, so they can be
//! logged and shipped without any framing beyond the string itself. A
//! mutation with a body is a set; one without is a delete. Only the
//! first `=` separates path from body, so bodies may contain `=` and
//! may be empty.

use memchr::memchr;

use crate::error::Error;
use crate::path;

/// Reserved mutation that applies no change. Flush uses it to stamp a
/// terminal event without touching the tree. It deliberately does not
/// decode.
pub const NOP: &str = "nop:";

/// A decoded mutation. `body` is `Some` for a set, `None` for a
/// delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation<'a> {
    pub path: &'a str,
    pub body: Option<&'a str>,
    pub rev: i64,
}

impl<'a> Mutation<'a> {
    /// True for a set, false for a delete.
    pub fn keep(&self) -> bool {
        self.body.is_some()
    }
}

/// Encodes a conditional write of `body` at `path`.
pub fn encode_set(path: &str, body: &str, rev: i64) -> Result<String, Error> {
    path::validate(path)?;
    Ok(format!("{}:{}={}", rev, path, body))
}

/// Encodes a conditional delete of `path`.
pub fn encode_del(path: &str, rev: i64) -> Result<String, Error> {
    path::validate(path)?;
    Ok(format!("{}:{}", rev, path))
}

/// Decodes a mutation string, validating the embedded path.
pub fn decode(mutation: &str) -> Result<Mutation, Error> {
    let colon = memchr(b':', mutation.as_bytes()).ok_or(Error::BadMutation)?;
    let rev = mutation[..colon]
        .parse::<i64>()
        .map_err(|_| Error::BadMutation)?;
    let rest = &mutation[colon + 1..];
    let (path, body) = match memchr(b'=', rest.as_bytes()) {
        Some(eq) => (&rest[..eq], Some(&rest[eq + 1..])),
        None => (rest, None),
    };
    path::validate(path)?;
    Ok(Mutation { path, body, rev })
}
