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

//! Path matching for watches.
//!
//! The store does not compile glob syntax; that is the surrounding
//! system's job. It only asks a compiled pattern whether a path
//! matches, so anything implementing [`Glob`] can filter a watch. The
//! surrounding system compiles its globs down to regexes, which is why
//! [`regex::Regex`] implements the trait directly.

use regex::Regex;

/// A compiled path pattern, treated by the store as an opaque
/// predicate.
pub trait Glob: Send {
    fn matches(&self, path: &str) -> bool;
}

/// Matches every path.
#[derive(Debug, Clone, Copy)]
pub struct Any;

impl Glob for Any {
    fn matches(&self, _path: &str) -> bool {
        true
    }
}

/// Matches exactly one literal path.
#[derive(Debug, Clone)]
pub struct Exact(pub String);

impl Glob for Exact {
    fn matches(&self, path: &str) -> bool {
        self.0 == path
    }
}

/// Wraps a plain predicate as a [`Glob`].
pub struct Pred<F>(pub F);

impl<F> Glob for Pred<F>
where
    F: Fn(&str) -> bool + Send,
{
    fn matches(&self, path: &str) -> bool {
        (self.0)(path)
    }
}

impl Glob for Regex {
    fn matches(&self, path: &str) -> bool {
        self.is_match(path)
    }
}
