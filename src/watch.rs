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

//! Subscriptions to the event stream.

use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};

use crate::event::Event;
use crate::glob::Glob;

/// A live subscription to the store's event stream.
///
/// Events arrive on [`events`](Watch::events) in ascending seqn
/// order, restricted to the watch's window and glob. Dropping the
/// handle stops the watch.
pub struct Watch {
    events: Receiver<Event>,
    stopped: Arc<AtomicBool>,
}

impl Watch {
    pub(crate) fn new(events: Receiver<Event>, stopped: Arc<AtomicBool>) -> Watch {
        Watch { events, stopped }
    }

    /// The channel events are delivered on. It closes when the window
    /// is exhausted, the watch is stopped, or the store shuts down.
    pub fn events(&self) -> &Receiver<Event> {
        &self.events
    }

    /// Stops the watch. Idempotent and safe from any thread. Notices
    /// already queued for this watch are discarded at delivery time,
    /// never delivered.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Dispatcher-side record of one subscription: the glob, the
/// half-open seqn window `[from, to)`, and the delivery channel.
pub(crate) struct WatchEntry {
    pub glob: Box<dyn Glob>,
    pub from: i64,
    pub to: i64,
    pub tx: Sender<Event>,
    pub stopped: Arc<AtomicBool>,
}

impl WatchEntry {
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    pub fn set_stopped(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }
}

/// A matched (watch, event) pair awaiting delivery. The back
/// reference keeps the delivery channel alive even after the watch
/// leaves the live set.
pub(crate) struct Notice {
    pub watch: Rc<WatchEntry>,
    pub event: Event,
}
