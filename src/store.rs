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

//! The sequenced store and its single-writer dispatcher.
//!
//! Producers hand the store mutations tagged with sequence numbers;
//! the dispatcher applies them in seqn order (queueing the ones that
//! arrive early), records one event per applied seqn in a trimmable
//! log, and fans matching events out to watches. All state lives on
//! the dispatcher thread; the one thing it shares is the current
//! `(version, root)` pair, published behind a mutex so that readers
//! snapshot the whole namespace with a lock-and-clone.
//!
//! Because the tree is persistent, a snapshot never blocks the writer
//! and never changes after it is taken. Because every watch channel is
//! a rendezvous and delivery is one select arm among the dispatcher's
//! inputs, a subscriber that stops draining delays only its own
//! notices, never the sequence.

use std::cmp::{self, Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::mem;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvError, Select, Sender};
use log::{debug, trace, warn};

use crate::error::Error;
use crate::event::Event;
use crate::glob::{Any, Exact, Glob};
use crate::mutation;
use crate::tree::Node;
use crate::watch::{Notice, Watch, WatchEntry};

/// A sequenced mutation awaiting application.
#[derive(Debug, Clone)]
pub struct Op {
    pub seqn: i64,
    pub mutation: String,
}

// The pending heap keys ops by seqn alone; mutation text never
// participates in the ordering.
impl Ord for Op {
    fn cmp(&self, other: &Op) -> Ordering {
        self.seqn.cmp(&other.seqn)
    }
}

impl PartialOrd for Op {
    fn partial_cmp(&self, other: &Op) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Op {
    fn eq(&self, other: &Op) -> bool {
        self.seqn == other.seqn
    }
}

impl Eq for Op {}

/// The atomically published `(version, root)` pair.
#[derive(Clone)]
struct State {
    version: i64,
    root: Node,
}

/// A watch registration in flight to the dispatcher. The dispatcher
/// owns the `head` watermark, so it decides `TooLate` and reports back
/// through `reply`.
struct WatchReq {
    entry: WatchEntry,
    reply: Sender<Result<(), Error>>,
}

/// The sequenced, observable store.
///
/// `new` spawns the dispatcher; the handle is the way in. The store
/// shuts down when every op sender is gone (the handle's own plus any
/// clones handed out by [`ops`](Store::ops)), at which point all watch
/// channels close.
pub struct Store {
    ops: Sender<Op>,
    watch_tx: Sender<WatchReq>,
    clean_tx: Sender<i64>,
    flush_tx: Sender<()>,
    seqns: Receiver<i64>,
    counts: Receiver<usize>,
    state: Arc<Mutex<State>>,
}

impl Default for Store {
    fn default() -> Store {
        Store::new()
    }
}

impl Store {
    /// Creates an empty store at version 0 and starts its dispatcher.
    pub fn new() -> Store {
        let (ops_tx, ops_rx) = unbounded();
        let (watch_tx, watch_rx) = unbounded();
        let (clean_tx, clean_rx) = unbounded();
        let (flush_tx, flush_rx) = unbounded();
        // Zero capacity: each send is a rendezvous with one receive,
        // so every answer reflects one dispatcher iteration.
        let (seqns_tx, seqns_rx) = bounded(0);
        let (counts_tx, counts_rx) = bounded(0);

        let state = Arc::new(Mutex::new(State { version: 0, root: Node::default() }));
        let shared = state.clone();

        thread::Builder::new()
            .name("cairn-store".to_owned())
            .spawn(move || {
                Dispatcher {
                    ops: ops_rx,
                    watch_rx,
                    clean_rx,
                    flush_rx,
                    seqns_tx,
                    counts_tx,
                    state: shared,
                    version: 0,
                    root: Node::default(),
                    todo: BinaryHeap::new(),
                    log: HashMap::new(),
                    head: 1,
                    watches: Vec::new(),
                    notices: VecDeque::new(),
                    watch_open: true,
                    clean_open: true,
                    flush_open: true,
                    seqns_open: true,
                    counts_open: true,
                }
                .run()
            })
            .expect("store dispatcher should spawn");

        Store {
            ops: ops_tx,
            watch_tx,
            clean_tx,
            flush_tx,
            seqns: seqns_rx,
            counts: counts_rx,
            state,
        }
    }

    /// A sender for feeding sequenced ops to the dispatcher. Clones
    /// keep the store alive; the store shuts down once all are gone.
    pub fn ops(&self) -> Sender<Op> {
        self.ops.clone()
    }

    /// The pull-style version channel: each receive yields the version
    /// as of one dispatcher iteration.
    pub fn seqns(&self) -> &Receiver<i64> {
        &self.seqns
    }

    /// The pull-style live-watch-count channel.
    pub fn watch_counts(&self) -> &Receiver<usize> {
        &self.counts
    }

    /// The current version. Blocks for one dispatcher iteration;
    /// falls back to the published snapshot after shutdown.
    pub fn version(&self) -> i64 {
        match self.seqns.recv() {
            Ok(version) => version,
            Err(RecvError) => self.state.lock().unwrap().version,
        }
    }

    /// The number of live watches. Zero after shutdown.
    pub fn watch_count(&self) -> usize {
        self.counts.recv().unwrap_or(0)
    }

    /// The current `(version, root)` pair, as one consistent snapshot.
    /// The returned root never changes; it shares structure with the
    /// live tree.
    pub fn snap(&self) -> (i64, Node) {
        let state = self.state.lock().unwrap();
        (state.version, state.root.clone())
    }

    /// [`Node::get`] against a fresh snapshot.
    pub fn get(&self, path: &str) -> (Vec<String>, i64) {
        self.snap().1.get(path)
    }

    /// [`Node::stat`] against a fresh snapshot.
    pub fn stat(&self, path: &str) -> (u32, i64) {
        self.snap().1.stat(path)
    }

    /// Asks the dispatcher to collapse any gaps in the pending queue
    /// on its next iteration, jumping the version forward to cover
    /// queued ops. Used while bootstrapping from a peer; per-seqn
    /// events are neither logged nor delivered, and watches cannot
    /// start at or below the collapsed version afterwards.
    pub fn flush(&self) {
        let _ = self.flush_tx.send(());
    }

    /// Drops every logged event with seqn `<= up_to` and forbids new
    /// watches from starting at or below it.
    pub fn clean(&self, up_to: i64) {
        let _ = self.clean_tx.send(up_to);
    }

    /// Subscribes to events from the next seqn onward.
    pub fn watch<G: Glob + 'static>(&self, glob: G) -> Result<Watch, Error> {
        let from = self.version() + 1;
        self.watch_from(glob, from, i64::MAX)
    }

    /// Subscribes to events in the window `[from, to)` whose paths
    /// match `glob`. Events already applied are replayed from the log;
    /// `Err(TooLate)` if any of them has been trimmed.
    pub fn watch_from<G: Glob + 'static>(&self, glob: G, from: i64, to: i64) -> Result<Watch, Error> {
        self.register(Box::new(glob), from, to, 0)
    }

    /// A watch for exactly one seqn, buffered so delivery never waits
    /// on the caller.
    pub fn wait(&self, seqn: i64) -> Result<Watch, Error> {
        self.register(Box::new(Any), seqn, seqn + 1, 1)
    }

    /// Blocks until `path` exists as a file, returning a snapshot that
    /// contains it.
    pub fn sync_path(&self, path: &str) -> Result<Node, Error> {
        crate::path::validate(path)?;
        let watch = self.watch(Exact(path.to_owned()))?;
        let (_, root) = self.snap();
        let (_, rev) = root.get(path);
        if rev > 0 {
            return Ok(root);
        }
        for ev in watch.events().iter() {
            if ev.is_set() {
                return Ok(ev.getter);
            }
        }
        Err(Error::Closed)
    }

    fn register(&self, glob: Box<dyn Glob>, from: i64, to: i64, buffer: usize) -> Result<Watch, Error> {
        let (tx, rx) = bounded(buffer);
        let stopped = Arc::new(AtomicBool::new(false));
        let entry = WatchEntry { glob, from, to, tx, stopped: stopped.clone() };
        let (reply_tx, reply_rx) = bounded(1);
        self.watch_tx
            .send(WatchReq { entry, reply: reply_tx })
            .map_err(|_| Error::Closed)?;
        match reply_rx.recv() {
            Ok(Ok(())) => Ok(Watch::new(rx, stopped)),
            Ok(Err(err)) => Err(err),
            Err(RecvError) => Err(Error::Closed),
        }
    }
}

/// One input consumed by a dispatcher iteration.
enum Input {
    Op(Result<Op, RecvError>),
    Watch(Result<WatchReq, RecvError>),
    Clean(Result<i64, RecvError>),
    Flush(Result<(), RecvError>),
    SeqnSent(bool),
    CountSent(bool),
    NoticeSent(bool),
}

/// The single writer. Owns the tree, the log, the pending heap, the
/// watch list, and the notice queue outright; runs until the ops
/// channel disconnects.
struct Dispatcher {
    ops: Receiver<Op>,
    watch_rx: Receiver<WatchReq>,
    clean_rx: Receiver<i64>,
    flush_rx: Receiver<()>,
    seqns_tx: Sender<i64>,
    counts_tx: Sender<usize>,
    state: Arc<Mutex<State>>,

    version: i64,
    root: Node,
    todo: BinaryHeap<Reverse<Op>>,
    log: HashMap<i64, Event>,
    head: i64,
    watches: Vec<Rc<WatchEntry>>,
    notices: VecDeque<Notice>,

    // Query and control channels drop out of the select once their
    // peer is gone; only a closed ops channel ends the loop.
    watch_open: bool,
    clean_open: bool,
    flush_open: bool,
    seqns_open: bool,
    counts_open: bool,
}

impl Dispatcher {
    fn run(mut self) {
        loop {
            // Stopped watches shed their queued notices here, at the
            // head, rather than eagerly.
            while self.notices.front().map_or(false, |n| n.watch.is_stopped()) {
                self.notices.pop_front();
            }

            let mut flush = false;
            match self.next_input() {
                Input::Op(Ok(op)) => {
                    if op.seqn > self.version {
                        self.todo.push(Reverse(op));
                    } else {
                        trace!("dropping stale op {}", op.seqn);
                    }
                }
                // All producers gone: shut down. Dropping the watch
                // entries and notices closes every subscriber channel.
                Input::Op(Err(RecvError)) => break,
                Input::Watch(Ok(req)) => self.add_watch(req),
                Input::Watch(Err(RecvError)) => self.watch_open = false,
                Input::Clean(Ok(up_to)) => self.clean(up_to),
                Input::Clean(Err(RecvError)) => self.clean_open = false,
                Input::Flush(Ok(())) => flush = true,
                Input::Flush(Err(RecvError)) => self.flush_open = false,
                Input::SeqnSent(true) | Input::CountSent(true) => {}
                Input::SeqnSent(false) => self.seqns_open = false,
                Input::CountSent(false) => self.counts_open = false,
                Input::NoticeSent(delivered) => {
                    let notice = self.notices.pop_front();
                    if !delivered {
                        // The subscriber dropped its receiver; treat
                        // that as a stop so the rest of its notices
                        // are shed too.
                        if let Some(notice) = notice {
                            notice.watch.set_stopped();
                        }
                    }
                }
            }

            self.apply_ready(flush);
        }
        debug!("store dispatcher exiting at version {}", self.version);
    }

    /// Waits for exactly one of the seven inputs and consumes it.
    fn next_input(&self) -> Input {
        let mut sel = Select::new();
        let i_ops = sel.recv(&self.ops);
        let i_watch = if self.watch_open { Some(sel.recv(&self.watch_rx)) } else { None };
        let i_clean = if self.clean_open { Some(sel.recv(&self.clean_rx)) } else { None };
        let i_flush = if self.flush_open { Some(sel.recv(&self.flush_rx)) } else { None };
        let i_seqns = if self.seqns_open { Some(sel.send(&self.seqns_tx)) } else { None };
        let i_counts = if self.counts_open { Some(sel.send(&self.counts_tx)) } else { None };
        let i_notice = self.notices.front().map(|n| sel.send(&n.watch.tx));

        let oper = sel.select();
        let index = oper.index();
        if index == i_ops {
            Input::Op(oper.recv(&self.ops))
        } else if Some(index) == i_watch {
            Input::Watch(oper.recv(&self.watch_rx))
        } else if Some(index) == i_clean {
            Input::Clean(oper.recv(&self.clean_rx))
        } else if Some(index) == i_flush {
            Input::Flush(oper.recv(&self.flush_rx))
        } else if Some(index) == i_seqns {
            Input::SeqnSent(oper.send(&self.seqns_tx, self.version).is_ok())
        } else if Some(index) == i_counts {
            Input::CountSent(oper.send(&self.counts_tx, self.watches.len()).is_ok())
        } else if Some(index) == i_notice {
            let notice = self.notices.front().expect("notice arm selected with empty queue");
            Input::NoticeSent(oper.send(&notice.watch.tx, notice.event.clone()).is_ok())
        } else {
            unreachable!("unknown select index {}", index)
        }
    }

    /// Applies every op whose turn has come. With `flush` set, gaps
    /// are jumped instead of waited out, per-op events are neither
    /// logged nor delivered, and a terminal nop marker runs the watch
    /// windows forward. Nothing at or below the post-flush head is
    /// watchable, so the marker is not retained in the log either.
    fn apply_ready(&mut self, flush: bool) {
        loop {
            let next = match self.todo.peek() {
                Some(top) => top.0.seqn,
                None => break,
            };
            if flush && next > self.version + 1 {
                self.version = next - 1;
            }
            if next > self.version + 1 {
                break;
            }
            let Reverse(op) = self.todo.pop().expect("peeked op vanished");
            if op.seqn <= self.version {
                // Duplicate or stale; each seqn is applied at most once.
                continue;
            }
            self.apply_op(op, flush);
        }

        if flush {
            let (root, ev) = self.root.apply(self.version, mutation::NOP);
            self.root = root;
            self.expire_watches(&ev);
            self.head = self.version + 1;
            debug!("flushed to version {}", self.version);
        }
    }

    fn apply_op(&mut self, op: Op, flush: bool) {
        trace!("applying seqn {}", op.seqn);
        let (root, ev) = self.root.apply(op.seqn, &op.mutation);
        self.root = root;
        self.version = ev.seqn;
        self.publish();
        if let Some(ref err) = ev.err {
            warn!("seqn {} not applied: {}", ev.seqn, err);
        }
        if !flush {
            self.log.insert(ev.seqn, ev.clone());
            self.notify(ev);
        }
    }

    fn publish(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.version = self.version;
        state.root = self.root.clone();
    }

    /// Runs one event past every live watch, queueing notices for the
    /// matches and dropping watches whose windows this event exhausts.
    fn notify(&mut self, ev: Event) {
        let watches = mem::replace(&mut self.watches, Vec::new());
        for watch in watches {
            if watch.is_stopped() || ev.seqn >= watch.to {
                continue;
            }
            if ev.seqn != watch.to - 1 {
                self.watches.push(watch.clone());
            }
            if ev.seqn < watch.from {
                continue;
            }
            if watch.glob.matches(&ev.path) {
                self.notices.push_back(Notice { watch, event: ev.clone() });
            }
        }
    }

    /// The window-expiry half of [`notify`](Dispatcher::notify),
    /// without delivery. The flush marker runs through this so that
    /// exhausted watches still retire.
    fn expire_watches(&mut self, ev: &Event) {
        let watches = mem::replace(&mut self.watches, Vec::new());
        self.watches = watches
            .into_iter()
            .filter(|w| !w.is_stopped() && ev.seqn < w.to - 1)
            .collect();
    }

    fn add_watch(&mut self, req: WatchReq) {
        let WatchReq { entry, reply } = req;
        if entry.from < self.head {
            let _ = reply.send(Err(Error::TooLate));
            return;
        }
        let watch = Rc::new(entry);
        // Replay what already happened inside the window; the log is
        // gapless between head and the current version.
        let end = cmp::min(watch.to, self.version + 1);
        for seqn in watch.from..end {
            if let Some(ev) = self.log.get(&seqn) {
                if watch.glob.matches(&ev.path) {
                    self.notices.push_back(Notice { watch: watch.clone(), event: ev.clone() });
                }
            }
        }
        if watch.to > self.version + 1 && !watch.is_stopped() {
            self.watches.push(watch);
        }
        let _ = reply.send(Ok(()));
    }

    fn clean(&mut self, up_to: i64) {
        while self.head <= up_to {
            self.log.remove(&self.head);
            self.head += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::{Duration, Instant};

    use crossbeam_channel::RecvTimeoutError;
    use regex::Regex;

    use super::*;
    use crate::{DIR, MISSING};

    const TIMEOUT: Duration = Duration::from_secs(5);
    // Long enough for the dispatcher to have acted, short enough to
    // keep negative assertions cheap.
    const QUIET: Duration = Duration::from_millis(300);

    fn send(st: &Store, seqn: i64, mutation: &str) {
        st.ops().send(Op { seqn, mutation: mutation.to_owned() }).unwrap();
    }

    /// Blocks until the event for `seqn` has been applied (and is
    /// still retained).
    fn sync(st: &Store, seqn: i64) {
        let watch = st.wait(seqn).expect("wait failed");
        watch
            .events()
            .recv_timeout(TIMEOUT)
            .unwrap_or_else(|err| panic!("seqn {} never arrived: {:?}", seqn, err));
    }

    /// Blocks until a previously requested clean has taken effect.
    fn sync_clean(st: &Store, up_to: i64) {
        let deadline = Instant::now() + TIMEOUT;
        loop {
            match st.wait(up_to) {
                Err(Error::TooLate) => return,
                Ok(_) => {
                    assert!(Instant::now() < deadline, "clean({}) never applied", up_to);
                    thread::yield_now();
                }
                Err(err) => panic!("unexpected wait error: {:?}", err),
            }
        }
    }

    #[test]
    fn set_creates_file() {
        let st = Store::new();
        let watch = st.wait(1).unwrap();
        send(&st, 1, "0:/a=x");

        let ev = watch.events().recv_timeout(TIMEOUT).unwrap();
        assert_eq!(ev.seqn, 1);
        assert_eq!(ev.path, "/a");
        assert_eq!(ev.body, "x");
        assert_eq!(ev.rev, 1);
        assert!(ev.err.is_none());
        assert!(ev.is_set());

        assert_eq!(st.get("/a"), (vec!["x".to_owned()], 1));
        assert_eq!(st.stat("/a"), (1, 1));
    }

    #[test]
    fn conditional_update() {
        let st = Store::new();
        send(&st, 1, "0:/a=x");
        send(&st, 2, "1:/a=y");
        sync(&st, 2);
        assert_eq!(st.get("/a"), (vec!["y".to_owned()], 2));
    }

    #[test]
    fn rev_mismatch_event_preserves_tree() {
        let st = Store::new();
        let watch = st.watch_from(Any, 1, i64::MAX).unwrap();
        send(&st, 1, "0:/a=x");
        send(&st, 2, "0:/a=y");

        let ev1 = watch.events().recv_timeout(TIMEOUT).unwrap();
        assert_eq!(ev1.seqn, 1);
        assert!(ev1.err.is_none());
        let ev2 = watch.events().recv_timeout(TIMEOUT).unwrap();
        assert_eq!(ev2.seqn, 2);
        assert_eq!(ev2.err, Some(Error::RevMismatch));

        assert_eq!(st.get("/a"), (vec!["x".to_owned()], 1));
    }

    #[test]
    fn delete_removes_file() {
        let st = Store::new();
        send(&st, 1, "0:/a=x");
        send(&st, 2, "1:/a");
        sync(&st, 2);
        assert_eq!(st.get("/a"), (vec![], MISSING));
        assert_eq!(st.stat("/"), (0, DIR));
    }

    #[test]
    fn bad_mutations_still_advance_the_sequence() {
        let st = Store::new();
        let watch = st.watch_from(Any, 1, i64::MAX).unwrap();
        send(&st, 1, "garbage");
        send(&st, 2, "0:/a=x");

        let ev1 = watch.events().recv_timeout(TIMEOUT).unwrap();
        assert_eq!(ev1.seqn, 1);
        assert_eq!(ev1.err, Some(Error::BadMutation));
        assert_eq!(ev1.rev, MISSING);
        let ev2 = watch.events().recv_timeout(TIMEOUT).unwrap();
        assert_eq!(ev2.seqn, 2);
        assert!(ev2.err.is_none());
    }

    #[test]
    fn watch_sees_events_in_order() {
        let st = Store::new();
        let watch = st.watch_from(Regex::new("^/").unwrap(), 1, i64::MAX).unwrap();
        send(&st, 1, "0:/a=x");
        send(&st, 2, "0:/b=y");

        let ev1 = watch.events().recv_timeout(TIMEOUT).unwrap();
        let ev2 = watch.events().recv_timeout(TIMEOUT).unwrap();
        assert_eq!((ev1.seqn, ev2.seqn), (1, 2));
    }

    #[test]
    fn out_of_order_ops_apply_in_order() {
        let st = Store::new();
        let watch = st.watch_from(Any, 1, i64::MAX).unwrap();
        send(&st, 3, "0:/a=x");
        send(&st, 1, "0:/b=y");
        send(&st, 2, "0:/c=z");

        let seqns: Vec<i64> = (0..3)
            .map(|_| watch.events().recv_timeout(TIMEOUT).unwrap().seqn)
            .collect();
        assert_eq!(seqns, vec![1, 2, 3]);
        sync(&st, 3);
        assert_eq!(st.get("/a"), (vec!["x".to_owned()], 3));
    }

    #[test]
    fn duplicate_seqns_are_suppressed() {
        let st = Store::new();
        let watch = st.watch_from(Any, 1, i64::MAX).unwrap();
        send(&st, 1, "0:/a=x");
        send(&st, 1, "0:/a=y");
        send(&st, 2, "-1:/b=z");

        let ev1 = watch.events().recv_timeout(TIMEOUT).unwrap();
        assert_eq!(ev1.seqn, 1);
        assert_eq!(ev1.body, "x");
        let ev2 = watch.events().recv_timeout(TIMEOUT).unwrap();
        assert_eq!(ev2.seqn, 2);
        assert!(watch.events().recv_timeout(QUIET).is_err());
        assert_eq!(st.get("/a"), (vec!["x".to_owned()], 1));
    }

    #[test]
    fn watch_window_bounds_delivery() {
        let st = Store::new();
        let watch = st.watch_from(Any, 2, 3).unwrap();
        for seqn in 1..=4 {
            send(&st, seqn, &format!("-1:/n{}=v", seqn));
        }

        let ev = watch.events().recv_timeout(TIMEOUT).unwrap();
        assert_eq!(ev.seqn, 2);
        // The window is exhausted; the channel closes once the watch
        // entry is retired.
        match watch.events().recv_timeout(TIMEOUT) {
            Err(RecvTimeoutError::Disconnected) => (),
            other => panic!("expected disconnect, got {:?}", other.map(|ev| ev.seqn)),
        }
    }

    #[test]
    fn registration_backfills_from_the_log() {
        let st = Store::new();
        send(&st, 1, "0:/a=x");
        send(&st, 2, "0:/b=y");
        sync(&st, 2);

        let watch = st.watch_from(Any, 1, i64::MAX).unwrap();
        let ev1 = watch.events().recv_timeout(TIMEOUT).unwrap();
        let ev2 = watch.events().recv_timeout(TIMEOUT).unwrap();
        assert_eq!((ev1.seqn, ev2.seqn), (1, 2));
        assert_eq!(ev1.path, "/a");
    }

    #[test]
    fn backfill_respects_the_glob() {
        let st = Store::new();
        send(&st, 1, "0:/a=x");
        send(&st, 2, "0:/b=y");
        send(&st, 3, "1:/a=z");
        sync(&st, 3);

        let watch = st.watch_from(Exact("/a".to_owned()), 1, i64::MAX).unwrap();
        let ev1 = watch.events().recv_timeout(TIMEOUT).unwrap();
        let ev3 = watch.events().recv_timeout(TIMEOUT).unwrap();
        assert_eq!((ev1.seqn, ev3.seqn), (1, 3));
    }

    #[test]
    fn clean_trims_the_log() {
        let st = Store::new();
        for seqn in 1..=3 {
            send(&st, seqn, &format!("-1:/n{}=v", seqn));
        }
        sync(&st, 3);

        st.clean(2);
        sync_clean(&st, 2);

        assert!(matches!(st.wait(1), Err(Error::TooLate)));
        assert!(matches!(st.watch_from(Any, 2, i64::MAX), Err(Error::TooLate)));

        // Seqn 3 is still retained.
        let watch = st.wait(3).unwrap();
        assert_eq!(watch.events().recv_timeout(TIMEOUT).unwrap().seqn, 3);
        assert!(st.watch_from(Any, 3, i64::MAX).is_ok());
    }

    #[test]
    fn flush_collapses_gaps() {
        let st = Store::new();
        let watch = st.watch_from(Any, 1, i64::MAX).unwrap();
        send(&st, 5, "0:/a=x");
        send(&st, 8, "0:/b=y");

        // The flush signal and the ops race through separate channels;
        // keep asking until the ops have been queued and collapsed.
        let deadline = Instant::now() + TIMEOUT;
        while st.version() != 8 {
            assert!(Instant::now() < deadline, "flush never collapsed the gap");
            st.flush();
            thread::yield_now();
        }

        assert_eq!(st.get("/a"), (vec!["x".to_owned()], 5));
        assert_eq!(st.get("/b"), (vec!["y".to_owned()], 8));

        // Bootstrap is silent: no per-seqn events, no terminal marker.
        assert!(watch.events().recv_timeout(QUIET).is_err());

        // Pre-flush history is not watchable.
        assert!(matches!(st.wait(5), Err(Error::TooLate)));
        assert!(matches!(st.wait(8), Err(Error::TooLate)));
        assert!(st.watch_from(Any, 9, i64::MAX).is_ok());
    }

    #[test]
    fn snapshots_are_immutable() {
        let st = Store::new();
        send(&st, 1, "0:/a=x");
        sync(&st, 1);

        let (version, root) = st.snap();
        assert_eq!(version, 1);

        send(&st, 2, "1:/a=y");
        sync(&st, 2);

        assert_eq!(root.get("/a"), (vec!["x".to_owned()], 1));
        assert_eq!(st.get("/a"), (vec!["y".to_owned()], 2));
        assert_eq!(st.snap().0, 2);
    }

    #[test]
    fn versions_are_monotonic() {
        let st = Store::new();
        for seqn in 1..=5 {
            send(&st, seqn, &format!("-1:/n{}=v", seqn));
        }
        let mut prev = 0;
        let deadline = Instant::now() + TIMEOUT;
        loop {
            let version = st.version();
            assert!(version >= prev, "version went backwards: {} < {}", version, prev);
            prev = version;
            if version == 5 {
                break;
            }
            assert!(Instant::now() < deadline, "never reached version 5");
        }
    }

    #[test]
    fn watch_count_tracks_live_watches() {
        let st = Store::new();
        assert_eq!(st.watch_count(), 0);

        let watch = st.watch(Any).unwrap();
        assert_eq!(st.watch_count(), 1);

        // Dropping stops the watch; the entry is pruned when the next
        // event runs the live set.
        drop(watch);
        send(&st, 1, "0:/a=x");
        let deadline = Instant::now() + TIMEOUT;
        while st.watch_count() != 0 {
            assert!(Instant::now() < deadline, "stopped watch never pruned");
            thread::yield_now();
        }
    }

    #[test]
    fn stopped_watch_receives_nothing() {
        let st = Store::new();
        let watch = st.watch(Any).unwrap();
        watch.stop();
        watch.stop(); // idempotent
        send(&st, 1, "0:/a=x");
        sync(&st, 1);
        assert!(watch.events().recv_timeout(QUIET).is_err());
    }

    #[test]
    fn slow_subscribers_do_not_block_the_writer() {
        let st = Store::new();
        // Never drained; its notices pile up from the queue head.
        let _lagging = st.watch_from(Any, 1, i64::MAX).unwrap();
        for seqn in 1..=20 {
            send(&st, seqn, &format!("-1:/n{}=v", seqn));
        }
        // The version keeps advancing regardless of the queued
        // notices. (Delivery is head-of-line, so sync through the
        // version channel, not a watch.)
        let deadline = Instant::now() + TIMEOUT;
        while st.version() != 20 {
            assert!(Instant::now() < deadline, "writer stalled behind a slow subscriber");
            thread::yield_now();
        }
        assert_eq!(st.get("/n20"), (vec!["v".to_owned()], 20));
    }

    #[test]
    fn shutdown_closes_watch_channels() {
        let st = Store::new();
        let watch = st.watch(Any).unwrap();
        drop(st);
        match watch.events().recv_timeout(TIMEOUT) {
            Err(RecvTimeoutError::Disconnected) => (),
            other => panic!("expected disconnect, got {:?}", other.map(|ev| ev.seqn)),
        }
    }

    #[test]
    fn op_sender_clones_keep_the_store_alive() {
        let st = Store::new();
        let ops = st.ops();
        let watch = st.watch(Any).unwrap();
        drop(st);

        ops.send(Op { seqn: 1, mutation: "0:/a=x".to_owned() }).unwrap();
        let ev = watch.events().recv_timeout(TIMEOUT).unwrap();
        assert_eq!(ev.seqn, 1);

        drop(ops);
        match watch.events().recv_timeout(TIMEOUT) {
            Err(RecvTimeoutError::Disconnected) => (),
            other => panic!("expected disconnect, got {:?}", other.map(|ev| ev.seqn)),
        }
    }

    #[test]
    fn sync_path_waits_for_the_file() {
        let st = Store::new();
        send(&st, 1, "0:/other=1");

        let ops = st.ops();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            ops.send(Op { seqn: 2, mutation: "0:/target=v".to_owned() }).unwrap();
        });

        let getter = st.sync_path("/target").unwrap();
        assert_eq!(getter.get("/target"), (vec!["v".to_owned()], 2));
        producer.join().unwrap();

        // Already-present files return without waiting.
        let getter = st.sync_path("/target").unwrap();
        assert_eq!(getter.get("/target"), (vec!["v".to_owned()], 2));

        assert!(matches!(st.sync_path("bad"), Err(Error::BadPath(_))));
    }
}
