//! Dependency-tracked memoization graph.
//!
//! The chart pipeline is a chain of pure derivations over a small set of raw
//! inputs (the loaded table and the user's view state). This module gives
//! those derivations explicit reactive semantics without an ambient runtime:
//!
//! - [`Observable`] cells hold raw state and record a version for every write.
//! - [`Derived`] cells memoize a pure function of other cells. A cached value
//!   is keyed by the versions of every transitively read observable, so a
//!   derived recomputes on read only when a dependency actually moved.
//! - [`Store::batch`] defers reactions so a burst of writes settles into a
//!   single recomputation pass (last write wins).
//!
//! Everything is single-threaded (`Rc`/`RefCell`); the dependency tracking is
//! the only ordering discipline required. A panic inside a derived's compute
//! function propagates to the reader; errors are never swallowed, so
//! fallible derivations should produce `Result` values instead.
//!
//! ### Example
//! ```
//! use grapher::reactive::Store;
//!
//! let store = Store::new();
//! let a = store.observable(2_i64);
//! let b = store.observable(3_i64);
//! let sum = {
//!     let (a, b) = (a.clone(), b.clone());
//!     store.derived(move || a.get() + b.get())
//! };
//! assert_eq!(sum.get(), 5);
//! store.batch(|| {
//!     a.set(10);
//!     b.set(20);
//! });
//! assert_eq!(sum.get(), 30);
//! assert_eq!(sum.times_computed(), 2); // once per batch, not per write
//! ```

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Identifier of an observable cell within one store.
type CellId = usize;

/// A `(cell, version)` pair recorded while a derived computes.
type DepRecord = (CellId, u64);

struct StoreInner {
    /// Monotone write counter; every observable write takes the next tick.
    tick: Cell<u64>,
    /// Per-observable last-write tick, indexed by `CellId`.
    versions: RefCell<Vec<u64>>,
    /// Stack of dependency frames; the top frame collects reads made by the
    /// derived currently computing.
    tracking: RefCell<Vec<Vec<DepRecord>>>,
    batch_depth: Cell<usize>,
    dirty: Cell<bool>,
    reactions: RefCell<Vec<Rc<dyn Fn()>>>,
    running_reactions: Cell<bool>,
}

impl StoreInner {
    fn record_read(&self, id: CellId) {
        let version = self.versions.borrow()[id];
        if let Some(frame) = self.tracking.borrow_mut().last_mut() {
            if !frame.iter().any(|(dep, _)| *dep == id) {
                frame.push((id, version));
            }
        }
    }

    fn record_write(&self, id: CellId) {
        let tick = self.tick.get() + 1;
        self.tick.set(tick);
        self.versions.borrow_mut()[id] = tick;
        if self.batch_depth.get() == 0 {
            self.run_reactions();
        } else {
            self.dirty.set(true);
        }
    }

    fn run_reactions(&self) {
        // A reaction writing an observable must not re-enter the reaction
        // pass; the outer pass already observes the final state.
        if self.running_reactions.get() {
            self.dirty.set(true);
            return;
        }
        self.running_reactions.set(true);
        let reactions: Vec<Rc<dyn Fn()>> = self.reactions.borrow().clone();
        for reaction in reactions {
            reaction();
        }
        self.running_reactions.set(false);
        self.dirty.set(false);
    }
}

/// Owner of a reactive graph: creates cells, batches writes, runs reactions.
#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(StoreInner {
                tick: Cell::new(0),
                versions: RefCell::new(Vec::new()),
                tracking: RefCell::new(Vec::new()),
                batch_depth: Cell::new(0),
                dirty: Cell::new(false),
                reactions: RefCell::new(Vec::new()),
                running_reactions: Cell::new(false),
            }),
        }
    }

    /// Create a raw state cell holding `value`.
    pub fn observable<T: Clone + 'static>(&self, value: T) -> Observable<T> {
        let id = {
            let mut versions = self.inner.versions.borrow_mut();
            versions.push(0);
            versions.len() - 1
        };
        Observable {
            id,
            value: Rc::new(RefCell::new(value)),
            store: Rc::clone(&self.inner),
        }
    }

    /// Create a memoized cell computing `f` over other cells. `f` must be
    /// pure; all of its reads through [`Observable::get`] / [`Derived::get`]
    /// are tracked as dependencies.
    pub fn derived<T: Clone + 'static>(&self, f: impl Fn() -> T + 'static) -> Derived<T> {
        Derived {
            compute: Rc::new(f),
            cache: Rc::new(RefCell::new(None)),
            computed: Rc::new(Cell::new(0)),
            store: Rc::clone(&self.inner),
        }
    }

    /// Register a side effect to run after the graph settles (after any
    /// unbatched write, and once at the end of the outermost batch).
    pub fn reaction(&self, f: impl Fn() + 'static) {
        self.inner.reactions.borrow_mut().push(Rc::new(f));
    }

    /// Run `f`, deferring reactions until it returns. Nested batches flush
    /// once at the outermost exit. Derived cells stay lazy: a burst of writes
    /// inside one batch causes at most one recomputation per derived.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.batch_depth.set(self.inner.batch_depth.get() + 1);
        let out = f();
        self.inner.batch_depth.set(self.inner.batch_depth.get() - 1);
        if self.inner.batch_depth.get() == 0 && self.inner.dirty.get() {
            self.inner.run_reactions();
        }
        out
    }
}

/// A raw state cell. Reads are dependency-tracked; writes bump the store
/// tick and (outside a batch) trigger reactions.
pub struct Observable<T> {
    id: CellId,
    value: Rc<RefCell<T>>,
    store: Rc<StoreInner>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            value: Rc::clone(&self.value),
            store: Rc::clone(&self.store),
        }
    }
}

impl<T: Clone> Observable<T> {
    pub fn get(&self) -> T {
        self.store.record_read(self.id);
        self.value.borrow().clone()
    }

    pub fn set(&self, value: T) {
        *self.value.borrow_mut() = value;
        self.store.record_write(self.id);
    }

    /// Mutate in place through `f`, then notify as a single write.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.value.borrow_mut());
        self.store.record_write(self.id);
    }
}

struct CacheEntry<T> {
    value: T,
    /// Observable-level dependencies (transitive; nested derived reads are
    /// flattened), with the version seen at compute time.
    deps: Vec<DepRecord>,
}

/// A memoized pure function of other cells.
pub struct Derived<T> {
    compute: Rc<dyn Fn() -> T>,
    cache: Rc<RefCell<Option<CacheEntry<T>>>>,
    computed: Rc<Cell<u64>>,
    store: Rc<StoreInner>,
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            compute: Rc::clone(&self.compute),
            cache: Rc::clone(&self.cache),
            computed: Rc::clone(&self.computed),
            store: Rc::clone(&self.store),
        }
    }
}

impl<T: Clone> Derived<T> {
    /// Return the cached value if every dependency is unchanged, otherwise
    /// recompute. Reads made during recomputation are captured as the new
    /// dependency set and also reported to any enclosing derived.
    pub fn get(&self) -> T {
        if let Some(entry) = self.cache.borrow().as_ref() {
            let versions = self.store.versions.borrow();
            let fresh = entry
                .deps
                .iter()
                .all(|(id, version)| versions[*id] == *version);
            if fresh {
                drop(versions);
                self.report_deps_upward();
                return entry.value.clone();
            }
        }
        self.recompute()
    }

    /// Number of times the compute function has run. Test hook for the
    /// once-per-batch invariant.
    pub fn times_computed(&self) -> u64 {
        self.computed.get()
    }

    fn recompute(&self) -> T {
        self.store.tracking.borrow_mut().push(Vec::new());
        // Pop the frame even if compute panics so the graph stays usable.
        struct FrameGuard<'a>(&'a StoreInner, bool);
        impl Drop for FrameGuard<'_> {
            fn drop(&mut self) {
                if !self.1 {
                    self.0.tracking.borrow_mut().pop();
                }
            }
        }
        let mut guard = FrameGuard(&self.store, false);
        let value = (self.compute)();
        guard.1 = true;
        let deps = self
            .store
            .tracking
            .borrow_mut()
            .pop()
            .unwrap_or_default();
        drop(guard);

        *self.cache.borrow_mut() = Some(CacheEntry {
            value: value.clone(),
            deps,
        });
        self.computed.set(self.computed.get() + 1);
        self.report_deps_upward();
        value
    }

    /// Flatten this cell's observable dependencies into the enclosing
    /// derived's frame, so freshness checks always bottom out at observables.
    fn report_deps_upward(&self) {
        let cache = self.cache.borrow();
        let Some(entry) = cache.as_ref() else {
            return;
        };
        let mut tracking = self.store.tracking.borrow_mut();
        if let Some(frame) = tracking.last_mut() {
            for (id, version) in &entry.deps {
                if !frame.iter().any(|(dep, _)| dep == id) {
                    frame.push((*id, *version));
                }
            }
        }
    }
}
