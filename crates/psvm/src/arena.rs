//! Arena: the top-level facade tying together pools, the save/restore
//! engine, the observer registry, root scanning, messaging, and the
//! underlying byte-addressed collector (spec.md §4.A "Arena & Pools", §6
//! "External interfaces").
//!
//! An `Arena` is the one object an embedder constructs; everything else
//! (`Pool`, `SaveRef`, `RootHandle`) is obtained through it. This mirrors the
//! teacher's `Runtime` (`runtime::Runtime` wraps a `GarbageCollector` the
//! same way `Arena` wraps one here), generalized with the save/restore state
//! the PostScript VM needs that a plain concurrent collector doesn't.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::ArenaConfig;
use crate::error::Result;
use crate::gc::GarbageCollector;
use crate::heap::{Heap, Reservoir};
use crate::marker::roots::{Rank, RootHandle, RootScanner};
use crate::messages::{Message, MessageQueue};
use crate::object::pool::{Pool, PoolAddr, PoolClass};
use crate::object::slot::SlotValue;
use crate::observer::{Observer, ObserverRegistry};
use crate::save::barrier::{check_asave, check_asave_one, check_dsave, check_dsave_all, check_gsave, GStateIdCounter};
use crate::save::copy::{psvm_copy_dictmatch, psvm_copy_object, ExternalValue};
use crate::save::record::{AllocMode, GlobalLocalModeStack, SaveRef, SaveStack};
use crate::save::restore::{restore, RestoreReport};

/// Owns every piece of per-VM state named in spec.md §3: the pool registry,
/// the open-save stack, the allocation-mode bracket, the observer registry,
/// root scanning, the message queue, and the low-memory reservoir, plus the
/// byte-addressed collector (`Heap`/`GarbageCollector`) backing non-composite
/// allocation.
pub struct Arena {
    config: Arc<ArenaConfig>,
    gc: GarbageCollector,
    pools: RwLock<Vec<Arc<Pool>>>,
    save_stack: SaveStack,
    mode_stack: GlobalLocalModeStack,
    gstate_ids: GStateIdCounter,
    observers: RwLock<ObserverRegistry>,
    roots: RootScanner,
    messages: MessageQueue,
    reservoir: Reservoir,
    name_cache_epoch: AtomicU32,
    idiom_index_epoch: AtomicU32,
    language_level: AtomicU32,
}

impl Arena {
    /// `arena_create` (spec.md §4.A): reserve the arena and bring up every
    /// subsystem. `config.reservoir_limit` seeds the low-memory reservoir
    /// immediately, matching `mps_reservoir_limit_set` being valid to call
    /// before the first allocation.
    pub fn new(config: ArenaConfig) -> Result<Self> {
        let config = Arc::new(config);
        let reservoir = Reservoir::new();
        reservoir.set_limit(config.reservoir_limit);
        let gc = GarbageCollector::new((*config).clone())?;
        Ok(Self {
            config,
            gc,
            pools: RwLock::new(Vec::new()),
            save_stack: SaveStack::new(),
            mode_stack: GlobalLocalModeStack::new(),
            gstate_ids: GStateIdCounter::new(),
            observers: RwLock::new(ObserverRegistry::new()),
            roots: RootScanner::new(),
            messages: MessageQueue::new(),
            reservoir,
            name_cache_epoch: AtomicU32::new(0),
            idiom_index_epoch: AtomicU32::new(0),
            language_level: AtomicU32::new(2),
        })
    }

    pub fn config(&self) -> &Arc<ArenaConfig> {
        &self.config
    }

    pub fn heap(&self) -> &Arc<Heap> {
        self.gc.heap()
    }

    /// `arena_committed`: bytes currently committed by the byte-addressed
    /// collector backing non-composite allocation.
    pub fn committed(&self) -> usize {
        self.gc.heap().committed_size()
    }

    /// `arena_reserved`: the total reservation configured for this arena
    /// (`ArenaConfig::arena_reservation`).
    pub fn reserved(&self) -> usize {
        self.config.arena_reservation
    }

    pub fn reservoir(&self) -> &Reservoir {
        &self.reservoir
    }

    /// `mps_reserve_with_reservoir_permit` (spec.md §6 Reservoir ABI group):
    /// as `allocate`, but once the normal allocation path is exhausted, falls
    /// through to the low-memory reservoir — the only API that may draw from
    /// it (spec.md §4.J). Succeeds iff `Reservoir::admits` agrees the request
    /// fits what's left of the reservoir's committed floor.
    pub fn reserve_with_reservoir_permit(&self, size: usize) -> Result<usize> {
        match self.gc.allocate(size) {
            Ok(addr) => Ok(addr),
            Err(crate::error::PsvmError::OutOfMemory { .. }) => self
                .gc
                .heap()
                .allocate_tlab_memory_with_reservoir_permit(size, &self.reservoir),
            Err(e) => Err(e),
        }
    }

    // --- Pools ------------------------------------------------------

    /// `pool_create`: bring up a new composite-payload pool of the given
    /// class (spec.md §4.A).
    pub fn pool_create(&self, class: PoolClass) -> Arc<Pool> {
        let pool = Arc::new(Pool::new(class));
        self.pools.write().push(pool.clone());
        pool
    }

    pub fn pools(&self) -> Vec<Arc<Pool>> {
        self.pools.read().clone()
    }

    /// Allocate `len` slots in `pool`, stamping the current save epoch so a
    /// later `restore_checked` can tell whether this allocation outlives a
    /// given restore target (spec.md §4.F step 1). Use this for composites
    /// an embedder is about to place directly on an interpreter stack;
    /// ordinary composite allocation can keep using `pool.alloc` directly.
    pub fn alloc_tracked(&self, pool: &Arc<Pool>, len: usize) -> PoolAddr {
        pool.alloc_at_epoch(len, self.save_stack.current_epoch())
    }

    // --- Allocation-mode bracket (`setglallocmode`) ------------------

    pub fn current_alloc_mode(&self) -> AllocMode {
        self.mode_stack.current()
    }

    /// `set_glallocmode(bool) -> previous` (spec.md §4.H).
    pub fn set_glallocmode(&self, global: bool) -> AllocMode {
        self.mode_stack.set(global)
    }

    // --- Save / restore -----------------------------------------------

    /// `save()` (spec.md §4.F): snapshot the current allocation mode, live
    /// gstate id, language level, and name-cache/idiom-index epochs, and
    /// push a new open save.
    pub fn save(&self) -> SaveRef {
        self.save_stack.save(
            self.mode_stack.current(),
            self.gstate_ids.current(),
            self.language_level.load(Ordering::SeqCst),
            self.name_cache_epoch.load(Ordering::SeqCst),
            self.idiom_index_epoch.load(Ordering::SeqCst),
        )
    }

    pub fn numbersaves(&self, level: i32) -> i32 {
        self.save_stack.numbersaves(level)
    }

    pub fn save_depth(&self) -> usize {
        self.save_stack.depth()
    }

    /// `restore(target)`: the full observer-ordered restore sequence
    /// (spec.md §4.F steps 1-19).
    pub fn restore(&self, target: SaveRef) -> Result<RestoreReport> {
        restore(&self.save_stack, &self.observers.read(), &[], target)
    }

    /// As `restore`, but first runs the stack-validation check (spec.md
    /// §4.F step 1): `stack_refs` is the set of `(pool, addr)` pairs an
    /// embedder gathered by walking its operand/execution/dictionary/
    /// temporary stacks, and the restore is rejected with `InvalidRestore`
    /// if any of them was allocated (via [`Self::alloc_tracked`]) after
    /// `target` — spec.md §8 scenario 4.
    pub fn restore_checked(&self, target: SaveRef, stack_refs: &[(Arc<Pool>, PoolAddr)]) -> Result<RestoreReport> {
        restore(&self.save_stack, &self.observers.read(), stack_refs, target)
    }

    // --- Write barriers -------------------------------------------------

    pub fn check_asave(&self, pool: &Arc<Pool>, base: PoolAddr, write_index: usize, len: usize) -> Result<()> {
        check_asave(pool, base, write_index, len, &self.save_stack, self.mode_stack.current())
    }

    pub fn check_asave_one(&self, pool: &Arc<Pool>, base: PoolAddr, index: usize) -> Result<()> {
        check_asave_one(pool, base, index, &self.save_stack, self.mode_stack.current())
    }

    pub fn check_dsave(&self, pool: &Arc<Pool>, base: PoolAddr, len: usize) -> Result<()> {
        check_dsave(pool, base, len, &self.save_stack, self.mode_stack.current())
    }

    pub fn check_dsave_all(&self, pool: &Arc<Pool>, base: PoolAddr, len: usize) -> Result<()> {
        check_dsave_all(pool, base, len, &self.save_stack, self.mode_stack.current())
    }

    /// `check_gsave`: logs the gstate (if unsaved this epoch) and returns
    /// the id the live gstate should adopt.
    pub fn check_gsave(&self, pool: &Arc<Pool>, base: PoolAddr, len: usize) -> Result<u64> {
        check_gsave(pool, base, len, &self.save_stack, self.mode_stack.current(), &self.gstate_ids)
    }

    // --- psvm_copy --------------------------------------------------

    pub fn psvm_copy_object(&self, pool: &Arc<Pool>, value: &ExternalValue, global: bool) -> Result<SlotValue> {
        psvm_copy_object(pool, value, global, self.config.copy_recursion_limit)
    }

    pub fn psvm_copy_dictmatch(
        &self,
        pool: &Arc<Pool>,
        pairs: &[(ExternalValue, ExternalValue)],
        global: bool,
    ) -> Result<SlotValue> {
        psvm_copy_dictmatch(pool, pairs, global, self.config.copy_recursion_limit, 0)
    }

    // --- Observers ----------------------------------------------------

    pub fn register_observer(&self, observer: Arc<dyn Observer>) {
        self.observers.write().register(observer);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Bumps the name-cache epoch, to be called whenever the named-object
    /// cache is invalidated outside a restore (e.g. a new `findfont`).
    pub fn bump_name_cache_epoch(&self) -> u32 {
        self.name_cache_epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn bump_idiom_index_epoch(&self) -> u32 {
        self.idiom_index_epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    // --- Roots (spec.md §4.E) ------------------------------------------

    pub fn root_create_table(&self, base: usize, count: usize, rank: Rank, name: Option<&str>) -> RootHandle {
        self.roots.root_create_table(base, count, rank, name)
    }

    pub fn roots(&self) -> &RootScanner {
        &self.roots
    }

    // --- Messaging (spec.md §4.I) ---------------------------------------

    pub fn post_message(&self, message: Message) {
        self.messages.post(message);
    }

    pub fn poll_message(&self) -> Option<Message> {
        self.messages.poll()
    }

    pub fn messages(&self) -> &MessageQueue {
        &self.messages
    }

    // --- Byte-addressed allocation / collection -------------------------

    /// Non-composite, fixed-layout allocation (spec.md's retained byte-level
    /// path): delegates to the underlying collector.
    pub fn allocate(&self, size: usize) -> Result<usize> {
        self.gc.allocate(size)
    }

    pub fn collect(&self) -> Result<()> {
        self.gc.collect()
    }

    pub fn gc(&self) -> &GarbageCollector {
        &self.gc
    }
}
