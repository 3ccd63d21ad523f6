//! # PSVM - Managed Heap for a PostScript-Family Interpreter
//!
//! PSVM is a generational, incrementally collected managed heap with nested
//! save/restore checkpoints, built for a PostScript-family interpreter. It
//! gives the interpreter two things at once: a concurrent, region-based
//! collector for raw byte-addressed allocation, and a pool-indexed composite
//! object model (`object::pool`) with the write barriers, observer-ordered
//! restore, and allocation-mode scoping that PostScript's `save`/`restore`
//! operators require.
//!
//! ## Overview
//!
//! PSVM implements several advanced memory-management techniques:
//!
//! - **Nested Save/Restore**: `save` opens a checkpoint; `restore` replays its
//!   write-barrier log in reverse and runs a fixed, observer-ordered sequence
//!   of cleanup phases (component-cache purges, font/name-cache resets, ...)
//! - **Local/Global Allocation Scoping**: every composite slot and the
//!   checkpoint under which it is logged carry an allocation mode, enforcing
//!   that a globally-allocated composite never stores a local reference
//! - **Concurrent Mark-Compact**: marking and compaction of the byte-level
//!   heap run concurrently with interpreter threads
//! - **Region-Based Heap**: heap divided into regions for parallel collection
//!   and partial compaction
//! - **Generational Collection**: young/old generation separation for
//!   improved efficiency
//! - **Thread-Local Allocation Buffers (TLAB)**: lock-free allocation for hot
//!   paths
//!
//! ## Quick Start
//!
//! ```rust
//! use psvm::{GarbageCollector, ArenaConfig, GcGeneration};
//!
//! fn main() -> Result<(), psvm::PsvmError> {
//!     // Create GC with default configuration
//!     let config = ArenaConfig::default();
//!     let gc = GarbageCollector::new(config)?;
//!
//!     // Allocate objects
//!     let addr = gc.allocate(64)?;
//!
//!     // Register as root to prevent collection
//!     gc.register_root(addr)?;
//!
//!     // Use the allocated memory
//!     unsafe {
//!         *(addr as *mut u64) = 0x12345678;
//!     }
//!
//!     // Trigger GC when needed
//!     gc.collect();
//!
//!     // Unregister root when done
//!     gc.unregister_root(addr)?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Example: Save/Restore
//!
//! ```rust
//! use psvm::{Arena, ArenaConfig};
//! use psvm::object::PoolClass;
//!
//! fn main() -> Result<(), psvm::PsvmError> {
//!     let arena = Arena::new(ArenaConfig::default())?;
//!     let pool = arena.pool_create(PoolClass::Amc);
//!     let addr = pool.alloc(1);
//!
//!     let save = arena.save();
//!     arena.check_asave_one(&pool, addr, 0)?;
//!     // ... mutate the slot via pool.write(addr, 0, ...) ...
//!     arena.restore(save)?; // slot 0 is back to its pre-save value
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   Interpreter Threads                    │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐              │
//! │  │  TLAB    │  │  TLAB    │  │  TLAB    │              │
//! │  └────┬─────┘  └────┬─────┘  └────┬─────┘              │
//! │       │             │             │                     │
//! │       └─────────────┴─────────────┘                     │
//! │                           │                              │
//! │             Write Barrier (check_asave/check_dsave)      │
//! │                           │                              │
//! └───────────────────────────┼──────────────────────────────┘
//!                             │
//! ┌───────────────────────────┼──────────────────────────────┐
//! │                   Arena (arena.rs)                       │
//! │  ┌───────────────────────────────────────────┐          │
//! │  │   Pools (object::pool) + SaveStack         │          │
//! │  │  - composite payloads, index-addressed     │          │
//! │  │  - per-save write-barrier log              │          │
//! │  └───────────────────────────────────────────┘          │
//! │                           │                              │
//! │                           ▼                              │
//! │  ┌───────────────────────────────────────────┐          │
//! │  │   GarbageCollector (gc.rs) + Heap          │          │
//! │  │  - concurrent mark/relocate, byte-level    │          │
//! │  └───────────────────────────────────────────┘          │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ### Restore Sequence
//!
//! 1. **Prepare** (can abort cleanly): run every registered observer's
//!    `restore_prepare` in a fixed phase order; any failure aborts the
//!    restore with the save log untouched
//! 2. **Replay**: pop save records and reverse their write-barrier log back
//!    to the target checkpoint, skipping entries logged under global scope
//! 3. **Commit** (non-fatal): run every observer's `restore_commit`;
//!    failures are collected and returned, not propagated
//!
//! ### GC Cycle Phases (byte-level heap)
//!
//! 1. **Pause Mark Start** (STW < 1ms): Flip mark bits, scan roots
//! 2. **Concurrent Mark** (No STW): Mark objects via load barriers
//! 3. **Pause Mark End** (STW < 1ms): Finalize marking
//! 4. **Prepare Relocation** (No STW): Setup forwarding tables
//! 5. **Concurrent Relocate** (No STW): Copy objects, pointer healing
//! 6. **Cleanup** (No STW): Free old regions
//!
//! ### Colored Pointers
//!
//! The byte-level heap stores GC metadata in pointer bits 44-47:
//!
//! ```text
//! 64-bit Pointer Layout:
//! ┌────────────┬─────┬─────┬─────┬─────┬──────────────────────┐
//! │  Unused    │ Fin │ Rem │ M1  │ M0  │     Address          │
//! │  63-48     │ 47  │ 46  │ 45  │ 44  │       43-0           │
//! └────────────┴─────┴─────┴─────┴─────┴──────────────────────┘
//!
//! Color Bits:
//! - M0 (Marked0): Object marked in even GC cycle
//! - M1 (Marked1): Object marked in odd GC cycle
//! - Rem (Remapped): Pointer already remapped
//! - Fin (Finalizable): Object needs finalization
//! ```
//!
//! ## Platform Support
//!
//! | Platform | Status | Notes |
//! |----------|--------|-------|
//! | Linux x86_64 | ✅ Full | Multi-mapping with mmap |
//! | Linux aarch64 | ✅ Full | Multi-mapping with mmap |
//! | macOS x86_64 | ⚠️ Partial | shm_open based multi-mapping |
//! | macOS Apple Silicon | ⚠️ Partial | shm_open based multi-mapping |
//! | Windows x86_64 | ✅ Full | Multi-mapping with CreateFileMapping/MapViewOfFile |
//!
//! ### Multi-Mapping Implementation by Platform
//!
//! **Unix (Linux/macOS):** Uses `mmap` with `MAP_SHARED` to map the same file descriptor
//! at three different virtual addresses. All views share the same physical pages.
//!
//! **Windows:** Uses `CreateFileMappingW` to create a file mapping object backed by the
//! system paging file, then `MapViewOfFile` to map three views of the same physical pages
//! at different virtual addresses.
//!
//! ## Safety
//!
//! PSVM uses `unsafe` internally but provides safe abstractions.
//! Users must follow these rules:
//!
//! 1. **Always register roots before GC**: Unregistered pointers may be collected
//! 2. **Don't modify registered roots without write barrier**: GC may miss references
//! 3. **Don't use addresses after GC without updating**: Objects may have moved
//! 4. **Respect alignment requirements**: All allocations are 8-byte aligned minimum
//!
//! ### Thread Safety
//!
//! - `GarbageCollector` is `Send + Sync` and safe for concurrent access
//! - `Runtime` is `Send + Sync` and safe for concurrent access
//! - Allocation is thread-safe via TLAB or atomic bump pointer
//! - Root registration requires external synchronization if called from multiple threads
//!
//! ## Performance
//!
//! | Operation | Expected Time |
//! |-----------|---------------|
//! | TLAB Allocation (hit) | < 10ns |
//! | TLAB Allocation (miss) | ~100ns |
//! | Load Barrier (fast path) | < 5ns |
//! | Load Barrier (slow path) | ~50ns |
//! | GC Pause (mark start) | < 1ms |
//! | GC Pause (mark end) | < 1ms |
//!
//! ## Example: Custom Configuration
//!
//! ```rust
//! use psvm::{GarbageCollector, ArenaConfig};
//!
//! fn main() -> Result<(), psvm::PsvmError> {
//!     let config = ArenaConfig {
//!         max_heap_size: 256 * 1024 * 1024,    // 256MB
//!         min_heap_size: 64 * 1024 * 1024,     // 64MB
//!         target_pause_time_ms: 5,              // 5ms target
//!         gc_threads: Some(4),                  // 4 GC threads
//!         generational: true,                   // Enable generational
//!         young_ratio: 0.3,                     // 30% young gen
//!         tlab_enabled: true,                   // Enable TLAB
//!         verbose: true,                        // Enable logging
//!         ..Default::default()
//!     };
//!     
//!     let gc = GarbageCollector::new(config)?;
//!     
//!     // Allocate and use objects
//!     let obj = gc.allocate(128)?;
//!     gc.register_root(obj)?;
//!     
//!     unsafe {
//!         *(obj as *mut u64) = 42;
//!     }
//!     
//!     // GC will preserve obj (it's rooted)
//!     gc.collect();
//!     
//!     gc.unregister_root(obj)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Example: Using Runtime
//!
//! ```rust
//! use psvm::{Runtime, ArenaConfig, GcGeneration};
//!
//! fn main() -> Result<(), psvm::PsvmError> {
//!     let config = ArenaConfig::default();
//!     let runtime = Runtime::new(config)?;
//!     runtime.start()?;
//!     
//!     // Allocate through runtime
//!     let addr = runtime.allocate(256)?;
//!     
//!     // Request GC
//!     runtime.request_gc(GcGeneration::Young);
//!     
//!     // Check safepoint in long loops
//!     for i in 0..1000000 {
//!         if i % 1000 == 0 {
//!             runtime.check_safepoint();
//!         }
//!     }
//!     
//!     runtime.stop()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`arena`]: Top-level facade — pools, save/restore, observers, roots,
//!   messages, and the byte-level collector, all in one handle
//! - [`save`]: The save/restore engine — `SaveStack`, write barriers
//!   (`check_asave*`/`check_dsave*`/`check_gsave`), `restore`, `psvm_copy`
//! - [`observer`]: The fixed-phase-order observer registry driven by restore
//! - [`messages`]: Finalization/GC-completion message queue
//! - [`allocator`]: Memory allocation strategies (bump pointer, TLAB, large objects)
//! - [`barrier`]: Colored pointers and load barriers for concurrent operations
//! - [`config`]: GC configuration parameters and validation
//! - [`error`]: Error types for all PSVM operations
//! - [`gc`]: Core GC cycle management and orchestration
//! - [`heap`]: Region-based heap management and virtual memory
//! - [`marker`]: Concurrent marking system and root scanning
//! - [`memory`]: Low-level memory operations
//! - [`object`]: Object model, pools, and reference maps
//! - [`relocate`]: Object relocation and compaction
//! - [`runtime`]: Runtime integration, safepoints, and finalizers
//! - [`stats`]: Performance statistics and monitoring
//! - [`util`]: Utility functions and helpers
//!
//! ## Limitations
//!
//! - **Stack Scanning**: Conservative stack scanning may keep garbage alive longer than necessary
//! - **Platform Support**: Full multi-mapping only available on Linux
//! - **Precise GC**: Requires explicit root registration
//!
//! ## Getting Help
//!
//! - [API Documentation](https://docs.rs/psvm)
//! - [GitHub Issues](https://github.com/your-org/psvm/issues)
//! - [Troubleshooting Guide](../TROUBLESHOOTING.md)

// Core GC modules
pub mod gc;
pub mod config;
pub mod error;

// Memory management subsystems
pub mod allocator;
pub mod heap;
pub mod memory;
pub mod object;

// GC algorithm components
pub mod barrier;
pub mod marker;
pub mod relocate;

// Save/restore engine and its supporting subsystems
pub mod arena;
pub mod messages;
pub mod observer;
pub mod save;

// Runtime and monitoring
pub mod runtime;
pub mod stats;

// Utilities
pub mod util;

// Re-export main types for convenience
pub use arena::Arena;
pub use config::ArenaConfig;
pub use error::{PsvmError, Result};
pub use gc::{GarbageCollector, GcGeneration, GcReason, GcState};
pub use messages::{AllocPattern, Message};
pub use observer::{Observer, ObserverPhase, ObserverRegistry};
pub use runtime::Runtime;
pub use save::{restore, AllocMode, RestoreReport, SaveRef};

/// PSVM version string from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize PSVM with default configuration
///
/// Creates a new `Runtime` instance with default `ArenaConfig`.
/// The runtime must be started before use with `runtime.start()`.
///
/// # Returns
///
/// - `Ok(Runtime)` - Runtime instance ready to start
/// - `Err(PsvmError)` - Initialization failed (e.g., invalid config, memory allocation failure)
///
/// # Examples
///
/// ```rust
/// let runtime = psvm::init()?;
/// runtime.start()?;
///
/// // Use GC...
///
/// runtime.stop()?;
/// # Ok::<(), psvm::PsvmError>(())
/// ```
pub fn init() -> Result<Runtime> {
    let config = ArenaConfig::default();
    Runtime::new(config)
}

/// Initialize PSVM with custom configuration
///
/// Creates a new `Runtime` instance with the specified configuration.
/// Allows fine-tuning GC behavior for specific workloads.
///
/// # Arguments
///
/// * `config` - Custom GC configuration parameters
///
/// # Returns
///
/// - `Ok(Runtime)` - Runtime instance ready to start
/// - `Err(PsvmError)` - Initialization failed
///
/// # Examples
///
/// ```rust
/// let config = ArenaConfig {
///     max_heap_size: 4 * 1024 * 1024 * 1024, // 4GB
///     target_pause_time_ms: 5,
///     generational: true,
///     ..Default::default()
/// };
///
/// let runtime = psvm::init_with_config(config)?;
/// # Ok::<(), psvm::PsvmError>(())
/// ```
pub fn init_with_config(config: ArenaConfig) -> Result<Runtime> {
    Runtime::new(config)
}
