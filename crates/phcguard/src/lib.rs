//! Probabilistic heap-corruption guard.
//!
//! A small, randomly chosen fraction of allocations is placed alone on a
//! page bracketed by inaccessible guard pages. Overruns of those allocations
//! fault on the spot, accesses after free fault because the page is revoked
//! when it is freed, and double or stale frees abort with a diagnostic.
//!
//! The entry point is [`PhcGuard`], which a general allocator calls on every
//! allocation and free; [`PhcAllocator`] wires it into `#[global_allocator]`.

extern crate libc;

pub mod config;
pub mod error;
pub mod guard;
pub mod hardening;
pub mod platform;
pub mod pool;
pub mod sampler;
pub mod state;
pub mod stats;
pub mod sync;
pub mod util;

#[cfg(feature = "global-allocator")]
pub mod global_alloc;

pub use config::{PhcConfig, PoolConfig, Pref, ProbabilityConfig, ProcessRole};
pub use error::{ConfigError, PhcError};
#[cfg(feature = "global-allocator")]
pub use global_alloc::PhcAllocator;
pub use guard::PhcGuard;
pub use pool::{SlotAllocator, SlotHandle, SlotMeta, SlotState};
pub use state::PhcState;
pub use stats::{MemoryUsage, PhcReport, PhcStats};
