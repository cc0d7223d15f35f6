//! The guard context: the hook a general allocator calls on every
//! allocation and free.
//!
//! A `PhcGuard` is built with `const fn new` so it can live in a `static`
//! next to the allocator that embeds it. It does nothing until [`init`]
//! maps the pool; before that every request passes through. Initialization
//! happens once (`UNINIT -> INITIALIZING -> READY | FAILED`); concurrent
//! callers wait for the winner. A guard that is dropped (never the case for
//! a `static`) unmaps its pool, so every guarded pointer it handed out must
//! be dead by then.
//!
//! [`init`]: PhcGuard::init

use core::cell::UnsafeCell;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU8, Ordering};

use crate::config::{PhcConfig, PoolConfig, Pref, ProcessRole};
use crate::error::{ConfigError, PhcError};
use crate::hardening;
use crate::platform;
use crate::pool::SlotAllocator;
use crate::sampler::Sampler;
use crate::state::{PhcState, StateController};
use crate::stats::{MemoryUsage, PhcReport, PhcStats};
use crate::util::MIB;

const UNINIT: u8 = 0;
const INITIALIZING: u8 = 1;
const READY: u8 = 2;
const FAILED: u8 = 3;

pub struct PhcGuard {
    init_state: AtomicU8,
    pool_config: PoolConfig,
    /// Written once by the initializing thread before `READY` is published.
    pool: UnsafeCell<Option<SlotAllocator>>,
    sampler: Sampler,
    control: StateController,
}

unsafe impl Send for PhcGuard {}
unsafe impl Sync for PhcGuard {}

impl PhcGuard {
    pub const fn new(pool_config: PoolConfig) -> Self {
        PhcGuard {
            init_state: AtomicU8::new(UNINIT),
            pool_config,
            pool: UnsafeCell::new(None),
            sampler: Sampler::new(),
            control: StateController::new(),
        }
    }

    /// Map the pool, seed the sampler from the OS, fix the process role and
    /// apply `config`. Later calls return the current state untouched.
    pub fn init(&self, role: ProcessRole, config: &PhcConfig) -> Result<PhcState, PhcError> {
        self.init_with(role, config, None)
    }

    /// [`init`](Self::init) with a fixed sampler seed, for reproducible runs.
    pub fn init_seeded(
        &self,
        role: ProcessRole,
        config: &PhcConfig,
        seed: u64,
    ) -> Result<PhcState, PhcError> {
        self.init_with(role, config, Some(seed))
    }

    fn init_with(
        &self,
        role: ProcessRole,
        config: &PhcConfig,
        seed: Option<u64>,
    ) -> Result<PhcState, PhcError> {
        config.validate()?;

        match self.init_state.compare_exchange(
            UNINIT,
            INITIALIZING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(INITIALIZING) => {
                while self.init_state.load(Ordering::Acquire) == INITIALIZING {
                    core::hint::spin_loop();
                }
                return self.settled_state();
            }
            Err(_) => return self.settled_state(),
        }

        let pool = match SlotAllocator::new(self.pool_config) {
            Ok(pool) => pool,
            Err(err) => {
                self.init_state.store(FAILED, Ordering::Release);
                tracing::warn!(error = %err, "guard pool unavailable, interception stays off");
                return Err(err);
            }
        };
        unsafe { *self.pool.get() = Some(pool) };

        match seed {
            Some(seed) => self.sampler.seed(seed),
            None => self.sampler.seed_from_os(),
        }
        self.control.set_role(role);
        self.init_state.store(READY, Ordering::Release);

        tracing::debug!(
            slots = self.pool_config.slots,
            pages_per_slot = self.pool_config.pages_per_slot,
            ?role,
            "guard pool mapped"
        );
        Ok(self.update_state(config))
    }

    fn settled_state(&self) -> Result<PhcState, PhcError> {
        match self.init_state.load(Ordering::Acquire) {
            READY => Ok(self.state()),
            _ => Err(PhcError::InvalidPool("guard initialization failed earlier")),
        }
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.init_state.load(Ordering::Acquire) == READY
    }

    #[inline]
    pub fn pool(&self) -> Option<&SlotAllocator> {
        if self.is_initialized() {
            unsafe { (*self.pool.get()).as_ref() }
        } else {
            None
        }
    }

    #[inline]
    pub fn state(&self) -> PhcState {
        self.control.state()
    }

    pub fn role(&self) -> ProcessRole {
        self.control.role()
    }

    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    /// Re-evaluate the state against `config` and the machine's RAM.
    pub fn update_state(&self, config: &PhcConfig) -> PhcState {
        let mem_mb = platform::physical_memory_bytes() / MIB;
        self.update_state_with_memory(config, mem_mb)
    }

    /// Same as [`update_state`](Self::update_state) with the RAM size given.
    /// Before `init` the guard stays in `OnlyFree` whatever the config says.
    pub fn update_state_with_memory(&self, config: &PhcConfig, physical_mem_mb: u64) -> PhcState {
        if !self.is_initialized() {
            return PhcState::OnlyFree;
        }
        let (prev, next) = self.control.update(config, physical_mem_mb, &self.sampler);
        if prev != next {
            tracing::info!(
                state = ?next,
                physical_mem_mb,
                min_ram_mb = config.min_ram_mb,
                enabled = config.enabled,
                "guard state changed"
            );
        }
        next
    }

    /// Preference change notification. Only the guard's own preference
    /// names are accepted; `config` must already carry the new value.
    pub fn pref_changed(&self, name: &str, config: &PhcConfig) -> Result<PhcState, ConfigError> {
        let pref = Pref::from_name(name).ok_or_else(|| ConfigError::UnknownPref(name.into()))?;
        config.validate()?;
        tracing::debug!(pref = pref.name(), "guard preference changed");
        Ok(self.update_state(config))
    }

    /// Allocation hook. `Some` is a guarded allocation of at least `size`
    /// bytes aligned to `align`; `None` means the caller allocates normally.
    #[inline]
    pub fn on_alloc(&self, size: usize, align: usize, call_site: usize) -> Option<NonNull<u8>> {
        if !self.control.is_enabled() || !self.sampler.should_intercept() {
            return None;
        }
        self.alloc_guarded(size, align, call_site)
    }

    #[cold]
    fn alloc_guarded(&self, size: usize, align: usize, call_site: usize) -> Option<NonNull<u8>> {
        let pool = self.pool()?;
        pool.try_acquire(size, align, call_site, self.sampler.now())
            .map(|handle| handle.as_non_null())
    }

    /// Free hook. Returns `true` if `ptr` was a guarded allocation and has
    /// been released; `false` means the caller frees it normally. An invalid
    /// free of guarded memory aborts the process.
    #[inline]
    pub fn on_free(&self, ptr: *mut u8) -> bool {
        match self.pool() {
            Some(pool) if pool.contains(ptr) => {
                self.free_guarded(pool, ptr);
                true
            }
            _ => false,
        }
    }

    #[cold]
    fn free_guarded(&self, pool: &SlotAllocator, ptr: *mut u8) {
        let delay = self.sampler.page_reuse_delay();
        if let Err(err) = pool.release_ptr(ptr, self.sampler.now(), delay) {
            hardening::fatal_invalid_free(&err);
        }
    }

    /// Whether `ptr` points into the guard's pool.
    #[inline]
    pub fn owns(&self, ptr: *const u8) -> bool {
        self.pool().is_some_and(|pool| pool.contains(ptr))
    }

    /// Requested size of a live guarded allocation.
    pub fn usable_size(&self, ptr: *const u8) -> Option<usize> {
        self.pool()?.usable_size(ptr)
    }

    pub fn snapshot(&self) -> Option<PhcReport> {
        self.pool().map(SlotAllocator::report)
    }

    pub fn memory_usage(&self) -> MemoryUsage {
        self.snapshot().unwrap_or_default().usage
    }

    pub fn stats(&self) -> PhcStats {
        self.snapshot().unwrap_or_default().stats
    }

    /// Emit the usage figures, if interception was ever active in this
    /// process.
    pub fn record_and_report_stats(&self) -> Option<PhcReport> {
        if !self.control.was_ever_enabled() {
            return None;
        }
        let report = self.snapshot()?;
        tracing::info!(
            target: "phcguard::telemetry",
            slop = report.usage.fragmentation_bytes,
            slots_allocated = report.stats.slots_allocated,
            slots_freed = report.stats.slots_freed,
            live = report.stats.live,
            quarantined = report.stats.quarantined,
            unused = report.stats.unused(),
            "guard stats"
        );
        Some(report)
    }

    /// End-of-process hook: stop intercepting and report. Guarded
    /// allocations that are still live stay valid and can still be freed.
    pub fn shutdown(&self) -> Option<PhcReport> {
        self.control.disable();
        self.record_and_report_stats()
    }
}
