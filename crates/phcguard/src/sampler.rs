//! Decides which allocations get a guarded slot.
//!
//! Every allocation event decrements a shared countdown; the event that
//! takes it to zero is intercepted and the countdown is re-armed with a fresh
//! geometric sample. With mean delay `N` this is the same as flipping an
//! independent coin with probability `1/N` per event, so the interception
//! points cannot be predicted from the allocation pattern.

use core::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use crossbeam::atomic::AtomicCell;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::config::ProbabilityConfig;
use crate::platform;
use crate::sync::Mutex;

pub struct Sampler {
    /// Events left until the next interception. Zero or below means the
    /// countdown is unarmed or being re-armed.
    countdown: AtomicI64,
    /// Event clock. Only ever incremented, once per counted event, so it
    /// never runs ahead of the events actually seen.
    events: AtomicU64,
    /// True until the first-tier delay has been armed.
    first_pending: AtomicBool,
    tiers: AtomicCell<ProbabilityConfig>,
    rng: Mutex<Option<SmallRng>>,
}

impl Sampler {
    pub const fn new() -> Self {
        Sampler {
            countdown: AtomicI64::new(0),
            events: AtomicU64::new(0),
            first_pending: AtomicBool::new(true),
            tiers: AtomicCell::new(ProbabilityConfig::LONG_LIVED),
            rng: Mutex::new(None),
        }
    }

    /// Seed from the OS entropy source.
    pub fn seed_from_os(&self) {
        let rng = SmallRng::try_from_os_rng()
            .unwrap_or_else(|_| SmallRng::seed_from_u64(platform::fallback_seed()));
        *self.rng.lock() = Some(rng);
    }

    /// Seed deterministically. For tests and reproductions only.
    pub fn seed(&self, seed: u64) {
        *self.rng.lock() = Some(SmallRng::seed_from_u64(seed));
    }

    /// Swap in a new delay snapshot. Takes effect at the next re-arm.
    pub fn set_tiers(&self, tiers: ProbabilityConfig) {
        self.tiers.store(tiers);
    }

    pub fn tiers(&self) -> ProbabilityConfig {
        self.tiers.load()
    }

    /// Arm the countdown with the first-interception delay. Only the first
    /// call in the sampler's lifetime does anything.
    pub fn arm_first(&self) -> bool {
        if !self.first_pending.swap(false, Ordering::AcqRel) {
            return false;
        }
        let delay = self.next_delay(self.tiers.load().first);
        self.arm(delay);
        true
    }

    fn arm(&self, delay: u64) {
        let delay = delay.min(i64::MAX as u64);
        self.countdown.store(delay as i64, Ordering::Relaxed);
    }

    /// Count one allocation event; true if this one should be intercepted.
    #[inline]
    pub fn should_intercept(&self) -> bool {
        self.events.fetch_add(1, Ordering::Release);
        let prev = self.countdown.fetch_sub(1, Ordering::Relaxed);
        if prev != 1 {
            return false;
        }
        self.rearm();
        true
    }

    #[cold]
    fn rearm(&self) {
        let delay = self.next_delay(self.tiers.load().normal);
        self.arm(delay);
    }

    /// Event clock: allocation events counted so far. Monotonic.
    pub fn now(&self) -> u64 {
        self.events.load(Ordering::Acquire)
    }

    /// Events left on the current countdown; zero or below when unarmed.
    pub(crate) fn remaining(&self) -> i64 {
        self.countdown.load(Ordering::Relaxed)
    }

    /// How long a freed slot stays quarantined.
    pub fn page_reuse_delay(&self) -> u64 {
        self.next_delay(self.tiers.load().page_reuse)
    }

    /// Draw from a geometric distribution on `1, 2, ...` with mean `mean`.
    pub fn next_delay(&self, mean: u32) -> u64 {
        if mean <= 1 {
            return 1;
        }
        let mut rng = self.rng.lock();
        let rng = rng.get_or_insert_with(|| SmallRng::seed_from_u64(platform::fallback_seed()));
        geometric(rng, mean)
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Inverse-transform sample: the number of trials up to and including the
/// first success, success probability `1/mean`.
fn geometric<R: Rng>(rng: &mut R, mean: u32) -> u64 {
    let p = 1.0 / mean as f64;
    // 1 - [0, 1) is (0, 1], so ln never sees zero.
    let u: f64 = 1.0 - rng.random::<f64>();
    let trials = (u.ln() / (-p).ln_1p()).floor();
    if trials >= u64::MAX as f64 {
        u64::MAX
    } else {
        trials as u64 + 1
    }
}
