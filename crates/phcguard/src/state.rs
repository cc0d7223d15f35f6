//! Process-wide interception state.

use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crossbeam::atomic::AtomicCell;

use crate::config::{PhcConfig, ProcessRole};
use crate::sampler::Sampler;
use crate::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PhcState {
    /// Guarded allocations can still be freed, nothing new is intercepted.
    OnlyFree = 0,
    /// Interception is active.
    Enabled = 1,
}

impl PhcState {
    #[inline]
    fn from_u8(v: u8) -> Self {
        if v == PhcState::Enabled as u8 {
            PhcState::Enabled
        } else {
            PhcState::OnlyFree
        }
    }
}

/// Holds the state byte, the process role and the sticky "ever enabled" bit.
pub struct StateController {
    state: AtomicU8,
    ever_enabled: AtomicBool,
    role: AtomicCell<ProcessRole>,
    /// Serializes updates; readers never take it.
    update_lock: Mutex<()>,
}

impl StateController {
    pub const fn new() -> Self {
        StateController {
            state: AtomicU8::new(PhcState::OnlyFree as u8),
            ever_enabled: AtomicBool::new(false),
            role: AtomicCell::new(ProcessRole::LongLived),
            update_lock: Mutex::new(()),
        }
    }

    #[inline]
    pub fn state(&self) -> PhcState {
        PhcState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.state.load(Ordering::Acquire) == PhcState::Enabled as u8
    }

    /// Whether interception was ever active in this process. Only gates
    /// stats reporting.
    pub fn was_ever_enabled(&self) -> bool {
        self.ever_enabled.load(Ordering::Acquire)
    }

    pub fn role(&self) -> ProcessRole {
        self.role.load()
    }

    pub(crate) fn set_role(&self, role: ProcessRole) {
        self.role.store(role);
    }

    /// Recompute the state from `config` and the machine's RAM.
    ///
    /// The role's delays reach the sampler before `Enabled` is published, so
    /// the first interception after enabling already uses them. Returns the
    /// previous and the new state.
    pub fn update(
        &self,
        config: &PhcConfig,
        physical_mem_mb: u64,
        sampler: &Sampler,
    ) -> (PhcState, PhcState) {
        let _serialized = self.update_lock.lock();
        let next = if config.enabled && physical_mem_mb >= config.min_ram_mb {
            sampler.set_tiers(config.tier(self.role()));
            sampler.arm_first();
            PhcState::Enabled
        } else {
            PhcState::OnlyFree
        };

        let prev = PhcState::from_u8(self.state.swap(next as u8, Ordering::AcqRel));
        if next == PhcState::Enabled {
            self.ever_enabled.store(true, Ordering::Release);
        }
        (prev, next)
    }

    /// Stop intercepting; outstanding guarded allocations stay guarded.
    pub fn disable(&self) -> PhcState {
        let _serialized = self.update_lock.lock();
        PhcState::from_u8(self.state.swap(PhcState::OnlyFree as u8, Ordering::AcqRel))
    }
}

impl Default for StateController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProbabilityConfig;

    #[test]
    fn low_memory_forces_only_free() {
        let control = StateController::new();
        let sampler = Sampler::new();
        let config = PhcConfig {
            min_ram_mb: 8192,
            ..PhcConfig::default()
        };
        assert_eq!(control.update(&config, 4096, &sampler).1, PhcState::OnlyFree);
        assert!(!control.was_ever_enabled());
        assert_eq!(control.update(&config, 8192, &sampler).1, PhcState::Enabled);
        assert!(control.was_ever_enabled());
    }

    #[test]
    fn disabled_flag_wins_over_memory() {
        let control = StateController::new();
        let config = PhcConfig {
            enabled: false,
            min_ram_mb: 0,
            ..PhcConfig::default()
        };
        assert_eq!(control.update(&config, u64::MAX, &Sampler::new()).1, PhcState::OnlyFree);
    }

    #[test]
    fn ever_enabled_is_sticky() {
        let control = StateController::new();
        let sampler = Sampler::new();
        let mut config = PhcConfig {
            min_ram_mb: 0,
            ..PhcConfig::default()
        };
        control.update(&config, 1, &sampler);
        config.enabled = false;
        let (prev, next) = control.update(&config, 1, &sampler);
        assert_eq!((prev, next), (PhcState::Enabled, PhcState::OnlyFree));
        assert!(control.was_ever_enabled());
    }

    #[test]
    fn content_role_selects_content_delays() {
        let control = StateController::new();
        control.set_role(ProcessRole::Content);
        let sampler = Sampler::new();
        let config = PhcConfig {
            min_ram_mb: 0,
            ..PhcConfig::default()
        };
        control.update(&config, 1, &sampler);
        assert_eq!(sampler.tiers(), config.content_avg_delay);
    }

    fn tiers_config(first: u32, normal: u32) -> PhcConfig {
        let tier = ProbabilityConfig {
            first,
            normal,
            page_reuse: 1,
        };
        PhcConfig {
            enabled: true,
            min_ram_mb: 0,
            avg_delay: tier,
            content_avg_delay: tier,
        }
    }

    #[test]
    fn first_enable_arms_with_first_tier() {
        let control = StateController::new();
        let sampler = Sampler::new();
        sampler.seed(19);
        control.update(&tiers_config(1, u32::MAX), 1, &sampler);

        assert!(sampler.should_intercept());
        assert!((0..10_000).all(|_| !sampler.should_intercept()));
    }

    #[test]
    fn re_enable_keeps_pending_countdown() {
        let control = StateController::new();
        let sampler = Sampler::new();
        sampler.seed(23);
        let on = tiers_config(u32::MAX, 1);
        let off = PhcConfig {
            enabled: false,
            ..on
        };

        control.update(&on, 1, &sampler);
        let pending = sampler.remaining();
        assert!(pending > 10_000, "first tier not armed: {pending}");

        assert_eq!(control.update(&off, 1, &sampler).1, PhcState::OnlyFree);
        assert_eq!(control.update(&on, 1, &sampler).1, PhcState::Enabled);
        assert_eq!(sampler.remaining(), pending);
        // A re-arm with `normal = 1` would intercept every event.
        assert!((0..1000).all(|_| !sampler.should_intercept()));
    }
}
