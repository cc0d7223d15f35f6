//! Guard configuration.
//!
//! Everything the host application can tune at runtime lives in
//! [`PhcConfig`]: the enable switch, the minimum physical RAM, and two sets
//! of mean delays. Each field also has a dotted preference name so a host
//! with a preference system can forward single-key change notifications
//! (see [`Pref`] and [`PhcConfig::set_pref`]).
//!
//! Loading order for [`PhcConfig::load`]:
//! 1. Built-in defaults
//! 2. The YAML file named by `PHC_CONFIG`, else `phc.yaml` if present
//! 3. `PHC_*` environment variables (`__` separates nested keys, e.g.
//!    `PHC_AVG_DELAY__NORMAL=8192`)
//!
//! [`PoolConfig`] is not part of this: the pool geometry is fixed when the
//! guard is constructed.

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Which delay set the process uses. Chosen once at init.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessRole {
    /// Processes that live for the whole session.
    LongLived,
    /// Transient content processes that come and go.
    Content,
}

/// Mean delays, in allocation events, for the three sampling tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbabilityConfig {
    /// Mean delay before the first interception of the process.
    pub first: u32,
    /// Mean delay between interceptions afterwards.
    pub normal: u32,
    /// Mean delay before a freed slot may be reused.
    pub page_reuse: u32,
}

impl ProbabilityConfig {
    pub const LONG_LIVED: Self = Self {
        first: 64 * 1024,
        normal: 16 * 1024,
        page_reuse: 256 * 1024,
    };

    pub const CONTENT: Self = Self {
        first: 16 * 1024,
        normal: 4 * 1024,
        page_reuse: 256 * 1024,
    };
}

impl Default for ProbabilityConfig {
    fn default() -> Self {
        Self::LONG_LIVED
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhcConfig {
    pub enabled: bool,
    /// Interception is only activated on machines with at least this much RAM.
    pub min_ram_mb: u64,
    /// Delays for long-lived processes.
    pub avg_delay: ProbabilityConfig,
    /// Delays for content processes.
    pub content_avg_delay: ProbabilityConfig,
}

impl Default for PhcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // 8GB machines often report a little less after firmware reservations.
            min_ram_mb: 8000,
            avg_delay: ProbabilityConfig::LONG_LIVED,
            content_avg_delay: ProbabilityConfig::CONTENT,
        }
    }
}

impl PhcConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(PhcConfig::default()));

        let path = std::env::var_os("PHC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("phc.yaml"));
        if path.exists() {
            figment = figment.merge(Yaml::file(&path));
        } else {
            tracing::debug!(path = %path.display(), "guard config file not found, using defaults");
        }

        let config: Self = figment
            .merge(Env::prefixed("PHC_").ignore(&["config"]).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load defaults overlaid with a specific YAML file. The environment is not consulted.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let config: Self = Figment::from(Serialized::defaults(PhcConfig::default()))
            .merge(Yaml::file(path))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for pref in Pref::ALL {
            if let Some(value) = self.delay(pref) {
                if value == 0 {
                    return Err(ConfigError::InvalidDelay {
                        pref: pref.name(),
                        value,
                    });
                }
            }
        }
        Ok(())
    }

    /// The delay set for `role`.
    pub fn tier(&self, role: ProcessRole) -> ProbabilityConfig {
        match role {
            ProcessRole::LongLived => self.avg_delay,
            ProcessRole::Content => self.content_avg_delay,
        }
    }

    /// Apply a single preference change by name, e.g. from a host
    /// preference observer. The config is left untouched on error.
    pub fn set_pref(&mut self, name: &str, value: &str) -> Result<Pref, ConfigError> {
        let pref = Pref::from_name(name).ok_or_else(|| ConfigError::UnknownPref(name.into()))?;
        let invalid = || ConfigError::InvalidValue {
            pref: pref.name(),
            value: value.into(),
        };
        let value = value.trim();

        match pref {
            Pref::Enabled => self.enabled = value.parse().map_err(|_| invalid())?,
            Pref::MinRamMb => self.min_ram_mb = value.parse().map_err(|_| invalid())?,
            _ => {
                let delay: u32 = value.parse().map_err(|_| invalid())?;
                if delay == 0 {
                    return Err(ConfigError::InvalidDelay {
                        pref: pref.name(),
                        value: delay,
                    });
                }
                *self.delay_mut(pref) = delay;
            }
        }
        Ok(pref)
    }

    fn delay(&self, pref: Pref) -> Option<u32> {
        match pref {
            Pref::Enabled | Pref::MinRamMb => None,
            Pref::AvgDelayFirst => Some(self.avg_delay.first),
            Pref::AvgDelayNormal => Some(self.avg_delay.normal),
            Pref::AvgDelayPageReuse => Some(self.avg_delay.page_reuse),
            Pref::AvgDelayContentFirst => Some(self.content_avg_delay.first),
            Pref::AvgDelayContentNormal => Some(self.content_avg_delay.normal),
            Pref::AvgDelayContentPageReuse => Some(self.content_avg_delay.page_reuse),
        }
    }

    fn delay_mut(&mut self, pref: Pref) -> &mut u32 {
        match pref {
            Pref::AvgDelayFirst => &mut self.avg_delay.first,
            Pref::AvgDelayNormal => &mut self.avg_delay.normal,
            Pref::AvgDelayPageReuse => &mut self.avg_delay.page_reuse,
            Pref::AvgDelayContentFirst => &mut self.content_avg_delay.first,
            Pref::AvgDelayContentNormal => &mut self.content_avg_delay.normal,
            Pref::AvgDelayContentPageReuse => &mut self.content_avg_delay.page_reuse,
            Pref::Enabled | Pref::MinRamMb => unreachable!("{} is not a delay", pref.name()),
        }
    }
}

/// Preference keys the guard observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pref {
    Enabled,
    MinRamMb,
    AvgDelayFirst,
    AvgDelayNormal,
    AvgDelayPageReuse,
    AvgDelayContentFirst,
    AvgDelayContentNormal,
    AvgDelayContentPageReuse,
}

impl Pref {
    pub const ALL: [Pref; 8] = [
        Pref::Enabled,
        Pref::MinRamMb,
        Pref::AvgDelayFirst,
        Pref::AvgDelayNormal,
        Pref::AvgDelayPageReuse,
        Pref::AvgDelayContentFirst,
        Pref::AvgDelayContentNormal,
        Pref::AvgDelayContentPageReuse,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Pref::Enabled => "memory.phc.enabled",
            Pref::MinRamMb => "memory.phc.min_ram_mb",
            Pref::AvgDelayFirst => "memory.phc.avg_delay.first",
            Pref::AvgDelayNormal => "memory.phc.avg_delay.normal",
            Pref::AvgDelayPageReuse => "memory.phc.avg_delay.page_reuse",
            Pref::AvgDelayContentFirst => "memory.phc.avg_delay.content.first",
            Pref::AvgDelayContentNormal => "memory.phc.avg_delay.content.normal",
            Pref::AvgDelayContentPageReuse => "memory.phc.avg_delay.content.page_reuse",
        }
    }

    pub fn from_name(name: &str) -> Option<Pref> {
        Pref::ALL.into_iter().find(|p| p.name() == name)
    }
}

/// Pool geometry, fixed for the lifetime of a guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of guarded slots.
    pub slots: usize,
    /// OS pages per slot; the largest interceptable allocation.
    pub pages_per_slot: usize,
}

impl PoolConfig {
    pub const DEFAULT: Self = Self {
        slots: 256,
        pages_per_slot: 1,
    };
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
