//! Error types for the guard and its configuration.

use std::path::PathBuf;
use thiserror::Error;

use crate::pool::SlotState;

/// Errors raised by the slot allocator and the guard context.
///
/// `InvalidHandle` and `InvalidPointer` are fatal at the allocator hook: the
/// guard turns them into a diagnostic abort. They are surfaced as values at
/// the `SlotAllocator` level so the detection itself can be exercised.
#[derive(Debug, Error)]
pub enum PhcError {
    /// No free slot, even after recycling. The caller falls back to the
    /// general allocator.
    #[error("guard pool exhausted")]
    PoolExhausted,

    /// A free of a slot that is not live, or through a handle from an
    /// earlier generation: double free or use-after-free.
    #[error(
        "invalid free of guarded slot {index}: state {state:?}, handle generation {generation}, \
         slot generation {expected}, size {size}, call site {call_site:#x}"
    )]
    InvalidHandle {
        index: usize,
        generation: u32,
        expected: u32,
        state: SlotState,
        size: usize,
        call_site: usize,
    },

    /// A pointer inside the pool that is not the start of the slot's allocation.
    #[error("invalid free of {addr:#x}: inside guarded slot {index} but not its allocation")]
    InvalidPointer { addr: usize, index: usize },

    /// The pool's address space could not be reserved.
    #[error("failed to map {bytes} bytes for the guard pool")]
    MapFailed { bytes: usize },

    #[error("invalid pool geometry: {0}")]
    InvalidPool(&'static str),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("configuration parsing error: {0}")]
    Parsing(#[from] Box<figment::Error>),

    /// Mean delays are event counts and must be positive.
    #[error("{pref} must be a positive integer, got {value}")]
    InvalidDelay { pref: &'static str, value: u32 },

    #[error("{pref}: cannot parse {value:?}")]
    InvalidValue { pref: &'static str, value: String },

    #[error("unknown preference {0:?}")]
    UnknownPref(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Parsing(Box::new(err))
    }
}
