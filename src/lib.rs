//! Heterogeneous process migration core for a minimalist unikernel.
//!
//! This crate provides the building blocks a unikernel wires together to
//! checkpoint a running, single-address-space process and resume it on a
//! (possibly differently-architected) machine: register snapshot/restore
//! ([`regset`]), memory-area serialisation ([`area`]), the shadow
//! file-descriptor table ([`fdtable`]), deterministic per-thread stack
//! placement ([`stack_slots`]), lazy/eager heap population
//! ([`heap_fetcher`]), the two-phase thread barrier ([`barrier`]), and the
//! checkpoint/resume orchestration built from all of the above
//! ([`checkpoint`], [`resume`]).
//!
//! Filesystem, host-transport, scheduler and page-mapper access are each
//! modeled as narrow traits ([`area::ChkptStorage`], [`host::HostTransport`],
//! [`heap_fetcher::Scheduler`], [`area::PageMapper`]) rather than called
//! directly, since those subsystems belong to the embedding kernel, not to
//! this core.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
extern crate log;

pub mod area;
pub mod barrier;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod fdtable;
pub mod heap_fetcher;
pub mod host;
pub mod metadata;
pub mod regset;
pub mod resume;
pub mod stack_slots;

pub use barrier::{BarrierOutcome, MigrationBarrier};
pub use config::{HeapTransferMode, MigrationConfig};
pub use error::{MigrateError, MigrateOutcome, MigrateSideError};
pub use metadata::{ChkptMetadata, ThreadId, MAX_TASKS};
pub use regset::RegSet;

/// Collapses a `migrate()`-shaped result back onto the original kernel's
/// `{0, 1, -1, -2}` integer contract (spec §6), for callers that still
/// expect the legacy ABI instead of the typed [`MigrateOutcome`]/
/// [`MigrateSideError`] pair.
pub fn migrate_raw(result: Result<MigrateOutcome, MigrateSideError>) -> i32 {
    match result {
        Ok(MigrateOutcome::Resumed) => 0,
        Ok(MigrateOutcome::NotMigrating) => 1,
        Err(MigrateSideError::Source(_)) => -1,
        Err(MigrateSideError::Target(_)) => -2,
    }
}
