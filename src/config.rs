//! Injectable migration configuration (SPEC_FULL.md §2a, §6).
//!
//! Stands in for the original's environment variables (`MIGRATE_PORT`,
//! `MIGRATE_SERVER`, `BLK_FORMAT`) and its compile-time eager/lazy switch.
//! The crate is `no_std` and embedded in a unikernel, so there is no
//! `std::env`/config-file parsing here — the embedding kernel constructs a
//! `MigrationConfig` once at boot and passes it in, the same way the
//! teacher crate exposes its tunables as plain struct fields and Cargo
//! features rather than through a config-parsing dependency.

/// How the heap is transported across migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapTransferMode {
    /// The whole heap is serialised and restored before threads run
    /// (`REMOTE_SERVER_DISABLED` in the original).
    Eager,
    /// The heap is left unmapped on resume and populated on demand by
    /// [`crate::heap_fetcher::HeapFetcher`].
    Lazy,
}

/// Process-wide migration configuration, constructed once by the embedding
/// kernel and threaded through the coordinators.
#[derive(Debug, Clone, Copy)]
pub struct MigrationConfig {
    /// Chooses eager vs. lazy heap transfer.
    pub heap_transfer: HeapTransferMode,
    /// Disables the remote-memory path on the source (`MIGRATE_PORT`
    /// env var in the original).
    pub remote_memory_disabled_on_source: bool,
    /// Disables the remote-memory path on the target (`MIGRATE_SERVER`
    /// env var in the original).
    pub remote_memory_disabled_on_target: bool,
    /// Number of thread slots reserved by [`crate::stack_slots::StackSlots`].
    pub stack_slot_count: usize,
    /// Size in bytes of each thread's stack slab.
    pub default_stack_size: usize,
    /// Delay between prefetch-walker sweeps, in milliseconds.
    pub prefetch_delay_ms: u64,
    /// Number of already-resident pages the prefetch walker will skip past
    /// before sleeping (`VALID_ADDRESSES_TO_TRY` in the original).
    pub prefetch_batch: u32,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            heap_transfer: HeapTransferMode::Lazy,
            remote_memory_disabled_on_source: false,
            remote_memory_disabled_on_target: false,
            stack_slot_count: 64,
            default_stack_size: 8 * 1024 * 1024,
            prefetch_delay_ms: 200,
            prefetch_batch: 16,
        }
    }
}

impl MigrationConfig {
    /// Whether the heap should be restored eagerly, taking both the
    /// compile-time default and the per-side disable flags into account —
    /// the original's `#if REMOTE_SERVER_DISABLED` plus env var checks
    /// collapsed into one predicate.
    pub fn eager_heap_restore(&self) -> bool {
        self.heap_transfer == HeapTransferMode::Eager || self.remote_memory_disabled_on_target
    }

    pub fn eager_heap_checkpoint(&self) -> bool {
        self.heap_transfer == HeapTransferMode::Eager || self.remote_memory_disabled_on_source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_lazy() {
        let cfg = MigrationConfig::default();
        assert_eq!(cfg.heap_transfer, HeapTransferMode::Lazy);
        assert!(!cfg.eager_heap_restore());
    }

    #[test]
    fn disable_flag_forces_eager_even_in_lazy_mode() {
        let mut cfg = MigrationConfig::default();
        cfg.remote_memory_disabled_on_target = true;
        assert!(cfg.eager_heap_restore());
    }
}
