//! Two-phase migration barrier (spec §4.6).
//!
//! Grounded on the `running_threads`/`sec_threads_ready`/
//! `threads_to_resume`/`should_migrate` globals and `migrate_if_needed`,
//! `incr_running_threads`, `dec_running_threads`, `init_threads_to_resume`
//! in `original_source/kernel/migration.c`. Atomics replace
//! `atomic_int32_t`; `Ordering::SeqCst` matches the spec's explicit
//! sequential-consistency requirement.

use core::sync::atomic::{AtomicBool, AtomicI32, Ordering};

/// Whether a thread, having observed `should_migrate`, should proceed to
/// checkpoint or discovered the flag was cleared before it converged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierOutcome {
    /// All threads converged; this thread should run the checkpoint body.
    Checkpoint,
    /// The flag was not set when this thread reached the barrier.
    NotMigrating,
}

/// Coordinates all application threads through checkpoint quiescence and,
/// symmetrically, through resume convergence.
pub struct MigrationBarrier {
    running_threads: AtomicI32,
    sec_threads_ready: AtomicI32,
    threads_to_resume: AtomicI32,
    should_migrate: AtomicBool,
}

impl Default for MigrationBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationBarrier {
    pub fn new() -> Self {
        Self {
            running_threads: AtomicI32::new(1),
            sec_threads_ready: AtomicI32::new(0),
            threads_to_resume: AtomicI32::new(0),
            should_migrate: AtomicBool::new(false),
        }
    }

    /// Sets the one-shot migration flag (`force_migration_flag`).
    pub fn force_migration(&self, value: bool) {
        self.should_migrate.store(value, Ordering::SeqCst);
    }

    /// A new thread has started; counted in the convergence target
    /// (`incr_running_threads`).
    pub fn incr_running_threads(&self) {
        self.running_threads.fetch_add(1, Ordering::SeqCst);
    }

    /// A thread is exiting; removed from the convergence target
    /// (`dec_running_threads`).
    pub fn dec_running_threads(&self) {
        self.running_threads.fetch_sub(1, Ordering::SeqCst);
    }

    /// Called by every thread at a migration point (`migrate_if_needed`).
    /// `yield_now` is invoked while spinning for convergence; on a real
    /// unikernel this reschedules, in tests it's `std::thread::yield_now`.
    pub fn enter(&self, yield_now: impl Fn()) -> BarrierOutcome {
        if !self.should_migrate.load(Ordering::SeqCst) {
            return BarrierOutcome::NotMigrating;
        }
        self.running_threads.fetch_sub(1, Ordering::SeqCst);
        self.sec_threads_ready.fetch_add(1, Ordering::SeqCst);
        while self.running_threads.load(Ordering::SeqCst) != 0 {
            yield_now();
        }
        self.should_migrate.store(false, Ordering::SeqCst);
        BarrierOutcome::Checkpoint
    }

    /// Primary thread sets how many peer threads must still call
    /// [`Self::resume_arrive`] before resume proceeds
    /// (`init_threads_to_resume`).
    pub fn init_threads_to_resume(&self, count: i32) {
        self.threads_to_resume.store(count, Ordering::SeqCst);
    }

    /// A thread has finished its per-thread resume work (TLS/register
    /// restore prerequisites) and is waiting for its peers.
    pub fn resume_arrive(&self, yield_now: impl Fn()) {
        self.threads_to_resume.fetch_sub(1, Ordering::SeqCst);
        while self.threads_to_resume.load(Ordering::SeqCst) != 0 {
            yield_now();
        }
    }

    pub fn running_threads(&self) -> i32 {
        self.running_threads.load(Ordering::SeqCst)
    }

    pub fn sec_threads_ready(&self) -> i32 {
        self.sec_threads_ready.load(Ordering::SeqCst)
    }
}
