//! Resume orchestration (spec §4.8).
//!
//! Grounded on the resuming half of `sys_migrate` in
//! `original_source/kernel/migration.c`: primary-only metadata/bss/data/
//! heap/fd restore, all-threads TLS restore, and the conditional
//! popcorn-vs-callee-saved register restore. Per SPEC_FULL.md §4.8 /
//! DESIGN.md's resolved Open Question, both the pre-checkpoint and
//! post-resume barriers are implemented as active — the original's
//! `#if 0`-disabled second barrier is not carried forward disabled.

use alloc::format;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use crate::area::{AreaCodec, ChkptStorage, PAGE_SIZE};
use crate::barrier::MigrationBarrier;
use crate::config::MigrationConfig;
use crate::error::MigrateError;
use crate::fdtable::FdTable;
use crate::heap_fetcher::{HeapFetcher, PageMapper, RemotePageSource, Scheduler};
use crate::metadata::{ChkptMetadata, ThreadId};
use crate::regset::{CalleeSavedPair, RegSet};

/// Spawns a full peer thread that re-enters the resume entry point for its
/// own tid, mirroring secondary-thread creation in the original's resume
/// path. A real unikernel spawns a normal kernel thread; tests use
/// `std::thread`.
pub trait ThreadSpawner {
    type TaskId;

    fn spawn(&self, f: impl FnOnce() + Send + 'static) -> Self::TaskId;
}

/// Which register-restore path a thread should take on resume.
pub enum RegisterRestorePlan {
    /// Cross-ISA path: restore the full snapshot and jump to its PC.
    Full(RegSet),
    /// Homogeneous path: restore the callee-saved bank and return normally.
    CalleeSaved(CalleeSavedPair),
}

pub struct ResumeCoordinator;

impl ResumeCoordinator {
    /// Reads and validates the metadata record — the first thing the
    /// primary does on resume.
    pub fn read_metadata<S: ChkptStorage>(storage: &S) -> Result<ChkptMetadata, MigrateError> {
        let size = core::mem::size_of::<ChkptMetadata>();
        let mut buf = vec![0u8; size];
        AreaCodec::restore_contiguous(storage, "mdata", &mut buf)?;
        ChkptMetadata::from_bytes(&buf).ok_or(MigrateError::MissingMetadata)
    }

    /// Restores bss, data, and (if `config` selects eager transfer, or the
    /// target-side remote-memory disable is set) the full heap. Primary
    /// only.
    pub fn restore_shared_state<S: ChkptStorage>(
        storage: &S,
        md: &ChkptMetadata,
        config: &MigrationConfig,
        heap_reserved_at: usize,
        mut write_bss: impl FnMut(&[u8]),
        mut write_data: impl FnMut(&[u8]),
        write_heap_page: impl FnMut(usize, &[u8; PAGE_SIZE]),
    ) -> Result<(), MigrateError> {
        let mut bss = vec![0u8; md.bss_size];
        AreaCodec::restore_contiguous(storage, "bss", &mut bss)?;
        write_bss(&bss);

        let mut data = vec![0u8; md.data_size];
        AreaCodec::restore_contiguous(storage, "data", &mut data)?;
        write_data(&data);

        let fetcher = HeapFetcher::new(md.heap_start, md.heap_size);
        fetcher.validate_heap_start(heap_reserved_at)?;

        if config.eager_heap_restore() {
            AreaCodec::restore_paged(storage, "heap", md.heap_start, md.heap_size, write_heap_page)?;
        }
        Ok(())
    }

    /// Restores the fd table. Primary only.
    pub fn restore_fds<S: ChkptStorage>(
        storage: &S,
        fds: &FdTable,
        reopen: impl Fn(&str) -> Result<i32, MigrateError>,
        seek: impl Fn(i32, u64) -> Result<(), MigrateError>,
    ) -> Result<(), MigrateError> {
        fds.deserialise(storage, "fds", reopen, seek)
    }

    /// Restores one thread's TLS, if it had any (`tls_size > 0`). Run by
    /// every thread, including the primary.
    pub fn restore_thread_tls<S: ChkptStorage>(
        storage: &S,
        tid: ThreadId,
        tls_size: usize,
        mut write_tls: impl FnMut(&[u8]),
    ) -> Result<(), MigrateError> {
        if tls_size == 0 {
            return Ok(());
        }
        let name = format!("tls.bin.{}", tid);
        let mut buf = vec![0u8; tls_size];
        AreaCodec::restore_contiguous(storage, &name, &mut buf)?;
        write_tls(&buf);
        Ok(())
    }

    /// Restores one thread's stack slab. Run by every thread, including the
    /// primary — the restored stack pointer is what makes resume behave
    /// like a normal return from the original checkpoint call.
    pub fn restore_thread_stack<S: ChkptStorage>(
        storage: &S,
        tid: ThreadId,
        stack_size: usize,
        mut write_stack: impl FnMut(&[u8]),
    ) -> Result<(), MigrateError> {
        let name = format!("stack.bin.{}", tid);
        let mut buf = vec![0u8; stack_size];
        AreaCodec::restore_contiguous(storage, &name, &mut buf)?;
        write_stack(&buf);
        Ok(())
    }

    /// Primary-only: arms the resume barrier with the total number of
    /// threads that must converge (every peer plus the primary itself),
    /// then spawns one peer thread per non-primary id in `task_ids`, each
    /// re-entering the resume entry point for its own tid (spec §4.8,
    /// "Spawn one peer thread per non-primary id in `task_ids[]`"). The
    /// primary still has to call [`MigrationBarrier::resume_arrive`] itself
    /// once its own per-thread resume work is done, same as every peer.
    pub fn spawn_resume_peers<P: ThreadSpawner>(
        md: &ChkptMetadata,
        barrier: &MigrationBarrier,
        spawner: &P,
        resume_entry: impl Fn(ThreadId) + Send + Sync + 'static,
    ) -> Vec<P::TaskId> {
        let peers: Vec<ThreadId> = md.task_ids().skip(1).collect();
        barrier.init_threads_to_resume(peers.len() as i32 + 1);
        let resume_entry = Arc::new(resume_entry);
        peers
            .into_iter()
            .map(|tid| {
                let entry = resume_entry.clone();
                spawner.spawn(move || entry(tid))
            })
            .collect()
    }

    /// Spawns the low-priority heap-fetch walker via
    /// `scheduler.spawn_low_priority`, per spec §4.8 "Spawn (primary only)
    /// the low-priority heap-fetch walker." A no-op under eager heap
    /// transfer, since [`Self::restore_shared_state`] already populated
    /// every page in that case; there's nothing left for the walker to do.
    pub fn spawn_heap_fetch_walker<M, S, R>(
        md: &ChkptMetadata,
        config: &MigrationConfig,
        mapper: M,
        scheduler: &Arc<S>,
        source: R,
        mut write_page: impl FnMut(usize, &[u8; PAGE_SIZE]) + Send + 'static,
    ) -> Option<S::TaskId>
    where
        M: PageMapper + Send + 'static,
        S: Scheduler + Send + Sync + 'static,
        R: RemotePageSource + Send + 'static,
    {
        if config.eager_heap_restore() {
            return None;
        }
        let fetcher = HeapFetcher::new(md.heap_start, md.heap_size);
        let config = *config;
        let scheduler_handle = scheduler.clone();
        Some(scheduler.spawn_low_priority(move || {
            let result = fetcher.run_to_completion(
                &mapper,
                scheduler_handle.as_ref(),
                &source,
                &config,
                &mut write_page,
            );
            if let Err(err) = result {
                log::error!("heap fetch walker: aborted: {err}");
            }
        }))
    }

    /// Decides which register-restore path a thread should take: the
    /// cross-ISA snapshot when `popcorn_regs_valid` is set, else this
    /// thread's own callee-saved bank.
    pub fn register_restore_plan(md: &ChkptMetadata, tid: ThreadId) -> RegisterRestorePlan {
        if md.popcorn_regs_valid {
            #[cfg(target_arch = "aarch64")]
            return RegisterRestorePlan::Full(RegSet::A(md.popcorn_arm_regs));
            #[cfg(target_arch = "x86_64")]
            return RegisterRestorePlan::Full(RegSet::B(md.popcorn_x86_regs));
        }
        RegisterRestorePlan::CalleeSaved(md.callee_saved[tid as usize])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::test_support::MemStorage;
    use crate::checkpoint::{CheckpointCoordinator, ThreadCheckpointInputs};
    use crate::host::test_support::RecordingHostTransport;
    use crate::area::test_support::AlwaysResident;

    #[test]
    fn read_metadata_fails_without_a_prior_checkpoint() {
        let storage = MemStorage::default();
        assert!(matches!(
            ResumeCoordinator::read_metadata(&storage),
            Err(MigrateError::Io { .. })
        ));
    }

    #[test]
    fn full_checkpoint_then_resume_round_trip() {
        let storage = MemStorage::default();
        let mapper = AlwaysResident;
        let host = RecordingHostTransport::default();
        let fds = FdTable::new();
        let mut md = ChkptMetadata::default();
        let config = MigrationConfig::default();

        let stack = vec![0xEEu8; 256];
        CheckpointCoordinator::checkpoint_thread(
            &storage,
            &mut md,
            ThreadCheckpointInputs {
                tid: 0,
                stack: &stack,
                stack_base: 0x8000,
                stack_pointer: 0x8000 + 256 - 32,
                tls: None,
                foreign_regset: None,
            },
        )
        .unwrap();

        let bss = vec![7u8; 32];
        let data = vec![9u8; 32];
        CheckpointCoordinator::checkpoint_shared(
            &storage,
            &mapper,
            &host,
            &fds,
            &mut md,
            0,
            &[],
            &bss,
            &data,
            0x4000_0000,
            0,
            0x1234,
            |_, _| {},
            -1,
            |_| Ok(0),
        )
        .unwrap();

        let restored = ResumeCoordinator::read_metadata(&storage).unwrap();
        assert_eq!(restored.primary_id(), Some(0));
        assert_eq!(restored.stack_offset[0], 32);

        let mut restored_bss = vec![];
        let mut restored_data = vec![];
        ResumeCoordinator::restore_shared_state(
            &storage,
            &restored,
            &config,
            0x4000_0000,
            |b| restored_bss = b.to_vec(),
            |d| restored_data = d.to_vec(),
            |_, _| {},
        )
        .unwrap();
        assert_eq!(restored_bss, bss);
        assert_eq!(restored_data, data);

        let mut restored_stack = vec![];
        ResumeCoordinator::restore_thread_stack(&storage, 0, 256, |s| restored_stack = s.to_vec())
            .unwrap();
        assert_eq!(restored_stack, stack);

        match ResumeCoordinator::register_restore_plan(&restored, 0) {
            RegisterRestorePlan::CalleeSaved(_) => {}
            RegisterRestorePlan::Full(_) => panic!("expected callee-saved path, no foreign regset was supplied"),
        }
    }

    #[test]
    fn heap_address_mismatch_surfaces_through_restore_shared_state() {
        let storage = MemStorage::default();
        let mapper = AlwaysResident;
        let host = RecordingHostTransport::default();
        let fds = FdTable::new();
        let mut md = ChkptMetadata::default();
        let config = MigrationConfig::default();
        let stack = vec![0u8; 16];
        CheckpointCoordinator::checkpoint_thread(
            &storage,
            &mut md,
            ThreadCheckpointInputs {
                tid: 0,
                stack: &stack,
                stack_base: 0,
                stack_pointer: 0,
                tls: None,
                foreign_regset: None,
            },
        )
        .unwrap();
        CheckpointCoordinator::checkpoint_shared(
            &storage, &mapper, &host, &fds, &mut md, 0, &[], &[], &[], 0x4000_0000, 0, 0, |_, _| {},
            -1, |_| Ok(0),
        )
        .unwrap();

        let restored = ResumeCoordinator::read_metadata(&storage).unwrap();
        let err = ResumeCoordinator::restore_shared_state(
            &storage,
            &restored,
            &config,
            0x5000_0000,
            |_| {},
            |_| {},
            |_, _| {},
        )
        .unwrap_err();
        assert!(matches!(err, MigrateError::HeapAddressMismatch { .. }));
    }

    #[test]
    fn multi_thread_resume_converges_through_the_resume_barrier() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::thread;

        struct StdThreadSpawner;
        impl ThreadSpawner for StdThreadSpawner {
            type TaskId = thread::JoinHandle<()>;
            fn spawn(&self, f: impl FnOnce() + Send + 'static) -> Self::TaskId {
                thread::spawn(f)
            }
        }

        let mut md = ChkptMetadata::default();
        md.set_task_ids(0, &[1, 2]);
        let barrier = Arc::new(MigrationBarrier::new());
        let arrived = Arc::new(AtomicUsize::new(0));
        let seen_tids = Arc::new(std::sync::Mutex::new(vec![]));

        let b = barrier.clone();
        let a = arrived.clone();
        let seen = seen_tids.clone();
        let handles = ResumeCoordinator::spawn_resume_peers(
            &md,
            &barrier,
            &StdThreadSpawner,
            move |tid| {
                seen.lock().unwrap().push(tid);
                a.fetch_add(1, Ordering::SeqCst);
                b.resume_arrive(thread::yield_now);
            },
        );
        assert_eq!(handles.len(), 2);

        arrived.fetch_add(1, Ordering::SeqCst);
        barrier.resume_arrive(thread::yield_now);

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(arrived.load(Ordering::SeqCst), 3);
        let mut seen = seen_tids.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, alloc::vec![1, 2]);
    }

    #[test]
    fn heap_fetch_walker_is_spawned_on_the_lazy_path_and_skipped_when_eager() {
        use crate::heap_fetcher::RemotePageSource;
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct StdScheduler;
        impl Scheduler for StdScheduler {
            type TaskId = ();
            fn spawn_low_priority(&self, f: impl FnOnce() + Send + 'static) -> Self::TaskId {
                f()
            }
            fn sleep_ms(&self, _ms: u64) {}
        }

        struct ZeroFillSource;
        impl RemotePageSource for ZeroFillSource {
            fn fetch_page(&self, _vaddr: usize, out: &mut [u8; PAGE_SIZE]) -> Result<(), MigrateError> {
                out.fill(0);
                Ok(())
            }
        }

        let mut md = ChkptMetadata::default();
        md.heap_start = 0x4000_0000;
        md.heap_size = PAGE_SIZE * 2;

        let mut lazy_config = MigrationConfig::default();
        lazy_config.heap_transfer = crate::config::HeapTransferMode::Lazy;
        let scheduler = Arc::new(StdScheduler);
        let fetched_pages = Arc::new(AtomicUsize::new(0));
        let counter = fetched_pages.clone();

        let mapper = crate::area::test_support::AlwaysResident;
        let handle = ResumeCoordinator::spawn_heap_fetch_walker(
            &md,
            &lazy_config,
            mapper,
            &scheduler,
            ZeroFillSource,
            move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );
        assert!(handle.is_some());
        // AlwaysResident means the walk never fetches anything, but the
        // walker must still have been spawned and run to completion.
        assert_eq!(fetched_pages.load(Ordering::SeqCst), 0);

        let mut eager_config = MigrationConfig::default();
        eager_config.heap_transfer = crate::config::HeapTransferMode::Eager;
        let handle = ResumeCoordinator::spawn_heap_fetch_walker(
            &md,
            &eager_config,
            crate::area::test_support::AlwaysResident,
            &scheduler,
            ZeroFillSource,
            |_, _| {},
        );
        assert!(handle.is_none());
    }
}
