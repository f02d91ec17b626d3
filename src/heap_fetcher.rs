//! Post-resume heap population (spec §4.5).
//!
//! Grounded on `restore_heap`, `checkpoint_heap` and `periodic_page_access`
//! in `original_source/kernel/migration.c`: the eager/lazy branch
//! (`REMOTE_SERVER_DISABLED`), the fixed-delay batched prefetch walk, and
//! its 16-resident-pages-then-sleep behaviour.

use crate::area::PAGE_SIZE;
use crate::config::MigrationConfig;
use crate::error::MigrateError;

/// A remote page-fetch collaborator: on a lazy heap, [`HeapFetcher::walk_once`]
/// routes every missing page through here to pull its content from the
/// source machine before marking it resident. The transport itself (spec
/// §9) is out of scope — modeled as a narrow trait the embedding kernel
/// implements over its own network/block path.
pub trait RemotePageSource {
    fn fetch_page(&self, vaddr: usize, out: &mut [u8; PAGE_SIZE]) -> Result<(), MigrateError>;
}

/// Same `PageMapper` shape used by [`crate::area`]; re-declared here with
/// heap-fetcher-specific naming so call sites read naturally.
pub use crate::area::PageMapper;

/// Scheduling collaborator for the background prefetch walker. A real
/// unikernel spawns a low-priority kernel thread; tests use `std::thread`.
pub trait Scheduler {
    type TaskId: Copy;

    fn spawn_low_priority(&self, f: impl FnOnce() + Send + 'static) -> Self::TaskId;
    fn sleep_ms(&self, ms: u64);
}

/// Drives post-resume heap population, eager or lazy.
pub struct HeapFetcher {
    pub heap_start: usize,
    pub heap_size: usize,
}

impl HeapFetcher {
    pub fn new(heap_start: usize, heap_size: usize) -> Self {
        Self { heap_start, heap_size }
    }

    /// Validates the heap start address recorded at checkpoint against the
    /// address actually reserved on the target (`restore_heap`'s `EINVAL`
    /// check).
    pub fn validate_heap_start(&self, reserved_at: usize) -> Result<(), MigrateError> {
        if reserved_at != self.heap_start {
            return Err(MigrateError::HeapAddressMismatch {
                expected: self.heap_start,
                actual: reserved_at,
            });
        }
        Ok(())
    }

    /// One sweep of the low-priority prefetch walker: walks the heap range,
    /// fetching unmapped pages from `source` in batches of
    /// `config.prefetch_batch`, sleeping for `config.prefetch_delay_ms`
    /// after each batch boundary — either after `prefetch_batch` consecutive
    /// already-resident pages, or immediately after fetching a missing one
    /// (`periodic_page_access`). Returns `true` if the walk reached the end
    /// of the heap.
    pub fn walk_once<M: PageMapper, S: Scheduler, R: RemotePageSource>(
        &self,
        mapper: &M,
        scheduler: &S,
        source: &R,
        config: &MigrationConfig,
        start_offset: usize,
        mut write_page: impl FnMut(usize, &[u8; PAGE_SIZE]),
    ) -> Result<(bool, usize), MigrateError> {
        let mut offset = start_offset;
        let mut resident_streak = 0u32;
        while offset < self.heap_size {
            let addr = self.heap_start + offset;
            if mapper.is_resident(addr) {
                resident_streak += 1;
                if resident_streak >= config.prefetch_batch {
                    offset += PAGE_SIZE;
                    scheduler.sleep_ms(config.prefetch_delay_ms);
                    return Ok((false, offset));
                }
            } else {
                let mut page = [0u8; PAGE_SIZE];
                source.fetch_page(addr, &mut page)?;
                write_page(addr, &page);
                mapper.touch(addr);
                offset += PAGE_SIZE;
                scheduler.sleep_ms(config.prefetch_delay_ms);
                return Ok((false, offset));
            }
            offset += PAGE_SIZE;
        }
        Ok((true, offset))
    }

    /// Drives the walker to completion by repeatedly calling
    /// [`Self::walk_once`] until it reports the heap end reached, sleeping
    /// between sweeps via `scheduler`. Stops and surfaces the error on the
    /// first fetch failure. The caller (`ResumeCoordinator`) is responsible
    /// for running this inside a task spawned with
    /// `Scheduler::spawn_low_priority` and retaining the returned task id
    /// (`walker_task_id`, SPEC_FULL.md §2b).
    pub fn run_to_completion<M: PageMapper, S: Scheduler, R: RemotePageSource>(
        &self,
        mapper: &M,
        scheduler: &S,
        source: &R,
        config: &MigrationConfig,
        mut write_page: impl FnMut(usize, &[u8; PAGE_SIZE]),
    ) -> Result<(), MigrateError> {
        let mut offset = 0;
        loop {
            let (done, next) = self.walk_once(mapper, scheduler, source, config, offset, &mut write_page)?;
            offset = next;
            if done {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingMapper {
        resident_until: usize,
        heap_start: usize,
        touched: AtomicUsize,
    }

    impl PageMapper for RecordingMapper {
        fn is_resident(&self, vaddr: usize) -> bool {
            vaddr - self.heap_start < self.resident_until
        }
        fn touch(&self, _vaddr: usize) {
            self.touched.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct InlineScheduler {
        sleeps: AtomicUsize,
    }
    impl Scheduler for InlineScheduler {
        type TaskId = ();
        fn spawn_low_priority(&self, f: impl FnOnce() + Send + 'static) -> Self::TaskId {
            f()
        }
        fn sleep_ms(&self, _ms: u64) {
            self.sleeps.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct StubSource {
        marker: u8,
        calls: AtomicUsize,
    }
    impl RemotePageSource for StubSource {
        fn fetch_page(&self, _vaddr: usize, out: &mut [u8; PAGE_SIZE]) -> Result<(), MigrateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            out.fill(self.marker);
            Ok(())
        }
    }

    struct FailingSource;
    impl RemotePageSource for FailingSource {
        fn fetch_page(&self, _vaddr: usize, _out: &mut [u8; PAGE_SIZE]) -> Result<(), MigrateError> {
            Err(MigrateError::RemoteFetch { vaddr: 0 })
        }
    }

    #[test]
    fn walk_stops_after_prefetch_batch_resident_pages() {
        let heap_start = 0x4000_0000;
        let heap_size = PAGE_SIZE * 32;
        let mapper = RecordingMapper {
            resident_until: heap_size,
            heap_start,
            touched: AtomicUsize::new(0),
        };
        let scheduler = InlineScheduler { sleeps: AtomicUsize::new(0) };
        let source = StubSource { marker: 0, calls: AtomicUsize::new(0) };
        let mut config = MigrationConfig::default();
        config.prefetch_batch = 4;
        let fetcher = HeapFetcher::new(heap_start, heap_size);

        let (done, next) = fetcher
            .walk_once(&mapper, &scheduler, &source, &config, 0, |_, _| {})
            .unwrap();
        assert!(!done);
        assert_eq!(next, PAGE_SIZE * 4);
        assert_eq!(scheduler.sleeps.load(Ordering::SeqCst), 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn walk_fetches_from_remote_source_and_stops_immediately_on_missing_page() {
        let heap_start = 0x4000_0000;
        let heap_size = PAGE_SIZE * 8;
        let mapper = RecordingMapper {
            resident_until: 0,
            heap_start,
            touched: AtomicUsize::new(0),
        };
        let scheduler = InlineScheduler { sleeps: AtomicUsize::new(0) };
        let source = StubSource { marker: 0xAB, calls: AtomicUsize::new(0) };
        let config = MigrationConfig::default();
        let fetcher = HeapFetcher::new(heap_start, heap_size);

        let mut written = alloc::vec::Vec::new();
        let (done, next) = fetcher
            .walk_once(&mapper, &scheduler, &source, &config, 0, |addr, page| {
                written.push((addr, page[0]));
            })
            .unwrap();
        assert!(!done);
        assert_eq!(next, PAGE_SIZE);
        assert_eq!(mapper.touched.load(Ordering::SeqCst), 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(written, alloc::vec![(heap_start, 0xAB)]);
    }

    #[test]
    fn walk_reaches_end_of_heap() {
        let heap_start = 0x4000_0000;
        let heap_size = PAGE_SIZE * 2;
        let mapper = RecordingMapper {
            resident_until: heap_size,
            heap_start,
            touched: AtomicUsize::new(0),
        };
        let scheduler = InlineScheduler { sleeps: AtomicUsize::new(0) };
        let source = StubSource { marker: 0, calls: AtomicUsize::new(0) };
        let mut config = MigrationConfig::default();
        config.prefetch_batch = 100;
        let fetcher = HeapFetcher::new(heap_start, heap_size);

        let (done, next) = fetcher
            .walk_once(&mapper, &scheduler, &source, &config, 0, |_, _| {})
            .unwrap();
        assert!(done);
        assert_eq!(next, heap_size);
    }

    #[test]
    fn walk_surfaces_remote_fetch_failure() {
        let heap_start = 0x4000_0000;
        let heap_size = PAGE_SIZE * 4;
        let mapper = RecordingMapper {
            resident_until: 0,
            heap_start,
            touched: AtomicUsize::new(0),
        };
        let scheduler = InlineScheduler { sleeps: AtomicUsize::new(0) };
        let fetcher = HeapFetcher::new(heap_start, heap_size);
        let config = MigrationConfig::default();

        let err = fetcher
            .walk_once(&mapper, &scheduler, &FailingSource, &config, 0, |_, _| {})
            .unwrap_err();
        assert!(matches!(err, MigrateError::RemoteFetch { .. }));
    }

    #[test]
    fn run_to_completion_drives_the_walk_to_the_end() {
        let heap_start = 0x4000_0000;
        let heap_size = PAGE_SIZE * 4;
        let mapper = RecordingMapper {
            resident_until: 0,
            heap_start,
            touched: AtomicUsize::new(0),
        };
        let scheduler = InlineScheduler { sleeps: AtomicUsize::new(0) };
        let source = StubSource { marker: 1, calls: AtomicUsize::new(0) };
        let config = MigrationConfig::default();
        let fetcher = HeapFetcher::new(heap_start, heap_size);

        fetcher
            .run_to_completion(&mapper, &scheduler, &source, &config, |_, _| {})
            .unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
        assert_eq!(mapper.touched.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn heap_address_mismatch_is_rejected() {
        let fetcher = HeapFetcher::new(0x4000_0000, PAGE_SIZE);
        assert!(matches!(
            fetcher.validate_heap_start(0x5000_0000),
            Err(MigrateError::HeapAddressMismatch { .. })
        ));
        assert!(fetcher.validate_heap_start(0x4000_0000).is_ok());
    }
}
