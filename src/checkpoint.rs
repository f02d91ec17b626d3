//! Checkpoint orchestration (spec §4.7).
//!
//! Grounded on the non-resuming half of `sys_migrate` in
//! `original_source/kernel/migration.c`: every thread saves its own stack,
//! TLS and registers; the primary additionally drains heap, bss, data and
//! fds, collects `task_ids`, and writes metadata **last** before notifying
//! the host.

use alloc::format;
use alloc::vec;

use crate::area::{AreaCodec, ChkptStorage, PageMapper, PAGE_SIZE};
use crate::error::MigrateError;
use crate::fdtable::FdTable;
use crate::host::{HostTransport, MigratePayload};
use crate::metadata::{ChkptMetadata, ThreadId};
use crate::regset::{CalleeSavedPair, RegSet};

/// Per-thread checkpoint inputs: the values only the embedding kernel can
/// supply (actual stack bytes, actual stack pointer, actual TLS bytes).
pub struct ThreadCheckpointInputs<'a> {
    pub tid: ThreadId,
    /// The thread's full stack slab, exactly `DEFAULT_STACK_SIZE` bytes —
    /// saved whole, not just the used portion (spec §4.7).
    pub stack: &'a [u8],
    pub stack_base: usize,
    pub stack_pointer: usize,
    pub tls: Option<&'a [u8]>,
    /// An externally supplied cross-ISA register snapshot, if the embedding
    /// compiler pass provided one for this migration.
    pub foreign_regset: Option<RegSet>,
}

pub struct CheckpointCoordinator;

impl CheckpointCoordinator {
    /// Runs the per-thread phase every thread (primary included) performs
    /// at a migration point.
    pub fn checkpoint_thread<S: ChkptStorage>(
        storage: &S,
        md: &mut ChkptMetadata,
        inputs: ThreadCheckpointInputs<'_>,
    ) -> Result<(), MigrateError> {
        let tid = inputs.tid as usize;

        let stack_name = format!("stack.bin.{}", inputs.tid);
        AreaCodec::save_contiguous(storage, &stack_name, inputs.stack)?;

        if let Some(tls) = inputs.tls {
            let tls_name = format!("tls.bin.{}", inputs.tid);
            AreaCodec::save_contiguous(storage, &tls_name, tls)?;
        }

        let used = (inputs.stack_base + inputs.stack.len()).saturating_sub(inputs.stack_pointer);
        md.stack_base[tid] = inputs.stack_base;
        md.stack_offset[tid] = used;
        md.callee_saved[tid] = CalleeSavedPair::capture_current();

        match inputs.foreign_regset {
            Some(RegSet::A(regs)) => {
                md.popcorn_arm_regs = regs;
                md.popcorn_regs_valid = true;
            }
            Some(RegSet::B(regs)) => {
                md.popcorn_x86_regs = regs;
                md.popcorn_regs_valid = true;
            }
            None => md.popcorn_regs_valid = false,
        }

        log::debug!("checkpoint: thread {} saved ({} bytes used of stack)", inputs.tid, used);
        Ok(())
    }

    /// Runs the primary-only phase: drains shared state and notifies the
    /// host. Must run after every thread (including the primary) has
    /// completed [`Self::checkpoint_thread`].
    #[allow(clippy::too_many_arguments)]
    pub fn checkpoint_shared<S: ChkptStorage, M: PageMapper, H: HostTransport>(
        storage: &S,
        mapper: &M,
        host: &H,
        fds: &FdTable,
        md: &mut ChkptMetadata,
        primary: ThreadId,
        others: &[ThreadId],
        bss: &[u8],
        data: &[u8],
        heap_start: usize,
        heap_size: usize,
        resume_ip: usize,
        read_heap_page: impl Fn(usize, &mut [u8; PAGE_SIZE]),
        writing_fd: i32,
        current_offset: impl Fn(i32) -> Result<u64, MigrateError>,
    ) -> Result<(), MigrateError> {
        md.bss_size = bss.len();
        md.data_size = data.len();
        md.heap_start = heap_start;
        md.heap_size = heap_size;
        md.ip = resume_ip;
        md.set_task_ids(primary, others);

        AreaCodec::save_contiguous(storage, "bss", bss)?;
        AreaCodec::save_contiguous(storage, "data", data)?;
        AreaCodec::save_paged(storage, mapper, "heap", heap_start, heap_size, true, read_heap_page)?;
        fds.serialise(storage, "fds", writing_fd, current_offset)?;

        Self::verify_task_completeness(storage, md)?;

        // Metadata is written last: its presence is the "safe to resume"
        // signal (spec §5).
        AreaCodec::save_contiguous(storage, "mdata", md.as_bytes())?;

        host.request_migrate(MigratePayload {
            heap_size,
            bss_size: bss.len(),
        });
        log::info!("checkpoint: notified host, heap={heap_size:#x} bss={:#x}", bss.len());
        Ok(())
    }

    /// Confirms every thread id named in `task_ids` produced a stack
    /// artifact before metadata (which names them) is written.
    fn verify_task_completeness<S: ChkptStorage>(
        storage: &S,
        md: &ChkptMetadata,
    ) -> Result<(), MigrateError> {
        for tid in md.task_ids() {
            let name = format!("stack.bin.{}", tid);
            storage
                .open_read(&name)
                .map(|h| {
                    let _ = storage.close(h);
                })
                .map_err(|_| MigrateError::MissingThreadArtifact { tid })?;
        }
        Ok(())
    }
}
