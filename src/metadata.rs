//! The checkpoint metadata record (spec §3): a single, fixed-layout
//! instance written once by the primary thread at the end of checkpoint
//! and read once by the primary thread at the start of resume.
//!
//! Field-for-field grounded on `chkpt_metadata_t` in
//! `original_source/include/hermit/migration-chkpt.h`, extended with the
//! `popcorn_*`/`heap_start` fields that only appear in the body of
//! `original_source/kernel/migration.c` (the header snapshot retrieved for
//! this pack predates those fields; the .c file is authoritative).

use static_assertions::const_assert_eq;

use crate::regset::{ArmFullRegs, CalleeSavedPair, X86FullRegs};

/// Upper bound on live threads a single migration can carry. Matches
/// `MAX_TASKS` in the original headers.
pub const MAX_TASKS: usize = 64;

// `as_bytes`/`from_bytes` copy this record as a raw byte span; a size that
// isn't 8-byte aligned would mean a prior field introduced padding that
// silently differs between source and target builds.
const_assert_eq!(core::mem::size_of::<ChkptMetadata>() % 8, 0);

/// A small integer thread id, stable across migration (spec §3, "Thread
/// Identity").
pub type ThreadId = u32;

/// The migration metadata record.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ChkptMetadata {
    /// Resume instruction pointer (meaningful on the homogeneous path only;
    /// on the cross-ISA path `popcorn_regs_valid` supersedes it — see
    /// SPEC_FULL.md §9 Open Questions).
    pub ip: usize,
    pub bss_size: usize,
    pub data_size: usize,
    pub heap_start: usize,
    pub heap_size: usize,
    pub tls_size: usize,
    /// Live thread ids, primary first, terminated by the first `-1`.
    ///
    /// Deviates from the original's zero-terminated `task_ids` (spec §3/§4.7,
    /// `while (md.task_ids[i] != 0)` in `migration.c`): tid 0 is a valid
    /// primary id here, so zero cannot double as a sentinel. `-1` is used
    /// instead; every `set_task_ids`/`task_ids` caller must agree on this.
    pub task_ids: [i64; MAX_TASKS],
    pub stack_base: [usize; MAX_TASKS],
    pub stack_offset: [usize; MAX_TASKS],
    /// Per-thread callee-saved banks for both ISAs (spec §3).
    pub callee_saved: [CalleeSavedPair; MAX_TASKS],
    /// When set, `popcorn_arm_regs`/`popcorn_x86_regs` supersede the
    /// per-thread callee-saved banks on restore.
    pub popcorn_regs_valid: bool,
    pub popcorn_arm_regs: ArmFullRegs,
    pub popcorn_x86_regs: X86FullRegs,
}

impl Default for ChkptMetadata {
    fn default() -> Self {
        Self {
            ip: 0,
            bss_size: 0,
            data_size: 0,
            heap_start: 0,
            heap_size: 0,
            tls_size: 0,
            task_ids: [-1; MAX_TASKS],
            stack_base: [0; MAX_TASKS],
            stack_offset: [0; MAX_TASKS],
            callee_saved: [CalleeSavedPair::default(); MAX_TASKS],
            popcorn_regs_valid: false,
            popcorn_arm_regs: ArmFullRegs::default(),
            popcorn_x86_regs: X86FullRegs::default(),
        }
    }
}

impl ChkptMetadata {
    /// Writes `task_ids`, primary first, `-1`-terminated (spec §4.7; see the
    /// field doc comment above for why `-1` replaces the original's `0`).
    pub fn set_task_ids(&mut self, primary: ThreadId, others: &[ThreadId]) {
        self.task_ids = [-1; MAX_TASKS];
        self.task_ids[0] = primary as i64;
        for (slot, &tid) in self.task_ids[1..].iter_mut().zip(others.iter()) {
            *slot = tid as i64;
        }
    }

    /// Iterates the live thread ids recorded in `task_ids`, primary first.
    pub fn task_ids(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.task_ids.iter().take_while(|&&id| id >= 0).map(|&id| id as ThreadId)
    }

    /// The primary thread id, if any threads were recorded.
    pub fn primary_id(&self) -> Option<ThreadId> {
        self.task_ids().next()
    }

    /// Raw byte view of this record, for serialisation via
    /// [`crate::area::AreaCodec::save_contiguous`]. Safe because the record
    /// is `#[repr(C)]`-laid-out-by-convention, `Copy`, and free of padding
    /// bytes that matter across the same build on both sides.
    pub fn as_bytes(&self) -> &[u8] {
        let ptr = self as *const Self as *const u8;
        unsafe { core::slice::from_raw_parts(ptr, core::mem::size_of::<Self>()) }
    }

    /// Constructs a record from a raw byte buffer previously produced by
    /// [`Self::as_bytes`]. The buffer must be exactly `size_of::<Self>()`
    /// bytes and must have been produced by a build with the same layout.
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() != core::mem::size_of::<Self>() {
            return None;
        }
        let mut out = Self::default();
        let dst = &mut out as *mut Self as *mut u8;
        unsafe { core::ptr::copy_nonoverlapping(buf.as_ptr(), dst, buf.len()) };
        Some(out)
    }
}
