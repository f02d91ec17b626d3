//! Deterministic per-thread stack virtual-address allocator (spec §4.4).
//!
//! Grounded on `original_source/kernel/stack_slots.c`: a static reservation
//! of `STACK_SLOTS_NUM * DEFAULT_STACK_SIZE` starting at a fixed base, with
//! `get_stack_slot` returning `slot_base + PAGE_SIZE` — one guard page is
//! reserved ahead of each thread's usable stack region.

use memory_addr::VirtAddr;

use crate::area::PAGE_SIZE;
use crate::error::MigrateError;
use crate::metadata::ThreadId;

/// Base virtual address of the stack-slot arena (`STACK_SLOTS_START` in the
/// original). Chosen to sit well clear of the default heap/bss/data
/// regions; the exact value only matters in that it must be identical on
/// source and target.
pub const STACK_SLOTS_BASE: usize = 0x0000_7000_0000_0000;

/// Maps physical memory in, used only to give each slot a backing; the real
/// mapper is an out-of-scope external collaborator (spec §9).
pub trait PageMapper {
    fn map(&self, vaddr: VirtAddr, pages: usize) -> Result<(), MigrateError>;
}

/// A no-op mapper for unit tests that don't care about physical backing.
pub struct NullMapper;
impl PageMapper for NullMapper {
    fn map(&self, _vaddr: VirtAddr, _pages: usize) -> Result<(), MigrateError> {
        Ok(())
    }
}

/// The stack-slot allocator: a pure function of thread id to base address,
/// so that source and target agree on every thread's stack location
/// without needing to communicate it.
pub struct StackSlots {
    slot_count: usize,
    slot_size: usize,
}

impl StackSlots {
    pub fn new(slot_count: usize, slot_size: usize) -> Self {
        assert_eq!(slot_size % PAGE_SIZE, 0, "slot size must be page-aligned");
        Self { slot_count, slot_size }
    }

    /// Returns the usable base address for `tid`'s stack (past the guard
    /// page) and maps its physical backing.
    pub fn get<M: PageMapper>(&self, mapper: &M, tid: ThreadId) -> Result<VirtAddr, MigrateError> {
        if tid as usize >= self.slot_count {
            return Err(MigrateError::StackSlotsExhausted { tid });
        }
        let slot_base = STACK_SLOTS_BASE + self.slot_size * tid as usize;
        let usable_base = VirtAddr::from(slot_base + PAGE_SIZE);
        let pages = (self.slot_size / PAGE_SIZE) - 1;
        mapper.map(usable_base, pages)?;
        log::debug!("stack slot {tid}: usable base {usable_base:?} ({pages} pages)");
        Ok(usable_base)
    }

    /// Whether `addr` falls within the reserved slot arena — including
    /// guard pages — so an external page-fault handler can disambiguate a
    /// stack fault from a heap fault (`addr_in_stack_slot`, SPEC_FULL.md
    /// §2b).
    pub fn contains(&self, addr: VirtAddr) -> bool {
        let addr = addr.as_usize();
        let end = STACK_SLOTS_BASE + self.slot_count * self.slot_size;
        addr >= STACK_SLOTS_BASE && addr < end
    }
}
