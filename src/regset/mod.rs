//! Architecture-tagged register snapshot/restore (spec §4.1).
//!
//! Two ISA families are supported. Their full-register and callee-saved
//! types are always compiled in, because the metadata record carries one
//! slot per ISA regardless of which ISA the running machine is — only the
//! live-CPU capture/restore naked-asm is gated on `target_arch`. Unified
//! behind the [`RegSet`] tagged variant rather than parallel struct fields
//! (redesign note in SPEC_FULL.md §9).

#[path = "aarch64.rs"]
mod aarch64_regs;
#[path = "x86_64.rs"]
mod x86_64_regs;

pub use aarch64_regs::{ArmCalleeSaved, ArmFullRegs};
pub use x86_64_regs::{X86CalleeSaved, X86FullRegs};

/// A cross-ISA-aware full register snapshot, tagged by which ISA it was
/// captured on. Supersedes the per-thread callee-saved banks when present
/// (`popcorn_regs_valid` in the metadata record).
#[derive(Debug, Clone, Copy)]
pub enum RegSet {
    /// Captured on ISA-A (aarch64-family).
    A(ArmFullRegs),
    /// Captured on ISA-B (x86_64-family).
    B(X86FullRegs),
}

impl RegSet {
    /// Restores this snapshot into the live CPU and transfers control to its
    /// recorded program counter. Never returns.
    ///
    /// # Safety
    /// Only valid when `self`'s ISA tag matches the running CPU's
    /// architecture, and the recorded stack/PC are valid on this machine.
    pub unsafe fn restore_full(&self) -> ! {
        match self {
            RegSet::A(regs) => unsafe { regs.restore_full() },
            RegSet::B(regs) => unsafe { regs.restore_full() },
        }
    }
}

/// The pair of callee-saved register banks recorded for a single thread
/// slot in the metadata record — one per supported ISA, since the record
/// format itself must be portable across migration even though only one
/// bank is live on any given machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct CalleeSavedPair {
    pub arm: ArmCalleeSaved,
    pub x86: X86CalleeSaved,
}

impl CalleeSavedPair {
    /// Captures the live CPU's callee-saved bank into the slot matching the
    /// running architecture, leaving the other ISA's slot at its default.
    pub fn capture_current() -> Self {
        let mut pair = Self::default();
        #[cfg(target_arch = "aarch64")]
        {
            pair.arm = ArmCalleeSaved::capture();
        }
        #[cfg(target_arch = "x86_64")]
        {
            pair.x86 = X86CalleeSaved::capture();
        }
        pair
    }

    /// Restores the bank matching the running architecture.
    ///
    /// # Safety
    /// Must only be called from the same call-frame depth that originally
    /// captured the bank.
    #[cfg(target_arch = "aarch64")]
    pub unsafe fn restore_current(&self) -> ! {
        unsafe { self.arm.restore() }
    }

    /// Restores the bank matching the running architecture.
    ///
    /// # Safety
    /// Must only be called from the same call-frame depth that originally
    /// captured the bank.
    #[cfg(target_arch = "x86_64")]
    pub unsafe fn restore_current(&self) -> ! {
        unsafe { self.x86.restore() }
    }
}
