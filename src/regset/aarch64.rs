//! Register capture/restore for ISA-A: 64-bit little-endian, 31
//! general-purpose registers plus SP, PC and CPSR.
//!
//! Grounded on `TrapFrame`/`TaskContext`/`context_switch` from the teacher
//! crate's `aarch64/context.rs`; repurposed from task-switch context to
//! migration checkpoint/restore context.

use core::arch::naked_asm;
use core::fmt;

/// The callee-saved register bank captured at a migration point: SP plus
/// x19..x30. This is the cheap, same-ISA-only path (§4.1).
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ArmCalleeSaved {
    pub sp: u64,
    pub r19: u64,
    pub r20: u64,
    pub r21: u64,
    pub r22: u64,
    pub r23: u64,
    pub r24: u64,
    pub r25: u64,
    pub r26: u64,
    pub r27: u64,
    pub r28: u64,
    pub fp: u64, // r29
    pub lr: u64, // r30
}

impl ArmCalleeSaved {
    /// Captures the live CPU's callee-saved bank into a fresh record.
    pub fn capture() -> Self {
        let mut regs = Self::default();
        unsafe { capture_callee_saved(&mut regs) };
        regs
    }

    /// Restores this bank into the live CPU and returns to the restored
    /// `lr`, as if the function that originally captured it were now
    /// returning.
    ///
    /// # Safety
    /// Must only be called from the same call-frame depth that originally
    /// captured the bank; the stack pointer is overwritten unconditionally.
    pub unsafe fn restore(&self) -> ! {
        unsafe { restore_callee_saved(self) }
    }
}

/// The full architectural register set used on the cross-ISA ("popcorn")
/// restore path, where a compiler-provided snapshot supersedes the
/// callee-saved bank. Layout matches the teacher's `TrapFrame`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ArmFullRegs {
    /// x0..x30.
    pub r: [u64; 31],
    /// Stack pointer (SP_EL0 on the resumed task).
    pub sp: u64,
    /// Program counter (resume target, ELR_EL1 equivalent).
    pub pc: u64,
    /// Saved processor state (SPSR_EL1 equivalent).
    pub pstate: u64,
}

impl Default for ArmFullRegs {
    fn default() -> Self {
        Self {
            r: [0; 31],
            sp: 0,
            pc: 0,
            pstate: 0,
        }
    }
}

impl fmt::Debug for ArmFullRegs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ArmFullRegs {{")?;
        for (i, &reg) in self.r.iter().enumerate() {
            writeln!(f, "    x{i}: {reg:#x},")?;
        }
        writeln!(f, "    sp: {:#x},", self.sp)?;
        writeln!(f, "    pc: {:#x},", self.pc)?;
        writeln!(f, "    pstate: {:#x},", self.pstate)?;
        write!(f, "}}")
    }
}

impl ArmFullRegs {
    /// Restores every register from this snapshot and transfers control to
    /// `pc`. Never returns.
    ///
    /// Uses `ELR_EL1`/`SPSR_EL1` plus `eret` to carry the jump target,
    /// exactly like the teacher's `TrapFrame` exception-return path — unlike
    /// `br`, `eret` needs no general-purpose register to hold the target
    /// address, so all 31 GPRs land at their exact snapshotted values with
    /// none sacrificed as scratch.
    ///
    /// # Safety
    /// The caller must guarantee `sp`/`pc` describe a valid, live stack and
    /// entry point on this machine, and that this code runs at EL1.
    pub unsafe fn restore_full(&self) -> ! {
        unsafe { restore_full_regs(self) }
    }
}

#[unsafe(naked)]
unsafe extern "C" fn capture_callee_saved(_regs: &mut ArmCalleeSaved) {
    naked_asm!(
        "
        mov     x9, sp
        str     x9, [x0, 0 * 8]
        stp     x19, x20, [x0, 1 * 8]
        stp     x21, x22, [x0, 3 * 8]
        stp     x23, x24, [x0, 5 * 8]
        stp     x25, x26, [x0, 7 * 8]
        stp     x27, x28, [x0, 9 * 8]
        stp     x29, x30, [x0, 11 * 8]
        ret",
    )
}

#[unsafe(naked)]
unsafe extern "C" fn restore_callee_saved(_regs: &ArmCalleeSaved) -> ! {
    naked_asm!(
        "
        ldr     x9, [x0, 0 * 8]
        mov     sp, x9
        ldp     x19, x20, [x0, 1 * 8]
        ldp     x21, x22, [x0, 3 * 8]
        ldp     x23, x24, [x0, 5 * 8]
        ldp     x25, x26, [x0, 7 * 8]
        ldp     x27, x28, [x0, 9 * 8]
        ldp     x29, x30, [x0, 11 * 8]
        ret",
    )
}

#[unsafe(naked)]
unsafe extern "C" fn restore_full_regs(_regs: &ArmFullRegs) -> ! {
    naked_asm!(
        "
        // x0 holds &ArmFullRegs throughout; every offset below is a fixed
        // immediate off x0, so no register needs to be sacrificed as a
        // moving address scratch. Stage pc/pstate/sp via x1 while x1 still
        // has no restore obligation of its own, then load x1's true value
        // last, right before x0's — eret needs no GPR to carry the jump
        // target, so this leaves x0..x30 exactly as recorded.
        ldr     x1, [x0, 32 * 8]
        msr     elr_el1, x1
        ldr     x1, [x0, 33 * 8]
        msr     spsr_el1, x1
        ldr     x1, [x0, 31 * 8]
        mov     sp, x1

        ldp     x2, x3, [x0, 2 * 8]
        ldp     x4, x5, [x0, 4 * 8]
        ldp     x6, x7, [x0, 6 * 8]
        ldp     x8, x9, [x0, 8 * 8]
        ldp     x10, x11, [x0, 10 * 8]
        ldp     x12, x13, [x0, 12 * 8]
        ldp     x14, x15, [x0, 14 * 8]
        ldp     x16, x17, [x0, 16 * 8]
        ldp     x18, x19, [x0, 18 * 8]
        ldp     x20, x21, [x0, 20 * 8]
        ldp     x22, x23, [x0, 22 * 8]
        ldp     x24, x25, [x0, 24 * 8]
        ldp     x26, x27, [x0, 26 * 8]
        ldp     x28, x29, [x0, 28 * 8]
        ldr     x30, [x0, 30 * 8]
        ldr     x1, [x0, 1 * 8]
        ldr     x0, [x0, 0 * 8]
        eret",
    )
}
