//! Register capture/restore for ISA-B: classic x86-64, 16 general-purpose
//! registers plus RIP, RFLAGS and segment selectors.
//!
//! The teacher crate only ships aarch64 and loongarch64 modules, so this one
//! is grounded on the wider example pack's
//! `xforcevesa-StarryOS-With-RKNPU/crates/axcpu/src/x86_64/context.rs`
//! (`TrapFrame`, `ContextSwitchFrame`, naked `context_switch`), with register
//! names cross-checked against
//! `original_source/include/hermit/migration-x86-regs.h`.

use core::arch::naked_asm;

/// The callee-saved register bank captured at a migration point, per the
/// System V AMD64 ABI: rbx, rbp, r12..r15, plus rsp.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct X86CalleeSaved {
    pub rsp: u64,
    pub rbx: u64,
    pub rbp: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
}

impl X86CalleeSaved {
    /// Captures the live CPU's callee-saved bank into a fresh record.
    pub fn capture() -> Self {
        let mut regs = Self::default();
        unsafe { capture_callee_saved(&mut regs) };
        regs
    }

    /// Restores this bank into the live CPU and returns to the restored
    /// return address on the (restored) stack.
    ///
    /// # Safety
    /// Must only be called from the same call-frame depth that originally
    /// captured the bank.
    pub unsafe fn restore(&self) -> ! {
        unsafe { restore_callee_saved(self) }
    }
}

/// The full architectural register set used on the cross-ISA ("popcorn")
/// restore path. Layout matches the teacher's `TrapFrame`, minus the trap
/// metadata fields that have no meaning outside of an actual CPU exception.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct X86FullRegs {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rsp: u64,
    pub rip: u64,
    pub rflags: u64,
    pub cs: u16,
    pub ss: u16,
}

impl X86FullRegs {
    /// Restores every register from this snapshot and transfers control to
    /// `rip`. Never returns.
    ///
    /// # Safety
    /// The caller must guarantee `rsp`/`rip` describe a valid, live stack
    /// and entry point on this machine. No memory access may happen between
    /// the stack-pointer write and the jump to `rip`.
    pub unsafe fn restore_full(&self) -> ! {
        unsafe { restore_full_regs(self) }
    }
}

#[unsafe(naked)]
unsafe extern "C" fn capture_callee_saved(_regs: &mut X86CalleeSaved) {
    naked_asm!(
        "
        mov     [rdi], rsp
        mov     [rdi + 8], rbx
        mov     [rdi + 16], rbp
        mov     [rdi + 24], r12
        mov     [rdi + 32], r13
        mov     [rdi + 40], r14
        mov     [rdi + 48], r15
        ret",
    )
}

#[unsafe(naked)]
unsafe extern "C" fn restore_callee_saved(_regs: &X86CalleeSaved) -> ! {
    naked_asm!(
        "
        mov     r15, [rdi + 48]
        mov     r14, [rdi + 40]
        mov     r13, [rdi + 32]
        mov     r12, [rdi + 24]
        mov     rbp, [rdi + 16]
        mov     rbx, [rdi + 8]
        mov     rsp, [rdi]
        ret",
    )
}

#[unsafe(naked)]
unsafe extern "C" fn restore_full_regs(_regs: &X86FullRegs) -> ! {
    naked_asm!(
        "
        mov     rsp, [rdi + 120]   // rsp field
        mov     rax, [rdi + 128]   // rip field, stash for the final jmp
        push    rax
        mov     rbx, [rdi + 8]
        mov     rcx, [rdi + 16]
        mov     rdx, [rdi + 24]
        mov     rsi, [rdi + 32]
        mov     rbp, [rdi + 48]
        mov     r8,  [rdi + 56]
        mov     r9,  [rdi + 64]
        mov     r10, [rdi + 72]
        mov     r11, [rdi + 80]
        mov     r12, [rdi + 88]
        mov     r13, [rdi + 96]
        mov     r14, [rdi + 104]
        mov     r15, [rdi + 112]
        mov     rax, [rdi]
        mov     rdi, [rdi + 40]
        ret",
    )
}
