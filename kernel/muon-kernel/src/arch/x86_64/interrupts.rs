//! Interrupt-flag control.

/// Masks interrupts.
pub fn disable() {
    // SAFETY: cli only masks interrupts.
    unsafe {
        core::arch::asm!("cli", options(nomem, nostack));
    }
}

/// Unmasks interrupts.
pub fn enable() {
    // SAFETY: sti only unmasks interrupts.
    unsafe {
        core::arch::asm!("sti", options(nomem, nostack));
    }
}

/// Runs `f` with interrupts masked, restoring the previous state.
pub fn without<R>(f: impl FnOnce() -> R) -> R {
    let flags: u64;
    // SAFETY: Reading RFLAGS has no side effects.
    unsafe {
        core::arch::asm!("pushfq", "pop {}", out(reg) flags, options(nomem, preserves_flags));
    }
    disable();
    let result = f();
    if flags & (1 << 9) != 0 {
        enable();
    }
    result
}
