//! Conservative scanning of native thread stacks.

const WORD: usize = size_of::<usize>();

/// Address of a fresh local in the caller's frame.
///
/// Captured in an outer frame, it bounds the region [`scan_native_stack`]
/// reads for every frame called beneath it.
#[macro_export]
macro_rules! stack_address {
    () => {{
        let marker = 0usize;
        ::std::hint::black_box(&marker) as *const usize as usize
    }};
}

#[cfg(target_arch = "x86_64")]
#[inline(always)]
fn spill_registers() -> [usize; 6] {
    let mut regs = [0usize; 6];
    // SAFETY: only stores callee-saved registers into a local buffer.
    unsafe {
        std::arch::asm!(
            "mov [{0}], rbx",
            "mov [{0} + 8], rbp",
            "mov [{0} + 16], r12",
            "mov [{0} + 24], r13",
            "mov [{0} + 32], r14",
            "mov [{0} + 40], r15",
            in(reg) regs.as_mut_ptr(),
            options(nostack, preserves_flags),
        );
    }
    regs
}

#[cfg(target_arch = "aarch64")]
#[inline(always)]
fn spill_registers() -> [usize; 12] {
    let mut regs = [0usize; 12];
    // SAFETY: only stores callee-saved registers into a local buffer.
    unsafe {
        std::arch::asm!(
            "stp x19, x20, [{0}]",
            "stp x21, x22, [{0}, #16]",
            "stp x23, x24, [{0}, #32]",
            "stp x25, x26, [{0}, #48]",
            "stp x27, x28, [{0}, #64]",
            "stp x29, x30, [{0}, #80]",
            in(reg) regs.as_mut_ptr(),
            options(nostack, preserves_flags),
        );
    }
    regs
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
#[inline(always)]
fn spill_registers() -> [usize; 0] {
    []
}

/// Appends every word between the current frame and `bottom`, plus the
/// callee-saved registers, to `out`.
#[inline(never)]
pub fn scan_native_stack(bottom: usize, out: &mut Vec<usize>) {
    let regs = spill_registers();
    out.extend_from_slice(&regs);

    let top = stack_address!();
    let (low, high) = if top < bottom { (top, bottom) } else { (bottom, top) };
    let mut addr = low & !(WORD - 1);
    while addr + WORD <= high {
        // SAFETY: the range lies inside this thread's live stack.
        out.push(unsafe { std::ptr::read_volatile(addr as *const usize) });
        addr += WORD;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[inline(never)]
    fn scan_with_local(bottom: usize, needle: usize) -> Vec<usize> {
        let held = std::hint::black_box(needle);
        let mut out = Vec::new();
        scan_native_stack(bottom, &mut out);
        std::hint::black_box(held);
        out
    }

    #[test]
    fn finds_words_held_in_callee_frames() {
        let bottom = stack_address!();
        let needle = 0x5eed_f00d_dead_beef_usize;
        let words = scan_with_local(bottom, needle);
        assert!(words.contains(&needle), "a live local must be visible to the scan");
    }
}
