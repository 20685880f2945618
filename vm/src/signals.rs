//! Process signal handling.
//!
//! Handlers only set flags. Calls and allocations poll them: an interrupt
//! surfaces as [`Error::Interrupt`](crate::Error::Interrupt) at the next
//! method call, a collection request runs a cycle at the next allocation.
//! Nothing is polled until [`install`] has run.

use std::sync::atomic::{AtomicBool, Ordering};

static INSTALLED: AtomicBool = AtomicBool::new(false);
static INTERRUPTED: AtomicBool = AtomicBool::new(false);
static GC_REQUESTED: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn on_interrupt(_signal: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

#[cfg(unix)]
extern "C" fn on_gc_request(_signal: libc::c_int) {
    GC_REQUESTED.store(true, Ordering::SeqCst);
}

/// SIGINT interrupts, SIGUSR1 and SIGUSR2 request a collection, SIGPIPE is
/// ignored.
#[cfg(unix)]
pub fn install() {
    // SAFETY: the handlers only store to atomics, which is async-signal-safe.
    unsafe {
        libc::signal(
            libc::SIGINT,
            on_interrupt as extern "C" fn(libc::c_int) as libc::sighandler_t,
        );
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
        for signal in [libc::SIGUSR1, libc::SIGUSR2] {
            libc::signal(
                signal,
                on_gc_request as extern "C" fn(libc::c_int) as libc::sighandler_t,
            );
        }
    }
    INSTALLED.store(true, Ordering::SeqCst);
    log::debug!("signal handlers installed");
}

#[cfg(not(unix))]
pub fn install() {
    INSTALLED.store(true, Ordering::SeqCst);
}

pub fn installed() -> bool {
    INSTALLED.load(Ordering::Relaxed)
}

pub fn request_interrupt() {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

pub fn request_gc() {
    GC_REQUESTED.store(true, Ordering::SeqCst);
}

/// Clears and returns the pending interrupt.
pub fn take_interrupt() -> bool {
    INTERRUPTED.swap(false, Ordering::SeqCst)
}

/// Clears and returns the pending collection request.
pub fn take_gc_request() -> bool {
    GC_REQUESTED.swap(false, Ordering::SeqCst)
}

#[inline(always)]
pub(crate) fn poll_interrupt() -> bool {
    installed() && take_interrupt()
}

#[inline(always)]
pub(crate) fn poll_gc_request() -> bool {
    installed() && take_gc_request()
}
