//! Ctrl-C handling.

use std::sync::atomic::AtomicBool;

/// Raised by SIGINT. The acquisition loop checks it once per iteration.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn on_sigint(_sig: libc::c_int) {
    INTERRUPTED.store(true, std::sync::atomic::Ordering::SeqCst);
}

/// Installs the SIGINT handler and returns the flag it raises.
#[cfg(unix)]
#[allow(unsafe_code)]
pub fn install() -> &'static AtomicBool {
    // SAFETY: the handler only stores to a static atomic, which is
    // async-signal-safe.
    unsafe {
        libc::signal(libc::SIGINT, on_sigint as *const () as libc::sighandler_t);
    }
    &INTERRUPTED
}

/// Without signal support the flag is never raised.
#[cfg(not(unix))]
pub fn install() -> &'static AtomicBool {
    &INTERRUPTED
}
