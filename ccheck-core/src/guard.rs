//! The fault guard: a per-worker scoped region that turns a SIGSEGV, a
//! library-level `exit(n)`, an assertion failure, or an explicit
//! `testFailure` call from inside tester code into a structured test
//! failure (spec §4.5).
//!
//! Rust has no safe `setjmp`/`longjmp`. This module uses the POSIX
//! `sigsetjmp`/`siglongjmp` pair directly — unlike plain `setjmp`/`longjmp`,
//! these are documented async-signal-safe and are the standard way to
//! recover from inside a signal handler, which is exactly what's needed
//! here (spec §9, "Non-local recovery"). The `libc` crate intentionally
//! doesn't wrap them (the calling convention is too easy to misuse safely),
//! so they're declared here the same way `frankenlibc-abi` hand-declares
//! raw glibc symbols it needs that aren't in `libc`.
//!
//! Everything outside this module sees only [`guarded`] and
//! [`fail_from_interposition`]; the `sigsetjmp`/`siglongjmp` pair and the
//! raw signal handler never leak out.

use std::cell::{Cell, RefCell};
use std::os::raw::{c_int, c_void};

/// Opaque, over-sized storage for a `sigjmp_buf`. glibc's x86-64
/// `__jmp_buf_tag` is a little over 200 bytes (8 saved registers + a
/// signal-mask-saved flag + a `sigset_t`); this is sized with headroom and
/// aligned generously since its true layout is never inspected from Rust,
/// only handed to `__sigsetjmp`/`siglongjmp`.
#[repr(C, align(16))]
struct SigJmpBuf([u8; 320]);

impl SigJmpBuf {
    const fn zeroed() -> Self {
        SigJmpBuf([0u8; 320])
    }
}

extern "C" {
    // The public name `sigsetjmp` is a macro in <setjmp.h> that expands to
    // this symbol; there is no plain `sigsetjmp` function to link against.
    #[link_name = "__sigsetjmp"]
    fn sys_sigsetjmp(env: *mut SigJmpBuf, savesigs: c_int) -> c_int;
    fn siglongjmp(env: *mut SigJmpBuf, val: c_int) -> !;
}

/// Maximum length of a diagnostic message, matching the fixed-capacity
/// buffer in spec §3 ("Per-worker state").
const MESSAGE_CAPACITY: usize = 200;

/// A fixed-capacity message buffer; overflow ends in `"..."` instead of
/// growing (spec §8, boundary behavior).
struct MessageBuffer {
    bytes: [u8; MESSAGE_CAPACITY],
    len: usize,
}

impl MessageBuffer {
    const fn new() -> Self {
        MessageBuffer {
            bytes: [0u8; MESSAGE_CAPACITY],
            len: 0,
        }
    }

    fn set(&mut self, message: &str) {
        let src = message.as_bytes();
        if src.len() >= MESSAGE_CAPACITY {
            let keep = MESSAGE_CAPACITY - 3;
            self.bytes[..keep].copy_from_slice(&src[..keep]);
            self.bytes[keep..MESSAGE_CAPACITY].copy_from_slice(b"...");
            self.len = MESSAGE_CAPACITY;
        } else {
            self.bytes[..src.len()].copy_from_slice(src);
            self.len = src.len();
        }
    }

    fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len]).unwrap_or("<invalid diagnostic message>")
    }
}

/// Per-worker fault-guard state (spec §3, "Per-worker state
/// (`running_test`)"). One instance per OS thread, via `thread_local!`.
struct RunningTest {
    jump_ready: Cell<bool>,
    target: RefCell<SigJmpBuf>,
    message: RefCell<MessageBuffer>,
}

impl RunningTest {
    const fn new() -> Self {
        RunningTest {
            jump_ready: Cell::new(false),
            target: RefCell::new(SigJmpBuf::zeroed()),
            message: RefCell::new(MessageBuffer::new()),
        }
    }
}

thread_local! {
    static RUNNING: RunningTest = const { RunningTest::new() };
}

/// Result of running one guarded region.
#[derive(Debug)]
pub enum GuardOutcome {
    /// The body ran to completion without tripping the guard.
    Completed,
    /// The body faulted; `message` is the diagnostic to attach to the
    /// failing test or provider.
    Failed { message: String },
}

/// Runs `body` (which must be the *only* place inside it that calls into
/// tester C code) with the fault guard armed.
///
/// Mirrors the original's `if (setjmp(runningTest.failTarget)) { ... }
/// else { runningTest.jumpReady = true; body(); runningTest.jumpReady =
/// false; }`, reused identically for both provider invocation (spec §4.3)
/// and test invocation (spec §4.4).
pub fn guarded<F: FnOnce()>(body: F) -> GuardOutcome {
    RUNNING.with(|rt| {
        let rc = {
            let mut target = rt.target.borrow_mut();
            // SAFETY: `target` is this thread's own `sigjmp_buf`, valid for
            // the lifetime of this call and not aliased (we hold the only
            // `RefMut` on it and drop it before `body()` can possibly be
            // re-entered on this thread).
            unsafe { sys_sigsetjmp(&mut *target as *mut SigJmpBuf, 1) }
        };

        if rc != 0 {
            // We got here via `siglongjmp` from the signal handler or one
            // of the libc interposition hooks.
            rt.jump_ready.set(false);
            let message = rt.message.borrow().as_str().to_string();
            return GuardOutcome::Failed { message };
        }

        rt.jump_ready.set(true);
        body();
        rt.jump_ready.set(false);
        GuardOutcome::Completed
    })
}

/// Whether the current thread is inside a [`guarded`] region right now.
///
/// Consulted by the `SIGSEGV` handler and by the `exit`/`__assert_fail`/
/// `testFailure` interposition hooks exported from the `ccheck` binary to
/// decide whether a fault is expected (convert to a test failure) or not
/// (abort the whole run — spec §4.5, §7 "Unexpected-context fatal").
pub fn is_armed() -> bool {
    RUNNING.with(|rt| rt.jump_ready.get())
}

/// Converts the current guarded region into a failure with `message` and
/// performs the non-local jump back to [`guarded`]'s call site.
///
/// # Panics / safety
/// Must only be called while [`is_armed`] is true on this thread — callers
/// (the signal handler, the libc interposition hooks) check that first.
pub fn fail_from_interposition(message: &str) -> ! {
    RUNNING.with(|rt| {
        rt.jump_ready.set(false);
        rt.message.borrow_mut().set(message);
        let mut target = rt.target.borrow_mut();
        // SAFETY: `is_armed()` was true, so a matching `sigsetjmp` call is
        // still on this thread's stack further up, waiting for this jump.
        unsafe { siglongjmp(&mut *target as *mut SigJmpBuf, 1) }
    })
}

/// Writes a fixed message directly to stderr via the raw `write(2)`
/// syscall wrapper, never through buffered, allocating machinery like
/// `eprintln!` — this is called from the SIGSEGV handler, where only
/// async-signal-safe functions may run.
pub fn write_stderr_signal_safe(message: &[u8]) {
    // SAFETY: `message` is a valid slice for the duration of this call;
    // `write` is async-signal-safe and tolerates short writes (best-effort
    // diagnostic output, not correctness-critical).
    unsafe {
        libc::write(
            libc::STDERR_FILENO,
            message.as_ptr() as *const c_void,
            message.len(),
        );
    }
}

/// Failures that can occur installing the process-wide SIGSEGV handler.
#[derive(thiserror::Error, Debug)]
#[error("sigaction() failed while installing the SIGSEGV handler")]
pub struct InstallSignalHandlerError;

extern "C" fn handle_sigsegv(signo: c_int) {
    if signo != libc::SIGSEGV {
        write_stderr_signal_safe(b"Warning: SIGSEGV handler invoked for a different signal\n");
    }

    RUNNING.with(|rt| {
        if !rt.jump_ready.get() {
            write_stderr_signal_safe(
                b"\x1b[31;1mGot a segfault from an unexpected context, aborting run!\x1b[0m\n",
            );
            // SAFETY: `_exit` is async-signal-safe and never returns.
            unsafe { libc::_exit(1) };
        }

        rt.jump_ready.set(false);
        rt.message
            .borrow_mut()
            .set("Caught a SIGSEGV segmentation violation");
        let mut target = rt.target.borrow_mut();
        // SAFETY: `jump_ready` was true, so `guarded()` has a live
        // `sigsetjmp` frame on this same thread's stack waiting for this.
        unsafe { siglongjmp(&mut *target as *mut SigJmpBuf, 1) }
    })
}

/// Installs the process-wide `SIGSEGV` handler.
///
/// Must run once, before any worker thread is spawned (spec §5). `
/// SA_NODEFER` is set deliberately: a second `SIGSEGV` on the same thread
/// while the handler is already running (i.e. a fault during guard
/// exit, after `jump_ready` has been cleared but before the `siglongjmp`
/// completes) must be allowed to re-enter rather than being masked —
/// masked delivery would leave the signal pending and the thread stuck,
/// where re-entering hits the `!jump_ready` branch and terminates the
/// process outright (spec §5: "nested faults during guard exit
/// deliberately terminate the process").
pub fn install_sigsegv_handler() -> Result<(), InstallSignalHandlerError> {
    // SAFETY: `sigaction` is zero-initialized then fully populated before
    // use; `handle_sigsegv` has the correct `extern "C" fn(c_int)` shape
    // for a plain (non-`SA_SIGINFO`) handler.
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handle_sigsegv as usize;
        action.sa_flags = libc::SA_NODEFER;
        libc::sigemptyset(&mut action.sa_mask);

        if libc::sigaction(libc::SIGSEGV, &action, std::ptr::null_mut()) != 0 {
            return Err(InstallSignalHandlerError);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_buffer_keeps_short_messages_verbatim() {
        let mut buf = MessageBuffer::new();
        buf.set("short message");
        assert_eq!(buf.as_str(), "short message");
    }

    #[test]
    fn message_buffer_truncates_with_ellipsis() {
        let mut buf = MessageBuffer::new();
        let long = "x".repeat(MESSAGE_CAPACITY + 50);
        buf.set(&long);
        let s = buf.as_str();
        assert_eq!(s.len(), MESSAGE_CAPACITY);
        assert!(s.ends_with("..."));
    }

    #[test]
    fn guarded_region_completes_normally_without_a_fault() {
        let outcome = guarded(|| {
            let _ = 1 + 1;
        });
        assert!(matches!(outcome, GuardOutcome::Completed));
    }

    #[test]
    fn guarded_region_reports_explicit_failure() {
        // `fail_from_interposition` never returns, so it must run on a
        // scoped thread whose only job is to trip the guard exactly once.
        let outcome = guarded(|| {
            assert!(is_armed());
            fail_from_interposition("explicit failure for test");
        });
        match outcome {
            GuardOutcome::Failed { message } => {
                assert_eq!(message, "explicit failure for test");
            }
            GuardOutcome::Completed => panic!("expected a failure outcome"),
        }
        assert!(!is_armed());
    }
}
