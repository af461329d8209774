//! Process-wide libc interposition (spec §4.5, points 2-4; §9 "Process-
//! global hooks").
//!
//! `build.rs` links this binary with `-rdynamic`, which exports every
//! public symbol in its own dynamic symbol table. Because the dynamic
//! linker resolves a `dlopen()`d object's undefined symbols against the
//! whole process image before falling back to libc, testers that reference
//! plain `exit`, `__assert_fail`, or `testFailure` (via `interface.h`'s
//! macros, out of scope here) pick up the definitions below instead of
//! glibc's own.
//!
//! None of this runs inside a signal handler, so ordinary allocation
//! (`format!`, `String`) is fine here — unlike [`ccheck_core::guard`]'s
//! `SIGSEGV` handler, which never leaves that module. The "unexpected
//! context" branch below still writes through
//! [`ccheck_core::write_stderr_signal_safe`] rather than `eprintln!`,
//! matching the original's use of `fprintf(stderr, ...)` right before a
//! direct `_exit()` that must not re-enter any buffered, lockable stdio
//! path.

use std::ffi::{c_char, c_int, c_uint, CStr};

use ccheck_core::{fail_from_interposition, is_armed, write_stderr_signal_safe};

/// Best-effort `CStr` -> `String`; never trusted to be well-formed, since
/// the caller is arbitrary tester code.
unsafe fn read_cstr_lossy(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::from("<null>");
    }
    // SAFETY: forwarded from caller.
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

/// Overrides glibc's `exit(3)` so a test calling it becomes a test failure
/// instead of terminating the whole harness (spec §4.5 point 2).
#[no_mangle]
pub unsafe extern "C" fn exit(status: c_int) -> ! {
    if !is_armed() {
        write_stderr_signal_safe(
            format!(
                "\x1b[31;1mGot an exit({status}) from an unexpected context, aborting run!\x1b[0m\n"
            )
            .as_bytes(),
        );
        // SAFETY: `_exit` is async-signal-safe and never returns; bypasses
        // our own `exit()` override so this can't recurse.
        unsafe { libc::_exit(1) }
    }

    fail_from_interposition(&format!("Test code attempted to call exit({status})"))
}

/// Overrides glibc's `__assert_fail`, the function the standard `assert()`
/// macro calls on failure, converting it into a test failure (spec §4.5
/// point 3).
#[no_mangle]
pub unsafe extern "C" fn __assert_fail(
    assertion: *const c_char,
    file: *const c_char,
    line: c_uint,
    function: *const c_char,
) -> ! {
    // SAFETY: each pointer is whatever the assert() call site passed to
    // libc's real `__assert_fail`; all four are conventionally
    // NUL-terminated C strings, but read defensively since this is
    // attacker-adjacent (arbitrary dlopen'd code) input.
    let assertion_s = unsafe { read_cstr_lossy(assertion) };
    let file_s = unsafe { read_cstr_lossy(file) };
    let function_s = unsafe { read_cstr_lossy(function) };

    if !is_armed() {
        write_stderr_signal_safe(
            format!(
                "\x1b[31;1mGot an assertion failure from an unexpected context in {function_s}() at {file_s}:{line}\x1b[0m\n"
            )
            .as_bytes(),
        );
        // SAFETY: see `exit()` above.
        unsafe { libc::_exit(1) }
    }

    fail_from_interposition(&format!(
        "Test code failed assertion in {function_s}() at {file_s}:{line}: Expected `{assertion_s}` to be true"
    ))
}

/// Overrides `interface.h`'s `testFailure`, the explicit-failure entry
/// point `assertTrue()` expands into (spec §4.5 point 4).
///
/// `interface.h` declares this as a variadic, `printf`-style function;
/// stable Rust cannot declare an `extern "C"` variadic function
/// (`c_variadic` is nightly-only), so the contract pinned here is a single
/// pre-formatted message — the macro layer's `vsnprintf`-equivalent
/// formatting is entirely its own responsibility, consistent with
/// `interface.h` being an out-of-scope collaborator (spec §1, SPEC_FULL
/// §4.5 point 4).
#[no_mangle]
pub unsafe extern "C" fn testFailure(message: *const c_char) -> ! {
    // SAFETY: forwarded to the lossy reader, which tolerates a null or
    // non-UTF-8 pointer.
    let message = unsafe { read_cstr_lossy(message) };

    if !is_armed() {
        write_stderr_signal_safe(
            b"\x1b[31;1mGot a testFailure() call from an unexpected context, aborting run!\x1b[0m\n",
        );
        // SAFETY: see `exit()` above.
        unsafe { libc::_exit(1) }
    }

    fail_from_interposition(&message)
}
