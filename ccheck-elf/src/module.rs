//! Loaded-object types: [`Subject`] (loaded only for side effects) and
//! [`Module`] (a tester, discoverable via its sentinel symbols).

use std::cell::Cell;
use std::ffi::{c_void, CStr};

use crate::dynamic::{DynamicObject, Symbol};
use crate::error::{cstring_for_path, dl_error_message, LoadError};
use crate::sentinel::{classify, Sentinel};

/// A library under test, loaded purely for the global symbol side effects
/// `dlopen(..., RTLD_GLOBAL)` has on subsequently-loaded testers (spec §6).
pub struct Subject {
    handle: *mut c_void,
    path: String,
}

// SAFETY: the handle is only ever passed to `dlclose`/`dlsym`, both of
// which are documented thread-safe in glibc.
unsafe impl Send for Subject {}
unsafe impl Sync for Subject {}

impl Subject {
    /// Opens `path` with globally-visible symbols.
    pub fn open(path: &str) -> Result<Self, LoadError> {
        let c_path = cstring_for_path(path)?;
        // SAFETY: `c_path` is a valid, NUL-terminated C string for the
        // lifetime of this call.
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_GLOBAL) };
        if handle.is_null() {
            return Err(LoadError::Dlopen {
                path: path.to_string(),
                message: dl_error_message(),
            });
        }
        Ok(Subject {
            handle,
            path: path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for Subject {
    fn drop(&mut self) {
        // SAFETY: `self.handle` came from a successful `dlopen()` and is
        // closed at most once (guaranteed by normal Rust drop semantics).
        let rc = unsafe { libc::dlclose(self.handle) };
        if rc != 0 {
            tracing::warn!(path = %self.path, "dlclose() failed for subject");
        }
    }
}

/// A tester module: a loaded shared object whose sentinel symbols describe
/// providers and tests (spec §3, "Module (`DL`)").
///
/// Counters (`variants`/`succeeded`/`failed`) are deliberately *not* stored
/// here: they are owned exclusively by the worker thread running this
/// module's tests and are folded into the report only after that thread's
/// `JoinHandle` is joined (spec §5).
pub struct Module {
    handle: *mut c_void,
    dynamic: DynamicObject,
    name: String,
    /// Set once provider loading finds at least one `_SIZEOF_PROVIDER_*`
    /// sentinel, used for the "provided no data and contained no tests"
    /// diagnostic (spec §3, §4.6).
    has_provider: Cell<bool>,
}

// SAFETY: see `Subject`; additionally, `DynamicObject` is `Send + Sync` by
// its own declaration (it only ever reads from memory owned by the loader).
unsafe impl Send for Module {}
unsafe impl Sync for Module {}

impl Module {
    /// Opens `path` with locally-scoped symbols and walks its dynamic
    /// section (spec §6: testers use `RTLD_LOCAL`).
    pub fn open(path: &str) -> Result<Self, LoadError> {
        let c_path = cstring_for_path(path)?;
        // SAFETY: `c_path` is valid and NUL-terminated for this call.
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        if handle.is_null() {
            return Err(LoadError::Dlopen {
                path: path.to_string(),
                message: dl_error_message(),
            });
        }

        let dynamic = match DynamicObject::from_handle(handle, path) {
            Ok(d) => d,
            Err(e) => {
                // SAFETY: `handle` is a valid, not-yet-closed dlopen handle.
                unsafe {
                    libc::dlclose(handle);
                }
                return Err(e);
            }
        };

        Ok(Module {
            handle,
            dynamic,
            name: path.to_string(),
            has_provider: Cell::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Records that this module exported at least one provider. The
    /// provider loader (`ccheck-core::loader`) calls this once per
    /// successfully loaded dataset.
    pub fn mark_has_provider(&self) {
        self.has_provider.set(true);
    }

    pub fn has_provider(&self) -> bool {
        self.has_provider.get()
    }

    /// The object's load bias, used to turn a sentinel symbol's
    /// `st_value` into a readable address for `_SIZEOF_PROVIDER_*` and
    /// `_SIG_TEST_*` payloads.
    pub fn base(&self) -> usize {
        self.dynamic.base()
    }

    /// Every sentinel symbol this module exports, in symbol-table order
    /// (spec §4.2: "iterate symbols in definition order; classify by
    /// prefix; ignore everything else").
    pub fn sentinels(&self) -> impl Iterator<Item = (Sentinel<'_>, Symbol<'_>)> {
        // We can't return `(Sentinel, Symbol)` borrowing from a temporary
        // iterator item and the classification both from `name`, so box
        // the iteration through a small adapter instead of fighting
        // lifetimes here.
        SentinelIter {
            inner: self.dynamic.symbols(),
        }
    }

    /// Resolves a runtime-callable symbol by name (provider functions,
    /// formatters, test trampolines).
    pub fn resolve(&self, name: &str) -> Result<*mut c_void, LoadError> {
        let c_name = cstring_for_path(name)?;
        // SAFETY: `self.handle` is open; `c_name` is valid for this call.
        let ptr = unsafe { libc::dlsym(self.handle, c_name.as_ptr()) };
        if ptr.is_null() {
            return Err(LoadError::MissingSymbol {
                path: self.name.clone(),
                symbol: name.to_string(),
                message: dl_error_message(),
            });
        }
        Ok(ptr)
    }

    /// Reads a `size_t`-valued symbol's contents (used for
    /// `_SIZEOF_PROVIDER_<name>`).
    ///
    /// # Safety
    /// `address` must point at a live, correctly-aligned `usize` within
    /// this module's mapped image — true for any address this crate itself
    /// produced via [`Module::sentinels`].
    pub unsafe fn read_usize(&self, address: usize) -> usize {
        // SAFETY: forwarded from caller.
        unsafe { *(address as *const usize) }
    }

    /// Reads a NUL-terminated C string at `address` (used for
    /// `_PROVIDER_<name>`).
    ///
    /// # Safety
    /// Same precondition as [`Module::read_usize`].
    pub unsafe fn read_cstr(&self, address: usize) -> &str {
        // SAFETY: forwarded from caller.
        unsafe {
            CStr::from_ptr(address as *const i8)
                .to_str()
                .unwrap_or_default()
        }
    }
}

impl Drop for Module {
    fn drop(&mut self) {
        // SAFETY: `self.handle` came from a successful `dlopen()`, closed
        // at most once.
        let rc = unsafe { libc::dlclose(self.handle) };
        if rc != 0 {
            tracing::warn!(module = %self.name, "dlclose() failed for module");
        }
    }
}

struct SentinelIter<I> {
    inner: I,
}

impl<'a, I> Iterator for SentinelIter<I>
where
    I: Iterator<Item = Symbol<'a>>,
{
    type Item = (Sentinel<'a>, Symbol<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        for sym in self.inner.by_ref() {
            if let Some(sentinel) = classify(sym.name) {
                return Some((sentinel, sym));
            }
        }
        None
    }
}
