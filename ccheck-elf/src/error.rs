use std::ffi::CString;

/// Failures that can occur while loading a shared object or walking its
/// dynamic section.
///
/// These are always recoverable at the granularity of a single module: the
/// caller drops the offending module and keeps going (spec §7, "Load
/// error").
#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    /// `dlopen()` itself failed.
    #[error("dlopen() failed for '{path}': {message}")]
    Dlopen { path: String, message: String },

    /// `dlinfo(RTLD_DI_LINKMAP)` failed for an otherwise-open handle.
    #[error("dlinfo() failed for '{path}': {message}")]
    Dlinfo { path: String, message: String },

    /// Neither `DT_HASH` nor `DT_GNU_HASH` let us determine the length of
    /// the symbol table.
    #[error("couldn't determine symbol table size for '{path}'")]
    UnknownSymbolCount { path: String },

    /// `DT_SYMTAB` was absent from the dynamic section.
    #[error("couldn't find symbol table for '{path}'")]
    MissingSymtab { path: String },

    /// `DT_STRTAB` was absent from the dynamic section.
    #[error("couldn't find string table for '{path}'")]
    MissingStrtab { path: String },

    /// A symbol name could not be resolved to an address via `dlsym()`.
    #[error("missing symbol '{symbol}' in '{path}': {message}")]
    MissingSymbol {
        path: String,
        symbol: String,
        message: String,
    },

    /// A path argument contained an embedded NUL and cannot be passed to
    /// `dlopen()`.
    #[error("path '{0}' contains an embedded NUL byte")]
    InvalidPath(String),
}

/// Reads the process-wide `dlerror()` message, if any was set.
///
/// Safe to call repeatedly; `dlerror()` clears its internal state on each
/// read, matching glibc's documented behavior.
pub(crate) fn dl_error_message() -> String {
    // SAFETY: `dlerror` returns either NULL or a pointer to a static,
    // NUL-terminated string owned by libc; we never free or mutate it.
    unsafe {
        let ptr = libc::dlerror();
        if ptr.is_null() {
            "unknown error".to_string()
        } else {
            std::ffi::CStr::from_ptr(ptr).to_string_lossy().into_owned()
        }
    }
}

pub(crate) fn cstring_for_path(path: &str) -> Result<CString, LoadError> {
    CString::new(path).map_err(|_| LoadError::InvalidPath(path.to_string()))
}
