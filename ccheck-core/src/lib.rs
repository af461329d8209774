//! The data model, fault guard, provider loader, and test driver that sit
//! on top of `ccheck-elf`'s raw ELF introspection.
//!
//! Nothing in this crate touches the command line or decides how results
//! are printed — that belongs to the `ccheck` binary. This crate's public
//! surface is: load a module's providers into a [`registry::Registry`],
//! then run its tests against that registry.

pub mod driver;
pub mod error;
pub mod guard;
pub mod loader;
pub mod registry;

pub use driver::{run_tests, ModuleRunResult, MAX_ARITY};
pub use error::{ProviderLoadError, RegistryError};
pub use guard::{
    fail_from_interposition, guarded, install_sigsegv_handler, is_armed, write_stderr_signal_safe,
    GuardOutcome, InstallSignalHandlerError,
};
pub use loader::{load_providers, FALLBACK_VARIANT_COUNT};
pub use registry::{Dataset, FormatFn, ProviderBucket, Registry};
