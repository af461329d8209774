//! ELF dynamic-section introspection and `dlopen`-based module loading.
//!
//! This crate is the discovery engine from the harness's component design:
//! given a path to a shared object, it opens it, walks its `.dynamic`
//! section to find the symbol and string tables (resolving the symbol
//! count via `DT_HASH`/`DT_GNU_HASH`), and exposes an iterator over the
//! sentinel symbols (`_SIZEOF_PROVIDER_*`, `_PROVIDER_*`, `_SIG_TEST_*`)
//! that form the wire protocol with tester modules.
//!
//! It knows nothing about providers, tests, or the fault guard — that's
//! `ccheck-core`, built on top of the types here.

mod dynamic;
mod error;
mod module;
mod sentinel;

pub use dynamic::Symbol;
pub use error::LoadError;
pub use module::{Module, Subject};
pub use sentinel::{classify, Sentinel};
