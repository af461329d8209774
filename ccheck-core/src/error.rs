//! Error taxonomy for the data model, provider loader, and test driver.
//!
//! Every variant here is *recoverable at its own granularity* (spec §7): a
//! provider failing to load skips that provider; a test failing to run
//! skips that test. Nothing in this crate ever turns a per-provider or
//! per-test problem into a propagated, run-aborting `Result` — callers log
//! these via `tracing::warn!` and fold them into counters.

/// A provider's dataset couldn't be added to the registry.
#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error(
        "type '{type_name}' already has a provider with element size {expected}, \
         but this one reports {got}"
    )]
    ElementSizeMismatch {
        type_name: String,
        expected: usize,
        got: usize,
    },
}

/// Everything that can go wrong loading a single provider (spec §4.3).
#[derive(thiserror::Error, Debug)]
pub enum ProviderLoadError {
    #[error("missing symbol '{symbol}': {message}")]
    MissingSymbol { symbol: String, message: String },

    #[error("faulted while querying its size: {message}")]
    SizeQueryFault { message: String },

    #[error("faulted while filling its dataset: {message}")]
    FillFault { message: String },

    #[error("returned a size larger than requested ({got} > {requested})")]
    OversizedFill { requested: usize, got: usize },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
