//! Provider loading: for every `_SIZEOF_PROVIDER_<name>` sentinel a tester
//! exports, resolve its type name and formatter, query its size under the
//! fault guard, fill it, and insert the result into the registry (spec
//! §4.3).

use std::cell::Cell;
use std::os::raw::c_void;

use ccheck_elf::{Module, Sentinel};

use crate::error::ProviderLoadError;
use crate::guard::{guarded, GuardOutcome};
use crate::registry::{Dataset, FormatFn, Registry};

/// Used when a provider function reports zero available variants (spec
/// §4.3 point 4).
pub const FALLBACK_VARIANT_COUNT: usize = 50;

type ProviderFn = unsafe extern "C" fn(usize, *mut c_void) -> usize;

/// Loads every provider `module` exports into `registry`.
///
/// Returns the number that loaded successfully; failures are logged and
/// otherwise ignored (they leave the registry exactly as it was).
pub fn load_providers(module: &Module, registry: &mut Registry) -> usize {
    let candidates: Vec<(String, usize)> = module
        .sentinels()
        .filter_map(|(sentinel, sym)| match sentinel {
            Sentinel::SizeofProvider { name } => {
                // SAFETY: `sym.address` is a `_SIZEOF_PROVIDER_<name>`
                // symbol's relocated address; the ABI contract (the
                // `PROVIDER()` macro) guarantees it holds a `size_t`.
                let size = unsafe { module.read_usize(sym.address) };
                Some((name.to_string(), size))
            }
            _ => None,
        })
        .collect();

    let mut loaded = 0;
    for (name, element_size) in candidates {
        match load_one_provider(module, &name, element_size, registry) {
            Ok(()) => {
                loaded += 1;
                module.mark_has_provider();
            }
            Err(error) => {
                tracing::warn!(module = module.name(), provider = name, %error, "failed to load provider");
            }
        }
    }
    loaded
}

fn load_one_provider(
    module: &Module,
    name: &str,
    element_size: usize,
    registry: &mut Registry,
) -> Result<(), ProviderLoadError> {
    let type_symbol = format!("_PROVIDER_{name}");
    let type_address = module
        .resolve(&type_symbol)
        .map_err(|e| missing(&type_symbol, &e))? as usize;
    // SAFETY: `type_address` is the resolved address of the `_PROVIDER_*`
    // symbol itself, a NUL-terminated string per the `PROVIDER()` macro.
    let type_name = unsafe { module.read_cstr(type_address) }.to_string();

    let provider_ptr = module.resolve(name).map_err(|e| missing(name, &e))?;
    // SAFETY: `interface.h` pins `provider_f` as `size_t(*)(size_t, void*)`;
    // `provider_ptr` was resolved by the exact name the `PROVIDER()` macro
    // declared with that signature.
    let provider_fn: ProviderFn = unsafe { std::mem::transmute(provider_ptr) };

    let format_symbol = format_symbol_name(&type_name);
    let format_ptr = module
        .resolve(&format_symbol)
        .map_err(|e| missing(&format_symbol, &e))?;
    // SAFETY: same reasoning, for `format_f`.
    let format_fn: FormatFn = unsafe { std::mem::transmute(format_ptr) };

    let queried = Cell::new(0usize);
    let outcome = guarded(|| {
        // SAFETY: cap=0, buf=NULL is the documented size-query convention
        // (spec §4.3 point 3 / interface.h's `provider_f` contract).
        let n = unsafe { provider_fn(0, std::ptr::null_mut()) };
        queried.set(n);
    });
    if let GuardOutcome::Failed { message } = outcome {
        return Err(ProviderLoadError::SizeQueryFault { message });
    }

    let mut requested = queried.get();
    if requested == 0 {
        requested = FALLBACK_VARIANT_COUNT;
    }

    let mut buffer = vec![0u8; requested * element_size].into_boxed_slice();
    let buffer_ptr = buffer.as_mut_ptr() as *mut c_void;
    let filled = Cell::new(0usize);
    let outcome = guarded(|| {
        // SAFETY: `buffer` reserves `requested * element_size` bytes,
        // matching the `cap` argument passed here.
        let m = unsafe { provider_fn(requested, buffer_ptr) };
        filled.set(m);
    });
    if let GuardOutcome::Failed { message } = outcome {
        return Err(ProviderLoadError::FillFault { message });
    }

    let filled = filled.get();
    if filled > requested {
        return Err(ProviderLoadError::OversizedFill {
            requested,
            got: filled,
        });
    }

    let buffer = if filled < requested {
        let mut shrunk = vec![0u8; filled * element_size].into_boxed_slice();
        shrunk.copy_from_slice(&buffer[..filled * element_size]);
        shrunk
    } else {
        buffer
    };

    let dataset = Dataset::new(
        module.name().to_string(),
        name.to_string(),
        filled,
        buffer,
        format_fn,
    );
    registry.insert(&type_name, element_size, dataset)?;
    Ok(())
}

fn missing(symbol: &str, error: &ccheck_elf::LoadError) -> ProviderLoadError {
    ProviderLoadError::MissingSymbol {
        symbol: symbol.to_string(),
        message: error.to_string(),
    }
}

/// `format_<type>` with spaces replaced by underscores, matching the
/// `PROVIDER()` macro's `CCAT(format_, UNSEP(...))` expansion for
/// multi-word types (e.g. `struct foo` -> `format_struct_foo`).
fn format_symbol_name(type_name: &str) -> String {
    let mut out = String::from("format_");
    for ch in type_name.chars() {
        out.push(if ch == ' ' { '_' } else { ch });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_symbol_name_replaces_spaces() {
        assert_eq!(format_symbol_name("uint16_t"), "format_uint16_t");
        assert_eq!(format_symbol_name("struct foo"), "format_struct_foo");
    }
}
