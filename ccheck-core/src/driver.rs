//! The test driver: resolves a test's argument types, enumerates every
//! provider/data combination, invokes the `_TEST_<name>` trampoline under
//! the fault guard, and formats failure diagnostics (spec §4.4).

use std::ffi::CStr;
use std::os::raw::{c_char, c_void};

use ccheck_elf::{Module, Sentinel};

use crate::guard::{guarded, GuardOutcome};
use crate::registry::{Dataset, ProviderBucket, Registry};

/// The maximum number of arguments a `TEST()` function may declare. An ABI
/// constant shared with `interface.h`, not a tuning knob (spec §9).
pub const MAX_ARITY: usize = 8;

/// The outcome of running every test a module exports.
#[derive(Debug, Default)]
pub struct ModuleRunResult {
    pub variants: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// One fully-formatted failure line per failed test, in completion
    /// order (spec §4.4 point 8 for the format). Each line is already
    /// printed at the moment its test fails (`run_single_test` below); this
    /// is a record of what went to stdout, for callers that want it (e.g.
    /// tests), not a second copy still waiting to be printed.
    pub diagnostics: Vec<String>,
}

/// Runs every `_SIG_TEST_*` test a module exports against `registry`.
pub fn run_tests(module: &Module, registry: &Registry) -> ModuleRunResult {
    let mut result = ModuleRunResult::default();

    let tests: Vec<(String, usize)> = module
        .sentinels()
        .filter_map(|(sentinel, sym)| match sentinel {
            Sentinel::TestSignature { name } => Some((name.to_string(), sym.address)),
            _ => None,
        })
        .collect();

    for (test_name, signature_address) in tests {
        run_single_test(module, registry, &test_name, signature_address, &mut result);
    }

    result
}

fn run_single_test(
    module: &Module,
    registry: &Registry,
    test_name: &str,
    signature_address: usize,
    result: &mut ModuleRunResult,
) {
    // SAFETY: `signature_address` is a `_SIG_TEST_<name>` symbol's
    // relocated address, a NUL-terminated, double-NUL-delimited list of
    // (type, argument name) string pairs per the `TEST()` macro's `JOIN`
    // expansion.
    let args = unsafe { parse_signature(signature_address) };
    let arity = args.len();

    if arity > MAX_ARITY {
        tracing::warn!(module = module.name(), test = test_name, arity, "test arity exceeds MAX_ARITY, skipping");
        result.failed += 1;
        return;
    }

    let trampoline_symbol = format!("_TEST_{test_name}");
    let trampoline_ptr = match module.resolve(&trampoline_symbol) {
        Ok(ptr) => ptr,
        Err(error) => {
            tracing::warn!(module = module.name(), test = test_name, %error, "missing test trampoline");
            result.failed += 1;
            return;
        }
    };

    // Deduplicate argument types, first-seen order, mirroring the
    // `argTypes`/`argTypeIndices` construction in `runTests()`.
    let mut arg_types: Vec<&str> = Vec::new();
    let mut arg_type_indices: Vec<usize> = Vec::with_capacity(arity);
    let arg_names: Vec<&str> = args.iter().map(|(_, name)| name.as_str()).collect();

    for (type_name, _) in &args {
        let index = match arg_types.iter().position(|t| *t == type_name) {
            Some(i) => i,
            None => {
                arg_types.push(type_name);
                arg_types.len() - 1
            }
        };
        arg_type_indices.push(index);
    }

    let mut buckets: Vec<&ProviderBucket> = Vec::with_capacity(arg_types.len());
    for type_name in &arg_types {
        match registry.get(type_name) {
            Some(bucket) => buckets.push(bucket),
            None => {
                tracing::warn!(module = module.name(), test = test_name, type_name = *type_name, "no providers registered for type");
                result.failed += 1;
                return;
            }
        }
    }

    let provider_counts: Vec<usize> = buckets.iter().map(|b| b.datasets.len()).collect();
    let mut cur_providers = vec![0usize; buckets.len()];

    loop {
        let data_counts: Vec<usize> = arg_type_indices
            .iter()
            .map(|&ti| buckets[ti].datasets[cur_providers[ti]].count)
            .collect();

        // A provider tuple where some argument's dataset is empty
        // contributes zero variants for that tuple, and is not a failure
        // (spec §4.4 edge case) — skip straight to the next provider
        // combination rather than invoking the trampoline with an
        // out-of-range data index.
        if !data_counts.contains(&0) {
            let mut data_indices = vec![0usize; arity];

            loop {
                result.variants += 1;

                let arg_ptrs: Vec<*const c_void> = (0..arity)
                    .map(|i| {
                        let ti = arg_type_indices[i];
                        let bucket = buckets[ti];
                        let dataset = &bucket.datasets[cur_providers[ti]];
                        dataset.element_ptr(bucket.element_size, data_indices[i]) as *const c_void
                    })
                    .collect();

                let outcome = guarded(|| {
                    // SAFETY: `trampoline_ptr` was resolved from
                    // `_TEST_<name>`; `arg_ptrs` holds exactly `arity`
                    // valid element pointers per the ABI contract.
                    unsafe { call_trampoline(trampoline_ptr, &arg_ptrs) };
                });

                if let GuardOutcome::Failed { message } = outcome {
                    result.failed += 1;
                    let diagnostic = format_failure(
                        module.name(),
                        test_name,
                        &arg_names,
                        &arg_type_indices,
                        &buckets,
                        &cur_providers,
                        &data_indices,
                        &message,
                    );
                    // Printed the instant the failure happens, not batched
                    // for printing after the module's summary line (spec
                    // §4.4 point 8; mirrors `fputs()` at the failure site in
                    // `runSingleTest()`).
                    println!("{diagnostic}");
                    result.diagnostics.push(diagnostic);
                    return;
                }

                if !next_combination(&data_counts, &mut data_indices) {
                    break;
                }
            }
        }

        if !next_combination(&provider_counts, &mut cur_providers) {
            break;
        }
    }

    result.succeeded += 1;
}

/// Enumerates every vector `v` with `0 <= v[i] < limits[i]` for all `i`,
/// one step (odometer-style, least significant first) per call.
///
/// Returns `false` once every combination has been visited, including
/// immediately when `limits` is empty (arity/type count 0).
fn next_combination(limits: &[usize], indices: &mut [usize]) -> bool {
    for i in 0..limits.len() {
        indices[i] += 1;
        if indices[i] >= limits[i] {
            indices[i] = 0;
            continue;
        }
        return true;
    }
    false
}

/// Walks a `_SIG_TEST_*` signature string into `(type, argument name)`
/// pairs, stopping at the first empty "type" entry (the `JOIN()` macro's
/// terminator).
///
/// # Safety
/// `address` must point at a valid `_SIG_TEST_*` sentinel symbol's data.
unsafe fn parse_signature(address: usize) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut cursor = address as *const c_char;

    loop {
        // SAFETY: forwarded from caller; each string in the list is
        // NUL-terminated, and the list itself ends with an empty string.
        let type_cstr = unsafe { CStr::from_ptr(cursor) };
        if type_cstr.to_bytes().is_empty() {
            break;
        }
        let type_name = type_cstr.to_string_lossy().into_owned();
        // SAFETY: advances past this string's NUL terminator, still within
        // the sentinel's data per the `JOIN()` macro's layout.
        cursor = unsafe { cursor.add(type_cstr.to_bytes().len() + 1) };

        // SAFETY: same as above — the name always follows its type.
        let name_cstr = unsafe { CStr::from_ptr(cursor) };
        let arg_name = name_cstr.to_string_lossy().into_owned();
        // SAFETY: same as above.
        cursor = unsafe { cursor.add(name_cstr.to_bytes().len() + 1) };

        pairs.push((type_name, arg_name));
    }

    pairs
}

/// Calls a resolved `_TEST_<name>` trampoline with exactly `args.len()`
/// arguments.
///
/// # Safety
/// `ptr` must be a valid function pointer whose real signature takes
/// `args.len()` `const void *` parameters and returns `void`, and
/// `args.len() <= MAX_ARITY`.
unsafe fn call_trampoline(ptr: *mut c_void, args: &[*const c_void]) {
    type A = *const c_void;
    // SAFETY: forwarded from caller for every arm below.
    unsafe {
        match args.len() {
            0 => {
                let f: unsafe extern "C" fn() = std::mem::transmute(ptr);
                f();
            }
            1 => {
                let f: unsafe extern "C" fn(A) = std::mem::transmute(ptr);
                f(args[0]);
            }
            2 => {
                let f: unsafe extern "C" fn(A, A) = std::mem::transmute(ptr);
                f(args[0], args[1]);
            }
            3 => {
                let f: unsafe extern "C" fn(A, A, A) = std::mem::transmute(ptr);
                f(args[0], args[1], args[2]);
            }
            4 => {
                let f: unsafe extern "C" fn(A, A, A, A) = std::mem::transmute(ptr);
                f(args[0], args[1], args[2], args[3]);
            }
            5 => {
                let f: unsafe extern "C" fn(A, A, A, A, A) = std::mem::transmute(ptr);
                f(args[0], args[1], args[2], args[3], args[4]);
            }
            6 => {
                let f: unsafe extern "C" fn(A, A, A, A, A, A) = std::mem::transmute(ptr);
                f(args[0], args[1], args[2], args[3], args[4], args[5]);
            }
            7 => {
                let f: unsafe extern "C" fn(A, A, A, A, A, A, A) = std::mem::transmute(ptr);
                f(args[0], args[1], args[2], args[3], args[4], args[5], args[6]);
            }
            8 => {
                let f: unsafe extern "C" fn(A, A, A, A, A, A, A, A) = std::mem::transmute(ptr);
                f(
                    args[0], args[1], args[2], args[3], args[4], args[5], args[6], args[7],
                );
            }
            _ => unreachable!("arity already validated against MAX_ARITY"),
        }
    }
}

/// Renders one value of `dataset` through its formatter, matching
/// `vsnprintf`'s truncate-and-report-would-be-length semantics.
fn format_value(dataset: &Dataset, element_size: usize, index: usize) -> String {
    const CAP: usize = 256;
    let mut buf = [0u8; CAP];
    let element_ptr = dataset.element_ptr(element_size, index) as *const c_void;
    // SAFETY: `element_ptr` is valid for `element_size` bytes (the
    // dataset's own invariant); `buf` reserves `CAP` bytes matching the
    // `n` argument passed to the formatter.
    let written = unsafe { (dataset.format)(buf.as_mut_ptr() as *mut c_char, CAP, element_ptr) };
    let len = written.min(CAP - 1);
    String::from_utf8_lossy(&buf[..len]).into_owned()
}

/// Builds the pinned diagnostic line for a failing variant (spec §4.4
/// point 8): `Failed test <module>::<test>( <arg0name> = <formatted0>
/// (<src_module>::<dataset> #<idx>), … ): <message>`.
#[allow(clippy::too_many_arguments)]
fn format_failure(
    module_name: &str,
    test_name: &str,
    arg_names: &[&str],
    arg_type_indices: &[usize],
    buckets: &[&ProviderBucket],
    cur_providers: &[usize],
    data_indices: &[usize],
    message: &str,
) -> String {
    let mut out = format!("Failed test {module_name}::{test_name}(");

    for (i, arg_name) in arg_names.iter().enumerate() {
        let ti = arg_type_indices[i];
        let bucket = buckets[ti];
        let dataset = &bucket.datasets[cur_providers[ti]];
        let formatted = format_value(dataset, bucket.element_size, data_indices[i]);
        let separator = if i == 0 { "" } else { "," };
        out.push_str(&format!(
            "{separator} {arg_name} = {formatted} ({}::{} #{})",
            dataset.source_module, dataset.name, data_indices[i]
        ));
    }

    out.push_str(&format!(" ): {message}"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_combination_enumerates_in_odometer_order() {
        let limits = [2usize, 3usize];
        let mut indices = [0usize, 0usize];
        let mut seen = vec![indices];

        while next_combination(&limits, &mut indices) {
            seen.push(indices);
        }

        assert_eq!(
            seen,
            vec![
                [0, 0],
                [1, 0],
                [0, 1],
                [1, 1],
                [0, 2],
                [1, 2],
            ]
        );
    }

    #[test]
    fn next_combination_with_no_dimensions_runs_once() {
        let limits: [usize; 0] = [];
        let mut indices: [usize; 0] = [];
        assert!(!next_combination(&limits, &mut indices));
    }

    #[test]
    fn next_combination_three_arg_cartesian_product_size() {
        // Mirrors the nine-variant scenario: three binary types.
        let limits = [3usize, 3usize, 1usize];
        let mut indices = [0usize, 0usize, 0usize];
        let mut count = 1;
        while next_combination(&limits, &mut indices) {
            count += 1;
        }
        assert_eq!(count, 9);
    }
}
