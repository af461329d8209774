//! The parallel runner: one worker thread per tester module (spec §4.6,
//! §5).
//!
//! Spawn failures for an individual module fall back to running that
//! module synchronously on the main thread after every other spawn has
//! been attempted, exactly mirroring the original's `pthread_create()`
//! fallback loop.

use std::sync::Arc;
use std::thread;

use ccheck_core::{run_tests, ModuleRunResult, Registry};
use ccheck_elf::Module;

use crate::reporter;

/// One module's outcome, including the module itself (so its handle can be
/// closed only after this result has been folded into the summary, per the
/// shutdown order in spec §4.6).
pub struct ModuleOutcome {
    pub module: Module,
    pub result: ModuleRunResult,
}

/// Runs every module's tests, one worker thread each, and returns every
/// outcome once all workers (and any synchronous fallbacks) have completed.
///
/// Prints each module's report line from the thread that ran it, as a
/// single buffered write (spec §5's atomicity requirement) — this function
/// does the printing itself rather than handing lines back to the caller,
/// since by the time a worker exits nothing else needs to observe that
/// write happening anywhere but stdout.
///
/// Takes `registry` by reference rather than by value: this function only
/// ever hands out short-lived clones to its worker threads, each dropped
/// before its `JoinHandle` is joined below, so it never becomes the
/// registry's last strong owner. The caller's own `Arc<Registry>` stays
/// alive across this call and is freed on the caller's own schedule, which
/// is what lets `main` guarantee the registry outlives every module handle
/// (spec §4.6's "modules, then subjects, then the registry" shutdown
/// order).
pub fn run_all(modules: Vec<Module>, registry: &Arc<Registry>, color: bool) -> Vec<ModuleOutcome> {
    let mut handles = Vec::with_capacity(modules.len());
    let mut fallback = Vec::new();

    for module in modules {
        let registry = Arc::clone(registry);
        let spawned = thread::Builder::new()
            .name(format!("ccheck-{}", module.name()))
            .spawn(move || run_and_report(module, &registry, color));

        match spawned {
            Ok(handle) => handles.push(handle),
            Err(error) => {
                tracing::warn!(%error, "pthread spawn failed, running module in series");
                fallback.push(module);
            }
        }
    }

    let mut outcomes = Vec::with_capacity(handles.len() + fallback.len());

    for module in fallback {
        outcomes.push(run_and_report(module, registry, color));
    }

    for handle in handles {
        match handle.join() {
            Ok(outcome) => outcomes.push(outcome),
            Err(_) => {
                tracing::error!("a module worker thread panicked; its results are lost");
            }
        }
    }

    outcomes
}

fn run_and_report(module: Module, registry: &Registry, color: bool) -> ModuleOutcome {
    // `run_tests` prints each failure's diagnostic itself, the instant that
    // test fails (`ccheck-core::driver::run_single_test`); the module
    // summary line below only ever runs once the whole module is done, the
    // same order as the original's per-test `fputs()` followed by one
    // `printf("Module %s: Ran...")` after the loop.
    let result = run_tests(&module, registry);

    if let Some(line) = reporter::module_line(module.name(), &result, module.has_provider(), color) {
        println!("{line}");
    }

    ModuleOutcome { module, result }
}
