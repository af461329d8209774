//! `ccheck`: the CLI binary wiring the discovery engine, provider loader,
//! test driver, parallel runner, and reporter together (spec §1, §6).
//!
//! `run()` handles the genuinely fatal startup failures; everything
//! downstream of "a module loaded" recovers locally and is folded into
//! counters, per the error-handling policy in SPEC_FULL §7. `main` itself
//! never returns a `Result` and never calls `std::process::exit` — see
//! `raw_exit` below for why.

mod config;
mod interposition;
mod reporter;
mod runner;

use std::sync::Arc;

use anyhow::Result;
use ccheck_core::{install_sigsegv_handler, load_providers, Registry};
use ccheck_elf::{Module, Subject};
use tracing_subscriber::EnvFilter;

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(error) => {
            eprintln!("Error: {error:#}");
            1
        }
    };
    raw_exit(code);
}

/// Terminates the process immediately via the raw `_exit(2)` syscall
/// wrapper, bypassing this binary's own `exit()` override
/// (`interposition.rs`).
///
/// This binary exports a process-wide `exit()` symbol so that
/// `dlopen()`d testers resolve *their* calls to `exit()` here instead of
/// in glibc (spec §4.5 point 2). Because `-rdynamic` makes that override a
/// normal global symbol, it also intercepts the harness's *own* natural
/// termination: `std::process::exit()`, and even an ordinary `return` from
/// `main()`, end up calling libc's `exit()` internally — which our own
/// override would then treat as "an `exit()` call from an unexpected
/// context" (the guard is never armed on the path out of `main`) and
/// forcibly report as a crash. Every intentional exit from this binary
/// therefore goes through `_exit()` directly, the one libc termination
/// entry point this binary does not shadow.
fn raw_exit(code: i32) -> ! {
    // SAFETY: `_exit` is always safe to call and never returns.
    unsafe { libc::_exit(code) }
}

fn run() -> Result<i32> {
    let args: Vec<String> = std::env::args().collect();
    let cli = config::parse(&args);

    colored::control::set_override(cli.color);

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_directive(cli.verbosity))),
        )
        .init();

    if install_sigsegv_handler().is_err() {
        tracing::warn!("segfaults will not be caught: sigaction() failed installing the SIGSEGV handler");
    }

    let mut linker_errors = false;

    let mut subjects = Vec::with_capacity(cli.subjects.len());
    for path in &cli.subjects {
        match Subject::open(path) {
            Ok(subject) => subjects.push(subject),
            Err(error) => {
                eprintln!("Error loading '{path}': {error}");
                linker_errors = true;
            }
        }
    }

    let mut modules = Vec::with_capacity(cli.testers.len());
    for path in &cli.testers {
        match Module::open(path) {
            Ok(module) => modules.push(module),
            Err(error) => {
                eprintln!("Error loading '{path}': {error}");
                linker_errors = true;
            }
        }
    }

    let mut registry = Registry::new();
    let mut provider_count = 0;
    for module in &modules {
        provider_count += load_providers(module, &mut registry);
    }

    println!(
        "Loaded {} and {}.",
        plural(subjects.len(), "subject"),
        plural(provider_count, "provider"),
    );

    let registry = Arc::new(registry);
    let outcomes = runner::run_all(modules, &registry, cli.color);

    let mut total_tests = 0;
    let mut total_variants = 0;
    let mut total_failed = 0;

    for outcome in &outcomes {
        total_tests += outcome.result.succeeded + outcome.result.failed;
        total_variants += outcome.result.variants;
        total_failed += outcome.result.failed;
    }

    println!(
        "{}",
        reporter::summary_line(total_tests, outcomes.len(), total_variants, total_failed, cli.color)
    );

    if linker_errors {
        println!("There were linking errors");
    }

    // Shutdown order (spec §4.6): workers already joined by `run_all`.
    // `run_all` borrowed `registry` rather than owning it, so every clone it
    // handed to a worker thread is already gone by the time it returns —
    // this `Arc` is the only one left. Dropping `outcomes` then `subjects`
    // here, in that order, closes every module handle and then every
    // subject handle; `registry` itself isn't dropped until this function
    // returns, after both, so it's freed strictly last.
    drop(outcomes);
    drop(subjects);

    Ok(if linker_errors || total_failed > 0 { 1 } else { 0 })
}

fn plural(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("{n} {noun}")
    } else {
        format!("{n} {noun}s")
    }
}
