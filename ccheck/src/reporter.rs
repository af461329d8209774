//! Formats the per-module and summary report lines (spec §4.6).
//!
//! Every literal string here is pinned by spec §8's end-to-end scenarios;
//! don't reword them without checking those scenarios still match.

use colored::Colorize;

use ccheck_core::ModuleRunResult;

/// Pluralizes a regular noun: `conjugate(1, "test")` -> `"1 test"`,
/// `conjugate(0, "test")` -> `"0 tests"`.
fn conjugate(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("{n} {noun}")
    } else {
        format!("{n} {noun}s")
    }
}

/// One module's report line, emitted by its own worker thread as a single
/// buffered write (spec §5 atomicity requirement).
///
/// Modules that produced at least one variant get the `Ran T tests with V
/// variants, F failures` line, green when `F == 0` and red otherwise. A
/// module with no variants and no providers gets the yellow "provided no
/// data" line instead. A module with no variants but at least one provider
/// (every test it declared was skipped as a precondition error, or it
/// declared no tests at all) prints nothing, matching the original's
/// `if(dl->variants) {...} else if (!dl->provider) {...}` — silence is the
/// third branch.
pub fn module_line(name: &str, result: &ModuleRunResult, has_provider: bool, color: bool) -> Option<String> {
    if result.variants > 0 {
        let tests = result.succeeded + result.failed;
        let line = format!(
            "Module {name}: Ran {} with {}, {}",
            conjugate(tests, "test"),
            conjugate(result.variants, "variant"),
            conjugate(result.failed, "failure"),
        );
        return Some(colorize(&line, result.failed == 0, color));
    }

    if !has_provider {
        let line = format!("Module {name} provided no data and contained no tests");
        return Some(if color {
            line.yellow().to_string()
        } else {
            line
        });
    }

    None
}

/// The final aggregate line printed after every worker has joined.
pub fn summary_line(total_tests: usize, module_count: usize, total_variants: usize, total_failed: usize, color: bool) -> String {
    let line = format!(
        "Summary: Ran {} from {} with {}, got {}",
        conjugate(total_tests, "test"),
        conjugate(module_count, "module"),
        conjugate(total_variants, "variant"),
        conjugate(total_failed, "failure"),
    );
    colorize(&line, total_failed == 0, color)
}

fn colorize(line: &str, success: bool, color: bool) -> String {
    if !color {
        return line.to_string();
    }
    if success {
        line.bright_green().to_string()
    } else {
        line.red().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(variants: usize, succeeded: usize, failed: usize) -> ModuleRunResult {
        ModuleRunResult {
            variants,
            succeeded,
            failed,
            diagnostics: Vec::new(),
        }
    }

    #[test]
    fn module_line_reports_a_single_passing_test() {
        let r = result(1, 1, 0);
        let line = module_line("tester.so", &r, true, false).unwrap();
        assert_eq!(line, "Module tester.so: Ran 1 test with 1 variant, 0 failures");
    }

    #[test]
    fn module_line_pluralizes_for_multiple_variants() {
        let r = result(3, 1, 0);
        let line = module_line("tester.so", &r, true, false).unwrap();
        assert_eq!(line, "Module tester.so: Ran 1 test with 3 variants, 0 failures");
    }

    #[test]
    fn module_line_is_none_with_no_variants_and_a_provider() {
        let r = result(0, 0, 0);
        assert!(module_line("tester.so", &r, true, false).is_none());
    }

    #[test]
    fn module_line_reports_no_data_without_a_provider() {
        let r = result(0, 0, 0);
        let line = module_line("tester.so", &r, false, false).unwrap();
        assert_eq!(line, "Module tester.so provided no data and contained no tests");
    }

    #[test]
    fn summary_line_matches_the_pinned_scenario() {
        let line = summary_line(1, 1, 1, 0, false);
        assert_eq!(line, "Summary: Ran 1 test from 1 module with 1 variant, got 0 failures");
    }

    #[test]
    fn summary_line_pluralizes_modules_and_failures() {
        let line = summary_line(2, 2, 9, 1, false);
        assert_eq!(line, "Summary: Ran 2 tests from 2 modules with 9 variants, got 1 failure");
    }
}
