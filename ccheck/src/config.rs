//! CLI surface and the small set of ambient tunables this harness exposes
//! (spec §6, §9).
//!
//! The `[subjects...] -- [testers...]` split is a domain concept, not
//! clap's own end-of-options marker, so it's parsed by hand; `clap` is
//! still used to build `--help`/usage text and to recognize the ambient
//! `-v`/`--verbose`/`--no-color` flags.

use clap::{Arg, ArgAction, Command};

/// Parsed command line: which objects are subjects, which are testers, and
/// the ambient flags that affect logging and output coloring.
#[derive(Debug)]
pub struct Cli {
    pub subjects: Vec<String>,
    pub testers: Vec<String>,
    pub verbosity: u8,
    pub color: bool,
}

fn command() -> Command {
    Command::new("ccheck")
        .about("Property-based test harness for native shared libraries")
        .after_help(
            "Every argument is a shared object file.\n\
             'subjects' are the libraries being tested; their symbols are exposed to the\n\
             testers that follow '--'. Testers expose providers, which generate data sets,\n\
             and tests, which consume that data and exercise the subjects.",
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("Increase log verbosity (repeatable)"),
        )
        .arg(
            Arg::new("no_color")
                .long("no-color")
                .action(ArgAction::SetTrue)
                .help("Disable ANSI colors in the report"),
        )
        .arg(
            Arg::new("objects")
                .help("[subjects...] -- [testers...]")
                .num_args(0..)
                .allow_hyphen_values(true),
        )
}

/// Parses `raw` (ordinarily `std::env::args()`, with argv[0] included).
///
/// Prints `--help` and exits the process when `-h`/`--help` is present,
/// matching clap's own convention for this case.
pub fn parse(raw: &[String]) -> Cli {
    if raw.iter().skip(1).any(|a| a == "-h" || a == "--help") {
        command().print_help().ok();
        println!();
        // Not `std::process::exit()`: this binary overrides the process-wide
        // `exit()` symbol (`interposition.rs`, spec §4.5 point 2) so that
        // `dlopen()`d testers' own calls to `exit()` become test failures.
        // Because that override is a *global* symbol, it also intercepts
        // `std::process::exit()`/the Rust runtime's own normal-termination
        // call to libc `exit()` on the main thread, where the guard is never
        // armed — which would misreport a clean `--help` exit as "exit from
        // an unexpected context" and force a nonzero status. Raw `_exit()`
        // bypasses the overridden symbol entirely (see `main::raw_exit`).
        unsafe { libc::_exit(0) }
    }

    let mut verbosity = 0u8;
    let mut no_color = false;
    let mut positional: Vec<String> = Vec::new();

    for arg in raw.iter().skip(1) {
        match arg.as_str() {
            "-v" | "--verbose" => verbosity = verbosity.saturating_add(1),
            "--no-color" => no_color = true,
            _ => positional.push(arg.clone()),
        }
    }

    let mut subjects = Vec::new();
    let mut testers = Vec::new();
    let mut seen_separator = false;

    for arg in positional {
        if !seen_separator && arg == "--" {
            seen_separator = true;
            continue;
        }
        if seen_separator {
            testers.push(arg);
        } else {
            subjects.push(arg);
        }
    }

    Cli {
        subjects,
        testers,
        verbosity,
        color: !no_color,
    }
}

/// Maps `-v` repetitions to a `tracing` filter directive, layered over the
/// `RUST_LOG` environment variable when it's set.
pub fn default_log_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "ccheck=info",
        1 => "ccheck=debug",
        _ => "ccheck=trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_subjects_and_testers_on_separator() {
        let raw: Vec<String> = ["ccheck", "libsubject.so", "--", "libtester.so"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let cli = parse(&raw);
        assert_eq!(cli.subjects, vec!["libsubject.so"]);
        assert_eq!(cli.testers, vec!["libtester.so"]);
    }

    #[test]
    fn recognizes_ambient_flags_anywhere() {
        let raw: Vec<String> = ["ccheck", "-v", "libsubject.so", "--no-color", "--", "lib.so"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let cli = parse(&raw);
        assert_eq!(cli.verbosity, 1);
        assert!(!cli.color);
        assert_eq!(cli.subjects, vec!["libsubject.so"]);
        assert_eq!(cli.testers, vec!["lib.so"]);
    }

    #[test]
    fn no_separator_means_everything_is_a_subject() {
        let raw: Vec<String> = ["ccheck", "libonly.so"].iter().map(|s| s.to_string()).collect();
        let cli = parse(&raw);
        assert_eq!(cli.subjects, vec!["libonly.so"]);
        assert!(cli.testers.is_empty());
    }
}
