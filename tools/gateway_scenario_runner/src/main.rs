use gateway_scenario_runner::{discover_scenario_files, run_scenario_file, ScenarioOutcome};
use std::env;
use std::path::PathBuf;
use std::process::exit;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn main() {
    init_tracing();

    let mut scenario_path: Option<PathBuf> = None;
    let mut dir_path: Option<PathBuf> = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--scenario" => {
                let value = args.next().unwrap_or_else(|| usage_error("--scenario requires a path"));
                scenario_path = Some(PathBuf::from(value));
            }
            "--dir" => {
                let value = args.next().unwrap_or_else(|| usage_error("--dir requires a path"));
                dir_path = Some(PathBuf::from(value));
            }
            "--help" | "-h" => {
                usage();
                return;
            }
            _ => usage_error(&format!("unknown argument: {arg}")),
        }
    }

    let files = match (scenario_path, dir_path) {
        (Some(path), None) => vec![path],
        (None, Some(dir)) => {
            let files = discover_scenario_files(&dir).unwrap_or_else(|err| fail(&err));
            if files.is_empty() {
                fail(&format!("no scenario files found in {}", dir.display()));
            }
            files
        }
        _ => usage_error("choose exactly one of --scenario or --dir"),
    };

    let outcomes: Vec<ScenarioOutcome> = files
        .iter()
        .map(|path| run_scenario_file(path).unwrap_or_else(|err| fail(&err)))
        .collect();

    print_outcomes(&outcomes);
    if outcomes.iter().any(|outcome| !outcome.passed) {
        exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn print_outcomes(outcomes: &[ScenarioOutcome]) {
    let mut passed = 0usize;
    for outcome in outcomes {
        if outcome.passed {
            passed += 1;
            println!("ok: {} ({})", outcome.name, outcome.source);
        } else {
            println!("fail: {} ({})", outcome.name, outcome.source);
            for failure in &outcome.failures {
                println!("  - {failure}");
            }
        }
    }
    println!("summary: {passed}/{} passed", outcomes.len());
}

fn fail(message: &dyn std::fmt::Display) -> ! {
    eprintln!("error: {message}");
    exit(1);
}

fn usage_error(message: &str) -> ! {
    eprintln!("{message}");
    usage();
    exit(2);
}

fn usage() {
    println!("gateway_scenario_runner --scenario <path> | --dir <path>");
}
