//! Trellis CLI
//!
//! Loads a scenario fixture, optimises its offers and prints the plan.
//!
//! Use `-f` to pick a scenario by name
//! Use `-b` to override the combination search bound

use std::{
    io::{self, Write},
    process::ExitCode,
    time::Instant,
};

use humanize_duration::{Truncate, prelude::DurationExt};
use thiserror::Error;
use tracing::info;
use trellis::{
    config::Cli,
    constraints::ConstraintError,
    engine::StackingEngine,
    fixtures::{Fixture, FixtureError},
    observability::{ObservabilityError, init_subscriber},
    personalization::PreferenceSignal,
    receipt::{PlanReceipt, ReceiptError},
};

/// Errors surfaced by the binary.
#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] clap::Error),

    #[error(transparent)]
    Observability(#[from] ObservabilityError),

    #[error(transparent)]
    Fixture(#[from] FixtureError),

    #[error("malformed constraints: {0}")]
    Constraint(#[from] ConstraintError),

    #[error(transparent)]
    Receipt(#[from] ReceiptError),

    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Config(error)) => {
            _ = error.print();

            ExitCode::from(u8::try_from(error.exit_code()).unwrap_or(2))
        }
        Err(error) => {
            report(&error);

            ExitCode::FAILURE
        }
    }
}

#[expect(clippy::print_stderr, reason = "CLI error reporting")]
fn report(error: &CliError) {
    eprintln!("error: {error}");
}

fn run() -> Result<(), CliError> {
    let cli = Cli::load()?;

    init_subscriber(&cli.logging)?;

    let mut scenario =
        Fixture::with_base_path(&cli.scenario.fixture_dir).load_scenario(&cli.scenario.name)?;

    if let Some(bound) = cli.engine.search_bound {
        scenario.constraints.max_combination_size = bound;
    }

    info!(scenario = %scenario.name, offers = scenario.offers.len(), "loaded scenario");

    let signal = scenario
        .signal
        .as_ref()
        .filter(|_| !cli.scenario.no_personalization)
        .map(|signal| signal as &dyn PreferenceSignal);

    let engine = StackingEngine::new(cli.engine.settings());

    let start = Instant::now();

    let result = engine.optimize_at(
        &scenario.product,
        &scenario.offers,
        &scenario.constraints,
        signal,
        scenario.now,
    )?;

    let elapsed = start.elapsed();

    let stdout = io::stdout();
    let mut handle = stdout.lock();

    writeln!(
        handle,
        "\n\x1b[1m{}\x1b[0m  {} at {}",
        scenario.name, scenario.product.id, scenario.product.base_price
    )?;

    if !scenario.description.is_empty() {
        writeln!(handle, "{}", scenario.description)?;
    }

    PlanReceipt::new(&result).write_to(&mut handle)?;

    writeln!(
        handle,
        "Outcome: {} ({} combinations{})\nSolution: {}",
        result.outcome,
        result.combinations_evaluated,
        if result.truncated { ", search truncated" } else { "" },
        elapsed.human(Truncate::Nano)
    )?;

    Ok(())
}
