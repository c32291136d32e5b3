//! Runs the reference scenarios against a live ring set.
//!
//! Exit codes: 0 when every scenario passes, 1 when ring creation or
//! program registration fails, 2 when a scenario's expectations are not
//! met. Log verbosity follows `RUST_LOG` (default `info`).

mod scenarios;

use std::process::ExitCode;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::scenarios::{Scenario, ScenarioError};

const EXIT_SETUP: u8 = 1;
const EXIT_EXPECTATION: u8 = 2;

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut failed = 0usize;
    for scenario in scenarios::all() {
        let Scenario { name, run } = scenario;
        println!("== scenario {name}");
        match run() {
            Ok(()) => tracing::info!(scenario = name, "passed"),
            Err(ScenarioError::Setup(e)) => {
                tracing::error!(scenario = name, error = %e, "setup failed, aborting");
                return ExitCode::from(EXIT_SETUP);
            }
            Err(e) => {
                tracing::error!(scenario = name, error = %e, "failed");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        tracing::error!(failed, "scenarios failed");
        ExitCode::from(EXIT_EXPECTATION)
    } else {
        ExitCode::SUCCESS
    }
}
