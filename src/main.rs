//! Command-line dispatcher for the demonstration scenarios.

use anyhow::{Result, bail};
use clap::{CommandFactory, Parser};
use log::LevelFilter;
use rtos_sim::logging;
use rtos_sim::scenarios::{SCENARIOS, ScenarioOutcome};

#[derive(Parser)]
#[command(
	name = "rtos-sim",
	about = "RTOS task scheduler simulator - priority inheritance demo",
	after_help = "\
Scenarios:
  1   - Basic Priority Scheduling
  2   - Preemption
  3   - Priority Inversion WITH PI  (the killer demo)
  4   - Priority Inversion WITHOUT PI (comparison)
  5   - Transitive Priority Inheritance
  6   - Rate Monotonic Scheduling
  7   - Semaphore Producer-Consumer
  8   - Deadline Miss Detection
  all - Run all scenarios"
)]
struct Cli {
	/// Scenario to run: 1-8, or "all"
	scenario: Option<String>,

	/// Increase diagnostic verbosity (-v, -vv, -vvv)
	#[arg(short, long, action = clap::ArgAction::Count)]
	verbose: u8,
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	logging::init(match cli.verbose {
		0 => LevelFilter::Warn,
		1 => LevelFilter::Info,
		2 => LevelFilter::Debug,
		_ => LevelFilter::Trace,
	});

	let Some(scenario) = cli.scenario else {
		Cli::command().print_help()?;
		return Ok(());
	};

	match scenario.as_str() {
		"all" => {
			for (title, run) in &SCENARIOS {
				present(title, run());
			}
		}
		_ => match scenario.parse::<usize>() {
			Ok(n) if (1..=SCENARIOS.len()).contains(&n) => {
				let (title, run) = &SCENARIOS[n - 1];
				present(title, run());
			}
			_ => bail!("unknown scenario: {scenario}"),
		},
	}

	Ok(())
}

fn present(title: &str, outcome: ScenarioOutcome) {
	let rule = "=".repeat(65);

	println!("\n{rule}");
	println!("  TEST: {title}");
	println!("{rule}");

	print!("{}", outcome.sched.render_timeline());

	for line in &outcome.summary {
		if line.contains('\n') {
			print!("{line}");
		} else {
			println!("  {line}");
		}
	}

	println!(
		"\n  Result: {} {title}\n",
		if outcome.passed { "PASS" } else { "FAIL" }
	);
}
