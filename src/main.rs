//! globmem command line
//!
//! Runs the reference scenarios on an in-process team and prints a JSON
//! report to stdout.

use anyhow::Context;
use clap::{Arg, ArgAction, Command};
use globmem::core::config::{parse_shrink_policy, Config};
use globmem::scenarios::{self, Scenario};
use tracing::{info, warn};

fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();

    let mut config = globmem::load_run_config(matches.get_one::<String>("config").map(String::as_str))
        .context("loading configuration")?;
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }

    match matches.subcommand() {
        Some(("run", sub)) => {
            apply_run_overrides(&mut config, sub)?;
            config.validate().context("validating configuration")?;
            globmem::init_logging(&config.logging)?;
            run(&config, sub)
        }
        _ => anyhow::bail!("no subcommand given"),
    }
}

fn cli() -> Command {
    Command::new("globmem")
        .version(globmem::VERSION)
        .about("Dynamically resizable distributed shared memory with collective commit.")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .global(true)
                .help("Configuration file path")
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .global(true)
                .help("Log level (trace, debug, info, warn, error)")
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("run")
                .about("Run reference scenarios on an in-process team")
                .arg(
                    Arg::new("units")
                        .short('n')
                        .long("units")
                        .value_name("N")
                        .help("Number of units in the team")
                )
                .arg(
                    Arg::new("initial-capacity")
                        .long("initial-capacity")
                        .value_name("C")
                        .default_value("10")
                        .help("Elements allocated by every unit at construction; \
                               overrides [memory] initial_local_capacity")
                )
                .arg(
                    Arg::new("scenario")
                        .short('s')
                        .long("scenario")
                        .value_name("NAME")
                        .default_value("all")
                        .value_parser(["realloc", "visibility", "remote-access", "all"])
                        .help("Scenario to run")
                )
                .arg(
                    Arg::new("shrink-policy")
                        .long("shrink-policy")
                        .value_name("POLICY")
                        .default_value("relocate")
                        .value_parser(["strict", "relocate"])
                        .help("Handling of shrinks ending inside a committed bucket; \
                               the realloc and visibility scenarios need relocate, \
                               so this overrides [memory] shrink_policy")
                )
                .arg(
                    Arg::new("metrics")
                        .long("metrics")
                        .action(ArgAction::SetTrue)
                        .help("Print Prometheus metrics to stderr after the run")
                )
        )
}

/// Apply `run` arguments on top of the loaded configuration
fn apply_run_overrides(config: &mut Config, matches: &clap::ArgMatches) -> anyhow::Result<()> {
    if let Some(units) = matches.get_one::<String>("units") {
        config.team.units = units.parse().with_context(|| format!("invalid unit count: {}", units))?;
    }

    if let Some(capacity) = matches.get_one::<String>("initial-capacity") {
        config.memory.initial_local_capacity = capacity
            .parse()
            .with_context(|| format!("invalid initial capacity: {}", capacity))?;
    }

    if let Some(policy) = matches.get_one::<String>("shrink-policy") {
        config.memory.shrink_policy = parse_shrink_policy(policy)?;
    }

    if matches.get_flag("metrics") {
        config.metrics.enabled = true;
    }

    Ok(())
}

fn run(config: &Config, matches: &clap::ArgMatches) -> anyhow::Result<()> {
    let selection = matches
        .get_one::<String>("scenario")
        .map(String::as_str)
        .unwrap_or("all");
    let selected = Scenario::parse_selection(selection)?;

    info!(
        units = config.team.units,
        initial_local_capacity = config.memory.initial_local_capacity,
        shrink_policy = ?config.memory.shrink_policy,
        "starting run"
    );
    let report = scenarios::run(config, &selected);
    println!("{}", serde_json::to_string_pretty(&report)?);

    if config.metrics.enabled {
        eprintln!("{}", globmem::system::gather_text());
    }

    if !report.passed() {
        warn!("one or more scenarios failed");
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use globmem::ShrinkPolicy;

    fn run_config(args: &[&str]) -> Config {
        let matches = cli().try_get_matches_from(args).unwrap();
        let (_, sub) = matches.subcommand().unwrap();
        let mut config = Config::default();
        apply_run_overrides(&mut config, sub).unwrap();
        config
    }

    #[test]
    fn run_defaults_to_relocating_shrinks() {
        let config = run_config(&["globmem", "run"]);
        assert_eq!(config.memory.shrink_policy, ShrinkPolicy::Relocate);
        assert_eq!(config.memory.initial_local_capacity, 10);

        let report = scenarios::run(&config, &Scenario::ALL);
        assert!(report.passed(), "{:?}", report.scenarios);
    }

    #[test]
    fn explicit_strict_policy_is_kept() {
        let config = run_config(&["globmem", "run", "--shrink-policy", "strict", "-n", "2"]);
        assert_eq!(config.memory.shrink_policy, ShrinkPolicy::Strict);
        assert_eq!(config.team.units, 2);
    }
}
