//! Reference scenarios run on an in-process team
//!
//! Each scenario spawns a fresh team, runs the same body on every unit and
//! folds the per-unit outcomes into a `ScenarioReport`. A unit that fails a
//! check aborts the team so its peers do not wait out the collective timeout.

use std::fmt;
use std::str::FromStr;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use globmem_core::comms::{run_team, Endpoint, LocalTeam, Transport};
use globmem_core::core::config::{Config, MemoryConfig};
use globmem_core::{CommitReport, GlobDynamicMem, UnitId};

type Mem = GlobDynamicMem<u64, Endpoint>;

/// Scenario names accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// Unit 0 grows by 30, commits, shrinks by 29, commits
    Realloc,
    /// Units 0 and 1 change their sizes by +5 and -2 in several steps, which
    /// stay local until commit; then both attach 30 elements and detach them again
    Visibility,
    /// Every unit reads and writes every other unit's partition
    RemoteAccess,
}

impl Scenario {
    /// Every scenario in execution order
    pub const ALL: [Scenario; 3] = [Scenario::Realloc, Scenario::Visibility, Scenario::RemoteAccess];

    /// Command line name
    pub fn name(self) -> &'static str {
        match self {
            Scenario::Realloc => "realloc",
            Scenario::Visibility => "visibility",
            Scenario::RemoteAccess => "remote-access",
        }
    }

    /// Parse a command line selection; `all` expands to every scenario
    pub fn parse_selection(s: &str) -> Result<Vec<Scenario>, ScenarioError> {
        if s == "all" {
            return Ok(Self::ALL.to_vec());
        }
        Ok(vec![s.parse()?])
    }
}

impl FromStr for Scenario {
    type Err = ScenarioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|scenario| scenario.name() == s)
            .ok_or_else(|| ScenarioError::Unknown(s.to_string()))
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ways a scenario can fail on one unit
#[derive(Error, Debug)]
pub enum ScenarioError {
    /// Operation on the global memory failed
    #[error(transparent)]
    Memory(#[from] globmem_core::Error),

    /// A collective outside of commit failed
    #[error("transport: {0}")]
    Transport(#[from] globmem_core::types::TransportError),

    /// An observed value differs from the expected one
    #[error("check failed: {0}")]
    Check(String),

    /// The team or memory settings cannot run this scenario
    #[error("precondition not met: {0}")]
    Precondition(String),

    /// Unknown scenario name
    #[error("unknown scenario: {0}")]
    Unknown(String),
}

/// What one unit saw at the end of a scenario
#[derive(Debug, Clone, Serialize)]
pub struct UnitOutcome {
    /// Reporting unit
    pub unit: UnitId,
    /// Final epoch
    pub epoch: u64,
    /// Final local size
    pub local_size: usize,
    /// Final global size
    pub global_size: usize,
    /// Layout fingerprint after the final commit
    pub fingerprint: String,
}

/// Result of one scenario across the whole team
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    /// Scenario that ran
    pub scenario: Scenario,
    /// Team size
    pub units: usize,
    /// All units succeeded and agree on the final layout
    pub passed: bool,
    /// Per-unit outcomes of the units that succeeded
    pub outcomes: Vec<UnitOutcome>,
    /// Failures, prefixed with the reporting unit
    pub failures: Vec<String>,
}

/// Result of a whole run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Binary name
    pub name: &'static str,
    /// Binary version
    pub version: &'static str,
    /// Initial local capacity used by every scenario
    pub initial_local_capacity: usize,
    /// Shrink policy used by every scenario
    pub shrink_policy: globmem_core::ShrinkPolicy,
    /// One report per scenario
    pub scenarios: Vec<ScenarioReport>,
}

impl RunReport {
    /// Whether every scenario passed
    pub fn passed(&self) -> bool {
        self.scenarios.iter().all(|s| s.passed)
    }
}

/// Run `scenarios` one after the other, each on a fresh team
pub fn run(config: &Config, scenarios: &[Scenario]) -> RunReport {
    let scenarios = scenarios
        .iter()
        .map(|&scenario| run_scenario(config, scenario))
        .collect();
    RunReport {
        name: crate::NAME,
        version: crate::VERSION,
        initial_local_capacity: config.memory.initial_local_capacity,
        shrink_policy: config.memory.shrink_policy,
        scenarios,
    }
}

/// Run a single scenario on a fresh in-process team
pub fn run_scenario(config: &Config, scenario: Scenario) -> ScenarioReport {
    let team = LocalTeam::from_config(&config.team);
    info!(scenario = scenario.name(), units = team.size(), "running scenario");

    let results = run_team(&team, |ep| {
        let unit = ep.my_id();
        let control = ep.clone();
        let result = match scenario {
            Scenario::Realloc => realloc(ep, &config.memory),
            Scenario::Visibility => visibility(ep, &config.memory),
            Scenario::RemoteAccess => remote_access(ep, &config.memory),
        };
        if let Err(e) = &result {
            control.abort(&format!("{} failed: {}", unit, e));
        }
        (unit, result)
    });

    let mut outcomes = Vec::new();
    let mut failures = Vec::new();
    for (unit, result) in results {
        match result {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => failures.push(format!("{}: {}", unit, e)),
        }
    }
    if outcomes.windows(2).any(|w| w[0].fingerprint != w[1].fingerprint) {
        failures.push("layout fingerprints diverge".to_string());
    }

    let passed = failures.is_empty();
    if passed {
        info!(scenario = scenario.name(), "scenario passed");
    } else {
        warn!(scenario = scenario.name(), failures = failures.len(), "scenario failed");
    }
    ScenarioReport { scenario, units: team.size(), passed, outcomes, failures }
}

fn check(condition: bool, detail: impl FnOnce() -> String) -> Result<(), ScenarioError> {
    if condition {
        Ok(())
    } else {
        Err(ScenarioError::Check(detail()))
    }
}

fn check_eq<V: PartialEq + fmt::Debug>(what: &str, actual: V, expected: V) -> Result<(), ScenarioError> {
    check(actual == expected, || format!("{}: expected {:?}, got {:?}", what, expected, actual))
}

fn marker(unit: UnitId, offset: usize) -> u64 {
    unit.0 as u64 * 1_000_000 + offset as u64
}

fn outcome(mem: &Mem, report: &CommitReport) -> UnitOutcome {
    UnitOutcome {
        unit: mem.my_id(),
        epoch: report.epoch.0,
        local_size: mem.local_size(),
        global_size: mem.size(),
        fingerprint: report.fingerprint.clone(),
    }
}

fn realloc(ep: Endpoint, memory: &MemoryConfig) -> Result<UnitOutcome, ScenarioError> {
    let initial = memory.initial_local_capacity;
    let mut mem = Mem::with_config(memory, ep)?;
    let team = mem.team_size();
    let me = mem.my_id();
    check_eq("initial global size", mem.size(), team * initial)?;

    if me == UnitId(0) {
        mem.grow(30)?;
        check_eq("local size after grow", mem.local_size(), initial + 30)?;
    }
    mem.commit()?;
    check_eq("unit 0 size after first commit", mem.local_size_of(UnitId(0))?, initial + 30)?;
    check_eq("global size after first commit", mem.size(), team * initial + 30)?;

    if me == UnitId(0) {
        mem.shrink(29)?;
        check_eq("local size after shrink", mem.local_size(), initial + 1)?;
    }
    let report = mem.commit()?;
    check_eq("unit 0 size after second commit", mem.local_size_of(UnitId(0))?, initial + 1)?;
    check_eq("global size after second commit", mem.size(), team * initial + 1)?;
    Ok(outcome(&mem, &report))
}

fn visibility(ep: Endpoint, memory: &MemoryConfig) -> Result<UnitOutcome, ScenarioError> {
    let initial = memory.initial_local_capacity;
    if ep.team_size() < 2 || initial < 3 {
        return Err(ScenarioError::Precondition(
            "needs at least two units and an initial capacity of three".to_string(),
        ));
    }
    let mut mem = Mem::with_config(memory, ep)?;
    let team = mem.team_size();
    let me = mem.my_id();
    let expected = |unit: UnitId| match unit.0 {
        0 => initial + 5,
        1 => initial - 2,
        _ => initial,
    };

    mem.fill_local(|offset| marker(me, offset))?;
    match me.0 {
        0 => {
            mem.grow(3)?;
            mem.shrink(2)?;
            mem.grow(5)?;
            mem.shrink(1)?;
        }
        1 => {
            mem.shrink(2)?;
            mem.grow(5)?;
            mem.shrink(2)?;
            mem.shrink(3)?;
        }
        _ => {}
    }
    check_eq("own pending local size", mem.local_size(), expected(me))?;
    check_eq("own pending global size", mem.size(), team * initial - initial + expected(me))?;
    mem.transport().barrier()?;

    for u in (0..team).map(UnitId::from_index).filter(|&u| u != me) {
        check_eq("peer size before commit", mem.local_size_of(u)?, initial)?;
    }

    mem.commit()?;
    for u in (0..team).map(UnitId::from_index) {
        check_eq("committed local size", mem.local_size_of(u)?, expected(u))?;
    }
    check_eq("global size", mem.size(), team * initial + 3)?;

    check(mem.at(UnitId(1), initial - 1).is_err(), || {
        format!("offset {} of unit 1 still addressable after shrink", initial - 1)
    })?;
    let kept = mem.at(UnitId(1), initial - 3)?;
    check_eq("retained element of unit 1", mem.get_value(&kept)?, marker(UnitId(1), initial - 3))?;

    if me.0 < 2 {
        mem.grow(30)?;
    }
    mem.commit()?;
    check_eq("global size after balanced attach", mem.size(), team * initial + 63)?;

    match me.0 {
        0 => mem.shrink(29)?,
        1 => mem.shrink(30)?,
        _ => {}
    }
    let report = mem.commit()?;
    check_eq("global size after unbalanced detach", mem.size(), team * initial + 4)?;
    check_eq("unit 0 size after detach", mem.local_size_of(UnitId(0))?, initial + 6)?;
    Ok(outcome(&mem, &report))
}

fn remote_access(ep: Endpoint, memory: &MemoryConfig) -> Result<UnitOutcome, ScenarioError> {
    let initial = memory.initial_local_capacity;
    let mut mem = Mem::with_config(memory, ep)?;
    let team = mem.team_size();
    let me = mem.my_id();

    mem.fill_local(|offset| marker(me, offset))?;
    mem.transport().barrier()?;
    for u in (0..team).map(UnitId::from_index) {
        for offset in 0..initial {
            let gref = mem.at(u, offset)?;
            check_eq("remote value", mem.get_value(&gref)?, marker(u, offset))?;
        }
    }
    mem.transport().barrier()?;

    if me == UnitId(0) {
        mem.grow(10)?;
        mem.fill_local(|offset| marker(me, offset))?;
    }
    let report = mem.commit()?;

    for u in (0..team).map(UnitId::from_index) {
        for (offset, gref) in mem.unit_refs(u)?.enumerate() {
            check_eq("value after commit", mem.get_value(&gref)?, marker(u, offset))?;
        }
    }
    mem.transport().barrier()?;

    // each unit bumps the first element of its right neighbour
    let right = UnitId::from_index((me.index() + 1) % team);
    if mem.local_size_of(right)? > 0 {
        let gref = mem.at(right, 0)?;
        mem.put_value(&gref, marker(me, 0) + 7)?;
    }
    mem.transport().barrier()?;
    let left = UnitId::from_index((me.index() + team - 1) % team);
    if mem.local_size() > 0 {
        check_eq("value written by left neighbour", mem.local_get(0)?, marker(left, 0) + 7)?;
    }

    let outcome = outcome(&mem, &report);
    mem.release()?;
    Ok(outcome)
}
