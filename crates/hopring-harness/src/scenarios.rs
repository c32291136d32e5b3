//! Reference scenarios.
//!
//! | Scenario | Setup | Expectation |
//! |----------|-------|-------------|
//! | `nop` | SQ 8, CQs 128/128 | one nop round trip on CQ1 |
//! | `A` | echo in slot 0 | one completion on CQ0, `counters[0] == 1` |
//! | `B` | ping-pong in slots 0 and 1 | two completions, `counters[0..2] == [1, 1]` |
//! | `C` | echo in slot 0 | 130 nops into CQ0: 128 queued, overflow 2 |

use std::fmt;
use std::time::{Duration, Instant};

use hopring::prelude::*;
use hopring::programs::{echo, ping_pong, reference_library};

const WAIT: Option<Duration> = Some(Duration::from_secs(5));
const PING_PONG_HOPS: u64 = 2;
const OVERFLOW_BURST: u64 = 130;

/// Why a scenario failed.
#[derive(Debug)]
pub enum ScenarioError {
    /// Ring creation, registration or activation failed.
    Setup(RingError),
    /// A ring operation failed mid-scenario.
    Ring(RingError),
    /// The scenario ran but observed the wrong outcome.
    Expectation(String),
}

impl fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup(e) => write!(f, "setup: {e}"),
            Self::Ring(e) => write!(f, "ring operation: {e}"),
            Self::Expectation(msg) => write!(f, "expectation not met: {msg}"),
        }
    }
}

impl std::error::Error for ScenarioError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Setup(e) | Self::Ring(e) => Some(e),
            Self::Expectation(_) => None,
        }
    }
}

impl From<RingError> for ScenarioError {
    fn from(e: RingError) -> Self {
        Self::Ring(e)
    }
}

/// A named scenario.
pub struct Scenario {
    pub name: &'static str,
    pub run: fn() -> Result<(), ScenarioError>,
}

/// Every scenario, in run order.
pub fn all() -> [Scenario; 4] {
    [
        Scenario {
            name: "nop",
            run: nop_round_trip,
        },
        Scenario {
            name: "A",
            run: scenario_a,
        },
        Scenario {
            name: "B",
            run: scenario_b,
        },
        Scenario {
            name: "C",
            run: scenario_c,
        },
    ]
}

fn expect(ok: bool, msg: impl FnOnce() -> String) -> Result<(), ScenarioError> {
    if ok {
        Ok(())
    } else {
        Err(ScenarioError::Expectation(msg()))
    }
}

fn setup(names: &[&str]) -> Result<RingSet, ScenarioError> {
    let build = || -> Result<RingSet, RingError> {
        let mut rings = RingSet::with_config(RingConfig::with_queues(8, &[128, 128]));
        rings.create_rings()?;
        let library = reference_library(PING_PONG_HOPS)?;
        rings.register_programs(&library, names)?;
        rings.activate()?;
        Ok(rings)
    };
    build().map_err(ScenarioError::Setup)
}

fn print_cqe(cqe: &CompletionEntry) {
    println!(
        "CQE user_data {}, res {} flags {}",
        cqe.user_data,
        cqe.result,
        cqe.flags.bits()
    );
}

fn print_counters(rings: &RingSet) -> Result<Vec<u64>, ScenarioError> {
    let counters = rings.counters()?;
    let shown: Vec<String> = counters.iter().take(10).map(u64::to_string).collect();
    println!("counters: {}", shown.join(" "));
    Ok(counters)
}

fn nop_round_trip() -> Result<(), ScenarioError> {
    let mut rings = setup(&[echo::NAME])?;
    rings.submit_entry(SubmissionEntry::nop(UserData(0xCAFE)).with_target(CqIndex(1)))?;
    let cqe = rings.wait_completion(CqIndex(1), WAIT)?;
    print_cqe(&cqe);
    expect(cqe.user_data == UserData(0xCAFE) && cqe.result == 0, || {
        format!("unexpected nop completion {cqe:?}")
    })?;
    rings.destroy()?;
    Ok(())
}

fn scenario_a() -> Result<(), ScenarioError> {
    let mut rings = setup(&[echo::NAME])?;
    rings.submit_entry(SubmissionEntry::program(ProgramSlot(0), UserData(0)))?;
    let cqe = rings.wait_completion(CqIndex::PRIMARY, WAIT)?;
    print_cqe(&cqe);
    let counters = print_counters(&rings)?;
    expect(cqe.result >= 0, || format!("program failed with {}", cqe.result))?;
    expect(counters[0] == 1, || format!("counters[0] is {}", counters[0]))?;
    rings.destroy()?;
    Ok(())
}

fn scenario_b() -> Result<(), ScenarioError> {
    let mut rings = setup(&[ping_pong::NAME, ping_pong::NAME])?;
    *rings.allocate_entry()? = SubmissionEntry::program(ProgramSlot(0), UserData(0))
        .with_target(CqIndex(0))
        .armed();
    *rings.allocate_entry()? = SubmissionEntry::program(ProgramSlot(1), UserData(1))
        .with_target(CqIndex(1))
        .armed();
    *rings.allocate_entry()? = SubmissionEntry::nop(UserData(0)).with_target(CqIndex(1));
    rings.submit(3)?;

    let first = rings.wait_completion(CqIndex(1), WAIT)?;
    print_cqe(&first);
    let second = rings.wait_completion(CqIndex(0), WAIT)?;
    print_cqe(&second);
    expect(
        first.user_data == UserData(0) && second.user_data == UserData(1),
        || {
            format!(
                "hop tokens are {} and {}, expected 0 and 1",
                first.user_data, second.user_data
            )
        },
    )?;

    // Nothing else may surface once the chain has stopped.
    for cq in [CqIndex(0), CqIndex(1)] {
        match rings.wait_completion(cq, Some(Duration::from_millis(50))) {
            Err(RingError::Timeout) => {}
            Ok(extra) => {
                print_cqe(&extra);
                return Err(ScenarioError::Expectation(format!(
                    "unexpected extra completion on queue {cq}"
                )));
            }
            Err(e) => return Err(e.into()),
        }
    }

    let counters = print_counters(&rings)?;
    expect(counters[0] == 1 && counters[1] == 1, || {
        format!("counters[0..2] are {:?}", &counters[..2])
    })?;
    rings.destroy()?;
    Ok(())
}

fn scenario_c() -> Result<(), ScenarioError> {
    let mut rings = setup(&[echo::NAME])?;
    let mut sent = 0;
    while sent < OVERFLOW_BURST {
        if rings.sq_space()? == 0 {
            std::thread::yield_now();
            continue;
        }
        rings.submit_entry(SubmissionEntry::nop(UserData(sent)))?;
        sent += 1;
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let m = rings.metrics();
        if m.completions_posted + m.cq_overflows == OVERFLOW_BURST {
            break;
        }
        if Instant::now() > deadline {
            return Err(ScenarioError::Expectation(format!(
                "engine stalled after {} completions",
                m.completions_posted + m.cq_overflows
            )));
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    let queue = rings.queue(CqIndex::PRIMARY)?;
    let (queued, overflow) = (queue.len(), queue.overflow());
    println!("queued {queued} overflow {overflow}");
    expect(queued == 128 && overflow == 2, || {
        format!("expected 128 queued and overflow 2, got {queued} and {overflow}")
    })?;

    let drained = rings.drain(CqIndex::PRIMARY)?;
    for cqe in &drained {
        print_cqe(cqe);
    }
    let in_order = drained
        .iter()
        .enumerate()
        .all(|(i, c)| c.user_data == UserData(i as u64));
    expect(drained.len() == 128 && in_order, || {
        "drain did not return the first 128 completions in post order".to_string()
    })?;
    rings.destroy()?;
    Ok(())
}
