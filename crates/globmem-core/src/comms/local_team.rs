//! In-process team transport
//!
//! Runs every unit of a team as a thread of the current process. Collectives
//! rendezvous on a shared generation counter; registered segments live in a
//! concurrent map keyed by (unit, handle). An abort poisons the team so every
//! blocked or future collective fails the same way.

use std::fmt;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use crate::comms::transport::Transport;
use crate::core::config::TeamConfig;
use crate::memory::segment::Segment;
use crate::types::{SegmentHandle, TransportError, UnitId};
use crate::{log_trace, log_warn};

/// Failure to inject into the next matching operation of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The unit's next memory registration is refused
    Register {
        /// Affected unit
        unit: UnitId,
    },
    /// The unit's next all-to-all exchange fails and aborts the team
    Exchange {
        /// Affected unit
        unit: UnitId,
    },
}

/// State of the collective currently being assembled
struct Rendezvous {
    generation: u64,
    arrived: usize,
    slots: Vec<Vec<u8>>,
    published: Arc<Vec<Vec<u8>>>,
    aborted: Option<String>,
}

struct Fabric {
    size: usize,
    timeout: Duration,
    rendezvous: Mutex<Rendezvous>,
    wakeup: Condvar,
    segments: DashMap<(UnitId, SegmentHandle), Arc<Segment>>,
    next_handle: AtomicU64,
    faults: Mutex<Vec<Fault>>,
}

/// Shared state of an in-process team; hands out one `Endpoint` per unit
#[derive(Clone)]
pub struct LocalTeam {
    fabric: Arc<Fabric>,
}

/// One unit's view of a `LocalTeam`
#[derive(Clone)]
pub struct Endpoint {
    fabric: Arc<Fabric>,
    unit: UnitId,
}

impl LocalTeam {
    /// Create a team of `size` units whose collectives time out after `timeout`
    pub fn new(size: usize, timeout: Duration) -> Self {
        let fabric = Fabric {
            size,
            timeout,
            rendezvous: Mutex::new(Rendezvous {
                generation: 0,
                arrived: 0,
                slots: vec![Vec::new(); size],
                published: Arc::new(Vec::new()),
                aborted: None,
            }),
            wakeup: Condvar::new(),
            segments: DashMap::new(),
            next_handle: AtomicU64::new(1),
            faults: Mutex::new(Vec::new()),
        };
        Self { fabric: Arc::new(fabric) }
    }

    /// Create a team from configuration
    pub fn from_config(config: &TeamConfig) -> Self {
        Self::new(config.units, config.collective_timeout)
    }

    /// Number of units
    pub fn size(&self) -> usize {
        self.fabric.size
    }

    /// Endpoint of a single unit
    pub fn endpoint(&self, unit: UnitId) -> Result<Endpoint, TransportError> {
        if unit.index() >= self.fabric.size {
            return Err(TransportError::UnknownUnit(unit));
        }
        Ok(Endpoint { fabric: self.fabric.clone(), unit })
    }

    /// Endpoints of all units in unit order
    pub fn endpoints(&self) -> Vec<Endpoint> {
        (0..self.fabric.size)
            .map(|i| Endpoint { fabric: self.fabric.clone(), unit: UnitId::from_index(i) })
            .collect()
    }

    /// Arm a fault for the next matching operation
    pub fn inject_fault(&self, fault: Fault) {
        self.fabric.faults.lock().push(fault);
    }

    /// Number of segments currently registered across the team
    pub fn registered_segments(&self) -> usize {
        self.fabric.segments.len()
    }

    /// Number of segments currently registered by one unit
    pub fn registered_segments_of(&self, unit: UnitId) -> usize {
        self.fabric.segments.iter().filter(|e| e.key().0 == unit).count()
    }

    /// Reason the team was aborted, if it was
    pub fn abort_reason(&self) -> Option<String> {
        self.fabric.rendezvous.lock().aborted.clone()
    }
}

impl Fabric {
    fn rendezvous(&self, unit: UnitId, payload: Vec<u8>) -> Result<Arc<Vec<Vec<u8>>>, TransportError> {
        let mut state = self.rendezvous.lock();
        if let Some(reason) = &state.aborted {
            return Err(TransportError::Aborted(reason.clone()));
        }

        let generation = state.generation;
        state.slots[unit.index()] = payload;
        state.arrived += 1;

        if state.arrived == self.size {
            let slots = mem::replace(&mut state.slots, vec![Vec::new(); self.size]);
            state.published = Arc::new(slots);
            state.arrived = 0;
            state.generation += 1;
            log_trace!(generation, "collective complete");
            self.wakeup.notify_all();
            return Ok(state.published.clone());
        }

        // a timeout past the end of representable time never fires
        let deadline = Instant::now().checked_add(self.timeout);
        while state.generation == generation {
            if let Some(reason) = &state.aborted {
                return Err(TransportError::Aborted(reason.clone()));
            }
            let timed_out = match deadline {
                Some(deadline) => self.wakeup.wait_until(&mut state, deadline).timed_out(),
                None => {
                    self.wakeup.wait(&mut state);
                    false
                }
            };
            if timed_out && state.generation == generation {
                if let Some(reason) = &state.aborted {
                    return Err(TransportError::Aborted(reason.clone()));
                }
                let reason = format!("{} timed out waiting for a collective", unit);
                log_warn!(unit = unit.0, "{}", reason);
                state.aborted = Some(reason);
                self.wakeup.notify_all();
                return Err(TransportError::Timeout { millis: timeout_millis(self.timeout) });
            }
        }
        Ok(state.published.clone())
    }

    fn abort(&self, reason: &str) {
        let mut state = self.rendezvous.lock();
        if state.aborted.is_none() {
            state.aborted = Some(reason.to_string());
        }
        self.wakeup.notify_all();
    }

    fn take_fault(&self, fault: Fault) -> bool {
        let mut faults = self.faults.lock();
        match faults.iter().position(|f| *f == fault) {
            Some(pos) => {
                faults.remove(pos);
                true
            }
            None => false,
        }
    }

    fn segment(&self, unit: UnitId, handle: SegmentHandle) -> Result<Arc<Segment>, TransportError> {
        if unit.index() >= self.size {
            return Err(TransportError::UnknownUnit(unit));
        }
        self.segments
            .get(&(unit, handle))
            .map(|entry| entry.value().clone())
            .ok_or(TransportError::UnknownSegment { unit, handle })
    }
}

fn timeout_millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

impl Transport for Endpoint {
    fn my_id(&self) -> UnitId {
        self.unit
    }

    fn team_size(&self) -> usize {
        self.fabric.size
    }

    fn barrier(&self) -> Result<(), TransportError> {
        self.fabric.rendezvous(self.unit, Vec::new()).map(|_| ())
    }

    fn all_to_all(&self, payload: Vec<u8>) -> Result<Vec<Vec<u8>>, TransportError> {
        if self.fabric.take_fault(Fault::Exchange { unit: self.unit }) {
            let reason = format!("injected exchange fault at {}", self.unit);
            self.fabric.abort(&reason);
            return Err(TransportError::Aborted(reason));
        }
        let published = self.fabric.rendezvous(self.unit, payload)?;
        Ok(published.as_ref().clone())
    }

    fn register(&self, segment: Arc<Segment>) -> Result<SegmentHandle, TransportError> {
        if self.fabric.take_fault(Fault::Register { unit: self.unit }) {
            return Err(TransportError::Registration(format!("injected registration fault at {}", self.unit)));
        }
        let handle = SegmentHandle(self.fabric.next_handle.fetch_add(1, Ordering::Relaxed));
        log_trace!(unit = self.unit.0, handle = handle.0, bytes = segment.len(), "registered segment");
        self.fabric.segments.insert((self.unit, handle), segment);
        Ok(handle)
    }

    fn deregister(&self, handle: SegmentHandle) -> Result<(), TransportError> {
        self.fabric
            .segments
            .remove(&(self.unit, handle))
            .map(|_| ())
            .ok_or(TransportError::UnknownSegment { unit: self.unit, handle })
    }

    fn get(&self, unit: UnitId, handle: SegmentHandle, offset: usize, dst: &mut [u8]) -> Result<(), TransportError> {
        self.fabric.segment(unit, handle)?.read_at(offset, dst)
    }

    fn put(&self, unit: UnitId, handle: SegmentHandle, offset: usize, src: &[u8]) -> Result<(), TransportError> {
        self.fabric.segment(unit, handle)?.write_at(offset, src)
    }

    fn abort(&self, reason: &str) {
        log_warn!(unit = self.unit.0, reason, "aborting team");
        self.fabric.abort(reason);
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("unit", &self.unit)
            .field("team_size", &self.fabric.size)
            .finish()
    }
}

/// Run `f` once per unit of `team`, each on its own thread, and collect the
/// results in unit order. A panicking unit propagates its panic.
pub fn run_team<R, F>(team: &LocalTeam, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(Endpoint) -> R + Sync,
{
    let f = &f;
    std::thread::scope(|scope| {
        let handles: Vec<_> = team
            .endpoints()
            .into_iter()
            .map(|endpoint| scope.spawn(move || f(endpoint)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn team(size: usize) -> LocalTeam {
        LocalTeam::new(size, Duration::from_secs(10))
    }

    #[test]
    fn all_to_all_gathers_in_unit_order() {
        let team = team(4);
        let results = run_team(&team, |ep| {
            let payload = vec![ep.my_id().0 as u8; ep.my_id().index() + 1];
            ep.all_to_all(payload).unwrap()
        });
        for gathered in results {
            assert_eq!(gathered.len(), 4);
            for (i, p) in gathered.iter().enumerate() {
                assert_eq!(p, &vec![i as u8; i + 1]);
            }
        }
    }

    #[test]
    fn repeated_collectives_stay_in_step() {
        let team = team(3);
        let results = run_team(&team, |ep| {
            let mut sums = Vec::new();
            for round in 0..20u8 {
                ep.barrier().unwrap();
                let all = ep.all_to_all(vec![round, ep.my_id().0 as u8]).unwrap();
                assert!(all.iter().all(|p| p[0] == round));
                sums.push(all.iter().map(|p| p[1] as u32).sum::<u32>());
            }
            sums
        });
        assert!(results.iter().all(|s| s.iter().all(|&v| v == 3)));
    }

    #[test]
    fn one_sided_transfers_reach_registered_segments() {
        let team = team(2);
        let eps = team.endpoints();
        let handle = eps[1].register(Arc::new(Segment::zeroed(8))).unwrap();
        eps[0].put(UnitId(1), handle, 4, &[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 2];
        eps[0].get(UnitId(1), handle, 5, &mut out).unwrap();
        assert_eq!(out, [2, 3]);

        assert!(matches!(
            eps[0].get(UnitId(0), handle, 0, &mut out),
            Err(TransportError::UnknownSegment { .. })
        ));
        assert!(matches!(
            eps[0].get(UnitId(7), handle, 0, &mut out),
            Err(TransportError::UnknownUnit(UnitId(7)))
        ));

        eps[1].deregister(handle).unwrap();
        assert_eq!(team.registered_segments(), 0);
        assert!(eps[0].get(UnitId(1), handle, 0, &mut out).is_err());
    }

    #[test]
    fn abort_fails_every_participant() {
        let team = team(3);
        let results = run_team(&team, |ep| {
            if ep.my_id() == UnitId(2) {
                ep.abort("unit 2 gave up");
                return Err(TransportError::Aborted("local".into()));
            }
            ep.barrier()
        });
        assert!(results.iter().all(|r| r.is_err()));
        assert_eq!(team.abort_reason().as_deref(), Some("unit 2 gave up"));
    }

    #[test]
    fn missing_unit_times_out() {
        let team = LocalTeam::new(2, Duration::from_millis(50));
        let eps = team.endpoints();
        let err = eps[0].barrier().unwrap_err();
        assert!(matches!(err, TransportError::Timeout { millis: 50 }));
        assert!(matches!(eps[1].barrier(), Err(TransportError::Aborted(_))));
    }

    #[test]
    fn injected_faults_fire_once() {
        let team = team(1);
        let ep = team.endpoint(UnitId(0)).unwrap();
        team.inject_fault(Fault::Register { unit: UnitId(0) });
        assert!(matches!(
            ep.register(Arc::new(Segment::zeroed(1))),
            Err(TransportError::Registration(_))
        ));
        assert!(ep.register(Arc::new(Segment::zeroed(1))).is_ok());
        assert_eq!(team.registered_segments_of(UnitId(0)), 1);
    }

    #[test]
    fn timeout_millis_saturates() {
        assert_eq!(timeout_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(timeout_millis(Duration::MAX), u64::MAX);
    }
}
