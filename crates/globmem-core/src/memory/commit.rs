//! Collective commit protocol
//!
//! Phases, in order:
//! 1. register every pending bucket so its handle can travel in the descriptor
//! 2. exchange table descriptors all-to-all; once every unit has arrived no
//!    unit still accesses the previous layout, so relocated elements are
//!    copied into their new buckets
//! 3. build the new layout from the descriptors
//! 4. barrier, after which nothing can fail
//! 5. release the buckets that retired at the previous commit, make pending
//!    buckets valid, and move buckets pending detach to the retiring list
//!
//! A failure in phases 1-4 aborts the team and leaves the local table as it
//! was before the call, apart from dropped registrations.

use std::mem;
use std::time::Instant;
use bytemuck::Pod;
use serde::{Deserialize, Serialize};
use crate::comms::protocol::{decode_exchange, encode_descriptor};
use crate::comms::transport::Transport;
use crate::memory::bucket::{Bucket, BucketState};
use crate::memory::bucket_table::LocalBucketTable;
use crate::memory::layout::GlobalLayout;
use crate::system::metrics;
use crate::types::{Epoch, Error, Result};
use crate::{log_debug, log_info, log_trace, log_warn};

/// Outcome of a completed commit on one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReport {
    /// Epoch the team advanced to
    pub epoch: Epoch,
    /// Change of this unit's local size since the previous commit
    pub local_delta: i64,
    /// This unit's committed local size
    pub local_size: usize,
    /// Committed global size
    pub global_size: usize,
    /// Buckets of this unit that became valid
    pub attached: usize,
    /// Buckets of this unit released after their grace period
    pub released: usize,
    /// Hex digest of the new layout
    pub fingerprint: String,
}

/// Run one commit for the calling unit.
///
/// `retiring` holds the buckets detached by the previous commit; on success
/// it is replaced by the buckets detached by this one.
pub(crate) fn commit<T: Pod, X: Transport>(
    table: &mut LocalBucketTable<T>,
    retiring: &mut Vec<Bucket<T>>,
    transport: &X,
    current: &GlobalLayout,
) -> Result<(GlobalLayout, CommitReport)> {
    let started = Instant::now();
    let epoch = current.epoch().next();
    let unit = transport.my_id();
    let local_delta = table.pending_delta();
    let attached = table
        .buckets()
        .iter()
        .filter(|b| b.state() == BucketState::PendingNew)
        .count();

    log_debug!(unit = unit.0, epoch = epoch.0, local_delta, "starting commit");

    let layout = match exchange(table, transport, epoch) {
        Ok(layout) => layout,
        Err(err) => {
            let reason = err.to_string();
            transport.abort(&reason);
            for handle in table.take_pending_handles() {
                if let Err(e) = transport.deregister(handle) {
                    log_warn!(unit = unit.0, handle = handle.0, error = %e, "failed to drop registration");
                }
            }
            metrics::record(|m| m.commit.failures.inc());
            log_warn!(unit = unit.0, epoch = epoch.0, reason = %reason, "commit aborted");
            return Err(Error::collective(epoch, reason));
        }
    };

    let mut released = 0;
    for bucket in mem::take(retiring) {
        if let Some(handle) = bucket.handle() {
            match transport.deregister(handle) {
                Ok(()) => {
                    released += 1;
                    log_trace!(unit = unit.0, bucket = bucket.id().0, "released bucket");
                }
                Err(e) => log_warn!(unit = unit.0, bucket = bucket.id().0, error = %e, "failed to release bucket"),
            }
        }
    }
    log_debug!(unit = unit.0, epoch = epoch.0, released, "released retired buckets");

    *retiring = table.finalize_commit();

    #[cfg(feature = "trace-buckets")]
    for bucket in table.buckets() {
        log_trace!(
            unit = unit.0,
            bucket = bucket.id().0,
            capacity = bucket.capacity(),
            state = ?bucket.state(),
            "bucket after commit"
        );
    }

    let report = CommitReport {
        epoch,
        local_delta,
        local_size: table.local_size(),
        global_size: layout.total(),
        attached,
        released,
        fingerprint: layout.fingerprint_hex(),
    };

    metrics::record(|m| {
        m.commit.commits.inc();
        m.commit.buckets_attached.inc_by(attached as u64);
        m.commit.buckets_released.inc_by(released as u64);
        m.commit.duration.observe(started.elapsed().as_secs_f64());
    });
    log_info!(
        unit = unit.0,
        epoch = epoch.0,
        local_size = report.local_size,
        global_size = report.global_size,
        fingerprint = %report.fingerprint,
        "commit complete"
    );
    Ok((layout, report))
}

/// Phases that may fail; nothing here changes bucket states
fn exchange<T: Pod, X: Transport>(
    table: &mut LocalBucketTable<T>,
    transport: &X,
    epoch: Epoch,
) -> Result<GlobalLayout> {
    let unit = transport.my_id();
    for bucket in table.unregistered_mut() {
        let handle = transport.register(bucket.segment().clone())?;
        log_trace!(unit = unit.0, bucket = bucket.id().0, handle = handle.0, "attached bucket");
        bucket.set_handle(Some(handle));
    }

    let payload = encode_descriptor(&table.descriptor(epoch))?;
    log_debug!(unit = unit.0, epoch = epoch.0, bytes = payload.len(), "exchanging descriptors");
    let payloads = transport.all_to_all(payload)?;
    table.copy_relocations()?;
    let descriptors = decode_exchange(&payloads)?;

    let layout = GlobalLayout::from_descriptors(epoch, transport.team_size(), &descriptors)?;
    log_debug!(unit = unit.0, epoch = epoch.0, total = layout.total(), "layout rebuilt");

    transport.barrier()?;
    Ok(layout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::comms::local_team::{run_team, Fault, LocalTeam};
    use crate::core::config::ShrinkPolicy;
    use crate::types::UnitId;

    #[test]
    fn single_unit_commit_attaches_and_retires() {
        let team = LocalTeam::new(1, Duration::from_secs(5));
        let ep = team.endpoint(UnitId(0)).unwrap();
        let mut table: LocalBucketTable<u32> = LocalBucketTable::new(UnitId(0), ShrinkPolicy::Strict);
        let mut retiring = Vec::new();
        let layout = GlobalLayout::empty(1, 4);

        table.grow(10).unwrap();
        let (layout, report) = commit(&mut table, &mut retiring, &ep, &layout).unwrap();
        assert_eq!((report.epoch, report.attached, report.local_delta), (Epoch(1), 1, 10));
        assert_eq!(team.registered_segments(), 1);

        table.grow(5).unwrap();
        let (layout, _) = commit(&mut table, &mut retiring, &ep, &layout).unwrap();
        table.shrink(5).unwrap();
        let (layout, report) = commit(&mut table, &mut retiring, &ep, &layout).unwrap();
        assert_eq!(report.local_size, 10);
        assert_eq!(retiring.len(), 1);
        assert_eq!(team.registered_segments(), 2);
        assert_eq!(layout.unit(UnitId(0)).unwrap().retiring().len(), 1);

        let (layout, report) = commit(&mut table, &mut retiring, &ep, &layout).unwrap();
        assert_eq!(report.released, 1);
        assert!(retiring.is_empty());
        assert_eq!(team.registered_segments(), 1);
        assert!(layout.unit(UnitId(0)).unwrap().retiring().is_empty());
    }

    #[test]
    fn registration_failure_aborts_every_unit() {
        let team = LocalTeam::new(3, Duration::from_secs(5));
        team.inject_fault(Fault::Register { unit: UnitId(1) });
        let results = run_team(&team, |ep| {
            let mut table: LocalBucketTable<u64> = LocalBucketTable::new(ep.my_id(), ShrinkPolicy::Strict);
            let mut retiring = Vec::new();
            table.grow(4).unwrap();
            let outcome = commit(&mut table, &mut retiring, &ep, &GlobalLayout::empty(3, 8));
            (outcome.map(|(_, report)| report), table.buckets()[0].state(), table.buckets()[0].handle())
        });
        for (outcome, state, handle) in results {
            match outcome {
                Err(Error::CollectiveFailure { epoch, .. }) => assert_eq!(epoch, Epoch(1)),
                other => panic!("unexpected {:?}", other),
            }
            assert_eq!(state, BucketState::PendingNew);
            assert_eq!(handle, None);
        }
        assert_eq!(team.registered_segments(), 0);
    }
}
