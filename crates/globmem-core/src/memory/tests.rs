use super::*;
use std::time::Duration;
use crate::comms::local_team::{run_team, Endpoint, Fault, LocalTeam};
use crate::comms::transport::Transport;
use crate::core::config::{MemoryConfig, ShrinkPolicy};
use crate::types::{BucketId, Epoch, Error, SizeError, UnitId};

type Mem = GlobDynamicMem<u64, Endpoint>;

fn team(units: usize) -> LocalTeam {
    LocalTeam::new(units, Duration::from_secs(10))
}

fn relocating(initial: usize, ep: Endpoint) -> Mem {
    let config = MemoryConfig {
        initial_local_capacity: initial,
        shrink_policy: ShrinkPolicy::Relocate,
        ..MemoryConfig::default()
    };
    GlobDynamicMem::with_config(&config, ep).unwrap()
}

fn marker(unit: UnitId, offset: usize) -> u64 {
    unit.0 as u64 * 1000 + offset as u64
}

#[test]
fn construction_commits_initial_capacity() {
    let team = team(4);
    let results = run_team(&team, |ep| {
        let mem = Mem::new(10, ep).unwrap();
        (mem.epoch(), mem.size(), mem.local_size(), mem.lend() - mem.lbegin())
    });
    for (epoch, size, local, span) in results {
        assert_eq!(epoch, Epoch(1));
        assert_eq!(size, 40);
        assert_eq!(local, 10);
        assert_eq!(span, 10);
    }
    assert_eq!(team.registered_segments(), 4);
}

#[test]
fn three_units_grow_and_shrink_to_thirty_three() {
    let team = team(3);
    let results = run_team(&team, |ep| {
        let mut mem = relocating(10, ep);
        let me = mem.my_id();
        mem.fill_local(|i| marker(me, i)).unwrap();
        match me.0 {
            0 => mem.grow(5).unwrap(),
            1 => mem.shrink(2).unwrap(),
            _ => {}
        }
        let report = mem.commit().unwrap();
        assert_eq!(report.global_size, 33);
        assert_eq!(mem.size(), 33);

        let sizes: Vec<usize> = (0..3).map(|u| mem.local_size_of(UnitId(u)).unwrap()).collect();
        assert_eq!(sizes, vec![15, 8, 10]);
        assert_eq!(sizes.iter().sum::<usize>(), mem.size());

        // offset capacity - 1 of the shrunk unit is gone, the retained prefix is intact
        assert!(matches!(
            mem.at(UnitId(1), 9),
            Err(Error::OutOfRange { offset: 9, size: 8, .. })
        ));
        assert!(mem.at(UnitId(1), 8).is_err());
        let last = mem.at(UnitId(1), 7).unwrap();
        assert_eq!(mem.get_value(&last).unwrap(), marker(UnitId(1), 7));
        report.fingerprint
    });
    assert!(results.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn strict_policy_rejects_partial_shrink_of_committed_bucket() {
    let team = team(2);
    run_team(&team, |ep| {
        let mut mem = Mem::new(10, ep).unwrap();
        let err = mem.shrink(2).unwrap_err();
        assert!(matches!(err, Error::SizeMismatch(SizeError::PartialBucket { capacity: 10, requested: 2, .. })));
        assert!(err.is_local());
        assert!(matches!(
            mem.shrink(11),
            Err(Error::SizeMismatch(SizeError::ExceedsLocalSize { requested: 11, available: 10 }))
        ));
        assert_eq!(mem.local_size(), 10);

        // whole buckets can still go
        mem.grow(4).unwrap();
        mem.commit().unwrap();
        mem.shrink(4).unwrap();
        let report = mem.commit().unwrap();
        assert_eq!(report.global_size, 20);
    });
}

#[test]
fn grow_thirty_then_shrink_twenty_nine() {
    let team = team(4);
    let results = run_team(&team, |ep| {
        let mut mem = relocating(10, ep);
        let me = mem.my_id();

        if me == UnitId(0) {
            mem.grow(30).unwrap();
            assert_eq!(mem.local_size(), 40);
        }
        mem.commit().unwrap();
        assert_eq!(mem.size(), 70);
        assert_eq!(mem.local_size_of(UnitId(0)).unwrap(), 40);

        if me == UnitId(0) {
            mem.shrink(29).unwrap();
            assert_eq!(mem.local_size(), 11);
        }
        let report = mem.commit().unwrap();
        assert_eq!(mem.local_size_of(UnitId(0)).unwrap(), 11);
        assert_eq!(mem.size(), 41);
        (report.local_delta, mem.local_size())
    });
    assert_eq!(results[0], (-29, 11));
    assert!(results[1..].iter().all(|&r| r == (0, 10)));
}

#[test]
fn pending_changes_are_only_locally_visible() {
    let team = team(3);
    run_team(&team, |ep| {
        let mut mem = Mem::new(6, ep).unwrap();
        let me = mem.my_id();
        if me == UnitId(2) {
            mem.grow(4).unwrap();
            assert_eq!(mem.local_size(), 10);
            assert_eq!(mem.size(), 22);
            mem.local_set(9, 99).unwrap();
            assert_eq!(mem.local_get(9).unwrap(), 99);
        }
        mem.transport().barrier().unwrap();

        if me != UnitId(2) {
            assert_eq!(mem.local_size_of(UnitId(2)).unwrap(), 6);
            assert_eq!(mem.size(), 18);
            assert!(mem.at(UnitId(2), 6).is_err());
        }

        let report = mem.commit().unwrap();
        assert_eq!(report.global_size, 22);
        assert_eq!(mem.local_size_of(UnitId(2)).unwrap(), 10);
        let gref = mem.at(UnitId(2), 9).unwrap();
        assert_eq!(mem.get_value(&gref).unwrap(), 99);
    });
}

#[test]
fn remote_reads_and_writes_reach_every_unit() {
    let team = team(4);
    run_team(&team, |ep| {
        let mem = Mem::new(8, ep).unwrap();
        let me = mem.my_id();
        mem.fill_local(|i| marker(me, i)).unwrap();
        mem.transport().barrier().unwrap();

        for u in 0..4 {
            let unit = UnitId(u);
            for offset in 0..8 {
                let gref = mem.at(unit, offset).unwrap();
                assert_eq!(mem.deref(&gref).unwrap().is_local(), unit == me);
                assert_eq!(mem.get_value(&gref).unwrap(), marker(unit, offset));
            }
        }
        mem.transport().barrier().unwrap();

        // every unit writes its id into slot `me` of its right neighbour
        let right = UnitId((me.0 + 1) % 4);
        let gref = mem.at(right, me.index()).unwrap();
        mem.put_value(&gref, 7000 + me.0 as u64).unwrap();
        mem.transport().barrier().unwrap();

        let left = (me.0 + 3) % 4;
        assert_eq!(mem.local_get(left as usize).unwrap(), 7000 + left as u64);

        let mut copy = vec![0u64; 8];
        assert_eq!(mem.copy_from_unit(right, &mut copy).unwrap(), 8);
        assert_eq!(copy[me.index()], 7000 + me.0 as u64);
        mem.transport().barrier().unwrap();
        mem.release().unwrap();
    });
    assert_eq!(team.registered_segments(), 0);
}

#[test]
fn references_survive_commits_that_shift_offsets() {
    let team = team(3);
    run_team(&team, |ep| {
        let mut mem = Mem::new(5, ep).unwrap();
        let me = mem.my_id();
        mem.fill_local(|i| marker(me, i)).unwrap();
        mem.transport().barrier().unwrap();

        let gref = mem.at(UnitId(2), 3).unwrap();
        let before = Resolver::new(&mem.layout()).index_of(&gref).unwrap();
        assert_eq!(before, Some(13));

        if me == UnitId(0) {
            mem.grow(20).unwrap();
        }
        mem.commit().unwrap();

        assert_eq!(mem.get_value(&gref).unwrap(), marker(UnitId(2), 3));
        let after = Resolver::new(&mem.layout()).index_of(&gref).unwrap();
        assert_eq!(after, Some(33));
        assert_eq!(mem.at_index(33).unwrap(), gref);
    });
}

#[test]
fn detached_bucket_stays_readable_for_one_commit() {
    let team = team(3);
    run_team(&team, |ep| {
        let mut mem = Mem::new(4, ep).unwrap();
        let me = mem.my_id();
        if me == UnitId(1) {
            mem.grow(6).unwrap();
        }
        mem.commit().unwrap();
        if me == UnitId(1) {
            mem.local_set(7, 4242).unwrap();
        }
        mem.transport().barrier().unwrap();

        let gref = mem.at(UnitId(1), 7).unwrap();
        assert_eq!(gref.bucket(), BucketId(1));

        if me == UnitId(1) {
            mem.shrink(6).unwrap();
            assert_eq!(mem.local_size(), 4);
            assert_eq!(mem.get_value(&gref).unwrap(), 4242);
        }
        mem.commit().unwrap();

        // grace period: excluded from offsets, still resolvable
        assert_eq!(mem.local_size_of(UnitId(1)).unwrap(), 4);
        assert_eq!(mem.size(), 12);
        assert!(mem.at(UnitId(1), 7).is_err());
        assert_eq!(mem.get_value(&gref).unwrap(), 4242);
        mem.transport().barrier().unwrap();

        let report = mem.commit().unwrap();
        if me == UnitId(1) {
            assert_eq!(report.released, 1);
        }
        let err = mem.get_value(&gref).unwrap_err();
        assert!(matches!(err, Error::StaleReference { unit: UnitId(1), bucket: BucketId(1) }));
    });
    assert_eq!(team.registered_segments_of(UnitId(1)), 1);
}

#[test]
fn resize_targets_the_visible_global_size() {
    let team = team(2);
    let results = run_team(&team, |ep| {
        let mut mem = relocating(10, ep);
        if mem.my_id() == UnitId(0) {
            mem.resize(35).unwrap();
            assert_eq!(mem.local_size(), 25);
        } else {
            mem.resize(13).unwrap();
            assert_eq!(mem.local_size(), 3);
        }
        mem.commit().unwrap();
        mem.size()
    });
    assert_eq!(results, vec![28, 28]);
}

#[test]
fn traversal_matches_local_size() {
    let team = team(2);
    run_team(&team, |ep| {
        let mut mem = Mem::new(3, ep).unwrap();
        let me = mem.my_id();
        mem.grow(2).unwrap();
        mem.commit().unwrap();
        mem.fill_local(|i| marker(me, i)).unwrap();
        mem.transport().barrier().unwrap();

        for u in 0..2 {
            let unit = UnitId(u);
            let range = mem.unit_refs(unit).unwrap();
            let span = mem.lend_of(unit).unwrap() - mem.lbegin_of(unit).unwrap();
            assert_eq!(range.len() as isize, span);
            let values: Vec<u64> = range.map(|r| mem.get_value(&r).unwrap()).collect();
            assert_eq!(values, (0..5).map(|i| marker(unit, i)).collect::<Vec<_>>());
        }
        assert_eq!(mem.local_values().unwrap().len(), 5);
        assert!(matches!(mem.lbegin_of(UnitId(9)), Err(Error::InvalidArgument(_))));
    });
}

#[test]
fn exchange_failure_is_collective_and_leaves_tables_untouched() {
    let team = team(3);
    let results = run_team(&team, |ep| {
        let mut mem = Mem::new(0, ep).unwrap();
        mem.transport().barrier().unwrap();
        if mem.my_id() == UnitId(0) {
            team.inject_fault(Fault::Exchange { unit: UnitId(2) });
        }
        mem.transport().barrier().unwrap();

        mem.grow(3).unwrap();
        let err = mem.commit().unwrap_err();
        assert!(matches!(err, Error::CollectiveFailure { epoch: Epoch(2), .. }));
        (err.is_collective(), mem.local_size(), mem.epoch(), mem.size(), mem.buckets().len())
    });
    for result in results {
        assert_eq!(result, (true, 3, Epoch(1), 3, 1));
    }
    assert!(team.abort_reason().is_some());
    assert_eq!(team.registered_segments(), 0);
}

#[test]
fn remote_put_between_relocating_shrink_and_commit_survives() {
    let team = team(2);
    let results = run_team(&team, |ep| {
        let mut mem = relocating(10, ep);
        let me = mem.my_id();
        mem.fill_local(|i| marker(me, i)).unwrap();
        mem.transport().barrier().unwrap();

        if me == UnitId(1) {
            mem.shrink(2).unwrap();
        }
        mem.transport().barrier().unwrap();

        if me == UnitId(0) {
            let gref = mem.at(UnitId(1), 3).unwrap();
            mem.put_value(&gref, 777).unwrap();
        }
        mem.transport().barrier().unwrap();
        if me == UnitId(1) {
            assert_eq!(mem.local_get(3).unwrap(), 777);
            mem.local_set(4, 888).unwrap();
        }
        mem.transport().barrier().unwrap();
        if me == UnitId(0) {
            let gref = mem.at(UnitId(1), 4).unwrap();
            assert_eq!(mem.get_value(&gref).unwrap(), 888);
        }

        mem.commit().unwrap();
        assert_eq!(mem.local_size_of(UnitId(1)).unwrap(), 8);
        let values: Vec<u64> = (3..5)
            .map(|i| mem.get_value(&mem.at(UnitId(1), i).unwrap()).unwrap())
            .collect();
        values
    });
    assert_eq!(results, vec![vec![777, 888], vec![777, 888]]);
}

#[test]
fn pending_bucket_references_are_uncommitted_elsewhere() {
    let team = team(2);
    run_team(&team, |ep| {
        let mut mem = Mem::new(4, ep).unwrap();
        let me = mem.my_id();
        if me == UnitId(1) {
            mem.grow(2).unwrap();
            let gref = mem.at(me, 5).unwrap();
            assert_eq!(gref, GlobalRef::new(me, BucketId(1), 1));
            mem.put_value(&gref, 55).unwrap();
        }
        mem.transport().barrier().unwrap();

        let pending = GlobalRef::new(UnitId(1), BucketId(1), 1);
        if me == UnitId(0) {
            let err = mem.get_value(&pending).unwrap_err();
            assert!(matches!(err, Error::UncommittedReference { unit: UnitId(1), bucket: BucketId(1) }));
        }
        mem.commit().unwrap();
        assert_eq!(mem.get_value(&pending).unwrap(), 55);
    });
}

#[test]
fn local_visibility_sequence_across_three_commits() {
    let team = team(3);
    let results = run_team(&team, |ep| {
        let mut mem = relocating(10, ep);
        let me = mem.my_id();
        mem.transport().barrier().unwrap();

        match me.0 {
            0 => {
                mem.grow(3).unwrap();
                mem.shrink(2).unwrap();
                mem.grow(5).unwrap();
                mem.shrink(1).unwrap();
            }
            1 => {
                mem.shrink(2).unwrap();
                mem.grow(5).unwrap();
                mem.shrink(2).unwrap();
                mem.shrink(3).unwrap();
            }
            _ => {}
        }
        mem.transport().barrier().unwrap();

        let (visible, local) = match me.0 {
            0 => (35, 15),
            1 => (28, 8),
            _ => (30, 10),
        };
        assert_eq!(mem.size(), visible);
        assert_eq!(mem.local_size(), local);
        assert_eq!(mem.lend() - mem.lbegin(), local as isize);
        mem.fill_local(|i| 100 * (me.0 as u64 + 1) + i as u64).unwrap();
        mem.transport().barrier().unwrap();

        let mut sizes = vec![mem.commit().unwrap().global_size];
        assert_eq!(mem.size(), 33);
        for u in 0..3 {
            let unit = UnitId(u);
            let values: Vec<u64> = mem
                .unit_refs(unit)
                .unwrap()
                .map(|r| mem.get_value(&r).unwrap())
                .collect();
            let expected: Vec<u64> = (0..[15, 8, 10][u as usize]).map(|i| 100 * (u as u64 + 1) + i).collect();
            assert_eq!(values, expected);
        }

        if me.0 < 2 {
            mem.grow(30).unwrap();
        }
        sizes.push(mem.commit().unwrap().global_size);
        assert_eq!(mem.size(), 93);

        match me.0 {
            0 => mem.shrink(29).unwrap(),
            1 => mem.shrink(30).unwrap(),
            _ => {}
        }
        sizes.push(mem.commit().unwrap().global_size);
        assert_eq!(mem.size(), 34);
        let locals: Vec<usize> = (0..3).map(|u| mem.local_size_of(UnitId(u)).unwrap()).collect();
        assert_eq!(locals, vec![16, 8, 10]);
        assert_eq!(mem.get_value(&mem.at(UnitId(1), 7).unwrap()).unwrap(), 207);
        sizes
    });
    assert!(results.iter().all(|sizes| sizes == &vec![33, 93, 34]));
}

#[test]
fn mismatched_element_sizes_fail_the_commit() {
    let team = team(2);
    let results = run_team(&team, |ep| {
        if ep.my_id() == UnitId(0) {
            GlobDynamicMem::<u32, Endpoint>::new(2, ep).map(|_| ())
        } else {
            GlobDynamicMem::<u64, Endpoint>::new(2, ep).map(|_| ())
        }
    });
    assert!(results.iter().all(|r| matches!(r, Err(Error::CollectiveFailure { epoch: Epoch(1), .. }))));
}

#[test]
fn invalid_initial_capacity_fails_every_unit() {
    let team = team(2);
    let results = run_team(&team, |ep| {
        let config = MemoryConfig {
            initial_local_capacity: if ep.my_id() == UnitId(0) { 100 } else { 1 },
            max_local_capacity: Some(10),
            ..MemoryConfig::default()
        };
        GlobDynamicMem::<u8, Endpoint>::with_config(&config, ep).map(|_| ())
    });
    assert!(matches!(results[0], Err(Error::InvalidArgument(_))));
    assert!(matches!(results[1], Err(Error::CollectiveFailure { .. })));
}
