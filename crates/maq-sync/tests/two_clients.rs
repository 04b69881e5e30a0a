//! Two board clients sharing one remote document: a change made on one
//! propagates to the other without ever bouncing back as a second write.

use maq_core::{MachineCategory, MachineStatus};
use maq_sync::{MemoryRemote, SyncEngine};
use std::sync::Arc;

fn status(category: MachineCategory, reason: usize) -> MachineStatus {
    MachineStatus::new(category, Some(reason), None).expect("valid status")
}

#[test]
fn change_propagates_without_echo_writes() {
    let remote = Arc::new(MemoryRemote::new());

    let mut station = SyncEngine::new(remote.clone(), None);
    let mut office = SyncEngine::new(remote.clone(), None);
    let mut office_feed = office.subscribe();

    // The subscription's first delivery is the current (empty) document;
    // applying it clears the first-load gate without replacing anything.
    let initial = office_feed.try_recv().expect("initial snapshot");
    assert!(!office.apply_remote(&initial));
    // The station side has no feed in this test; burn its first-attempt
    // suppression the way its startup publish would.
    assert!(!station.publish());
    assert!(remote.writes().is_empty());

    let cuchillas = MachineCategory::Mechanical
        .reasons()
        .iter()
        .position(|label| *label == "Cuchillas")
        .expect("known reason");
    assert!(station.set_status("S2", status(MachineCategory::Mechanical, cuchillas)));
    assert_eq!(remote.writes().len(), 1);

    // The office client receives the replacement and applies it. The
    // publish attempt its own update cycle triggers is absorbed.
    let payload = office_feed.try_recv().expect("replacement delivered");
    assert!(office.apply_remote(&payload));
    assert!(!office.publish());
    assert_eq!(remote.writes().len(), 1);

    let seen = office.board().get("S2").expect("propagated status");
    assert_eq!(seen.category, MachineCategory::Mechanical);
    assert_eq!(seen.reason_index, Some(cuchillas));

    // A genuine local change on the receiving side still goes out.
    assert!(office.set_status("S5", status(MachineCategory::Barring, 0)));
    assert_eq!(remote.writes().len(), 2);
}

#[test]
fn late_joiner_sees_the_current_board() {
    let remote = Arc::new(MemoryRemote::new());

    let mut station = SyncEngine::new(remote.clone(), None);
    station.publish();
    station.set_status("S1", status(MachineCategory::Electronic, 3));

    let mut viewer = SyncEngine::new(remote.clone(), None);
    let mut feed = viewer.subscribe();
    let initial = feed.try_recv().expect("initial snapshot");
    assert!(viewer.apply_remote(&initial));

    let seen = viewer.board().get("S1").expect("current status");
    assert_eq!(seen.category, MachineCategory::Electronic);
}
