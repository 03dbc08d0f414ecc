//! Line IPC lifecycle tests: create, open, lock, stop, destroy

use planta_common::consts::NUM_STATIONS;
use planta_common::product::ProductId;
use planta_shared_memory::platform::{current_pid, segment_path};
use planta_shared_memory::{
    CompletionState, IpcError, IpcNames, IpcResult, LineIpc, NamedSemaphore, SlotState,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

fn test_names(tag: &str) -> IpcNames {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let id = COUNTER.fetch_add(1, Ordering::Relaxed);
    IpcNames::new(&format!("plt_{}_{id}_{tag}", current_pid())).unwrap()
}

#[test]
fn test_create_sets_initial_counts() -> IpcResult<()> {
    let names = test_names("counts");
    let line = LineIpc::create(&names)?;

    for i in 0..NUM_STATIONS {
        assert_eq!(line.stage(i)?.value()?, 0);
        assert_eq!(line.ack(i)?.value()?, 0);
        assert_eq!(line.state().slot_state(i), SlotState::Empty);
        assert_eq!(line.state().completion(i), CompletionState::Idle);
        assert!(line.state().product_in(i).is_none());
    }
    assert_eq!(line.state().next_product_id(), 1);
    assert!(line.stage(NUM_STATIONS).is_err());

    LineIpc::destroy(&names);
    Ok(())
}

#[test]
fn test_open_sees_creator_state() -> IpcResult<()> {
    let names = test_names("open");
    let creator = LineIpc::create(&names)?;
    let other = LineIpc::open(&names)?;

    {
        let guard = creator.lock()?;
        let id = creator.state().allocate_product_id(&guard).unwrap();
        creator.state().hold(0, id, &guard);
    }
    assert_eq!(other.state().product_in(0), ProductId::new(1));
    assert_eq!(other.state().next_product_id(), 2);

    other.stage(3)?.post()?;
    assert_eq!(creator.stage(3)?.value()?, 1);

    LineIpc::destroy(&names);
    Ok(())
}

#[test]
fn test_open_missing_line_fails() {
    let names = test_names("missing");
    assert!(matches!(
        LineIpc::open(&names),
        Err(IpcError::NotFound { .. })
    ));
}

#[test]
fn test_destroy_is_idempotent() -> IpcResult<()> {
    let names = test_names("destroy");
    // Never created: silent.
    LineIpc::destroy(&names);

    let line = LineIpc::create(&names)?;
    drop(line);
    LineIpc::destroy(&names);
    LineIpc::destroy(&names);

    assert!(!segment_path(&names.segment()).exists());
    assert!(matches!(
        NamedSemaphore::open(&names.transition()),
        Err(IpcError::NotFound { .. })
    ));
    Ok(())
}

#[test]
fn test_create_replaces_previous_session() -> IpcResult<()> {
    let names = test_names("recreate");
    let first = LineIpc::create(&names)?;
    first.stage(0)?.post()?;
    first.state().set_running(true);
    drop(first);

    let second = LineIpc::create(&names)?;
    assert_eq!(second.stage(0)?.value()?, 0);
    assert!(!second.state().is_running());

    LineIpc::destroy(&names);
    Ok(())
}

#[test]
fn test_lock_excludes_other_holders() -> IpcResult<()> {
    let names = test_names("lock");
    let line = LineIpc::create(&names)?;

    let guard = line.lock()?;
    assert!(matches!(
        line.lock_timeout(Duration::from_millis(20)),
        Err(IpcError::Timeout { .. })
    ));
    drop(guard);
    assert!(line.lock_timeout(Duration::from_millis(20)).is_ok());

    LineIpc::destroy(&names);
    Ok(())
}

#[test]
fn test_lock_serializes_id_allocation_across_threads() -> IpcResult<()> {
    let names = test_names("alloc");
    let line = Arc::new(LineIpc::create(&names)?);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let line = Arc::clone(&line);
            std::thread::spawn(move || -> IpcResult<Vec<u32>> {
                let mut ids = Vec::new();
                for _ in 0..50 {
                    let guard = line.lock()?;
                    ids.push(line.state().allocate_product_id(&guard).unwrap().get());
                }
                Ok(ids)
            })
        })
        .collect();

    let mut all: Vec<u32> = Vec::new();
    for handle in handles {
        all.extend(handle.join().unwrap()?);
    }
    all.sort_unstable();
    let expected: Vec<u32> = (1..=200).collect();
    assert_eq!(all, expected);
    assert_eq!(line.state().next_product_id(), 201);

    LineIpc::destroy(&names);
    Ok(())
}

#[test]
fn test_request_stop_wakes_every_wait_point() -> IpcResult<()> {
    let names = test_names("stop");
    let line = LineIpc::create(&names)?;
    line.state().set_running(true);

    line.request_stop()?;

    assert!(!line.state().is_running());
    for i in 0..NUM_STATIONS {
        assert_eq!(line.stage(i)?.value()?, 1);
        assert_eq!(line.ack(i)?.value()?, 1);
    }

    LineIpc::destroy(&names);
    Ok(())
}

#[test]
fn test_completion_handshake() -> IpcResult<()> {
    let names = test_names("handshake");
    let line = LineIpc::create(&names)?;
    let state = line.state();

    assert!(!state.claim(2));
    state.mark_ready(2);
    assert!(state.claim(2));
    assert!(!state.claim(2));
    assert_eq!(state.completion(2), CompletionState::Claimed);
    assert!(state.release(2));
    assert!(!state.release(2));
    assert_eq!(state.completion(2), CompletionState::Idle);

    LineIpc::destroy(&names);
    Ok(())
}

#[test]
fn test_feed_parking_has_one_winner() -> IpcResult<()> {
    let names = test_names("park");
    let line = LineIpc::create(&names)?;
    let state = line.state();

    assert!(!state.unpark_feed());
    state.park_feed();
    assert!(state.is_feed_parked());
    assert!(state.unpark_feed());
    assert!(!state.unpark_feed());

    LineIpc::destroy(&names);
    Ok(())
}

#[test]
fn test_slot_transitions_and_counters() -> IpcResult<()> {
    let names = test_names("slots");
    let line = LineIpc::create(&names)?;
    let state = line.state();
    let guard = line.lock()?;

    state.seed_next_product_id(10, &guard);
    state.seed_next_product_id(4, &guard);
    assert_eq!(state.next_product_id(), 10);

    let id = state.allocate_product_id(&guard).unwrap();
    assert_eq!(id.get(), 10);
    state.hold(1, id, &guard);
    assert_eq!(state.slot_state(1), SlotState::Holding);
    state.hand_off(1, &guard);
    assert_eq!(state.slot_state(1), SlotState::AwaitingPickup);
    assert_eq!(state.product_in(1), Some(id));
    state.clear_slot(1, &guard);
    assert_eq!(state.slot_state(1), SlotState::Empty);
    assert_eq!(state.product_in(1), None);

    state.seed_completed_count(3, &guard);
    assert_eq!(state.record_completion(&guard), 4);
    drop(guard);

    let stats = state.stats();
    assert_eq!(stats.completed, 4);
    assert_eq!(stats.created(), 10);
    assert_eq!(stats.in_progress(), 0);

    LineIpc::destroy(&names);
    Ok(())
}

#[test]
fn test_id_allocation_stops_at_the_ceiling() -> IpcResult<()> {
    let names = test_names("ceiling");
    let line = LineIpc::create(&names)?;
    let state = line.state();
    let guard = line.lock()?;

    state.seed_next_product_id(u32::MAX - 1, &guard);
    assert_eq!(
        state.allocate_product_id(&guard).map(ProductId::get),
        Some(u32::MAX - 1)
    );
    assert_eq!(state.allocate_product_id(&guard), None);
    assert_eq!(state.allocate_product_id(&guard), None);
    assert_eq!(state.next_product_id(), u32::MAX);
    drop(guard);

    LineIpc::destroy(&names);
    Ok(())
}
