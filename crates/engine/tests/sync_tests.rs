//! Sync round tests against a recording backend

mod common;

use common::*;
use gitstore_core::Error;
use gitstore_engine::OpenOptions;
use std::collections::BTreeMap;
use std::fs;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const TICK: Duration = Duration::from_millis(20);
const SETTLE: Duration = Duration::from_millis(200);
const PATIENCE: Duration = Duration::from_secs(5);

fn with_remote(mut config: gitstore_engine::Config) -> gitstore_engine::Config {
    config.online_remote = Some("git@example.com:team/store.git".to_string());
    config.sync_interval_secs = 3600;
    config
}

#[test]
fn test_sync_without_remote_fails() {
    let store = open_store();
    assert!(matches!(store.conn.sync(), Err(Error::NoOnlineRemote)));
    assert_eq!(store.backend.pulls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_sync_on_low_battery_fails() {
    let store = open_store_with(
        with_remote,
        |o: OpenOptions| o.power_monitor(Arc::new(Battery(5.0))),
        |b| b,
    );
    assert!(matches!(store.conn.sync(), Err(Error::LowBattery)));
    assert_eq!(store.backend.pulls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_sync_pulls_then_pushes() {
    let store = open_store_with(
        with_remote,
        |o: OpenOptions| o.power_monitor(Arc::new(Battery(80.0))),
        |b| b,
    );
    let mut msg = Message::new("a@x.com");
    store.conn.insert(&mut msg).unwrap();

    store.conn.sync().unwrap();
    assert_eq!(store.backend.pulls.load(Ordering::SeqCst), 1);
    assert_eq!(store.backend.pushes.load(Ordering::SeqCst), 1);

    // Caches were rebuilt from the working tree
    let loaded: Message = store.conn.get(&msg.meta.id).unwrap();
    assert_eq!(loaded, msg);
    assert!(store.internal_file("index/Message/From.json").exists());
}

#[test]
fn test_failed_pull_reports_sync_failure() {
    let store = open_store_with(with_remote, |o| o, |b| b);
    store.backend.fail_pull.store(true, Ordering::SeqCst);

    match store.conn.sync() {
        Err(Error::SyncFailed(msg)) => assert!(msg.starts_with("pull:")),
        other => panic!("expected SyncFailed, got {other:?}"),
    }
    assert_eq!(store.backend.pushes.load(Ordering::SeqCst), 0);

    // The store stays writable after a failed round
    store.backend.fail_pull.store(false, Ordering::SeqCst);
    store.conn.insert(&mut Message::new("a@x.com")).unwrap();
    store.conn.sync().unwrap();
}

#[test]
fn test_insert_during_sync_is_staged_then_applied() {
    let gate = Arc::new(PullGate::default());
    let store = open_store_with(with_remote, |o| o, {
        let gate = Arc::clone(&gate);
        move |b: RecordingBackend| b.with_pull_gate(gate)
    });

    let syncing = {
        let conn = Arc::clone(&store.conn);
        thread::spawn(move || conn.sync())
    };
    gate.wait_entered();

    let mut msg = Message::new("late@x.com");
    store.conn.insert(&mut msg).unwrap();
    assert_eq!(msg.meta.id, "Message/b0/0");
    assert!(store.internal_file("queue/Message.json").exists());
    assert!(!store.data_file("Message/b0.json").exists());

    let staged: Message = store.conn.get(&msg.meta.id).unwrap();
    assert_eq!(staged.from, "late@x.com");

    gate.release();
    syncing.join().unwrap().unwrap();

    assert!(!store.internal_file("queue/Message.json").exists());
    let block = fs::read_to_string(store.data_file("Message/b0.json")).unwrap();
    assert!(block.contains("late@x.com"));
    let applied: Message = store.conn.get(&msg.meta.id).unwrap();
    assert_eq!(applied, msg);
}

#[test]
fn test_staged_records_count_towards_rollover() {
    let gate = Arc::new(PullGate::default());
    let store = open_store_with(with_remote, |o| o, {
        let gate = Arc::clone(&gate);
        move |b: RecordingBackend| b.with_pull_gate(gate)
    });
    let mut first = OnePerBlock::new(0);
    store.conn.insert(&mut first).unwrap();
    assert_eq!(first.meta.id, "OnePerBlock/b0/0");

    let syncing = {
        let conn = Arc::clone(&store.conn);
        thread::spawn(move || conn.sync())
    };
    gate.wait_entered();

    let mut second = OnePerBlock::new(1);
    let mut third = OnePerBlock::new(2);
    store.conn.insert(&mut second).unwrap();
    store.conn.insert(&mut third).unwrap();
    assert_eq!(second.meta.id, "OnePerBlock/b1/1");
    assert_eq!(third.meta.id, "OnePerBlock/b2/2");

    gate.release();
    syncing.join().unwrap().unwrap();

    for (name, key) in [("b0", "0"), ("b1", "1"), ("b2", "2")] {
        let content = fs::read_to_string(store.data_file(&format!("OnePerBlock/{name}.json"))).unwrap();
        let block: BTreeMap<String, String> = serde_json::from_str(&content).unwrap();
        assert_eq!(block.keys().collect::<Vec<_>>(), vec![key], "{name}");
    }
    assert_eq!(store.conn.fetch::<OnePerBlock>().unwrap().len(), 3);
}

#[test]
fn test_close_waits_for_running_sync() {
    let gate = Arc::new(PullGate::default());
    let store = open_store_with(with_remote, |o| o, {
        let gate = Arc::clone(&gate);
        move |b: RecordingBackend| b.with_pull_gate(gate)
    });

    let syncing = {
        let conn = Arc::clone(&store.conn);
        thread::spawn(move || conn.sync())
    };
    gate.wait_entered();

    let mut msg = Message::new("late@x.com");
    store.conn.insert(&mut msg).unwrap();
    assert!(store.internal_file("queue/Message.json").exists());

    let closing = {
        let conn = Arc::clone(&store.conn);
        thread::spawn(move || conn.close())
    };
    thread::sleep(SETTLE);
    // Nothing is applied while the round is pulling
    assert!(!store.data_file("Message/b0.json").exists());
    assert!(store.internal_file("queue/Message.json").exists());

    gate.release();
    syncing.join().unwrap().unwrap();
    closing.join().unwrap().unwrap();

    assert!(!store.internal_file("queue/Message.json").exists());
    let block = fs::read_to_string(store.data_file("Message/b0.json")).unwrap();
    assert!(block.contains("late@x.com"));
}

// ============================================================================
// Sync clock
// ============================================================================

fn ticking(o: OpenOptions) -> OpenOptions {
    o.sync_interval(TICK)
}

#[test]
fn test_clock_pulls_and_pushes() {
    let store = open_store_with(with_remote, ticking, |b| b);
    let backend = &store.backend;
    assert!(wait_until(PATIENCE, || {
        backend.pushes.load(Ordering::SeqCst) >= 1
    }));
    assert!(backend.pulls.load(Ordering::SeqCst) >= 1);
    let rounds: Vec<String> = backend
        .events()
        .into_iter()
        .filter(|e| !e.starts_with("commit:"))
        .take(2)
        .collect();
    assert_eq!(rounds, vec!["pull", "push"]);
    store.conn.close().unwrap();
}

#[test]
fn test_clock_skips_on_low_battery() {
    let store = open_store_with(
        with_remote,
        |o: OpenOptions| ticking(o).power_monitor(Arc::new(Battery(5.0))),
        |b| b,
    );
    thread::sleep(SETTLE);
    assert_eq!(store.backend.pulls.load(Ordering::SeqCst), 0);
    assert_eq!(store.backend.pushes.load(Ordering::SeqCst), 0);
    store.conn.close().unwrap();
}

#[test]
fn test_clock_keeps_running_after_failed_pull() {
    let store = open_store_with(with_remote, ticking, |b| b);
    store.backend.fail_pull.store(true, Ordering::SeqCst);
    let backend = &store.backend;
    assert!(wait_until(PATIENCE, || {
        backend.pulls.load(Ordering::SeqCst) >= 2
    }));
    assert_eq!(backend.pushes.load(Ordering::SeqCst), 0);

    let mut msg = Message::new("a@x.com");
    store.conn.insert(&mut msg).unwrap();
    let loaded: Message = store.conn.get(&msg.meta.id).unwrap();
    assert_eq!(loaded, msg);
    store.conn.close().unwrap();
}

#[test]
fn test_clock_waits_for_running_transaction() {
    let store = open_store_with(with_remote, ticking, |b| b);
    let backend = &store.backend;
    assert!(wait_until(PATIENCE, || {
        backend.pushes.load(Ordering::SeqCst) >= 1
    }));

    let (entered_tx, entered_rx) = std::sync::mpsc::channel();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let running = {
        let conn = Arc::clone(&store.conn);
        thread::spawn(move || {
            let mut msg = Message::new("held@x.com");
            let mut txn = conn.start_transaction("Held").unwrap();
            txn.add_operation(|| {
                conn.insert(&mut msg)?;
                entered_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                Ok(())
            });
            txn.commit()
        })
    };
    entered_rx.recv().unwrap();
    let pulls = backend.pulls.load(Ordering::SeqCst);
    thread::sleep(SETTLE);
    assert_eq!(backend.pulls.load(Ordering::SeqCst), pulls);

    release_tx.send(()).unwrap();
    running.join().unwrap().unwrap();
    assert!(wait_until(PATIENCE, || {
        backend.pulls.load(Ordering::SeqCst) > pulls
    }));
    store.conn.close().unwrap();
}

#[test]
fn test_clock_applies_records_staged_during_tick() {
    let gate = Arc::new(PullGate::default());
    let store = open_store_with(with_remote, ticking, {
        let gate = Arc::clone(&gate);
        move |b: RecordingBackend| b.with_pull_gate(gate)
    });
    gate.wait_entered();

    let mut msg = Message::new("tick@x.com");
    store.conn.insert(&mut msg).unwrap();
    assert!(store.internal_file("queue/Message.json").exists());

    gate.release();
    let queue = store.internal_file("queue/Message.json");
    assert!(wait_until(PATIENCE, || !queue.exists()));
    let block = fs::read_to_string(store.data_file("Message/b0.json")).unwrap();
    assert!(block.contains("tick@x.com"));
    store.conn.close().unwrap();
}

#[test]
fn test_close_stops_clock() {
    let store = open_store_with(with_remote, ticking, |b| b);
    let backend = &store.backend;
    assert!(wait_until(PATIENCE, || {
        backend.pulls.load(Ordering::SeqCst) >= 1
    }));
    store.conn.close().unwrap();

    let pulls = backend.pulls.load(Ordering::SeqCst);
    thread::sleep(SETTLE);
    assert_eq!(backend.pulls.load(Ordering::SeqCst), pulls);
}
