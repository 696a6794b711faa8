//! Integration tests for ledger atomicity and durability.

use std::sync::Arc;
use std::thread;
use tombola_economy::{
    FileStore, Ledger, LedgerConfig, LedgerError, MemoryStore, ParticipantId, RecordStore,
};

fn memory_ledger() -> Arc<Ledger> {
    let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
    Arc::new(Ledger::new(store, LedgerConfig::default()).unwrap())
}

#[test]
fn test_concurrent_credits_are_not_lost() {
    let ledger = memory_ledger();
    let player = ParticipantId(7);
    ledger.credit(player, 1_000).unwrap();

    let threads = 16;
    let per_thread = 250;
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                for _ in 0..per_thread {
                    ledger.credit(player, 1).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(ledger.balance(player).unwrap(), 1_000 + threads * per_thread);
}

#[test]
fn test_concurrent_debits_never_overdraw() {
    let ledger = memory_ledger();
    let player = ParticipantId(8);
    ledger.credit(player, 100).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                let mut ok = 0u64;
                for _ in 0..50 {
                    match ledger.debit(player, 1) {
                        Ok(_) => ok += 1,
                        Err(LedgerError::InsufficientFunds { .. }) => {}
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
                ok
            })
        })
        .collect();
    let succeeded: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(succeeded, 100);
    assert_eq!(ledger.balance(player).unwrap(), 0);
}

#[test]
fn test_participants_are_independent() {
    let ledger = memory_ledger();
    let handles: Vec<_> = (0..8u64)
        .map(|id| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                for _ in 0..100 {
                    ledger.credit(ParticipantId(id), id + 1).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for id in 0..8u64 {
        assert_eq!(ledger.balance(ParticipantId(id)).unwrap(), 100 * (id + 1));
    }
}

#[test]
fn test_file_ledger_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let player = ParticipantId(99);

    {
        let store: Arc<dyn RecordStore> = Arc::new(FileStore::open(dir.path()).unwrap());
        let ledger = Ledger::new(store, LedgerConfig::default()).unwrap();
        ledger.credit(player, 40).unwrap();
        ledger.grant_items(player, &[5, 5]).unwrap();
        ledger.grant_pool_pack(player, 2, 3).unwrap();
        ledger.set_loadout(player, &[5]).unwrap();
    }

    let store: Arc<dyn RecordStore> = Arc::new(FileStore::open(dir.path()).unwrap());
    let ledger = Ledger::new(store, LedgerConfig::default()).unwrap();
    let record = ledger.snapshot(player).unwrap();

    assert_eq!(record.balance(), 40);
    assert_eq!(record.item_count(5), 2);
    assert_eq!(record.pack_count(2), 3);
    assert_eq!(record.loadout(), &[5]);
}
