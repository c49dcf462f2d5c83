//! Store behavior under concurrency and on-disk damage.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Barrier;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use proptest::prelude::*;
use tcadana_cache::store::LAYOUT_DIR;
use tcadana_cache::{CacheConfig, CacheError, CacheKey, CacheStore, Digest, EntryKind, PutOutcome};

fn open(dir: &tempfile::TempDir) -> CacheStore {
    CacheStore::open(CacheConfig::new(dir.path())).unwrap()
}

fn entry_file(dir: &tempfile::TempDir, key: &CacheKey) -> PathBuf {
    dir.path().join(LAYOUT_DIR).join(key.relative_path())
}

#[test]
fn concurrent_writers_one_key_store_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    let key = CacheKey::new(Digest::of(b"shared"), EntryKind::Curves, "p").unwrap();
    let barrier = Barrier::new(8);

    let outcomes: Vec<PutOutcome> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let (store, key, barrier) = (&store, &key, &barrier);
                s.spawn(move || {
                    barrier.wait();
                    store.put(key, &vec![i; 1024]).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let stored = outcomes.iter().filter(|o| **o == PutOutcome::Stored).count();
    assert_eq!(stored, 1);
    let value = store.get(&key).unwrap();
    assert_eq!(value.len(), 1024);
    assert!(value.iter().all(|b| *b == value[0]));
}

#[test]
fn stores_sharing_a_directory_compute_once() {
    let dir = tempfile::tempdir().unwrap();
    let stores = [open(&dir), open(&dir)];
    let key = CacheKey::new(Digest::of(b"shared"), EntryKind::Metric, "m").unwrap();
    let computed = AtomicUsize::new(0);
    let barrier = Barrier::new(8);

    let values: Vec<Vec<u8>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8usize)
            .map(|i| {
                let (store, key, barrier, computed) = (&stores[i % 2], &key, &barrier, &computed);
                s.spawn(move || {
                    barrier.wait();
                    let (value, _) = store
                        .get_or_insert_with::<CacheError, _>(key, || {
                            computed.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(20));
                            Ok(vec![i as u8; 64])
                        })
                        .unwrap();
                    value
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(computed.load(Ordering::SeqCst), 1);
    assert!(values.iter().all(|v| *v == values[0]));
}

#[test]
fn concurrent_writers_distinct_keys() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);

    std::thread::scope(|s| {
        for i in 0..16u32 {
            let store = &store;
            s.spawn(move || {
                let key = CacheKey::new(Digest::of(&i.to_le_bytes()), EntryKind::Metric, "m").unwrap();
                assert_eq!(store.put(&key, &i.to_le_bytes()).unwrap(), PutOutcome::Stored);
            });
        }
    });

    assert_eq!(store.stats().entries, 16);
    for i in 0..16u32 {
        let key = CacheKey::new(Digest::of(&i.to_le_bytes()), EntryKind::Metric, "m").unwrap();
        assert_eq!(store.get(&key), Some(i.to_le_bytes().to_vec()));
    }
}

#[test]
fn contended_key_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(
        CacheConfig::new(dir.path()).with_lock_timeout(Duration::from_millis(20)),
    )
    .unwrap();
    let key = CacheKey::new(Digest::of(b"slow"), EntryKind::Fields, "p").unwrap();
    let started = Barrier::new(2);

    std::thread::scope(|s| {
        let (store, key, started) = (&store, &key, &started);
        let holder = s.spawn(move || {
            store
                .get_or_insert_with::<CacheError, _>(key, || {
                    started.wait();
                    std::thread::sleep(Duration::from_millis(200));
                    Ok(b"slow".to_vec())
                })
                .unwrap()
        });

        started.wait();
        let err = store.put(key, b"fast").unwrap_err();
        assert!(matches!(err, CacheError::Contention { .. }));
        assert!(err.is_retryable());
        assert_eq!(holder.join().unwrap().0, b"slow".to_vec());
    });

    assert_eq!(store.get(&key), Some(b"slow".to_vec()));
    assert_eq!(store.stats().contention, 1);
}

#[test]
fn truncated_entry_is_absent_then_rewritable() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    let key = CacheKey::new(Digest::of(b"run"), EntryKind::Fields, "p").unwrap();
    let payload: Vec<u8> = (0..10_000u32).flat_map(|i| i.to_le_bytes()).collect();
    store.put(&key, &payload).unwrap();

    let path = entry_file(&dir, &key);
    let len = fs::metadata(&path).unwrap().len();
    OpenOptions::new().write(true).open(&path).unwrap().set_len(len / 2).unwrap();

    assert_eq!(store.get(&key), None);
    assert!(!path.exists());
    assert_eq!(store.stats().corrupt, 1);
    assert_eq!(store.put(&key, &payload).unwrap(), PutOutcome::Stored);
    assert_eq!(store.get(&key), Some(payload));
}

#[test]
fn flipped_bit_is_absent() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    let key = CacheKey::new(Digest::of(b"run"), EntryKind::Metric, "leakage").unwrap();
    store.put(&key, b"-1.25e-9 A").unwrap();

    let path = entry_file(&dir, &key);
    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x40;
    fs::write(&path, &bytes).unwrap();

    assert_eq!(store.get(&key), None);
    assert_eq!(store.stats().corrupt, 1);
}

#[test]
fn stale_partial_files_removed_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let key = CacheKey::new(Digest::of(b"run"), EntryKind::Curves, "p").unwrap();
    let partial = entry_file(&dir, &key).with_extension("tce.99.0.partial");
    fs::create_dir_all(partial.parent().unwrap()).unwrap();
    fs::File::create(&partial).unwrap().write_all(b"TCAC").unwrap();

    let store = open(&dir);
    assert!(!partial.exists());
    assert_eq!(store.stats().entries, 0);
    assert_eq!(store.get(&key), None);
}

#[test]
fn byte_bound_keeps_newest() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(CacheConfig::new(dir.path()).with_max_bytes(Some(1))).unwrap();
    let a = CacheKey::new(Digest::of(b"a"), EntryKind::Curves, "p").unwrap();
    let b = CacheKey::new(Digest::of(b"b"), EntryKind::Curves, "p").unwrap();

    store.put(&a, b"first").unwrap();
    store.put(&b, b"second").unwrap();
    assert_eq!(store.get(&a), None);
    assert_eq!(store.get(&b), Some(b"second".to_vec()));
    assert_eq!(store.stats().entries, 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn stored_payload_reads_back(payload in proptest::collection::vec(any::<u8>(), 0..4096), tag in "[a-z0-9_]{1,12}") {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir);
        let key = CacheKey::new(Digest::of(&payload), EntryKind::Curves, tag).unwrap();
        prop_assert_eq!(store.put(&key, &payload).unwrap(), PutOutcome::Stored);
        prop_assert_eq!(store.get(&key), Some(payload));
    }
}
