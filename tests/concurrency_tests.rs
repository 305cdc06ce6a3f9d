//! Concurrency tests for the batch accumulator.
//!
//! Admits run on plain OS threads while uploads run on the Tokio runtime, so
//! buffer locking is exercised under real contention.
//! Run with: cargo test --test concurrency_tests

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use event_receiver::accumulator::BatchAccumulator;
use event_receiver::config::BatchConfig;
use event_receiver::contracts::{Batch, Event, StorageError, Uploader};
use event_receiver::metrics::IngestMetrics;

#[derive(Default)]
struct RecordingUploader {
    batches: Mutex<Vec<Batch>>,
}

impl Uploader for RecordingUploader {
    async fn store(&self, batch: &Batch) -> Result<String, StorageError> {
        // Yield so uploads overlap with admits.
        tokio::task::yield_now().await;
        self.batches.lock().unwrap().push(batch.clone());
        Ok(format!("{}/{}.json", batch.tier, batch.sequence))
    }
}

fn create_accumulator(max_batch_size_bytes: usize) -> Arc<BatchAccumulator<RecordingUploader>> {
    let config = BatchConfig {
        max_batch_size_bytes,
        ..BatchConfig::default()
    };
    Arc::new(BatchAccumulator::new(
        Arc::new(RecordingUploader::default()),
        &config,
        Arc::new(IngestMetrics::new()),
    ))
}

/// Uploaded batches for a tier in creation order.
fn batches_for(acc: &BatchAccumulator<RecordingUploader>, tier: &str) -> Vec<Batch> {
    let mut batches: Vec<Batch> = acc
        .uploader()
        .batches
        .lock()
        .unwrap()
        .iter()
        .filter(|b| b.tier == tier)
        .cloned()
        .collect();
    batches.sort_by_key(|b| b.sequence);
    batches
}

// =============================================================================
// Parallel Admit Tests
// =============================================================================

/// Test that parallel admits to one tier lose no events and keep per-thread order.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_admits_same_tier_lose_nothing() {
    let acc = create_accumulator(2_000);
    let num_threads = 8;
    let admits_per_thread = 250;

    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            let acc = Arc::clone(&acc);
            thread::spawn(move || {
                for i in 0..admits_per_thread {
                    acc.admit(Event::new(Utc::now(), format!("{}:{}", t, i)), "premium")
                        .expect("admit should succeed");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    acc.drain().await;

    let batches = batches_for(&acc, "premium");
    let sequences: Vec<u64> = batches.iter().map(|b| b.sequence).collect();
    let expected: Vec<u64> = (0..batches.len() as u64).collect();
    assert_eq!(sequences, expected, "batch sequences must be gap-free");

    // Every thread's events appear exactly once and in the order it admitted them.
    let mut next_expected: HashMap<usize, usize> = HashMap::new();
    let mut total = 0;
    for event in batches.iter().flat_map(|b| b.events.iter()) {
        let (t, i) = event.body.split_once(':').unwrap();
        let (t, i): (usize, usize) = (t.parse().unwrap(), i.parse().unwrap());
        let next = next_expected.entry(t).or_insert(0);
        assert_eq!(i, *next, "thread {} events out of order", t);
        *next += 1;
        total += 1;
    }
    assert_eq!(total, num_threads * admits_per_thread);
    assert_eq!(acc.pending_events(), 0);
}

/// Test that tiers admitted from different threads never mix.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_admits_different_tiers_are_isolated() {
    let acc = create_accumulator(500);
    let tiers = ["premium", "standard", "basic", "trial"];

    let handles: Vec<_> = tiers
        .iter()
        .map(|tier| {
            let acc = Arc::clone(&acc);
            let tier = tier.to_string();
            thread::spawn(move || {
                for i in 0..200 {
                    acc.admit(Event::new(Utc::now(), format!("{}-{}", tier, i)), &tier)
                        .expect("admit should succeed");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    acc.drain().await;

    for tier in tiers {
        let batches = batches_for(&acc, tier);
        let bodies: Vec<String> = batches
            .iter()
            .flat_map(|b| b.events.iter().map(|e| e.body.clone()))
            .collect();
        let expected: Vec<String> = (0..200).map(|i| format!("{}-{}", tier, i)).collect();
        assert_eq!(bodies, expected, "tier {} lost, mixed or reordered events", tier);
    }
}

// =============================================================================
// Admit vs Flush Races
// =============================================================================

/// Test that a flush loop racing with admits neither duplicates nor drops events.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn flush_all_racing_admits_preserves_every_event() {
    let acc = create_accumulator(usize::MAX);
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let flusher = {
        let acc = Arc::clone(&acc);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while !stop.load(std::sync::atomic::Ordering::SeqCst) {
                acc.flush_all();
                thread::sleep(Duration::from_micros(200));
            }
        })
    };

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let acc = Arc::clone(&acc);
            thread::spawn(move || {
                let tier = if t % 2 == 0 { "premium" } else { "standard" };
                for i in 0..500 {
                    acc.admit(Event::new(Utc::now(), format!("{}:{}", t, i)), tier)
                        .unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }
    stop.store(true, std::sync::atomic::Ordering::SeqCst);
    flusher.join().unwrap();

    acc.drain().await;

    let mut seen = HashSet::new();
    for tier in ["premium", "standard"] {
        for batch in batches_for(&acc, tier) {
            assert!(!batch.is_empty(), "empty batches must never be uploaded");
            for event in batch.events {
                assert!(seen.insert(event.body.clone()), "duplicate {}", event.body);
            }
        }
    }
    assert_eq!(seen.len(), 2_000);
}

/// Test that the first admits for a brand new tier from many threads share one buffer.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_admit_creates_one_buffer() {
    let acc = create_accumulator(usize::MAX);
    let barrier = Arc::new(std::sync::Barrier::new(16));

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let acc = Arc::clone(&acc);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                acc.admit(Event::new(Utc::now(), format!("e{}", i)), "fresh")
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = acc.snapshot();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].tier, "fresh");
    assert_eq!(stats[0].events, 16);

    let result = acc.drain().await;
    assert_eq!(result.batches_dispatched, 1);
    assert_eq!(result.events_flushed, 16);
}
