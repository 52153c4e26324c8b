//! Property-based tests using proptest.
//!
//! These verify the generator's universal guarantees: convergence from an
//! arbitrary starting mirror, idempotence of regeneration, and monotone
//! progress across interruptions.

use crate::generators::{account_hash, slot_key, slot_key_wide, slot_value};
use crate::harness::*;
use proptest::prelude::*;
use statedb_snapshot::{Generator, GeneratorConfig, Marker};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Account seed -> slot map; an empty slot map makes a plain account.
type StateShape = BTreeMap<u8, BTreeMap<u8, u8>>;

fn arb_state() -> impl Strategy<Value = StateShape> {
    prop::collection::btree_map(
        1u8..=250,
        prop::collection::btree_map(any::<u8>(), any::<u8>(), 0..10),
        1..8,
    )
}

/// Junk rows to pre-seed the mirror with: account rows and storage rows
/// with arbitrary owners and values.
fn arb_junk() -> impl Strategy<Value = (Vec<(u8, u8)>, Vec<(u8, u8, u8)>)> {
    (
        prop::collection::vec((any::<u8>(), any::<u8>()), 0..6),
        prop::collection::vec((any::<u8>(), any::<u8>(), any::<u8>()), 0..6),
    )
}

fn build_fixture(db: &TestDatabase, shape: &StateShape) -> FixtureState {
    let mut builder = StateBuilder::new();
    for (seed, slots) in shape {
        if slots.is_empty() {
            builder = builder.eoa(account_hash(*seed), *seed as u64 + 1);
        } else {
            builder = builder.contract(
                account_hash(*seed),
                *seed as u64 + 1,
                slots
                    .iter()
                    .map(|(slot, value)| (slot_key(*slot), slot_value(*value))),
            );
        }
    }
    builder.commit(&*db.storage())
}

/// Small segments and tiny batches to exercise chaining and checkpoints.
fn chunky_config() -> GeneratorConfig {
    GeneratorConfig {
        account_check_range: 4,
        storage_check_range: 4,
        ideal_batch_size: 64,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// Starting from any mirror state, generation converges: enumerating
    /// the snapshot equals enumerating the trie.
    #[test]
    fn convergence_from_arbitrary_mirror(
        shape in arb_state(),
        (junk_accounts, junk_storage) in arb_junk(),
        seed_correct in any::<bool>(),
    ) {
        let db = TestDatabase::new();
        let storage = db.storage();
        let fixture = build_fixture(&db, &shape);

        if seed_correct {
            fixture.seed_full_snapshot(&*storage);
        }
        for (seed, value) in junk_accounts {
            seed_account_row(&*storage, &account_hash(seed), &[value]);
        }
        for (owner, slot, value) in junk_storage {
            seed_storage_row(&*storage, &account_hash(owner), &slot_key(slot), &[value]);
        }

        run_to_completion(&db, fixture.root, chunky_config());
        assert_converged(&*storage, &fixture);
    }

    /// Re-running a completed generation leaves the mirror unchanged and
    /// terminates with a completion marker again.
    #[test]
    fn regeneration_is_idempotent(shape in arb_state()) {
        let db = TestDatabase::new();
        let storage = db.storage();
        let fixture = build_fixture(&db, &shape);

        run_to_completion(&db, fixture.root, chunky_config());
        let first = snapshot_rows(&*storage);

        let again = run_to_completion(&db, fixture.root, chunky_config());
        assert!(again.completed());
        assert_eq!(snapshot_rows(&*storage), first);
        assert_converged(&*storage, &fixture);
    }
}

/// The published marker never moves backwards across an entire generation,
/// including the completion transition.
#[test]
fn test_monotone_progress() {
    let db = TestDatabase::new();
    let storage = db.storage();
    let fixture = StateBuilder::new()
        .eoa(account_hash(0x05), 1)
        .contract(
            account_hash(0x60),
            9,
            (0u8..=255).map(|i| (slot_key(i), slot_value(i))),
        )
        .eoa(account_hash(0xf0), 2)
        .commit(&*storage);

    let config = GeneratorConfig {
        storage_check_range: 16,
        ideal_batch_size: 1,
        ..GeneratorConfig::default()
    };
    let mut generator = Generator::new(db.storage(), config).unwrap();
    generator.run(fixture.root);

    let deadline = Instant::now() + Duration::from_secs(60);
    let mut previous = generator.progress();
    loop {
        let current = generator.progress();
        assert!(
            !current.is_before(&previous),
            "progress went backwards: {previous} -> {current}"
        );
        if current == Marker::Done {
            break;
        }
        assert!(Instant::now() < deadline, "generation never completed");
        previous = current;
        std::thread::sleep(Duration::from_millis(1));
    }
    generator.stop();
    assert_converged(&*storage, &fixture);
}

/// Stopping and resuming at arbitrary points keeps the persisted marker
/// non-decreasing until the completion transition.
#[test]
fn test_monotone_progress_across_resumes() {
    let db = TestDatabase::new();
    let storage = db.storage();
    let fixture = StateBuilder::new()
        .contract(
            account_hash(0x42),
            9,
            (0u16..1024).map(|i| {
                let key = slot_key_wide((i >> 8) as u8, (i & 0xff) as u8);
                (key, slot_value((i % 250) as u8))
            }),
        )
        .commit(&*storage);

    let config = GeneratorConfig {
        storage_check_range: 32,
        ideal_batch_size: 1,
        ..GeneratorConfig::default()
    };

    // Monotonicity holds until the completion transition; once a cycle
    // finishes, a new run legitimately restarts from genesis.
    let mut watermark = Marker::Empty;
    for _ in 0..4 {
        let mut generator = Generator::new(db.storage(), config.clone()).unwrap();
        let resumed_at = generator.progress();
        if resumed_at == Marker::Done {
            break;
        }
        assert!(
            !resumed_at.is_before(&watermark),
            "journalled marker regressed across restart"
        );
        generator.run(fixture.root);
        std::thread::sleep(Duration::from_millis(20));
        generator.stop();

        let current = generator.progress();
        assert!(!current.is_before(&watermark));
        watermark = current;
        if generator.completed() {
            break;
        }
    }

    let mut generator = Generator::new(db.storage(), config).unwrap();
    generator.run(fixture.root);
    assert!(generator.wait_done(GENERATION_TIMEOUT));
    generator.stop();
    assert_converged(&*storage, &fixture);
}
