use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, BTreeSet};

use ratingpack::chunks::{chunk_of, element_of, ColumnStore, CHUNK_SIZE};
use ratingpack::{PackError, PackedRatingStore, Rating, RatingDao};

const SEED: u64 = 0x5eed_0001;

fn random_ratings(n: usize, users: i64, items: i64) -> Vec<Rating> {
    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    (0..n)
        .map(|_| {
            Rating::with_timestamp(
                rng.random_range(0..users),
                rng.random_range(0..items),
                rng.random_range(1..=10) as f64 * 0.5,
                rng.random_range(0..1_000_000),
            )
        })
        .collect()
}

#[test]
fn random_triples_read_back_through_one_cursor() {
    let ratings = random_ratings(10_000, 500, 1000);
    let mut builder = PackedRatingStore::builder();
    for (i, r) in ratings.iter().enumerate() {
        assert_eq!(builder.add_rating(*r).unwrap(), i);
    }
    let store = builder.build();
    assert_eq!(store.len(), ratings.len());
    assert!(store.len() > 2 * CHUNK_SIZE);

    let mut cursor = store.get_entry(0);
    for (i, r) in ratings.iter().enumerate() {
        cursor.seek(i);
        assert!(cursor.is_valid());
        assert_eq!(cursor.rating(), *r);
        assert_eq!(cursor.user_ordinal(), store.user_ids().ordinal_of(r.user).unwrap());
        assert_eq!(cursor.item_ordinal(), store.item_ids().ordinal_of(r.item).unwrap());
    }
    cursor.seek(ratings.len());
    assert!(!cursor.is_valid());

    let users: BTreeSet<i64> = ratings.iter().map(|r| r.user).collect();
    assert_eq!(store.user_ids().keys(), users.into_iter().collect::<Vec<_>>().as_slice());
}

#[test]
fn grouped_views_cover_every_rating_once() {
    let ratings = random_ratings(5_000, 120, 300);
    let store = PackedRatingStore::from_ratings(ratings.clone()).unwrap();

    let mut seen = 0usize;
    let mut last_user = None;
    for group in store.stream_by_user() {
        assert!(last_user < Some(group.id), "user groups out of order");
        last_user = Some(group.id);
        assert!(!group.is_empty());
        for r in group.ratings.iter() {
            assert_eq!(r.user, group.id);
            seen += 1;
        }
    }
    assert_eq!(seen, ratings.len());

    let by_item: usize = store.stream_by_item().map(|g| g.len()).sum();
    assert_eq!(by_item, ratings.len());

    // Group order is storage order.
    let mut expected: BTreeMap<i64, Vec<Rating>> = BTreeMap::new();
    for r in &ratings {
        expected.entry(r.item).or_default().push(*r);
    }
    for (item, list) in expected {
        assert_eq!(store.ratings_for_item(item).to_vec(), list);
    }
}

#[test]
fn unknown_ids_are_empty_not_errors() {
    let store = PackedRatingStore::from_ratings(random_ratings(200, 10, 10)).unwrap();
    assert!(store.user_ratings(-1).is_none());
    assert!(store.item_ratings(10_000).is_none());
    assert!(store.ratings_for_user(-1).is_empty());
    assert!(store.user_rating_vector(-1).is_empty());
    assert!(store.users_for_item(-1).is_empty());
    assert!(matches!(
        store.user_ids().ordinal_of(-1),
        Err(PackError::KeyNotFound(_))
    ));
}

#[test]
fn released_slots_are_compacted_on_build() {
    let ratings = random_ratings(CHUNK_SIZE + 100, 50, 50);
    let mut builder = PackedRatingStore::builder();
    builder.extend(ratings.iter().copied()).unwrap();
    for i in (0..CHUNK_SIZE).step_by(3) {
        builder.release(i).unwrap();
    }
    let live: Vec<Rating> = (0..ratings.len()).filter_map(|i| builder.get(i)).collect();
    assert_eq!(live.len(), builder.len());

    let store = builder.build();
    assert_eq!(store.len(), live.len());
    let mut got: Vec<(i64, i64, u64)> = store
        .stream_all()
        .map(|r| (r.user, r.item, r.value.to_bits()))
        .collect();
    let mut want: Vec<(i64, i64, u64)> = live.iter().map(|r| (r.user, r.item, r.value.to_bits())).collect();
    got.sort_unstable();
    want.sort_unstable();
    assert_eq!(got, want);
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_chunk_arithmetic(index in 0usize..(1 << 31)) {
        prop_assert_eq!(chunk_of(index) * CHUNK_SIZE + element_of(index), index);
        prop_assert!(element_of(index) < CHUNK_SIZE);
    }

    #[test]
    fn prop_column_store_round_trip(
        rows in prop::collection::vec((0u32..64, 0u32..64, -5.0f64..5.0, prop::option::of(0i64..1_000)), 0..(CHUNK_SIZE + 64))
    ) {
        let mut cols = ColumnStore::new();
        for (i, (u, it, v, ts)) in rows.iter().enumerate() {
            prop_assert_eq!(cols.push(*u, *it, *v, *ts), i);
        }
        prop_assert_eq!(cols.len(), rows.len());
        prop_assert_eq!(cols.chunk_count(), rows.len().div_ceil(CHUNK_SIZE));
        for (i, (u, it, v, ts)) in rows.iter().enumerate() {
            prop_assert_eq!(cols.user(i), *u);
            prop_assert_eq!(cols.item(i), *it);
            prop_assert_eq!(cols.value(i), *v);
            prop_assert_eq!(cols.timestamp(i), *ts);
        }
    }

    #[test]
    fn prop_store_groups_match_naive_grouping(
        triples in prop::collection::vec((0i64..20, 0i64..20, 1u8..6), 1..300)
    ) {
        let ratings: Vec<Rating> = triples
            .iter()
            .map(|&(u, i, v)| Rating::new(u, i, v as f64))
            .collect();
        let store = PackedRatingStore::from_ratings(ratings.clone()).unwrap();

        let mut naive: BTreeMap<i64, BTreeMap<i64, f64>> = BTreeMap::new();
        for r in &ratings {
            naive.entry(r.user).or_default().insert(r.item, r.value);
        }
        prop_assert_eq!(store.user_ids().len(), naive.len());
        for (user, vector) in naive {
            prop_assert_eq!(store.user_rating_vector(user), vector);
        }
    }
}
