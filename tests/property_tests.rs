//! Randomized checks for the universal properties every codec, index and
//! the blob store are expected to hold, as opposed to the fixed worked
//! examples in `scenarios.rs`.

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;

use columnar_core::bitpack::BitPacked;
use columnar_core::blob_store::BlobStore;
use columnar_core::boundary::{row_within_bounds, Bound, BoundarySet, Position};
use columnar_core::codec;
use columnar_core::index::{Index, RowSource};
use columnar_core::value::Value;
use tempfile::TempDir;

fn arb_value() -> impl Strategy<Value = Value> {
	prop_oneof![
		Just(Value::Nil),
		any::<bool>().prop_map(Value::Bool),
		any::<i32>().prop_map(|i| Value::Int(i as i64)),
		"[a-z]{1,12}".prop_map(Value::str),
	]
}

proptest! {
	/// Round-trip: whatever codec the build-up loop settles on, `get(i)`
	/// returns exactly the value given to `build` at position `i`.
	#[test]
	fn codec_round_trip_holds_for_any_input(xs in prop::collection::vec(arb_value(), 0..200)) {
		let col = codec::build_column(xs.iter(), xs.len());
		for (i, v) in xs.iter().enumerate() {
			prop_assert_eq!(&col.get(i), v);
		}
	}

	/// The compression proposal loop terminates (within the 4-iteration
	/// bound `build_column_from` itself asserts) for any input shape, mixed
	/// types included.
	#[test]
	fn compression_loop_converges_for_any_input(xs in prop::collection::vec(arb_value(), 0..300)) {
		let _ = codec::build_column(xs.iter(), xs.len());
	}

	/// Bit-packing: for any bitsize in [1, 48] and any in-range values,
	/// writing then reading every position returns what was written, and
	/// overwriting a value does not disturb any other position — including
	/// values that straddle a 64-bit word boundary.
	#[test]
	fn bitpacked_round_trip_and_overwrite_isolation(
		bitsize in 1u8..=48,
		xs in prop::collection::vec(any::<u64>(), 1..64),
		overwrite_with in any::<u64>(),
	) {
		let mask = if bitsize >= 64 { u64::MAX } else { (1u64 << bitsize) - 1 };
		let xs: Vec<u64> = xs.into_iter().map(|v| v & mask).collect();
		let overwrite_with = overwrite_with & mask;
		let len = xs.len();

		let mut packed = BitPacked::new(bitsize, len);
		for (i, v) in xs.iter().enumerate() {
			packed.set(i, *v);
		}
		for (i, v) in xs.iter().enumerate() {
			prop_assert_eq!(packed.get(i), *v, "bitsize={} index={}", bitsize, i);
		}

		for i in (0..len).step_by(2) {
			packed.set(i, overwrite_with);
		}
		for i in 0..len {
			let expected = if i % 2 == 0 { overwrite_with } else { xs[i] };
			prop_assert_eq!(packed.get(i), expected, "bitsize={} index={}", bitsize, i);
		}
	}
}

struct FakeRows {
	main: Vec<i64>,
	delta: Vec<i64>,
}

impl RowSource for FakeRows {
	fn main_count(&self) -> usize {
		self.main.len()
	}
	fn delta_len(&self) -> usize {
		self.delta.len()
	}
	fn column_value(&self, _column: &str, rid: usize) -> Value {
		if rid < self.main.len() {
			Value::Int(self.main[rid])
		} else {
			Value::Int(self.delta[rid - self.main.len()])
		}
	}
}

fn range_bset(lower: i64, upper: i64) -> BoundarySet {
	BoundarySet { bounds: vec![Bound { column: "x".to_string(), lower: Some(Value::Int(lower)), lower_inclusive: true, upper: Some(Value::Int(upper)), upper_inclusive: true }] }
}

proptest! {
	/// `Index::iterate` over an active index emits exactly the multiset of
	/// record-ids whose key falls within the boundary set, matching a
	/// brute-force scan of the same row source.
	#[test]
	fn index_iterate_matches_brute_force_scan(
		main in prop::collection::vec(-50i64..50, 0..60),
		delta in prop::collection::vec(-50i64..50, 0..20),
		lower in -50i64..50,
		span in 0i64..40,
	) {
		let upper = lower + span;
		let source = FakeRows { main, delta };
		let idx = Index::new_shell(vec!["x".to_string()]);
		idx.activate(&source);
		let bset = range_bset(lower, upper);

		let mut got = Vec::new();
		idx.iterate(&source, &bset, source.delta.len(), |batch| {
			got.extend_from_slice(batch);
			true
		});
		got.sort();

		let mut expected: Vec<usize> = (0..source.main.len() + source.delta.len())
			.filter(|&rid| {
				let v = source.column_value("x", rid);
				row_within_bounds(&[v], &bset) == Position::Within
			})
			.collect();
		expected.sort();
		prop_assert_eq!(got, expected);
	}

	/// When a main row and a delta row carry the same key, the merge emits
	/// the delta record-id immediately before the main one, for any
	/// duplicated value placed in both halves.
	#[test]
	fn stable_merge_emits_delta_before_main_on_key_ties(
		main in prop::collection::vec(-20i64..20, 1..30),
		dup_pos in 0usize..29,
	) {
		let dup_pos = dup_pos % main.len();
		let dup_value = main[dup_pos];
		let delta = vec![dup_value];

		let source = FakeRows { main, delta };
		let idx = Index::new_shell(vec!["x".to_string()]);
		idx.activate(&source);
		let bset = range_bset(dup_value, dup_value);

		let mut got = Vec::new();
		idx.iterate(&source, &bset, source.delta.len(), |batch| {
			got.extend_from_slice(batch);
			true
		});

		// the delta row (record-id main.len()) must appear before every
		// main-side record-id carrying the same key
		let delta_rid = source.main.len();
		let delta_emit_pos = got.iter().position(|&r| r == delta_rid);
		prop_assert!(delta_emit_pos.is_some());
		let delta_emit_pos = delta_emit_pos.unwrap();
		for (pos, &rid) in got.iter().enumerate() {
			if rid != delta_rid && source.column_value("x", rid).as_int() == Some(dup_value) {
				prop_assert!(delta_emit_pos < pos, "delta record-id should be emitted before tied main record-id {}", rid);
			}
		}
	}

	/// Savings increase by exactly 1 per probe while inactive, and a
	/// rebuild-style decay (`cloned_decayed`) never leaves savings above
	/// 0.9x what it was before the decay.
	#[test]
	fn savings_increase_per_probe_and_shrink_on_rebuild(n_probes in 1usize..5) {
		let source = FakeRows { main: vec![1, 2, 3], delta: vec![] };
		let idx = Index::new_shell(vec!["x".to_string()]);
		let mut last = 0.0f64;
		for i in 1..=n_probes {
			idx.probe(&source);
			if idx.is_active() {
				break;
			}
			prop_assert!((idx.savings() - i as f64).abs() < 1e-9);
			last = idx.savings();
		}
		let pre_rebuild = idx.savings().max(last);
		let decayed = idx.cloned_decayed();
		prop_assert!(decayed.savings() <= 0.9 * pre_rebuild + 1e-9);
	}
}

proptest! {
	/// Blob refcount conservation under this store's per-build dedup
	/// semantics: a digest referenced by N independent column builds
	/// (each build bumping it at most once, regardless of how many rows in
	/// that build repeat it) ends up with total refcount exactly N, and a
	/// digest unique to one build ends with refcount 1.
	#[test]
	fn blob_refcount_equals_number_of_builds_that_reference_it(
		n_builds in 1usize..6,
		repeats_per_build in prop::collection::vec(1usize..5, 1..6),
	) {
		let dir = TempDir::new().unwrap();
		let store = Arc::new(BlobStore::open(dir.path()).unwrap());
		let shared = "R".repeat(400);
		let n_builds = n_builds.min(repeats_per_build.len());

		let mut unique_digests = HashSet::new();
		for b in 0..n_builds {
			let repeats = repeats_per_build[b];
			let mut values: Vec<Value> = (0..repeats).map(|_| Value::str(shared.clone())).collect();
			let unique = format!("U{}{}", b, "z".repeat(300));
			values.push(Value::str(unique.clone()));
			unique_digests.insert(BlobStore::hash(unique.as_bytes()));

			let build: Box<dyn codec::CodecBuild> =
				Box::new(codec::boxed::StorageScmer::with_blob_store(store.clone()));
			let _ = codec::build_column_from(build, values.iter(), values.len());
		}

		let shared_digest = BlobStore::hash(shared.as_bytes());
		prop_assert_eq!(store.refcount(&shared_digest), n_builds as u64);
		for digest in &unique_digests {
			prop_assert_eq!(store.refcount(digest), 1);
		}

		let mut expected_total: u64 = n_builds as u64;
		expected_total += unique_digests.len() as u64;
		prop_assert_eq!(store.total_refcount(), expected_total);
	}
}

