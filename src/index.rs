// Copyright 2015-2020 Parity Technologies (UK) Ltd.
// This file is part of Parity.

// Parity is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// Parity is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with Parity.  If not, see <http://www.gnu.org/licenses/>.

//! Secondary INDEX: a sort-order view over main rows plus a B-tree over
//! live delta rows, merged under a boundary set.
//!
//! An index does not own its shard; it is handed a `&dyn RowSource` for
//! each operation, which keeps the shard↔index back-reference from becoming an
//! ownership cycle.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::bitpack::{bits_for_range, BitPacked};
use crate::boundary::{row_within_bounds, BoundarySet, Position};
use crate::value::Value;

/// Threshold above which a shell index is activated (savings counter);
/// each probe adds 1.0, each rebuild decays existing savings by 0.9.
pub const ACTIVATION_THRESHOLD: f64 = 2.0;
/// Threshold above which the single best index is promoted to `native`
/// during a rebuild.
pub const NATIVE_THRESHOLD: f64 = 4.0;
const PROBE_WEIGHT: f64 = 1.0;
const REBUILD_DECAY: f64 = 0.9;
const EMIT_BATCH: usize = 256;

/// What an index needs from its owning shard: the physical row count, the
/// number of live delta rows, and a column value for any record-id in
/// `[0, main_count + delta_len)`.
pub trait RowSource: Sync {
	fn main_count(&self) -> usize;
	fn delta_len(&self) -> usize;
	fn column_value(&self, column: &str, rid: usize) -> Value;

	fn row_key(&self, columns: &[String], rid: usize) -> Vec<Value> {
		columns.iter().map(|c| self.column_value(c, rid)).collect()
	}
}

struct IndexState {
	savings: f64,
	native: bool,
	active: bool,
	/// Sorted position -> record-id. `None` when `native` (identity) or
	/// when the index has never been built.
	main_order: Option<BitPacked>,
	/// Keyed by (index-column values, record-id) so duplicate keys never
	/// collide; the record-id itself serves as spec's "item_id" tiebreak.
	delta_btree: BTreeMap<(Vec<Value>, usize), ()>,
	last_hit: usize,
	last_used: std::time::Instant,
}

/// `columns, savings, native, main_order, delta_btree, active, last_hit`.
pub struct Index {
	pub columns: Vec<String>,
	state: RwLock<IndexState>,
}

impl Index {
	/// A fresh, inactive shell over `columns` (already canonicalized by the
	/// caller: equality-prefix alphabetized, at most one trailing range
	/// column per the boundary set it was created to serve).
	pub fn new_shell(columns: Vec<String>) -> Self {
		Index {
			columns,
			state: RwLock::new(IndexState {
				savings: 0.0,
				native: false,
				active: false,
				main_order: None,
				delta_btree: BTreeMap::new(),
				last_hit: 0,
				last_used: std::time::Instant::now(),
			}),
		}
	}

	pub fn is_active(&self) -> bool {
		self.state.read().active
	}

	pub fn is_native(&self) -> bool {
		self.state.read().native
	}

	pub fn savings(&self) -> f64 {
		self.state.read().savings
	}

	/// A probe matched this index's column prefix; bump its savings counter
	/// and activate it once the threshold is crossed.
	pub fn probe(&self, source: &dyn RowSource) {
		let mut st = self.state.write();
		st.savings += PROBE_WEIGHT;
		st.last_used = std::time::Instant::now();
		let should_activate = !st.active && st.savings > ACTIVATION_THRESHOLD;
		drop(st);
		if should_activate {
			self.activate(source);
		}
	}

	/// Decay savings on rebuild.
	pub fn decay(&self) {
		self.state.write().savings *= REBUILD_DECAY;
	}

	pub fn set_native(&self, native: bool) {
		self.state.write().native = native;
	}

	/// Index migration: a fresh, inactive shell carrying the
	/// predecessor's column list and a decayed savings counter.
	pub fn cloned_decayed(&self) -> Index {
		let shell = Index::new_shell(self.columns.clone());
		shell.state.write().savings = self.savings() * REBUILD_DECAY;
		shell
	}

	/// Fold a shorter index's savings into this (longer, prefix-covering)
	/// one during rebuild dedup, so the shorter index's accumulated value
	/// isn't simply discarded.
	pub fn fold_savings_from(&self, shorter: &Index) {
		self.state.write().savings += shorter.savings();
	}

	fn key_of(&self, source: &dyn RowSource, rid: usize) -> Vec<Value> {
		source.row_key(&self.columns, rid)
	}

	/// Build `main_order` (skipped when `native`: identity) and
	/// `delta_btree` from scratch, then mark active. Callers hold the
	/// shard's read lock; this only takes the index's own lock.
	pub fn activate(&self, source: &dyn RowSource) {
		let main_count = source.main_count();
		let native = self.state.read().native;
		let main_order = if native {
			None
		} else {
			let mut perm: Vec<usize> = (0..main_count).collect();
			perm.sort_by(|&a, &b| self.key_of(source, a).cmp(&self.key_of(source, b)));
			let bitsize = bits_for_range(main_count.saturating_sub(1).max(0) as u64).max(1);
			let mut packed = BitPacked::new(bitsize, main_count.max(1));
			for (pos, rid) in perm.into_iter().enumerate() {
				packed.set(pos, rid as u64);
			}
			Some(packed)
		};
		let mut delta_btree = BTreeMap::new();
		for rid in main_count..main_count + source.delta_len() {
			delta_btree.insert((self.key_of(source, rid), rid), ());
		}
		let mut st = self.state.write();
		st.main_order = main_order;
		st.delta_btree = delta_btree;
		st.active = true;
		st.last_hit = 0;
	}

	/// Insert one freshly-appended delta row; no-op if
	/// the index is not active.
	pub fn insert_delta_row(&self, source: &dyn RowSource, rid: usize) {
		let mut st = self.state.write();
		if !st.active {
			return;
		}
		let key = self.key_of(source, rid);
		st.delta_btree.insert((key, rid), ());
	}

	/// Cache eviction: drop the structures, keep `savings` so
	/// reactivation is cheap to justify again.
	pub fn evict(&self) {
		let mut st = self.state.write();
		st.active = false;
		st.main_order = None;
		st.delta_btree = BTreeMap::new();
	}

	/// Approximate in-memory footprint for the cache manager:
	/// the packed sort order plus one map entry's worth of overhead per
	/// delta key.
	pub fn approx_size(&self) -> usize {
		let st = self.state.read();
		let main_bytes = st.main_order.as_ref().map(|b| b.words().len() * 8).unwrap_or(0);
		let delta_bytes = st.delta_btree.len() * (self.columns.len() * 24 + 32);
		main_bytes + delta_bytes
	}

	pub fn last_used(&self) -> std::time::Instant {
		self.state.read().last_used
	}

	/// A cache registration for this index: non-blocking `try_write`
	/// eviction, reporting `false`
	/// when the index's lock is currently held elsewhere.
	pub fn cache_spec(self: &std::sync::Arc<Self>) -> crate::cache::CacheItemSpec {
		let for_size = self.clone();
		let for_last_used = self.clone();
		let for_cleanup = self.clone();
		crate::cache::CacheItemSpec {
			kind: crate::cache::ItemKind::Index,
			size_fn: Box::new(move || for_size.approx_size()),
			last_used_fn: Box::new(move || for_last_used.last_used()),
			score_fn: None,
			cleanup_fn: Box::new(move || match for_cleanup.state.try_write() {
				Some(mut st) => {
					st.active = false;
					st.main_order = None;
					st.delta_btree = BTreeMap::new();
					true
				}
				None => false,
			}),
		}
	}

	fn physical_rid(main_order: &Option<BitPacked>, pos: usize) -> usize {
		match main_order {
			Some(order) => order.get(pos) as usize,
			None => pos,
		}
	}

	/// Binary search `main_order` for the first sorted position whose key
	/// is `>= lower_key`, using `last_hit` as a monotone starting hint.
	fn binary_search_lower(&self, source: &dyn RowSource, main_order: &Option<BitPacked>, main_count: usize, lower_key: &[Value], last_hit: usize) -> usize {
		let key_at = |pos: usize| self.key_of(source, Self::physical_rid(main_order, pos));
		let (mut lo, mut hi) = (0usize, main_count);
		if last_hit < main_count {
			if key_at(last_hit).as_slice() < lower_key {
				lo = last_hit;
			} else {
				hi = last_hit + 1;
			}
		}
		while lo < hi {
			let mid = lo + (hi - lo) / 2;
			if key_at(mid).as_slice() < lower_key {
				lo = mid + 1;
			} else {
				hi = mid;
			}
		}
		lo
	}

	/// Stream-merge main and delta under `bset`, emitting record-ids in
	/// batches to `cb`; `cb` returning `false` stops iteration early.
	/// Deletions are not filtered here — that is the scan layer's job.
	pub fn iterate(&self, source: &dyn RowSource, bset: &BoundarySet, max_insert_index: usize, mut cb: impl FnMut(&[usize]) -> bool) {
		let main_count = source.main_count();
		let (main_order, delta_btree, active, last_hit) = {
			let st = self.state.read();
			(st.main_order.clone(), st.delta_btree.clone(), st.active, st.last_hit)
		};

		let mut buf = Vec::with_capacity(EMIT_BATCH);
		macro_rules! emit {
			($rid:expr) => {{
				buf.push($rid);
				if buf.len() >= EMIT_BATCH {
					if !cb(&buf) {
						buf.clear();
						return;
					}
					buf.clear();
				}
			}};
		}

		if !active || bset.is_empty() {
			for rid in 0..main_count + max_insert_index {
				if bset.is_empty() {
					emit!(rid);
					continue;
				}
				let key = self.key_of(source, rid);
				if row_within_bounds(&key, bset).is_within() {
					emit!(rid);
				}
			}
			if !buf.is_empty() {
				cb(&buf);
			}
			return;
		}

		let lower_key = bset.lower_key();
		let mut start_pos = self.binary_search_lower(source, &main_order, main_count, &lower_key, last_hit);
		if let Some(last) = bset.bounds.last() {
			if !last.lower_inclusive && last.lower.is_some() {
				while start_pos < main_count {
					let key = self.key_of(source, Self::physical_rid(&main_order, start_pos));
					if key == lower_key {
						start_pos += 1;
					} else {
						break;
					}
				}
			}
		}
		self.state.write().last_hit = start_pos;

		let mut main_pos = start_pos;
		let mut delta_iter = delta_btree.range((std::ops::Bound::Included((lower_key.clone(), 0usize)), std::ops::Bound::Unbounded)).peekable();

		loop {
			let main_candidate = if main_pos < main_count {
				let rid = Self::physical_rid(&main_order, main_pos);
				let key = self.key_of(source, rid);
				match row_within_bounds(&key, bset) {
					Position::After => None,
					_ => Some((key, rid)),
				}
			} else {
				None
			};
			let delta_candidate = loop {
				match delta_iter.peek() {
					Some(((_, rid), _)) if *rid >= main_count + max_insert_index => {
						// delta_btree is ordered by key, not rid, so a row
						// inserted after this scan's snapshot can sort before
						// an in-snapshot row; skip it instead of treating the
						// whole delta stream as exhausted.
						delta_iter.next();
					}
					Some(((k, rid), _)) => {
						break match row_within_bounds(k, bset) {
							Position::After => None,
							_ => Some((k.clone(), *rid)),
						};
					}
					None => break None,
				}
			};

			match (main_candidate, delta_candidate) {
				(None, None) => break,
				(Some((_, rid)), None) => {
					emit!(rid);
					main_pos += 1;
				}
				(None, Some((_, rid))) => {
					emit!(rid);
					delta_iter.next();
				}
				(Some((mk, mrid)), Some((dk, drid))) => match mk.cmp(&dk) {
					Ordering::Less => {
						emit!(mrid);
						main_pos += 1;
					}
					Ordering::Greater => {
						emit!(drid);
						delta_iter.next();
					}
					// delta-first on tie.
					Ordering::Equal => {
						emit!(drid);
						delta_iter.next();
						emit!(mrid);
						main_pos += 1;
					}
				},
			}
		}
		if !buf.is_empty() {
			cb(&buf);
		}
	}
}
