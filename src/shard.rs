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

//! SHARD: the unit of rebuild. Holds compressed `main`
//! columns, an append-only delta buffer, a deletion set, and the set of
//! INDEXes built over it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::blob_store::BlobStore;
use crate::boundary::BoundarySet;
use crate::codec::{self, boxed::StorageScmer, compute_proxy::ComputeProxyColumn, ColumnStorage};
use crate::index::{Index, RowSource, NATIVE_THRESHOLD};
use crate::value::Value;

/// A positional tuple aligned to the shard's `delta_columns` mapping; cells
/// for columns absent at insert time are `Value::Nil`.
#[derive(Debug, Clone)]
pub struct DeltaRow(pub Vec<Value>);

pub struct ShardState {
	pub main_count: usize,
	pub columns: HashMap<String, Box<dyn ColumnStorage>>,
	pub compute_columns: HashMap<String, Arc<ComputeProxyColumn>>,
	pub delta_columns: Vec<String>,
	pub inserts: Vec<DeltaRow>,
	pub deletions: HashSet<usize>,
	pub indexes: Vec<Arc<Index>>,
	pub last_accessed: Instant,
}

impl RowSource for ShardState {
	fn main_count(&self) -> usize {
		self.main_count
	}

	fn delta_len(&self) -> usize {
		self.inserts.len()
	}

	fn column_value(&self, column: &str, rid: usize) -> Value {
		if rid < self.main_count {
			if let Some(col) = self.columns.get(column) {
				return col.get(rid);
			}
			if let Some(proxy) = self.compute_columns.get(column) {
				return proxy.get(rid, || self.materialize_inputs(proxy, rid));
			}
			return Value::Nil;
		}
		let delta_idx = rid - self.main_count;
		let row = &self.inserts[delta_idx];
		match self.delta_columns.iter().position(|c| c == column) {
			Some(pos) => row.0.get(pos).cloned().unwrap_or(Value::Nil),
			None => Value::Nil,
		}
	}
}

impl ShardState {
	fn materialize_inputs(&self, proxy: &ComputeProxyColumn, rid: usize) -> Vec<Value> {
		proxy.input_columns().iter().map(|c| self.column_value(c, rid)).collect()
	}

	/// True row count, main plus every insert ever recorded (deletions are
	/// masked at scan time, not here).
	pub fn total_rows(&self) -> usize {
		self.main_count + self.inserts.len()
	}

	pub fn is_deleted(&self, rid: usize) -> bool {
		self.deletions.contains(&rid)
	}
}

/// Holds: `main_count`, columns, inserts, deletions, indexes, a per-shard
/// lock, a UUID, `last_accessed`.
pub struct Shard {
	pub uuid: Uuid,
	state: RwLock<ShardState>,
}

impl Shard {
	pub fn new(uuid: Uuid, columns: HashMap<String, Box<dyn ColumnStorage>>, delta_columns: Vec<String>) -> Self {
		let main_count = columns.values().next().map(|c| c.len()).unwrap_or(0);
		Shard {
			uuid,
			state: RwLock::new(ShardState {
				main_count,
				columns,
				compute_columns: HashMap::new(),
				delta_columns,
				inserts: Vec::new(),
				deletions: HashSet::new(),
				indexes: Vec::new(),
				last_accessed: Instant::now(),
			}),
		}
	}

	pub fn with_compute_column(mut self, name: impl Into<String>, proxy: Arc<ComputeProxyColumn>) -> Self {
		self.state.get_mut().compute_columns.insert(name.into(), proxy);
		self
	}

	/// `insert(rows)`: append each row to `inserts`; every active index gets
	/// the new row's key inserted into its `delta_btree`.
	pub fn insert(&self, rows: Vec<DeltaRow>) {
		let mut state = self.state.write();
		for row in rows {
			state.inserts.push(row);
			let rid = state.main_count + state.inserts.len() - 1;
			let indexes = state.indexes.clone();
			for idx in &indexes {
				idx.insert_delta_row(&*state, rid);
			}
		}
		state.last_accessed = Instant::now();
	}

	/// `delete(rid)`: add to the deletion set; index deltas are never
	/// pruned, since deletions can be rolled back.
	pub fn delete(&self, rid: usize) {
		self.state.write().deletions.insert(rid);
	}

	/// Write-through a single cell for the `$update` scan callback: an
	/// in-place `set` on a main column's codec, or an overwrite of the
	/// matching delta row's cell. `false` means the column has no such row
	/// or its main codec rejected in-place writes.
	pub fn write_cell(&self, rid: usize, column: &str, value: Value) -> bool {
		let mut state = self.state.write();
		if rid < state.main_count {
			return match state.columns.get_mut(column) {
				Some(col) => col.set(rid, value),
				None => false,
			};
		}
		let delta_idx = rid - state.main_count;
		let pos = match state.delta_columns.iter().position(|c| c == column) {
			Some(p) => p,
			None => return false,
		};
		match state.inserts.get_mut(delta_idx) {
			Some(row) if pos < row.0.len() => {
				row.0[pos] = value;
				true
			}
			_ => false,
		}
	}

	pub fn snapshot_max_insert_index(&self) -> usize {
		self.state.read().inserts.len()
	}

	pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, ShardState> {
		self.state.read()
	}

	/// Select the first index whose column prefix equals `columns`, a
	/// longer index covering it, or create a fresh inactive shell. Takes
	/// the shard write lock briefly; callers must not already hold it.
	pub fn find_or_create_index(&self, columns: &[String]) -> Arc<Index> {
		let mut state = self.state.write();
		if let Some(idx) = state.indexes.iter().find(|i| i.columns == columns) {
			return idx.clone();
		}
		if let Some(idx) = state.indexes.iter().find(|i| i.columns.len() > columns.len() && i.columns[..columns.len()] == *columns) {
			return idx.clone();
		}
		let idx = Arc::new(Index::new_shell(columns.to_vec()));
		state.indexes.push(idx.clone());
		idx
	}

	/// Produce candidate record-ids for `bset`, honoring
	/// `max_insert_index` as the scan's frozen view of the delta. Does not
	/// apply deletion-set masking — that is the scan driver's job so a
	/// transaction's visibility overlay can differ per caller.
	///
	/// Batches are collected under the shard's read lock and `cb` is only
	/// invoked after that lock is released: `cb`'s caller (the scan driver)
	/// re-reads the shard per row, and a `cb` invoked while this lock is
	/// still held would deadlock against a concurrent writer queued for it.
	pub fn scan_candidates(&self, bset: &BoundarySet, max_insert_index: usize, mut cb: impl FnMut(&[usize]) -> bool) {
		let batches: Vec<Vec<usize>> = if bset.is_empty() {
			let state = self.state.read();
			collect_full_scan(&state, max_insert_index)
		} else {
			let columns: Vec<String> = bset.bounds.iter().map(|b| b.column.clone()).collect();
			let idx = self.find_or_create_index(&columns);
			let state = self.state.read();
			idx.probe(&*state);
			let mut batches = Vec::new();
			idx.iterate(&*state, bset, max_insert_index, |batch| {
				batches.push(batch.to_vec());
				true
			});
			batches
		};
		for batch in &batches {
			if !cb(batch) {
				return;
			}
		}
	}

	/// `rebuild(shard)`: snapshot main+delta minus deletions,
	/// re-run the codec build-up loop per column, migrate index metadata,
	/// and decide whether the new shard reuses this shard's UUID (only
	/// when nothing changed).
	pub fn rebuild(&self, blob_store: Option<Arc<BlobStore>>) -> (Shard, RebuildOutcome) {
		let state = self.state.read();
		let no_change = state.inserts.is_empty() && state.deletions.is_empty();

		let surviving: Vec<usize> = (0..state.total_rows()).filter(|rid| !state.is_deleted(*rid)).collect();
		let new_main_count = surviving.len();

		let mut new_columns = HashMap::new();
		for (name, _) in state.columns.iter() {
			let values: Vec<Value> = surviving.iter().map(|&rid| state.column_value(name, rid)).collect();
			let initial: Box<dyn codec::CodecBuild> = match &blob_store {
				Some(store) => Box::new(StorageScmer::with_blob_store(store.clone())),
				None => Box::new(StorageScmer::new()),
			};
			let col = codec::build_column_from(initial, values.iter(), values.len());
			new_columns.insert(name.clone(), col);
		}

		let migrated_indexes = migrate_indexes(&state.indexes, &state.compute_columns);

		let new_uuid = if no_change { self.uuid } else { Uuid::new_v4() };
		let new_shard = Shard {
			uuid: new_uuid,
			state: RwLock::new(ShardState {
				main_count: new_main_count,
				columns: new_columns,
				compute_columns: state.compute_columns.clone(),
				delta_columns: state.delta_columns.clone(),
				inserts: Vec::new(),
				deletions: HashSet::new(),
				indexes: migrated_indexes,
				last_accessed: Instant::now(),
			}),
		};

		let outcome = RebuildOutcome { old_uuid: self.uuid, new_uuid, reused_uuid: no_change };
		(new_shard, outcome)
	}
}

/// Whether the persistence layer should delete the old shard's column
/// files.
pub struct RebuildOutcome {
	pub old_uuid: Uuid,
	pub new_uuid: Uuid,
	pub reused_uuid: bool,
}

impl RebuildOutcome {
	pub fn should_delete_old_files(&self) -> bool {
		!self.reused_uuid
	}
}

fn collect_full_scan(state: &ShardState, max_insert_index: usize) -> Vec<Vec<usize>> {
	const BATCH: usize = 256;
	let total = state.main_count + max_insert_index;
	let mut batches = Vec::new();
	let mut buf = Vec::with_capacity(BATCH);
	for rid in 0..total {
		buf.push(rid);
		if buf.len() >= BATCH {
			batches.push(std::mem::replace(&mut buf, Vec::with_capacity(BATCH)));
		}
	}
	if !buf.is_empty() {
		batches.push(buf);
	}
	batches
}

/// Index migration: decay and deactivate every index, fold
/// shorter indexes whose columns are a prefix of a longer surviving index
/// into that longer index's savings, then promote the single highest-
/// savings index above `NATIVE_THRESHOLD` to `native` — unless any of its
/// columns is a compute-proxy column (whose values can change out from
/// under a physically-sorted `main`).
fn migrate_indexes(old: &[Arc<Index>], compute_columns: &HashMap<String, Arc<ComputeProxyColumn>>) -> Vec<Arc<Index>> {
	let mut clones: Vec<Index> = old.iter().map(|i| i.cloned_decayed()).collect();
	clones.sort_by(|a, b| b.columns.len().cmp(&a.columns.len()));

	let mut kept: Vec<Index> = Vec::new();
	'outer: for shorter in clones {
		for longer in kept.iter() {
			if longer.columns.len() > shorter.columns.len() && longer.columns[..shorter.columns.len()] == shorter.columns[..] {
				longer.fold_savings_from(&shorter);
				continue 'outer;
			}
		}
		kept.push(shorter);
	}

	if let Some(best_pos) = kept
		.iter()
		.enumerate()
		.filter(|(_, idx)| idx.savings() > NATIVE_THRESHOLD)
		.filter(|(_, idx)| !idx.columns.iter().any(|c| compute_columns.contains_key(c)))
		.max_by(|a, b| a.1.savings().partial_cmp(&b.1.savings()).unwrap())
		.map(|(pos, _)| pos)
	{
		kept[best_pos].set_native(true);
	}

	kept.into_iter().map(Arc::new).collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::codec;

	fn int_column(values: &[i64]) -> Box<dyn ColumnStorage> {
		let vs: Vec<Value> = values.iter().map(|v| Value::Int(*v)).collect();
		codec::build_column(vs.iter(), vs.len())
	}

	fn fresh_shard(values: &[i64]) -> Shard {
		let mut columns = HashMap::new();
		columns.insert("x".to_string(), int_column(values));
		Shard::new(Uuid::new_v4(), columns, vec!["x".to_string()])
	}

	#[test]
	fn in_place_overwrite_updates_even_rows_only() {
		// A pure int column always compresses past StorageSCMER (into
		// StorageSeq/StorageDecimal/StorageInt, none of which support `set`),
		// so a single non-int sentinel keeps the proposal loop on the boxed
		// codec while the rest of the column stays int-shaped.
		let mut values: Vec<Value> = vec![Value::str("sentinel")];
		values.extend((1..200).map(Value::Int));
		let mut col = codec::build_column(values.iter(), values.len());
		for i in (2..200).step_by(2) {
			assert!(col.set(i, Value::Int(-1)));
		}
		assert_eq!(col.get(0), Value::str("sentinel"));
		for i in 1..200 {
			let expected = if i % 2 == 0 { Value::Int(-1) } else { Value::Int(i as i64) };
			assert_eq!(col.get(i), expected);
		}
	}

	#[test]
	fn rebuild_with_no_changes_reuses_uuid() {
		let shard = fresh_shard(&[1, 2, 3]);
		let (rebuilt, outcome) = shard.rebuild(None);
		assert!(outcome.reused_uuid);
		assert_eq!(rebuilt.uuid, shard.uuid);
		assert!(!outcome.should_delete_old_files());
	}

	#[test]
	fn double_rebuild_keeps_same_uuid_both_times() {
		let shard = fresh_shard(&[1, 2, 3]);
		let (first, outcome1) = shard.rebuild(None);
		assert!(outcome1.reused_uuid);
		let (second, outcome2) = first.rebuild(None);
		assert!(outcome2.reused_uuid);
		assert_eq!(second.uuid, shard.uuid);
	}

	#[test]
	fn rebuild_after_insert_gets_a_fresh_uuid_and_excludes_deletions() {
		let shard = fresh_shard(&[10, 20, 30]);
		shard.insert(vec![DeltaRow(vec![Value::Int(40)])]);
		shard.delete(1); // delete main row holding 20
		let (rebuilt, outcome) = shard.rebuild(None);
		assert!(!outcome.reused_uuid);
		assert_ne!(rebuilt.uuid, shard.uuid);
		let state = rebuilt.read();
		assert_eq!(state.main_count, 3);
		let mut got: Vec<i64> = (0..3).map(|r| state.column_value("x", r).as_int().unwrap()).collect();
		got.sort();
		assert_eq!(got, vec![10, 30, 40]);
	}

	#[test]
	fn scan_candidates_without_boundaries_covers_main_and_visible_delta() {
		let shard = fresh_shard(&[1, 2, 3]);
		shard.insert(vec![DeltaRow(vec![Value::Int(4)])]);
		let max_insert = shard.snapshot_max_insert_index();
		let mut got = Vec::new();
		shard.scan_candidates(&BoundarySet::default(), max_insert, |batch| {
			got.extend_from_slice(batch);
			true
		});
		got.sort();
		assert_eq!(got, vec![0, 1, 2, 3]);
	}

	#[test]
	fn deletion_set_is_not_filtered_by_scan_candidates() {
		// Visibility masking is the scan driver's job, not the shard/index
		// layer's.
		let shard = fresh_shard(&[1, 2, 3]);
		shard.delete(1);
		let mut got = Vec::new();
		shard.scan_candidates(&BoundarySet::default(), 0, |batch| {
			got.extend_from_slice(batch);
			true
		});
		got.sort();
		assert_eq!(got, vec![0, 1, 2]);
	}
}
