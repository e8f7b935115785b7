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

//! Scan driver: fan out one task per shard, drive each shard's
//! boundary-covering index (or a full scan) in batches, mask by the
//! deletion set and an optional visibility overlay, then filter, map and
//! reduce. Per-shard results combine via the same reduce procedure with
//! `seed` as the neutral element across shards.

use std::sync::Arc;

use rayon::prelude::*;

use crate::boundary::{self, BoundarySet};
use crate::expr::{Lambda, Procedure};
use crate::shard::Shard;
use crate::value::Value;

/// The set of shards backing one table; scans snapshot this list under a
/// short read lock before fanning out, so a concurrent `add_shard` (table
/// creation's rebuild swap) is not visible mid-scan.
pub struct Table {
	shards: parking_lot::RwLock<Vec<Arc<Shard>>>,
}

impl Table {
	pub fn new() -> Self {
		Table { shards: parking_lot::RwLock::new(Vec::new()) }
	}

	pub fn add_shard(&self, shard: Arc<Shard>) {
		self.shards.write().push(shard);
	}

	/// Atomically swap one shard for its rebuilt replacement.
	pub fn replace_shard(&self, old_uuid: uuid::Uuid, new_shard: Arc<Shard>) {
		let mut shards = self.shards.write();
		if let Some(slot) = shards.iter_mut().find(|s| s.uuid == old_uuid) {
			*slot = new_shard;
		}
	}

	pub fn shards_snapshot(&self) -> Vec<Arc<Shard>> {
		self.shards.read().clone()
	}
}

impl Default for Table {
	fn default() -> Self {
		Table::new()
	}
}

/// A request to scan one table. `filter`/`map` are host procedures — the
/// embedded expression language itself is out of scope, so the lambda is
/// only ever consulted by the boundary analyzer, never evaluated here.
pub struct ScanRequest<'a> {
	pub filter_columns: Vec<String>,
	/// Consulted only for boundary extraction; `None` means an
	/// unbounded scan.
	pub filter_lambda: Option<&'a Lambda>,
	/// Evaluated per candidate row over `filter_columns`' materialized
	/// values; `None` means every non-deleted, visible row passes.
	pub filter: Option<&'a Procedure>,
	pub map_columns: Vec<String>,
	pub map: &'a Procedure,
	pub reduce: &'a Procedure,
	pub seed: Value,
	/// A transaction's visibility overlay (`true` = row is visible to this
	/// scan); `None` means every non-deleted row is visible.
	pub visibility: Option<&'a (dyn Fn(usize) -> bool + Sync)>,
	/// When set, `map` is called with an extra trailing argument: a
	/// `Value::Proc` bound to this row's record-id. Calling it with no
	/// arguments deletes the row; calling it with alternating
	/// `(Value::Str(column), value)` pairs writes those cells through.
	pub bind_update: bool,
}

/// Run `req` over every shard of `table`, combining per-shard results (and
/// then the cross-shard results) with `req.reduce`, `req.seed` as the
/// neutral element. A panicking filter/map/reduce call unwinds out through
/// this call and cascades to the caller.
pub fn scan(table: &Table, req: &ScanRequest) -> Value {
	let shards = table.shards_snapshot();
	let per_shard: Vec<Value> = shards.par_iter().map(|shard| scan_shard(shard, req)).collect();
	per_shard.into_iter().fold(req.seed.clone(), |acc, v| req.reduce.apply(&[acc, v]))
}

fn scan_shard(shard: &Arc<Shard>, req: &ScanRequest) -> Value {
	let max_insert_index = shard.snapshot_max_insert_index();
	let bset = match req.filter_lambda {
		Some(lambda) => boundary::extract(&req.filter_columns, lambda),
		None => BoundarySet::default(),
	};

	let mut acc = req.seed.clone();
	shard.scan_candidates(&bset, max_insert_index, |batch| {
		for &rid in batch {
			let filter_values = {
				let state = shard.read();
				if state.is_deleted(rid) {
					continue;
				}
				req.filter_columns.iter().map(|c| state.column_value(c, rid)).collect::<Vec<Value>>()
			};
			if let Some(visible) = req.visibility {
				if !visible(rid) {
					continue;
				}
			}
			if let Some(filter) = req.filter {
				if !matches!(filter.apply(&filter_values), Value::Bool(true)) {
					continue;
				}
			}
			let mut map_values = {
				let state = shard.read();
				req.map_columns.iter().map(|c| state.column_value(c, rid)).collect::<Vec<Value>>()
			};
			if req.bind_update {
				map_values.push(Value::Proc(Arc::new(update_procedure(shard.clone(), rid))));
			}
			let mapped = req.map.apply(&map_values);
			acc = req.reduce.apply(&[acc.clone(), mapped]);
		}
		true
	});
	acc
}

fn update_procedure(shard: Arc<Shard>, rid: usize) -> Procedure {
	Procedure::new("$update", move |args: &[Value]| {
		if args.is_empty() {
			shard.delete(rid);
			return Value::Nil;
		}
		for pair in args.chunks(2) {
			if let [Value::Str(column), value] = pair {
				shard.write_cell(rid, column, value.clone());
			}
		}
		Value::Nil
	})
}
