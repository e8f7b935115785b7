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

//! `ComputeProxyColumn`: a derived column computed from other columns by a
//! user procedure, materialized lazily into `delta`/`main`. It is not a
//! rebuild target in the ordinary codec sense: it rejects
//! `prepare`/`scan`/`build`/`finish` and the rebuild loop instead reads it
//! through `get` like any other column to build a fresh codec when the
//! proxy's own column is the one being rebuilt.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use crate::codec::{self, ColumnStorage};
use crate::expr::Procedure;
use crate::value::Value;

pub struct ComputeProxyColumn {
	main: RwLock<Option<Box<dyn ColumnStorage>>>,
	delta: Mutex<HashMap<usize, Value>>,
	valid: Mutex<HashSet<usize>>,
	compressed: AtomicBool,
	input_columns: Vec<String>,
	computor: Procedure,
	last_used: Mutex<Instant>,
}

impl ComputeProxyColumn {
	pub fn new(input_columns: Vec<String>, computor: Procedure) -> Self {
		ComputeProxyColumn {
			main: RwLock::new(None),
			delta: Mutex::new(HashMap::new()),
			valid: Mutex::new(HashSet::new()),
			compressed: AtomicBool::new(false),
			input_columns,
			computor,
			last_used: Mutex::new(Instant::now()),
		}
	}

	pub fn input_columns(&self) -> &[String] {
		&self.input_columns
	}

	/// Fetch the proxy's value for `rid`, computing it on demand from
	/// `read_inputs` (which must materialize the procedure's input columns
	/// for that row) when neither `main` nor `delta` already holds it.
	pub fn get(&self, rid: usize, read_inputs: impl FnOnce() -> Vec<Value>) -> Value {
		*self.last_used.lock() = Instant::now();
		if self.compressed.load(Ordering::Acquire) {
			return self.main.read().as_ref().expect("compressed proxy must have main").get(rid);
		}
		if self.valid.lock().contains(&rid) {
			if let Some(v) = self.delta.lock().get(&rid) {
				return v.clone();
			}
			if let Some(main) = self.main.read().as_ref() {
				return main.get(rid);
			}
		}
		let args = read_inputs();
		let value = self.computor.apply(&args);
		self.delta.lock().insert(rid, value.clone());
		self.valid.lock().insert(rid);
		value
	}

	/// Materialize every row via `oracle` (which should itself prefer
	/// delta, then main, then on-demand computation) into a fresh codec,
	/// install it as `main`, and drop to the fully-compressed state.
	pub fn compress(&self, count: usize, oracle: impl Fn(usize) -> Value) {
		let col = codec::build_column_indexed(count, oracle);
		*self.main.write() = Some(col);
		self.delta.lock().clear();
		self.valid.lock().clear();
		self.compressed.store(true, Ordering::Release);
	}

	/// Eagerly populate only the rows `filter` matches, leaving the rest
	/// lazy and `compressed` false.
	pub fn compress_filtered(&self, count: usize, filter: impl Fn(usize) -> bool, oracle: impl Fn(usize) -> Value) {
		for rid in 0..count {
			if filter(rid) {
				let value = oracle(rid);
				self.delta.lock().insert(rid, value);
				self.valid.lock().insert(rid);
			}
		}
	}

	/// Invalidate a single row. If `main` supports in-place `set` (the
	/// boxed/universal codec does), recompute and write through in place;
	/// otherwise drop back to lazy for this row.
	pub fn invalidate(&self, rid: usize, recompute: impl FnOnce() -> Value) {
		let mut main_guard = self.main.write();
		if let Some(main) = main_guard.as_mut() {
			if main.set(rid, recompute()) {
				return;
			}
		}
		drop(main_guard);
		self.compressed.store(false, Ordering::Release);
		self.valid.lock().remove(&rid);
		self.delta.lock().remove(&rid);
	}

	/// Reset to fully-lazy state: drop `main`, clear `delta` and the valid
	/// mask.
	pub fn invalidate_all(&self) {
		*self.main.write() = None;
		self.delta.lock().clear();
		self.valid.lock().clear();
		self.compressed.store(false, Ordering::Release);
	}

	pub fn is_compressed(&self) -> bool {
		self.compressed.load(Ordering::Acquire)
	}

	fn approx_size(&self) -> usize {
		let main_bytes = self.main.read().as_ref().map(|c| c.compute_size()).unwrap_or(0);
		let delta_bytes = self.delta.lock().len() * 32;
		main_bytes + delta_bytes
	}

	/// A cache registration for this temp column: eviction
	/// discards `main` and drops back to lazy mode, the same as
	/// `invalidate_all`, but via `try_write` so a busy column is skipped
	/// this pass instead of blocking the cache manager.
	pub fn cache_spec(self: &std::sync::Arc<Self>) -> crate::cache::CacheItemSpec {
		let for_size = self.clone();
		let for_last_used = self.clone();
		let for_cleanup = self.clone();
		crate::cache::CacheItemSpec {
			kind: crate::cache::ItemKind::TempColumn,
			size_fn: Box::new(move || for_size.approx_size()),
			last_used_fn: Box::new(move || *for_last_used.last_used.lock()),
			score_fn: None,
			cleanup_fn: Box::new(move || match for_cleanup.main.try_write() {
				Some(mut main_guard) => {
					*main_guard = None;
					for_cleanup.delta.lock().clear();
					for_cleanup.valid.lock().clear();
					for_cleanup.compressed.store(false, Ordering::Release);
					true
				}
				None => false,
			}),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn doubling_proxy() -> ComputeProxyColumn {
		let proc = Procedure::new("double", |args: &[Value]| Value::Int(args[0].as_int().unwrap_or(0) * 2));
		ComputeProxyColumn::new(vec!["x".to_string()], proc)
	}

	#[test]
	fn lazily_computes_and_caches_in_delta() {
		let proxy = doubling_proxy();
		let v = proxy.get(0, || vec![Value::Int(21)]);
		assert_eq!(v, Value::Int(42));
		// second get must not re-invoke read_inputs (would panic if it did)
		let v2 = proxy.get(0, || panic!("should have hit the delta cache"));
		assert_eq!(v2, Value::Int(42));
	}

	#[test]
	fn compress_materializes_into_main_and_clears_delta() {
		let proxy = doubling_proxy();
		for rid in 0..10 {
			proxy.get(rid, || vec![Value::Int(rid as i64)]);
		}
		proxy.compress(10, |rid| Value::Int(rid as i64 * 2));
		assert!(proxy.is_compressed());
		for rid in 0..10 {
			assert_eq!(proxy.get(rid, || panic!("compressed proxy should not recompute")), Value::Int(rid as i64 * 2));
		}
	}

	#[test]
	fn invalidate_all_resets_to_lazy() {
		let proxy = doubling_proxy();
		proxy.compress(4, |rid| Value::Int(rid as i64));
		proxy.invalidate_all();
		assert!(!proxy.is_compressed());
		let v = proxy.get(0, || vec![Value::Int(5)]);
		assert_eq!(v, Value::Int(10));
	}
}
