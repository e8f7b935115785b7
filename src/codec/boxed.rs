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

//! `StorageScmer`: the universal codec. Every rebuild starts here; its
//! `propose_compression` is the decision tree that routes a column to a
//! more specific codec. If nothing more specific fits, the column stays a
//! plain boxed `Value` array — the "raw-sequence" storage variant.

use std::sync::Arc;

use crate::blob_store::BlobStore;
use crate::codec::{self, enum_codec, CodecBuild, ColumnStorage, Reader};
use crate::value::Value;

/// Distribution skew above which `StorageEnum` beats a dense codec.
const ENUM_SKEW_THRESHOLD: f64 = 0.9;
const ENUM_PROBE_CAP: usize = 32;
const FLOAT_EPS: f64 = 1e-6;
const MAX_DECIMAL_EXPONENT: i32 = 15;

#[derive(Default)]
struct Stats {
	count: usize,
	null_count: usize,
	all_int: bool,
	all_numeric: bool,
	saw_float: bool,
	all_string: bool,
	any_blob_eligible: bool,

	int_min: i64,
	int_max: i64,
	int_tz_min: Option<u32>,

	seq_stride: Option<i64>,
	seq_last: Option<i64>,
	seq_pairs: usize,
	seq_matches: usize,

	float_exp_valid: [bool; MAX_DECIMAL_EXPONENT as usize + 1],

	enum_values: Vec<Value>,
	enum_counts: Vec<usize>,
}

impl Stats {
	fn new() -> Self {
		Stats {
			all_int: true,
			all_numeric: true,
			all_string: true,
			int_min: i64::MAX,
			int_max: i64::MIN,
			float_exp_valid: [true; MAX_DECIMAL_EXPONENT as usize + 1],
			..Default::default()
		}
	}

	fn observe(&mut self, v: &Value) {
		self.count += 1;
		match v {
			Value::Nil => {
				self.null_count += 1;
				return;
			}
			Value::Int(x) => {
				self.all_string = false;
				if *x < self.int_min {
					self.int_min = *x;
				}
				if *x > self.int_max {
					self.int_max = *x;
				}
				if let Some(last) = self.seq_last {
					self.seq_pairs += 1;
					let stride = x - last;
					match self.seq_stride {
						None => {
							self.seq_stride = Some(stride);
							self.seq_matches += 1;
						}
						Some(s) if s == stride => self.seq_matches += 1,
						_ => {}
					}
				}
				self.seq_last = Some(*x);
				if *x != 0 {
					let mut n = x.unsigned_abs();
					let mut z = 0u32;
					while n % 10 == 0 {
						n /= 10;
						z += 1;
					}
					self.int_tz_min = Some(self.int_tz_min.map_or(z, |cur| cur.min(z)));
				}
				self.observe_float_scale(*x as f64);
			}
			Value::Float(f) => {
				self.all_int = false;
				self.all_string = false;
				self.saw_float = true;
				self.observe_float_scale(*f);
			}
			Value::Str(s) => {
				self.all_int = false;
				self.all_numeric = false;
				if s.len() > 255 {
					self.any_blob_eligible = true;
				}
				self.observe_enum(v);
			}
			_ => {
				self.all_int = false;
				self.all_numeric = false;
				self.all_string = false;
				self.observe_enum(v);
			}
		}
	}

	fn observe_float_scale(&mut self, f: f64) {
		for k in 0..=MAX_DECIMAL_EXPONENT {
			if !self.float_exp_valid[k as usize] {
				continue;
			}
			let scaled = f * 10f64.powi(k);
			if (scaled - scaled.round()).abs() > FLOAT_EPS {
				self.float_exp_valid[k as usize] = false;
			}
		}
	}

	fn observe_enum(&mut self, v: &Value) {
		if self.enum_values.len() >= ENUM_PROBE_CAP {
			return;
		}
		if let Some(pos) = self.enum_values.iter().position(|x| x == v) {
			self.enum_counts[pos] += 1;
		} else {
			self.enum_values.push(v.clone());
			self.enum_counts.push(1);
		}
	}

	fn is_enum_skewed(&self) -> bool {
		let nonnull = self.count - self.null_count;
		if nonnull == 0 || self.enum_values.len() > ENUM_PROBE_CAP {
			return false;
		}
		let top = self.enum_counts.iter().copied().max().unwrap_or(0);
		top as f64 >= ENUM_SKEW_THRESHOLD * nonnull as f64
	}

	fn decimal_exponent(&self) -> Option<i32> {
		(1..=MAX_DECIMAL_EXPONENT).find(|&k| self.float_exp_valid[k as usize])
	}
}

pub struct StorageScmer {
	values: Vec<Value>,
	stats: Stats,
	blob_store: Option<Arc<BlobStore>>,
}

impl StorageScmer {
	pub fn new() -> Self {
		StorageScmer { values: Vec::new(), stats: Stats::new(), blob_store: None }
	}

	pub fn with_blob_store(store: Arc<BlobStore>) -> Self {
		StorageScmer { values: Vec::new(), stats: Stats::new(), blob_store: Some(store) }
	}

	fn maybe_wrap_blob(&self, inner: Box<dyn CodecBuild>) -> Box<dyn CodecBuild> {
		if self.stats.any_blob_eligible {
			if let Some(store) = &self.blob_store {
				return Box::new(codec::blob_overlay::StorageBlobOverlayBuild::new(store.clone(), inner));
			}
		}
		inner
	}

	pub fn deserialize(body: &[u8]) -> crate::error::Result<Box<dyn ColumnStorage>> {
		let mut r = Reader::new(body);
		let len = r.read_u32()? as usize;
		let mut values = Vec::with_capacity(len);
		for _ in 0..len {
			values.push(enum_codec::read_value(&mut r)?);
		}
		Ok(Box::new(StorageScmer { values, stats: Stats::new(), blob_store: None }))
	}
}

impl CodecBuild for StorageScmer {
	fn prepare(&mut self) {
		self.stats = Stats::new();
	}

	fn scan(&mut self, _i: usize, v: &Value) {
		self.stats.observe(v);
	}

	fn propose_compression(&mut self, _count: usize) -> Option<Box<dyn CodecBuild>> {
		let s = &self.stats;
		if s.count == 0 {
			return None;
		}
		let null_share = s.null_count as f64 / s.count as f64;
		if null_share > 0.5 {
			return Some(Box::new(codec::sparse::StorageSparseBuild::new_pure()));
		}
		let densely_codable = s.all_int || (s.all_numeric && s.saw_float) || s.all_string;
		if null_share > codec::sparse::MIN_SPARSE_NULL_SHARE && densely_codable {
			return Some(Box::new(codec::sparse::StorageSparseBuild::new_dense_wrap()));
		}

		if s.all_int {
			// StorageSeq has no per-row storage at all: it reconstructs every
			// cell from (start, stride), so it is only sound when every
			// adjacent pair sits on the same stride, not merely most of them.
			if s.seq_pairs > 0 && s.seq_matches == s.seq_pairs {
				return Some(Box::new(codec::seq::StorageSeqBuild::new()));
			}
			if let Some(k) = s.int_tz_min {
				if k >= 1 {
					return Some(Box::new(codec::decimal::StorageDecimalBuild::new_int(k as i32)));
				}
			}
			return Some(Box::new(codec::int::StorageIntBuild::new()));
		}

		if s.all_numeric && s.saw_float {
			if let Some(exp) = s.decimal_exponent() {
				return Some(Box::new(codec::decimal::StorageDecimalBuild::new_float(exp)));
			}
			return Some(Box::new(codec::float::StorageFloatBuild::new()));
		}

		if s.all_string {
			if s.is_enum_skewed() {
				return Some(self.maybe_wrap_blob(Box::new(codec::enum_codec::StorageEnumBuild::new())));
			}
			return Some(self.maybe_wrap_blob(Box::new(codec::string::StorageStringBuild::new())));
		}

		if s.is_enum_skewed() {
			return Some(Box::new(codec::enum_codec::StorageEnumBuild::new()));
		}

		None
	}

	fn init(&mut self, count: usize) {
		self.values = vec![Value::Nil; count];
	}

	fn build(&mut self, i: usize, v: &Value) {
		self.values[i] = v.clone();
	}

	fn finish(&mut self) -> Box<dyn ColumnStorage> {
		Box::new(StorageScmer { values: std::mem::take(&mut self.values), stats: Stats::new(), blob_store: None })
	}
}

impl ColumnStorage for StorageScmer {
	fn get(&self, i: usize) -> Value {
		self.values[i].clone()
	}

	fn len(&self) -> usize {
		self.values.len()
	}

	fn compute_size(&self) -> usize {
		self.values.len() * 24 + 24
	}

	fn magic(&self) -> u8 {
		codec::MAGIC_BOXED
	}

	fn serialize(&self, out: &mut Vec<u8>) {
		out.push(self.magic());
		codec::write_u32(out, self.values.len() as u32);
		for v in &self.values {
			enum_codec::write_value(out, v);
		}
	}

	fn set(&mut self, i: usize, v: Value) -> bool {
		if i >= self.values.len() {
			return false;
		}
		self.values[i] = v;
		true
	}
}
