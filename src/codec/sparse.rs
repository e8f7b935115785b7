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

//! `StorageSparse`: storage for columns dominated by nulls.
//! Above a 50% null share rows are kept as `(row_id, value)` pairs found by
//! binary search; between roughly 13% and 50% a presence bitmap wraps an
//! inner codec built only over the non-null values, to keep the bit-packed
//! inner codec's value range tight.

use crate::codec::{self, CodecBuild, ColumnStorage, Reader};
use crate::value::Value;

/// Null share above which a pure `(row_id, value)` list beats bitmap+inner.
pub const PURE_SPARSE_NULL_SHARE: f64 = 0.5;
/// Null share below which sparse storage is not worth proposing at all.
pub const MIN_SPARSE_NULL_SHARE: f64 = 0.13;

enum Mode {
	Pure,
	DenseWrap,
}

pub struct StorageSparseBuild {
	mode: Mode,
	count: usize,
	pairs: Vec<(u32, Value)>,
	presence: Vec<bool>,
	non_null_values: Vec<Value>,
}

impl StorageSparseBuild {
	pub fn new_pure() -> Self {
		StorageSparseBuild { mode: Mode::Pure, count: 0, pairs: Vec::new(), presence: Vec::new(), non_null_values: Vec::new() }
	}

	pub fn new_dense_wrap() -> Self {
		StorageSparseBuild {
			mode: Mode::DenseWrap,
			count: 0,
			pairs: Vec::new(),
			presence: Vec::new(),
			non_null_values: Vec::new(),
		}
	}
}

impl CodecBuild for StorageSparseBuild {
	fn prepare(&mut self) {}
	fn scan(&mut self, _i: usize, _v: &Value) {}

	fn propose_compression(&mut self, _count: usize) -> Option<Box<dyn CodecBuild>> {
		None
	}

	fn init(&mut self, count: usize) {
		self.count = count;
		if let Mode::DenseWrap = self.mode {
			self.presence = vec![false; count];
		}
	}

	fn build(&mut self, i: usize, v: &Value) {
		match self.mode {
			Mode::Pure => {
				if !v.is_nil() {
					self.pairs.push((i as u32, v.clone()));
				}
			}
			Mode::DenseWrap => {
				if !v.is_nil() {
					self.presence[i] = true;
					self.non_null_values.push(v.clone());
				}
			}
		}
	}

	fn finish(&mut self) -> Box<dyn ColumnStorage> {
		match self.mode {
			Mode::Pure => Box::new(StorageSparse::Pure { count: self.count, pairs: std::mem::take(&mut self.pairs) }),
			Mode::DenseWrap => {
				let inner = codec::build_column(self.non_null_values.iter(), self.non_null_values.len());
				Box::new(StorageSparse::DenseWrap { presence: std::mem::take(&mut self.presence), inner })
			}
		}
	}
}

pub enum StorageSparse {
	Pure { count: usize, pairs: Vec<(u32, Value)> },
	DenseWrap { presence: Vec<bool>, inner: Box<dyn ColumnStorage> },
}

const MODE_PURE: u8 = 0;
const MODE_DENSE_WRAP: u8 = 1;

impl StorageSparse {
	pub fn deserialize(body: &[u8]) -> crate::error::Result<Box<dyn ColumnStorage>> {
		let mut r = Reader::new(body);
		match r.read_u8()? {
			MODE_PURE => {
				let count = r.read_u32()? as usize;
				let pair_count = r.read_u32()? as usize;
				let mut pairs = Vec::with_capacity(pair_count);
				for _ in 0..pair_count {
					let row = r.read_u32()?;
					let v = super::enum_codec::read_value(&mut r)?;
					pairs.push((row, v));
				}
				Ok(Box::new(StorageSparse::Pure { count, pairs }))
			}
			MODE_DENSE_WRAP => {
				let len = r.read_u32()? as usize;
				let mut presence = Vec::with_capacity(len);
				for _ in 0..len {
					presence.push(r.read_u8()? != 0);
				}
				let inner_bytes = r.read_bytes()?;
				let inner = codec::decode(inner_bytes)?;
				Ok(Box::new(StorageSparse::DenseWrap { presence, inner }))
			}
			other => Err(crate::error::Error::corrupt("<column>", format!("unknown sparse mode {}", other))),
		}
	}
}

impl ColumnStorage for StorageSparse {
	fn get(&self, i: usize) -> Value {
		match self {
			StorageSparse::Pure { pairs, .. } => match pairs.binary_search_by_key(&(i as u32), |(r, _)| *r) {
				Ok(pos) => pairs[pos].1.clone(),
				Err(_) => Value::Nil,
			},
			StorageSparse::DenseWrap { presence, inner } => {
				if !presence[i] {
					return Value::Nil;
				}
				let rank = presence[..i].iter().filter(|p| **p).count();
				inner.get(rank)
			}
		}
	}

	fn len(&self) -> usize {
		match self {
			StorageSparse::Pure { count, .. } => *count,
			StorageSparse::DenseWrap { presence, .. } => presence.len(),
		}
	}

	fn compute_size(&self) -> usize {
		match self {
			StorageSparse::Pure { pairs, .. } => pairs.len() * 16 + 24,
			StorageSparse::DenseWrap { presence, inner } => presence.len() + inner.compute_size() + 24,
		}
	}

	fn magic(&self) -> u8 {
		codec::MAGIC_SPARSE
	}

	fn serialize(&self, out: &mut Vec<u8>) {
		out.push(self.magic());
		match self {
			StorageSparse::Pure { count, pairs } => {
				out.push(MODE_PURE);
				codec::write_u32(out, *count as u32);
				codec::write_u32(out, pairs.len() as u32);
				for (row, v) in pairs {
					codec::write_u32(out, *row);
					super::enum_codec::write_value(out, v);
				}
			}
			StorageSparse::DenseWrap { presence, inner } => {
				out.push(MODE_DENSE_WRAP);
				codec::write_u32(out, presence.len() as u32);
				for p in presence {
					out.push(*p as u8);
				}
				let mut inner_bytes = Vec::new();
				inner.serialize(&mut inner_bytes);
				codec::write_bytes(out, &inner_bytes);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pure_sparse_round_trip() {
		let values: Vec<Value> = (0..200).map(|i| if i % 10 == 0 { Value::Int(i as i64) } else { Value::Nil }).collect();
		let mut b = StorageSparseBuild::new_pure();
		b.init(values.len());
		for (i, v) in values.iter().enumerate() {
			b.build(i, v);
		}
		let col = b.finish();
		for (i, v) in values.iter().enumerate() {
			assert_eq!(&col.get(i), v);
		}
	}

	#[test]
	fn dense_wrap_round_trip() {
		let values: Vec<Value> =
			(0..200).map(|i| if i % 4 == 0 { Value::Nil } else { Value::Int(i as i64 * 2) }).collect();
		let mut b = StorageSparseBuild::new_dense_wrap();
		b.init(values.len());
		for (i, v) in values.iter().enumerate() {
			b.build(i, v);
		}
		let col = b.finish();
		for (i, v) in values.iter().enumerate() {
			assert_eq!(&col.get(i), v);
		}
	}

	#[test]
	fn serialize_round_trip_both_modes() {
		let values: Vec<Value> = (0..100).map(|i| if i % 3 == 0 { Value::Int(i as i64) } else { Value::Nil }).collect();
		let mut b = StorageSparseBuild::new_dense_wrap();
		b.init(values.len());
		for (i, v) in values.iter().enumerate() {
			b.build(i, v);
		}
		let col = b.finish();
		let mut buf = Vec::new();
		col.serialize(&mut buf);
		let decoded = codec::decode(&buf).unwrap();
		for (i, v) in values.iter().enumerate() {
			assert_eq!(&decoded.get(i), v);
		}
	}
}
