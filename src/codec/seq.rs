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

//! `StorageSeq`: an arithmetic sequence (start, stride, length) with no
//! per-row storage at all. Since every cell is reconstructed from `start`
//! and `stride` alone, this codec is only proposed for a column where every
//! adjacent pair sits on exactly the same stride — a single non-conforming
//! row would otherwise silently read back the wrong value.

use crate::codec::{self, CodecBuild, ColumnStorage, Reader};
use crate::value::Value;

pub struct StorageSeqBuild {
	start: i64,
	stride: i64,
	len: usize,
	nulls: Vec<bool>,
	has_any_null: bool,
}

impl StorageSeqBuild {
	pub fn new() -> Self {
		StorageSeqBuild { start: 0, stride: 0, len: 0, nulls: Vec::new(), has_any_null: false }
	}
}

impl CodecBuild for StorageSeqBuild {
	fn prepare(&mut self) {}
	fn scan(&mut self, _i: usize, _v: &Value) {}

	fn propose_compression(&mut self, _count: usize) -> Option<Box<dyn CodecBuild>> {
		None
	}

	fn init(&mut self, count: usize) {
		self.len = count;
		self.nulls = vec![false; count];
	}

	fn build(&mut self, i: usize, v: &Value) {
		match v {
			Value::Int(x) => {
				if i == 0 {
					self.start = *x;
				} else if i == 1 {
					self.stride = x - self.start;
				}
			}
			Value::Nil => {
				self.has_any_null = true;
				self.nulls[i] = true;
			}
			_ => {}
		}
	}

	fn finish(&mut self) -> Box<dyn ColumnStorage> {
		Box::new(StorageSeq {
			start: self.start,
			stride: self.stride,
			len: self.len,
			nulls: if self.has_any_null { Some(std::mem::take(&mut self.nulls)) } else { None },
		})
	}
}

pub struct StorageSeq {
	start: i64,
	stride: i64,
	len: usize,
	nulls: Option<Vec<bool>>,
}

impl StorageSeq {
	pub fn deserialize(body: &[u8]) -> crate::error::Result<Box<dyn ColumnStorage>> {
		let mut r = Reader::new(body);
		let start = r.read_i64()?;
		let stride = r.read_i64()?;
		let len = r.read_u32()? as usize;
		let has_nulls = r.read_u8()? != 0;
		let nulls = if has_nulls {
			let mut v = Vec::with_capacity(len);
			for _ in 0..len {
				v.push(r.read_u8()? != 0);
			}
			Some(v)
		} else {
			None
		};
		Ok(Box::new(StorageSeq { start, stride, len, nulls }))
	}
}

impl ColumnStorage for StorageSeq {
	fn get(&self, i: usize) -> Value {
		if let Some(nulls) = &self.nulls {
			if nulls[i] {
				return Value::Nil;
			}
		}
		Value::Int(self.start + self.stride * i as i64)
	}

	fn len(&self) -> usize {
		self.len
	}

	fn compute_size(&self) -> usize {
		24 + self.nulls.as_ref().map_or(0, |n| n.len())
	}

	fn magic(&self) -> u8 {
		codec::MAGIC_SEQ
	}

	fn serialize(&self, out: &mut Vec<u8>) {
		out.push(self.magic());
		codec::write_i64(out, self.start);
		codec::write_i64(out, self.stride);
		codec::write_u32(out, self.len as u32);
		out.push(self.nulls.is_some() as u8);
		if let Some(nulls) = &self.nulls {
			for n in nulls {
				out.push(*n as u8);
			}
		}
	}
}
