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

//! `StorageFloat`: plain 64-bit float array with a NaN-coded null sentinel.

use crate::codec::{self, CodecBuild, ColumnStorage, Reader};
use crate::value::Value;

const NULL_SENTINEL: u64 = 0x7ff8_0000_0000_0001; // a quiet NaN payload reserved for null

pub struct StorageFloatBuild {
	values: Vec<f64>,
}

impl StorageFloatBuild {
	pub fn new() -> Self {
		StorageFloatBuild { values: Vec::new() }
	}
}

impl CodecBuild for StorageFloatBuild {
	fn prepare(&mut self) {}
	fn scan(&mut self, _i: usize, _v: &Value) {}

	fn propose_compression(&mut self, _count: usize) -> Option<Box<dyn CodecBuild>> {
		None
	}

	fn init(&mut self, count: usize) {
		self.values = vec![0.0; count];
	}

	fn build(&mut self, i: usize, v: &Value) {
		self.values[i] = match v {
			Value::Float(f) => *f,
			Value::Int(x) => *x as f64,
			_ => f64::from_bits(NULL_SENTINEL),
		};
	}

	fn finish(&mut self) -> Box<dyn ColumnStorage> {
		Box::new(StorageFloat { values: std::mem::take(&mut self.values) })
	}
}

pub struct StorageFloat {
	values: Vec<f64>,
}

impl StorageFloat {
	pub fn deserialize(body: &[u8]) -> crate::error::Result<Box<dyn ColumnStorage>> {
		let mut r = Reader::new(body);
		let len = r.read_u32()? as usize;
		let mut values = Vec::with_capacity(len);
		for _ in 0..len {
			values.push(r.read_f64()?);
		}
		Ok(Box::new(StorageFloat { values }))
	}
}

impl ColumnStorage for StorageFloat {
	fn get(&self, i: usize) -> Value {
		let bits = self.values[i].to_bits();
		if bits == NULL_SENTINEL {
			Value::Nil
		} else {
			Value::Float(self.values[i])
		}
	}

	fn len(&self) -> usize {
		self.values.len()
	}

	fn compute_size(&self) -> usize {
		self.values.len() * 8 + 24
	}

	fn magic(&self) -> u8 {
		codec::MAGIC_FLOAT
	}

	fn serialize(&self, out: &mut Vec<u8>) {
		out.push(self.magic());
		codec::write_u32(out, self.values.len() as u32);
		for v in &self.values {
			codec::write_f64(out, *v);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trip_with_nulls() {
		let values: Vec<Value> =
			(0..30).map(|i| if i % 5 == 0 { Value::Nil } else { Value::Float(i as f64 * 1.5) }).collect();
		let col = codec::build_column(values.iter(), values.len());
		for (i, v) in values.iter().enumerate() {
			assert_eq!(&col.get(i), v);
		}
	}
}
