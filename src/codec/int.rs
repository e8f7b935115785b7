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

//! `StorageInt`: bit-packed integers around `offset = min`, `bitsize =
//! ceil(log2(max-min+1))`, with one extra code point reserved for null when
//! nulls are present.

use crate::bitpack::{bits_for_range, BitPacked};
use crate::codec::{self, CodecBuild, ColumnStorage, Reader};
use crate::value::Value;

pub struct StorageIntBuild {
	min: i64,
	max: i64,
	has_null: bool,
	count: usize,
	packed: Option<BitPacked>,
	offset: i64,
	null_code: u64,
	bitsize: u8,
}

impl StorageIntBuild {
	pub fn new() -> Self {
		StorageIntBuild {
			min: i64::MAX,
			max: i64::MIN,
			has_null: false,
			count: 0,
			packed: None,
			offset: 0,
			null_code: 0,
			bitsize: 1,
		}
	}
}

impl CodecBuild for StorageIntBuild {
	fn prepare(&mut self) {
		self.min = i64::MAX;
		self.max = i64::MIN;
		self.has_null = false;
	}

	fn scan(&mut self, _i: usize, v: &Value) {
		match v {
			Value::Int(x) => {
				if *x < self.min {
					self.min = *x;
				}
				if *x > self.max {
					self.max = *x;
				}
			}
			Value::Nil => self.has_null = true,
			_ => {}
		}
	}

	fn propose_compression(&mut self, _count: usize) -> Option<Box<dyn CodecBuild>> {
		// StorageInt is a terminal codec in the proposal chain.
		None
	}

	fn init(&mut self, count: usize) {
		self.count = count;
		if self.min > self.max {
			// all-null column; still needs one representable code point
			self.min = 0;
			self.max = 0;
		}
		self.offset = self.min;
		let range = (self.max - self.min) as u64;
		let mut bitsize = bits_for_range(range);
		if self.has_null {
			self.null_code = range + 1;
			bitsize = bits_for_range(self.null_code);
		}
		self.bitsize = bitsize;
		self.packed = Some(BitPacked::new(bitsize, count));
	}

	fn build(&mut self, i: usize, v: &Value) {
		let code = match v {
			Value::Int(x) => (*x - self.offset) as u64,
			Value::Nil => self.null_code,
			_ => self.null_code,
		};
		self.packed.as_mut().unwrap().set(i, code);
	}

	fn finish(&mut self) -> Box<dyn ColumnStorage> {
		Box::new(StorageInt {
			offset: self.offset,
			has_null: self.has_null,
			null_code: self.null_code,
			packed: self.packed.take().unwrap(),
		})
	}
}

pub struct StorageInt {
	offset: i64,
	has_null: bool,
	null_code: u64,
	packed: BitPacked,
}

impl StorageInt {
	pub fn deserialize(body: &[u8]) -> crate::error::Result<Box<dyn ColumnStorage>> {
		let mut r = Reader::new(body);
		let offset = r.read_i64()?;
		let has_null = r.read_u8()? != 0;
		let null_code = r.read_u64()?;
		let bitsize = r.read_u8()?;
		let len = r.read_u32()? as usize;
		let word_count = r.read_u32()? as usize;
		let mut words = Vec::with_capacity(word_count);
		for _ in 0..word_count {
			words.push(r.read_u64()?);
		}
		Ok(Box::new(StorageInt { offset, has_null, null_code, packed: BitPacked::from_raw(bitsize, len, words) }))
	}
}

impl ColumnStorage for StorageInt {
	fn get(&self, i: usize) -> Value {
		let code = self.packed.get(i);
		if self.has_null && code == self.null_code {
			Value::Nil
		} else {
			Value::Int(code as i64 + self.offset)
		}
	}

	fn len(&self) -> usize {
		self.packed.len()
	}

	fn compute_size(&self) -> usize {
		self.packed.words().len() * 8 + 24
	}

	fn magic(&self) -> u8 {
		codec::MAGIC_INT
	}

	fn serialize(&self, out: &mut Vec<u8>) {
		out.push(self.magic());
		codec::write_i64(out, self.offset);
		out.push(self.has_null as u8);
		codec::write_u64(out, self.null_code);
		out.push(self.packed.bitsize());
		codec::write_u32(out, self.packed.len() as u32);
		codec::write_u32(out, self.packed.words().len() as u32);
		for w in self.packed.words() {
			codec::write_u64(out, *w);
		}
	}
}
