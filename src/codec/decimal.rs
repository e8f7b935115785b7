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

//! `StorageDecimal`: a scaled integer plus a fixed exponent, for integer
//! columns that are uniform multiples of a power of ten or float columns
//! with a detectable decimal scale in `[-15, 15]`.

use crate::bitpack::{bits_for_range, BitPacked};
use crate::codec::{self, CodecBuild, ColumnStorage, Reader};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecimalKind {
	/// Original values were integers, uniform multiples of `10^exponent`.
	Int,
	/// Original values were floats with `exponent` significant decimal
	/// places.
	Float,
}

fn pow10(e: i32) -> f64 {
	10f64.powi(e)
}

pub struct StorageDecimalBuild {
	kind: DecimalKind,
	exponent: i32,
	min: i64,
	max: i64,
	has_null: bool,
	count: usize,
	offset: i64,
	bitsize: u8,
	null_code: u64,
	packed: Option<BitPacked>,
}

impl StorageDecimalBuild {
	pub fn new_int(exponent: i32) -> Self {
		Self::new(DecimalKind::Int, exponent)
	}

	pub fn new_float(exponent: i32) -> Self {
		Self::new(DecimalKind::Float, exponent)
	}

	fn new(kind: DecimalKind, exponent: i32) -> Self {
		StorageDecimalBuild {
			kind,
			exponent,
			min: i64::MAX,
			max: i64::MIN,
			has_null: false,
			count: 0,
			offset: 0,
			bitsize: 1,
			null_code: 0,
			packed: None,
		}
	}

	fn scaled_of(&self, v: &Value) -> Option<i64> {
		match (self.kind, v) {
			(DecimalKind::Int, Value::Int(x)) => Some(x / 10i64.pow(self.exponent.max(0) as u32)),
			(DecimalKind::Float, Value::Float(f)) => Some((f * pow10(self.exponent)).round() as i64),
			(DecimalKind::Float, Value::Int(x)) => Some((*x as f64 * pow10(self.exponent)).round() as i64),
			_ => None,
		}
	}
}

impl CodecBuild for StorageDecimalBuild {
	fn prepare(&mut self) {
		self.min = i64::MAX;
		self.max = i64::MIN;
		self.has_null = false;
	}

	fn scan(&mut self, _i: usize, v: &Value) {
		if v.is_nil() {
			self.has_null = true;
			return;
		}
		if let Some(s) = self.scaled_of(v) {
			if s < self.min {
				self.min = s;
			}
			if s > self.max {
				self.max = s;
			}
		}
	}

	fn propose_compression(&mut self, _count: usize) -> Option<Box<dyn CodecBuild>> {
		None
	}

	fn init(&mut self, count: usize) {
		self.count = count;
		if self.min > self.max {
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
		let code = match self.scaled_of(v) {
			Some(s) => (s - self.offset) as u64,
			None => self.null_code,
		};
		self.packed.as_mut().unwrap().set(i, code);
	}

	fn finish(&mut self) -> Box<dyn ColumnStorage> {
		Box::new(StorageDecimal {
			kind: self.kind,
			exponent: self.exponent,
			offset: self.offset,
			has_null: self.has_null,
			null_code: self.null_code,
			packed: self.packed.take().unwrap(),
		})
	}
}

pub struct StorageDecimal {
	kind: DecimalKind,
	exponent: i32,
	offset: i64,
	has_null: bool,
	null_code: u64,
	packed: BitPacked,
}

impl StorageDecimal {
	pub fn deserialize(body: &[u8]) -> crate::error::Result<Box<dyn ColumnStorage>> {
		let mut r = Reader::new(body);
		let kind = if r.read_u8()? == 0 { DecimalKind::Int } else { DecimalKind::Float };
		let exponent = r.read_i64()? as i32;
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
		Ok(Box::new(StorageDecimal {
			kind,
			exponent,
			offset,
			has_null,
			null_code,
			packed: BitPacked::from_raw(bitsize, len, words),
		}))
	}
}

impl ColumnStorage for StorageDecimal {
	fn get(&self, i: usize) -> Value {
		let code = self.packed.get(i);
		if self.has_null && code == self.null_code {
			return Value::Nil;
		}
		let scaled = code as i64 + self.offset;
		match self.kind {
			DecimalKind::Int => Value::Int(scaled * 10i64.pow(self.exponent.max(0) as u32)),
			DecimalKind::Float => Value::Float(scaled as f64 / pow10(self.exponent)),
		}
	}

	fn len(&self) -> usize {
		self.packed.len()
	}

	fn compute_size(&self) -> usize {
		self.packed.words().len() * 8 + 24
	}

	fn magic(&self) -> u8 {
		codec::MAGIC_DECIMAL
	}

	fn serialize(&self, out: &mut Vec<u8>) {
		out.push(self.magic());
		out.push(matches!(self.kind, DecimalKind::Float) as u8);
		codec::write_i64(out, self.exponent as i64);
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

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn int_multiples_of_ten_round_trip() {
		let values: Vec<Value> = (0..50).map(|i| Value::Int(i * 10)).collect();
		let mut b = StorageDecimalBuild::new_int(1);
		b.prepare();
		for (i, v) in values.iter().enumerate() {
			b.scan(i, v);
		}
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
	fn float_scale_round_trips() {
		let values: Vec<Value> = (0..50).map(|i| Value::Float((i as f64) * 0.01)).collect();
		let mut b = StorageDecimalBuild::new_float(2);
		b.prepare();
		for (i, v) in values.iter().enumerate() {
			b.scan(i, v);
		}
		b.init(values.len());
		for (i, v) in values.iter().enumerate() {
			b.build(i, v);
		}
		let col = b.finish();
		for (i, v) in values.iter().enumerate() {
			match (&col.get(i), v) {
				(Value::Float(a), Value::Float(b)) => assert!((a - b).abs() < 1e-9),
				_ => panic!("unexpected"),
			}
		}
	}
}
