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

//! `StorageEnum`: a small value table plus a bit-packed code word per row,
//! proposed when a column's distribution is skewed enough that a handful of
//! distinct values cover nearly every row.

use crate::bitpack::{bits_for_range, BitPacked};
use crate::codec::{self, CodecBuild, ColumnStorage, Reader};
use crate::value::Value;

const PROBE_CAP: usize = 32;

/// Fraction of rows the most common value must cover, among the probed
/// sample, before `StorageEnum` is worth proposing over a plain codec.
const SKEW_THRESHOLD: f64 = 0.9;

pub struct StorageEnumBuild {
	probe_values: Vec<Value>,
	probe_counts: Vec<usize>,
	probe_rows: usize,
	dict: Vec<Value>,
	codes: Vec<u32>,
	count: usize,
}

impl StorageEnumBuild {
	pub fn new() -> Self {
		StorageEnumBuild {
			probe_values: Vec::new(),
			probe_counts: Vec::new(),
			probe_rows: 0,
			dict: Vec::new(),
			codes: Vec::new(),
			count: 0,
		}
	}

	fn is_skewed(&self) -> bool {
		if self.probe_rows == 0 || self.probe_values.len() > PROBE_CAP {
			return false;
		}
		let top = self.probe_counts.iter().copied().max().unwrap_or(0);
		top as f64 >= SKEW_THRESHOLD * self.probe_rows as f64
	}

	fn dict_index(&mut self, v: &Value) -> u32 {
		if let Some(pos) = self.dict.iter().position(|x| x == v) {
			pos as u32
		} else {
			self.dict.push(v.clone());
			(self.dict.len() - 1) as u32
		}
	}
}

/// Whether this column's statistics make `StorageEnum` worth proposing,
/// used by other codecs' `propose_compression`.
pub fn probe_is_skewed<'a, I: Iterator<Item = &'a Value>>(rows: I) -> bool {
	let mut b = StorageEnumBuild::new();
	for (i, v) in rows.enumerate() {
		b.scan(i, v);
	}
	b.is_skewed()
}

impl CodecBuild for StorageEnumBuild {
	fn prepare(&mut self) {
		self.probe_values.clear();
		self.probe_counts.clear();
		self.probe_rows = 0;
	}

	fn scan(&mut self, _i: usize, v: &Value) {
		self.probe_rows += 1;
		if self.probe_values.len() >= PROBE_CAP {
			return;
		}
		if let Some(pos) = self.probe_values.iter().position(|x| x == v) {
			self.probe_counts[pos] += 1;
		} else {
			self.probe_values.push(v.clone());
			self.probe_counts.push(1);
		}
	}

	fn propose_compression(&mut self, _count: usize) -> Option<Box<dyn CodecBuild>> {
		None
	}

	fn init(&mut self, count: usize) {
		self.count = count;
		self.codes = vec![0; count];
	}

	fn build(&mut self, i: usize, v: &Value) {
		self.codes[i] = self.dict_index(v);
	}

	fn finish(&mut self) -> Box<dyn ColumnStorage> {
		let bitsize = bits_for_range((self.dict.len().max(1) - 1) as u64);
		let mut packed = BitPacked::new(bitsize, self.codes.len());
		for (i, c) in self.codes.iter().enumerate() {
			packed.set(i, *c as u64);
		}
		Box::new(StorageEnum { dict: std::mem::take(&mut self.dict), codes: packed })
	}
}

pub struct StorageEnum {
	dict: Vec<Value>,
	codes: BitPacked,
}

impl StorageEnum {
	pub fn deserialize(body: &[u8]) -> crate::error::Result<Box<dyn ColumnStorage>> {
		let mut r = Reader::new(body);
		let dict_len = r.read_u32()? as usize;
		let mut dict = Vec::with_capacity(dict_len);
		for _ in 0..dict_len {
			dict.push(read_value(&mut r)?);
		}
		let bitsize = r.read_u8()?;
		let len = r.read_u32()? as usize;
		let word_count = r.read_u32()? as usize;
		let mut words = Vec::with_capacity(word_count);
		for _ in 0..word_count {
			words.push(r.read_u64()?);
		}
		Ok(Box::new(StorageEnum { dict, codes: BitPacked::from_raw(bitsize, len, words) }))
	}
}

const VTAG_NIL: u8 = 0;
const VTAG_BOOL: u8 = 1;
const VTAG_INT: u8 = 2;
const VTAG_FLOAT: u8 = 3;
const VTAG_STR: u8 = 4;

pub(crate) fn write_value(out: &mut Vec<u8>, v: &Value) {
	match v {
		Value::Nil => out.push(VTAG_NIL),
		Value::Bool(b) => {
			out.push(VTAG_BOOL);
			out.push(*b as u8);
		}
		Value::Int(x) => {
			out.push(VTAG_INT);
			codec::write_i64(out, *x);
		}
		Value::Float(f) => {
			out.push(VTAG_FLOAT);
			codec::write_f64(out, *f);
		}
		Value::Str(s) => {
			out.push(VTAG_STR);
			codec::write_bytes(out, s.as_bytes());
		}
		other => panic!("StorageEnum cannot hold a {:?} dictionary entry", other),
	}
}

pub(crate) fn read_value(r: &mut Reader) -> crate::error::Result<Value> {
	Ok(match r.read_u8()? {
		VTAG_NIL => Value::Nil,
		VTAG_BOOL => Value::Bool(r.read_u8()? != 0),
		VTAG_INT => Value::Int(r.read_i64()?),
		VTAG_FLOAT => Value::Float(r.read_f64()?),
		VTAG_STR => Value::str(String::from_utf8_lossy(r.read_bytes()?).into_owned()),
		other => return Err(crate::error::Error::corrupt("<column>", format!("unknown enum value tag {}", other))),
	})
}

impl ColumnStorage for StorageEnum {
	fn get(&self, i: usize) -> Value {
		self.dict[self.codes.get(i) as usize].clone()
	}

	fn len(&self) -> usize {
		self.codes.len()
	}

	fn compute_size(&self) -> usize {
		self.dict.len() * 16 + self.codes.words().len() * 8 + 24
	}

	fn magic(&self) -> u8 {
		codec::MAGIC_ENUM
	}

	fn serialize(&self, out: &mut Vec<u8>) {
		out.push(self.magic());
		codec::write_u32(out, self.dict.len() as u32);
		for v in &self.dict {
			write_value(out, v);
		}
		out.push(self.codes.bitsize());
		codec::write_u32(out, self.codes.len() as u32);
		codec::write_u32(out, self.codes.words().len() as u32);
		for w in self.codes.words() {
			codec::write_u64(out, *w);
		}
	}
}
