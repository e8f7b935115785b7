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

//! `StorageString`: a dictionary-coded or raw byte-buffer string column.
//! The first 100 distinct non-null values seen during `scan`
//! decide the mode: fewer than 100 distinct values anywhere in the column
//! builds a dictionary; otherwise rows are stored as `(start, len)` spans
//! into one shared byte buffer.

use std::collections::HashMap;
use std::sync::Arc;

use crate::bitpack::{bits_for_range, BitPacked};
use crate::codec::{self, CodecBuild, ColumnStorage, Reader};
use crate::value::Value;

const PROBE_CAP: usize = 100;
const NULL_SENTINEL: u32 = u32::MAX;

pub struct StorageStringBuild {
	probe: HashMap<Arc<str>, ()>,
	dict_mode: Option<bool>,
	// dictionary mode accumulators
	dict: Vec<Arc<str>>,
	dict_index: HashMap<Arc<str>, u32>,
	codes: Vec<u32>,
	// raw mode accumulators
	buffer: Vec<u8>,
	spans: Vec<(u32, u32)>,
	count: usize,
}

impl StorageStringBuild {
	pub fn new() -> Self {
		StorageStringBuild {
			probe: HashMap::new(),
			dict_mode: None,
			dict: Vec::new(),
			dict_index: HashMap::new(),
			codes: Vec::new(),
			buffer: Vec::new(),
			spans: Vec::new(),
			count: 0,
		}
	}

	/// Sum, over the probed distinct values, of how many extra rows each
	/// value's longest common prefix with its neighbours would save. A
	/// cheap proxy for whether a prefix codec is worth building.
	fn prefix_occurrence_score(&self) -> usize {
		let mut values: Vec<&Arc<str>> = self.probe.keys().collect();
		values.sort();
		let mut score = 0usize;
		for w in values.windows(2) {
			let a = w[0].as_bytes();
			let b = w[1].as_bytes();
			score += a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count();
		}
		score
	}
}

impl CodecBuild for StorageStringBuild {
	fn prepare(&mut self) {
		self.probe.clear();
	}

	fn scan(&mut self, _i: usize, v: &Value) {
		if let Value::Str(s) = v {
			if self.probe.len() < PROBE_CAP && !self.probe.contains_key(s) {
				self.probe.insert(s.clone(), ());
			}
		}
	}

	fn propose_compression(&mut self, count: usize) -> Option<Box<dyn CodecBuild>> {
		if self.dict_mode.is_some() {
			return None;
		}
		self.dict_mode = Some(self.probe.len() < PROBE_CAP);
		#[cfg(feature = "prefix-codec")]
		{
			let threshold = count / 8 + 100;
			if self.prefix_occurrence_score() > threshold {
				return Some(Box::new(crate::codec::prefix::StoragePrefixBuild::new()));
			}
		}
		#[cfg(not(feature = "prefix-codec"))]
		{
			let _ = count;
			let _ = self.prefix_occurrence_score();
		}
		None
	}

	fn init(&mut self, count: usize) {
		self.count = count;
		if self.dict_mode == Some(true) {
			self.codes = vec![0; count];
		} else {
			self.spans = vec![(NULL_SENTINEL, 0); count];
		}
	}

	fn build(&mut self, i: usize, v: &Value) {
		match (self.dict_mode, v) {
			(Some(true), Value::Str(s)) => {
				let dict = &mut self.dict;
				let code = *self.dict_index.entry(s.clone()).or_insert_with(|| {
					dict.push(s.clone());
					(dict.len() - 1) as u32
				});
				self.codes[i] = code;
			}
			(Some(true), _) => {
				// null: reserve one extra dictionary slot lazily at finish()
				self.codes[i] = NULL_SENTINEL;
			}
			(Some(false), Value::Str(s)) => {
				let start = self.buffer.len() as u32;
				self.buffer.extend_from_slice(s.as_bytes());
				self.spans[i] = (start, s.len() as u32);
			}
			(Some(false), _) => {
				self.spans[i] = (NULL_SENTINEL, 0);
			}
			(None, _) => unreachable!("init always sets dict_mode"),
		}
	}

	fn finish(&mut self) -> Box<dyn ColumnStorage> {
		if self.dict_mode == Some(true) {
			let null_code = self.dict.len() as u32;
			let has_null = self.codes.iter().any(|c| *c == NULL_SENTINEL);
			let bitsize = bits_for_range(if has_null { null_code as u64 } else { (null_code.max(1) - 1) as u64 });
			let mut packed = BitPacked::new(bitsize, self.codes.len());
			for (i, c) in self.codes.iter().enumerate() {
				let code = if *c == NULL_SENTINEL { null_code } else { *c };
				packed.set(i, code as u64);
			}
			Box::new(StorageString::Dict {
				dict: std::mem::take(&mut self.dict),
				has_null,
				null_code: null_code as u64,
				codes: packed,
			})
		} else {
			Box::new(StorageString::Raw {
				buffer: std::mem::take(&mut self.buffer),
				spans: std::mem::take(&mut self.spans),
			})
		}
	}
}

pub enum StorageString {
	Dict { dict: Vec<Arc<str>>, has_null: bool, null_code: u64, codes: BitPacked },
	Raw { buffer: Vec<u8>, spans: Vec<(u32, u32)> },
}

const MODE_DICT: u8 = 0;
const MODE_RAW: u8 = 1;

impl StorageString {
	pub fn deserialize(body: &[u8]) -> crate::error::Result<Box<dyn ColumnStorage>> {
		let mut r = Reader::new(body);
		match r.read_u8()? {
			MODE_DICT => {
				let dict_len = r.read_u32()? as usize;
				let mut dict = Vec::with_capacity(dict_len);
				for _ in 0..dict_len {
					let bytes = r.read_bytes()?;
					dict.push(Arc::<str>::from(String::from_utf8_lossy(bytes).into_owned()));
				}
				let has_null = r.read_u8()? != 0;
				let null_code = r.read_u64()?;
				let bitsize = r.read_u8()?;
				let len = r.read_u32()? as usize;
				let word_count = r.read_u32()? as usize;
				let mut words = Vec::with_capacity(word_count);
				for _ in 0..word_count {
					words.push(r.read_u64()?);
				}
				Ok(Box::new(StorageString::Dict {
					dict,
					has_null,
					null_code,
					codes: BitPacked::from_raw(bitsize, len, words),
				}))
			}
			MODE_RAW => {
				let buffer = r.read_bytes()?.to_vec();
				let span_count = r.read_u32()? as usize;
				let mut spans = Vec::with_capacity(span_count);
				for _ in 0..span_count {
					spans.push((r.read_u32()?, r.read_u32()?));
				}
				Ok(Box::new(StorageString::Raw { buffer, spans }))
			}
			other => Err(crate::error::Error::corrupt("<column>", format!("unknown string mode {}", other))),
		}
	}
}

impl ColumnStorage for StorageString {
	fn get(&self, i: usize) -> Value {
		match self {
			StorageString::Dict { dict, has_null, null_code, codes } => {
				let code = codes.get(i);
				if *has_null && code == *null_code {
					Value::Nil
				} else {
					Value::Str(dict[code as usize].clone())
				}
			}
			StorageString::Raw { buffer, spans } => {
				let (start, len) = spans[i];
				if start == NULL_SENTINEL {
					Value::Nil
				} else {
					let bytes = &buffer[start as usize..start as usize + len as usize];
					Value::Str(Arc::from(String::from_utf8_lossy(bytes).into_owned()))
				}
			}
		}
	}

	fn len(&self) -> usize {
		match self {
			StorageString::Dict { codes, .. } => codes.len(),
			StorageString::Raw { spans, .. } => spans.len(),
		}
	}

	fn compute_size(&self) -> usize {
		match self {
			StorageString::Dict { dict, codes, .. } => {
				dict.iter().map(|s| s.len()).sum::<usize>() + codes.words().len() * 8 + 24
			}
			StorageString::Raw { buffer, spans } => buffer.len() + spans.len() * 8 + 24,
		}
	}

	fn magic(&self) -> u8 {
		codec::MAGIC_STRING
	}

	fn serialize(&self, out: &mut Vec<u8>) {
		out.push(self.magic());
		match self {
			StorageString::Dict { dict, has_null, null_code, codes } => {
				out.push(MODE_DICT);
				codec::write_u32(out, dict.len() as u32);
				for s in dict {
					codec::write_bytes(out, s.as_bytes());
				}
				out.push(*has_null as u8);
				codec::write_u64(out, *null_code);
				out.push(codes.bitsize());
				codec::write_u32(out, codes.len() as u32);
				codec::write_u32(out, codes.words().len() as u32);
				for w in codes.words() {
					codec::write_u64(out, *w);
				}
			}
			StorageString::Raw { buffer, spans } => {
				out.push(MODE_RAW);
				codec::write_bytes(out, buffer);
				codec::write_u32(out, spans.len() as u32);
				for (s, l) in spans {
					codec::write_u32(out, *s);
					codec::write_u32(out, *l);
				}
			}
		}
	}
}
