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

//! `StoragePrefix`: a front-coded string dictionary for columns whose
//! distinct values share long common prefixes (paths, hostnames, sorted
//! identifiers). Gated behind the `prefix-codec` feature: the on-disk layout
//! here is this crate's own choice rather than a carried-over format, so it
//! stays opt-in until it has seen real use.
//!
//! The dictionary is stored sorted, front-coded against its predecessor
//! (`shared_len` bytes reused, only the remaining suffix written out). Row
//! codes index into that sorted dictionary exactly the way `StorageString`'s
//! dictionary mode does.

use std::collections::HashMap;
use std::sync::Arc;

use crate::bitpack::{bits_for_range, BitPacked};
use crate::codec::{self, CodecBuild, ColumnStorage, Reader};
use crate::value::Value;

const NULL_SENTINEL: u32 = u32::MAX;

pub struct StoragePrefixBuild {
	seen: HashMap<Arc<str>, ()>,
	dict_index: HashMap<Arc<str>, u32>,
	dict: Vec<Arc<str>>,
	codes: Vec<u32>,
	count: usize,
}

impl StoragePrefixBuild {
	pub fn new() -> Self {
		StoragePrefixBuild { seen: HashMap::new(), dict_index: HashMap::new(), dict: Vec::new(), codes: Vec::new(), count: 0 }
	}
}

impl CodecBuild for StoragePrefixBuild {
	fn prepare(&mut self) {
		self.seen.clear();
	}

	fn scan(&mut self, _i: usize, v: &Value) {
		if let Value::Str(s) = v {
			self.seen.entry(s.clone()).or_insert(());
		}
	}

	fn propose_compression(&mut self, _count: usize) -> Option<Box<dyn CodecBuild>> {
		// Terminal: once chosen by string.rs's heuristic, always build.
		None
	}

	fn init(&mut self, count: usize) {
		self.count = count;
		self.codes = vec![NULL_SENTINEL; count];
		let mut sorted: Vec<Arc<str>> = self.seen.keys().cloned().collect();
		sorted.sort();
		self.dict = sorted;
		self.dict_index = self.dict.iter().cloned().enumerate().map(|(i, s)| (s, i as u32)).collect();
	}

	fn build(&mut self, i: usize, v: &Value) {
		if let Value::Str(s) = v {
			self.codes[i] = *self.dict_index.get(s).expect("dictionary built from a full scan of the same rows");
		}
	}

	fn finish(&mut self) -> Box<dyn ColumnStorage> {
		let null_code = self.dict.len() as u32;
		let has_null = self.codes.iter().any(|c| *c == NULL_SENTINEL);
		let bitsize = bits_for_range(if has_null { null_code as u64 } else { (null_code.max(1) - 1) as u64 });
		let mut packed = BitPacked::new(bitsize, self.codes.len());
		for (i, c) in self.codes.iter().enumerate() {
			let code = if *c == NULL_SENTINEL { null_code } else { *c };
			packed.set(i, code as u64);
		}
		// front-code the sorted dictionary
		let mut shared_lens = Vec::with_capacity(self.dict.len());
		let mut suffixes = Vec::with_capacity(self.dict.len());
		let mut prev: &str = "";
		for s in &self.dict {
			let shared = prev.as_bytes().iter().zip(s.as_bytes().iter()).take_while(|(a, b)| a == b).count();
			shared_lens.push(shared as u32);
			suffixes.push(s[shared..].to_string());
			prev = s;
		}
		Box::new(StoragePrefix { shared_lens, suffixes, has_null, null_code: null_code as u64, codes: packed })
	}
}

pub struct StoragePrefix {
	shared_lens: Vec<u32>,
	suffixes: Vec<String>,
	has_null: bool,
	null_code: u64,
	codes: BitPacked,
}

impl StoragePrefix {
	fn rebuild_dict(&self) -> Vec<Arc<str>> {
		let mut out = Vec::with_capacity(self.suffixes.len());
		let mut prev = String::new();
		for (shared, suffix) in self.shared_lens.iter().zip(self.suffixes.iter()) {
			let mut s = prev[..*shared as usize].to_string();
			s.push_str(suffix);
			out.push(Arc::<str>::from(s.as_str()));
			prev = s;
		}
		out
	}

	pub fn deserialize(body: &[u8]) -> crate::error::Result<Box<dyn ColumnStorage>> {
		let mut r = Reader::new(body);
		let dict_len = r.read_u32()? as usize;
		let mut shared_lens = Vec::with_capacity(dict_len);
		let mut suffixes = Vec::with_capacity(dict_len);
		for _ in 0..dict_len {
			shared_lens.push(r.read_u32()?);
			let bytes = r.read_bytes()?;
			suffixes.push(String::from_utf8_lossy(bytes).into_owned());
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
		Ok(Box::new(StoragePrefix { shared_lens, suffixes, has_null, null_code, codes: BitPacked::from_raw(bitsize, len, words) }))
	}
}

impl ColumnStorage for StoragePrefix {
	fn get(&self, i: usize) -> Value {
		let code = self.codes.get(i);
		if self.has_null && code == self.null_code {
			return Value::Nil;
		}
		// Front-coding gives O(code) reconstruction; acceptable since this
		// codec targets small-to-moderate dictionaries with long shared
		// prefixes, not high-cardinality columns.
		let dict = self.rebuild_dict();
		Value::Str(dict[code as usize].clone())
	}

	fn len(&self) -> usize {
		self.codes.len()
	}

	fn compute_size(&self) -> usize {
		self.suffixes.iter().map(|s| s.len()).sum::<usize>() + self.shared_lens.len() * 4 + self.codes.words().len() * 8 + 24
	}

	fn magic(&self) -> u8 {
		codec::MAGIC_PREFIX
	}

	fn serialize(&self, out: &mut Vec<u8>) {
		out.push(self.magic());
		codec::write_u32(out, self.shared_lens.len() as u32);
		for (shared, suffix) in self.shared_lens.iter().zip(self.suffixes.iter()) {
			codec::write_u32(out, *shared);
			codec::write_bytes(out, suffix.as_bytes());
		}
		out.push(self.has_null as u8);
		codec::write_u64(out, self.null_code);
		out.push(self.codes.bitsize());
		codec::write_u32(out, self.codes.len() as u32);
		codec::write_u32(out, self.codes.words().len() as u32);
		for w in self.codes.words() {
			codec::write_u64(out, *w);
		}
	}
}
