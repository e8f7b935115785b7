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

//! Column storage variants and the build-up protocol.
//!
//! Every codec is a tagged variant behind a small capability trait: an
//! identity byte (`magic`) plus an on-disk payload dispatched by that
//! identity. `deserialize` dispatches on the 1-byte magic written by
//! `serialize`.

pub mod blob_overlay;
pub mod boxed;
pub mod compute_proxy;
pub mod decimal;
pub mod enum_codec;
pub mod float;
pub mod int;
#[cfg(feature = "prefix-codec")]
pub mod prefix;
pub mod seq;
pub mod sparse;
pub mod string;

use crate::value::Value;

pub const MAGIC_BOXED: u8 = 1;
pub const MAGIC_SPARSE: u8 = 2;
pub const MAGIC_INT: u8 = 10;
pub const MAGIC_SEQ: u8 = 11;
pub const MAGIC_FLOAT: u8 = 12;
pub const MAGIC_DECIMAL: u8 = 13;
pub const MAGIC_ENUM: u8 = 14;
pub const MAGIC_STRING: u8 = 20;
pub const MAGIC_PREFIX: u8 = 21;
pub const MAGIC_LEGACY_BLOB_OVERLAY: u8 = 31;
pub const MAGIC_BLOB_OVERLAY: u8 = 32;
pub const MAGIC_COMPUTE_PROXY: u8 = 50;

/// Read-only capability every built column exposes.
pub trait ColumnStorage: Send + Sync {
	fn get(&self, i: usize) -> Value;
	fn len(&self) -> usize;
	/// Approximate in-memory footprint, used by the cache manager.
	fn compute_size(&self) -> usize;
	fn magic(&self) -> u8;
	fn serialize(&self, out: &mut Vec<u8>);

	/// In-place cell write. Only `StorageSCMER` (the boxed/universal codec)
	/// and compute-proxy support this; every other
	/// codec is read-only once built.
	fn set(&mut self, _i: usize, _v: Value) -> bool {
		false
	}
}

/// The build-up state machine every codec implements. `scan` is
/// advisory statistics collection; `build` is the authoritative write, and
/// both are driven by the rebuild loop over the same row sequence, so
/// implementations must be idempotent under being visited twice.
pub trait CodecBuild: Send {
	fn prepare(&mut self);
	fn scan(&mut self, i: usize, v: &Value);
	/// If a better codec is available given the statistics collected by
	/// `scan`, return a fresh instance of it (not yet built). Otherwise
	/// `None`, which ends the proposal loop (convergence expected within
	/// 4 iterations).
	fn propose_compression(&mut self, count: usize) -> Option<Box<dyn CodecBuild>>;
	fn init(&mut self, count: usize);
	fn build(&mut self, i: usize, v: &Value);
	fn finish(&mut self) -> Box<dyn ColumnStorage>;
}

/// Drive the two-pass build-up protocol over `rows`, starting from the
/// universal codec and following `propose_compression` until it returns
/// `None`. Returns the finished column storage.
pub fn build_column<'a, I>(rows: I, count: usize) -> Box<dyn ColumnStorage>
where
	I: Iterator<Item = &'a Value> + Clone,
{
	build_column_from(Box::new(boxed::StorageScmer::new()), rows, count)
}

/// Same rebuild-loop driver as `build_column`, but starting from a caller-
/// supplied universal codec instance — used by shard rebuild to seed a
/// column's `StorageSCMER` with a blob store (`StorageScmer::with_blob_store`)
/// before the proposal loop runs.
pub fn build_column_from<'a, I>(initial: Box<dyn CodecBuild>, rows: I, count: usize) -> Box<dyn ColumnStorage>
where
	I: Iterator<Item = &'a Value> + Clone,
{
	let mut current = initial;
	let mut iterations = 0usize;
	loop {
		iterations += 1;
		current.prepare();
		for (i, v) in rows.clone().enumerate() {
			current.scan(i, v);
		}
		match current.propose_compression(count) {
			Some(next) => {
				current = next;
				assert!(iterations <= 4, "compression proposal loop did not converge");
			}
			None => break,
		}
	}
	current.init(count);
	for (i, v) in rows.enumerate() {
		current.build(i, v);
	}
	current.finish()
}

/// Build a column from an index→value function rather than a borrowed
/// slice, for callers (the compute-proxy's `compress`) whose rows come from
/// an oracle rather than a materialized `Vec<Value>`.
pub fn build_column_indexed(count: usize, f: impl Fn(usize) -> Value) -> Box<dyn ColumnStorage> {
	let values: Vec<Value> = (0..count).map(f).collect();
	build_column(values.iter(), values.len())
}

/// Dispatch on the leading magic byte written by `serialize`.
pub fn decode(bytes: &[u8]) -> crate::error::Result<Box<dyn ColumnStorage>> {
	let magic = *bytes
		.first()
		.ok_or_else(|| crate::error::Error::corrupt("<column>", "empty column file"))?;
	let body = &bytes[1..];
	match magic {
		MAGIC_BOXED => boxed::StorageScmer::deserialize(body),
		MAGIC_SPARSE => sparse::StorageSparse::deserialize(body),
		MAGIC_INT => int::StorageInt::deserialize(body),
		MAGIC_SEQ => seq::StorageSeq::deserialize(body),
		MAGIC_FLOAT => float::StorageFloat::deserialize(body),
		MAGIC_DECIMAL => decimal::StorageDecimal::deserialize(body),
		MAGIC_ENUM => enum_codec::StorageEnum::deserialize(body),
		MAGIC_STRING => string::StorageString::deserialize(body),
		#[cfg(feature = "prefix-codec")]
		MAGIC_PREFIX => prefix::StoragePrefix::deserialize(body),
		MAGIC_LEGACY_BLOB_OVERLAY => blob_overlay::StorageBlobOverlay::deserialize_legacy(body),
		MAGIC_BLOB_OVERLAY => blob_overlay::StorageBlobOverlay::deserialize(body),
		other => Err(crate::error::Error::corrupt("<column>", format!("unknown codec magic {}", other))),
	}
}

// -- little-endian wire helpers --------------------------------------------

pub(crate) fn write_u32(out: &mut Vec<u8>, v: u32) {
	out.extend_from_slice(&v.to_le_bytes());
}
pub(crate) fn write_u64(out: &mut Vec<u8>, v: u64) {
	out.extend_from_slice(&v.to_le_bytes());
}
pub(crate) fn write_i64(out: &mut Vec<u8>, v: i64) {
	out.extend_from_slice(&v.to_le_bytes());
}
pub(crate) fn write_f64(out: &mut Vec<u8>, v: f64) {
	out.extend_from_slice(&v.to_le_bytes());
}
pub(crate) fn write_bytes(out: &mut Vec<u8>, v: &[u8]) {
	write_u32(out, v.len() as u32);
	out.extend_from_slice(v);
}

pub(crate) struct Reader<'a> {
	pub buf: &'a [u8],
	pub pos: usize,
}

impl<'a> Reader<'a> {
	pub fn new(buf: &'a [u8]) -> Self {
		Reader { buf, pos: 0 }
	}
	pub fn read_u32(&mut self) -> crate::error::Result<u32> {
		let v = u32::from_le_bytes(self.take(4)?.try_into().unwrap());
		Ok(v)
	}
	pub fn read_u64(&mut self) -> crate::error::Result<u64> {
		let v = u64::from_le_bytes(self.take(8)?.try_into().unwrap());
		Ok(v)
	}
	pub fn read_i64(&mut self) -> crate::error::Result<i64> {
		let v = i64::from_le_bytes(self.take(8)?.try_into().unwrap());
		Ok(v)
	}
	pub fn read_f64(&mut self) -> crate::error::Result<f64> {
		let v = f64::from_le_bytes(self.take(8)?.try_into().unwrap());
		Ok(v)
	}
	pub fn read_u8(&mut self) -> crate::error::Result<u8> {
		Ok(self.take(1)?[0])
	}
	pub fn read_bytes(&mut self) -> crate::error::Result<&'a [u8]> {
		let len = self.read_u32()? as usize;
		self.take(len)
	}
	pub fn take(&mut self, n: usize) -> crate::error::Result<&'a [u8]> {
		if self.pos + n > self.buf.len() {
			return Err(crate::error::Error::corrupt("<column>", "length field overruns input"));
		}
		let s = &self.buf[self.pos..self.pos + n];
		self.pos += n;
		Ok(s)
	}
}
