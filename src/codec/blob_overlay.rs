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

//! `StorageBlobOverlay`: externalizes string values over 255 bytes into the
//! content-addressed blob store, keeping only a short reference in the base
//! codec.
//!
//! Blob references are `VALUE::Str`s beginning with `!`. Since `VALUE::Str`
//! is a Rust `str` (valid UTF-8 by construction) rather than an arbitrary
//! byte string, the digest is hex-encoded rather than embedded raw: a
//! reference is `"!" + hex(sha256(v))`, 65 bytes, rather than the 33 raw
//! bytes a byte-string host language could use directly. `"!!"` still means
//! "the literal value begins with one `!`, strip it".
//! TODO(migrate): legacy magic-31 payloads (inline blob map) are not
//! produced by anything in this codebase, so `deserialize_legacy` has no
//! writer to test against; keep it narrow and well-commented until a real
//! legacy fixture surfaces.

use std::collections::HashSet;
use std::sync::Arc;

use crate::blob_store::{BlobDigest, BlobStore};
use crate::codec::{self, CodecBuild, ColumnStorage, Reader};
use crate::value::Value;

const BLOB_THRESHOLD: usize = 255;
const REF_LEN: usize = 1 + 64; // '!' + hex(sha256)

fn as_digest_ref(s: &str) -> Option<BlobDigest> {
	let bytes = s.as_bytes();
	if bytes.len() != REF_LEN || bytes[0] != b'!' || bytes[1] == b'!' {
		return None;
	}
	decode_hex(&s[1..])
}

fn decode_hex(s: &str) -> Option<BlobDigest> {
	if s.len() != 64 {
		return None;
	}
	let mut out = [0u8; 32];
	for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
		out[i] = u8::from_str_radix(std::str::from_utf8(chunk).ok()?, 16).ok()?;
	}
	Some(out)
}

fn rewrite_for_stats(v: &Value) -> Value {
	match v {
		Value::Str(s) => {
			let bytes = s.as_bytes();
			if bytes.first() == Some(&b'!') {
				Value::str(format!("!{s}"))
			} else if bytes.len() > BLOB_THRESHOLD {
				Value::str(format!("!{}", "0".repeat(64)))
			} else {
				v.clone()
			}
		}
		other => other.clone(),
	}
}

pub struct StorageBlobOverlayBuild {
	store: Arc<BlobStore>,
	seen: HashSet<BlobDigest>,
	inner: Box<dyn CodecBuild>,
}

impl StorageBlobOverlayBuild {
	pub fn new(store: Arc<BlobStore>, inner: Box<dyn CodecBuild>) -> Self {
		StorageBlobOverlayBuild { store, seen: HashSet::new(), inner }
	}

	fn rewrite_authoritative(&mut self, v: &Value) -> Value {
		match v {
			Value::Str(s) => {
				let bytes = s.as_bytes();
				if bytes.first() == Some(&b'!') {
					Value::str(format!("!{s}"))
				} else if bytes.len() > BLOB_THRESHOLD {
					let digest = BlobStore::hash(bytes);
					if self.seen.insert(digest) {
						// first occurrence of this digest in this build: write + bump once
						self.store.put(bytes, &digest).expect("blob store write failed");
						self.store.bump_ref(&digest).expect("blob store refcount bump failed");
					} else {
						self.store.put(bytes, &digest).expect("blob store write failed");
					}
					Value::str(format!("!{}", crate::display::hex(&digest)))
				} else {
					v.clone()
				}
			}
			other => other.clone(),
		}
	}
}

impl CodecBuild for StorageBlobOverlayBuild {
	fn prepare(&mut self) {
		self.inner.prepare();
	}

	fn scan(&mut self, i: usize, v: &Value) {
		let rewritten = rewrite_for_stats(v);
		self.inner.scan(i, &rewritten);
	}

	fn propose_compression(&mut self, count: usize) -> Option<Box<dyn CodecBuild>> {
		// The overlay always wraps whatever codec the inner proposal chain
		// settles on; propagate but keep ourselves as the outer wrapper.
		match self.inner.propose_compression(count) {
			Some(next_inner) => {
				self.inner = next_inner;
				Some(Box::new(StorageBlobOverlayBuild {
					store: self.store.clone(),
					seen: std::mem::take(&mut self.seen),
					inner: std::mem::replace(&mut self.inner, Box::new(codec::boxed::StorageScmer::new())),
				}))
			}
			None => None,
		}
	}

	fn init(&mut self, count: usize) {
		self.inner.init(count);
	}

	fn build(&mut self, i: usize, v: &Value) {
		let rewritten = self.rewrite_authoritative(v);
		self.inner.build(i, &rewritten);
	}

	fn finish(&mut self) -> Box<dyn ColumnStorage> {
		Box::new(StorageBlobOverlay { store: self.store.clone(), inner: self.inner.finish() })
	}
}

pub struct StorageBlobOverlay {
	store: Arc<BlobStore>,
	inner: Box<dyn ColumnStorage>,
}

impl StorageBlobOverlay {
	pub fn deserialize(body: &[u8]) -> crate::error::Result<Box<dyn ColumnStorage>> {
		// Construction requires the owning shard's blob store; column files
		// are decoded through `decode_with_blobs`, not the context-free
		// `codec::decode` dispatch table. Reaching this path means a column
		// file claimed to be an overlay but was read without store context.
		let _ = body;
		Err(crate::error::Error::corrupt("<blob overlay>", "blob overlay requires decode_with_blobs, not decode"))
	}

	pub fn deserialize_legacy(body: &[u8]) -> crate::error::Result<Box<dyn ColumnStorage>> {
		let _ = body;
		Err(crate::error::Error::corrupt("<blob overlay>", "legacy overlay requires decode_with_blobs, not decode"))
	}

	/// Decode a serialized overlay given the owning database's blob store,
	/// migrating legacy inline blobs (magic 31) into the store on the way.
	pub fn decode_with_blobs(bytes: &[u8], store: Arc<BlobStore>) -> crate::error::Result<Box<dyn ColumnStorage>> {
		let magic = *bytes.first().ok_or_else(|| crate::error::Error::corrupt("<blob overlay>", "empty payload"))?;
		let mut r = Reader::new(&bytes[1..]);
		match magic {
			codec::MAGIC_BLOB_OVERLAY => {
				let inner_bytes = r.read_bytes()?;
				let inner = codec::decode(inner_bytes)?;
				Ok(Box::new(StorageBlobOverlay { store, inner }))
			}
			codec::MAGIC_LEGACY_BLOB_OVERLAY => {
				let inline_count = r.read_u32()? as usize;
				for _ in 0..inline_count {
					let digest_bytes = r.read_bytes()?;
					let payload = r.read_bytes()?;
					let digest: BlobDigest =
						digest_bytes.try_into().map_err(|_| crate::error::Error::corrupt("<blob overlay>", "bad digest length"))?;
					store.put(payload, &digest)?;
					store.inc_ref(&digest)?;
				}
				let inner_bytes = r.read_bytes()?;
				let inner = codec::decode(inner_bytes)?;
				Ok(Box::new(StorageBlobOverlay { store, inner }))
			}
			other => Err(crate::error::Error::corrupt("<blob overlay>", format!("not an overlay magic: {}", other))),
		}
	}
}

impl ColumnStorage for StorageBlobOverlay {
	fn get(&self, i: usize) -> Value {
		match self.inner.get(i) {
			Value::Str(s) => {
				if let Some(digest) = as_digest_ref(&s) {
					match self.store.read_blob(&digest) {
						Ok(Some(bytes)) => Value::str(String::from_utf8_lossy(&bytes).into_owned()),
						Ok(None) => Value::Nil,
						Err(_) => Value::Nil,
					}
				} else if s.as_bytes().first() == Some(&b'!') && s.as_bytes().get(1) == Some(&b'!') {
					Value::str(s[1..].to_string())
				} else {
					Value::Str(s)
				}
			}
			other => other,
		}
	}

	fn len(&self) -> usize {
		self.inner.len()
	}

	fn compute_size(&self) -> usize {
		self.inner.compute_size() + 16
	}

	fn magic(&self) -> u8 {
		codec::MAGIC_BLOB_OVERLAY
	}

	fn serialize(&self, out: &mut Vec<u8>) {
		out.push(self.magic());
		let mut inner_bytes = Vec::new();
		self.inner.serialize(&mut inner_bytes);
		codec::write_bytes(out, &inner_bytes);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	fn build_overlay(values: &[Value], store: Arc<BlobStore>) -> Box<dyn ColumnStorage> {
		let mut b: Box<dyn CodecBuild> =
			Box::new(StorageBlobOverlayBuild::new(store, Box::new(crate::codec::string::StorageStringBuild::new())));
		let mut iterations = 0;
		loop {
			iterations += 1;
			b.prepare();
			for (i, v) in values.iter().enumerate() {
				b.scan(i, v);
			}
			match b.propose_compression(values.len()) {
				Some(next) => {
					b = next;
					assert!(iterations <= 4);
				}
				None => break,
			}
		}
		b.init(values.len());
		for (i, v) in values.iter().enumerate() {
			b.build(i, v);
		}
		b.finish()
	}

	#[test]
	fn large_strings_are_externalized_and_read_back() {
		let dir = TempDir::new().unwrap();
		let store = Arc::new(BlobStore::open(dir.path()).unwrap());
		let big_a = "X".repeat(1000);
		let big_b = "Y".repeat(500);
		let values = vec![Value::str(big_a.clone()), Value::str(big_a.clone()), Value::str(big_b.clone()), Value::str(big_b.clone())];
		let col = build_overlay(&values, store.clone());
		for (i, v) in values.iter().enumerate() {
			assert_eq!(&col.get(i), v);
		}
		// two distinct blobs; refcount only bumps on the first occurrence of a
		// digest within a build, so two duplicated values net refcount 1 each
		assert_eq!(store.total_refcount(), 2);
	}

	#[test]
	fn escape_round_trips_literal_bang_strings() {
		let dir = TempDir::new().unwrap();
		let store = Arc::new(BlobStore::open(dir.path()).unwrap());
		let values = vec![Value::str("!not a blob"), Value::str("ordinary")];
		let col = build_overlay(&values, store);
		for (i, v) in values.iter().enumerate() {
			assert_eq!(&col.get(i), v);
		}
	}

	#[test]
	fn small_strings_pass_through_unexternalized() {
		let dir = TempDir::new().unwrap();
		let store = Arc::new(BlobStore::open(dir.path()).unwrap());
		let values = vec![Value::str("short"), Value::Nil];
		let col = build_overlay(&values, store.clone());
		for (i, v) in values.iter().enumerate() {
			assert_eq!(&col.get(i), v);
		}
		assert_eq!(store.total_refcount(), 0);
	}
}
