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

//! Content-addressed, refcounted large-value storage.
//!
//! Blobs are gzip-compressed and written under `blob/<hexhash>` inside a
//! database directory. Reference counts live in a reserved `.blobs` table,
//! here a flat line-oriented file (`hash<TAB>refcount` per line) guarded by
//! a `parking_lot::Mutex`, since a full table implementation is out of
//! scope for the core engine.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

pub type BlobDigest = [u8; 32];

pub struct BlobStore {
	root: PathBuf,
	refcounts: Mutex<HashMap<BlobDigest, u64>>,
}

impl BlobStore {
	/// Open (or create) the blob store rooted at `db_dir`, loading the
	/// `.blobs` refcount table if present.
	pub fn open(db_dir: impl Into<PathBuf>) -> Result<Self> {
		let root = db_dir.into();
		fs::create_dir_all(root.join("blob"))?;
		let refcounts = Mutex::new(Self::load_refcounts(&root)?);
		Ok(BlobStore { root, refcounts })
	}

	fn blobs_path(root: &Path) -> PathBuf {
		root.join(".blobs")
	}

	fn load_refcounts(root: &Path) -> Result<HashMap<BlobDigest, u64>> {
		let path = Self::blobs_path(root);
		let mut map = HashMap::new();
		if !path.exists() {
			return Ok(map);
		}
		let text = fs::read_to_string(&path)?;
		for line in text.lines() {
			let mut parts = line.splitn(2, '\t');
			let (hash_hex, count) = match (parts.next(), parts.next()) {
				(Some(h), Some(c)) => (h, c),
				_ => continue,
			};
			let digest = decode_hex(hash_hex)
				.ok_or_else(|| Error::corrupt(path.display().to_string(), "malformed .blobs hash"))?;
			let count: u64 =
				count.parse().map_err(|_| Error::corrupt(path.display().to_string(), "malformed .blobs refcount"))?;
			map.insert(digest, count);
		}
		Ok(map)
	}

	fn persist_refcounts(&self, refcounts: &HashMap<BlobDigest, u64>) -> Result<()> {
		let mut out = String::new();
		for (digest, count) in refcounts {
			out.push_str(&crate::display::hex(digest));
			out.push('\t');
			out.push_str(&count.to_string());
			out.push('\n');
		}
		let path = Self::blobs_path(&self.root);
		let tmp = path.with_extension("tmp");
		fs::write(&tmp, out)?;
		fs::rename(tmp, path)?;
		Ok(())
	}

	fn blob_path(&self, digest: &BlobDigest) -> PathBuf {
		self.root.join("blob").join(crate::display::hex(digest))
	}

	/// Compute the content digest without touching disk.
	pub fn hash(data: &[u8]) -> BlobDigest {
		Sha256::digest(data).into()
	}

	/// Gzip and write `data` under `digest` if not already on disk. Does not
	/// touch the refcount; pair with `bump_ref` (or use `write_blob`, which
	/// does both).
	pub fn put(&self, data: &[u8], digest: &BlobDigest) -> Result<()> {
		let path = self.blob_path(digest);
		if path.exists() {
			return Ok(());
		}
		let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
		encoder.write_all(data)?;
		let compressed = encoder.finish()?;
		let tmp = path.with_extension("tmp");
		fs::write(&tmp, &compressed)?;
		fs::rename(tmp, &path)?;
		Ok(())
	}

	/// Increment `digest`'s refcount by one.
	pub fn bump_ref(&self, digest: &BlobDigest) -> Result<()> {
		let mut refcounts = self.refcounts.lock();
		*refcounts.entry(*digest).or_insert(0) += 1;
		self.persist_refcounts(&refcounts)
	}

	/// Write `data` (if not already present) and bump its refcount by one.
	/// Returns the digest to embed as a blob reference.
	pub fn write_blob(&self, data: &[u8]) -> Result<BlobDigest> {
		let digest = Self::hash(data);
		self.put(data, &digest)?;
		self.bump_ref(&digest)?;
		Ok(digest)
	}

	/// Read and gunzip the blob for `digest`. `BlobMissing` surfaces as
	/// `Ok(None)`, not an error.
	pub fn read_blob(&self, digest: &BlobDigest) -> Result<Option<Vec<u8>>> {
		let path = self.blob_path(digest);
		let compressed = match fs::read(&path) {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				log::warn!(target: "columnar_core::blob_store", "blob {} missing on disk", crate::display::hex(digest));
				return Ok(None);
			}
			Err(e) => return Err(e.into()),
		};
		let mut decoder = flate2::read::GzDecoder::new(compressed.as_slice());
		let mut out = Vec::new();
		decoder.read_to_end(&mut out)?;
		Ok(Some(out))
	}

	/// Increment `digest`'s refcount without writing any bytes (legacy
	/// overlay migration bumps refcounts for values already on disk).
	pub fn inc_ref(&self, digest: &BlobDigest) -> Result<()> {
		self.bump_ref(digest)
	}

	/// Decrement `digest`'s refcount; deletes the blob file once it reaches
	/// zero. Returns the refcount after decrementing.
	pub fn dec_ref(&self, digest: &BlobDigest) -> Result<u64> {
		let mut refcounts = self.refcounts.lock();
		let remaining = match refcounts.get_mut(digest) {
			Some(count) if *count > 0 => {
				*count -= 1;
				*count
			}
			_ => 0,
		};
		if remaining == 0 {
			refcounts.remove(digest);
			let path = self.blob_path(digest);
			if path.exists() {
				fs::remove_file(&path)?;
			}
		}
		self.persist_refcounts(&refcounts)?;
		Ok(remaining)
	}

	pub fn refcount(&self, digest: &BlobDigest) -> u64 {
		self.refcounts.lock().get(digest).copied().unwrap_or(0)
	}

	pub fn total_refcount(&self) -> u64 {
		self.refcounts.lock().values().sum()
	}
}

fn decode_hex(s: &str) -> Option<BlobDigest> {
	if s.len() != 64 {
		return None;
	}
	let mut out = [0u8; 32];
	for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
		let byte = u8::from_str_radix(std::str::from_utf8(chunk).ok()?, 16).ok()?;
		out[i] = byte;
	}
	Some(out)
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn write_then_read_round_trips() {
		let dir = TempDir::new().unwrap();
		let store = BlobStore::open(dir.path()).unwrap();
		let digest = store.write_blob(b"hello world, this is a blob").unwrap();
		let back = store.read_blob(&digest).unwrap().unwrap();
		assert_eq!(back, b"hello world, this is a blob");
	}

	#[test]
	fn refcount_goes_to_zero_and_deletes_file() {
		let dir = TempDir::new().unwrap();
		let store = BlobStore::open(dir.path()).unwrap();
		let digest = store.write_blob(b"shared payload").unwrap();
		store.inc_ref(&digest).unwrap();
		assert_eq!(store.refcount(&digest), 2);
		assert_eq!(store.dec_ref(&digest).unwrap(), 1);
		assert!(store.read_blob(&digest).unwrap().is_some());
		assert_eq!(store.dec_ref(&digest).unwrap(), 0);
		assert!(store.read_blob(&digest).unwrap().is_none());
	}

	#[test]
	fn refcounts_survive_reopen() {
		let dir = TempDir::new().unwrap();
		let digest = {
			let store = BlobStore::open(dir.path()).unwrap();
			store.write_blob(b"persisted payload").unwrap()
		};
		let reopened = BlobStore::open(dir.path()).unwrap();
		assert_eq!(reopened.refcount(&digest), 1);
		assert_eq!(reopened.read_blob(&digest).unwrap().unwrap(), b"persisted payload");
	}
}
