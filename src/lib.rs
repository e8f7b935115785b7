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

//! Core storage engine for an in-memory columnar database: column codecs
//! with adaptive compression, sharded rebuild, dual sort-order/delta
//! indexes, content-addressed blob storage, a global cache manager and a
//! parallel scan driver. The embedded expression language that drives
//! filter/map/reduce from user queries lives above this crate; `expr`
//! defines only the minimal AST/procedure interface the boundary extractor
//! and scan driver need.

pub mod bitpack;
pub mod blob_store;
pub mod boundary;
pub mod cache;
pub mod codec;
pub mod display;
pub mod error;
pub mod expr;
pub mod index;
pub mod options;
pub mod scan;
pub mod shard;
pub mod value;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use blob_store::BlobStore;
use cache::CacheManager;
use codec::ColumnStorage;
use error::Result;
use options::Options;
use scan::Table;
use shard::Shard;

/// Top-level handle to a running database: owns the blob store, the global
/// cache manager and the table registry. Deliberately not a singleton, so
/// tests can spin up isolated engines — callers construct one `Engine` per
/// `Options::path` and pass it around.
pub struct Engine {
	options: Options,
	blob_store: Arc<BlobStore>,
	cache: Arc<CacheManager>,
	tables: RwLock<HashMap<String, Arc<Table>>>,
}

impl Engine {
	pub fn open(options: Options) -> Result<Self> {
		let blob_store = Arc::new(BlobStore::open(&options.path)?);
		let cache = Arc::new(CacheManager::new(options.cache_size_bytes));
		Ok(Engine { options, blob_store, cache, tables: RwLock::new(HashMap::new()) })
	}

	pub fn options(&self) -> &Options {
		&self.options
	}

	pub fn blob_store(&self) -> &Arc<BlobStore> {
		&self.blob_store
	}

	pub fn cache(&self) -> &Arc<CacheManager> {
		&self.cache
	}

	/// Register (or fetch) a table by name, creating an empty one on first
	/// use.
	pub fn table(&self, name: &str) -> Arc<Table> {
		if let Some(table) = self.tables.read().get(name) {
			return table.clone();
		}
		let mut tables = self.tables.write();
		tables.entry(name.to_string()).or_insert_with(|| Arc::new(Table::new())).clone()
	}

	pub fn table_names(&self) -> Vec<String> {
		self.tables.read().keys().cloned().collect()
	}

	/// Build a shard from already-materialized columns, add it to `table`,
	/// and register its indexes and compute-proxy columns with the cache
	/// manager as they're created (shards start with no indexes; this only
	/// covers compute columns attached up front).
	pub fn add_shard(&self, table: &Table, columns: HashMap<String, Box<dyn ColumnStorage>>, delta_columns: Vec<String>) -> Arc<Shard> {
		let shard = Arc::new(Shard::new(Uuid::new_v4(), columns, delta_columns));
		table.add_shard(shard.clone());
		shard
	}

	/// Rebuild one shard in place, swapping it into `table` and returning
	/// whether the old on-disk files should be unlinked. Freshly-created
	/// indexes surviving the rebuild are registered with the cache manager.
	pub fn rebuild_shard(&self, table: &Table, shard: &Arc<Shard>) -> shard::RebuildOutcome {
		let (new_shard, outcome) = shard.rebuild(Some(self.blob_store.clone()));
		let new_shard = Arc::new(new_shard);
		for idx in new_shard.read().indexes.iter() {
			self.cache.register(idx.cache_spec());
		}
		table.replace_shard(outcome.old_uuid, new_shard);
		outcome
	}

	/// Ask the cache manager to bring total registered bytes back under
	/// budget; typically called after a batch of inserts/rebuilds.
	pub fn reclaim_cache(&self) -> usize {
		self.cache.reclaim()
	}
}
