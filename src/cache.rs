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

//! Global size-bounded cache manager: one process-wide typed LRU over items
//! weighted by a reported size. Indexes and compute-proxy temp columns
//! register themselves here rather than being polled by something else;
//! when total bytes exceed budget, the lowest-`score` items are asked to
//! clean themselves up, lowest first, until back under budget.
//!
//! Cleanup callbacks use a non-blocking lock attempt internally (the shard
//! and index locks they touch are `parking_lot`, which support `try_*`);
//! a callback that can't acquire its lock this pass returns `false` and is
//! skipped, not retried within the same `reclaim()` call.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use std::time::Instant;

/// What a registered item is, for metrics/diagnostics; does not change
/// eviction behavior, which is driven entirely by `score_fn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
	TempColumn,
	Index,
	CacheEntry,
}

pub type CacheId = u64;

struct CacheItem {
	id: CacheId,
	kind: ItemKind,
	size_fn: Box<dyn Fn() -> usize + Send + Sync>,
	last_used_fn: Box<dyn Fn() -> Instant + Send + Sync>,
	score_fn: Option<Box<dyn Fn() -> f64 + Send + Sync>>,
	cleanup_fn: Box<dyn Fn() -> bool + Send + Sync>,
}

/// Everything a caller needs to register an item: how big it currently is,
/// when it was last touched, an optional custom `score_fn` (lower score is
/// evicted first; default is ascending `last_used_fn`), and a `cleanup_fn`
/// that frees the item's cache-held state and reports whether it managed
/// to (`false` means "busy, try again next pass").
pub struct CacheItemSpec {
	pub kind: ItemKind,
	pub size_fn: Box<dyn Fn() -> usize + Send + Sync>,
	pub last_used_fn: Box<dyn Fn() -> Instant + Send + Sync>,
	pub score_fn: Option<Box<dyn Fn() -> f64 + Send + Sync>>,
	pub cleanup_fn: Box<dyn Fn() -> bool + Send + Sync>,
}

pub struct CacheManager {
	budget_bytes: usize,
	items: Mutex<Vec<CacheItem>>,
	next_id: AtomicU64,
	start: Instant,
}

impl CacheManager {
	pub fn new(budget_bytes: usize) -> Self {
		CacheManager { budget_bytes, items: Mutex::new(Vec::new()), next_id: AtomicU64::new(1), start: Instant::now() }
	}

	pub fn register(&self, spec: CacheItemSpec) -> CacheId {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		self.items.lock().push(CacheItem {
			id,
			kind: spec.kind,
			size_fn: spec.size_fn,
			last_used_fn: spec.last_used_fn,
			score_fn: spec.score_fn,
			cleanup_fn: spec.cleanup_fn,
		});
		id
	}

	/// Drop an item's registration entirely (for `CacheEntry`-kind items
	/// that are actually removed rather than merely evicted to a cheaper
	/// state).
	pub fn unregister(&self, id: CacheId) {
		self.items.lock().retain(|item| item.id != id);
	}

	pub fn total_bytes(&self) -> usize {
		self.items.lock().iter().map(|item| (item.size_fn)()).sum()
	}

	fn score_of(&self, item: &CacheItem) -> f64 {
		match &item.score_fn {
			Some(f) => f(),
			None => (item.last_used_fn)().duration_since(self.start).as_secs_f64(),
		}
	}

	/// Reclaim bytes by calling `cleanup_fn` on items in ascending score
	/// order until total bytes drop under budget or every item has been
	/// tried once. Returns the number of bytes actually freed. Items stay
	/// registered after a successful cleanup (an evicted index reports a
	/// near-zero size until reactivated); only `unregister` removes an
	/// item from consideration.
	pub fn reclaim(&self) -> usize {
		let items = self.items.lock();
		let mut total: usize = items.iter().map(|item| (item.size_fn)()).sum();
		if total <= self.budget_bytes {
			return 0;
		}
		let mut order: Vec<usize> = (0..items.len()).collect();
		order.sort_by(|&a, &b| self.score_of(&items[a]).partial_cmp(&self.score_of(&items[b])).unwrap_or(std::cmp::Ordering::Equal));

		let mut freed = 0usize;
		for idx in order {
			if total <= self.budget_bytes {
				break;
			}
			let item = &items[idx];
			let size_before = (item.size_fn)();
			if (item.cleanup_fn)() {
				freed += size_before;
				total = total.saturating_sub(size_before);
			}
		}
		freed
	}

	#[cfg(test)]
	fn len(&self) -> usize {
		self.items.lock().len()
	}
}
