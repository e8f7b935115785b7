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

//! Per-database and per-column configuration.

use std::path::PathBuf;

/// Persistence mode for a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistency {
	/// fsync every rebuild swap before unlinking old column files.
	Safe,
	/// Best-effort durability; rebuild swaps may be batched.
	Sloppy,
}

/// Database-wide options.
#[derive(Debug, Clone)]
pub struct Options {
	pub path: PathBuf,
	/// Global cache budget in bytes.
	pub cache_size_bytes: usize,
	/// Number of tokens in the disk-load semaphore; defaults to the
	/// number of available CPUs.
	pub load_concurrency: usize,
}

impl Options {
	pub fn with_path(path: impl Into<PathBuf>) -> Self {
		Options {
			path: path.into(),
			cache_size_bytes: 256 * 1024 * 1024,
			load_concurrency: num_cpus(),
		}
	}
}

fn num_cpus() -> usize {
	std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

/// Per-column options.
#[derive(Debug, Clone)]
pub struct ColumnOptions {
	/// Values longer than this many bytes are externalized into the blob
	/// store. Fixed at 255.
	pub blob_threshold: usize,
	pub persistency: Persistency,
	pub unique: bool,
}

impl Default for ColumnOptions {
	fn default() -> Self {
		ColumnOptions { blob_threshold: 255, persistency: Persistency::Safe, unique: false }
	}
}
