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

//! Error kinds for the core storage engine.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the storage core.
///
/// `Invariant` violations are not expected to be handled: callers should let
/// them abort the process via `panic!`/`debug_assert!` at the call site
/// rather than constructing this variant and propagating it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("value type mismatch: expected {expected}, found {found}")]
	ValueTypeMismatch { expected: &'static str, found: &'static str },

	#[error("unknown column '{column}' in shard {shard}")]
	UnknownColumn { shard: uuid::Uuid, column: String },

	#[error("corrupt storage at {path:?}: {reason}")]
	CorruptStorage { path: PathBuf, reason: String },

	#[error("duplicate key violates unique constraint on column '{column}'")]
	DuplicateKey { column: String },
}

impl Error {
	pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
		Error::CorruptStorage { path: path.into(), reason: reason.into() }
	}
}
