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

//! Bit-packed integer array shared by `StorageInt`, `StorageEnum` code words
//! and the index's `main_order` permutation.
//!
//! Values are packed MSB-first into a `u64` array: bit positions are counted
//! from the most-significant bit of each word toward the least-significant,
//! contiguous across word boundaries. A value that straddles a 64-bit
//! boundary is written as two masked OR operations, one per chunk.

/// Return the bitsize needed to represent values in `[0, max]` inclusive.
pub fn bits_for_range(max: u64) -> u8 {
	if max == 0 {
		1
	} else {
		(64 - max.leading_zeros()) as u8
	}
}

fn mask(bits: u8) -> u64 {
	if bits >= 64 {
		u64::MAX
	} else {
		(1u64 << bits) - 1
	}
}

#[derive(Debug, Clone)]
pub struct BitPacked {
	bitsize: u8,
	len: usize,
	words: Vec<u64>,
}

impl BitPacked {
	pub fn new(bitsize: u8, len: usize) -> Self {
		assert!(bitsize >= 1 && bitsize <= 64);
		let total_bits = len * bitsize as usize;
		let word_count = (total_bits + 63) / 64 + 1; // +1 pad, see module docs
		BitPacked { bitsize, len, words: vec![0u64; word_count] }
	}

	pub fn bitsize(&self) -> u8 {
		self.bitsize
	}

	pub fn len(&self) -> usize {
		self.len
	}

	pub fn get(&self, i: usize) -> u64 {
		debug_assert!(i < self.len);
		let bitsize = self.bitsize as usize;
		let bit_offset = i * bitsize;
		let word_idx = bit_offset / 64;
		let bit_in_word = bit_offset % 64;
		let available = 64 - bit_in_word;
		let word = self.words[word_idx];
		if available >= bitsize {
			let shift = available - bitsize;
			(word >> shift) & mask(self.bitsize)
		} else {
			let high_bits = available as u8;
			let low_bits = self.bitsize - high_bits;
			let high_part = word & mask(high_bits);
			let next = self.words[word_idx + 1];
			let low_part = next >> (64 - low_bits as u32);
			(high_part << low_bits) | low_part
		}
	}

	pub fn set(&mut self, i: usize, v: u64) {
		debug_assert!(i < self.len);
		debug_assert!(v <= mask(self.bitsize), "value {} does not fit in {} bits", v, self.bitsize);
		let bitsize = self.bitsize as usize;
		let bit_offset = i * bitsize;
		let word_idx = bit_offset / 64;
		let bit_in_word = bit_offset % 64;
		let available = 64 - bit_in_word;
		if available >= bitsize {
			let shift = available - bitsize;
			let m = mask(self.bitsize) << shift;
			self.words[word_idx] = (self.words[word_idx] & !m) | (v << shift);
		} else {
			let high_bits = available as u8;
			let low_bits = self.bitsize - high_bits;
			let high_part = v >> low_bits;
			let low_part = v & mask(low_bits);
			let m1 = mask(high_bits);
			self.words[word_idx] = (self.words[word_idx] & !m1) | high_part;
			let shift2 = 64 - low_bits as u32;
			let m2 = mask(low_bits) << shift2;
			self.words[word_idx + 1] = (self.words[word_idx + 1] & !m2) | (low_part << shift2);
		}
	}

	pub fn words(&self) -> &[u64] {
		&self.words
	}

	pub fn from_raw(bitsize: u8, len: usize, words: Vec<u64>) -> Self {
		BitPacked { bitsize, len, words }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trip_small() {
		let mut bp = BitPacked::new(5, 20);
		for i in 0..20 {
			bp.set(i, (i as u64 * 7) % 32);
		}
		for i in 0..20 {
			assert_eq!(bp.get(i), (i as u64 * 7) % 32);
		}
	}

	#[test]
	fn overwrite_does_not_disturb_neighbours() {
		for bitsize in 1u8..=48 {
			let len = 200;
			let maxv = mask(bitsize);
			let mut bp = BitPacked::new(bitsize, len);
			let vals: Vec<u64> = (0..len).map(|i| (i as u64).wrapping_mul(2654435761) & maxv).collect();
			for (i, v) in vals.iter().enumerate() {
				bp.set(i, *v);
			}
			for (i, v) in vals.iter().enumerate() {
				assert_eq!(bp.get(i), *v, "bitsize={} index={}", bitsize, i);
			}
			// overwrite every other element and make sure the rest is untouched
			for i in (0..len).step_by(2) {
				bp.set(i, maxv);
			}
			for i in 0..len {
				let expected = if i % 2 == 0 { maxv } else { vals[i] };
				assert_eq!(bp.get(i), expected, "bitsize={} index={}", bitsize, i);
			}
		}
	}

	#[test]
	fn chunk_boundary_stress() {
		// bitsize chosen so values straddle 64-bit boundaries frequently
		let bitsize = 13u8;
		let len = 1000;
		let mut bp = BitPacked::new(bitsize, len);
		let maxv = mask(bitsize);
		for i in 0..len {
			bp.set(i, (i as u64) & maxv);
		}
		for i in 0..len {
			assert_eq!(bp.get(i), (i as u64) & maxv);
		}
	}

	#[test]
	fn bits_for_range_is_ceil_log2() {
		assert_eq!(bits_for_range(0), 1);
		assert_eq!(bits_for_range(1), 1);
		assert_eq!(bits_for_range(2), 2);
		assert_eq!(bits_for_range(255), 8);
		assert_eq!(bits_for_range(256), 9);
	}
}
