// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! Alignment arithmetic over raw addresses
//!
//! Alignments are expressed in bits: an address is aligned to `bits` when it is a multiple of
//! `1 << bits`.

/// Memory address, virtual or physical
pub type Address = u64;

/// Largest number of alignment bits that still describes a representable alignment
pub const MAX_ALIGNMENT_BITS: u32 = u64::BITS - 1;

/// Get the bitmask formed of `n` ones.
pub const fn ones(n: u32) -> u64 {
    // This function should not panic
    let sh_amt = 64_u32.saturating_sub(n);
    match n {
        0 => 0,
        _ => !0 >> sh_amt,
    }
}

/// Number of bytes an alignment of `bits` corresponds to.
#[inline]
pub const fn alignment_bytes(bits: u32) -> u64 {
    ones(bits).wrapping_add(1)
}

/// Is the address a multiple of `1 << bits`?
#[inline]
pub const fn is_aligned(addr: Address, bits: u32) -> bool {
    addr & ones(bits) == 0
}

/// Return an aligned address that is equal or lower than `addr`.
#[inline]
pub const fn align_down(addr: Address, bits: u32) -> Address {
    addr & !ones(bits)
}

/// Return an aligned address that is equal or higher than `addr`, if one exists.
#[inline]
pub const fn align_up(addr: Address, bits: u32) -> Option<Address> {
    let mask = ones(bits);
    match addr.checked_add(mask) {
        Some(bumped) => Some(bumped & !mask),
        None => None,
    }
}

/// Find the first and last aligned start positions at which `size` bytes fit inside the span
/// `start..start + len`.
pub fn aligned_window(start: Address, len: u64, size: u64, bits: u32) -> Option<(Address, Address)> {
    if size == 0 || len < size {
        return None;
    }

    let last_start = start.checked_add(len - size)?;
    let first = align_up(start, bits)?;
    let last = align_down(last_start, bits);

    (first <= last).then_some((first, last))
}

/// Number of aligned start positions between `first` and `last`, both inclusive.
#[inline]
pub fn aligned_positions(first: Address, last: Address, bits: u32) -> u64 {
    ((last - first) >> bits).saturating_add(1)
}
