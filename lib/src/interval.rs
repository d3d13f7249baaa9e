// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! Tagged interval tracking over a linear address range
//!
//! An [`IntervalTracker`] records which spans of an address range are present in a pool. Spans
//! never overlap and adjacent spans carrying equal tags are coalesced. Space leaves a pool either
//! through an exact [`IntervalTracker::remove_region`] or through a randomised, alignment-aware
//! [`IntervalTracker::find_and_remove`].
//!
//! Searching picks uniformly among the spans able to host a request, not weighted by span size,
//! and then uniformly among the aligned start positions inside the chosen span.

mod tag;

use std::collections::BTreeMap;
use std::collections::btree_map;

use serde::Serialize;

pub use self::tag::Backing;
pub use self::tag::Pool;
pub use self::tag::Space;
pub use self::tag::SpanTag;
use crate::bits;
use crate::bits::Address;
use crate::error::MemoryError;
use crate::random::RandomSource;

/// Contiguous address range with its tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Interval<T> {
    pub start: Address,
    pub size: u64,
    pub tag: T,
}

impl<T> Interval<T> {
    /// First address past the interval
    pub fn end(&self) -> Address {
        self.start + self.size
    }

    /// First and last start positions aligned to `bits` at which `size` bytes fit inside the
    /// interval
    pub fn first_and_last_aligned(&self, size: u64, bits: u32) -> Option<(Address, Address)> {
        bits::aligned_window(self.start, self.size, size, bits)
    }
}

/// Pool of tagged, non-overlapping address spans
#[derive(Debug, Clone)]
pub struct IntervalTracker<T> {
    spans: BTreeMap<Address, Interval<T>>,
    default_tag: T,
}

impl<T: Clone + PartialEq> IntervalTracker<T> {
    /// Create an empty pool. Spans added without an explicit tag receive `default_tag`.
    pub fn new(default_tag: T) -> Self {
        Self {
            spans: BTreeMap::new(),
            default_tag,
        }
    }

    /// Create a pool initially holding the whole range `start..start + size`.
    pub fn with_range(start: Address, size: u64, default_tag: T) -> Result<Self, MemoryError> {
        let mut tracker = Self::new(default_tag);
        tracker.add_region(start, size, None)?;
        Ok(tracker)
    }

    /// Tag describing the role of this pool
    pub fn default_tag(&self) -> &T {
        &self.default_tag
    }

    /// All spans in address order
    pub fn intervals(&self) -> btree_map::Values<'_, Address, Interval<T>> {
        self.spans.values()
    }

    /// Number of distinct spans
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Number of bytes across all spans
    pub fn total_size(&self) -> u64 {
        self.spans.values().map(|span| span.size).sum()
    }

    /// Span that contains `addr`, if any
    pub fn span_containing(&self, addr: Address) -> Option<&Interval<T>> {
        self.spans
            .range(..=addr)
            .next_back()
            .map(|(_, span)| span)
            .filter(|span| addr < span.end())
    }

    /// Single span that contains all of `start..start + size`, if any
    pub fn span_covering(&self, start: Address, size: u64) -> Option<&Interval<T>> {
        let end = start.checked_add(size)?;
        self.span_containing(start).filter(|span| span.end() >= end)
    }

    /// Is every byte of `start..start + size` present in the pool?
    pub fn is_region_available(&self, start: Address, size: u64) -> bool {
        if size == 0 {
            return true;
        }

        let Some(end) = start.checked_add(size) else {
            return false;
        };

        let mut cursor = start;
        while let Some(span) = self.span_containing(cursor) {
            if span.end() >= end {
                return true;
            }
            cursor = span.end();
        }

        false
    }

    /// Insert the span `start..start + size`. The span receives the pool's default tag unless
    /// `tag` is given.
    pub fn add_region(
        &mut self,
        start: Address,
        size: u64,
        tag: Option<T>,
    ) -> Result<(), MemoryError> {
        let end = checked_end(start, size)?;

        let overlaps = self
            .spans
            .range(..end)
            .next_back()
            .is_some_and(|(_, span)| span.end() > start);
        if overlaps {
            return Err(MemoryError::RegionOverlap { start, size });
        }

        let mut interval = Interval {
            start,
            size,
            tag: tag.unwrap_or_else(|| self.default_tag.clone()),
        };

        let prev = self
            .spans
            .range(..start)
            .next_back()
            .filter(|(_, prev)| prev.end() == start && prev.tag == interval.tag)
            .map(|(key, _)| *key);
        if let Some(prev) = prev.and_then(|key| self.spans.remove(&key)) {
            interval.start = prev.start;
            interval.size += prev.size;
        }

        let next_mergeable = self
            .spans
            .get(&end)
            .is_some_and(|next| next.tag == interval.tag);
        if let Some(next) = next_mergeable.then(|| self.spans.remove(&end)).flatten() {
            interval.size += next.size;
        }

        self.spans.insert(interval.start, interval);
        Ok(())
    }

    /// Remove the exact span `start..start + size`, which must be fully present.
    pub fn remove_region(&mut self, start: Address, size: u64) -> Result<(), MemoryError> {
        let end = checked_end(start, size)?;

        let first = match self.span_containing(start) {
            Some(span) if self.is_region_available(start, size) => span.start,
            _ => return Err(MemoryError::RegionNotFree { start, size }),
        };

        let keys: Vec<Address> = self.spans.range(first..end).map(|(key, _)| *key).collect();
        for key in keys {
            let Some(span) = self.spans.remove(&key) else {
                continue;
            };

            if span.start < start {
                self.spans.insert(span.start, Interval {
                    start: span.start,
                    size: start - span.start,
                    tag: span.tag.clone(),
                });
            }

            if span.end() > end {
                self.spans.insert(end, Interval {
                    start: end,
                    size: span.end() - end,
                    tag: span.tag,
                });
            }
        }

        Ok(())
    }

    /// Choose a region of `size` bytes aligned to `alignment_bits` without removing it. The
    /// returned interval carries the tag of the span it was chosen from.
    pub fn find_region(
        &self,
        size: u64,
        alignment_bits: Option<u32>,
        rng: &mut dyn RandomSource,
    ) -> Result<Interval<T>, MemoryError> {
        let bits = alignment_bits.unwrap_or(0);
        if bits > bits::MAX_ALIGNMENT_BITS {
            return Err(MemoryError::InvalidAlignment(bits));
        }
        if size == 0 {
            return Err(MemoryError::InvalidSize {
                size,
                reason: "regions must not be empty",
            });
        }

        let candidates: Vec<(&Interval<T>, Address, Address)> = self
            .spans
            .values()
            .filter_map(|span| {
                span.first_and_last_aligned(size, bits)
                    .map(|(first, last)| (span, first, last))
            })
            .collect();

        if candidates.is_empty() {
            return Err(MemoryError::OutOfSpace {
                size,
                alignment_bits: bits,
            });
        }

        let (span, first, last) = candidates[rng.index(candidates.len())];
        let start = pick_aligned_start(rng, first, last, bits);

        Ok(Interval {
            start,
            size,
            tag: span.tag.clone(),
        })
    }

    /// Choose a region like [`IntervalTracker::find_region`] and remove it from the pool.
    pub fn find_and_remove(
        &mut self,
        size: u64,
        alignment_bits: Option<u32>,
        rng: &mut dyn RandomSource,
    ) -> Result<Interval<T>, MemoryError> {
        let region = self.find_region(size, alignment_bits, rng)?;
        self.remove_region(region.start, region.size)?;
        Ok(region)
    }
}

fn checked_end(start: Address, size: u64) -> Result<Address, MemoryError> {
    if size == 0 {
        return Err(MemoryError::InvalidSize {
            size,
            reason: "regions must not be empty",
        });
    }

    start.checked_add(size).ok_or(MemoryError::InvalidSize {
        size,
        reason: "region exceeds the address space",
    })
}

/// Uniformly pick one of the aligned start positions in `first..=last`.
pub(crate) fn pick_aligned_start(
    rng: &mut dyn RandomSource,
    first: Address,
    last: Address,
    bits: u32,
) -> Address {
    if first == last {
        return first;
    }

    let count = bits::aligned_positions(first, last, bits);
    first + (rng.below(count) << bits)
}
