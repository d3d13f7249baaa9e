// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! Random policy decisions
//!
//! All randomness in a generation run is drawn from a single [`RandomSource`]. Runs are
//! reproducible as long as the sequence of draws only depends on the sequence of allocation calls.

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

/// Source of random policy decisions
pub trait RandomSource {
    /// Uniformly draw a value from `0..bound`. A `bound` of zero yields zero.
    fn below(&mut self, bound: u64) -> u64;

    /// Uniformly draw a value from `low..=high`.
    fn range_inclusive(&mut self, low: u64, high: u64) -> u64 {
        debug_assert!(low <= high);
        let span = high - low;
        match span.checked_add(1) {
            Some(bound) => low + self.below(bound),
            // The whole `u64` domain: the top value is never produced
            None => self.below(u64::MAX),
        }
    }

    /// Uniformly pick an index into a collection of `len` elements.
    fn index(&mut self, len: usize) -> usize {
        self.below(len as u64) as usize
    }

    /// Return `true` with the given probability in percent.
    fn chance(&mut self, percent: u32) -> bool {
        self.below(100) < u64::from(percent)
    }

    /// Pick an index with probability proportional to its weight. Weights may have any total.
    /// Returns `None` if all weights are zero.
    fn weighted_index(&mut self, weights: &[u64]) -> Option<usize> {
        let total = weights.iter().fold(0u64, |acc, w| acc.saturating_add(*w));
        if total == 0 {
            return None;
        }

        let mut draw = self.below(total);
        for (idx, weight) in weights.iter().enumerate() {
            if draw < *weight {
                return Some(idx);
            }
            draw -= weight;
        }

        None
    }
}

/// Pick one of the `options`, each paired with its relative weight.
pub fn choose<'a, T>(rng: &mut dyn RandomSource, options: &'a [(T, u64)]) -> Option<&'a T> {
    let weights: Vec<u64> = options.iter().map(|(_, weight)| *weight).collect();
    rng.weighted_index(&weights).map(|idx| &options[idx].0)
}

/// Pick one of the `values` uniformly.
pub fn choose_uniform<'a, T>(rng: &mut dyn RandomSource, values: &'a [T]) -> Option<&'a T> {
    if values.is_empty() {
        return None;
    }

    values.get(rng.index(values.len()))
}

/// [`RandomSource`] backed by a seeded [`StdRng`]
#[derive(Debug, Clone)]
pub struct SeededRandom {
    rng: StdRng,
}

impl SeededRandom {
    /// Create a generator whose sequence of draws is fully determined by `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl RandomSource for SeededRandom {
    fn below(&mut self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }

        self.rng.gen_range(0..bound)
    }
}
