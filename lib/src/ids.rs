// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

/// Hands out the numeric suffixes used to build unique memory labels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdGenerator {
    last: u64,
}

impl IdGenerator {
    /// The first identifier handed out is `start + 1`.
    pub const fn new(start: u64) -> Self {
        Self { last: start }
    }

    /// Produce the next identifier.
    pub fn next_id(&mut self) -> u64 {
        self.last += 1;
        self.last
    }

    /// Restart the sequence, as if freshly created with `start`.
    pub fn reset(&mut self, start: u64) {
        self.last = start;
    }
}
