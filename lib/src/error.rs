// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

use thiserror::Error;

use crate::bits::Address;
use crate::machine::ContextId;
use crate::memory::BlockId;
use crate::page::PageSize;

/// Errors raised by the memory model
///
/// Every error is reported by the call that detects it. Nothing is retried internally: callers may
/// retry with relaxed constraints.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("Invalid size {size:#x}: {reason}")]
    InvalidSize { size: u64, reason: &'static str },

    #[error("Conflicting parameters: {0}")]
    ConflictingParameters(&'static str),

    #[error("{page_size} pages require at least {required} alignment bits, got {requested}")]
    InsufficientAlignment {
        page_size: PageSize,
        required: u32,
        requested: u32,
    },

    #[error("Alignment of {0} bits is not representable")]
    InvalidAlignment(u32),

    #[error("Page type is required")]
    MissingPageType,

    #[error("No free region of {size:#x} bytes with {alignment_bits} alignment bits")]
    OutOfSpace { size: u64, alignment_bits: u32 },

    #[error("No region where VA=PA is possible for {size:#x} bytes with {alignment_bits} alignment bits")]
    NoIdentityRegion { size: u64, alignment_bits: u32 },

    #[error("Region {start:#x} of {size:#x} bytes is not free")]
    RegionNotFree { start: Address, size: u64 },

    #[error("Region {start:#x} of {size:#x} bytes overlaps a tracked region")]
    RegionOverlap { start: Address, size: u64 },

    #[error("Address {0:#x} has no backing in the active context")]
    Unbacked(Address),

    #[error("Unsupported architecture {0:?}")]
    UnsupportedArchitecture(String),

    #[error("Unknown context {0}")]
    UnknownContext(ContextId),

    #[error("Unknown block {0}")]
    UnknownBlock(BlockId),

    #[error("No free register left")]
    RegistersExhausted,

    #[error("Invalid configuration: {0}")]
    Config(String),
}
