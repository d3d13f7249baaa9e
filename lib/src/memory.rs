// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! Memory referenced by generated instructions
//!
//! Memory is handed out in two tiers. An [`AllocationBlock`] is a contiguous, physically backed
//! range carved out of an address space. A [`MemoryOperand`] is the window of a block that one
//! instruction accesses. Exclusive operands get a block of their own; shared operands may alias a
//! window of an existing shared block.

mod block;
mod format;
mod operand;

pub use self::block::AllocationBlock;
pub use self::block::BlockId;
pub use self::block::BlockRequest;
pub use self::block::MemoryType;
pub use self::block::Placement;
pub use self::format::Architecture;
pub use self::format::RegisterAllocator;
pub use self::format::format_operand;
pub use self::operand::MemoryOperand;
pub use self::operand::OperandRequest;
pub use self::operand::VALID_SIZES;
