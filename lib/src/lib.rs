// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

pub mod bits;
pub mod config;
pub mod error;
mod ids;
pub mod interval;
pub mod log;
pub mod machine;
pub mod memory;
pub mod page;
pub mod random;

pub use bits::Address;
pub use config::MachineConfig;
pub use error::MemoryError;
pub use ids::IdGenerator;
pub use machine::ContextId;
pub use machine::ContextRegistry;
pub use machine::Machine;
