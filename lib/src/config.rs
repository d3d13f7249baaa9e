// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! Machine configuration
//!
//! A [`MachineConfig`] describes the simulated machine a generation run allocates memory for. It
//! is usually read from a JSON document; every field is optional and falls back to its default.

use serde::Deserialize;
use serde::Serialize;

use crate::bits;
use crate::bits::Address;
use crate::error::MemoryError;
use crate::memory::Architecture;
use crate::page::ExecutionContext;
use crate::page::PageSize;

/// Default start of every context's virtual window: 2 GiB + 2 MiB
pub const DEFAULT_VA_START: Address = 0x8020_0000;

/// Default length of every context's virtual window: 8 GiB
pub const DEFAULT_VA_SIZE: u64 = 0x2_0000_0000;

/// Default start of the physical window: 2 GiB
pub const DEFAULT_PA_START: Address = 0x8000_0000;

/// Default length of the physical window: 8 GiB
pub const DEFAULT_PA_SIZE: u64 = 0x2_0000_0000;

/// Default probability, in percent, that a shared operand aliases an existing block
pub const DEFAULT_REUSE_PROBABILITY: u32 = 50;

/// Layout and policy of the simulated machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MachineConfig {
    /// Seed of the run's random generator
    pub seed: u64,

    /// Number of cores
    pub cores: u32,

    /// Execution contexts instantiated on every core, in registration order
    pub execution_contexts: Vec<ExecutionContext>,

    pub va_start: Address,
    pub va_size: u64,
    pub pa_start: Address,
    pub pa_size: u64,

    /// Percentage of shared operand requests that try to alias an existing block
    pub reuse_probability: u32,

    /// Instruction set family used for operand formatting
    pub architecture: Architecture,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            cores: 1,
            execution_contexts: vec![ExecutionContext::El3Root, ExecutionContext::El1NonSecure],
            va_start: DEFAULT_VA_START,
            va_size: DEFAULT_VA_SIZE,
            pa_start: DEFAULT_PA_START,
            pa_size: DEFAULT_PA_SIZE,
            reuse_probability: DEFAULT_REUSE_PROBABILITY,
            architecture: Architecture::Arm,
        }
    }
}

impl MachineConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, MemoryError> {
        let config: Self =
            serde_json::from_str(json).map_err(|err| MemoryError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration describes a machine that can be built.
    pub fn validate(&self) -> Result<(), MemoryError> {
        if self.cores == 0 {
            return Err(MemoryError::Config("at least one core is required".into()));
        }

        if self.execution_contexts.is_empty() {
            return Err(MemoryError::Config(
                "at least one execution context per core is required".into(),
            ));
        }

        for (idx, ctx) in self.execution_contexts.iter().enumerate() {
            if self.execution_contexts[..idx].contains(ctx) {
                return Err(MemoryError::Config(format!(
                    "execution context {ctx} is listed more than once"
                )));
            }
        }

        check_window("virtual", self.va_start, self.va_size)?;
        check_window("physical", self.pa_start, self.pa_size)?;

        if self.reuse_probability > 100 {
            return Err(MemoryError::Config(format!(
                "reuse probability {}% exceeds 100%",
                self.reuse_probability
            )));
        }

        Ok(())
    }
}

fn check_window(kind: &str, start: Address, size: u64) -> Result<(), MemoryError> {
    let page_bits = PageSize::Size4K.alignment_bits();

    if size == 0 {
        return Err(MemoryError::Config(format!("{kind} window is empty")));
    }

    if !bits::is_aligned(start, page_bits) || !bits::is_aligned(size, page_bits) {
        return Err(MemoryError::Config(format!(
            "{kind} window {start:#x}+{size:#x} is not page aligned"
        )));
    }

    if start.checked_add(size).is_none() {
        return Err(MemoryError::Config(format!(
            "{kind} window {start:#x}+{size:#x} exceeds the address space"
        )));
    }

    Ok(())
}
