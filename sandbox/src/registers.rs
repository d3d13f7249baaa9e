// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

use arrow_memory::memory::Architecture;
use arrow_memory::memory::RegisterAllocator;

/// Caller-saved registers the workload may clobber to hold block addresses
fn scratch_names(architecture: Architecture) -> &'static [&'static str] {
    match architecture {
        Architecture::Arm => &["x9", "x10", "x11", "x12", "x13", "x14", "x15"],
        Architecture::RiscV => &["t0", "t1", "t2", "t3", "t4", "t5", "t6"],
        Architecture::X86 => &["rsi", "rdi", "r8", "r9", "r10", "r11"],
    }
}

/// Pool of scratch registers, handed out lowest name first
#[derive(Debug, Clone)]
pub struct ScratchRegisters {
    free: Vec<&'static str>,
}

impl ScratchRegisters {
    pub fn new(architecture: Architecture) -> Self {
        let mut free = scratch_names(architecture).to_vec();
        free.reverse();
        Self { free }
    }
}

impl RegisterAllocator for ScratchRegisters {
    type Register = &'static str;

    fn reserve(&mut self) -> Option<Self::Register> {
        self.free.pop()
    }

    fn free(&mut self, register: Self::Register) {
        self.free.push(register);
    }
}
