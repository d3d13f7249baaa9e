// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! Assembly syntax of memory operands

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::error::MemoryError;

/// Instruction set family
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::EnumIter,
    strum::EnumString,
    Serialize,
    Deserialize,
)]
#[strum(ascii_case_insensitive)]
#[serde(try_from = "String", into = "String")]
pub enum Architecture {
    #[strum(serialize = "arm", serialize = "aarch64", serialize = "arm64")]
    Arm,
    #[strum(serialize = "riscv", serialize = "riscv64", serialize = "rv64")]
    RiscV,
    #[strum(serialize = "x86", serialize = "x86_64", serialize = "amd64")]
    X86,
}

impl Architecture {
    pub const fn name(self) -> &'static str {
        match self {
            Architecture::Arm => "arm",
            Architecture::RiscV => "riscv",
            Architecture::X86 => "x86",
        }
    }

    /// Parse an architecture name, accepting the common aliases of each family.
    pub fn from_name(name: &str) -> Result<Self, MemoryError> {
        name.parse::<Self>().map_err(|_| MemoryError::UnsupportedArchitecture(name.to_owned()))
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<String> for Architecture {
    type Error = MemoryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_name(&value)
    }
}

impl From<Architecture> for String {
    fn from(value: Architecture) -> Self {
        value.name().to_owned()
    }
}

/// Collaborator handing out scratch registers
pub trait RegisterAllocator {
    type Register: fmt::Display;

    /// Reserve a free register, if any is left.
    fn reserve(&mut self) -> Option<Self::Register>;

    /// Return a register obtained from [`RegisterAllocator::reserve`].
    fn free(&mut self, register: Self::Register);
}

/// x86 size keyword for an access of `byte_size` bytes
fn x86_size_keyword(byte_size: u64) -> Result<&'static str, MemoryError> {
    match byte_size {
        1 => Ok("byte"),
        2 => Ok("word"),
        4 => Ok("dword"),
        8 => Ok("qword"),
        16 => Ok("dqword"),
        _ => Err(MemoryError::InvalidSize {
            size: byte_size,
            reason: "no x86 operand size keyword",
        }),
    }
}

/// Render an access of `byte_size` bytes at `offset` from the address held in `register`.
pub fn format_operand(
    architecture: Architecture,
    byte_size: u64,
    offset: u64,
    register: &str,
) -> Result<String, MemoryError> {
    Ok(match architecture {
        Architecture::X86 => {
            let size = x86_size_keyword(byte_size)?;
            if offset == 0 {
                format!("{size} [{register}]")
            } else {
                format!("{size} [{register} + {offset:#x}]")
            }
        }
        Architecture::RiscV => format!("{offset:#x}({register})"),
        Architecture::Arm => {
            if offset == 0 {
                format!("[{register}]")
            } else {
                format!("[{register},#{offset:#x}]")
            }
        }
    })
}
