// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

use std::error::Error;

use arrow_memory::memory::Architecture;
use arrow_memory::memory::format_operand;

use crate::cli::FormatOptions;

/// Base register used when none is given on the command line
fn default_register(architecture: Architecture) -> &'static str {
    match architecture {
        Architecture::Arm => "x1",
        Architecture::RiscV => "a0",
        Architecture::X86 => "rax",
    }
}

pub fn format(opts: FormatOptions) -> Result<(), Box<dyn Error>> {
    let register = opts
        .register
        .as_deref()
        .unwrap_or_else(|| default_register(opts.arch));

    println!(
        "{}",
        format_operand(opts.arch, opts.size, opts.offset, register)?
    );
    Ok(())
}
