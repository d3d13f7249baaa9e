// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

use std::path::Path;

use arrow_memory::memory::Architecture;
use clap::Parser;
use clap::Subcommand;

#[derive(Debug, Clone, Subcommand)]
pub enum Mode {
    /// Run a randomized allocation workload and report the resulting address spaces
    Run(RunOptions),
    /// Print a memory operand in the syntax of an architecture
    Format(FormatOptions),
}

#[derive(Debug, Clone, Parser)]
pub struct Cli {
    /// Configure the log level
    #[cfg(feature = "log")]
    #[arg(long, default_value = "warn")]
    pub log_level: arrow_memory::log::tracing_internal::Level,

    /// Log to a JSON file
    #[cfg(feature = "log")]
    #[arg(long)]
    pub log_json_file: Option<Box<Path>>,

    #[command(subcommand)]
    pub command: Mode,
}

#[derive(Debug, Clone, Parser)]
pub struct RunOptions {
    /// Path to a JSON machine configuration
    #[arg(long, short)]
    pub config: Option<Box<Path>>,

    /// Override the seed of the configuration
    #[arg(long)]
    pub seed: Option<u64>,

    /// Override the number of cores of the configuration
    #[arg(long)]
    pub cores: Option<u32>,

    /// Pages to allocate in every context
    #[arg(long, default_value_t = 8)]
    pub pages: usize,

    /// Memory operands to create, spread over all contexts
    #[arg(long, default_value_t = 32)]
    pub operands: usize,

    /// Print the statistics of every context as JSON instead of a table
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Log every page of every context after the workload.
    #[arg(long, default_value_t = false)]
    pub page_tables: bool,
}

#[derive(Debug, Clone, Parser)]
pub struct FormatOptions {
    /// Architecture name, such as `arm`, `riscv` or `x86_64`
    #[arg(long, short, default_value = "arm")]
    pub arch: Architecture,

    /// Access size in bytes
    #[arg(long, short, default_value_t = 8)]
    pub size: u64,

    /// Offset from the register, in bytes
    #[arg(long, short, default_value_t = 0, value_parser = parse_offset)]
    pub offset: u64,

    /// Register holding the base address
    #[arg(long, short)]
    pub register: Option<String>,
}

/// Parser for `--offset`, accepting decimal and `0x`-prefixed hexadecimal numbers
pub fn parse_offset(offset: &str) -> Result<u64, String> {
    let parsed = match offset.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => offset.parse(),
    };
    parsed.map_err(|err| format!("Invalid offset {offset:?}: {err}"))
}

/// Parse the command-line arguments.
pub fn parse() -> Cli {
    Cli::parse()
}
