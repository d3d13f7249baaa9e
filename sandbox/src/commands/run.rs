// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

use std::error::Error;
use std::fs;

use arrow_memory::ContextRegistry;
use arrow_memory::Machine;
use arrow_memory::MachineConfig;
use arrow_memory::MemoryError;
use arrow_memory::machine::ContextScope;
use arrow_memory::machine::PageRequest;
use arrow_memory::memory::OperandRequest;
use arrow_memory::memory::RegisterAllocator;
use arrow_memory::page::PageType;
use arrow_memory::random;
use serde::Serialize;

use crate::cli::RunOptions;
use crate::registers::ScratchRegisters;
use crate::table::table_from_stats;

const PAGE_TYPES: [PageType; 4] = [
    PageType::Code,
    PageType::Data,
    PageType::Device,
    PageType::System,
];

/// Chance, in percent, of a workload page being identity mapped
const IDENTITY_PERCENT: u32 = 10;

/// Outcome of a randomized workload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Workload {
    pub pages: usize,
    pub identity_pages: usize,
    pub cross_core_pages: usize,
    pub exclusive_operands: usize,
    pub shared_operands: usize,
    pub reused_operands: usize,
    pub cross_core_operands: usize,

    /// Page requests that found no room in their address space
    pub exhausted: usize,

    /// Every operand as `<label>: <operand>`, in the syntax of the configured architecture
    pub formatted: Vec<String>,
}

pub fn run(opts: RunOptions) -> Result<(), Box<dyn Error>> {
    let config = load_config(&opts)?;
    let mut machine = Machine::new(config)?;

    let workload = run_workload(&mut machine, opts.pages, opts.operands)?;

    machine.log_summary();
    if opts.page_tables {
        machine.log_page_tables();
    }

    if opts.json {
        let report = serde_json::json!({
            "workload": workload,
            "contexts": machine.memory_stats(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", table_from_stats(&machine.memory_stats()));
        println!(
            "{} pages ({} identity, {} exhausted), {} cross-core pages, {} operands ({} reused)",
            workload.pages,
            workload.identity_pages,
            workload.exhausted,
            workload.cross_core_pages,
            workload.exclusive_operands + workload.shared_operands + workload.cross_core_operands,
            workload.reused_operands
        );
        for line in &workload.formatted {
            println!("  {line}");
        }
    }

    Ok(())
}

/// Read the configuration file, if any, and apply the command-line overrides.
pub fn load_config(opts: &RunOptions) -> Result<MachineConfig, Box<dyn Error>> {
    let mut config = match &opts.config {
        Some(path) => MachineConfig::from_json(&fs::read_to_string(path)?)?,
        None => MachineConfig::default(),
    };

    if let Some(seed) = opts.seed {
        config.seed = seed;
    }
    if let Some(cores) = opts.cores {
        config.cores = cores;
    }

    config.validate()?;
    Ok(config)
}

/// Allocate `pages` random pages in every context, one cross-core page, then `operands` memory
/// operands spread round-robin over the contexts. Every operand is formatted for the configured
/// architecture. The active context is left unchanged.
pub fn run_workload(
    machine: &mut Machine,
    pages: usize,
    operands: usize,
) -> Result<Workload, MemoryError> {
    let mut workload = Workload::default();
    let contexts = machine.contexts();
    let architecture = machine.config().architecture;
    let mut registers = ScratchRegisters::new(architecture);
    let mut scope = ContextScope::enter(machine);

    for &ctx in &contexts {
        scope.set_active_context(ctx)?;

        for _ in 0..pages {
            let page_type = random::choose_uniform(scope.random(), &PAGE_TYPES)
                .copied()
                .unwrap_or(PageType::Data);
            let identity = scope.random().chance(IDENTITY_PERCENT);

            let mut request = PageRequest::new(page_type);
            if identity {
                request = request.identity();
            }

            match scope.allocate_page(&request) {
                Ok(allocation) if identity => workload.identity_pages += allocation.pages().len(),
                Ok(allocation) => workload.pages += allocation.pages().len(),
                Err(MemoryError::OutOfSpace { .. } | MemoryError::NoIdentityRegion { .. }) => {
                    workload.exhausted += 1
                }
                Err(err) => return Err(err),
            }
        }
    }

    workload.cross_core_pages += scope.allocate_cross_core_page()?.len();

    for round in 0..operands {
        if contexts.is_empty() {
            break;
        }
        scope.set_active_context(contexts[round % contexts.len()])?;

        let request = match scope.random().below(10) {
            0 => OperandRequest::new().cross_core(),
            1..=5 => OperandRequest::new().shared(),
            _ => OperandRequest::new(),
        };

        let operand = scope.memory_operand(request)?;

        let (text, register) = operand.format_as_operand(architecture, &mut registers)?;
        registers.free(register);
        workload
            .formatted
            .push(format!("{}: {text}", operand.label()));

        if operand.is_cross_core() {
            workload.cross_core_operands += 1;
        } else if operand.is_shared() {
            workload.shared_operands += 1;
            if operand.is_reused() {
                workload.reused_operands += 1;
            }
        } else {
            workload.exclusive_operands += 1;
        }
    }

    Ok(workload)
}
