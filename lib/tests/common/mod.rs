// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

use arrow_memory::Address;
use arrow_memory::Machine;
use arrow_memory::MachineConfig;
use arrow_memory::machine::AddressSpace;
use arrow_memory::page::ExecutionContext;

/// Machine with `cores` cores running the given execution contexts
pub fn make_machine(seed: u64, cores: u32, contexts: &[ExecutionContext]) -> Machine {
    Machine::new(MachineConfig {
        seed,
        cores,
        execution_contexts: contexts.to_vec(),
        ..MachineConfig::default()
    })
    .unwrap()
}

/// The unmapped and mapped pools of `space` must tile its window without gaps or overlap.
pub fn assert_partition(space: &AddressSpace) {
    let mut spans: Vec<(Address, Address)> = space
        .unmapped()
        .intervals()
        .chain(space.mapped().intervals())
        .map(|span| (span.start, span.end()))
        .collect();
    spans.sort_unstable();

    let mut cursor = space.va_start();
    for (start, end) in spans {
        assert_eq!(start, cursor, "{}: gap or overlap at {start:#x}", space.name());
        cursor = end;
    }
    assert_eq!(cursor, space.va_start() + space.va_size());
}

/// No two `(start, end)` ranges may overlap.
pub fn assert_disjoint(mut ranges: Vec<(Address, Address)>) {
    ranges.sort_unstable();
    for pair in ranges.windows(2) {
        assert!(
            pair[0].1 <= pair[1].0,
            "{:#x}..{:#x} overlaps {:#x}..{:#x}",
            pair[0].0,
            pair[0].1,
            pair[1].0,
            pair[1].1
        );
    }
}
