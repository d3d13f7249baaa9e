// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

mod common;

use std::collections::BTreeSet;

use arrow_memory::ContextRegistry;
use arrow_memory::bits;
use arrow_memory::memory::Architecture;
use arrow_memory::memory::OperandRequest;
use arrow_memory::memory::VALID_SIZES;
use arrow_memory::page::ExecutionContext;
use common::assert_disjoint;
use common::assert_partition;
use common::make_machine;
use proptest::prelude::any;
use proptest::prop_assert;
use proptest::proptest;

const CONTEXTS: [ExecutionContext; 2] = [ExecutionContext::El3Root, ExecutionContext::El1NonSecure];

#[test]
fn exclusive_operands_never_overlap() {
    let mut machine = make_machine(10, 1, &CONTEXTS);
    let mut ranges = Vec::new();
    let mut labels = BTreeSet::new();

    for _ in 0..500 {
        let operand = machine.memory_operand(OperandRequest::new()).unwrap();
        let address = operand.address(&machine).unwrap();

        assert!(VALID_SIZES.contains(&operand.byte_size()));
        assert!(bits::is_aligned(address, operand.alignment_bits()));
        assert!(!operand.is_reused());
        assert!(labels.insert(operand.label().to_owned()));
        ranges.push((address, address + operand.byte_size()));
    }

    assert_disjoint(ranges);
    assert_partition(machine.active());
}

#[test]
fn shared_operands_alias_and_stay_contained() {
    let mut machine = make_machine(11, 1, &CONTEXTS);
    let mut fresh = 0;
    let mut reused = 0;
    let mut blocks = Vec::new();

    for _ in 0..100 {
        let operand = machine
            .memory_operand(OperandRequest::new().shared())
            .unwrap();
        let block = machine.block(operand.block()).unwrap();
        let base = machine.block_address(block.id()).unwrap();
        let address = operand.address(&machine).unwrap();

        assert!(block.is_shared());
        assert!(address >= base);
        assert!(address + operand.byte_size() <= base + block.byte_size());
        assert!(bits::is_aligned(address, operand.alignment_bits()));

        if operand.is_reused() {
            reused += 1;
        } else {
            fresh += 1;
            blocks.push((base, base + block.byte_size()));
        }
    }

    assert!(fresh > 0, "no fresh shared block was created");
    assert!(reused > 0, "no shared block was reused");

    assert_disjoint(blocks);
    assert_partition(machine.active());
}

#[test]
fn reuse_stays_in_the_active_context() {
    let mut machine = make_machine(12, 1, &CONTEXTS);

    let first = machine
        .memory_operand(OperandRequest::sized(8).shared())
        .unwrap();
    let owner = machine.block(first.block()).unwrap().owner();

    let other = machine.contexts()[1];
    machine.set_active_context(other).unwrap();

    for _ in 0..50 {
        let operand = machine
            .memory_operand(OperandRequest::sized(1).shared())
            .unwrap();
        assert_ne!(operand.block(), first.block());
        assert_eq!(machine.block(operand.block()).unwrap().owner(), Some(other));
    }

    assert_ne!(owner, Some(other));
    assert_partition(machine.active());
}

#[test]
fn formatted_operands() {
    let mut machine = make_machine(13, 1, &CONTEXTS);
    let operand = machine.memory_operand(OperandRequest::sized(2)).unwrap();

    assert_eq!(
        operand.format_with(Architecture::X86, "rdi").unwrap(),
        "word [rdi]"
    );
    assert_eq!(
        operand.format_with(Architecture::RiscV, "a0").unwrap(),
        "0x0(a0)"
    );

    let partial = operand.partial(1, 1).unwrap();
    assert_eq!(
        partial.format_with(Architecture::Arm, "x1").unwrap(),
        "[x1,#0x1]"
    );
}

#[test]
fn operand_windows_fit_their_blocks() {
    proptest!(|(seed in any::<u64>(), shared in any::<bool>(), count in 1_usize..40)| {
        let mut machine = make_machine(seed, 1, &CONTEXTS);

        for _ in 0..count {
            let mut request = OperandRequest::new();
            request.shared = shared;

            let operand = machine.memory_operand(request).unwrap();
            let block = machine.block(operand.block()).unwrap();

            prop_assert!(operand.block_offset() + operand.byte_size() <= block.byte_size());
            prop_assert!(
                operand.physical_address() == block.physical_address() + operand.block_offset()
            );
        }
    });
}
