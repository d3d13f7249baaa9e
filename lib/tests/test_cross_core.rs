// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

mod common;

use arrow_memory::ContextId;
use arrow_memory::ContextRegistry;
use arrow_memory::Machine;
use arrow_memory::MachineConfig;
use arrow_memory::MemoryError;
use arrow_memory::machine::PageRequest;
use arrow_memory::memory::OperandRequest;
use arrow_memory::page::ExecutionContext;
use arrow_memory::page::PageSize;
use arrow_memory::page::PageType;
use common::assert_disjoint;
use common::assert_partition;
use common::make_machine;

#[test]
fn one_physical_page_for_every_context() {
    let mut machine = make_machine(20, 3, &[ExecutionContext::El1NonSecure]);
    machine.set_active_context(ContextId::new(1)).unwrap();

    let pages = machine.allocate_cross_core_page().unwrap();

    assert_eq!(pages.len(), 3);
    assert_eq!(machine.active_context(), ContextId::new(1));

    let pa = pages[0].pa();
    for (page, space) in pages.iter().zip(machine.address_spaces()) {
        assert_eq!(page.pa(), pa);
        assert!(page.is_cross_core());
        assert_eq!(page.size(), PageSize::Size2M);
        assert_eq!(space.translate(page.va()), Some(pa));
        assert_eq!(space.pages().len(), 1);
        assert_partition(space);
    }

    assert!(
        !machine
            .coordinator()
            .physical_pool()
            .is_region_available(pa, 1)
    );
}

#[test]
fn failure_restores_the_active_context() {
    let mut machine = Machine::new(MachineConfig {
        seed: 21,
        cores: 3,
        execution_contexts: vec![ExecutionContext::El1NonSecure],
        va_size: 0x40_0000,
        ..MachineConfig::default()
    })
    .unwrap();

    // Exhaust the virtual window of the last context
    let last = ContextId::new(2);
    for _ in 0..2 {
        machine
            .allocate_page_in(
                last,
                &PageRequest::new(PageType::Code).with_size(PageSize::Size2M),
            )
            .unwrap();
    }

    machine.set_active_context(ContextId::new(1)).unwrap();
    assert!(matches!(
        machine.allocate_cross_core_page(),
        Err(MemoryError::OutOfSpace { .. })
    ));
    assert_eq!(machine.active_context(), ContextId::new(1));

    for space in machine.address_spaces() {
        assert_partition(space);
    }
}

#[test]
fn cross_core_operands() {
    let mut machine = make_machine(22, 3, &[ExecutionContext::El1NonSecure]);

    let operands: Vec<_> = (0..20)
        .map(|_| {
            machine
                .memory_operand(OperandRequest::sized(8).cross_core())
                .unwrap()
        })
        .collect();

    assert!(operands.iter().all(|operand| operand.is_cross_core()));
    assert_eq!(machine.coordinator().cross_core_pages().len(), 1);

    assert_disjoint(
        operands
            .iter()
            .map(|operand| {
                let pa = operand.physical_address();
                (pa, pa + operand.byte_size())
            })
            .collect(),
    );

    for ctx in machine.contexts() {
        machine.set_active_context(ctx).unwrap();
        for operand in &operands {
            let va = operand.address(&machine).unwrap();
            assert_eq!(
                machine.active().translate(va),
                Some(operand.physical_address())
            );
        }
        assert_partition(machine.active());
    }
}
