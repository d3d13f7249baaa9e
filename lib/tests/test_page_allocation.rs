// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

mod common;

use arrow_memory::ContextRegistry;
use arrow_memory::MemoryError;
use arrow_memory::bits;
use arrow_memory::machine::PageRequest;
use arrow_memory::page::ExecutionContext;
use arrow_memory::page::PageSize;
use arrow_memory::page::PageType;
use arrow_memory::page::Permissions;
use arrow_memory::random::RandomSource;
use common::assert_disjoint;
use common::assert_partition;
use common::make_machine;
use strum::IntoEnumIterator;

const CONTEXTS: [ExecutionContext; 3] = [
    ExecutionContext::El3Root,
    ExecutionContext::El2NonSecure,
    ExecutionContext::El1NonSecure,
];

#[test]
fn random_workload_keeps_invariants() {
    let mut machine = make_machine(0xa11c, 2, &CONTEXTS);
    let contexts = machine.contexts();

    for round in 0..60_usize {
        let ctx = contexts[round % contexts.len()];
        let page_type = PageType::iter()
            .nth(round % 4)
            .unwrap_or(PageType::Data);

        let mut request = PageRequest::new(page_type).sequential(1 + round % 3);
        request.va_eq_pa = round % 5 == 0;
        if round % 7 == 0 {
            request = request.with_size(PageSize::Size2M).with_alignment_bits(22);
        }

        let allocation = machine.allocate_page_in(ctx, &request).unwrap();
        for page in allocation.pages() {
            assert!(bits::is_aligned(page.va(), page.size().alignment_bits()));
            assert!(bits::is_aligned(page.pa(), page.size().alignment_bits()));
            if request.va_eq_pa {
                assert_eq!(page.va(), page.pa());
            }
        }

        if let Some(first) = allocation.first() {
            let required = request
                .alignment_bits
                .unwrap_or(first.size().alignment_bits());
            assert!(bits::is_aligned(first.va(), required));
        }
    }

    let mut physical = Vec::new();
    for space in machine.address_spaces() {
        assert_partition(space);

        let virt = space
            .pages()
            .iter()
            .map(|page| (page.va(), page.end_va() + 1))
            .collect();
        assert_disjoint(virt);

        for page in space.pages() {
            assert!(space.is_mapped(page.va(), page.size().bytes()));
            assert!(!space.unmapped().is_region_available(page.va(), 1));
            physical.push((page.pa(), page.end_pa() + 1));
        }
    }

    // Private pages never share physical memory, not even across contexts
    assert_disjoint(physical);
}

#[test]
fn small_pages_need_natural_alignment() {
    let mut machine = make_machine(1, 1, &CONTEXTS);

    let result = machine.allocate_page(
        &PageRequest::new(PageType::Code)
            .with_size(PageSize::Size4K)
            .with_alignment_bits(8),
    );

    assert_eq!(
        result,
        Err(MemoryError::InsufficientAlignment {
            page_size: PageSize::Size4K,
            required: 12,
            requested: 8,
        })
    );
    assert!(machine.active().pages().is_empty());
    assert_partition(machine.active());
}

#[test]
fn identity_pages_leave_both_pools() {
    let mut machine = make_machine(2, 1, &CONTEXTS);

    let pages = machine
        .allocate_page(
            &PageRequest::new(PageType::Device)
                .with_size(PageSize::Size4K)
                .with_permissions(Permissions::READ | Permissions::WRITE)
                .sequential(4)
                .identity(),
        )
        .unwrap()
        .into_pages();

    assert_eq!(pages.len(), 4);
    for page in &pages {
        assert_eq!(page.va(), page.pa());
        assert!(!page.permissions().can_exec());
        assert!(
            !machine
                .coordinator()
                .physical_pool()
                .is_region_available(page.pa(), 0x1000)
        );
        assert!(!machine.active().unmapped().is_region_available(page.va(), 1));
    }

    assert_disjoint(pages.iter().map(|p| (p.va(), p.end_va() + 1)).collect());
    assert_partition(machine.active());
}

#[test]
fn queries() {
    let mut machine = make_machine(3, 1, &CONTEXTS);

    let page = machine
        .allocate_page(&PageRequest::new(PageType::System).with_size(PageSize::Size2M))
        .unwrap()
        .into_pages()
        .remove(0);

    let space = machine.active();
    assert!(space.is_mapped(page.va(), 0x20_0000));
    assert!(!space.is_mapped(page.va(), 0x20_0001));
    assert!(space.is_allocated(page.va() + 0x1000, 0x10));
    assert!(!space.is_allocated(page.va() + 0x20_0000, 0x10));
    assert_eq!(space.pages_by_type(PageType::System).count(), 1);

    let stats = machine.memory_stats();
    assert_eq!(stats.len(), CONTEXTS.len());
    assert_eq!(stats[0].mapped_bytes, 0x20_0000);
    assert_eq!(stats[1].mapped_bytes, 0);

    let probe = machine
        .active()
        .find_available_region(0x1000, Some(12), &mut LowestDraw)
        .unwrap();
    assert!(!machine.active().is_mapped(probe, 1));
    assert_partition(machine.active());
    assert_disjoint(vec![(page.va(), page.end_va() + 1), (probe, probe + 0x1000)]);
}

/// Always draws the lowest option
struct LowestDraw;

impl RandomSource for LowestDraw {
    fn below(&mut self, _bound: u64) -> u64 {
        0
    }
}
