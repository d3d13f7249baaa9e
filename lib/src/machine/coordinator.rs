// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! Machine-wide physical allocation
//!
//! The coordinator owns everything that is shared between address spaces: the pool of free
//! physical memory, the registry of contexts per core and the physical pages that are mapped into
//! every context at once.

use std::collections::BTreeMap;

use super::AddressSpace;
use super::ContextId;
use super::CoreId;
use crate::bits::Address;
use crate::error::MemoryError;
use crate::interval::Backing;
use crate::interval::IntervalTracker;
use crate::interval::Pool;
use crate::interval::SpanTag;
use crate::log;
use crate::page::ExecutionContext;
use crate::page::PageSize;
use crate::page::PageType;
use crate::random::RandomSource;

/// Physical page mapped into several contexts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossCorePage {
    size: PageSize,
    vas: BTreeMap<ContextId, Address>,
}

impl CrossCorePage {
    pub fn size(&self) -> PageSize {
        self.size
    }

    /// Virtual address of the page inside `context`
    pub fn va_in(&self, context: ContextId) -> Option<Address> {
        self.vas.get(&context).copied()
    }

    /// Every `(context, virtual address)` the page is mapped at
    pub fn mappings(&self) -> impl Iterator<Item = (ContextId, Address)> + '_ {
        self.vas.iter().map(|(ctx, va)| (*ctx, *va))
    }
}

/// Owner of the physical address pool and the context registry
#[derive(Debug, Clone)]
pub struct AllocationCoordinator {
    physical: IntervalTracker<SpanTag>,
    registry: BTreeMap<(CoreId, ExecutionContext), ContextId>,
    cross_core_pool: IntervalTracker<SpanTag>,
    cross_core_pages: BTreeMap<Address, CrossCorePage>,
}

impl AllocationCoordinator {
    /// Create a coordinator whose physical pool spans `pa_start..pa_start + pa_size`.
    pub fn new(pa_start: Address, pa_size: u64) -> Result<Self, MemoryError> {
        Ok(Self {
            physical: IntervalTracker::with_range(
                pa_start,
                pa_size,
                SpanTag::physical_pool(Pool::PhysicalFree),
            )?,
            registry: BTreeMap::new(),
            cross_core_pool: IntervalTracker::new(SpanTag::physical_pool(Pool::CrossCore)),
            cross_core_pages: BTreeMap::new(),
        })
    }

    pub(crate) fn register(
        &mut self,
        core: CoreId,
        execution_context: ExecutionContext,
        id: ContextId,
    ) -> Result<(), MemoryError> {
        if self.registry.insert((core, execution_context), id).is_some() {
            return Err(MemoryError::Config(format!(
                "context {execution_context} registered twice on core {core}"
            )));
        }

        Ok(())
    }

    /// Context registered for `execution_context` on `core`
    pub fn context_for(
        &self,
        core: CoreId,
        execution_context: ExecutionContext,
    ) -> Option<ContextId> {
        self.registry.get(&(core, execution_context)).copied()
    }

    /// Contexts of one core, ordered by execution context
    pub fn core_contexts(&self, core: CoreId) -> Vec<ContextId> {
        self.registry
            .iter()
            .filter(|((owner, _), _)| *owner == core)
            .map(|(_, id)| *id)
            .collect()
    }

    /// Every registered context, ordered by core and then by execution context
    pub fn all_contexts(&self) -> Vec<ContextId> {
        self.registry.values().copied().collect()
    }

    /// Cores with at least one registered context, in ascending order
    pub fn cores(&self) -> Vec<CoreId> {
        let mut cores: Vec<CoreId> = self.registry.keys().map(|(core, _)| *core).collect();
        cores.dedup();
        cores
    }

    /// Free physical memory
    pub fn physical_pool(&self) -> &IntervalTracker<SpanTag> {
        &self.physical
    }

    pub(crate) fn physical_pool_mut(&mut self) -> &mut IntervalTracker<SpanTag> {
        &mut self.physical
    }

    /// Take `size` bytes of physical memory aligned to `alignment_bits`.
    pub fn allocate_pa_interval(
        &mut self,
        size: u64,
        alignment_bits: Option<u32>,
        rng: &mut dyn RandomSource,
    ) -> Result<Address, MemoryError> {
        let region = self.physical.find_and_remove(size, alignment_bits, rng)?;
        log::trace!(pa = region.start, size, "Allocated physical interval");
        Ok(region.start)
    }

    /// Bind `va..va + size` of `space` to `pa..pa + size`. The virtual range moves from the
    /// unmapped to the mapped pool of the space; the physical pool is left untouched.
    pub fn map_va_to_pa(
        &self,
        space: &mut AddressSpace,
        va: Address,
        pa: Address,
        size: u64,
        page_type: PageType,
    ) -> Result<(), MemoryError> {
        space.bind(va, pa, size, page_type)?;
        log::trace!(
            context = %space.name(),
            va,
            pa,
            size,
            %page_type,
            "Mapped virtual range"
        );
        Ok(())
    }

    /// Physical bytes of cross-core pages not yet handed to blocks
    pub fn cross_core_pool(&self) -> &IntervalTracker<SpanTag> {
        &self.cross_core_pool
    }

    /// Cross-core pages by physical base address
    pub fn cross_core_pages(&self) -> &BTreeMap<Address, CrossCorePage> {
        &self.cross_core_pages
    }

    pub(crate) fn record_cross_core_mapping(
        &mut self,
        pa: Address,
        size: PageSize,
        context: ContextId,
        va: Address,
    ) {
        self.cross_core_pages
            .entry(pa)
            .or_insert_with(|| CrossCorePage {
                size,
                vas: BTreeMap::new(),
            })
            .vas
            .insert(context, va);
    }

    /// Make a fully mapped cross-core page available for cross-core blocks.
    pub(crate) fn add_cross_core_backing(
        &mut self,
        pa: Address,
        size: PageSize,
    ) -> Result<(), MemoryError> {
        let tag = self
            .cross_core_pool
            .default_tag()
            .with_backing(Backing::CrossCorePage { pa });
        self.cross_core_pool.add_region(pa, size.bytes(), Some(tag))
    }

    /// Take `size` bytes of cross-core physical memory aligned to `alignment_bits`.
    pub(crate) fn reserve_cross_core(
        &mut self,
        size: u64,
        alignment_bits: u32,
        rng: &mut dyn RandomSource,
    ) -> Result<Address, MemoryError> {
        let region = self
            .cross_core_pool
            .find_and_remove(size, Some(alignment_bits), rng)?;
        Ok(region.start)
    }

    /// Virtual address at which `context` sees the cross-core physical address `pa`
    pub fn cross_core_va(&self, context: ContextId, pa: Address) -> Option<Address> {
        let (base, page) = self.cross_core_pages.range(..=pa).next_back()?;
        let offset = pa - base;
        if offset >= page.size.bytes() {
            return None;
        }

        page.va_in(context).map(|va| va + offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::SeededRandom;

    #[test]
    fn registry_order() {
        let mut coordinator = AllocationCoordinator::new(0x8000_0000, 0x100_0000).unwrap();
        let mut next = 0;
        for core in [1, 0] {
            for ctx in [ExecutionContext::El1NonSecure, ExecutionContext::El3Root] {
                coordinator
                    .register(core, ctx, ContextId::new(next))
                    .unwrap();
                next += 1;
            }
        }

        assert_eq!(coordinator.cores(), [0, 1]);
        assert_eq!(coordinator.core_contexts(1), [ContextId::new(1), ContextId::new(0)]);
        assert_eq!(
            coordinator.all_contexts(),
            [3, 2, 1, 0].map(ContextId::new)
        );
        assert_eq!(
            coordinator.context_for(0, ExecutionContext::El1NonSecure),
            Some(ContextId::new(2))
        );
        assert!(
            coordinator
                .register(0, ExecutionContext::El3Root, ContextId::new(9))
                .is_err()
        );
    }

    #[test]
    fn physical_intervals_are_disjoint() {
        let mut rng = SeededRandom::new(5);
        let mut coordinator = AllocationCoordinator::new(0x8000_0000, 0x80_0000).unwrap();

        let a = coordinator
            .allocate_pa_interval(0x20_0000, Some(21), &mut rng)
            .unwrap();
        let b = coordinator
            .allocate_pa_interval(0x20_0000, Some(21), &mut rng)
            .unwrap();

        assert_ne!(a, b);
        assert_eq!(a % 0x20_0000, 0);
        assert_eq!(b % 0x20_0000, 0);
        assert_eq!(coordinator.physical_pool().total_size(), 0x40_0000);
    }

    #[test]
    fn cross_core_resolution() {
        let mut coordinator = AllocationCoordinator::new(0x8000_0000, 0x80_0000).unwrap();
        let page = 0x8020_0000;
        coordinator.record_cross_core_mapping(page, PageSize::Size2M, ContextId::new(0), 0x1_0000_0000);
        coordinator.record_cross_core_mapping(page, PageSize::Size2M, ContextId::new(1), 0x1_4000_0000);

        assert_eq!(
            coordinator.cross_core_va(ContextId::new(0), page + 0x10),
            Some(0x1_0000_0010)
        );
        assert_eq!(
            coordinator.cross_core_va(ContextId::new(1), page + 0x10),
            Some(0x1_4000_0010)
        );
        assert_eq!(coordinator.cross_core_va(ContextId::new(2), page), None);
        assert_eq!(coordinator.cross_core_va(ContextId::new(0), page + 0x20_0000), None);
        assert_eq!(coordinator.cross_core_va(ContextId::new(0), page - 1), None);
    }
}
