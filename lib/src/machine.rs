// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! Machine model
//!
//! A [`Machine`] owns every address space of the simulated machine, the [`AllocationCoordinator`]
//! that binds them to physical memory, the allocation blocks handed out so far and the random
//! generator driving all policy decisions. Exactly one address space is active at any time;
//! allocations without an explicit context happen in the active one.

mod address_space;
mod coordinator;

use std::ops::Deref;
use std::ops::DerefMut;

use serde::Serialize;

pub use self::address_space::AddressSpace;
pub use self::address_space::MemoryStats;
pub use self::address_space::PageAllocation;
pub use self::address_space::PageRequest;
pub use self::coordinator::AllocationCoordinator;
pub use self::coordinator::CrossCorePage;
use crate::bits::Address;
use crate::config::MachineConfig;
use crate::error::MemoryError;
use crate::ids::IdGenerator;
use crate::interval::Interval;
use crate::interval::SpanTag;
use crate::log;
use crate::memory::AllocationBlock;
use crate::memory::BlockId;
use crate::memory::Placement;
use crate::page::ExecutionContext;
use crate::page::Page;
use crate::page::PageSize;
use crate::random::RandomSource;
use crate::random::SeededRandom;

/// Index of a core
pub type CoreId = u32;

/// Bounds of the random starting point of label identifiers
const LABEL_ID_SEED: (u64, u64) = (1234, 5678);

/// Identifier of an address space inside its [`Machine`]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, derive_more::Display,
)]
#[display(fmt = "context#{}", _0)]
pub struct ContextId(usize);

impl ContextId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

/// Registry of address spaces with one active member
pub trait ContextRegistry {
    /// Context that allocations currently target
    fn active_context(&self) -> ContextId;

    /// Make `id` the active context.
    fn set_active_context(&mut self, id: ContextId) -> Result<(), MemoryError>;

    /// All contexts, ordered by core and execution context
    fn contexts(&self) -> Vec<ContextId>;
}

/// Scoped switch of the active context
///
/// The context that was active when the scope was entered is restored when the scope is dropped,
/// whether the work inside it succeeded, failed or unwound.
pub struct ContextScope<'a, R: ContextRegistry + ?Sized> {
    registry: &'a mut R,
    restore: ContextId,
}

impl<'a, R: ContextRegistry + ?Sized> ContextScope<'a, R> {
    pub fn enter(registry: &'a mut R) -> Self {
        let restore = registry.active_context();
        Self { registry, restore }
    }

    /// Context that will be restored
    pub fn restores(&self) -> ContextId {
        self.restore
    }
}

impl<R: ContextRegistry + ?Sized> Deref for ContextScope<'_, R> {
    type Target = R;

    fn deref(&self) -> &Self::Target {
        self.registry
    }
}

impl<R: ContextRegistry + ?Sized> DerefMut for ContextScope<'_, R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.registry
    }
}

impl<R: ContextRegistry + ?Sized> Drop for ContextScope<'_, R> {
    fn drop(&mut self) {
        if let Err(err) = self.registry.set_active_context(self.restore) {
            log::error!(context = %self.restore, %err, "Failed to restore the active context");
        }
    }
}

/// Simulated machine: address spaces, physical memory and allocation blocks
pub struct Machine {
    config: MachineConfig,
    coordinator: AllocationCoordinator,
    contexts: Vec<AddressSpace>,
    active: ContextId,
    blocks: Vec<AllocationBlock>,
    ids: IdGenerator,
    rng: Box<dyn RandomSource>,
}

impl Machine {
    /// Build a machine whose random decisions are seeded from the configuration.
    pub fn new(config: MachineConfig) -> Result<Self, MemoryError> {
        let rng = Box::new(SeededRandom::new(config.seed));
        Self::with_random(config, rng)
    }

    /// Build a machine drawing its random decisions from `rng`.
    pub fn with_random(
        config: MachineConfig,
        mut rng: Box<dyn RandomSource>,
    ) -> Result<Self, MemoryError> {
        config.validate()?;

        let mut coordinator = AllocationCoordinator::new(config.pa_start, config.pa_size)?;
        let mut contexts = Vec::new();

        for core in 0..config.cores {
            for execution_context in config.execution_contexts.iter().copied() {
                let id = ContextId::new(contexts.len());
                contexts.push(AddressSpace::new(
                    id,
                    core,
                    execution_context,
                    config.va_start,
                    config.va_size,
                )?);
                coordinator.register(core, execution_context, id)?;
            }
        }

        let (low, high) = LABEL_ID_SEED;
        let ids = IdGenerator::new(rng.range_inclusive(low, high));

        log::info!(
            cores = config.cores,
            contexts = contexts.len(),
            seed = config.seed,
            "Machine created"
        );

        Ok(Self {
            config,
            coordinator,
            contexts,
            active: ContextId::new(0),
            blocks: Vec::new(),
            ids,
            rng,
        })
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &AllocationCoordinator {
        &self.coordinator
    }

    /// Address spaces in registration order
    pub fn address_spaces(&self) -> &[AddressSpace] {
        &self.contexts
    }

    pub fn context(&self, id: ContextId) -> Result<&AddressSpace, MemoryError> {
        self.contexts
            .get(id.index())
            .ok_or(MemoryError::UnknownContext(id))
    }

    pub fn context_mut(&mut self, id: ContextId) -> Result<&mut AddressSpace, MemoryError> {
        self.contexts
            .get_mut(id.index())
            .ok_or(MemoryError::UnknownContext(id))
    }

    /// Context registered for `execution_context` on `core`
    pub fn find_context(
        &self,
        core: CoreId,
        execution_context: ExecutionContext,
    ) -> Option<ContextId> {
        self.coordinator.context_for(core, execution_context)
    }

    /// Active address space
    pub fn active(&self) -> &AddressSpace {
        &self.contexts[self.active.index()]
    }

    pub fn active_mut(&mut self) -> &mut AddressSpace {
        &mut self.contexts[self.active.index()]
    }

    /// Random generator driving every policy decision of this machine
    pub fn random(&mut self) -> &mut dyn RandomSource {
        self.rng.as_mut()
    }

    /// Generator of label identifiers
    pub fn ids_mut(&mut self) -> &mut IdGenerator {
        &mut self.ids
    }

    /// Blocks in creation order
    pub fn blocks(&self) -> &[AllocationBlock] {
        &self.blocks
    }

    pub fn block(&self, id: BlockId) -> Result<&AllocationBlock, MemoryError> {
        self.blocks
            .get(id.index())
            .ok_or(MemoryError::UnknownBlock(id))
    }

    pub(crate) fn push_block(&mut self, block: AllocationBlock) -> BlockId {
        let id = block.id();
        debug_assert_eq!(id.index(), self.blocks.len());
        self.blocks.push(block);
        id
    }

    /// Identifier the next created block will receive
    pub(crate) fn next_block_id(&self) -> BlockId {
        BlockId::new(self.blocks.len())
    }

    /// Allocate pages in the active context.
    pub fn allocate_page(&mut self, request: &PageRequest) -> Result<PageAllocation, MemoryError> {
        let id = self.active;
        self.allocate_page_in(id, request)
    }

    /// Allocate pages in the given context.
    pub fn allocate_page_in(
        &mut self,
        id: ContextId,
        request: &PageRequest,
    ) -> Result<PageAllocation, MemoryError> {
        let Machine {
            contexts,
            coordinator,
            rng,
            ..
        } = self;

        let space = contexts
            .get_mut(id.index())
            .ok_or(MemoryError::UnknownContext(id))?;
        space.allocate_page(request, coordinator, rng.as_mut())
    }

    /// Allocate one 2 MiB data page whose physical range is mapped into every context of every
    /// core. Returns one page record per context, in registry order.
    ///
    /// The active context is switched to each target in turn and restored afterwards, also when
    /// the allocation fails part way.
    pub fn allocate_cross_core_page(&mut self) -> Result<Vec<Page>, MemoryError> {
        let size = PageSize::Size2M;
        let pa = self.coordinator.allocate_pa_interval(
            size.bytes(),
            Some(size.alignment_bits()),
            self.rng.as_mut(),
        )?;

        let targets = self.coordinator.all_contexts();
        let mut pages = Vec::with_capacity(targets.len());
        {
            let mut scope = ContextScope::enter(&mut *self);
            for id in targets {
                scope.set_active_context(id)?;
                pages.push(scope.map_cross_core_page_in_active(pa, size)?);
            }
        }

        self.coordinator.add_cross_core_backing(pa, size)?;
        log::debug!(pa, contexts = pages.len(), "Allocated cross-core page");
        Ok(pages)
    }

    fn map_cross_core_page_in_active(
        &mut self,
        pa: Address,
        size: PageSize,
    ) -> Result<Page, MemoryError> {
        let Machine {
            contexts,
            coordinator,
            rng,
            active,
            ..
        } = self;

        contexts[active.index()].map_cross_core_page(pa, size, coordinator, rng.as_mut())
    }

    /// Reserve the backing range of a private block in the active context. A new data page is
    /// allocated when no block-backing page has room left.
    pub(crate) fn reserve_block_range(
        &mut self,
        size: u64,
        alignment_bits: u32,
        at: Option<Address>,
    ) -> Result<Interval<SpanTag>, MemoryError> {
        let Machine {
            contexts,
            coordinator,
            rng,
            active,
            ..
        } = self;
        let space = &mut contexts[active.index()];

        match space.reserve_block_range(size, alignment_bits, at, rng.as_mut()) {
            Err(MemoryError::OutOfSpace { .. }) if at.is_none() => {
                space.grow_block_backing(size, alignment_bits, coordinator, rng.as_mut())?;
                space.reserve_block_range(size, alignment_bits, None, rng.as_mut())
            }
            result => result,
        }
    }

    /// Reserve the physical range of a cross-core block. A new cross-core page is allocated when
    /// the existing ones have no room left.
    pub(crate) fn reserve_cross_core_range(
        &mut self,
        size: u64,
        alignment_bits: u32,
    ) -> Result<Address, MemoryError> {
        let page = PageSize::Size2M;

        match self
            .coordinator
            .reserve_cross_core(size, alignment_bits, self.rng.as_mut())
        {
            Err(MemoryError::OutOfSpace { .. })
                if size <= page.bytes() && alignment_bits <= page.alignment_bits() =>
            {
                self.allocate_cross_core_page()?;
                self.coordinator
                    .reserve_cross_core(size, alignment_bits, self.rng.as_mut())
            }
            result => result,
        }
    }

    /// Current virtual address of a block in the active context
    pub fn block_address(&self, id: BlockId) -> Result<Address, MemoryError> {
        match self.block(id)?.placement() {
            Placement::Private { va, .. } => Ok(va),
            Placement::CrossCore { pa } => self
                .coordinator
                .cross_core_va(self.active, pa)
                .ok_or(MemoryError::Unbacked(pa)),
        }
    }

    /// Occupancy of every address space, in registration order
    pub fn memory_stats(&self) -> Vec<MemoryStats> {
        self.contexts.iter().map(AddressSpace::memory_stats).collect()
    }

    pub fn log_summary(&self) {
        for space in &self.contexts {
            space.log_summary();
        }
    }

    pub fn log_page_tables(&self) {
        for space in &self.contexts {
            space.log_page_tables();
        }
    }
}

impl ContextRegistry for Machine {
    fn active_context(&self) -> ContextId {
        self.active
    }

    fn set_active_context(&mut self, id: ContextId) -> Result<(), MemoryError> {
        if id.index() >= self.contexts.len() {
            return Err(MemoryError::UnknownContext(id));
        }

        self.active = id;
        Ok(())
    }

    fn contexts(&self) -> Vec<ContextId> {
        self.coordinator.all_contexts()
    }
}
