// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! Per-context virtual address space
//!
//! # Pools
//!
//! Every address space tracks its virtual window with four pools:
//!
//! - `unmapped` holds the virtual addresses not bound to physical memory
//! - `mapped` holds the virtual addresses bound by some page
//! - `non_allocated` holds mapped bytes of block-backing pages that no block uses yet
//! - `allocated` holds mapped bytes handed out to blocks
//!
//! `unmapped` and `mapped` partition the window. `allocated` and `non_allocated` are disjoint and
//! both contained in `mapped`.

use std::collections::BTreeMap;
use std::fmt;

use itertools::Itertools;
use serde::Serialize;

use super::AllocationCoordinator;
use super::ContextId;
use super::CoreId;
use crate::bits;
use crate::bits::Address;
use crate::error::MemoryError;
use crate::interval;
use crate::interval::Backing;
use crate::interval::Interval;
use crate::interval::IntervalTracker;
use crate::interval::Pool;
use crate::interval::SpanTag;
use crate::log;
use crate::page::Cacheability;
use crate::page::ExecutionContext;
use crate::page::Page;
use crate::page::PageAttributes;
use crate::page::PageSize;
use crate::page::PageType;
use crate::page::Permissions;
use crate::page::Shareability;
use crate::random::RandomSource;

/// Parameters of a page allocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Page size, drawn among the allocatable sizes when absent
    pub size: Option<PageSize>,

    /// Alignment of the first page, the natural alignment of `size` when absent
    pub alignment_bits: Option<u32>,

    pub page_type: Option<PageType>,

    /// Defaults to read, write and execute
    pub permissions: Option<Permissions>,

    pub cacheability: Option<Cacheability>,
    pub shareability: Option<Shareability>,
    pub custom_attributes: BTreeMap<String, String>,

    /// Number of virtually and physically contiguous pages
    pub sequential_page_count: usize,

    /// Require identical virtual and physical addresses
    pub va_eq_pa: bool,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            size: None,
            alignment_bits: None,
            page_type: None,
            permissions: None,
            cacheability: None,
            shareability: None,
            custom_attributes: BTreeMap::new(),
            sequential_page_count: 1,
            va_eq_pa: false,
        }
    }
}

impl PageRequest {
    /// Request a single page of the given type with default attributes.
    pub fn new(page_type: PageType) -> Self {
        Self {
            page_type: Some(page_type),
            ..Self::default()
        }
    }

    pub fn with_size(mut self, size: PageSize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_alignment_bits(mut self, bits: u32) -> Self {
        self.alignment_bits = Some(bits);
        self
    }

    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn with_cacheability(mut self, cacheability: Cacheability) -> Self {
        self.cacheability = Some(cacheability);
        self
    }

    pub fn with_shareability(mut self, shareability: Shareability) -> Self {
        self.shareability = Some(shareability);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_attributes.insert(key.into(), value.into());
        self
    }

    pub fn sequential(mut self, count: usize) -> Self {
        self.sequential_page_count = count;
        self
    }

    /// Require the pages to be identity mapped.
    pub fn identity(mut self) -> Self {
        self.va_eq_pa = true;
        self
    }
}

/// Pages produced by one allocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageAllocation {
    Single(Page),
    Sequence(Vec<Page>),
}

impl PageAllocation {
    pub fn pages(&self) -> &[Page] {
        match self {
            PageAllocation::Single(page) => std::slice::from_ref(page),
            PageAllocation::Sequence(pages) => pages,
        }
    }

    pub fn into_pages(self) -> Vec<Page> {
        match self {
            PageAllocation::Single(page) => vec![page],
            PageAllocation::Sequence(pages) => pages,
        }
    }

    /// Page at the lowest address
    pub fn first(&self) -> Option<&Page> {
        self.pages().first()
    }
}

/// Occupancy snapshot of one address space
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub context: String,
    pub execution_context: ExecutionContext,
    pub core: CoreId,
    pub va_start: Address,
    pub va_size: u64,
    pub unmapped_bytes: u64,
    pub unmapped_intervals: usize,
    pub mapped_bytes: u64,
    pub mapped_intervals: usize,
    pub allocated_bytes: u64,
    pub non_allocated_bytes: u64,
    pub page_count: usize,
    pub cross_core_pages: usize,
    pub pages_by_type: BTreeMap<PageType, usize>,
}

impl fmt::Display for MemoryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} [{:#x}..{:#x}]",
            self.context,
            self.va_start,
            self.va_start + self.va_size
        )?;
        writeln!(
            f,
            "  unmapped: {:#x} bytes in {} intervals",
            self.unmapped_bytes, self.unmapped_intervals
        )?;
        writeln!(
            f,
            "  mapped: {:#x} bytes in {} intervals ({:#x} allocated, {:#x} free for blocks)",
            self.mapped_bytes,
            self.mapped_intervals,
            self.allocated_bytes,
            self.non_allocated_bytes
        )?;

        write!(f, "  pages: {}", self.page_count)?;
        for (page_type, count) in &self.pages_by_type {
            write!(f, ", {page_type}: {count}")?;
        }
        if self.cross_core_pages > 0 {
            write!(f, ", cross-core: {}", self.cross_core_pages)?;
        }

        Ok(())
    }
}

/// Virtual address space of one `(core, execution context)` pair
#[derive(Debug, Clone)]
pub struct AddressSpace {
    id: ContextId,
    core: CoreId,
    execution_context: ExecutionContext,
    name: String,
    va_start: Address,
    va_size: u64,
    unmapped: IntervalTracker<SpanTag>,
    mapped: IntervalTracker<SpanTag>,
    allocated: IntervalTracker<SpanTag>,
    non_allocated: IntervalTracker<SpanTag>,
    pages: Vec<Page>,
    pages_by_type: BTreeMap<PageType, Vec<usize>>,
    attributes: BTreeMap<String, serde_json::Value>,
}

impl AddressSpace {
    /// Create an address space whose whole window `va_start..va_start + va_size` is unmapped.
    pub fn new(
        id: ContextId,
        core: CoreId,
        execution_context: ExecutionContext,
        va_start: Address,
        va_size: u64,
    ) -> Result<Self, MemoryError> {
        let tag = |pool| SpanTag::virtual_pool(pool, id);

        Ok(Self {
            id,
            core,
            execution_context,
            name: format!("c{core}_{}", execution_context.short_name()),
            va_start,
            va_size,
            unmapped: IntervalTracker::with_range(va_start, va_size, tag(Pool::Unmapped))?,
            mapped: IntervalTracker::new(tag(Pool::Mapped)),
            allocated: IntervalTracker::new(tag(Pool::Allocated)),
            non_allocated: IntervalTracker::new(tag(Pool::NonAllocated)),
            pages: Vec::new(),
            pages_by_type: BTreeMap::new(),
            attributes: BTreeMap::new(),
        })
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn core(&self) -> CoreId {
        self.core
    }

    pub fn execution_context(&self) -> ExecutionContext {
        self.execution_context
    }

    /// Label such as `c0_el1NS`
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn va_start(&self) -> Address {
        self.va_start
    }

    pub fn va_size(&self) -> u64 {
        self.va_size
    }

    pub fn unmapped(&self) -> &IntervalTracker<SpanTag> {
        &self.unmapped
    }

    pub fn mapped(&self) -> &IntervalTracker<SpanTag> {
        &self.mapped
    }

    pub fn allocated(&self) -> &IntervalTracker<SpanTag> {
        &self.allocated
    }

    pub fn non_allocated(&self) -> &IntervalTracker<SpanTag> {
        &self.non_allocated
    }

    /// Pages in allocation order
    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    /// Pages of one type in allocation order
    pub fn pages_by_type(&self, page_type: PageType) -> impl Iterator<Item = &Page> + '_ {
        self.pages_by_type
            .get(&page_type)
            .into_iter()
            .flatten()
            .filter_map(|idx| self.pages.get(*idx))
    }

    /// Allocate one or more contiguous pages.
    ///
    /// Without `va_eq_pa` the virtual and physical ranges are drawn independently. With it, only
    /// ranges free in both the unmapped pool and the physical pool are considered.
    pub fn allocate_page(
        &mut self,
        request: &PageRequest,
        coordinator: &mut AllocationCoordinator,
        rng: &mut dyn RandomSource,
    ) -> Result<PageAllocation, MemoryError> {
        let page_type = request.page_type.ok_or(MemoryError::MissingPageType)?;

        if request.sequential_page_count == 0 {
            return Err(MemoryError::InvalidSize {
                size: 0,
                reason: "at least one page must be requested",
            });
        }

        let size = match request.size {
            Some(size) if size.is_allocatable() => size,
            Some(size) => {
                return Err(MemoryError::InvalidSize {
                    size: size.bytes(),
                    reason: "only 4KB and 2MB pages can be allocated",
                });
            }
            None => PageSize::ALLOCATABLE[rng.index(PageSize::ALLOCATABLE.len())],
        };

        let natural = size.alignment_bits();
        let alignment_bits = request.alignment_bits.unwrap_or(natural);
        if alignment_bits < natural {
            return Err(MemoryError::InsufficientAlignment {
                page_size: size,
                required: natural,
                requested: alignment_bits,
            });
        }
        if alignment_bits > bits::MAX_ALIGNMENT_BITS {
            return Err(MemoryError::InvalidAlignment(alignment_bits));
        }

        let total = (request.sequential_page_count as u64)
            .checked_mul(size.bytes())
            .ok_or(MemoryError::InvalidSize {
                size: size.bytes(),
                reason: "too many sequential pages",
            })?;

        let (va, pa) = if request.va_eq_pa {
            self.take_identity_region(total, alignment_bits, coordinator, rng)?
        } else {
            let va = self
                .unmapped
                .find_and_remove(total, Some(alignment_bits), rng)?
                .start;

            match coordinator.allocate_pa_interval(total, Some(alignment_bits), rng) {
                Ok(pa) => (va, pa),
                Err(err) => {
                    self.unmapped.add_region(va, total, None)?;
                    return Err(err);
                }
            }
        };

        coordinator.map_va_to_pa(self, va, pa, total, page_type)?;

        let attrs = PageAttributes {
            page_type,
            permissions: request.permissions.unwrap_or(Permissions::ALL),
            cacheability: request.cacheability.unwrap_or_default(),
            shareability: request.shareability.unwrap_or_default(),
            execution_context: self.execution_context,
            cross_core: false,
            custom_attributes: request.custom_attributes.clone(),
        };

        let mut pages: Vec<Page> = (0..request.sequential_page_count as u64)
            .map(|idx| {
                let offset = idx * size.bytes();
                Page::new(va + offset, pa + offset, size, attrs.clone())
            })
            .collect();

        for page in &pages {
            log::debug!(context = %self.name, %page, "Allocated page");
            self.record_page(page.clone());
        }

        Ok(match pages.len() {
            1 => PageAllocation::Single(pages.remove(0)),
            _ => PageAllocation::Sequence(pages),
        })
    }

    /// Find a range that is both unmapped here and physically free, and take it from both pools.
    fn take_identity_region(
        &mut self,
        size: u64,
        alignment_bits: u32,
        coordinator: &mut AllocationCoordinator,
        rng: &mut dyn RandomSource,
    ) -> Result<(Address, Address), MemoryError> {
        let candidates: Vec<(Address, Address)> = self
            .unmapped
            .intervals()
            .cartesian_product(coordinator.physical_pool().intervals())
            .filter_map(|(va, pa)| {
                let start = va.start.max(pa.start);
                let end = va.end().min(pa.end());
                if end <= start || end - start < size {
                    return None;
                }

                bits::aligned_window(start, end - start, size, alignment_bits)
            })
            .collect();

        if candidates.is_empty() {
            return Err(MemoryError::NoIdentityRegion {
                size,
                alignment_bits,
            });
        }

        let (first, last) = candidates[rng.index(candidates.len())];
        let addr = interval::pick_aligned_start(rng, first, last, alignment_bits);

        self.unmapped.remove_region(addr, size)?;
        if let Err(err) = coordinator.physical_pool_mut().remove_region(addr, size) {
            self.unmapped.add_region(addr, size, None)?;
            return Err(err);
        }

        log::trace!(context = %self.name, addr, size, "Found identity region");
        Ok((addr, addr))
    }

    /// Map a virtual range of this space onto the cross-core page at `pa`.
    pub(crate) fn map_cross_core_page(
        &mut self,
        pa: Address,
        size: PageSize,
        coordinator: &mut AllocationCoordinator,
        rng: &mut dyn RandomSource,
    ) -> Result<Page, MemoryError> {
        let va = self
            .unmapped
            .find_and_remove(size.bytes(), Some(size.alignment_bits()), rng)?
            .start;

        coordinator.map_va_to_pa(self, va, pa, size.bytes(), PageType::Data)?;
        coordinator.record_cross_core_mapping(pa, size, self.id, va);

        let page = Page::new(va, pa, size, PageAttributes {
            page_type: PageType::Data,
            permissions: Permissions::ALL,
            cacheability: Cacheability::WriteBack,
            shareability: Shareability::NonShareable,
            execution_context: self.execution_context,
            cross_core: true,
            custom_attributes: BTreeMap::new(),
        });

        log::debug!(context = %self.name, %page, "Allocated cross-core page");
        self.record_page(page.clone());
        Ok(page)
    }

    /// Move `va..va + size` from the unmapped to the mapped pool.
    pub(crate) fn bind(
        &mut self,
        va: Address,
        pa: Address,
        size: u64,
        page_type: PageType,
    ) -> Result<(), MemoryError> {
        let in_window = va >= self.va_start
            && va
                .checked_add(size)
                .is_some_and(|end| end <= self.va_start + self.va_size);
        if !in_window {
            return Err(MemoryError::RegionNotFree { start: va, size });
        }

        let was_unmapped = self.unmapped.is_region_available(va, size);
        if was_unmapped {
            self.unmapped.remove_region(va, size)?;
        }

        let tag = self
            .mapped
            .default_tag()
            .with_page_type(page_type)
            .with_backing(Backing::translated(va, pa));

        if let Err(err) = self.mapped.add_region(va, size, Some(tag)) {
            if was_unmapped {
                self.unmapped.add_region(va, size, None)?;
            }
            return Err(err);
        }

        Ok(())
    }

    fn record_page(&mut self, page: Page) {
        self.pages_by_type
            .entry(page.page_type())
            .or_default()
            .push(self.pages.len());
        self.pages.push(page);
    }

    /// Take `size` bytes aligned to `alignment_bits` from the block-backing pages of this space,
    /// either at `at` or at a random position.
    pub(crate) fn reserve_block_range(
        &mut self,
        size: u64,
        alignment_bits: u32,
        at: Option<Address>,
        rng: &mut dyn RandomSource,
    ) -> Result<Interval<SpanTag>, MemoryError> {
        let region = match at {
            Some(start) => {
                if !bits::is_aligned(start, alignment_bits) {
                    return Err(MemoryError::ConflictingParameters(
                        "explicit address does not satisfy the requested alignment",
                    ));
                }

                let tag = self
                    .non_allocated
                    .span_covering(start, size)
                    .map(|span| span.tag)
                    .ok_or(MemoryError::RegionNotFree { start, size })?;
                self.non_allocated.remove_region(start, size)?;
                Interval { start, size, tag }
            }
            None => self
                .non_allocated
                .find_and_remove(size, Some(alignment_bits), rng)?,
        };

        self.allocated.add_region(
            region.start,
            region.size,
            Some(region.tag.retagged(Pool::Allocated)),
        )?;
        Ok(region)
    }

    /// Allocate a data page large enough to host a block of `size` bytes aligned to
    /// `alignment_bits` and make it available for blocks.
    pub(crate) fn grow_block_backing(
        &mut self,
        size: u64,
        alignment_bits: u32,
        coordinator: &mut AllocationCoordinator,
        rng: &mut dyn RandomSource,
    ) -> Result<(), MemoryError> {
        let page_size = PageSize::ALLOCATABLE
            .into_iter()
            .find(|page| size <= page.bytes() && alignment_bits <= page.alignment_bits())
            .ok_or(MemoryError::OutOfSpace {
                size,
                alignment_bits,
            })?;

        let request = PageRequest::new(PageType::Data)
            .with_size(page_size)
            .with_permissions(Permissions::READ | Permissions::WRITE);

        for page in self.allocate_page(&request, coordinator, rng)?.pages() {
            let tag = self
                .non_allocated
                .default_tag()
                .with_page_type(PageType::Data)
                .with_backing(Backing::translated(page.va(), page.pa()));
            self.non_allocated
                .add_region(page.va(), page.size().bytes(), Some(tag))?;
        }

        Ok(())
    }

    /// Is every byte of `va..va + size` mapped?
    pub fn is_mapped(&self, va: Address, size: u64) -> bool {
        self.mapped.is_region_available(va, size)
    }

    /// Does any page overlap `va..va + size`?
    pub fn is_allocated(&self, va: Address, size: u64) -> bool {
        let end = va.saturating_add(size.max(1) - 1);
        self.pages.iter().any(|page| page.overlaps_va(va, end))
    }

    /// Physical address `va` is mapped to
    pub fn translate(&self, va: Address) -> Option<Address> {
        self.mapped
            .span_containing(va)
            .and_then(|span| span.tag.physical_address(va))
    }

    /// Look for an unmapped range without taking it.
    pub fn find_available_region(
        &self,
        size: u64,
        alignment_bits: Option<u32>,
        rng: &mut dyn RandomSource,
    ) -> Result<Address, MemoryError> {
        self.unmapped
            .find_region(size, alignment_bits, rng)
            .map(|region| region.start)
    }

    pub fn attribute(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.get(key)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn attributes(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.attributes
    }

    pub fn memory_stats(&self) -> MemoryStats {
        MemoryStats {
            context: self.name.clone(),
            execution_context: self.execution_context,
            core: self.core,
            va_start: self.va_start,
            va_size: self.va_size,
            unmapped_bytes: self.unmapped.total_size(),
            unmapped_intervals: self.unmapped.len(),
            mapped_bytes: self.mapped.total_size(),
            mapped_intervals: self.mapped.len(),
            allocated_bytes: self.allocated.total_size(),
            non_allocated_bytes: self.non_allocated.total_size(),
            page_count: self.pages.len(),
            cross_core_pages: self.pages.iter().filter(|page| page.is_cross_core()).count(),
            pages_by_type: self
                .pages_by_type
                .iter()
                .map(|(page_type, pages)| (*page_type, pages.len()))
                .collect(),
        }
    }

    /// Human readable occupancy report
    pub fn summary(&self) -> String {
        self.memory_stats().to_string()
    }

    pub fn log_summary(&self) {
        for line in self.summary().lines() {
            log::info!("{line}");
        }
    }

    /// Emit every page of this space, grouped by page type.
    pub fn log_page_tables(&self) {
        log::info!(context = %self.name, pages = self.pages.len(), "Page table");
        for (page_type, indices) in &self.pages_by_type {
            for page in indices.iter().filter_map(|idx| self.pages.get(*idx)) {
                log::info!(context = %self.name, %page_type, "{page}");
            }
        }
    }
}
