// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

use serde::Serialize;

use crate::bits::Address;
use crate::machine::ContextId;
use crate::page::PageType;

/// Role of the pool a span belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, Serialize)]
#[strum(serialize_all = "snake_case")]
pub enum Pool {
    /// Virtual addresses not bound to any physical address
    Unmapped,
    /// Virtual addresses bound to a physical address by some page
    Mapped,
    /// Mapped bytes handed out to allocation blocks
    Allocated,
    /// Mapped bytes of block-backing pages not yet handed out
    NonAllocated,
    /// Physical addresses not bound to any page
    PhysicalFree,
    /// Physical bytes of cross-core pages not yet handed out
    CrossCore,
}

/// Which address space a span lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, Serialize)]
#[strum(serialize_all = "snake_case")]
pub enum Space {
    Virtual,
    Physical,
}

/// How the addresses of a span resolve to physical memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Backing {
    /// `pa = va + delta`, with wrapping arithmetic
    Translated { delta: u64 },
    /// Part of the cross-core page whose physical base is `pa`
    CrossCorePage { pa: Address },
}

impl Backing {
    /// Backing that maps `va` onto `pa`
    pub const fn translated(va: Address, pa: Address) -> Self {
        Backing::Translated {
            delta: pa.wrapping_sub(va),
        }
    }
}

/// Tag attached to every span of an [`super::IntervalTracker`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SpanTag {
    pub pool: Pool,
    pub space: Space,
    pub owner: Option<ContextId>,
    pub page_type: Option<PageType>,
    pub backing: Option<Backing>,
}

impl SpanTag {
    /// Tag for a pool of virtual addresses owned by a context
    pub const fn virtual_pool(pool: Pool, owner: ContextId) -> Self {
        Self {
            pool,
            space: Space::Virtual,
            owner: Some(owner),
            page_type: None,
            backing: None,
        }
    }

    /// Tag for a machine-wide pool of physical addresses
    pub const fn physical_pool(pool: Pool) -> Self {
        Self {
            pool,
            space: Space::Physical,
            owner: None,
            page_type: None,
            backing: None,
        }
    }

    pub const fn with_page_type(mut self, page_type: PageType) -> Self {
        self.page_type = Some(page_type);
        self
    }

    pub const fn with_backing(mut self, backing: Backing) -> Self {
        self.backing = Some(backing);
        self
    }

    /// Same tag, moved to another pool
    pub const fn retagged(mut self, pool: Pool) -> Self {
        self.pool = pool;
        self
    }

    /// Physical address behind `va`, for translated spans
    pub fn physical_address(&self, va: Address) -> Option<Address> {
        match self.backing? {
            Backing::Translated { delta } => Some(va.wrapping_add(delta)),
            Backing::CrossCorePage { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translation_wraps() {
        let up = SpanTag::physical_pool(Pool::Mapped).with_backing(Backing::translated(0x1000, 0x9000));
        assert_eq!(up.physical_address(0x1234), Some(0x9234));

        let down =
            SpanTag::physical_pool(Pool::Mapped).with_backing(Backing::translated(0x9000, 0x1000));
        assert_eq!(down.physical_address(0x9234), Some(0x1234));

        let shared = SpanTag::physical_pool(Pool::CrossCore)
            .with_backing(Backing::CrossCorePage { pa: 0x20_0000 });
        assert_eq!(shared.physical_address(0x20_0000), None);
        assert_eq!(SpanTag::physical_pool(Pool::PhysicalFree).physical_address(0), None);
    }

    #[test]
    fn retagging_keeps_metadata() {
        let tag = SpanTag::virtual_pool(Pool::NonAllocated, ContextId::new(2))
            .with_page_type(PageType::Data)
            .with_backing(Backing::translated(0x1000, 0x1000));
        let moved = tag.retagged(Pool::Allocated);

        assert_eq!(moved.pool, Pool::Allocated);
        assert_eq!(moved.owner, tag.owner);
        assert_eq!(moved.backing, tag.backing);
        assert_ne!(moved, tag);
    }
}
