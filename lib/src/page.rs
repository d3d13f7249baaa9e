// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

//! Page records and the value types describing them

use std::collections::BTreeMap;
use std::fmt;
use std::ops::BitOr;

use serde::Deserialize;
use serde::Serialize;

use crate::bits::Address;

/// Supported page sizes
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::EnumIter, Serialize, Deserialize,
)]
pub enum PageSize {
    Size4K,
    Size2M,
    Size1G,
}

impl PageSize {
    /// Page sizes the allocator can hand out. 1 GiB pages are not supported yet.
    pub const ALLOCATABLE: [PageSize; 2] = [PageSize::Size4K, PageSize::Size2M];

    /// Number of bytes in a page of this size
    pub const fn bytes(self) -> u64 {
        1 << self.alignment_bits()
    }

    /// Minimum alignment of a page of this size
    pub const fn alignment_bits(self) -> u32 {
        match self {
            PageSize::Size4K => 12,
            PageSize::Size2M => 21,
            PageSize::Size1G => 30,
        }
    }

    /// Can pages of this size be allocated?
    pub const fn is_allocatable(self) -> bool {
        match self {
            PageSize::Size4K | PageSize::Size2M => true,
            PageSize::Size1G => false,
        }
    }
}

impl fmt::Display for PageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageSize::Size4K => write!(f, "4KB"),
            PageSize::Size2M => write!(f, "2MB"),
            PageSize::Size1G => write!(f, "1GB"),
        }
    }
}

/// What a page is used for
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::EnumIter,
    strum::Display,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PageType {
    Code,
    Data,
    Device,
    System,
}

/// Read / write / execute permission set
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(u8);

impl Permissions {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(0b001);
    pub const WRITE: Self = Self(0b010);
    pub const EXECUTE: Self = Self(0b100);
    pub const ALL: Self = Self(0b111);

    /// Raw bit representation
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Build a permission set from raw bits. Unknown bits are dropped.
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    /// Are all permissions in `other` also granted here?
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn can_read(self) -> bool {
        self.contains(Self::READ)
    }

    pub const fn can_write(self) -> bool {
        self.contains(Self::WRITE)
    }

    pub const fn can_exec(self) -> bool {
        self.contains(Self::EXECUTE)
    }
}

impl BitOr for Permissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |granted: bool, c: char| if granted { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            flag(self.can_read(), 'r'),
            flag(self.can_write(), 'w'),
            flag(self.can_exec(), 'x')
        )
    }
}

/// Cache policy of a page
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::Display, Serialize, Deserialize,
)]
pub enum Cacheability {
    #[strum(serialize = "NC")]
    NonCacheable,
    #[strum(serialize = "WT")]
    WriteThrough,
    #[default]
    #[strum(serialize = "WB")]
    WriteBack,
}

/// Shareability domain of a page
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::Display, Serialize, Deserialize,
)]
pub enum Shareability {
    #[default]
    #[strum(serialize = "NSH")]
    NonShareable,
    #[strum(serialize = "ISH")]
    Inner,
    #[strum(serialize = "OSH")]
    Outer,
}

/// Privilege / security mode owning an address space
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::EnumIter,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionContext {
    El3Root,
    El2NonSecure,
    El2Secure,
    El1NonSecure,
    El1Secure,
}

impl ExecutionContext {
    /// Short name used when labelling address spaces, e.g. `el1NS`
    pub const fn short_name(self) -> &'static str {
        match self {
            ExecutionContext::El3Root => "el3root",
            ExecutionContext::El2NonSecure => "el2NS",
            ExecutionContext::El2Secure => "el2S",
            ExecutionContext::El1NonSecure => "el1NS",
            ExecutionContext::El1Secure => "el1S",
        }
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// A single page-table entry produced by an address space
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    va: Address,
    pa: Address,
    size: PageSize,
    page_type: PageType,
    permissions: Permissions,
    cacheability: Cacheability,
    shareability: Shareability,
    execution_context: ExecutionContext,
    cross_core: bool,
    custom_attributes: BTreeMap<String, String>,
}

/// Attributes shared by every page of one allocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PageAttributes {
    pub page_type: PageType,
    pub permissions: Permissions,
    pub cacheability: Cacheability,
    pub shareability: Shareability,
    pub execution_context: ExecutionContext,
    pub cross_core: bool,
    pub custom_attributes: BTreeMap<String, String>,
}

impl Page {
    pub(crate) fn new(va: Address, pa: Address, size: PageSize, attrs: PageAttributes) -> Self {
        Self {
            va,
            pa,
            size,
            page_type: attrs.page_type,
            permissions: attrs.permissions,
            cacheability: attrs.cacheability,
            shareability: attrs.shareability,
            execution_context: attrs.execution_context,
            cross_core: attrs.cross_core,
            custom_attributes: attrs.custom_attributes,
        }
    }

    pub fn va(&self) -> Address {
        self.va
    }

    pub fn pa(&self) -> Address {
        self.pa
    }

    /// Last virtual address covered by the page
    pub fn end_va(&self) -> Address {
        self.va + (self.size.bytes() - 1)
    }

    /// Last physical address covered by the page
    pub fn end_pa(&self) -> Address {
        self.pa + (self.size.bytes() - 1)
    }

    pub fn size(&self) -> PageSize {
        self.size
    }

    pub fn page_type(&self) -> PageType {
        self.page_type
    }

    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    pub fn cacheability(&self) -> Cacheability {
        self.cacheability
    }

    pub fn shareability(&self) -> Shareability {
        self.shareability
    }

    pub fn execution_context(&self) -> ExecutionContext {
        self.execution_context
    }

    pub fn is_cross_core(&self) -> bool {
        self.cross_core
    }

    pub fn custom_attributes(&self) -> &BTreeMap<String, String> {
        &self.custom_attributes
    }

    /// Does the page overlap the virtual range `va..=end`?
    pub fn overlaps_va(&self, va: Address, end: Address) -> bool {
        self.va <= end && self.end_va() >= va
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Page(va={:#x}, pa={:#x}, size={}, type={}, perms={}, cache={}, share={}, ctx={}{})",
            self.va,
            self.pa,
            self.size,
            self.page_type,
            self.permissions,
            self.cacheability,
            self.shareability,
            self.execution_context,
            if self.cross_core { ", cross-core" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn natural_alignment() {
        for size in PageSize::iter() {
            assert_eq!(size.bytes(), 1 << size.alignment_bits());
        }

        assert_eq!(PageSize::Size4K.bytes(), 0x1000);
        assert_eq!(PageSize::Size2M.bytes(), 0x20_0000);
        assert_eq!(PageSize::Size1G.bytes(), 0x4000_0000);
        assert!(!PageSize::Size1G.is_allocatable());
        assert!(PageSize::ALLOCATABLE.iter().all(|size| size.is_allocatable()));
    }

    #[test]
    fn permissions() {
        let rw = Permissions::READ | Permissions::WRITE;
        assert!(rw.can_read());
        assert!(rw.can_write());
        assert!(!rw.can_exec());
        assert_eq!(rw.to_string(), "rw-");
        assert_eq!(Permissions::ALL.to_string(), "rwx");
        assert_eq!(Permissions::from_bits_truncate(0xff), Permissions::ALL);
        assert!(Permissions::ALL.contains(rw));
    }

    #[test]
    fn page_bounds() {
        let page = Page::new(
            0x8000_0000,
            0x4000_0000,
            PageSize::Size4K,
            PageAttributes {
                page_type: PageType::Code,
                permissions: Permissions::READ | Permissions::EXECUTE,
                cacheability: Cacheability::default(),
                shareability: Shareability::default(),
                execution_context: ExecutionContext::El1NonSecure,
                cross_core: false,
                custom_attributes: BTreeMap::new(),
            },
        );

        assert_eq!(page.end_va(), 0x8000_0fff);
        assert_eq!(page.end_pa(), 0x4000_0fff);
        assert!(page.overlaps_va(0x8000_0fff, 0x8000_1000));
        assert!(!page.overlaps_va(0x8000_1000, 0x8000_1fff));
        assert_eq!(
            page.to_string(),
            "Page(va=0x80000000, pa=0x40000000, size=4KB, type=code, perms=r-x, cache=WB, share=NSH, ctx=el1NS)"
        );
    }
}
