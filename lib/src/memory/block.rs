// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

use serde::Deserialize;
use serde::Serialize;

use crate::bits;
use crate::bits::Address;
use crate::error::MemoryError;
use crate::log;
use crate::machine::ContextId;
use crate::machine::ContextRegistry;
use crate::machine::Machine;

/// Identifier of an allocation block inside its [`Machine`]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, derive_more::Display,
)]
#[display(fmt = "block#{}", _0)]
pub struct BlockId(usize);

impl BlockId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

/// Memory attributes requested for a block
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum::Display,
    Serialize,
    Deserialize,
)]
pub enum MemoryType {
    #[default]
    #[strum(serialize = "WB")]
    WriteBack,
    #[strum(serialize = "WT")]
    WriteThrough,
    #[strum(serialize = "NC")]
    NonCacheable,
    #[strum(serialize = "Device")]
    Device,
}

/// Where the bytes of a block live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Placement {
    /// Mapped in a single context
    Private {
        context: ContextId,
        va: Address,
        pa: Address,
    },
    /// Inside a cross-core page, mapped at a different virtual address in every context
    CrossCore { pa: Address },
}

/// Contiguous, physically backed allocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationBlock {
    id: BlockId,
    name: String,
    label: String,
    byte_size: u64,
    placement: Placement,
    memory_type: MemoryType,
    shared: bool,
    alignment_bits: u32,
    init_value: Option<u64>,
}

impl AllocationBlock {
    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unique symbol naming the block in generated code
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn byte_size(&self) -> u64 {
        self.byte_size
    }

    pub fn placement(&self) -> Placement {
        self.placement
    }

    pub fn memory_type(&self) -> MemoryType {
        self.memory_type
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    pub fn is_cross_core(&self) -> bool {
        matches!(self.placement, Placement::CrossCore { .. })
    }

    pub fn alignment_bits(&self) -> u32 {
        self.alignment_bits
    }

    pub fn init_value(&self) -> Option<u64> {
        self.init_value
    }

    /// Context a private block is mapped in
    pub fn owner(&self) -> Option<ContextId> {
        match self.placement {
            Placement::Private { context, .. } => Some(context),
            Placement::CrossCore { .. } => None,
        }
    }

    pub fn physical_address(&self) -> Address {
        match self.placement {
            Placement::Private { pa, .. } | Placement::CrossCore { pa } => pa,
        }
    }
}

/// Parameters of a block allocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRequest {
    pub name: Option<String>,
    pub byte_size: u64,

    /// Exact virtual address, which must lie in a mapped block-backing page
    pub address: Option<Address>,

    pub memory_type: MemoryType,
    pub shared: bool,
    pub cross_core: bool,
    pub alignment_bits: u32,
    pub init_value: Option<u64>,
}

impl BlockRequest {
    /// Request an exclusive, byte-aligned block of `byte_size` bytes.
    pub fn new(byte_size: u64) -> Self {
        Self {
            name: None,
            byte_size,
            address: None,
            memory_type: MemoryType::default(),
            shared: false,
            cross_core: false,
            alignment_bits: 0,
            init_value: None,
        }
    }
}

/// Label of a memory object: `mem<id>`, or `<name>_mem<id>` for named objects
pub(crate) fn unique_label(name: Option<&str>, id: u64) -> String {
    match name {
        Some(name) => format!("{name}_mem{id}"),
        None => format!("mem{id}"),
    }
}

impl Machine {
    /// Allocate a block in the active context, or in a cross-core page for cross-core requests.
    pub fn create_block(&mut self, request: BlockRequest) -> Result<BlockId, MemoryError> {
        let id = self.ids_mut().next_id();
        let label = unique_label(request.name.as_deref(), id);
        self.create_labelled_block(request, label)
    }

    pub(crate) fn create_labelled_block(
        &mut self,
        request: BlockRequest,
        label: String,
    ) -> Result<BlockId, MemoryError> {
        let BlockRequest {
            name,
            byte_size,
            address,
            memory_type,
            shared,
            cross_core,
            alignment_bits,
            init_value,
        } = request;

        if byte_size == 0 {
            return Err(MemoryError::InvalidSize {
                size: byte_size,
                reason: "blocks must not be empty",
            });
        }
        if alignment_bits > bits::MAX_ALIGNMENT_BITS {
            return Err(MemoryError::InvalidAlignment(alignment_bits));
        }
        if cross_core && shared {
            return Err(MemoryError::ConflictingParameters(
                "cross-core memory cannot be shared",
            ));
        }
        if cross_core && address.is_some() {
            return Err(MemoryError::ConflictingParameters(
                "cross-core memory cannot be placed at an explicit address",
            ));
        }

        let placement = if cross_core {
            Placement::CrossCore {
                pa: self.reserve_cross_core_range(byte_size, alignment_bits)?,
            }
        } else {
            let region = self.reserve_block_range(byte_size, alignment_bits, address)?;
            let pa = region
                .tag
                .physical_address(region.start)
                .ok_or(MemoryError::Unbacked(region.start))?;
            Placement::Private {
                context: self.active_context(),
                va: region.start,
                pa,
            }
        };

        let block = AllocationBlock {
            id: self.next_block_id(),
            name: name.unwrap_or_else(|| label.clone()),
            label,
            byte_size,
            placement,
            memory_type,
            shared,
            alignment_bits,
            init_value,
        };

        log::debug!(
            block = %block.id,
            label = %block.label,
            size = block.byte_size,
            shared,
            cross_core,
            pa = block.physical_address(),
            "Created block"
        );

        Ok(self.push_block(block))
    }
}
