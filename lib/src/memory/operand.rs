// SPDX-FileCopyrightText: 2025 TriliTech <contact@trili.tech>
//
// SPDX-License-Identifier: MIT

use std::fmt;

use serde::Serialize;

use super::AllocationBlock;
use super::Architecture;
use super::BlockId;
use super::BlockRequest;
use super::MemoryType;
use super::Placement;
use super::RegisterAllocator;
use super::block::unique_label;
use super::format::format_operand;
use crate::bits;
use crate::bits::Address;
use crate::error::MemoryError;
use crate::interval;
use crate::log;
use crate::machine::ContextRegistry;
use crate::machine::Machine;
use crate::random;

/// Access sizes a memory operand may have
pub const VALID_SIZES: [u64; 4] = [1, 2, 4, 8];

/// Weights of the alignment classes drawn for operands without an explicit alignment. Most
/// operands are 4-byte aligned to keep alignment faults rare.
const ALIGNMENT_WEIGHTS: [(u32, u64); 3] = [(0, 10), (1, 30), (2, 60)];

/// Parameters of a memory operand
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperandRequest {
    pub name: Option<String>,

    /// Exact virtual address of the block to create
    pub address: Option<Address>,

    /// Access size, drawn from [`VALID_SIZES`] when absent
    pub byte_size: Option<u64>,

    pub memory_type: MemoryType,

    /// Allow the operand to alias other shared operands
    pub shared: bool,

    pub init_value: Option<u64>,

    /// Existing block to take a window of, at `block_offset`
    pub block: Option<BlockId>,
    pub block_offset: Option<u64>,

    pub cross_core: bool,

    /// Alignment class, drawn when absent
    pub alignment_bits: Option<u32>,
}

impl OperandRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sized(byte_size: u64) -> Self {
        Self {
            byte_size: Some(byte_size),
            ..Self::default()
        }
    }

    /// Window of `block` starting at `offset`
    pub fn in_block(block: BlockId, offset: u64) -> Self {
        Self {
            block: Some(block),
            block_offset: Some(offset),
            ..Self::default()
        }
    }

    pub fn shared(mut self) -> Self {
        self.shared = true;
        self
    }

    pub fn cross_core(mut self) -> Self {
        self.cross_core = true;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_size(mut self, byte_size: u64) -> Self {
        self.byte_size = Some(byte_size);
        self
    }

    pub fn with_alignment_bits(mut self, bits: u32) -> Self {
        self.alignment_bits = Some(bits);
        self
    }

    pub fn with_init_value(mut self, value: u64) -> Self {
        self.init_value = Some(value);
        self
    }

    pub fn with_memory_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = memory_type;
        self
    }
}

/// Window of an allocation block accessed by one instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryOperand {
    name: String,
    label: String,
    block: BlockId,
    block_offset: u64,
    byte_size: u64,
    memory_type: MemoryType,
    shared: bool,
    reused: bool,
    cross_core: bool,
    init_value: Option<u64>,
    alignment_bits: u32,
    address: Address,
    physical_address: Address,
}

impl MemoryOperand {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Symbol of the block the operand lives in
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn block_offset(&self) -> u64 {
        self.block_offset
    }

    pub fn byte_size(&self) -> u64 {
        self.byte_size
    }

    pub fn memory_type(&self) -> MemoryType {
        self.memory_type
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// Does the operand alias a block created for an earlier operand?
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    pub fn is_cross_core(&self) -> bool {
        self.cross_core
    }

    pub fn init_value(&self) -> Option<u64> {
        self.init_value
    }

    pub fn alignment_bits(&self) -> u32 {
        self.alignment_bits
    }

    /// Virtual address of the operand. Cross-core operands are resolved in the active context of
    /// `machine`; other operands keep the address they were created with.
    pub fn address(&self, machine: &Machine) -> Result<Address, MemoryError> {
        if self.cross_core {
            Ok(machine.block_address(self.block)? + self.block_offset)
        } else {
            Ok(self.address)
        }
    }

    pub fn physical_address(&self) -> Address {
        self.physical_address
    }

    /// Operand covering `byte_size` bytes at `offset` inside this one
    pub fn partial(&self, byte_size: u64, offset: u64) -> Result<MemoryOperand, MemoryError> {
        if byte_size == 0 {
            return Err(MemoryError::InvalidSize {
                size: byte_size,
                reason: "operands must not be empty",
            });
        }

        match offset.checked_add(byte_size) {
            Some(end) if end <= self.byte_size => {}
            _ => {
                return Err(MemoryError::InvalidSize {
                    size: byte_size,
                    reason: "partial operand exceeds its parent",
                });
            }
        }

        Ok(MemoryOperand {
            block_offset: self.block_offset + offset,
            byte_size,
            address: self.address + offset,
            physical_address: self.physical_address + offset,
            ..self.clone()
        })
    }

    /// Render the operand assuming `register` holds the address of its block.
    pub fn format_with(
        &self,
        architecture: Architecture,
        register: &str,
    ) -> Result<String, MemoryError> {
        format_operand(architecture, self.byte_size, self.block_offset, register)
    }

    /// Reserve a register for the block address and render the operand relative to it. The
    /// register is handed to the caller, who must load the block label into it and free it.
    pub fn format_as_operand<R: RegisterAllocator>(
        &self,
        architecture: Architecture,
        registers: &mut R,
    ) -> Result<(String, R::Register), MemoryError> {
        let register = registers
            .reserve()
            .ok_or(MemoryError::RegistersExhausted)?;

        match self.format_with(architecture, &register.to_string()) {
            Ok(text) => Ok((text, register)),
            Err(err) => {
                registers.free(register);
                Err(err)
            }
        }
    }
}

impl fmt::Display for MemoryOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}+{:#x}, {} bytes, va={:#x}, pa={:#x}, {}",
            self.name,
            self.label,
            self.block_offset,
            self.byte_size,
            self.address,
            self.physical_address,
            self.memory_type
        )?;

        if self.shared {
            f.write_str(", shared")?;
        }
        if self.reused {
            f.write_str(", reused")?;
        }
        if self.cross_core {
            f.write_str(", cross-core")?;
        }
        if let Some(value) = self.init_value {
            write!(f, ", init={value:#x}")?;
        }

        f.write_str(")")
    }
}

impl Machine {
    /// Create a memory operand in the active context.
    ///
    /// Without an explicit block, exclusive operands get a fresh block of their own size. Shared
    /// operands either alias a window of an earlier shared block or get a fresh block with some
    /// random slack that later shared operands may alias.
    pub fn memory_operand(
        &mut self,
        request: OperandRequest,
    ) -> Result<MemoryOperand, MemoryError> {
        let OperandRequest {
            name,
            address,
            byte_size,
            memory_type,
            shared,
            init_value,
            block,
            block_offset,
            cross_core,
            alignment_bits,
        } = request;

        if block.is_none() && block_offset.is_some() {
            return Err(MemoryError::ConflictingParameters(
                "a block offset requires a block",
            ));
        }

        let byte_size = match byte_size {
            Some(size) if VALID_SIZES.contains(&size) => size,
            Some(size) => {
                return Err(MemoryError::InvalidSize {
                    size,
                    reason: "operands are 1, 2, 4 or 8 bytes",
                });
            }
            None => VALID_SIZES[self.random().index(VALID_SIZES.len())],
        };

        if let Some(block) = block {
            let offset = block_offset.ok_or(MemoryError::ConflictingParameters(
                "an existing block requires an offset",
            ))?;
            if init_value.is_some() {
                return Err(MemoryError::ConflictingParameters(
                    "an existing block cannot be given an initial value",
                ));
            }
            if shared || cross_core || address.is_some() {
                return Err(MemoryError::ConflictingParameters(
                    "sharing and placement are inherited from the existing block",
                ));
            }

            let parent = self.block(block)?;
            match offset.checked_add(byte_size) {
                Some(end) if end <= parent.byte_size() => {}
                _ => {
                    return Err(MemoryError::InvalidSize {
                        size: byte_size,
                        reason: "operand window exceeds its block",
                    });
                }
            }

            let name = name.unwrap_or_else(|| parent.name().to_owned());
            let alignment_bits = alignment_bits.unwrap_or(parent.alignment_bits());
            return self.finish_operand(block, name, offset, byte_size, false, alignment_bits);
        }

        if init_value.is_some() && shared {
            return Err(MemoryError::ConflictingParameters(
                "shared memory cannot carry an initial value",
            ));
        }
        if cross_core && shared {
            return Err(MemoryError::ConflictingParameters(
                "cross-core memory cannot be shared",
            ));
        }

        let alignment_bits = match alignment_bits {
            Some(bits) if bits > bits::MAX_ALIGNMENT_BITS => {
                return Err(MemoryError::InvalidAlignment(bits));
            }
            Some(bits) => bits,
            None => random::choose(self.random(), &ALIGNMENT_WEIGHTS)
                .copied()
                .unwrap_or(0),
        };

        let id = self.ids_mut().next_id();
        let label = unique_label(name.as_deref(), id);
        let operand_name = name.clone().unwrap_or_else(|| label.clone());

        if !shared {
            let block = self.create_labelled_block(
                BlockRequest {
                    name,
                    byte_size,
                    address,
                    memory_type,
                    shared: false,
                    cross_core,
                    alignment_bits,
                    init_value,
                },
                label,
            )?;
            return self.finish_operand(block, operand_name, 0, byte_size, false, alignment_bits);
        }

        let percent = self.config().reuse_probability;
        let try_reuse = self.random().chance(percent);
        if try_reuse && name.is_none() && address.is_none() && init_value.is_none() {
            if let Some((block, offset)) = self.pick_reusable(byte_size, alignment_bits) {
                return self.finish_operand(
                    block,
                    operand_name,
                    offset,
                    byte_size,
                    true,
                    alignment_bits,
                );
            }
        }

        let slack = self.draw_slack();
        let block = self.create_labelled_block(
            BlockRequest {
                name,
                byte_size: byte_size + slack,
                address,
                memory_type,
                shared: true,
                cross_core: false,
                alignment_bits,
                init_value: None,
            },
            label,
        )?;

        let positions = (slack >> alignment_bits) + 1;
        let offset = self.random().below(positions) << alignment_bits;
        self.finish_operand(block, operand_name, offset, byte_size, false, alignment_bits)
    }

    /// Extra bytes a fresh shared block gets beyond its first operand
    fn draw_slack(&mut self) -> u64 {
        let rng = self.random();
        let small = rng.range_inclusive(1, 10);
        let large = rng.range_inclusive(10, 20);
        random::choose(rng, &[(0, 50), (small, 45), (large, 5)])
            .copied()
            .unwrap_or(0)
    }

    /// Uniformly pick a shared block of the active context with room for an aligned window, and an
    /// aligned offset inside it.
    fn pick_reusable(&mut self, byte_size: u64, alignment_bits: u32) -> Option<(BlockId, u64)> {
        let active = self.active_context();
        let candidates: Vec<(BlockId, Address, Address, Address)> = self
            .blocks()
            .iter()
            .filter(|block| block.is_shared() && block.owner() == Some(active))
            .filter_map(|block| {
                let Placement::Private { va, .. } = block.placement() else {
                    return None;
                };
                bits::aligned_window(va, block.byte_size(), byte_size, alignment_bits)
                    .map(|(first, last)| (block.id(), va, first, last))
            })
            .collect();

        let (block, base, first, last) = *random::choose_uniform(self.random(), &candidates)?;
        let start = interval::pick_aligned_start(self.random(), first, last, alignment_bits);
        Some((block, start - base))
    }

    fn finish_operand(
        &self,
        block: BlockId,
        name: String,
        offset: u64,
        byte_size: u64,
        reused: bool,
        alignment_bits: u32,
    ) -> Result<MemoryOperand, MemoryError> {
        let parent: &AllocationBlock = self.block(block)?;

        let operand = MemoryOperand {
            name,
            label: parent.label().to_owned(),
            block,
            block_offset: offset,
            byte_size,
            memory_type: parent.memory_type(),
            shared: parent.is_shared(),
            reused,
            cross_core: parent.is_cross_core(),
            init_value: parent.init_value(),
            alignment_bits,
            address: self.block_address(block)? + offset,
            physical_address: parent.physical_address() + offset,
        };

        log::debug!(%operand, "Memory operand");
        Ok(operand)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MachineConfig;
    use crate::machine::ContextId;

    fn machine(seed: u64) -> Machine {
        Machine::new(MachineConfig {
            seed,
            ..MachineConfig::default()
        })
        .unwrap()
    }

    fn assert_contained(machine: &Machine, operand: &MemoryOperand) {
        let block = machine.block(operand.block()).unwrap();
        assert!(operand.block_offset() + operand.byte_size() <= block.byte_size());
        assert_eq!(
            operand.physical_address(),
            block.physical_address() + operand.block_offset()
        );
        assert_eq!(
            operand.address(machine).unwrap(),
            machine.block_address(block.id()).unwrap() + operand.block_offset()
        );
    }

    #[test]
    fn conflicting_requests() {
        let mut machine = machine(0);

        let cases = [
            OperandRequest {
                block_offset: Some(0),
                ..OperandRequest::new()
            },
            OperandRequest::sized(8).shared().with_init_value(1),
            OperandRequest::sized(8).shared().cross_core(),
        ];
        for request in cases {
            assert!(matches!(
                machine.memory_operand(request),
                Err(MemoryError::ConflictingParameters(_))
            ));
        }

        assert_eq!(
            machine.memory_operand(OperandRequest::sized(3)),
            Err(MemoryError::InvalidSize {
                size: 3,
                reason: "operands are 1, 2, 4 or 8 bytes"
            })
        );
        assert!(machine.blocks().is_empty());
    }

    #[test]
    fn exclusive_operands_own_their_block() {
        let mut machine = machine(1);
        machine.ids_mut().reset(2000);

        let operand = machine
            .memory_operand(OperandRequest::sized(8).with_init_value(0xdead))
            .unwrap();
        let block = machine.block(operand.block()).unwrap();

        assert_eq!(operand.label(), "mem2001");
        assert_eq!(operand.name(), "mem2001");
        assert_eq!(operand.block_offset(), 0);
        assert_eq!(block.byte_size(), 8);
        assert!(!block.is_shared());
        assert_eq!(operand.init_value(), Some(0xdead));
        assert!(bits::is_aligned(
            operand.address(&machine).unwrap(),
            operand.alignment_bits()
        ));
        assert_contained(&machine, &operand);

        let named = machine
            .memory_operand(OperandRequest::sized(4).named("counter"))
            .unwrap();
        assert_eq!(named.label(), "counter_mem2002");
        assert_eq!(named.name(), "counter");
    }

    #[test]
    fn operands_in_existing_blocks() {
        let mut machine = machine(2);
        let block = machine.create_block(BlockRequest::new(0x20)).unwrap();

        let operand = machine
            .memory_operand(OperandRequest::in_block(block, 0x18).with_size(8))
            .unwrap();
        assert_eq!(operand.block(), block);
        assert_eq!(operand.label(), machine.block(block).unwrap().label());
        assert!(!operand.is_reused());
        assert_contained(&machine, &operand);

        for request in [
            OperandRequest::in_block(block, 0x19).with_size(8),
            OperandRequest::in_block(block, u64::MAX).with_size(8),
        ] {
            assert!(matches!(
                machine.memory_operand(request),
                Err(MemoryError::InvalidSize { .. })
            ));
        }

        for request in [
            OperandRequest {
                block_offset: None,
                ..OperandRequest::in_block(block, 0)
            },
            OperandRequest::in_block(block, 0).with_init_value(3),
            OperandRequest::in_block(block, 0).shared(),
        ] {
            assert!(matches!(
                machine.memory_operand(request.with_size(8)),
                Err(MemoryError::ConflictingParameters(_))
            ));
        }

        assert_eq!(
            machine.memory_operand(OperandRequest::in_block(BlockId::new(99), 0).with_size(1)),
            Err(MemoryError::UnknownBlock(BlockId::new(99)))
        );
    }

    #[test]
    fn shared_operands_take_both_paths() {
        let mut machine = machine(3);
        let mut fresh = 0;
        let mut reused = 0;

        for _ in 0..200 {
            let operand = machine
                .memory_operand(OperandRequest::new().shared())
                .unwrap();
            assert!(operand.is_shared());
            assert!(VALID_SIZES.contains(&operand.byte_size()));
            assert!(bits::is_aligned(
                operand.address(&machine).unwrap(),
                operand.alignment_bits()
            ));
            assert_contained(&machine, &operand);

            if operand.is_reused() {
                reused += 1;
            } else {
                fresh += 1;
            }
        }

        assert!(fresh > 0);
        assert!(reused > 0);
    }

    #[test]
    fn reuse_needs_no_explicit_parameters() {
        let mut machine = Machine::new(MachineConfig {
            seed: 4,
            reuse_probability: 100,
            ..MachineConfig::default()
        })
        .unwrap();

        let first = machine
            .memory_operand(OperandRequest::sized(1).shared().with_alignment_bits(0))
            .unwrap();
        assert!(!first.is_reused());

        let second = machine
            .memory_operand(OperandRequest::sized(1).shared().with_alignment_bits(0))
            .unwrap();
        assert!(second.is_reused());
        assert_eq!(second.block(), first.block());

        let named = machine
            .memory_operand(
                OperandRequest::sized(1)
                    .shared()
                    .named("flag")
                    .with_alignment_bits(0),
            )
            .unwrap();
        assert!(!named.is_reused());
    }

    #[test]
    fn partial_windows() {
        let mut machine = machine(5);
        let operand = machine.memory_operand(OperandRequest::sized(8)).unwrap();

        let upper = operand.partial(4, 4).unwrap();
        assert_eq!(upper.block_offset(), operand.block_offset() + 4);
        assert_eq!(upper.byte_size(), 4);
        assert_eq!(upper.physical_address(), operand.physical_address() + 4);
        assert_eq!(
            upper.address(&machine).unwrap(),
            operand.address(&machine).unwrap() + 4
        );
        assert_eq!(upper.label(), operand.label());

        assert!(operand.partial(4, 5).is_err());
        assert!(operand.partial(16, 0).is_err());
        assert!(operand.partial(0, 0).is_err());
    }

    #[test]
    fn cross_core_operands_resolve_per_context() {
        let mut machine = machine(6);
        let operand = machine
            .memory_operand(OperandRequest::sized(4).cross_core())
            .unwrap();
        assert!(operand.is_cross_core());

        for ctx in [ContextId::new(0), ContextId::new(1)] {
            machine.set_active_context(ctx).unwrap();
            let va = operand.address(&machine).unwrap();

            assert_eq!(machine.active().translate(va), Some(operand.physical_address()));
            assert_eq!(va & 0x1f_ffff, operand.physical_address() & 0x1f_ffff);
        }
    }

    struct Scratch {
        free: Vec<&'static str>,
    }

    impl RegisterAllocator for Scratch {
        type Register = &'static str;

        fn reserve(&mut self) -> Option<Self::Register> {
            self.free.pop()
        }

        fn free(&mut self, register: Self::Register) {
            self.free.push(register);
        }
    }

    #[test]
    fn formatting() {
        let mut machine = machine(7);
        let block = machine.create_block(BlockRequest::new(0x40)).unwrap();
        let operand = machine
            .memory_operand(OperandRequest::in_block(block, 0x10).with_size(4))
            .unwrap();

        assert_eq!(
            operand.format_with(Architecture::X86, "rax").unwrap(),
            "dword [rax + 0x10]"
        );

        let mut registers = Scratch { free: vec!["x9"] };
        let (text, register) = operand
            .format_as_operand(Architecture::Arm, &mut registers)
            .unwrap();
        assert_eq!(text, "[x9,#0x10]");
        assert_eq!(register, "x9");

        assert_eq!(
            operand.format_as_operand(Architecture::RiscV, &mut registers),
            Err(MemoryError::RegistersExhausted)
        );

        registers.free(register);
        let (text, _) = operand
            .format_as_operand(Architecture::RiscV, &mut registers)
            .unwrap();
        assert_eq!(text, "0x10(x9)");
    }
}
