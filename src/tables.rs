//! Allocation tables shared between the main context and interrupt handlers.
//!
//! Only ever touched inside a critical section.

use arrayvec::ArrayVec;
use rp2pio_isa::INSTRUCTION_MEMORY_SIZE;

use crate::background::Stream;
use crate::chip::{ChipConfig, MAX_BLOCKS, MAX_DMA_CHANNELS, MAX_GPIOS, MAX_STATE_MACHINES};
use crate::config::SmConfig;
use crate::hal::SmId;
use crate::irq::Registration;
use crate::pins::PinMask;

/// Identity of a program: the address of the caller's instruction slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ProgramId(pub usize);

/// A program resident in a block's instruction memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ProgramSlot {
    pub id: ProgramId,
    pub len: u8,
    pub offset: u8,
}

impl ProgramSlot {
    pub fn mask(&self) -> u32 {
        span_mask(self.len) << self.offset
    }
}

fn span_mask(len: u8) -> u32 {
    if len as usize >= INSTRUCTION_MEMORY_SIZE {
        u32::MAX
    } else {
        (1 << len) - 1
    }
}

/// Free address for `len` instructions, searching from the top like the SDK.
pub(crate) fn find_offset(used: u32, len: u8, origin: Option<u8>) -> Option<u8> {
    let size = INSTRUCTION_MEMORY_SIZE as u8;
    if len == 0 || len > size {
        return None;
    }
    let mask = span_mask(len);
    match origin {
        Some(origin) if origin > size - len || used & (mask << origin) != 0 => None,
        Some(origin) => Some(origin),
        None => (0..=size - len).rev().find(|&at| used & (mask << at) == 0),
    }
}

/// What restart and fault recovery need to bring a state machine back.
#[derive(Debug, Clone)]
pub(crate) struct Setup {
    pub image: SmConfig,
    pub init: ArrayVec<u16, INSTRUCTION_MEMORY_SIZE>,
    pub initial_state: PinMask,
    pub initial_direction: PinMask,
    pub pull_up: PinMask,
    pub pull_down: PinMask,
    pub frequency: u32,
    pub tx_fifo: bool,
    pub rx_fifo: bool,
    pub wait_for_txstall: bool,
    pub user_interruptible: bool,
    pub fifo_depth: u8,
}

impl Setup {
    pub fn out_shift_right(&self) -> bool {
        self.image.out_shift.direction == crate::config::ShiftDirection::Right
    }

    pub fn in_shift_right(&self) -> bool {
        self.image.in_shift.direction == crate::config::ShiftDirection::Right
    }
}

/// A claimed state machine.
#[derive(Debug)]
pub(crate) struct Active {
    pub program: ProgramSlot,
    pub pins: PinMask,
    pub never_reset: bool,
    pub setup: Setup,
    pub tx_stream: Option<Stream>,
    pub rx_stream: Option<Stream>,
    pub irq: Option<Registration>,
}

#[derive(Debug, Default)]
pub(crate) struct Slot {
    /// Bumped on every release so stale handles can be told apart.
    pub generation: u32,
    pub active: Option<Active>,
}

#[derive(Debug, Default)]
pub(crate) struct Block {
    pub slots: [Slot; MAX_STATE_MACHINES],
    pub used_instructions: u32,
    pub gpio_base: u8,
}

impl Block {
    pub fn is_idle(&self) -> bool {
        self.slots.iter().all(|slot| slot.active.is_none())
    }

    /// Union of the pins owned by this block's state machines.
    pub fn pins(&self) -> PinMask {
        self.slots
            .iter()
            .filter_map(|slot| slot.active.as_ref())
            .fold(PinMask::NONE, |acc, active| acc | active.pins)
    }

    pub fn free_slot(&self, state_machines: u8) -> Option<u8> {
        (0..state_machines).find(|&sm| self.slots[sm as usize].active.is_none())
    }

    pub fn users(&self, program: &ProgramSlot) -> usize {
        self.slots
            .iter()
            .filter_map(|slot| slot.active.as_ref())
            .filter(|active| active.program == *program)
            .count()
    }
}

/// Which stream a DMA channel serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Tx,
    Rx,
}

#[derive(Debug)]
pub(crate) struct Tables {
    pub blocks: [Block; MAX_BLOCKS],
    pub pin_refs: [u8; MAX_GPIOS],
    pub dma_owner: [Option<(SmId, Direction)>; MAX_DMA_CHANNELS],
}

impl Tables {
    pub fn new() -> Self {
        Tables {
            blocks: Default::default(),
            pin_refs: [0; MAX_GPIOS],
            dma_owner: [None; MAX_DMA_CHANNELS],
        }
    }

    pub fn slot(&self, id: SmId) -> &Slot {
        &self.blocks[id.block as usize].slots[id.sm as usize]
    }

    pub fn slot_mut(&mut self, id: SmId) -> &mut Slot {
        &mut self.blocks[id.block as usize].slots[id.sm as usize]
    }

    /// The live state of `id`, if `generation` still refers to it.
    pub fn active(&self, id: SmId, generation: u32) -> Option<&Active> {
        let slot = self.slot(id);
        if slot.generation != generation {
            return None;
        }
        slot.active.as_ref()
    }

    pub fn active_mut(&mut self, id: SmId, generation: u32) -> Option<&mut Active> {
        let slot = self.slot_mut(id);
        if slot.generation != generation {
            return None;
        }
        slot.active.as_mut()
    }

    /// Iterate the addresses of every state machine of the chip.
    pub fn ids(chip: ChipConfig) -> impl Iterator<Item = SmId> {
        (0..chip.blocks)
            .flat_map(move |block| (0..chip.state_machines).map(move |sm| SmId::new(block, sm)))
    }

    /// Increment the reference count of every pin in `pins`; returns the pins
    /// that were unused before.
    pub fn reference_pins(&mut self, pins: PinMask) -> PinMask {
        let mut first_users = PinMask::NONE;
        for pin in pins.iter() {
            let count = &mut self.pin_refs[pin as usize];
            *count += 1;
            if *count == 1 {
                first_users.insert(pin);
            }
        }
        first_users
    }

    /// Decrement the reference count of every pin in `pins`; returns the pins
    /// nobody uses anymore.
    pub fn release_pins(&mut self, pins: PinMask) -> PinMask {
        let mut unused = PinMask::NONE;
        for pin in pins.iter() {
            let count = &mut self.pin_refs[pin as usize];
            *count = count.saturating_sub(1);
            if *count == 0 {
                unused.insert(pin);
            }
        }
        unused
    }
}
