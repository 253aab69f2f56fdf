//! Description of the target chip.

use crate::pins::PinMask;

/// Upper bounds over every supported chip, used to size the allocation tables.
pub const MAX_BLOCKS: usize = 3;
pub const MAX_STATE_MACHINES: usize = 4;
pub const MAX_GPIOS: usize = 48;
pub const MAX_DMA_CHANNELS: usize = 16;

/// PIO hardware revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PioVersion {
    /// RP2040.
    V0,
    /// RP2350: adds `in_count`, the put/get FIFO modes and a selectable GPIO base.
    V1,
}

/// Static facts about the chip the engine drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipConfig {
    pub blocks: u8,
    pub state_machines: u8,
    pub instruction_memory: u8,
    pub gpios: u8,
    pub dma_channels: u8,
    pub version: PioVersion,
}

impl ChipConfig {
    pub const RP2040: ChipConfig = ChipConfig {
        blocks: 2,
        state_machines: 4,
        instruction_memory: 32,
        gpios: 30,
        dma_channels: 12,
        version: PioVersion::V0,
    };

    pub const RP2350A: ChipConfig = ChipConfig {
        blocks: 3,
        state_machines: 4,
        instruction_memory: 32,
        gpios: 30,
        dma_channels: 16,
        version: PioVersion::V1,
    };

    /// The 80-pin RP2350 with GPIOs 0..47, split into two windows of 32.
    pub const RP2350B: ChipConfig = ChipConfig {
        gpios: 48,
        ..ChipConfig::RP2350A
    };

    /// Whether a block can only see 32 of the GPIOs at once.
    pub const fn has_gpio_windows(&self) -> bool {
        self.gpios > 32
    }

    /// GPIO base required to reach every pin in `pins`.
    ///
    /// Pins 32..47 are only reachable with a base of 16, which in turn hides
    /// pins 0..15. `None` when the mask needs both.
    pub fn gpio_base_for(&self, pins: PinMask) -> Option<u8> {
        if !self.has_gpio_windows() || pins.bits() >> 32 == 0 {
            return Some(0);
        }
        if pins.bits() & 0xffff != 0 {
            return None;
        }
        Some(16)
    }

    /// Whether a block based at `base` sees every pin in `pins`.
    pub fn reaches(&self, base: u8, pins: PinMask) -> bool {
        match base {
            0 => pins.bits() >> 32 == 0,
            16 => self.has_gpio_windows() && pins.bits() & 0xffff == 0 && pins.bits() >> 48 == 0,
            _ => false,
        }
    }
}

impl Default for ChipConfig {
    fn default() -> Self {
        ChipConfig::RP2040
    }
}
