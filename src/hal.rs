//! The seam between the engine and the silicon.
//!
//! Every method takes `&self`: register blocks are shared between the main
//! context and interrupt handlers, exactly like memory-mapped registers are.
//! The engine never touches MMIO itself.

use core::fmt;

use crate::config::{ClockDivider, SmConfig};
use crate::pins::PinMask;

/// Address of one state machine: block index and index within the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SmId {
    pub block: u8,
    pub sm: u8,
}

impl SmId {
    pub const fn new(block: u8, sm: u8) -> Self {
        SmId { block, sm }
    }

    /// DMA request line paced by this state machine's TX (or RX) FIFO.
    pub const fn dreq(&self, rx: bool) -> u8 {
        self.block * 8 + if rx { 4 } else { 0 } + self.sm
    }
}

impl fmt::Display for SmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PIO{}/SM{}", self.block, self.sm)
    }
}

/// `FDEBUG` flag groups, one bit per state machine at `flag << sm`.
pub mod fdebug {
    pub const RXSTALL: u32 = 1 << 0;
    pub const RXUNDER: u32 = 1 << 8;
    pub const TXOVER: u32 = 1 << 16;
    pub const TXSTALL: u32 = 1 << 24;
}

/// Snapshot of one state machine's FIFO flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FifoStatus {
    pub tx_full: bool,
    pub tx_empty: bool,
    pub rx_full: bool,
    pub rx_empty: bool,
    pub rx_level: u8,
}

pub trait PioRegisters {
    /// Write one word of a block's instruction memory.
    fn write_instruction(&self, block: u8, address: u8, word: u16);
    /// Select which 32-GPIO window the block sees (0 or 16).
    fn set_gpio_base(&self, block: u8, base: u8);

    /// Stop the state machine, write its full register image, clear its FIFOs,
    /// restart it and point its program counter at `pc`. Does not enable it.
    fn sm_init(&self, sm: SmId, pc: u8, config: &SmConfig);
    fn sm_set_enabled(&self, sm: SmId, enabled: bool);
    /// Clear the shift registers and internal counters.
    fn sm_restart(&self, sm: SmId);
    fn sm_set_clock_divider(&self, sm: SmId, divider: ClockDivider);
    fn sm_clock_divider_restart(&self, sm: SmId);
    /// Execute one instruction immediately.
    fn sm_exec(&self, sm: SmId, word: u16);
    fn sm_set_pins(&self, sm: SmId, values: PinMask, mask: PinMask);
    fn sm_set_pindirs(&self, sm: SmId, values: PinMask, mask: PinMask);
    fn sm_pc(&self, sm: SmId) -> u8;

    fn fifo_status(&self, sm: SmId) -> FifoStatus;
    fn tx_push(&self, sm: SmId, word: u32);
    fn rx_pull(&self, sm: SmId) -> u32;
    fn fdebug(&self, block: u8) -> u32;
    /// Write-one-to-clear.
    fn clear_fdebug(&self, block: u8, mask: u32);

    /// `INTE0`: interrupt sources routed to the block's first interrupt line.
    fn set_interrupt_enables(&self, block: u8, mask: u32);
    fn interrupt_enables(&self, block: u8) -> u32;
    /// `INTS0`: masked interrupt status.
    fn interrupt_status(&self, block: u8) -> u32;
    /// Install (or remove) the engine's entry point on the block's interrupt line.
    fn set_block_interrupt(&self, block: u8, enabled: bool);

    /// Hand the pad to the block and use the lowest drive strength.
    fn gpio_init(&self, block: u8, pin: u8);
    fn gpio_set_pulls(&self, pin: u8, up: bool, down: bool);
}

/// Width of one DMA element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stride {
    U8 = 1,
    U16 = 2,
    U32 = 4,
}

impl Stride {
    pub const fn bytes(self) -> usize {
        self as usize
    }
}

/// One side of a DMA transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaEndpoint {
    /// Incrementing memory address.
    Memory(usize),
    /// A state machine's TX FIFO register, written at `byte_offset`.
    TxFifo { sm: SmId, byte_offset: u8 },
    /// A state machine's RX FIFO register, read at `byte_offset`.
    RxFifo { sm: SmId, byte_offset: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaTransfer {
    pub read: DmaEndpoint,
    pub write: DmaEndpoint,
    /// Number of elements.
    pub count: u32,
    pub stride: Stride,
    pub dreq: u8,
    pub byteswap: bool,
}

pub trait DmaController {
    fn claim_channel(&self) -> Option<u8>;
    fn unclaim_channel(&self, channel: u8);
    /// Configure without starting.
    fn configure(&self, channel: u8, transfer: &DmaTransfer);
    fn start(&self, channels: u32);
    fn is_busy(&self, channel: u8) -> bool;
    fn abort(&self, channel: u8);
    /// Point the memory side of a configured channel somewhere else and
    /// optionally trigger it.
    fn retarget(&self, channel: u8, address: usize, count: u32, trigger: bool);
    fn set_channel_interrupt(&self, channel: u8, enabled: bool);
    /// Channels with a pending completion interrupt.
    fn pending_interrupts(&self) -> u32;
    fn acknowledge(&self, channel: u8);
}

/// The board-wide pin ownership registry shared with every other driver.
pub trait PinRegistry {
    fn pin_exists(&self, pin: u8) -> bool;
    fn pin_is_free(&self, pin: u8) -> bool;
    fn claim_pin(&self, pin: u8);
    /// Return the pin to its quiescent state and release it.
    fn reset_pin(&self, pin: u8);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafeModeReason {
    /// Interrupts were enabled more often than they were disabled.
    InterruptNesting,
}

pub trait Hardware: PioRegisters + DmaController + PinRegistry {
    fn system_clock_hz(&self) -> u32;
    /// Restart into safe mode. Shared-state invariants can no longer be trusted.
    fn enter_safe_mode(&self, reason: SafeModeReason) -> !;
}

/// Hook every blocking loop yields into on each iteration.
///
/// Under a cooperative runtime this runs pending background work; under a
/// real scheduler it may block or yield the thread instead.
pub trait Scheduler {
    fn run_background_tasks(&mut self);

    /// Keyboard interrupt or other cancellation request.
    fn cancel_requested(&self) -> bool {
        false
    }
}

impl<F: FnMut()> Scheduler for F {
    fn run_background_tasks(&mut self) {
        self()
    }
}
