//! # PIO state machine manager
//!
//! Shares the programmable I/O blocks of the RP2040 and RP2350 between
//! drivers: places programs in instruction memory (sharing identical ones),
//! hands out state machines, reference-counts GPIOs, and moves data to and
//! from the FIFOs by polling, by DMA, or continuously in the background.
//!
//! ```rust
//! use rp2pio::{ChipConfig, PinMask, StateMachineConfig};
//!
//! // Drive GPIO 25 from the least significant bit of each TX word.
//! static PROGRAM: [u16; 2] = [
//!     0b100_00000_101_00000, // PULL block
//!     0b011_00000_000_00001, // OUT PINS, 1
//! ];
//! let config = StateMachineConfig::new(&PROGRAM)
//!     .frequency(1_000_000)
//!     .out_pins(25, 1)
//!     .wait_gpio(PinMask::NONE);
//! assert!(ChipConfig::RP2040.gpio_base_for(PinMask::pin(25)).is_some());
//! # let _ = config;
//! ```
//!
//! An [`Engine`] owns the allocation tables and drives the chip through a
//! [`Hardware`] implementation:
//!
//! ```rust,ignore
//! let engine = Engine::new(board_hardware, ChipConfig::RP2040);
//! let sm = engine.acquire(&config)?;
//! engine.write(&sm, TxBuffer::new(b"hello"), &mut || run_background_tasks())?;
//! engine.deinit(sm, false)?;
//! ```
//!
//! ## Interrupts
//!
//! [`Engine::on_dma_irq`] must be called from the DMA completion interrupt
//! and [`Engine::on_pio_irq`] from the interrupt line of every PIO block.
//! Both only take critical sections through the `critical-section` crate.
//!
//! ## Host tests
//!
//! The `sim` feature provides [`sim::SimChip`], an in-memory chip that can
//! stand in for the real one.

#![cfg_attr(not(any(test, feature = "sim")), no_std)]
// PIO instr grouping is 3/5/3/5
#![allow(clippy::unusual_byte_groupings)]

mod background;
mod chip;
mod config;
mod critical;
mod engine;
mod error;
mod hal;
mod irq;
mod lifecycle;
mod pins;
mod tables;
mod transfer;
mod validator;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use background::{BufferChain, DmaSlice};
pub use chip::{ChipConfig, PioVersion, MAX_BLOCKS, MAX_DMA_CHANNELS, MAX_GPIOS, MAX_STATE_MACHINES};
pub use config::{
    ClockDivider, FifoJoin, MovStatus, ShiftConfig, ShiftDirection, SideSetConfig, SmConfig,
    StateMachineConfig,
};
pub use critical::{InterruptNesting, InterruptsDisabled};
pub use engine::{Engine, StateMachine};
pub use error::{
    ConfigError, Error, ErrorKind, Fault, InstructionIssue, ProgramError, ProgramPart, Resource,
};
pub use hal::{
    fdebug, DmaController, DmaEndpoint, DmaTransfer, FifoStatus, Hardware, PinRegistry,
    PioRegisters, SafeModeReason, Scheduler, SmId, Stride,
};
pub use irq::{InterruptHandler, InterruptSources};
pub use pins::{PinGroup, PinMask, Pull};
pub use transfer::{Completion, RxBuffer, TxBuffer};

pub use rp2pio_isa as isa;

#[cfg(test)]
mod tests;
