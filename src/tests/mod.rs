use crate::sim::SimChip;
use crate::{ChipConfig, Engine, Scheduler};

mod background;
mod interrupts;
mod transfers;

pub(crate) const PULL: u16 = 0b100_00000_101_00000; // PULL block
pub(crate) const PUSH: u16 = 0b100_00000_001_00000; // PUSH block
pub(crate) const OUT_NULL_32: u16 = 0b011_00000_011_00000; // OUT NULL, 32
pub(crate) const IN_NULL_32: u16 = 0b010_00000_011_00000; // IN NULL, 32
pub(crate) const OUT_PINS_1: u16 = 0b011_00000_000_00001; // OUT PINS, 1
pub(crate) const IN_PINS_1: u16 = 0b010_00000_000_00001; // IN PINS, 1
pub(crate) const SET_PINS_1: u16 = 0b111_00000_000_00001; // SET PINS, 1

/// Feeds the TX FIFO, no pins.
pub(crate) static TX_ONLY: [u16; 2] = [PULL, OUT_NULL_32];
/// Drains the RX FIFO, no pins.
pub(crate) static RX_ONLY: [u16; 2] = [IN_NULL_32, PUSH];
/// Uses both FIFOs, no pins.
pub(crate) static BIDIRECTIONAL: [u16; 4] = [PULL, OUT_NULL_32, IN_NULL_32, PUSH];

pub(crate) fn engine(chip: ChipConfig) -> Engine<SimChip> {
    Engine::new(SimChip::new(chip), chip)
}

/// Run the simulated chip one step and service the DMA interrupt.
pub(crate) fn pump(engine: &Engine<SimChip>) -> impl FnMut() + '_ {
    move || {
        engine.hardware().tick();
        engine.on_dma_irq();
    }
}

/// Pumps like [`pump`], and asks to cancel after `after` iterations.
pub(crate) struct CancelAfter<'a> {
    pub engine: &'a Engine<SimChip>,
    pub after: usize,
    pub calls: usize,
}

impl<'a> CancelAfter<'a> {
    pub fn new(engine: &'a Engine<SimChip>, after: usize) -> Self {
        CancelAfter {
            engine,
            after,
            calls: 0,
        }
    }
}

impl Scheduler for CancelAfter<'_> {
    fn run_background_tasks(&mut self) {
        self.engine.hardware().tick();
        self.engine.on_dma_irq();
        self.calls += 1;
    }

    fn cancel_requested(&self) -> bool {
        self.calls >= self.after
    }
}
