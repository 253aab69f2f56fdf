//! Per-state-machine handlers on the blocks' shared interrupt line.

use core::ops::{BitOr, BitOrAssign};

use arrayvec::ArrayVec;

use crate::chip::MAX_STATE_MACHINES;
use crate::engine::{Engine, StateMachine};
use crate::error::Error;
use crate::hal::{Hardware, SmId};

/// Interrupt sources of one state machine, relative to its index.
///
/// Shifted left by the state machine index to get the `INTE`/`INTS` bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterruptSources(u32);

impl InterruptSources {
    pub const NONE: InterruptSources = InterruptSources(0);
    pub const RX_NOT_EMPTY: InterruptSources = InterruptSources(1 << 0);
    pub const TX_NOT_FULL: InterruptSources = InterruptSources(1 << 4);
    /// The state machine raised its own IRQ flag.
    pub const SM: InterruptSources = InterruptSources(1 << 8);

    const ALL: u32 = Self::RX_NOT_EMPTY.0 | Self::TX_NOT_FULL.0 | Self::SM.0;

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits_truncate(bits: u32) -> Self {
        InterruptSources(bits & Self::ALL)
    }

    pub const fn contains(self, other: InterruptSources) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for InterruptSources {
    type Output = InterruptSources;
    fn bitor(self, rhs: Self) -> Self {
        InterruptSources(self.0 | rhs.0)
    }
}

impl BitOrAssign for InterruptSources {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Called from [`Engine::on_pio_irq`] with the state machine that raised it.
pub type InterruptHandler = fn(SmId);

#[derive(Debug, Clone, Copy)]
pub(crate) struct Registration {
    pub handler: InterruptHandler,
    pub sources: InterruptSources,
}

impl<H: Hardware> Engine<H> {
    /// Route `sources` of this state machine to `handler`, or stop routing
    /// anything when `handler` is `None`.
    ///
    /// The block's interrupt line stays enabled while any of its state
    /// machines has a handler.
    pub fn set_interrupt_handler(
        &self,
        sm: &StateMachine,
        handler: Option<InterruptHandler>,
        sources: InterruptSources,
    ) -> Result<(), Error> {
        let id = sm.id;
        let block_has_handlers = self.with_tables(|tables| {
            let active = tables
                .active_mut(id, sm.generation)
                .ok_or(Error::Deinitialized)?;
            active.irq = handler.map(|handler| Registration { handler, sources });

            let mut enables = self.hw.interrupt_enables(id.block) & !(InterruptSources::ALL << id.sm);
            if handler.is_some() {
                enables |= sources.bits() << id.sm;
            }
            self.hw.set_interrupt_enables(id.block, enables);

            Ok::<_, Error>(tables.blocks[id.block as usize]
                .slots
                .iter()
                .filter_map(|slot| slot.active.as_ref())
                .any(|active| active.irq.is_some()))
        })?;
        self.hw.set_block_interrupt(id.block, block_has_handlers);
        Ok(())
    }

    /// Drop the handler of a released slot and mask its sources.
    pub(crate) fn clear_interrupt_sources(&self, id: SmId) {
        let enables = self.hw.interrupt_enables(id.block) & !(InterruptSources::ALL << id.sm);
        self.hw.set_interrupt_enables(id.block, enables);
    }

    /// PIO interrupt entry point.
    ///
    /// Handlers run outside the critical section, so they may call back into
    /// the engine.
    pub fn on_pio_irq(&self) {
        for block in 0..self.chip.blocks {
            let status = self.hw.interrupt_status(block);
            if status == 0 {
                continue;
            }
            let due: ArrayVec<(InterruptHandler, SmId), MAX_STATE_MACHINES> =
                self.with_tables(|tables| {
                    tables.blocks[block as usize]
                        .slots
                        .iter()
                        .enumerate()
                        .take(self.chip.state_machines as usize)
                        .filter_map(|(sm, slot)| {
                            let registration = slot.active.as_ref()?.irq?;
                            let raised = status & (registration.sources.bits() << sm) != 0;
                            raised.then_some((registration.handler, SmId::new(block, sm as u8)))
                        })
                        .collect()
                });
            for (handler, id) in due {
                handler(id);
            }
        }
    }
}
