//! Releasing state machines, the global reset sweep and FIFO status queries.

use log::debug;

use crate::engine::{Engine, StateMachine};
use crate::error::Error;
use crate::hal::{fdebug, Hardware, SmId};
use crate::pins::PinMask;
use crate::tables::{Active, Tables};

/// What is left to do on the hardware after a slot was released.
struct Released {
    id: SmId,
    pins: PinMask,
    unused_pins: PinMask,
    block_has_handlers: bool,
}

impl Tables {
    /// Return a slot to the free pool. Program memory is freed once no other
    /// state machine of the block runs the same copy.
    fn release(&mut self, id: SmId) -> Option<(Active, PinMask, bool)> {
        let slot = self.slot_mut(id);
        let mut active = slot.active.take()?;
        slot.generation = slot.generation.wrapping_add(1);

        let block = &mut self.blocks[id.block as usize];
        if block.users(&active.program) == 0 {
            block.used_instructions &= !active.program.mask();
        }
        let block_has_handlers = block
            .slots
            .iter()
            .filter_map(|slot| slot.active.as_ref())
            .any(|active| active.irq.is_some());

        for stream in [active.tx_stream.as_ref(), active.rx_stream.as_ref()]
            .into_iter()
            .flatten()
        {
            self.dma_owner[stream.channel as usize] = None;
        }
        let unused_pins = self.release_pins(active.pins);
        active.irq = None;
        Some((active, unused_pins, block_has_handlers))
    }
}

impl<H: Hardware> Engine<H> {
    /// Stop the state machine and give back everything it holds.
    ///
    /// Pins nobody else uses are reset unless `leave_pins` is set, for drivers
    /// that hand the pins over to another peripheral.
    pub fn deinit(&self, sm: StateMachine, leave_pins: bool) -> Result<(), Error> {
        let released = self.with_tables(|tables| {
            tables
                .active(sm.id, sm.generation)
                .ok_or(Error::Deinitialized)?;
            Ok::<_, Error>(self.release_slot(tables, sm.id))
        })?;
        if let Some(released) = released {
            self.finish_release(released, leave_pins);
        }
        Ok(())
    }

    /// Channels are torn down here, before the critical section ends, so a
    /// completion interrupt cannot fire for a channel that has no owner.
    fn release_slot(&self, tables: &mut Tables, id: SmId) -> Option<Released> {
        let (active, unused_pins, block_has_handlers) = tables.release(id)?;
        self.hw.sm_set_enabled(id, false);
        for stream in [active.tx_stream, active.rx_stream].into_iter().flatten() {
            self.release_channel(stream.channel);
        }
        Some(Released {
            id,
            pins: active.pins,
            unused_pins,
            block_has_handlers,
        })
    }

    fn finish_release(&self, released: Released, leave_pins: bool) {
        let id = released.id;
        self.clear_interrupt_sources(id);
        if !released.block_has_handlers {
            self.hw.set_block_interrupt(id.block, false);
        }
        if !leave_pins {
            for pin in released.unused_pins.iter() {
                self.hw.reset_pin(pin);
            }
        }
        debug!(
            "{}: released, pins {:#x}{}",
            id,
            released.pins.bits(),
            if leave_pins { " left as they are" } else { "" }
        );
    }

    /// Release every state machine not marked with [`Engine::never_reset`],
    /// and remove every interrupt handler.
    ///
    /// Meant to run when the runtime resets between programs. Handles to
    /// released state machines report [`Error::Deinitialized`] from then on.
    pub fn reset_all(&self) {
        for id in Tables::ids(self.chip) {
            let released = self.with_tables(|tables| {
                let keep = tables
                    .slot(id)
                    .active
                    .as_ref()
                    .map_or(true, |active| active.never_reset);
                if keep {
                    None
                } else {
                    self.release_slot(tables, id)
                }
            });
            if let Some(released) = released {
                self.finish_release(released, false);
            }
        }
        self.with_tables(|tables| {
            for block in &mut tables.blocks[..self.chip.blocks as usize] {
                for active in block.slots.iter_mut().filter_map(|slot| slot.active.as_mut()) {
                    active.irq = None;
                }
            }
        });
        for block in 0..self.chip.blocks {
            self.hw.set_interrupt_enables(block, 0);
            self.hw.set_block_interrupt(block, false);
        }
    }

    /// Keep this state machine running across [`Engine::reset_all`].
    pub fn never_reset(&self, sm: &StateMachine) -> Result<(), Error> {
        self.with_active(sm, |active| active.never_reset = true)
    }

    /// Undo [`Engine::never_reset`].
    pub fn reset_ok(&self, sm: &StateMachine) -> Result<(), Error> {
        self.with_active(sm, |active| active.never_reset = false)
    }

    /// The state machine blocked on a full RX FIFO since the flag was last
    /// cleared.
    pub fn rxstall(&self, sm: &StateMachine) -> Result<bool, Error> {
        self.fdebug_flag(sm, fdebug::RXSTALL)
    }

    /// The state machine ran out of TX data since the flag was last cleared.
    pub fn txstall(&self, sm: &StateMachine) -> Result<bool, Error> {
        self.fdebug_flag(sm, fdebug::TXSTALL)
    }

    fn fdebug_flag(&self, sm: &StateMachine, flag: u32) -> Result<bool, Error> {
        self.with_active(sm, |_| ())?;
        Ok(self.hw.fdebug(sm.id.block) & (flag << sm.id.sm) != 0)
    }

    pub fn clear_txstall(&self, sm: &StateMachine) -> Result<(), Error> {
        self.with_active(sm, |_| ())?;
        self.hw.clear_fdebug(sm.id.block, fdebug::TXSTALL << sm.id.sm);
        Ok(())
    }

    /// Drop whatever is in the RX FIFO and clear the RX stall flag.
    pub fn clear_rxfifo(&self, sm: &StateMachine) -> Result<(), Error> {
        self.with_active(sm, |_| ())?;
        let level = self.hw.fifo_status(sm.id).rx_level;
        for _ in 0..level {
            let _ = self.hw.rx_pull(sm.id);
        }
        self.hw.clear_fdebug(sm.id.block, fdebug::RXSTALL << sm.id.sm);
        Ok(())
    }

    /// Words waiting in the RX FIFO.
    pub fn in_waiting(&self, sm: &StateMachine) -> Result<u8, Error> {
        self.with_active(sm, |_| ())?;
        Ok(self.hw.fifo_status(sm.id).rx_level)
    }
}
