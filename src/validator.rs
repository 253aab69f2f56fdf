//! Static check of the instruction streams against the declared pin groups.

use rp2pio_isa::Instruction;

use crate::error::{InstructionIssue, ProgramError, ProgramPart};
use crate::pins::PinMask;

/// What the caller declared, as seen by the instructions.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Declared {
    /// Every GPIO the state machine will own, absolute.
    pub pins: PinMask,
    /// Added to `WAIT GPIO` indices to get absolute GPIO numbers.
    pub gpio_base: u8,
    pub jmp_pin: bool,
    pub in_count: Option<u8>,
    pub out_count: Option<u8>,
    pub set_pins: bool,
    pub autopush: bool,
    pub autopull: bool,
}

/// Facts derived from the instructions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Introspection {
    pub tx_fifo: bool,
    pub rx_fifo: bool,
    in_loaded: bool,
    out_loaded: bool,
    in_used: bool,
    out_used: bool,
}

impl Introspection {
    fn consider(
        &mut self,
        declared: &Declared,
        word: u16,
    ) -> Result<(), InstructionIssue> {
        let fx = Instruction::decode(word)?.effects();

        if fx.pushes {
            self.rx_fifo = true;
            self.in_loaded = true;
        }
        if fx.pulls {
            self.tx_fifo = true;
            self.out_loaded = true;
        }
        if fx.jmp_pin && !declared.jmp_pin {
            return Err(InstructionIssue::MissingJmpPin);
        }
        if let Some(index) = fx.wait_gpio {
            let pin = index + declared.gpio_base;
            if !declared.pins.contains(pin) {
                return Err(InstructionIssue::ExtraWaitPin { pin });
            }
        }
        if let Some(index) = fx.wait_in_pin {
            let count = declared.in_count.ok_or(InstructionIssue::MissingWaitInPin)?;
            if index >= count {
                return Err(InstructionIssue::WaitOutsideInCount { index, count });
            }
        }
        if let Some(bits) = fx.reads_in_pins {
            let count = declared.in_count.ok_or(InstructionIssue::MissingInPins)?;
            if bits > count {
                return Err(InstructionIssue::InCountExceeded { bits, count });
            }
        }
        if fx.shifts_in {
            if declared.autopush {
                self.in_loaded = true;
                self.rx_fifo = true;
            }
            self.in_used = true;
        }
        if let Some(bits) = fx.writes_out_pins {
            let count = declared.out_count.ok_or(InstructionIssue::MissingOutPins)?;
            if bits > count {
                return Err(InstructionIssue::OutCountExceeded { bits, count });
            }
        }
        if fx.shifts_out {
            if declared.autopull {
                self.out_loaded = true;
                self.tx_fifo = true;
            }
            self.out_used = true;
        }
        if fx.writes_set_pins && !declared.set_pins {
            return Err(InstructionIssue::MissingSetPins);
        }
        self.in_loaded |= fx.loads_isr;
        self.out_loaded |= fx.loads_osr;
        Ok(())
    }
}

/// Walk every instruction stream the state machine may execute.
///
/// Streams are checked in order and share one introspection state, so an
/// `init` snippet that loads the OSR satisfies an `OUT` in the program.
pub(crate) fn validate(
    declared: &Declared,
    streams: &[(ProgramPart, &[u16])],
) -> Result<Introspection, ProgramError> {
    let mut state = Introspection::default();
    for &(part, words) in streams {
        for (index, &word) in words.iter().enumerate() {
            state
                .consider(declared, word)
                .map_err(|issue| ProgramError::Instruction { part, index, issue })?;
        }
    }
    if state.in_used && !state.in_loaded {
        return Err(ProgramError::InWithoutIsrLoad);
    }
    if state.out_used && !state.out_loaded {
        return Err(ProgramError::OutWithoutOsrLoad);
    }
    Ok(state)
}
