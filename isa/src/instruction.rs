use num_enum::TryFromPrimitive;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
pub enum JmpCondition {
    /// Always
    Always = 0b000,
    /// `!X`: scratch X zero
    XIsZero = 0b001,
    /// `X--`: scratch X non-zero, post decrement
    XDecNonZero = 0b010,
    /// `!Y`: scratch Y zero
    YIsZero = 0b011,
    /// `Y--`: scratch Y non-zero, post decrement
    YDecNonZero = 0b100,
    /// `X!=Y`: scratch X not equal to scratch Y
    XNotEqualY = 0b101,
    /// `PIN`: branch on the configured jump pin
    PinHigh = 0b110,
    /// `!OSRE`: output shift register not empty
    OutputShiftRegisterNotEmpty = 0b111,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
pub enum WaitSource {
    /// Absolute GPIO number (relative to the block's GPIO base).
    Gpio = 0b00,
    /// Index into the input pin group.
    Pin = 0b01,
    Irq = 0b10,
    /// The configured jump pin, PIO version 1 only.
    JmpPin = 0b11,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
pub enum InSource {
    Pins = 0b000,
    X = 0b001,
    Y = 0b010,
    Null = 0b011,
    // RESERVED = 0b100,
    // RESERVED = 0b101,
    Isr = 0b110,
    Osr = 0b111,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
pub enum OutDestination {
    Pins = 0b000,
    X = 0b001,
    Y = 0b010,
    Null = 0b011,
    PinDirs = 0b100,
    Pc = 0b101,
    Isr = 0b110,
    Exec = 0b111,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
pub enum MovDestination {
    Pins = 0b000,
    X = 0b001,
    Y = 0b010,
    /// PIO version 1 only.
    PinDirs = 0b011,
    Exec = 0b100,
    Pc = 0b101,
    Isr = 0b110,
    Osr = 0b111,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
pub enum MovOperation {
    None = 0b00,
    Invert = 0b01,
    BitReverse = 0b10,
    // RESERVED = 0b11,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
pub enum MovSource {
    Pins = 0b000,
    X = 0b001,
    Y = 0b010,
    Null = 0b011,
    // RESERVED = 0b100,
    Status = 0b101,
    Isr = 0b110,
    Osr = 0b111,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
pub enum SetDestination {
    Pins = 0b000,
    X = 0b001,
    Y = 0b010,
    // RESERVED = 0b011,
    PinDirs = 0b100,
    // RESERVED = 0b101,
    // RESERVED = 0b110,
    // RESERVED = 0b111,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("{word:#06x} uses a reserved encoding")]
    Reserved { word: u16 },
    #[error("{word:#06x} jumps past the end of instruction memory when loaded at {offset}")]
    JumpOutOfMemory { word: u16, offset: u8 },
}

/// The operation part of an instruction, without delay and side-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Jmp {
        condition: JmpCondition,
        address: u8,
    },
    Wait {
        polarity: bool,
        source: WaitSource,
        index: u8,
    },
    In {
        source: InSource,
        /// 0 encodes 32.
        bit_count: u8,
    },
    Out {
        destination: OutDestination,
        /// 0 encodes 32.
        bit_count: u8,
    },
    Push {
        if_full: bool,
        block: bool,
    },
    Pull {
        if_empty: bool,
        block: bool,
    },
    /// `MOV RXFIFO[..], ISR` (PIO version 1).
    MovToRxFifo {
        index: u8,
    },
    /// `MOV OSR, RXFIFO[..]` (PIO version 1).
    MovFromRxFifo {
        index: u8,
    },
    Mov {
        destination: MovDestination,
        op: MovOperation,
        source: MovSource,
    },
    Irq {
        clear: bool,
        wait: bool,
        index: u8,
    },
    Set {
        destination: SetDestination,
        data: u8,
    },
}

impl Operation {
    const fn class(&self) -> u16 {
        match self {
            Operation::Jmp { .. } => 0b000,
            Operation::Wait { .. } => 0b001,
            Operation::In { .. } => 0b010,
            Operation::Out { .. } => 0b011,
            Operation::Push { .. }
            | Operation::Pull { .. }
            | Operation::MovToRxFifo { .. }
            | Operation::MovFromRxFifo { .. } => 0b100,
            Operation::Mov { .. } => 0b101,
            Operation::Irq { .. } => 0b110,
            Operation::Set { .. } => 0b111,
        }
    }

    const fn operands(&self) -> (u8, u8) {
        match *self {
            Operation::Jmp { condition, address } => (condition as u8, address & 0b11111),
            Operation::Wait {
                polarity,
                source,
                index,
            } => ((polarity as u8) << 2 | source as u8, index & 0b11111),
            Operation::In { source, bit_count } => (source as u8, bit_count & 0b11111),
            Operation::Out {
                destination,
                bit_count,
            } => (destination as u8, bit_count & 0b11111),
            Operation::Push { if_full, block } => ((if_full as u8) << 1 | block as u8, 0),
            Operation::Pull { if_empty, block } => {
                (0b100 | (if_empty as u8) << 1 | block as u8, 0)
            }
            Operation::MovToRxFifo { index } => (0, 0b10000 | (index & 0b01111)),
            Operation::MovFromRxFifo { index } => (0b100, 0b10000 | (index & 0b01111)),
            Operation::Mov {
                destination,
                op,
                source,
            } => (destination as u8, (op as u8) << 3 | source as u8),
            Operation::Irq { clear, wait, index } => {
                ((clear as u8) << 1 | wait as u8, index & 0b11111)
            }
            Operation::Set { destination, data } => (destination as u8, data & 0b11111),
        }
    }

    /// Encode the operation. Delay and side-set bits are left at zero.
    pub const fn encode(&self) -> u16 {
        let (o0, o1) = self.operands();
        self.class() << 13 | (o0 as u16) << 5 | o1 as u16
    }

    /// Decode the operation of an instruction word, ignoring delay and side-set.
    pub fn decode(word: u16) -> Result<Self, DecodeError> {
        let o0 = ((word >> 5) & 0b111) as u8;
        let o1 = (word & 0b11111) as u8;
        let reserved = DecodeError::Reserved { word };
        let operation = match word >> 13 {
            0b000 => Operation::Jmp {
                condition: JmpCondition::try_from(o0).map_err(|_| reserved)?,
                address: o1,
            },
            0b001 => {
                let source = WaitSource::try_from(o0 & 0b011).map_err(|_| reserved)?;
                Operation::Wait {
                    polarity: o0 & 0b100 != 0,
                    source,
                    index: o1,
                }
            }
            0b010 => Operation::In {
                source: InSource::try_from(o0).map_err(|_| reserved)?,
                bit_count: o1,
            },
            0b011 => Operation::Out {
                destination: OutDestination::try_from(o0).map_err(|_| reserved)?,
                bit_count: o1,
            },
            0b100 => {
                let pull = o0 & 0b100 != 0;
                let if_flag = o0 & 0b010 != 0;
                let block = o0 & 0b001 != 0;
                match (pull, o1) {
                    (false, 0) => Operation::Push {
                        if_full: if_flag,
                        block,
                    },
                    (true, 0) => Operation::Pull {
                        if_empty: if_flag,
                        block,
                    },
                    (false, o1) if o1 & 0b10000 != 0 && o0 == 0 => Operation::MovToRxFifo {
                        index: o1 & 0b01111,
                    },
                    (true, o1) if o1 & 0b10000 != 0 && o0 == 0b100 => {
                        Operation::MovFromRxFifo {
                            index: o1 & 0b01111,
                        }
                    }
                    _ => return Err(reserved),
                }
            }
            0b101 => Operation::Mov {
                destination: MovDestination::try_from(o0).map_err(|_| reserved)?,
                op: MovOperation::try_from((o1 >> 3) & 0b11).map_err(|_| reserved)?,
                source: MovSource::try_from(o1 & 0b111).map_err(|_| reserved)?,
            },
            0b110 => {
                if o0 & 0b100 != 0 {
                    return Err(reserved);
                }
                Operation::Irq {
                    clear: o0 & 0b010 != 0,
                    wait: o0 & 0b001 != 0,
                    index: o1,
                }
            }
            _ => Operation::Set {
                destination: SetDestination::try_from(o0).map_err(|_| reserved)?,
                data: o1,
            },
        };
        Ok(operation)
    }

    /// What this operation touches outside the state machine's scratch registers.
    pub fn effects(&self) -> Effects {
        let mut fx = Effects::default();
        match *self {
            Operation::Jmp { condition, .. } => {
                fx.jmp_pin = condition == JmpCondition::PinHigh;
            }
            Operation::Wait { source, index, .. } => match source {
                WaitSource::Gpio => fx.wait_gpio = Some(index),
                WaitSource::Pin => fx.wait_in_pin = Some(index),
                WaitSource::JmpPin => fx.jmp_pin = true,
                WaitSource::Irq => {}
            },
            Operation::In { source, bit_count } => {
                if source == InSource::Pins {
                    fx.reads_in_pins = Some(shift_width(bit_count));
                }
                fx.shifts_in = true;
            }
            Operation::Out {
                destination,
                bit_count,
            } => {
                if matches!(destination, OutDestination::Pins | OutDestination::PinDirs) {
                    fx.writes_out_pins = Some(shift_width(bit_count));
                }
                fx.shifts_out = true;
            }
            Operation::Push { .. } => fx.pushes = true,
            Operation::Pull { .. } => fx.pulls = true,
            Operation::MovToRxFifo { .. } => {}
            Operation::MovFromRxFifo { .. } => fx.loads_osr = true,
            Operation::Mov {
                destination,
                source,
                ..
            } => {
                match destination {
                    MovDestination::Pins | MovDestination::PinDirs => {
                        fx.writes_out_pins = Some(0)
                    }
                    MovDestination::Isr => fx.loads_isr = true,
                    MovDestination::Osr => fx.loads_osr = true,
                    _ => {}
                }
                if source == MovSource::Pins {
                    fx.reads_in_pins = Some(0);
                }
            }
            Operation::Irq { .. } => {}
            Operation::Set { destination, .. } => {
                fx.writes_set_pins = matches!(destination, SetDestination::Pins | SetDestination::PinDirs);
            }
        }
        fx
    }
}

/// Number of bits moved by `IN`/`OUT`; a count of 0 shifts 32 bits.
const fn shift_width(bit_count: u8) -> u8 {
    if bit_count == 0 {
        32
    } else {
        bit_count
    }
}

/// Pin groups and FIFO paths referenced by a single instruction.
///
/// Widths are `Some(0)` when the instruction uses the whole pin group without
/// shifting a specific number of bits (`MOV PINS, ..`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Effects {
    pub reads_in_pins: Option<u8>,
    pub writes_out_pins: Option<u8>,
    pub writes_set_pins: bool,
    pub jmp_pin: bool,
    pub wait_gpio: Option<u8>,
    pub wait_in_pin: Option<u8>,
    /// `IN` of any source, fills the ISR.
    pub shifts_in: bool,
    /// `OUT` of any destination, drains the OSR.
    pub shifts_out: bool,
    pub pushes: bool,
    pub pulls: bool,
    pub loads_isr: bool,
    pub loads_osr: bool,
}

/// A PIO instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub operation: Operation,
    /// Combined delay and side-set field, split according to the program's side-set width.
    pub delay_side_set: u8,
}

impl Instruction {
    /// Decode a single instruction.
    pub fn decode(word: u16) -> Result<Instruction, DecodeError> {
        Ok(Instruction {
            operation: Operation::decode(word)?,
            delay_side_set: ((word >> 8) & 0b11111) as u8,
        })
    }

    pub fn encode(&self) -> u16 {
        self.operation.encode() | ((self.delay_side_set & 0b11111) as u16) << 8
    }

    pub fn effects(&self) -> Effects {
        self.operation.effects()
    }
}
