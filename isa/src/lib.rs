//! # PIO instruction words
//!
//! Decoding and classification of the fixed-width instructions executed by the
//! RP2040/RP2350 programmable I/O blocks.
//!
//! ```rust
//! use rp2pio_isa::{Instruction, Operation, OutDestination};
//!
//! // OUT PINS, 1 with a delay of 3 cycles.
//! let instr = Instruction::decode(0b011_00011_000_00001).unwrap();
//! assert_eq!(
//!     instr.operation,
//!     Operation::Out {
//!         destination: OutDestination::Pins,
//!         bit_count: 1
//!     }
//! );
//! assert!(instr.effects().shifts_out);
//! ```
//!
//! ## Relocation
//!
//! Programs are assembled as if they were loaded at address 0. Loading them
//! anywhere else requires every `JMP` target to be moved by the load offset:
//!
//! ```rust
//! // JMP 2, loaded at offset 20
//! assert_eq!(rp2pio_isa::relocate(0b000_00000_000_00010, 20), Ok(0b000_00000_000_10110));
//! ```

#![no_std]
// PIO instr grouping is 3/5/3/5
#![allow(clippy::unusual_byte_groupings)]

mod instruction;

pub use instruction::*;

#[cfg(test)]
mod tests;

/// Number of instruction slots in one PIO block.
pub const INSTRUCTION_MEMORY_SIZE: usize = 32;

/// Shift the target of a `JMP` by `offset`.
///
/// Every other instruction is returned unchanged. Delay and side-set bits are
/// preserved.
pub fn relocate(word: u16, offset: u8) -> Result<u16, DecodeError> {
    match Operation::decode(word)? {
        Operation::Jmp { condition, address } => {
            let address = address as usize + offset as usize;
            if address >= INSTRUCTION_MEMORY_SIZE {
                return Err(DecodeError::JumpOutOfMemory { word, offset });
            }
            let operands = Operation::Jmp {
                condition,
                address: address as u8,
            }
            .encode();
            Ok((word & 0b000_11111_000_00000) | operands)
        }
        _ => Ok(word),
    }
}

/// `JMP <address>`, unconditionally, no delay and no side-set.
///
/// Executing this moves a state machine's program counter.
pub const fn jmp(address: u8) -> u16 {
    Operation::Jmp {
        condition: JmpCondition::Always,
        address,
    }
    .encode()
}
