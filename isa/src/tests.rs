use super::*;

#[test]
fn decode_each_class() {
    assert_eq!(
        Operation::decode(0b000_00000_110_00011),
        Ok(Operation::Jmp {
            condition: JmpCondition::PinHigh,
            address: 3
        })
    );
    assert_eq!(
        Operation::decode(0b001_00000_101_00111),
        Ok(Operation::Wait {
            polarity: true,
            source: WaitSource::Pin,
            index: 7
        })
    );
    assert_eq!(
        Operation::decode(0b010_00000_000_01000),
        Ok(Operation::In {
            source: InSource::Pins,
            bit_count: 8
        })
    );
    assert_eq!(
        Operation::decode(0b100_00000_101_00000),
        Ok(Operation::Pull {
            if_empty: false,
            block: true
        })
    );
    assert_eq!(
        Operation::decode(0b100_00000_001_00000),
        Ok(Operation::Push {
            if_full: false,
            block: true
        })
    );
    assert_eq!(
        Operation::decode(0b101_00000_111_00110),
        Ok(Operation::Mov {
            destination: MovDestination::Osr,
            op: MovOperation::None,
            source: MovSource::Isr
        })
    );
    assert_eq!(
        Operation::decode(0b111_00000_100_00011),
        Ok(Operation::Set {
            destination: SetDestination::PinDirs,
            data: 3
        })
    );
}

#[test]
fn delay_and_side_set_are_kept_apart() {
    // SET PINS, 1 side 1 [2] with one side-set bit
    let instr = Instruction::decode(0b111_10010_000_00001).unwrap();
    assert_eq!(instr.delay_side_set, 0b10010);
    assert_eq!(
        instr.operation,
        Operation::Set {
            destination: SetDestination::Pins,
            data: 1
        }
    );
    assert_eq!(instr.encode(), 0b111_10010_000_00001);
}

#[test]
fn reserved_encodings_are_rejected() {
    // IN with source 0b100
    assert_eq!(
        Operation::decode(0b010_00000_100_00001),
        Err(DecodeError::Reserved {
            word: 0b010_00000_100_00001
        })
    );
    // PUSH with trailing operand bits
    assert!(Operation::decode(0b100_00000_000_00011).is_err());
    // MOV with operation 0b11
    assert!(Operation::decode(0b101_00000_001_11001).is_err());
    // IRQ with the reserved high bit
    assert!(Operation::decode(0b110_00000_100_00000).is_err());
    // SET to 0b101
    assert!(Operation::decode(0b111_00000_101_00000).is_err());
}

#[test]
fn version_one_rx_fifo_moves() {
    assert_eq!(
        Operation::decode(0b100_00000_000_11000),
        Ok(Operation::MovToRxFifo { index: 0b1000 })
    );
    let op = Operation::decode(0b100_00000_100_10010).unwrap();
    assert_eq!(op, Operation::MovFromRxFifo { index: 2 });
    assert!(op.effects().loads_osr);
}

#[test]
fn effects_of_pin_instructions() {
    // OUT PINDIRS, 0 shifts 32 bits
    let fx = Operation::decode(0b011_00000_100_00000).unwrap().effects();
    assert_eq!(fx.writes_out_pins, Some(32));
    assert!(fx.shifts_out);

    // OUT X, 8 touches no pin
    let fx = Operation::decode(0b011_00000_001_01000).unwrap().effects();
    assert_eq!(fx.writes_out_pins, None);
    assert!(fx.shifts_out);

    // WAIT 1 GPIO 12
    let fx = Operation::decode(0b001_00000_100_01100).unwrap().effects();
    assert_eq!(fx.wait_gpio, Some(12));

    // MOV PINS, ~X
    let fx = Operation::decode(0b101_00000_000_01001).unwrap().effects();
    assert_eq!(fx.writes_out_pins, Some(0));
    assert_eq!(fx.reads_in_pins, None);

    // MOV ISR, PINS
    let fx = Operation::decode(0b101_00000_110_00000).unwrap().effects();
    assert_eq!(fx.reads_in_pins, Some(0));
    assert!(fx.loads_isr);

    // SET X, 1 is not a pin write
    let fx = Operation::decode(0b111_00000_001_00001).unwrap().effects();
    assert!(!fx.writes_set_pins);
}

#[test]
fn relocate_only_moves_jumps() {
    // JMP X-- 5 [3]
    assert_eq!(
        relocate(0b000_00011_010_00101, 10),
        Ok(0b000_00011_010_01111)
    );
    // SET X 5 is untouched
    assert_eq!(relocate(0b111_00000_001_00101, 10), Ok(0b111_00000_001_00101));
    assert_eq!(
        relocate(0b000_00000_000_11110, 4),
        Err(DecodeError::JumpOutOfMemory {
            word: 0b000_00000_000_11110,
            offset: 4
        })
    );
}

#[test]
fn jmp_to_offset_is_the_offset() {
    assert_eq!(jmp(0), 0);
    assert_eq!(jmp(17), 17);
}
