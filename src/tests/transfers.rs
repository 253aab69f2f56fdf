use super::*;
use crate::{
    fdebug, Completion, ConfigError, DmaController, Error, Fault, RxBuffer, ShiftDirection,
    StateMachineConfig, Stride, TxBuffer,
};

#[test]
fn short_write_is_polled() {
    let engine = engine(ChipConfig::RP2040);
    let sm = engine.acquire(&StateMachineConfig::new(&TX_ONLY)).unwrap();
    let completion = engine
        .write(&sm, TxBuffer::new(&[1, 2, 3, 4]), &mut pump(&engine))
        .unwrap();
    assert_eq!(completion, Completion::Done);
    let sim = engine.hardware().state();
    assert_eq!(sim.sm(sm.id()).sink, [1, 2, 3, 4]);
    assert!(sim.dma_log.is_empty());
    assert!(sim.sm(sm.id()).tx.is_empty());
}

#[test]
fn left_shift_puts_narrow_elements_on_top() {
    let engine = engine(ChipConfig::RP2040);
    let sm = engine
        .acquire(&StateMachineConfig::new(&TX_ONLY).out_shift_direction(ShiftDirection::Left))
        .unwrap();
    engine
        .write(&sm, TxBuffer::new(&[0xab, 0xcd]), &mut pump(&engine))
        .unwrap();
    assert_eq!(engine.hardware().sm(sm.id()).sink, [0xab00_0000, 0xcd00_0000]);
}

#[test]
fn long_write_goes_through_dma() {
    let engine = engine(ChipConfig::RP2040);
    let sm = engine
        .acquire(&StateMachineConfig::new(&TX_ONLY).out_shift_direction(ShiftDirection::Left))
        .unwrap();
    let data: Vec<u8> = (0..32).collect();
    engine
        .write(&sm, TxBuffer::new(&data).stride(Stride::U16), &mut pump(&engine))
        .unwrap();

    let sim = engine.hardware().state();
    assert_eq!(sim.dma_log, [(0, data.as_ptr() as usize)]);
    let expected: Vec<u32> = data
        .chunks(2)
        .map(|pair| (u16::from_le_bytes([pair[0], pair[1]]) as u32) << 16)
        .collect();
    assert_eq!(sim.sm(sm.id()).sink, expected);
    // The channel went back to the pool.
    assert!(sim.channels.iter().all(|channel| !channel.claimed));
}

#[test]
fn byteswap_forces_dma() {
    let engine = engine(ChipConfig::RP2040);
    let sm = engine.acquire(&StateMachineConfig::new(&TX_ONLY)).unwrap();
    engine
        .write(
            &sm,
            TxBuffer::new(&[1, 2, 3, 4]).stride(Stride::U32).swap(true),
            &mut pump(&engine),
        )
        .unwrap();
    let sim = engine.hardware().state();
    assert_eq!(sim.dma_log.len(), 1);
    assert_eq!(sim.sm(sm.id()).sink, [0x0102_0304]);
}

#[test]
fn falls_back_to_polling_without_dma_channels() {
    let engine = engine(ChipConfig::RP2040);
    let sm = engine.acquire(&StateMachineConfig::new(&TX_ONLY)).unwrap();
    while engine.hardware().claim_channel().is_some() {}
    let data: Vec<u8> = (1..=16).collect();
    engine
        .write(
            &sm,
            TxBuffer::new(&data).stride(Stride::U16).swap(true),
            &mut pump(&engine),
        )
        .unwrap();
    let sim = engine.hardware().state();
    assert!(sim.dma_log.is_empty());
    assert_eq!(sim.sm(sm.id()).sink[..2], [0x0102, 0x0304]);
    assert_eq!(sim.sm(sm.id()).sink.len(), 8);
}

#[test]
fn short_read_is_polled() {
    let engine = engine(ChipConfig::RP2040);
    let sm = engine.acquire(&StateMachineConfig::new(&RX_ONLY)).unwrap();
    engine
        .hardware()
        .feed(sm.id(), [0xaa00_0000, 0xbb00_0000, 0xcc00_0000]);
    let mut data = [0u8; 3];
    let completion = engine
        .readinto(&sm, RxBuffer::new(&mut data), &mut pump(&engine))
        .unwrap();
    assert_eq!(completion, Completion::Done);
    assert_eq!(data, [0xaa, 0xbb, 0xcc]);
}

#[test]
fn long_read_goes_through_dma() {
    let engine = engine(ChipConfig::RP2040);
    let sm = engine
        .acquire(&StateMachineConfig::new(&RX_ONLY).in_shift_direction(ShiftDirection::Left))
        .unwrap();
    let words: Vec<u32> = (0..8).map(|i| 0x0101_0101 * i).collect();
    engine.hardware().feed(sm.id(), words.iter().copied());
    let mut data = [0u8; 32];
    engine
        .readinto(
            &sm,
            RxBuffer::new(&mut data).stride(Stride::U32),
            &mut pump(&engine),
        )
        .unwrap();
    let expected: Vec<u8> = words.iter().flat_map(|word| word.to_le_bytes()).collect();
    assert_eq!(data[..], expected[..]);
    assert_eq!(engine.hardware().state().dma_log.len(), 1);
}

#[test]
fn write_and_read_at_once() {
    let engine = engine(ChipConfig::RP2040);
    let sm = engine
        .acquire(&StateMachineConfig::new(&BIDIRECTIONAL))
        .unwrap();
    engine.hardware().feed(sm.id(), [0x5500_0000, 0x6600_0000]);
    let mut input = [0u8; 2];
    engine
        .write_readinto(
            &sm,
            TxBuffer::new(&[7, 8]),
            RxBuffer::new(&mut input),
            &mut pump(&engine),
        )
        .unwrap();
    assert_eq!(input, [0x55, 0x66]);
    assert_eq!(engine.hardware().sm(sm.id()).sink, [7, 8]);
}

#[test]
fn unused_fifo_is_rejected() {
    let engine = engine(ChipConfig::RP2040);
    let tx = engine.acquire(&StateMachineConfig::new(&TX_ONLY)).unwrap();
    let rx = engine.acquire(&StateMachineConfig::new(&RX_ONLY)).unwrap();
    let mut data = [0u8; 4];
    assert_eq!(
        engine.readinto(&tx, RxBuffer::new(&mut data), &mut pump(&engine)),
        Err(ConfigError::NoRxFifo.into())
    );
    assert_eq!(
        engine.write(&rx, TxBuffer::new(&data), &mut pump(&engine)),
        Err(ConfigError::NoTxFifo.into())
    );
    assert_eq!(
        engine.write(&tx, TxBuffer::new(&data[..3]).stride(Stride::U16), &mut pump(&engine)),
        Err(ConfigError::PartialElement { len: 3, stride: 2 }.into())
    );
}

#[test]
fn cancel_stops_waiting() {
    let engine = engine(ChipConfig::RP2040);
    let sm = engine.acquire(&StateMachineConfig::new(&TX_ONLY)).unwrap();
    engine.stop(&sm).unwrap();
    let mut scheduler = CancelAfter::new(&engine, 3);
    let completion = engine
        .write(&sm, TxBuffer::new(&[1, 2, 3]), &mut scheduler)
        .unwrap();
    assert_eq!(completion, Completion::Cancelled);
    assert_eq!(scheduler.calls, 3);
    // Data already in the FIFO stays there.
    assert_eq!(engine.hardware().sm(sm.id()).tx.len(), 3);
}

#[test]
fn cancel_aborts_dma() {
    let engine = engine(ChipConfig::RP2040);
    let sm = engine.acquire(&StateMachineConfig::new(&TX_ONLY)).unwrap();
    engine.stop(&sm).unwrap();
    let data = [0u8; 64];
    let completion = engine
        .write(&sm, TxBuffer::new(&data), &mut CancelAfter::new(&engine, 5))
        .unwrap();
    assert_eq!(completion, Completion::Cancelled);
    let sim = engine.hardware().state();
    assert!(sim.channels.iter().all(|channel| !channel.claimed && !channel.busy));
}

#[test]
fn uninterruptible_ignores_cancel() {
    let engine = engine(ChipConfig::RP2040);
    let sm = engine
        .acquire(&StateMachineConfig::new(&TX_ONLY).user_interruptible(false))
        .unwrap();
    let completion = engine
        .write(&sm, TxBuffer::new(&[1, 2]), &mut CancelAfter::new(&engine, 0))
        .unwrap();
    assert_eq!(completion, Completion::Done);
    assert_eq!(engine.hardware().sm(sm.id()).sink, [1, 2]);
}

#[test]
fn fifo_fault_is_retried_once() {
    let engine = engine(ChipConfig::RP2040);
    let sm = engine.acquire(&StateMachineConfig::new(&TX_ONLY)).unwrap();
    engine.hardware().arm_fault(sm.id(), fdebug::TXOVER, 1);
    let completion = engine
        .write(&sm, TxBuffer::new(&[1, 2]), &mut pump(&engine))
        .unwrap();
    assert_eq!(completion, Completion::Done);
    let sim = engine.hardware().state();
    // Once from acquire, once to recover.
    assert_eq!(sim.sm(sm.id()).inits, 2);
    assert!(sim.sm(sm.id()).enabled);
    assert_eq!(sim.sm(sm.id()).sink, [1, 2, 1, 2]);
}

#[test]
fn persistent_fifo_fault_is_reported() {
    let engine = engine(ChipConfig::RP2040);
    let sm = engine.acquire(&StateMachineConfig::new(&TX_ONLY)).unwrap();
    engine.hardware().arm_fault(sm.id(), fdebug::RXUNDER, 2);
    assert_eq!(
        engine.write(&sm, TxBuffer::new(&[1, 2]), &mut pump(&engine)),
        Err(Error::Fault(Fault::Fifo {
            sm: sm.id(),
            fdebug: fdebug::RXUNDER << sm.id().sm,
        }))
    );
    assert_eq!(engine.hardware().state().blocks[0].fdebug & (fdebug::RXUNDER << sm.id().sm), 0);
}

#[test]
fn stall_flags_and_rx_level() {
    let engine = engine(ChipConfig::RP2040);
    let sm = engine.acquire(&StateMachineConfig::new(&RX_ONLY)).unwrap();
    engine.hardware().feed(sm.id(), 0..12);
    for _ in 0..12 {
        engine.hardware().tick();
    }
    assert_eq!(engine.in_waiting(&sm).unwrap(), 8);
    assert!(engine.rxstall(&sm).unwrap());
    // RX-only programs never pull, so the TX side reports a stall too.
    assert!(engine.txstall(&sm).unwrap());

    engine.clear_rxfifo(&sm).unwrap();
    assert_eq!(engine.in_waiting(&sm).unwrap(), 0);
    assert!(!engine.rxstall(&sm).unwrap());
    engine.clear_txstall(&sm).unwrap();
    assert!(!engine.txstall(&sm).unwrap());
}
