use super::*;
use crate::{
    BufferChain, Completion, ConfigError, DmaSlice, Error, StateMachineConfig, Stride,
};

fn slice(buffer: &'static [u8]) -> Option<DmaSlice> {
    Some(DmaSlice::from_static(buffer))
}

fn addr(buffer: &'static [u8]) -> usize {
    buffer.as_ptr() as usize
}

fn run(engine: &Engine<SimChip>, ticks: usize) {
    let mut pump = pump(engine);
    for _ in 0..ticks {
        pump();
    }
}

#[test]
fn loop_buffer_repeats() {
    static A: [u8; 4] = [1, 2, 3, 4];
    let engine = engine(ChipConfig::RP2040);
    let sm = engine.acquire(&StateMachineConfig::new(&TX_ONLY)).unwrap();
    let chain = BufferChain {
        r#loop: slice(&A),
        ..BufferChain::default()
    };
    assert_eq!(
        engine.background_write(&sm, chain, Stride::U8, false, &mut pump(&engine)),
        Ok(Completion::Done)
    );
    assert!(engine.writing(&sm).unwrap());

    run(&engine, 20);
    let sim = engine.hardware().state();
    assert!(sim.dma_log.len() >= 3);
    assert!(sim.dma_log.iter().all(|&(_, address)| address == addr(&A)));
    assert_eq!(sim.sm(sm.id()).sink[..8], [1, 2, 3, 4, 1, 2, 3, 4]);
}

#[test]
fn once_buffer_plays_once_then_completes() {
    static A: [u8; 4] = [1, 2, 3, 4];
    static B: [u8; 2] = [5, 6];
    let engine = engine(ChipConfig::RP2040);
    let sm = engine.acquire(&StateMachineConfig::new(&TX_ONLY)).unwrap();
    engine
        .background_write(
            &sm,
            BufferChain {
                once: slice(&A),
                ..BufferChain::default()
            },
            Stride::U8,
            false,
            &mut pump(&engine),
        )
        .unwrap();
    run(&engine, 10);
    assert!(!engine.writing(&sm).unwrap());
    assert_eq!(engine.pending_write(&sm).unwrap(), 0);
    assert_eq!(engine.last_write(&sm).unwrap(), slice(&A));
    assert_eq!(engine.last_write(&sm).unwrap(), None);

    // A new submission restarts the idle channel.
    engine
        .background_write(
            &sm,
            BufferChain {
                once: slice(&B),
                ..BufferChain::default()
            },
            Stride::U8,
            false,
            &mut pump(&engine),
        )
        .unwrap();
    assert!(engine.writing(&sm).unwrap());
    run(&engine, 10);
    assert!(!engine.writing(&sm).unwrap());
    assert_eq!(engine.hardware().sm(sm.id()).sink, [1, 2, 3, 4, 5, 6]);
}

#[test]
fn follow_up_submission_never_drops_a_buffer() {
    static A: [u8; 4] = [1, 1, 1, 1];
    static B: [u8; 4] = [2, 2, 2, 2];
    static C: [u8; 4] = [3, 3, 3, 3];
    static D: [u8; 4] = [4, 4, 4, 4];
    let engine = engine(ChipConfig::RP2040);
    let sm = engine.acquire(&StateMachineConfig::new(&TX_ONLY)).unwrap();
    engine
        .background_write(
            &sm,
            BufferChain {
                r#loop: slice(&A),
                loop2: slice(&B),
                ..BufferChain::default()
            },
            Stride::U8,
            false,
            &mut pump(&engine),
        )
        .unwrap();
    assert_eq!(engine.pending_write(&sm).unwrap(), 2);

    // Blocks until both A and B have started.
    engine
        .background_write(
            &sm,
            BufferChain {
                once: slice(&C),
                r#loop: slice(&D),
                ..BufferChain::default()
            },
            Stride::U8,
            false,
            &mut pump(&engine),
        )
        .unwrap();
    assert_eq!(engine.pending_write(&sm).unwrap(), 2);
    run(&engine, 30);
    assert_eq!(engine.pending_write(&sm).unwrap(), 0);

    let played: Vec<usize> = engine
        .hardware()
        .state()
        .dma_log
        .iter()
        .map(|&(_, address)| address)
        .collect();
    let position = |address| played.iter().position(|&a| a == address);
    let (a, b, c, d) = (
        position(addr(&A)),
        position(addr(&B)),
        position(addr(&C)),
        position(addr(&D)),
    );
    assert!(a < b && b < c && c < d, "{:?}", played);
    assert_eq!(played.iter().filter(|&&a| a == addr(&C)).count(), 1);
    assert!(played[played.len() - 2..].iter().all(|&a| a == addr(&D)));
}

#[test]
fn follow_up_must_match_stride_and_swap() {
    static A: [u8; 4] = [0; 4];
    let engine = engine(ChipConfig::RP2040);
    let sm = engine.acquire(&StateMachineConfig::new(&TX_ONLY)).unwrap();
    let chain = BufferChain {
        r#loop: slice(&A),
        ..BufferChain::default()
    };
    engine
        .background_write(&sm, chain, Stride::U8, false, &mut pump(&engine))
        .unwrap();
    assert_eq!(
        engine.background_write(&sm, chain, Stride::U16, false, &mut pump(&engine)),
        Err(ConfigError::MismatchedStride.into())
    );
    assert_eq!(
        engine.background_write(&sm, chain, Stride::U8, true, &mut pump(&engine)),
        Err(ConfigError::MismatchedSwap.into())
    );
}

#[test]
fn waiting_for_room_can_be_cancelled() {
    static A: [u8; 16] = [0; 16];
    let engine = engine(ChipConfig::RP2040);
    let sm = engine.acquire(&StateMachineConfig::new(&TX_ONLY)).unwrap();
    engine.stop(&sm).unwrap();
    let chain = BufferChain {
        r#loop: slice(&A),
        ..BufferChain::default()
    };
    engine
        .background_write(&sm, chain, Stride::U8, false, &mut pump(&engine))
        .unwrap();
    // The stopped state machine never drains the FIFO, so A never finishes.
    assert_eq!(
        engine.background_write(&sm, chain, Stride::U8, false, &mut CancelAfter::new(&engine, 4)),
        Ok(Completion::Cancelled)
    );
    assert_eq!(engine.pending_write(&sm).unwrap(), 1);
}

#[test]
fn stopping_releases_the_channel() {
    static A: [u8; 4] = [0; 4];
    let engine = engine(ChipConfig::RP2040);
    let sm = engine.acquire(&StateMachineConfig::new(&TX_ONLY)).unwrap();
    engine
        .background_write(
            &sm,
            BufferChain {
                r#loop: slice(&A),
                ..BufferChain::default()
            },
            Stride::U8,
            false,
            &mut pump(&engine),
        )
        .unwrap();
    assert!(engine.hardware().state().channels[0].claimed);
    engine.stop_background_write(&sm).unwrap();
    assert!(!engine.writing(&sm).unwrap());
    let sim = engine.hardware().state();
    assert!(!sim.channels[0].claimed);
    assert!(!sim.channels[0].busy);
}

#[test]
fn background_needs_the_right_fifo() {
    static A: [u8; 4] = [0; 4];
    let engine = engine(ChipConfig::RP2040);
    let rx = engine.acquire(&StateMachineConfig::new(&RX_ONLY)).unwrap();
    let tx = engine.acquire(&StateMachineConfig::new(&TX_ONLY)).unwrap();
    let chain = BufferChain {
        r#loop: slice(&A),
        ..BufferChain::default()
    };
    assert_eq!(
        engine.background_write(&rx, chain, Stride::U8, false, &mut pump(&engine)),
        Err(ConfigError::NoTxFifo.into())
    );
    assert_eq!(
        engine.background_read(&tx, chain, Stride::U8, false, &mut pump(&engine)),
        Err(ConfigError::NoRxFifo.into())
    );
    assert_eq!(
        engine.background_write(&tx, BufferChain::default(), Stride::U8, false, &mut pump(&engine)),
        Err(ConfigError::EmptyBufferChain.into())
    );
}

#[test]
fn no_free_channel() {
    static A: [u8; 4] = [0; 4];
    let engine = engine(ChipConfig::RP2040);
    let sm = engine.acquire(&StateMachineConfig::new(&TX_ONLY)).unwrap();
    while crate::DmaController::claim_channel(engine.hardware()).is_some() {}
    assert_eq!(
        engine.background_write(
            &sm,
            BufferChain {
                r#loop: slice(&A),
                ..BufferChain::default()
            },
            Stride::U8,
            false,
            &mut pump(&engine),
        ),
        Err(Error::ResourcesExhausted(crate::Resource::DmaChannel))
    );
}

#[test]
fn background_read_fills_buffers() {
    let engine = engine(ChipConfig::RP2040);
    let sm = engine.acquire(&StateMachineConfig::new(&RX_ONLY)).unwrap();
    let buffer: &'static mut [u8; 4] = Box::leak(Box::new([0; 4]));
    let ptr = buffer.as_mut_ptr();
    // SAFETY: leaked, only read back below once the stream has stopped.
    let target = unsafe { DmaSlice::from_raw_parts(ptr, 4) };
    engine.hardware().feed(sm.id(), [0x0a00_0000, 0x0b00_0000, 0x0c00_0000, 0x0d00_0000]);
    engine
        .background_read(
            &sm,
            BufferChain {
                once: Some(target),
                ..BufferChain::default()
            },
            Stride::U8,
            false,
            &mut pump(&engine),
        )
        .unwrap();
    assert!(engine.reading(&sm).unwrap());
    run(&engine, 12);
    assert!(!engine.reading(&sm).unwrap());
    assert_eq!(engine.last_read(&sm).unwrap(), Some(target));
    engine.stop_background_read(&sm).unwrap();
    let filled = unsafe { core::slice::from_raw_parts(ptr, 4) };
    assert_eq!(filled, [0x0a, 0x0b, 0x0c, 0x0d]);
}

#[test]
fn deinit_tears_down_streams() {
    static A: [u8; 4] = [0; 4];
    let engine = engine(ChipConfig::RP2040);
    let sm = engine.acquire(&StateMachineConfig::new(&TX_ONLY)).unwrap();
    engine
        .background_write(
            &sm,
            BufferChain {
                r#loop: slice(&A),
                ..BufferChain::default()
            },
            Stride::U8,
            false,
            &mut pump(&engine),
        )
        .unwrap();
    engine.deinit(sm, false).unwrap();
    let sim = engine.hardware().state();
    assert!(sim.channels.iter().all(|channel| !channel.claimed));
}

#[test]
fn deinit_with_a_completion_pending() {
    static A: [u8; 4] = [0; 4];
    let engine = engine(ChipConfig::RP2040);
    let sm = engine.acquire(&StateMachineConfig::new(&TX_ONLY)).unwrap();
    engine
        .background_write(
            &sm,
            BufferChain {
                r#loop: slice(&A),
                ..BufferChain::default()
            },
            Stride::U8,
            false,
            &mut pump(&engine),
        )
        .unwrap();
    // Let the buffer finish without servicing the interrupt.
    for _ in 0..16 {
        if engine.hardware().state().dma_pending != 0 {
            break;
        }
        engine.hardware().tick();
    }
    assert_ne!(engine.hardware().state().dma_pending, 0);

    engine.deinit(sm, false).unwrap();
    {
        let sim = engine.hardware().state();
        assert_eq!(sim.dma_pending, 0);
        assert!(sim
            .channels
            .iter()
            .all(|channel| !channel.claimed && !channel.busy && !channel.interrupt_enabled));
    }
    // Nothing is left for the interrupt to service.
    engine.on_dma_irq();
    assert_eq!(engine.hardware().state().dma_pending, 0);
}

#[test]
fn stale_handle_cannot_stream() {
    static A: [u8; 4] = [0; 4];
    let engine = engine(ChipConfig::RP2040);
    let sm = engine.acquire(&StateMachineConfig::new(&TX_ONLY)).unwrap();
    engine.reset_all();
    assert_eq!(
        engine.background_write(
            &sm,
            BufferChain {
                r#loop: slice(&A),
                ..BufferChain::default()
            },
            Stride::U8,
            false,
            &mut pump(&engine),
        ),
        Err(Error::Deinitialized)
    );
    assert!(engine.hardware().state().channels.iter().all(|channel| !channel.claimed));
}
