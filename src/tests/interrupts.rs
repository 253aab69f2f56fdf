use core::sync::atomic::{AtomicU32, Ordering};

use super::*;
use crate::{InterruptSources, SmId, StateMachineConfig};

#[test]
fn rx_not_empty_is_dispatched() {
    static CALLS: AtomicU32 = AtomicU32::new(0);
    fn on_rx(id: SmId) {
        assert_eq!(id, SmId::new(0, 0));
        CALLS.fetch_add(1, Ordering::Relaxed);
    }

    let engine = engine(ChipConfig::RP2040);
    let sm = engine.acquire(&StateMachineConfig::new(&RX_ONLY)).unwrap();
    engine
        .set_interrupt_handler(&sm, Some(on_rx), InterruptSources::RX_NOT_EMPTY)
        .unwrap();
    {
        let sim = engine.hardware().state();
        assert_eq!(sim.blocks[0].inte, InterruptSources::RX_NOT_EMPTY.bits() << sm.id().sm);
        assert!(sim.blocks[0].line_enabled);
    }

    // Nothing pending yet.
    engine.on_pio_irq();
    assert_eq!(CALLS.load(Ordering::Relaxed), 0);

    engine.hardware().feed(sm.id(), [42]);
    engine.hardware().tick();
    engine.on_pio_irq();
    assert_eq!(CALLS.load(Ordering::Relaxed), 1);
}

#[test]
fn state_machine_irq_flag_is_dispatched() {
    static CALLS: AtomicU32 = AtomicU32::new(0);
    fn on_flag(_: SmId) {
        CALLS.fetch_add(1, Ordering::Relaxed);
    }

    let engine = engine(ChipConfig::RP2040);
    let _first = engine.acquire(&StateMachineConfig::new(&TX_ONLY)).unwrap();
    let sm = engine.acquire(&StateMachineConfig::new(&TX_ONLY)).unwrap();
    assert_eq!(sm.id().sm, 1);
    engine
        .set_interrupt_handler(&sm, Some(on_flag), InterruptSources::SM)
        .unwrap();
    assert_eq!(engine.hardware().state().blocks[0].inte, 0x200);

    // Another state machine's flag is not ours.
    engine.hardware().raise_irq(0, 0);
    engine.on_pio_irq();
    assert_eq!(CALLS.load(Ordering::Relaxed), 0);

    engine.hardware().raise_irq(0, 1);
    engine.on_pio_irq();
    assert_eq!(CALLS.load(Ordering::Relaxed), 1);
}

#[test]
fn handler_can_be_removed() {
    fn ignore(_: SmId) {}

    let engine = engine(ChipConfig::RP2040);
    let a = engine.acquire(&StateMachineConfig::new(&TX_ONLY)).unwrap();
    let b = engine.acquire(&StateMachineConfig::new(&TX_ONLY)).unwrap();
    let sources = InterruptSources::TX_NOT_FULL | InterruptSources::SM;
    engine.set_interrupt_handler(&a, Some(ignore), sources).unwrap();
    engine.set_interrupt_handler(&b, Some(ignore), sources).unwrap();
    assert_eq!(engine.hardware().state().blocks[0].inte, 0x330);

    // The line stays up while `b` still has a handler.
    engine
        .set_interrupt_handler(&a, None, InterruptSources::NONE)
        .unwrap();
    {
        let sim = engine.hardware().state();
        assert_eq!(sim.blocks[0].inte, 0x220);
        assert!(sim.blocks[0].line_enabled);
    }

    engine.deinit(b, false).unwrap();
    let sim = engine.hardware().state();
    assert_eq!(sim.blocks[0].inte, 0);
    assert!(!sim.blocks[0].line_enabled);
}

#[test]
fn reset_all_drops_every_handler() {
    fn ignore(_: SmId) {}

    let engine = engine(ChipConfig::RP2040);
    let kept = engine.acquire(&StateMachineConfig::new(&TX_ONLY)).unwrap();
    engine.never_reset(&kept).unwrap();
    engine
        .set_interrupt_handler(&kept, Some(ignore), InterruptSources::SM)
        .unwrap();

    engine.reset_all();
    assert!(engine.is_active(&kept));
    let sim = engine.hardware().state();
    assert_eq!(sim.blocks[0].inte, 0);
    assert!(!sim.blocks[0].line_enabled);
}

#[test]
fn stale_handle_cannot_register() {
    fn ignore(_: SmId) {}

    let engine = engine(ChipConfig::RP2040);
    let sm = engine.acquire(&StateMachineConfig::new(&TX_ONLY)).unwrap();
    engine.reset_all();
    assert_eq!(
        engine.set_interrupt_handler(&sm, Some(ignore), InterruptSources::SM),
        Err(crate::Error::Deinitialized)
    );
}
