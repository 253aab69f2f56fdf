//! An in-memory chip implementing [`Hardware`], for host-side tests.
//!
//! Nothing runs on its own: [`SimChip::tick`] advances the DMA channels and
//! the state machines by one step. State machines do not execute their
//! programs; an enabled one drains its TX FIFO into a sink and fills its RX
//! FIFO from a source, one word per tick.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::VecDeque;

use rp2pio_isa::{JmpCondition, Operation, INSTRUCTION_MEMORY_SIZE};

use crate::chip::ChipConfig;
use crate::config::{ClockDivider, FifoJoin, SmConfig};
use crate::hal::{
    fdebug, DmaController, DmaEndpoint, DmaTransfer, FifoStatus, Hardware, PinRegistry,
    PioRegisters, SafeModeReason, SmId,
};
use crate::pins::PinMask;

#[derive(Debug, Default)]
pub struct SimStateMachine {
    pub enabled: bool,
    pub config: SmConfig,
    pub pc: u8,
    pub divider: Option<ClockDivider>,
    /// Every instruction run through `sm_exec`, in order.
    pub exec_log: Vec<u16>,
    pub tx: VecDeque<u32>,
    pub rx: VecDeque<u32>,
    /// Words the state machine pulled from its TX FIFO.
    pub sink: Vec<u32>,
    /// Words the state machine will push to its RX FIFO.
    pub source: VecDeque<u32>,
    pub inits: u32,
    pub restarts: u32,
    pub clock_divider_restarts: u32,
    /// `FDEBUG` flags raised on every tick until `sm_init` ran this often.
    pub armed_fault: Option<(u32, u32)>,
}

impl SimStateMachine {
    fn tx_capacity(&self) -> usize {
        match self.config.join {
            FifoJoin::Tx => 8,
            FifoJoin::Rx | FifoJoin::PutGet => 0,
            _ => 4,
        }
    }

    fn rx_capacity(&self) -> usize {
        match self.config.join {
            FifoJoin::Rx => 8,
            FifoJoin::None | FifoJoin::Auto => 4,
            _ => 0,
        }
    }
}

#[derive(Debug)]
pub struct SimBlock {
    pub instructions: [u16; INSTRUCTION_MEMORY_SIZE],
    pub gpio_base: u8,
    pub fdebug: u32,
    pub inte: u32,
    /// IRQ flags raised by the state machines.
    pub irq_flags: u8,
    pub line_enabled: bool,
    pub state_machines: Vec<SimStateMachine>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SimPin {
    /// Pads that are not bonded out on this board.
    pub missing: bool,
    pub claimed: bool,
    pub resets: u32,
    /// Block driving the pad.
    pub function: Option<u8>,
    pub level: bool,
    pub output: bool,
    pub pull_up: bool,
    pub pull_down: bool,
}

#[derive(Debug, Default)]
pub struct SimChannel {
    pub claimed: bool,
    pub transfer: Option<DmaTransfer>,
    pub busy: bool,
    pub remaining: u32,
    /// Current address of the memory side.
    pub address: usize,
    pub interrupt_enabled: bool,
}

#[derive(Debug)]
pub struct SimState {
    pub chip: ChipConfig,
    pub system_clock_hz: u32,
    pub blocks: Vec<SimBlock>,
    pub pins: Vec<SimPin>,
    pub channels: Vec<SimChannel>,
    pub dma_pending: u32,
    /// `(channel, memory address)` each time a channel was started.
    pub dma_log: Vec<(u8, usize)>,
    /// Elements one channel moves per tick at most.
    pub dma_elements_per_tick: u32,
}

pub struct SimChip {
    state: RefCell<SimState>,
}

impl SimChip {
    pub fn new(chip: ChipConfig) -> Self {
        let blocks = (0..chip.blocks)
            .map(|_| SimBlock {
                instructions: [0; INSTRUCTION_MEMORY_SIZE],
                gpio_base: 0,
                fdebug: 0,
                inte: 0,
                irq_flags: 0,
                line_enabled: false,
                state_machines: (0..chip.state_machines)
                    .map(|_| SimStateMachine::default())
                    .collect(),
            })
            .collect();
        let system_clock_hz = match chip.version {
            crate::chip::PioVersion::V0 => 125_000_000,
            crate::chip::PioVersion::V1 => 150_000_000,
        };
        SimChip {
            state: RefCell::new(SimState {
                chip,
                system_clock_hz,
                blocks,
                pins: vec![SimPin::default(); chip.gpios as usize],
                channels: (0..chip.dma_channels).map(|_| SimChannel::default()).collect(),
                dma_pending: 0,
                dma_log: Vec::new(),
                dma_elements_per_tick: 4,
            }),
        }
    }

    pub fn state(&self) -> Ref<'_, SimState> {
        self.state.borrow()
    }

    pub fn state_mut(&self) -> RefMut<'_, SimState> {
        self.state.borrow_mut()
    }

    pub fn sm(&self, sm: SmId) -> Ref<'_, SimStateMachine> {
        Ref::map(self.state(), |state| state.sm(sm))
    }

    /// Queue words for the state machine to push into its RX FIFO.
    pub fn feed(&self, sm: SmId, words: impl IntoIterator<Item = u32>) {
        self.state_mut().sm_mut(sm).source.extend(words);
    }

    /// Raise `flags` (shifted to the state machine) on every tick until
    /// `sm_init` has run `inits` more times.
    pub fn arm_fault(&self, sm: SmId, flags: u32, inits: u32) {
        self.state_mut().sm_mut(sm).armed_fault = Some((flags, inits));
    }

    pub fn raise_irq(&self, block: u8, flag: u8) {
        self.state_mut().blocks[block as usize].irq_flags |= 1 << flag;
    }

    /// Advance every DMA channel, then every state machine.
    pub fn tick(&self) {
        let mut state = self.state_mut();
        for channel in 0..state.channels.len() {
            state.step_channel(channel as u8);
        }
        for block in 0..state.blocks.len() {
            for sm in 0..state.blocks[block].state_machines.len() {
                state.step_sm(SmId::new(block as u8, sm as u8));
            }
        }
    }
}

impl SimState {
    pub fn sm(&self, sm: SmId) -> &SimStateMachine {
        &self.blocks[sm.block as usize].state_machines[sm.sm as usize]
    }

    pub fn sm_mut(&mut self, sm: SmId) -> &mut SimStateMachine {
        &mut self.blocks[sm.block as usize].state_machines[sm.sm as usize]
    }

    fn step_sm(&mut self, id: SmId) {
        let block = &mut self.blocks[id.block as usize];
        let sm = &mut block.state_machines[id.sm as usize];
        if !sm.enabled {
            return;
        }
        if let Some((flags, _)) = sm.armed_fault.filter(|&(_, inits)| inits > 0) {
            block.fdebug |= flags << id.sm;
        }
        match sm.tx.pop_front() {
            Some(word) => sm.sink.push(word),
            None => block.fdebug |= fdebug::TXSTALL << id.sm,
        }
        if !sm.source.is_empty() {
            if sm.rx.len() < sm.rx_capacity() {
                if let Some(word) = sm.source.pop_front() {
                    sm.rx.push_back(word);
                }
            } else {
                block.fdebug |= fdebug::RXSTALL << id.sm;
            }
        }
    }

    fn step_channel(&mut self, channel: u8) {
        let index = channel as usize;
        let Some(transfer) = self.channels[index].transfer else {
            return;
        };
        let stride = transfer.stride.bytes();
        let mut moved = 0;
        while self.channels[index].busy
            && self.channels[index].remaining > 0
            && moved < self.dma_elements_per_tick
        {
            let address = self.channels[index].address;
            match (transfer.read, transfer.write) {
                (DmaEndpoint::Memory(_), DmaEndpoint::TxFifo { sm, byte_offset }) => {
                    let sim_sm = self.sm_mut(sm);
                    if sim_sm.tx.len() >= sim_sm.tx_capacity() {
                        break;
                    }
                    let mut bytes = [0u8; 4];
                    // SAFETY: the engine only hands out addresses of buffers
                    // that outlive the transfer.
                    unsafe {
                        core::ptr::copy_nonoverlapping(address as *const u8, bytes.as_mut_ptr(), stride)
                    };
                    if transfer.byteswap {
                        bytes[..stride].reverse();
                    }
                    let word = u32::from_le_bytes(bytes) << (8 * byte_offset as u32);
                    sim_sm.tx.push_back(word);
                }
                (DmaEndpoint::RxFifo { sm, byte_offset }, DmaEndpoint::Memory(_)) => {
                    let Some(word) = self.sm_mut(sm).rx.pop_front() else {
                        break;
                    };
                    let mut bytes = (word >> (8 * byte_offset as u32)).to_le_bytes();
                    if transfer.byteswap {
                        bytes[..stride].reverse();
                    }
                    // SAFETY: as above.
                    unsafe {
                        core::ptr::copy_nonoverlapping(bytes.as_ptr(), address as *mut u8, stride)
                    };
                }
                _ => break,
            }
            let ch = &mut self.channels[index];
            ch.address += stride;
            ch.remaining -= 1;
            moved += 1;
        }
        let ch = &mut self.channels[index];
        if ch.busy && ch.remaining == 0 {
            ch.busy = false;
            if ch.interrupt_enabled {
                self.dma_pending |= 1 << channel;
            }
        }
    }

    fn start_channel(&mut self, channel: u8) {
        let ch = &mut self.channels[channel as usize];
        ch.busy = ch.transfer.is_some();
        self.dma_log.push((channel, ch.address));
    }
}

fn memory_address(transfer: &DmaTransfer) -> usize {
    match (transfer.read, transfer.write) {
        (DmaEndpoint::Memory(address), _) | (_, DmaEndpoint::Memory(address)) => address,
        _ => 0,
    }
}

impl PioRegisters for SimChip {
    fn write_instruction(&self, block: u8, address: u8, word: u16) {
        self.state_mut().blocks[block as usize].instructions[address as usize] = word;
    }

    fn set_gpio_base(&self, block: u8, base: u8) {
        self.state_mut().blocks[block as usize].gpio_base = base;
    }

    fn sm_init(&self, id: SmId, pc: u8, config: &SmConfig) {
        let mut state = self.state_mut();
        let block = &mut state.blocks[id.block as usize];
        block.fdebug &= !(0x0101_0101 << id.sm);
        let sm = &mut block.state_machines[id.sm as usize];
        sm.enabled = false;
        sm.config = *config;
        sm.pc = pc;
        sm.tx.clear();
        sm.rx.clear();
        sm.inits += 1;
        if let Some((_, inits)) = sm.armed_fault.as_mut() {
            *inits = inits.saturating_sub(1);
        }
    }

    fn sm_set_enabled(&self, sm: SmId, enabled: bool) {
        self.state_mut().sm_mut(sm).enabled = enabled;
    }

    fn sm_restart(&self, sm: SmId) {
        self.state_mut().sm_mut(sm).restarts += 1;
    }

    fn sm_set_clock_divider(&self, sm: SmId, divider: ClockDivider) {
        self.state_mut().sm_mut(sm).divider = Some(divider);
    }

    fn sm_clock_divider_restart(&self, sm: SmId) {
        self.state_mut().sm_mut(sm).clock_divider_restarts += 1;
    }

    fn sm_exec(&self, id: SmId, word: u16) {
        let mut state = self.state_mut();
        let sm = state.sm_mut(id);
        sm.exec_log.push(word);
        if let Ok(Operation::Jmp {
            condition: JmpCondition::Always,
            address,
        }) = Operation::decode(word)
        {
            sm.pc = address;
        }
    }

    fn sm_set_pins(&self, _sm: SmId, values: PinMask, mask: PinMask) {
        let mut state = self.state_mut();
        for pin in mask.iter() {
            state.pins[pin as usize].level = values.contains(pin);
        }
    }

    fn sm_set_pindirs(&self, _sm: SmId, values: PinMask, mask: PinMask) {
        let mut state = self.state_mut();
        for pin in mask.iter() {
            state.pins[pin as usize].output = values.contains(pin);
        }
    }

    fn sm_pc(&self, sm: SmId) -> u8 {
        self.state().sm(sm).pc
    }

    fn fifo_status(&self, id: SmId) -> FifoStatus {
        let state = self.state();
        let sm = state.sm(id);
        FifoStatus {
            tx_full: sm.tx.len() >= sm.tx_capacity(),
            tx_empty: sm.tx.is_empty(),
            rx_full: sm.rx.len() >= sm.rx_capacity(),
            rx_empty: sm.rx.is_empty(),
            rx_level: sm.rx.len() as u8,
        }
    }

    fn tx_push(&self, id: SmId, word: u32) {
        let mut state = self.state_mut();
        let block = &mut state.blocks[id.block as usize];
        let sm = &mut block.state_machines[id.sm as usize];
        if sm.tx.len() >= sm.tx_capacity() {
            block.fdebug |= fdebug::TXOVER << id.sm;
        } else {
            sm.tx.push_back(word);
        }
    }

    fn rx_pull(&self, id: SmId) -> u32 {
        let mut state = self.state_mut();
        let block = &mut state.blocks[id.block as usize];
        match block.state_machines[id.sm as usize].rx.pop_front() {
            Some(word) => word,
            None => {
                block.fdebug |= fdebug::RXUNDER << id.sm;
                0
            }
        }
    }

    fn fdebug(&self, block: u8) -> u32 {
        self.state().blocks[block as usize].fdebug
    }

    fn clear_fdebug(&self, block: u8, mask: u32) {
        self.state_mut().blocks[block as usize].fdebug &= !mask;
    }

    fn set_interrupt_enables(&self, block: u8, mask: u32) {
        self.state_mut().blocks[block as usize].inte = mask;
    }

    fn interrupt_enables(&self, block: u8) -> u32 {
        self.state().blocks[block as usize].inte
    }

    fn interrupt_status(&self, block: u8) -> u32 {
        let state = self.state();
        let block = &state.blocks[block as usize];
        let mut raw = ((block.irq_flags & 0x0f) as u32) << 8;
        for (index, sm) in block.state_machines.iter().enumerate() {
            if !sm.rx.is_empty() {
                raw |= 1 << index;
            }
            if sm.tx.len() < sm.tx_capacity() {
                raw |= 1 << (4 + index);
            }
        }
        raw & block.inte
    }

    fn set_block_interrupt(&self, block: u8, enabled: bool) {
        self.state_mut().blocks[block as usize].line_enabled = enabled;
    }

    fn gpio_init(&self, block: u8, pin: u8) {
        self.state_mut().pins[pin as usize].function = Some(block);
    }

    fn gpio_set_pulls(&self, pin: u8, up: bool, down: bool) {
        let mut state = self.state_mut();
        let pin = &mut state.pins[pin as usize];
        pin.pull_up = up;
        pin.pull_down = down;
    }
}

impl DmaController for SimChip {
    fn claim_channel(&self) -> Option<u8> {
        let mut state = self.state_mut();
        let channel = state.channels.iter().position(|channel| !channel.claimed)?;
        state.channels[channel].claimed = true;
        Some(channel as u8)
    }

    fn unclaim_channel(&self, channel: u8) {
        self.state_mut().channels[channel as usize] = SimChannel::default();
    }

    fn configure(&self, channel: u8, transfer: &DmaTransfer) {
        let mut state = self.state_mut();
        let ch = &mut state.channels[channel as usize];
        ch.transfer = Some(*transfer);
        ch.address = memory_address(transfer);
        ch.remaining = transfer.count;
        ch.busy = false;
    }

    fn start(&self, channels: u32) {
        let mut state = self.state_mut();
        for channel in 0..state.channels.len() as u8 {
            if channels & (1 << channel) != 0 {
                state.start_channel(channel);
            }
        }
    }

    fn is_busy(&self, channel: u8) -> bool {
        self.state().channels[channel as usize].busy
    }

    fn abort(&self, channel: u8) {
        let mut state = self.state_mut();
        let ch = &mut state.channels[channel as usize];
        ch.busy = false;
        ch.remaining = 0;
    }

    fn retarget(&self, channel: u8, address: usize, count: u32, trigger: bool) {
        let mut state = self.state_mut();
        let ch = &mut state.channels[channel as usize];
        ch.address = address;
        ch.remaining = count;
        if trigger {
            state.start_channel(channel);
        }
    }

    fn set_channel_interrupt(&self, channel: u8, enabled: bool) {
        self.state_mut().channels[channel as usize].interrupt_enabled = enabled;
    }

    fn pending_interrupts(&self) -> u32 {
        self.state().dma_pending
    }

    fn acknowledge(&self, channel: u8) {
        self.state_mut().dma_pending &= !(1 << channel);
    }
}

impl PinRegistry for SimChip {
    fn pin_exists(&self, pin: u8) -> bool {
        self.state()
            .pins
            .get(pin as usize)
            .map_or(false, |pin| !pin.missing)
    }

    fn pin_is_free(&self, pin: u8) -> bool {
        !self.state().pins[pin as usize].claimed
    }

    fn claim_pin(&self, pin: u8) {
        self.state_mut().pins[pin as usize].claimed = true;
    }

    fn reset_pin(&self, pin: u8) {
        let mut state = self.state_mut();
        let pin = &mut state.pins[pin as usize];
        *pin = SimPin {
            missing: pin.missing,
            resets: pin.resets + 1,
            ..SimPin::default()
        };
    }
}

impl Hardware for SimChip {
    fn system_clock_hz(&self) -> u32 {
        self.state().system_clock_hz
    }

    fn enter_safe_mode(&self, reason: SafeModeReason) -> ! {
        panic!("safe mode: {:?}", reason)
    }
}
