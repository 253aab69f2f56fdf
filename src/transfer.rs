//! Blocking exchanges with a running state machine.
//!
//! Transfers at least as long as the FIFO go through DMA, shorter ones are
//! copied by polling the FIFO flags. Either way the caller's scheduler runs on
//! every iteration of the wait.

use log::warn;

use crate::engine::{Engine, StateMachine};
use crate::error::{ConfigError, Error, Fault};
use crate::hal::{fdebug, DmaEndpoint, DmaTransfer, Hardware, Scheduler, SmId, Stride};

/// How a blocking call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Done,
    /// The scheduler asked to cancel. Data already moved stays where it is.
    Cancelled,
}

/// Data to send to the TX FIFO.
#[derive(Debug, Clone, Copy)]
pub struct TxBuffer<'a> {
    pub data: &'a [u8],
    pub stride: Stride,
    /// Reverse the byte order of each element.
    pub swap: bool,
}

impl<'a> TxBuffer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        TxBuffer {
            data,
            stride: Stride::U8,
            swap: false,
        }
    }

    pub fn stride(mut self, stride: Stride) -> Self {
        self.stride = stride;
        self
    }

    pub fn swap(mut self, swap: bool) -> Self {
        self.swap = swap;
        self
    }
}

/// Room for data from the RX FIFO.
#[derive(Debug)]
pub struct RxBuffer<'a> {
    pub data: &'a mut [u8],
    pub stride: Stride,
    pub swap: bool,
}

impl<'a> RxBuffer<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        RxBuffer {
            data,
            stride: Stride::U8,
            swap: false,
        }
    }

    pub fn stride(mut self, stride: Stride) -> Self {
        self.stride = stride;
        self
    }

    pub fn swap(mut self, swap: bool) -> Self {
        self.swap = swap;
        self
    }
}

/// Byte lane of the FIFO register an element of `stride` bytes goes through.
///
/// Left-shifting state machines consume the most significant bits of the TX
/// word first; right-shifting ones leave received bits at the top of the RX
/// word.
pub(crate) fn fifo_byte_offset(msb_aligned: bool, stride: Stride) -> u8 {
    if msb_aligned {
        4 - stride.bytes() as u8
    } else {
        0
    }
}

fn tx_word(element: &[u8], swap: bool, msb_aligned: bool) -> u32 {
    let n = element.len();
    let mut bytes = [0u8; 4];
    bytes[..n].copy_from_slice(element);
    if swap {
        bytes[..n].reverse();
    }
    let word = u32::from_le_bytes(bytes);
    if msb_aligned {
        word << (32 - 8 * n)
    } else {
        word
    }
}

fn rx_element(word: u32, swap: bool, msb_aligned: bool, element: &mut [u8]) {
    let n = element.len();
    let word = if msb_aligned { word >> (32 - 8 * n) } else { word };
    element.copy_from_slice(&word.to_le_bytes()[..n]);
    if swap {
        element.reverse();
    }
}

/// Snapshot of what a transfer needs from the slot.
struct Params {
    id: SmId,
    fifo_depth: usize,
    out_shift_right: bool,
    in_shift_right: bool,
    wait_for_txstall: bool,
    interruptible: bool,
}

impl<H: Hardware> Engine<H> {
    /// Send `out`, blocking until the state machine has consumed it (and, when
    /// configured, stalled on the empty FIFO).
    pub fn write(
        &self,
        sm: &StateMachine,
        out: TxBuffer<'_>,
        scheduler: &mut impl Scheduler,
    ) -> Result<Completion, Error> {
        self.exchange(sm, Some(out), None, scheduler)
    }

    /// Fill `input` from the RX FIFO.
    pub fn readinto(
        &self,
        sm: &StateMachine,
        input: RxBuffer<'_>,
        scheduler: &mut impl Scheduler,
    ) -> Result<Completion, Error> {
        self.exchange(sm, None, Some(input), scheduler)
    }

    /// Send `out` and fill `input` at the same time. The lengths may differ.
    pub fn write_readinto(
        &self,
        sm: &StateMachine,
        out: TxBuffer<'_>,
        input: RxBuffer<'_>,
        scheduler: &mut impl Scheduler,
    ) -> Result<Completion, Error> {
        self.exchange(sm, Some(out), Some(input), scheduler)
    }

    fn exchange(
        &self,
        sm: &StateMachine,
        out: Option<TxBuffer<'_>>,
        mut input: Option<RxBuffer<'_>>,
        scheduler: &mut impl Scheduler,
    ) -> Result<Completion, Error> {
        for (len, stride) in [
            out.as_ref().map(|out| (out.data.len(), out.stride)),
            input.as_ref().map(|input| (input.data.len(), input.stride)),
        ]
        .into_iter()
        .flatten()
        {
            if len % stride.bytes() != 0 {
                return Err(ConfigError::PartialElement {
                    len,
                    stride: stride.bytes(),
                }
                .into());
            }
        }
        let (params, tx_fifo, rx_fifo) = self.with_active(sm, |active| {
            let setup = &active.setup;
            let params = Params {
                id: sm.id,
                fifo_depth: setup.fifo_depth as usize,
                out_shift_right: setup.out_shift_right(),
                in_shift_right: setup.in_shift_right(),
                wait_for_txstall: setup.wait_for_txstall,
                interruptible: setup.user_interruptible,
            };
            (params, setup.tx_fifo, setup.rx_fifo)
        })?;
        if out.is_some() && !tx_fifo {
            return Err(ConfigError::NoTxFifo.into());
        }
        if input.is_some() && !rx_fifo {
            return Err(ConfigError::NoRxFifo.into());
        }

        let id = params.id;
        let faults = (fdebug::TXOVER | fdebug::RXUNDER) << id.sm;
        let mut retried = false;
        loop {
            self.hw.clear_fdebug(id.block, faults);
            let completion = self.transfer_once(&params, out.as_ref(), input.as_mut(), scheduler);
            let seen = self.hw.fdebug(id.block) & faults;
            if seen == 0 || completion == Completion::Cancelled {
                return Ok(completion);
            }
            self.hw.clear_fdebug(id.block, seen);
            if retried {
                return Err(Fault::Fifo { sm: id, fdebug: seen }.into());
            }
            warn!("{}: FIFO fault (FDEBUG {:#010x}), reinitializing", id, seen);
            self.reinitialize(sm)?;
            retried = true;
        }
    }

    fn cancelled(&self, params: &Params, scheduler: &impl Scheduler) -> bool {
        params.interruptible && scheduler.cancel_requested()
    }

    fn transfer_once(
        &self,
        params: &Params,
        out: Option<&TxBuffer<'_>>,
        input: Option<&mut RxBuffer<'_>>,
        scheduler: &mut impl Scheduler,
    ) -> Completion {
        let id = params.id;
        let len = out
            .map_or(0, |out| out.data.len())
            .max(input.as_ref().map_or(0, |input| input.data.len()));
        let swap = out.map_or(false, |out| out.swap) || input.as_ref().map_or(false, |input| input.swap);

        let channels = if len >= params.fifo_depth || swap {
            let channels = self.claim_channels(out.is_some(), input.is_some());
            if channels.is_none() {
                warn!("{}: no DMA channel free, polling the FIFO instead", id);
            }
            channels
        } else {
            None
        };
        let mut completion = match channels {
            Some((tx, rx)) => self.dma_transfer(params, out.zip(tx), input.zip(rx), scheduler),
            None if self.cancelled(params, &*scheduler) => Completion::Cancelled,
            None => self.polled_transfer(params, out, input, scheduler),
        };
        // Only stalls after this point say the state machine ran dry.
        let stall = fdebug::TXSTALL << id.sm;
        self.hw.clear_fdebug(id.block, stall);

        if out.is_some() && completion == Completion::Done {
            while !self.hw.fifo_status(id).tx_empty
                || (params.wait_for_txstall && self.hw.fdebug(id.block) & stall == 0)
            {
                scheduler.run_background_tasks();
                if self.cancelled(params, &*scheduler) {
                    completion = Completion::Cancelled;
                    break;
                }
            }
        }
        completion
    }

    /// One channel per direction in use, or none at all.
    fn claim_channels(&self, tx: bool, rx: bool) -> Option<(Option<u8>, Option<u8>)> {
        let tx_channel = if tx {
            Some(self.hw.claim_channel()?)
        } else {
            None
        };
        let rx_channel = if rx {
            match self.hw.claim_channel() {
                Some(channel) => Some(channel),
                None => {
                    if let Some(channel) = tx_channel {
                        self.hw.unclaim_channel(channel);
                    }
                    return None;
                }
            }
        } else {
            None
        };
        Some((tx_channel, rx_channel))
    }

    fn dma_transfer(
        &self,
        params: &Params,
        out: Option<(&TxBuffer<'_>, u8)>,
        input: Option<(&mut RxBuffer<'_>, u8)>,
        scheduler: &mut impl Scheduler,
    ) -> Completion {
        let id = params.id;
        let mut channels = 0u32;
        let tx_channel = out.map(|(out, channel)| {
            self.hw.configure(
                channel,
                &DmaTransfer {
                    read: DmaEndpoint::Memory(out.data.as_ptr() as usize),
                    write: DmaEndpoint::TxFifo {
                        sm: id,
                        byte_offset: fifo_byte_offset(!params.out_shift_right, out.stride),
                    },
                    count: (out.data.len() / out.stride.bytes()) as u32,
                    stride: out.stride,
                    dreq: id.dreq(false),
                    byteswap: out.swap,
                },
            );
            channels |= 1 << channel;
            channel
        });
        let rx_channel = input.map(|(input, channel)| {
            self.hw.configure(
                channel,
                &DmaTransfer {
                    read: DmaEndpoint::RxFifo {
                        sm: id,
                        byte_offset: fifo_byte_offset(params.in_shift_right, input.stride),
                    },
                    write: DmaEndpoint::Memory(input.data.as_mut_ptr() as usize),
                    count: (input.data.len() / input.stride.bytes()) as u32,
                    stride: input.stride,
                    dreq: id.dreq(true),
                    byteswap: input.swap,
                },
            );
            channels |= 1 << channel;
            channel
        });

        self.hw.start(channels);
        let busy = |channel: Option<u8>| channel.map_or(false, |channel| self.hw.is_busy(channel));
        let mut completion = Completion::Done;
        while busy(tx_channel) || busy(rx_channel) {
            scheduler.run_background_tasks();
            if self.cancelled(params, &*scheduler) {
                for channel in [tx_channel, rx_channel].into_iter().flatten() {
                    if self.hw.is_busy(channel) {
                        self.hw.abort(channel);
                    }
                }
                completion = Completion::Cancelled;
                break;
            }
        }
        for channel in [tx_channel, rx_channel].into_iter().flatten() {
            self.hw.unclaim_channel(channel);
        }
        completion
    }

    fn polled_transfer(
        &self,
        params: &Params,
        out: Option<&TxBuffer<'_>>,
        mut input: Option<&mut RxBuffer<'_>>,
        scheduler: &mut impl Scheduler,
    ) -> Completion {
        let id = params.id;
        let mut tx_elements = out.map(|out| out.data.chunks_exact(out.stride.bytes()).peekable());
        let mut rx_position = 0;
        loop {
            if let (Some(out), Some(elements)) = (out, tx_elements.as_mut()) {
                while elements.peek().is_some() && !self.hw.fifo_status(id).tx_full {
                    if let Some(element) = elements.next() {
                        let word = tx_word(element, out.swap, !params.out_shift_right);
                        self.hw.tx_push(id, word);
                    }
                }
            }
            if let Some(input) = input.as_mut() {
                let stride = input.stride.bytes();
                while rx_position < input.data.len() && !self.hw.fifo_status(id).rx_empty {
                    let word = self.hw.rx_pull(id);
                    let element = &mut input.data[rx_position..rx_position + stride];
                    rx_element(word, input.swap, params.in_shift_right, element);
                    rx_position += stride;
                }
            }
            let tx_done = tx_elements.as_mut().map_or(true, |elements| elements.peek().is_none());
            let rx_done = input.as_ref().map_or(true, |input| rx_position >= input.data.len());
            if tx_done && rx_done {
                return Completion::Done;
            }
            scheduler.run_background_tasks();
            if self.cancelled(params, &*scheduler) {
                return Completion::Cancelled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_elements_go_to_the_top_for_left_shift() {
        assert_eq!(tx_word(&[0xab], false, true), 0xab00_0000);
        assert_eq!(tx_word(&[0xab], false, false), 0x0000_00ab);
        assert_eq!(tx_word(&[0x34, 0x12], false, true), 0x1234_0000);
        assert_eq!(tx_word(&[0x34, 0x12], true, false), 0x0000_3412);
        assert_eq!(tx_word(&[1, 2, 3, 4], false, true), 0x0403_0201);
    }

    #[test]
    fn narrow_elements_come_from_the_top_for_right_shift() {
        let mut element = [0u8; 1];
        rx_element(0xab00_0000, false, true, &mut element);
        assert_eq!(element, [0xab]);
        let mut element = [0u8; 2];
        rx_element(0x0000_1234, true, false, &mut element);
        assert_eq!(element, [0x12, 0x34]);
    }

    #[test]
    fn byte_lane_matches_alignment() {
        assert_eq!(fifo_byte_offset(true, Stride::U8), 3);
        assert_eq!(fifo_byte_offset(true, Stride::U16), 2);
        assert_eq!(fifo_byte_offset(true, Stride::U32), 0);
        assert_eq!(fifo_byte_offset(false, Stride::U8), 0);
    }
}
