//! Continuous DMA streams to and from a state machine.
//!
//! Each direction of a state machine owns at most one DMA channel, chained
//! through three buffer slots. The DMA completion interrupt rotates the slots
//! and points the channel at the next buffer; a follow-up submission waits
//! until everything it replaces has started playing.

use log::trace;

use crate::engine::{Engine, StateMachine};
use crate::error::{ConfigError, Error, Resource};
use crate::hal::{DmaEndpoint, DmaTransfer, Hardware, Scheduler, Stride};
use crate::tables::{Active, Direction};
use crate::transfer::{fifo_byte_offset, Completion};

/// A buffer the DMA engine reads from or writes to in the background.
///
/// The memory must stay valid for as long as a stream may touch it, which a
/// borrow cannot express; hence the `'static` and `unsafe` constructors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaSlice {
    addr: usize,
    len: usize,
}

impl DmaSlice {
    pub fn from_static(buffer: &'static [u8]) -> Self {
        DmaSlice {
            addr: buffer.as_ptr() as usize,
            len: buffer.len(),
        }
    }

    pub fn from_static_mut(buffer: &'static mut [u8]) -> Self {
        DmaSlice {
            addr: buffer.as_mut_ptr() as usize,
            len: buffer.len(),
        }
    }

    /// # Safety
    ///
    /// `len` bytes at `ptr` must stay valid until the stream using them has
    /// been stopped. For background reads nothing else may access them while
    /// the DMA channel writes to them.
    pub unsafe fn from_raw_parts(ptr: *const u8, len: usize) -> Self {
        DmaSlice {
            addr: ptr as usize,
            len,
        }
    }

    pub fn addr(&self) -> usize {
        self.addr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// The buffers of one background submission.
///
/// `once` plays first, then `loop` and `loop2` alternate forever. Missing
/// buffers are filled in from the others:
///
/// | supplied              | plays                          |
/// |-----------------------|--------------------------------|
/// | `loop2`               | `loop2` forever                |
/// | `loop`                | `loop` forever                 |
/// | `loop`, `loop2`       | `loop`, `loop2`, `loop`, ...   |
/// | `once`                | `once`, then stops             |
/// | `once`, `loop2`       | `once`, `loop2` forever        |
/// | `once`, `loop`        | `once`, `loop` forever         |
/// | all three             | `once`, `loop`, `loop2`, `loop`, ... |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferChain {
    pub once: Option<DmaSlice>,
    pub r#loop: Option<DmaSlice>,
    pub loop2: Option<DmaSlice>,
}

impl BufferChain {
    /// Drop empty buffers, fill in missing slots and count what was supplied.
    fn normalize(self, stride: Stride) -> Result<(BufferChain, u8), ConfigError> {
        let present = |slice: Option<DmaSlice>| slice.filter(|slice| !slice.is_empty());
        let (once, r#loop, loop2) = (present(self.once), present(self.r#loop), present(self.loop2));
        let mut supplied = 0;
        for slice in [once, r#loop, loop2].into_iter().flatten() {
            if slice.len % stride.bytes() != 0 {
                return Err(ConfigError::PartialElement {
                    len: slice.len,
                    stride: stride.bytes(),
                });
            }
            supplied += 1;
        }
        if supplied == 0 {
            return Err(ConfigError::EmptyBufferChain);
        }
        let chain = match (once, r#loop, loop2) {
            (None, None, loop2) => BufferChain {
                once: loop2,
                r#loop: loop2,
                loop2,
            },
            (None, Some(r#loop), None) => BufferChain {
                once: Some(r#loop),
                r#loop: Some(r#loop),
                loop2: Some(r#loop),
            },
            (None, Some(r#loop), Some(loop2)) => BufferChain {
                once: Some(r#loop),
                r#loop: Some(loop2),
                loop2: Some(r#loop),
            },
            (Some(once), None, loop2) => BufferChain {
                once: Some(once),
                r#loop: loop2,
                loop2,
            },
            (Some(once), Some(r#loop), None) => BufferChain {
                once: Some(once),
                r#loop: Some(r#loop),
                loop2: Some(r#loop),
            },
            full => BufferChain {
                once: full.0,
                r#loop: full.1,
                loop2: full.2,
            },
        };
        Ok((chain, supplied))
    }
}

/// Rotation state of one running stream.
#[derive(Debug)]
pub(crate) struct Stream {
    pub channel: u8,
    pub stride: Stride,
    pub swap: bool,
    current: Option<DmaSlice>,
    next: [Option<DmaSlice>; 3],
    /// Supplied buffers that have not started playing yet.
    pub pending: u8,
    /// Ran out of buffers; the channel is idle.
    pub completed: bool,
    /// Buffer most recently finished, until somebody asks for it.
    pub retired: Option<DmaSlice>,
}

impl Stream {
    fn start(channel: u8, stride: Stride, swap: bool, chain: BufferChain, supplied: u8) -> Self {
        Stream {
            channel,
            stride,
            swap,
            current: chain.once,
            next: [chain.r#loop, chain.loop2, chain.r#loop],
            pending: supplied,
            completed: false,
            retired: None,
        }
    }

    /// The channel finished the current buffer. Returns the buffer it should
    /// move on to.
    pub(crate) fn rotate(&mut self) -> Option<DmaSlice> {
        if self.current.is_some() {
            self.retired = self.current;
        }
        self.current = self.next[0];
        self.next = [self.next[1], self.next[2], self.next[1]];
        match self.current {
            Some(_) => self.pending = self.pending.saturating_sub(1),
            None => {
                self.completed = true;
                self.pending = 0;
            }
        }
        self.current
    }

    /// Replace the upcoming buffers. Restarts a completed stream.
    fn queue(&mut self, chain: BufferChain, supplied: u8) -> Option<DmaSlice> {
        self.next = [chain.once, chain.r#loop, chain.loop2];
        self.pending = supplied;
        if self.completed && self.next[0].is_some() {
            self.completed = false;
            return self.rotate();
        }
        None
    }

    fn count(&self, slice: DmaSlice) -> u32 {
        (slice.len / self.stride.bytes()) as u32
    }
}

impl Active {
    pub(crate) fn stream_mut(&mut self, direction: Direction) -> &mut Option<Stream> {
        match direction {
            Direction::Tx => &mut self.tx_stream,
            Direction::Rx => &mut self.rx_stream,
        }
    }
}

impl<H: Hardware> Engine<H> {
    /// Keep the TX FIFO fed from `chain` without blocking.
    ///
    /// The first call claims a DMA channel and starts it. Later calls block
    /// until every buffer of the previous submission has started playing,
    /// then queue the new buffers behind the current one.
    pub fn background_write(
        &self,
        sm: &StateMachine,
        chain: BufferChain,
        stride: Stride,
        swap: bool,
        scheduler: &mut impl Scheduler,
    ) -> Result<Completion, Error> {
        self.background(sm, Direction::Tx, chain, stride, swap, scheduler)
    }

    /// Keep draining the RX FIFO into `chain` without blocking.
    pub fn background_read(
        &self,
        sm: &StateMachine,
        chain: BufferChain,
        stride: Stride,
        swap: bool,
        scheduler: &mut impl Scheduler,
    ) -> Result<Completion, Error> {
        self.background(sm, Direction::Rx, chain, stride, swap, scheduler)
    }

    fn background(
        &self,
        sm: &StateMachine,
        direction: Direction,
        chain: BufferChain,
        stride: Stride,
        swap: bool,
        scheduler: &mut impl Scheduler,
    ) -> Result<Completion, Error> {
        let (chain, supplied) = chain.normalize(stride)?;
        let (interruptible, has_fifo, msb_aligned, running) = self.with_active(sm, |active| {
            let running = active
                .stream_mut(direction)
                .as_ref()
                .map(|stream| (stream.stride, stream.swap));
            let setup = &active.setup;
            let (has_fifo, msb_aligned) = match direction {
                Direction::Tx => (setup.tx_fifo, !setup.out_shift_right()),
                Direction::Rx => (setup.rx_fifo, setup.in_shift_right()),
            };
            (setup.user_interruptible, has_fifo, msb_aligned, running)
        })?;
        if !has_fifo {
            return Err(match direction {
                Direction::Tx => ConfigError::NoTxFifo,
                Direction::Rx => ConfigError::NoRxFifo,
            }
            .into());
        }

        if let Some((running_stride, running_swap)) = running {
            if running_stride != stride {
                return Err(ConfigError::MismatchedStride.into());
            }
            if running_swap != swap {
                return Err(ConfigError::MismatchedSwap.into());
            }
            loop {
                let pending = self.with_active(sm, |active| {
                    active.stream_mut(direction).as_ref().map_or(0, |stream| stream.pending)
                })?;
                if pending == 0 {
                    break;
                }
                scheduler.run_background_tasks();
                if interruptible && scheduler.cancel_requested() {
                    return Ok(Completion::Cancelled);
                }
            }
            let restarted = self.with_active(sm, |active| {
                let stream = active.stream_mut(direction).as_mut()?;
                let next = stream.queue(chain, supplied)?;
                self.hw.retarget(stream.channel, next.addr, stream.count(next), true);
                Some(next)
            })?;
            if let Some(next) = restarted {
                trace!("{}: restarted stream at {:#x}", sm.id, next.addr);
            }
            return Ok(Completion::Done);
        }

        let channel = self
            .hw
            .claim_channel()
            .ok_or(Error::ResourcesExhausted(Resource::DmaChannel))?;
        // Normalized chains always start with a buffer.
        let first = chain.once.ok_or(ConfigError::EmptyBufferChain)?;
        let byte_offset = fifo_byte_offset(msb_aligned, stride);
        let (read, write) = match direction {
            Direction::Tx => (
                DmaEndpoint::Memory(first.addr),
                DmaEndpoint::TxFifo {
                    sm: sm.id,
                    byte_offset,
                },
            ),
            Direction::Rx => (
                DmaEndpoint::RxFifo {
                    sm: sm.id,
                    byte_offset,
                },
                DmaEndpoint::Memory(first.addr),
            ),
        };
        self.hw.configure(
            channel,
            &DmaTransfer {
                read,
                write,
                count: (first.len / stride.bytes()) as u32,
                stride,
                dreq: sm.id.dreq(direction == Direction::Rx),
                byteswap: swap,
            },
        );

        let started = self.with_tables(|tables| {
            let active = tables
                .active_mut(sm.id, sm.generation)
                .ok_or(Error::Deinitialized)?;
            *active.stream_mut(direction) = Some(Stream::start(channel, stride, swap, chain, supplied));
            tables.dma_owner[channel as usize] = Some((sm.id, direction));
            self.hw.acknowledge(channel);
            self.hw.set_channel_interrupt(channel, true);
            self.hw.start(1 << channel);
            Ok::<_, Error>(())
        });
        if let Err(e) = started {
            self.hw.unclaim_channel(channel);
            return Err(e);
        }
        trace!(
            "{}: {:?} stream on DMA channel {}, {} buffer(s)",
            sm.id,
            direction,
            channel,
            supplied
        );
        Ok(Completion::Done)
    }

    pub fn stop_background_write(&self, sm: &StateMachine) -> Result<(), Error> {
        self.stop_stream(sm, Direction::Tx)
    }

    pub fn stop_background_read(&self, sm: &StateMachine) -> Result<(), Error> {
        self.stop_stream(sm, Direction::Rx)
    }

    fn stop_stream(&self, sm: &StateMachine, direction: Direction) -> Result<(), Error> {
        self.with_tables(|tables| {
            let active = tables
                .active_mut(sm.id, sm.generation)
                .ok_or(Error::Deinitialized)?;
            if let Some(stream) = active.stream_mut(direction).take() {
                tables.dma_owner[stream.channel as usize] = None;
                self.release_channel(stream.channel);
            }
            Ok(())
        })
    }

    pub(crate) fn release_channel(&self, channel: u8) {
        self.hw.set_channel_interrupt(channel, false);
        self.hw.abort(channel);
        self.hw.acknowledge(channel);
        self.hw.unclaim_channel(channel);
    }

    fn stream_state<R>(
        &self,
        sm: &StateMachine,
        direction: Direction,
        f: impl FnOnce(&mut Stream) -> R,
    ) -> Result<Option<R>, Error> {
        self.with_active(sm, |active| active.stream_mut(direction).as_mut().map(f))
    }

    /// Whether the write stream still has buffers to play.
    pub fn writing(&self, sm: &StateMachine) -> Result<bool, Error> {
        Ok(self
            .stream_state(sm, Direction::Tx, |stream| !stream.completed)?
            .unwrap_or(false))
    }

    pub fn reading(&self, sm: &StateMachine) -> Result<bool, Error> {
        Ok(self
            .stream_state(sm, Direction::Rx, |stream| !stream.completed)?
            .unwrap_or(false))
    }

    /// Buffers of the last write submission that have not started playing.
    pub fn pending_write(&self, sm: &StateMachine) -> Result<u8, Error> {
        Ok(self
            .stream_state(sm, Direction::Tx, |stream| stream.pending)?
            .unwrap_or(0))
    }

    pub fn pending_read(&self, sm: &StateMachine) -> Result<u8, Error> {
        Ok(self
            .stream_state(sm, Direction::Rx, |stream| stream.pending)?
            .unwrap_or(0))
    }

    /// The buffer the write stream finished most recently. Each buffer is
    /// reported once.
    pub fn last_write(&self, sm: &StateMachine) -> Result<Option<DmaSlice>, Error> {
        Ok(self
            .stream_state(sm, Direction::Tx, |stream| stream.retired.take())?
            .flatten())
    }

    /// The buffer the read stream filled most recently. Each buffer is
    /// reported once.
    pub fn last_read(&self, sm: &StateMachine) -> Result<Option<DmaSlice>, Error> {
        Ok(self
            .stream_state(sm, Direction::Rx, |stream| stream.retired.take())?
            .flatten())
    }

    /// DMA completion interrupt entry point.
    ///
    /// Rotates the streams whose channel finished a buffer. Channels that do
    /// not belong to a stream are left pending for their owner.
    pub fn on_dma_irq(&self) {
        let pending = self.hw.pending_interrupts();
        if pending == 0 {
            return;
        }
        self.with_tables(|tables| {
            for channel in 0..self.chip.dma_channels {
                if pending & (1 << channel) == 0 {
                    continue;
                }
                let Some((id, direction)) = tables.dma_owner[channel as usize] else {
                    continue;
                };
                self.hw.acknowledge(channel);
                let Some(active) = tables.slot_mut(id).active.as_mut() else {
                    continue;
                };
                if let Some(stream) = active.stream_mut(direction) {
                    if let Some(next) = stream.rotate() {
                        self.hw.retarget(channel, next.addr, stream.count(next), true);
                    }
                }
            }
        });
    }
}
