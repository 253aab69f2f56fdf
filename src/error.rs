use core::fmt;

use rp2pio_isa::DecodeError;

use crate::hal::SmId;

/// Which instruction stream an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramPart {
    Program,
    Init,
    MayExec,
}

impl fmt::Display for ProgramPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProgramPart::Program => "program",
            ProgramPart::Init => "init",
            ProgramPart::MayExec => "may_exec",
        })
    }
}

/// What an instruction needs that the caller did not provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InstructionIssue {
    #[error("jumps on pin but no jmp pin was given")]
    MissingJmpPin,
    #[error("waits on GPIO {pin} which is not among the pins in use")]
    ExtraWaitPin { pin: u8 },
    #[error("waits based on pin but no input pins were given")]
    MissingWaitInPin,
    #[error("waits on input {index} outside of the {count} input pins")]
    WaitOutsideInCount { index: u8, count: u8 },
    #[error("reads pin(s) but no input pins were given")]
    MissingInPins,
    #[error("shifts in {bits} bits but only {count} input pins were given")]
    InCountExceeded { bits: u8, count: u8 },
    #[error("writes pin(s) but no output pins were given")]
    MissingOutPins,
    #[error("shifts out {bits} bits but only {count} output pins were given")]
    OutCountExceeded { bits: u8, count: u8 },
    #[error("sets pin(s) but no set pins were given")]
    MissingSetPins,
    #[error(transparent)]
    Undecodable(#[from] DecodeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProgramError {
    #[error("{part}[{index}] {issue}")]
    Instruction {
        part: ProgramPart,
        index: usize,
        issue: InstructionIssue,
    },
    #[error("program does IN without loading ISR")]
    InWithoutIsrLoad,
    #[error("program does OUT without loading OSR")]
    OutWithoutOsrLoad,
    #[error("program is empty")]
    Empty,
    #[error("{part} has {len} instructions, more than instruction memory holds")]
    TooLong { part: ProgramPart, len: usize },
}

/// Invalid parameters, detected before any hardware is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("pin group starting at GPIO {first} with {count} pins runs past the last GPIO")]
    PinCountTooLarge { first: u8, count: u8 },
    #[error("GPIO {pin} does not exist on this board")]
    NoSuchPin { pin: u8 },
    #[error("cannot use GPIO0..15 together with GPIO32..47")]
    GpioRangeConflict,
    #[error("initial set pin state conflicts with initial out pin state")]
    InitialStateConflict,
    #[error("initial set pin direction conflicts with initial out pin direction")]
    InitialDirectionConflict,
    #[error("pull masks conflict with direction masks")]
    PullConflictsWithDirection,
    #[error("side-set needs {bits} bits, at most 5 are available")]
    SideSetTooWide { bits: u8 },
    #[error("wrap {wrap} is outside of the {len} instruction program")]
    WrapOutOfRange { wrap: u8, len: usize },
    #[error("wrap target {target} is outside of the {len} instruction program")]
    WrapTargetOutOfRange { target: u8, len: usize },
    #[error("program cannot be loaded at offset {offset}")]
    OffsetOutOfRange { offset: u8 },
    #[error("threshold {threshold} is outside 1..=32")]
    ThresholdOutOfRange { threshold: u8 },
    #[error("frequency {frequency} Hz is out of range")]
    FrequencyOutOfRange { frequency: u32 },
    #[error("FIFO mode is not supported by this PIO version")]
    UnsupportedFifoJoin,
    #[error("mov status source is not supported by this PIO version")]
    UnsupportedMovStatus,
    #[error("no out in program")]
    NoTxFifo,
    #[error("no in in program")]
    NoRxFifo,
    #[error("buffer of {len} bytes is not a whole number of {stride} byte elements")]
    PartialElement { len: usize, stride: usize },
    #[error("background buffers are all empty")]
    EmptyBufferChain,
    #[error("mismatched data size")]
    MismatchedStride,
    #[error("mismatched swap flag")]
    MismatchedSwap,
}

/// Scarce hardware that ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    StateMachine,
    ProgramMemory,
    DmaChannel,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Resource::StateMachine => "all state machines in use",
            Resource::ProgramMemory => "no space in program memory",
            Resource::DmaChannel => "no free DMA channel",
        })
    }
}

/// A fault observed on a running state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    #[error("{sm} FIFO error persisted after reset (FDEBUG {fdebug:#010x})")]
    Fifo { sm: SmId, fdebug: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Program(#[from] ProgramError),
    #[error("{0}")]
    ResourcesExhausted(Resource),
    #[error("GPIO {pin} in use")]
    PinInUse { pin: u8 },
    #[error("GPIO {pin} already in use by another PIO block")]
    PinConflict { pin: u8 },
    #[error(transparent)]
    Fault(#[from] Fault),
    #[error("state machine was deinitialized")]
    Deinitialized,
}

/// Coarse error category, for callers that only decide whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request itself is wrong; retrying it unchanged fails again.
    Configuration,
    /// Try later or with different resources.
    ResourceExhausted,
    PinConflict,
    HardwareFault,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) | Error::Program(_) | Error::Deinitialized => {
                ErrorKind::Configuration
            }
            Error::ResourcesExhausted(_) => ErrorKind::ResourceExhausted,
            Error::PinInUse { .. } | Error::PinConflict { .. } => ErrorKind::PinConflict,
            Error::Fault(_) => ErrorKind::HardwareFault,
        }
    }
}
