//! State machine configuration: the caller-facing builder and the register
//! image the configurator derives from it.

use crate::chip::PioVersion;
use crate::error::ConfigError;
use crate::pins::{PinGroup, PinMask, Pull};

/// Direction the shift registers move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftDirection {
    /// Shift register to left, data enters from the right.
    Left,
    /// Shift register to right, data enters from the left.
    Right,
}

impl ShiftDirection {
    fn bit(self) -> u32 {
        match self {
            ShiftDirection::Left => 0,
            ShiftDirection::Right => 1,
        }
    }
}

/// Configuration of one shift register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftConfig {
    pub direction: ShiftDirection,
    /// Autopush for the ISR, autopull for the OSR.
    pub auto: bool,
    /// Number of bits shifted before an auto or conditional push/pull, 1..=32.
    pub threshold: u8,
}

impl Default for ShiftConfig {
    fn default() -> Self {
        ShiftConfig {
            direction: ShiftDirection::Right,
            auto: false,
            threshold: 32,
        }
    }
}

/// FIFO topology.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FifoJoin {
    /// Join towards whichever direction the program uses.
    #[default]
    Auto,
    /// 4-deep TX and RX FIFOs.
    None,
    /// 8-deep TX FIFO, no RX FIFO.
    Tx,
    /// 8-deep RX FIFO, no TX FIFO.
    Rx,
    /// RX FIFO storage is written by the state machine and read directly by the
    /// processor (PIO version 1).
    TxPut,
    /// RX FIFO storage is written by the processor and read by the state
    /// machine (PIO version 1).
    TxGet,
    /// Both FIFOs used as random-access registers by the state machine (PIO version 1).
    PutGet,
}

impl FifoJoin {
    /// Settle `Auto` from what the program actually exercises.
    pub fn resolve(self, tx_used: bool, rx_used: bool) -> FifoJoin {
        match self {
            FifoJoin::Auto if !rx_used => FifoJoin::Tx,
            FifoJoin::Auto if !tx_used => FifoJoin::Rx,
            FifoJoin::Auto => FifoJoin::None,
            join => join,
        }
    }

    /// Entries in the TX FIFO (or RX FIFO when joined for receive).
    pub fn depth(self) -> u8 {
        match self {
            FifoJoin::Tx | FifoJoin::Rx => 8,
            FifoJoin::PutGet => 0,
            _ => 4,
        }
    }

    pub fn requires(self) -> PioVersion {
        match self {
            FifoJoin::TxPut | FifoJoin::TxGet | FifoJoin::PutGet => PioVersion::V1,
            _ => PioVersion::V0,
        }
    }
}

/// Source of `MOV x, STATUS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovStatus {
    /// All ones while the TX FIFO level is below `n`.
    TxLessThan(u8),
    /// All ones while the RX FIFO level is below `n`.
    RxLessThan(u8),
    /// All ones while IRQ flag `n` is set (PIO version 1).
    Irq(u8),
}

impl Default for MovStatus {
    fn default() -> Self {
        MovStatus::TxLessThan(0)
    }
}

/// Side-set configuration as written to `EXECCTRL`/`PINCTRL`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SideSetConfig {
    /// Bits taken from the delay field, including the enable bit.
    pub bits: u8,
    pub optional: bool,
    pub pindirs: bool,
}

/// Fractional clock divider: `sysclk / (int + frac / 256)`.
///
/// An integer part of 0 stands for 65536.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockDivider {
    pub int: u16,
    pub frac: u8,
}

impl ClockDivider {
    pub const ONE: ClockDivider = ClockDivider { int: 1, frac: 0 };

    /// Largest divider in 1/256 steps.
    const MAX_DIV256: u64 = 0x10000 * 256;

    /// Smallest divider reaching at most `frequency`, and the frequency it
    /// actually achieves. `0` asks for the system clock.
    ///
    /// Frequencies the largest divider cannot get down to are out of range.
    pub fn for_frequency(system_hz: u32, frequency: u32) -> Result<(Self, u32), ConfigError> {
        let frequency = if frequency == 0 { system_hz } else { frequency };
        let frequency256 = system_hz as u64 * 256;
        if frequency > system_hz || frequency == 0 {
            return Err(ConfigError::FrequencyOutOfRange { frequency });
        }
        let div256 = frequency256.div_ceil(frequency as u64);
        if div256 > Self::MAX_DIV256 {
            return Err(ConfigError::FrequencyOutOfRange { frequency });
        }
        let divider = ClockDivider {
            // 0x10000 truncates to the hardware's encoding of 65536
            int: (div256 / 256) as u16,
            frac: (div256 % 256) as u8,
        };
        Ok((divider, (frequency256 / div256) as u32))
    }

    /// The divider in 1/256 steps.
    pub fn div256(self) -> u64 {
        let int = if self.int == 0 { 0x10000 } else { self.int as u64 };
        int * 256 + self.frac as u64
    }
}

/// The register image of one state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmConfig {
    pub clock_divider: ClockDivider,
    /// Absolute addresses in instruction memory.
    pub wrap_target: u8,
    pub wrap: u8,
    /// GPIO numbers below are relative to the block's GPIO base.
    pub jmp_pin: u8,
    pub side_set: SideSetConfig,
    pub mov_status: MovStatus,
    pub out_shift: ShiftConfig,
    pub in_shift: ShiftConfig,
    /// Never `Auto`.
    pub join: FifoJoin,
    pub out_base: u8,
    pub out_count: u8,
    pub set_base: u8,
    pub set_count: u8,
    pub side_set_base: u8,
    pub in_base: u8,
    pub in_count: u8,
}

impl Default for SmConfig {
    fn default() -> Self {
        SmConfig {
            clock_divider: ClockDivider::ONE,
            wrap_target: 0,
            wrap: 31,
            jmp_pin: 0,
            side_set: SideSetConfig::default(),
            mov_status: MovStatus::default(),
            out_shift: ShiftConfig::default(),
            in_shift: ShiftConfig::default(),
            join: FifoJoin::None,
            out_base: 0,
            out_count: 0,
            set_base: 0,
            set_count: 0,
            side_set_base: 0,
            in_base: 0,
            in_count: 32,
        }
    }
}

// 32 is written as 0 in the 5-bit threshold and count fields.
fn five_bits(value: u8) -> u32 {
    (value & 0b11111) as u32
}

impl SmConfig {
    pub fn clkdiv(&self) -> u32 {
        (self.clock_divider.int as u32) << 16 | (self.clock_divider.frac as u32) << 8
    }

    pub fn execctrl(&self, version: PioVersion) -> u32 {
        let mut w = (self.side_set.optional as u32) << 30
            | (self.side_set.pindirs as u32) << 29
            | five_bits(self.jmp_pin) << 24
            | five_bits(self.wrap) << 12
            | five_bits(self.wrap_target) << 7;
        let (sel, n) = match self.mov_status {
            MovStatus::TxLessThan(n) => (0, n),
            MovStatus::RxLessThan(n) => (1, n),
            MovStatus::Irq(n) => (2, n),
        };
        w |= match version {
            PioVersion::V0 => (sel & 1) << 4 | (n & 0b1111) as u32,
            PioVersion::V1 => sel << 5 | five_bits(n),
        };
        w
    }

    pub fn shiftctrl(&self, version: PioVersion) -> u32 {
        let (fjoin_rx, fjoin_tx, rx_put, rx_get) = match self.join {
            FifoJoin::Rx => (1, 0, 0, 0),
            FifoJoin::Tx => (0, 1, 0, 0),
            FifoJoin::TxPut => (0, 0, 1, 0),
            FifoJoin::TxGet => (0, 0, 0, 1),
            FifoJoin::PutGet => (0, 0, 1, 1),
            FifoJoin::Auto | FifoJoin::None => (0, 0, 0, 0),
        };
        let mut w = fjoin_rx << 31
            | fjoin_tx << 30
            | five_bits(self.out_shift.threshold) << 25
            | five_bits(self.in_shift.threshold) << 20
            | self.out_shift.direction.bit() << 19
            | self.in_shift.direction.bit() << 18
            | (self.out_shift.auto as u32) << 17
            | (self.in_shift.auto as u32) << 16;
        if version == PioVersion::V1 {
            w |= rx_put << 15 | rx_get << 14 | five_bits(self.in_count);
        }
        w
    }

    pub fn pinctrl(&self) -> u32 {
        ((self.side_set.bits & 0b111) as u32) << 29
            | ((self.set_count & 0b111) as u32) << 26
            | ((self.out_count & 0b111111) as u32) << 20
            | five_bits(self.in_base) << 15
            | five_bits(self.side_set_base) << 10
            | five_bits(self.set_base) << 5
            | five_bits(self.out_base)
    }
}

/// An output pin group with the values it starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OutputPins {
    pub group: PinGroup,
    /// Relative to `group.first`.
    pub state: u32,
    pub direction: u32,
}

impl OutputPins {
    fn new(first: u8, count: u8, levels: Levels) -> Self {
        OutputPins {
            group: PinGroup::new(first, count),
            state: levels.state,
            direction: levels.direction,
        }
    }
}

/// Initial values asked for before or after the group itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Levels {
    state: u32,
    direction: u32,
}

impl Default for Levels {
    fn default() -> Self {
        Levels {
            state: 0,
            direction: u32::MAX,
        }
    }
}

fn set_state(pins: &mut Option<OutputPins>, levels: &mut Levels, state: u32) {
    levels.state = state;
    if let Some(pins) = pins {
        pins.state = state;
    }
}

fn set_direction(pins: &mut Option<OutputPins>, levels: &mut Levels, direction: u32) {
    levels.direction = direction;
    if let Some(pins) = pins {
        pins.direction = direction;
    }
}

/// Everything needed to put a program on a state machine.
///
/// ```rust
/// use rp2pio::{ShiftDirection, StateMachineConfig};
///
/// static BLINK: [u16; 2] = [
///     0b111_00000_000_00001, // SET PINS, 1
///     0b111_00000_000_00000, // SET PINS, 0
/// ];
/// let config = StateMachineConfig::new(&BLINK)
///     .frequency(2_000)
///     .set_pins(25, 1)
///     .out_shift_direction(ShiftDirection::Left);
/// ```
#[derive(Debug, Clone)]
pub struct StateMachineConfig<'p> {
    pub(crate) program: &'p [u16],
    pub(crate) frequency: u32,
    pub(crate) init: &'p [u16],
    pub(crate) may_exec: &'p [u16],
    pub(crate) out_pins: Option<OutputPins>,
    pub(crate) set_pins: Option<OutputPins>,
    pub(crate) side_set_pins: Option<OutputPins>,
    out_levels: Levels,
    set_levels: Levels,
    side_set_levels: Levels,
    pub(crate) side_set_optional: bool,
    pub(crate) side_set_pindirs: bool,
    pub(crate) in_pins: Option<PinGroup>,
    pub(crate) pull_up: u32,
    pub(crate) pull_down: u32,
    pub(crate) jmp_pin: Option<(u8, Pull)>,
    pub(crate) wait_gpio: PinMask,
    pub(crate) exclusive_pin_use: bool,
    pub(crate) claim_pins: bool,
    pub(crate) out_shift: ShiftConfig,
    pub(crate) in_shift: ShiftConfig,
    pub(crate) wait_for_txstall: bool,
    pub(crate) user_interruptible: bool,
    pub(crate) wrap_target: u8,
    pub(crate) wrap: Option<u8>,
    pub(crate) offset: Option<u8>,
    pub(crate) fifo_join: FifoJoin,
    pub(crate) mov_status: MovStatus,
}

impl<'p> StateMachineConfig<'p> {
    /// Start from a program.
    ///
    /// The program's identity is the address of `program`: acquiring the same
    /// slice twice lets both state machines share one copy in instruction memory.
    pub fn new(program: &'p [u16]) -> Self {
        StateMachineConfig {
            program,
            frequency: 0,
            init: &[],
            may_exec: &[],
            out_pins: None,
            set_pins: None,
            side_set_pins: None,
            out_levels: Levels::default(),
            set_levels: Levels::default(),
            side_set_levels: Levels::default(),
            side_set_optional: false,
            side_set_pindirs: false,
            in_pins: None,
            pull_up: 0,
            pull_down: 0,
            jmp_pin: None,
            wait_gpio: PinMask::NONE,
            exclusive_pin_use: true,
            claim_pins: true,
            out_shift: ShiftConfig::default(),
            in_shift: ShiftConfig::default(),
            wait_for_txstall: true,
            user_interruptible: true,
            wrap_target: 0,
            wrap: None,
            offset: None,
            fifo_join: FifoJoin::Auto,
            mov_status: MovStatus::default(),
        }
    }

    /// Target state machine clock. 0 runs at the system clock.
    pub fn frequency(mut self, hz: u32) -> Self {
        self.frequency = hz;
        self
    }

    /// Instructions executed once, before the state machine is enabled.
    pub fn init(mut self, init: &'p [u16]) -> Self {
        self.init = init;
        self
    }

    /// Instructions the caller may execute later through `run`; validated too.
    pub fn may_exec(mut self, may_exec: &'p [u16]) -> Self {
        self.may_exec = may_exec;
        self
    }

    /// Pins written by `OUT PINS`, `OUT PINDIRS` and `MOV PINS`.
    pub fn out_pins(mut self, first: u8, count: u8) -> Self {
        self.out_pins = Some(OutputPins::new(first, count, self.out_levels));
        self
    }

    /// Initial levels of the out pins, bit 0 being the first pin.
    pub fn initial_out_pin_state(mut self, state: u32) -> Self {
        set_state(&mut self.out_pins, &mut self.out_levels, state);
        self
    }

    /// Initial directions of the out pins, 1 for output.
    pub fn initial_out_pin_direction(mut self, direction: u32) -> Self {
        set_direction(&mut self.out_pins, &mut self.out_levels, direction);
        self
    }

    /// Pins written by `SET PINS` and `SET PINDIRS`.
    pub fn set_pins(mut self, first: u8, count: u8) -> Self {
        self.set_pins = Some(OutputPins::new(first, count, self.set_levels));
        self
    }

    pub fn initial_set_pin_state(mut self, state: u32) -> Self {
        set_state(&mut self.set_pins, &mut self.set_levels, state);
        self
    }

    pub fn initial_set_pin_direction(mut self, direction: u32) -> Self {
        set_direction(&mut self.set_pins, &mut self.set_levels, direction);
        self
    }

    /// Pins driven by side-set. `count` excludes the enable bit.
    pub fn side_set_pins(mut self, first: u8, count: u8) -> Self {
        self.side_set_pins = Some(OutputPins::new(first, count, self.side_set_levels));
        self
    }

    /// Side-set is optional per instruction, at the cost of one delay bit.
    pub fn side_set_optional(mut self, optional: bool) -> Self {
        self.side_set_optional = optional;
        self
    }

    /// Side-set drives pin directions instead of levels.
    pub fn side_set_pindirs(mut self, pindirs: bool) -> Self {
        self.side_set_pindirs = pindirs;
        self
    }

    pub fn initial_side_set_pin_state(mut self, state: u32) -> Self {
        set_state(&mut self.side_set_pins, &mut self.side_set_levels, state);
        self
    }

    pub fn initial_side_set_pin_direction(mut self, direction: u32) -> Self {
        set_direction(&mut self.side_set_pins, &mut self.side_set_levels, direction);
        self
    }

    /// Pins read by `IN PINS`, `MOV x, PINS` and `WAIT PIN`.
    pub fn in_pins(mut self, first: u8, count: u8) -> Self {
        self.in_pins = Some(PinGroup::new(first, count));
        self
    }

    /// Pull-ups on the in pins, bit 0 being the first pin.
    pub fn pull_in_pins_up(mut self, mask: u32) -> Self {
        self.pull_up = mask;
        self
    }

    /// Pull-downs on the in pins, bit 0 being the first pin.
    pub fn pull_in_pins_down(mut self, mask: u32) -> Self {
        self.pull_down = mask;
        self
    }

    /// Pin tested by `JMP PIN`.
    pub fn jmp_pin(mut self, pin: u8, pull: Pull) -> Self {
        self.jmp_pin = Some((pin, pull));
        self
    }

    /// GPIOs the program waits on with `WAIT GPIO` and otherwise does not use.
    pub fn wait_gpio(mut self, pins: PinMask) -> Self {
        self.wait_gpio = pins;
        self
    }

    /// When false, pins already used by another state machine may be shared.
    pub fn exclusive_pin_use(mut self, exclusive: bool) -> Self {
        self.exclusive_pin_use = exclusive;
        self
    }

    /// Claim pins in the board-wide registry when first used.
    pub fn claim_pins(mut self, claim: bool) -> Self {
        self.claim_pins = claim;
        self
    }

    pub fn autopull(mut self, enabled: bool) -> Self {
        self.out_shift.auto = enabled;
        self
    }

    pub fn pull_threshold(mut self, threshold: u8) -> Self {
        self.out_shift.threshold = threshold;
        self
    }

    pub fn out_shift_direction(mut self, direction: ShiftDirection) -> Self {
        self.out_shift.direction = direction;
        self
    }

    pub fn autopush(mut self, enabled: bool) -> Self {
        self.in_shift.auto = enabled;
        self
    }

    pub fn push_threshold(mut self, threshold: u8) -> Self {
        self.in_shift.threshold = threshold;
        self
    }

    pub fn in_shift_direction(mut self, direction: ShiftDirection) -> Self {
        self.in_shift.direction = direction;
        self
    }

    /// Block writes until the state machine has stalled on an empty TX FIFO.
    pub fn wait_for_txstall(mut self, wait: bool) -> Self {
        self.wait_for_txstall = wait;
        self
    }

    /// Let blocking transfers be cut short by the scheduler's cancellation.
    pub fn user_interruptible(mut self, interruptible: bool) -> Self {
        self.user_interruptible = interruptible;
        self
    }

    /// Relative to the start of the program.
    pub fn wrap_target(mut self, target: u8) -> Self {
        self.wrap_target = target;
        self
    }

    /// Relative to the start of the program. Defaults to the last instruction.
    pub fn wrap(mut self, wrap: u8) -> Self {
        self.wrap = Some(wrap);
        self
    }

    /// Load the program at this address of instruction memory.
    pub fn offset(mut self, offset: u8) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn fifo_join(mut self, join: FifoJoin) -> Self {
        self.fifo_join = join;
        self
    }

    pub fn mov_status(mut self, status: MovStatus) -> Self {
        self.mov_status = status;
        self
    }
}
