//! Allocation and configuration of state machines.

use core::cell::RefCell;

use arrayvec::ArrayVec;
use critical_section::Mutex;
use log::debug;
use rp2pio_isa::{relocate, INSTRUCTION_MEMORY_SIZE};

use crate::chip::{ChipConfig, PioVersion, MAX_GPIOS};
use crate::config::{
    ClockDivider, MovStatus, OutputPins, SideSetConfig, SmConfig, StateMachineConfig,
};
use crate::critical::{InterruptNesting, InterruptsDisabled};
use crate::error::{ConfigError, Error, InstructionIssue, ProgramError, ProgramPart, Resource};
use crate::hal::{Hardware, SafeModeReason, SmId};
use crate::pins::{PinGroup, PinMask, Pull};
use crate::tables::{find_offset, Active, ProgramId, ProgramSlot, Setup, Tables};
use crate::validator::{validate, Declared};

/// Handle to a claimed state machine.
///
/// Deliberately neither `Clone` nor `Copy`: releasing it through
/// [`Engine::deinit`] consumes it. A handle whose state machine was swept by
/// [`Engine::reset_all`] reports [`Error::Deinitialized`].
#[derive(Debug, PartialEq, Eq)]
pub struct StateMachine {
    pub(crate) id: SmId,
    pub(crate) generation: u32,
}

impl StateMachine {
    pub fn id(&self) -> SmId {
        self.id
    }
}

/// The PIO resource manager.
///
/// Owns the allocation tables for every block of the chip. All methods take
/// `&self`; the interrupt entry points [`Engine::on_dma_irq`] and
/// [`Engine::on_pio_irq`] may run while a main-context call is blocked.
pub struct Engine<H> {
    pub(crate) hw: H,
    pub(crate) chip: ChipConfig,
    pub(crate) tables: Mutex<RefCell<Tables>>,
    nesting: InterruptNesting,
}

/// A validated request, before any resource is claimed.
struct Plan<'p> {
    program: &'p [u16],
    id: ProgramId,
    pins: PinMask,
    /// Bases the request works with, the one to rebase an idle block to first.
    gpio_bases: ArrayVec<u8, 2>,
    /// Pin fields hold absolute GPIO numbers until a block is chosen.
    setup: Setup,
}

/// Where a request landed.
struct Placement {
    id: SmId,
    generation: u32,
    offset: u8,
    /// Relocated program, when it was not resident yet.
    load: Option<ArrayVec<u16, INSTRUCTION_MEMORY_SIZE>>,
    /// New GPIO base for the block, when it had to move.
    rebase: Option<u8>,
    first_users: PinMask,
    image: SmConfig,
}

impl<H: Hardware> Engine<H> {
    pub fn new(hw: H, chip: ChipConfig) -> Self {
        Engine {
            hw,
            chip,
            tables: Mutex::new(RefCell::new(Tables::new())),
            nesting: InterruptNesting::new(),
        }
    }

    pub fn hardware(&self) -> &H {
        &self.hw
    }

    pub fn chip(&self) -> &ChipConfig {
        &self.chip
    }

    pub(crate) fn with_tables<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> R {
        critical_section::with(|cs| f(&mut self.tables.borrow_ref_mut(cs)))
    }

    pub(crate) fn with_active<R>(
        &self,
        sm: &StateMachine,
        f: impl FnOnce(&mut Active) -> R,
    ) -> Result<R, Error> {
        self.with_tables(|tables| {
            tables
                .active_mut(sm.id, sm.generation)
                .map(f)
                .ok_or(Error::Deinitialized)
        })
    }

    /// Disable interrupts until the matching [`Engine::enable_interrupts`].
    /// Calls nest.
    pub fn disable_interrupts(&self) {
        self.nesting.disable();
    }

    /// Undo one [`Engine::disable_interrupts`]. Unbalanced calls enter safe mode.
    pub fn enable_interrupts(&self) {
        if !self.nesting.enable() {
            self.hw.enter_safe_mode(SafeModeReason::InterruptNesting);
        }
    }

    /// Keep interrupts disabled for the lifetime of the returned guard.
    pub fn interrupts_disabled(&self) -> InterruptsDisabled<'_> {
        InterruptsDisabled::new(&self.nesting)
    }

    /// Claim a state machine, load the program and start it.
    ///
    /// Every check happens before anything is claimed; a failed call leaves
    /// the tables and the hardware as they were.
    pub fn acquire(&self, config: &StateMachineConfig<'_>) -> Result<StateMachine, Error> {
        let plan = self.plan(config)?;
        let placement = self.place(&plan, config.offset)?;
        let id = placement.id;

        if let Some(base) = placement.rebase {
            self.hw.set_gpio_base(id.block, base);
        }
        if let Some(words) = &placement.load {
            for (address, word) in (placement.offset..).zip(words) {
                self.hw.write_instruction(id.block, address, *word);
            }
        }
        for pin in placement.first_users.iter() {
            if config.claim_pins {
                self.hw.claim_pin(pin);
            }
            self.hw.gpio_init(id.block, pin);
        }

        let setup = &plan.setup;
        self.hw.sm_set_pins(id, setup.initial_state, plan.pins);
        self.hw.sm_set_pindirs(id, setup.initial_direction, plan.pins);
        self.apply_pulls(plan.pins, setup.pull_up, setup.pull_down);
        self.hw.sm_init(id, placement.offset, &placement.image);
        self.exec_all(id, &setup.init);
        self.hw.sm_set_clock_divider(id, placement.image.clock_divider);
        self.hw.sm_clock_divider_restart(id);
        self.hw.sm_set_enabled(id, true);

        debug!(
            "{}: {} instructions at {}{}, {} Hz, pins {:#x}",
            id,
            plan.program.len(),
            placement.offset,
            if placement.load.is_some() { "" } else { " (shared)" },
            setup.frequency,
            plan.pins.bits(),
        );
        Ok(StateMachine {
            id,
            generation: placement.generation,
        })
    }

    fn plan<'p>(&self, config: &StateMachineConfig<'p>) -> Result<Plan<'p>, Error> {
        let chip = &self.chip;
        let program = config.program;
        if program.is_empty() {
            return Err(ProgramError::Empty.into());
        }
        if program.len() > chip.instruction_memory as usize {
            return Err(ProgramError::TooLong {
                part: ProgramPart::Program,
                len: program.len(),
            }
            .into());
        }
        let init: ArrayVec<u16, INSTRUCTION_MEMORY_SIZE> = config
            .init
            .try_into()
            .map_err(|_| ProgramError::TooLong {
                part: ProgramPart::Init,
                len: config.init.len(),
            })?;
        let len = program.len() as u8;

        for shift in [&config.out_shift, &config.in_shift] {
            if !(1..=32).contains(&shift.threshold) {
                return Err(ConfigError::ThresholdOutOfRange {
                    threshold: shift.threshold,
                }
                .into());
            }
        }
        let wrap = config.wrap.unwrap_or(len - 1);
        if wrap >= len {
            return Err(ConfigError::WrapOutOfRange {
                wrap,
                len: program.len(),
            }
            .into());
        }
        if config.wrap_target >= len {
            return Err(ConfigError::WrapTargetOutOfRange {
                target: config.wrap_target,
                len: program.len(),
            }
            .into());
        }
        if let Some(offset) = config.offset {
            if offset as usize + program.len() > chip.instruction_memory as usize {
                return Err(ConfigError::OffsetOutOfRange { offset }.into());
            }
        }
        if config.fifo_join.requires() > chip.version {
            return Err(ConfigError::UnsupportedFifoJoin.into());
        }
        if matches!(config.mov_status, MovStatus::Irq(_)) && chip.version == PioVersion::V0 {
            return Err(ConfigError::UnsupportedMovStatus.into());
        }
        let side_set_bits = config.side_set_pins.map_or(0, |pins| pins.group.count)
            + config.side_set_optional as u8;
        if side_set_bits > 5 {
            return Err(ConfigError::SideSetTooWide {
                bits: side_set_bits,
            }
            .into());
        }

        // Pins: every group must exist and be free (or shareable).
        let refs = self.with_tables(|tables| tables.pin_refs);
        let exclusive = config.exclusive_pin_use;
        if let Some(pin) = config.wait_gpio.iter().find(|&pin| pin >= chip.gpios) {
            return Err(ConfigError::NoSuchPin { pin }.into());
        }
        let groups = [
            config.out_pins.map(|pins| pins.group),
            config.in_pins,
            config.set_pins.map(|pins| pins.group),
            config.side_set_pins.map(|pins| pins.group),
            config.jmp_pin.map(|(pin, _)| PinGroup::new(pin, 1)),
        ];
        let mut pins = config.wait_gpio;
        for group in groups.into_iter().flatten() {
            pins |= self.check_pins_free(group, exclusive, &refs)?;
        }
        let preferred = chip
            .gpio_base_for(pins)
            .ok_or(ConfigError::GpioRangeConflict)?;

        let declared = Declared {
            pins,
            gpio_base: preferred,
            jmp_pin: config.jmp_pin.is_some(),
            in_count: config.in_pins.map(|group| group.count),
            out_count: config.out_pins.map(|pins| pins.group.count),
            set_pins: config.set_pins.is_some(),
            autopush: config.in_shift.auto,
            autopull: config.out_shift.auto,
        };
        let parts = [
            (ProgramPart::Program, program),
            (ProgramPart::Init, config.init),
            (ProgramPart::MayExec, config.may_exec),
        ];
        // The other window works too when it sees every pin and `WAIT GPIO`
        // still lands on a declared one.
        let checked = validate(&declared, &parts);
        let mut introspection = checked.as_ref().ok().copied();
        let mut gpio_bases = ArrayVec::<u8, 2>::new();
        if introspection.is_some() {
            gpio_bases.push(preferred);
        }
        let other = preferred ^ 16;
        if chip.reaches(other, pins) {
            if let Ok(found) = validate(&Declared { gpio_base: other, ..declared }, &parts) {
                gpio_bases.push(other);
                introspection.get_or_insert(found);
            }
        }
        let introspection = introspection.map_or(checked, Ok)?;

        // Initial levels and directions. OUT and SET must agree where they
        // overlap; side-set wins over both.
        let spread = |pins: Option<OutputPins>, pick: fn(&OutputPins) -> u32| {
            pins.map_or(PinMask::NONE, |pins| pins.group.spread(pick(&pins)))
        };
        let group_mask = |pins: Option<OutputPins>| {
            pins.map_or(PinMask::NONE, |pins| pins.group.mask())
        };
        let overlap = group_mask(config.out_pins) & group_mask(config.set_pins);
        let out_state = spread(config.out_pins, |pins| pins.state);
        let out_direction = spread(config.out_pins, |pins| pins.direction);
        let set_state = spread(config.set_pins, |pins| pins.state);
        let set_direction = spread(config.set_pins, |pins| pins.direction);
        if out_state & overlap != set_state & overlap {
            return Err(ConfigError::InitialStateConflict.into());
        }
        if out_direction & overlap != set_direction & overlap {
            return Err(ConfigError::InitialDirectionConflict.into());
        }
        let side_set = group_mask(config.side_set_pins);
        let initial_state = (out_state | set_state) & !side_set
            | spread(config.side_set_pins, |pins| pins.state);
        let initial_direction = (out_direction | set_direction) & !side_set
            | spread(config.side_set_pins, |pins| pins.direction);

        let (mut pull_up, mut pull_down) = match config.in_pins {
            Some(group) => (group.spread(config.pull_up), group.spread(config.pull_down)),
            None => (PinMask::NONE, PinMask::NONE),
        };
        match config.jmp_pin {
            Some((pin, Pull::Up)) => pull_up.insert(pin),
            Some((pin, Pull::Down)) => pull_down.insert(pin),
            _ => {}
        }
        if !(initial_direction & (pull_up | pull_down)).is_empty() {
            return Err(ConfigError::PullConflictsWithDirection.into());
        }

        let (clock_divider, frequency) =
            ClockDivider::for_frequency(self.hw.system_clock_hz(), config.frequency)?;
        let join = config
            .fifo_join
            .resolve(introspection.tx_fifo, introspection.rx_fifo);

        let mut image = SmConfig {
            clock_divider,
            wrap_target: config.wrap_target,
            wrap,
            mov_status: config.mov_status,
            out_shift: config.out_shift,
            in_shift: config.in_shift,
            join,
            ..SmConfig::default()
        };
        if let Some(pins) = config.out_pins {
            image.out_base = pins.group.first;
            image.out_count = pins.group.count;
        }
        if let Some(pins) = config.set_pins {
            image.set_base = pins.group.first;
            image.set_count = pins.group.count;
        }
        if let Some(pins) = config.side_set_pins {
            image.side_set_base = pins.group.first;
            image.side_set = SideSetConfig {
                bits: side_set_bits,
                optional: config.side_set_optional,
                pindirs: config.side_set_pindirs,
            };
        }
        if let Some(group) = config.in_pins {
            image.in_base = group.first;
            image.in_count = group.count;
        }
        if let Some((pin, _)) = config.jmp_pin {
            image.jmp_pin = pin;
        }

        Ok(Plan {
            program,
            id: ProgramId(program.as_ptr() as usize),
            pins,
            gpio_bases,
            setup: Setup {
                image,
                init,
                initial_state,
                initial_direction,
                pull_up,
                pull_down,
                frequency,
                tx_fifo: introspection.tx_fifo,
                rx_fifo: introspection.rx_fifo,
                wait_for_txstall: config.wait_for_txstall,
                user_interruptible: config.user_interruptible,
                fifo_depth: join.depth(),
            },
        })
    }

    fn check_pins_free(
        &self,
        group: PinGroup,
        exclusive: bool,
        refs: &[u8; MAX_GPIOS],
    ) -> Result<PinMask, Error> {
        let mut mask = PinMask::NONE;
        for i in 0..group.count {
            let pin = group.first as u16 + i as u16;
            if pin >= self.chip.gpios as u16 {
                return Err(ConfigError::PinCountTooLarge {
                    first: group.first,
                    count: group.count,
                }
                .into());
            }
            let pin = pin as u8;
            if !self.hw.pin_exists(pin) {
                return Err(ConfigError::NoSuchPin { pin }.into());
            }
            let shared = refs[pin as usize] > 0;
            if (exclusive && shared) || (!shared && !self.hw.pin_is_free(pin)) {
                return Err(Error::PinInUse { pin });
            }
            mask.insert(pin);
        }
        Ok(mask)
    }

    /// Find a block and state machine, and record the claim.
    fn place(&self, plan: &Plan<'_>, origin: Option<u8>) -> Result<Placement, Error> {
        let chip = self.chip;
        let len = plan.program.len() as u8;
        critical_section::with(|cs| {
            let mut tables = self.tables.borrow_ref_mut(cs);
            let blocks = &tables.blocks[..chip.blocks as usize];

            // Share a resident copy of the program first.
            let shared = blocks.iter().enumerate().find_map(|(index, block)| {
                if !plan.gpio_bases.contains(&block.gpio_base) {
                    return None;
                }
                let resident = block
                    .slots
                    .iter()
                    .filter_map(|slot| slot.active.as_ref())
                    .map(|active| active.program)
                    .find(|program| {
                        program.id == plan.id
                            && program.len == len
                            && origin.map_or(true, |origin| origin == program.offset)
                    })?;
                let sm = block.free_slot(chip.state_machines)?;
                Some((SmId::new(index as u8, sm), resident.offset, false, None))
            });

            let (id, offset, load, rebase) = match shared {
                Some(found) => found,
                None => {
                    let mut exhausted = Resource::StateMachine;
                    let mut found = None;
                    for (index, block) in blocks.iter().enumerate() {
                        let rebase = if plan.gpio_bases.contains(&block.gpio_base) {
                            None
                        } else if block.is_idle() {
                            Some(plan.gpio_bases[0])
                        } else {
                            continue;
                        };
                        let Some(sm) = block.free_slot(chip.state_machines) else {
                            continue;
                        };
                        match find_offset(block.used_instructions, len, origin) {
                            Some(offset) => {
                                found = Some((SmId::new(index as u8, sm), offset, true, rebase));
                                break;
                            }
                            None => exhausted = Resource::ProgramMemory,
                        }
                    }
                    found.ok_or(Error::ResourcesExhausted(exhausted))?
                }
            };

            // A pin may only be driven by one block at a time.
            for (index, block) in blocks.iter().enumerate() {
                if index == id.block as usize {
                    continue;
                }
                if let Some(pin) = (block.pins() & plan.pins).first() {
                    return Err(Error::PinConflict { pin });
                }
            }

            let load = if load {
                let mut words = ArrayVec::new();
                for (index, &word) in plan.program.iter().enumerate() {
                    let word = relocate(word, offset).map_err(|e| ProgramError::Instruction {
                        part: ProgramPart::Program,
                        index,
                        issue: InstructionIssue::Undecodable(e),
                    })?;
                    words.push(word);
                }
                Some(words)
            } else {
                None
            };

            let program = ProgramSlot { id: plan.id, len, offset };
            let block = &mut tables.blocks[id.block as usize];
            if load.is_some() {
                block.used_instructions |= program.mask();
            }
            if let Some(base) = rebase {
                block.gpio_base = base;
            }
            let mut setup = plan.setup.clone();
            setup.image = windowed(setup.image, block.gpio_base);
            setup.image.wrap += offset;
            setup.image.wrap_target += offset;
            let image = setup.image;

            let slot = tables.slot_mut(id);
            slot.active = Some(Active {
                program,
                pins: plan.pins,
                never_reset: false,
                setup,
                tx_stream: None,
                rx_stream: None,
                irq: None,
            });
            let generation = slot.generation;
            let first_users = tables.reference_pins(plan.pins);

            Ok(Placement {
                id,
                generation,
                offset,
                load,
                rebase,
                first_users,
                image,
            })
        })
    }

    pub(crate) fn apply_pulls(&self, pins: PinMask, up: PinMask, down: PinMask) {
        for pin in pins.iter() {
            self.hw.gpio_set_pulls(pin, up.contains(pin), down.contains(pin));
        }
    }

    fn exec_all(&self, id: SmId, instructions: &[u16]) {
        for &word in instructions {
            self.hw.sm_exec(id, word);
        }
    }

    /// Execute instructions immediately, one after the other.
    pub fn run(&self, sm: &StateMachine, instructions: &[u16]) -> Result<(), Error> {
        self.with_active(sm, |_| ())?;
        self.exec_all(sm.id, instructions);
        Ok(())
    }

    pub fn stop(&self, sm: &StateMachine) -> Result<(), Error> {
        self.with_active(sm, |_| ())?;
        self.hw.sm_set_enabled(sm.id, false);
        Ok(())
    }

    /// Start over from the beginning of the program with the initial pin
    /// state, keeping every claimed resource.
    pub fn restart(&self, sm: &StateMachine) -> Result<(), Error> {
        let (offset, pins, setup) =
            self.with_active(sm, |active| (active.program.offset, active.pins, active.setup.clone()))?;
        let id = sm.id;
        self.hw.sm_set_enabled(id, false);
        self.hw.sm_exec(id, rp2pio_isa::jmp(offset));
        self.hw.sm_restart(id);
        self.reapply(id, pins, &setup);
        Ok(())
    }

    /// Stop, rewrite the whole register image and start again. Used to get
    /// out of a FIFO fault.
    pub(crate) fn reinitialize(&self, sm: &StateMachine) -> Result<(), Error> {
        let (offset, pins, setup) =
            self.with_active(sm, |active| (active.program.offset, active.pins, active.setup.clone()))?;
        self.hw.sm_set_enabled(sm.id, false);
        self.hw.sm_init(sm.id, offset, &setup.image);
        self.reapply(sm.id, pins, &setup);
        Ok(())
    }

    fn reapply(&self, id: SmId, pins: PinMask, setup: &Setup) {
        self.hw.sm_set_pins(id, setup.initial_state, pins);
        self.hw.sm_set_pindirs(id, setup.initial_direction, pins);
        self.apply_pulls(pins, setup.pull_up, setup.pull_down);
        self.exec_all(id, &setup.init);
        self.hw.sm_set_enabled(id, true);
    }

    /// Change the clock divider; returns the frequency actually achieved.
    pub fn set_frequency(&self, sm: &StateMachine, frequency: u32) -> Result<u32, Error> {
        let (divider, actual) =
            ClockDivider::for_frequency(self.hw.system_clock_hz(), frequency)?;
        self.with_active(sm, |active| {
            active.setup.image.clock_divider = divider;
            active.setup.frequency = actual;
        })?;
        self.hw.sm_set_clock_divider(sm.id, divider);
        // The divider counter may be past the new top.
        self.hw.sm_clock_divider_restart(sm.id);
        Ok(actual)
    }

    /// The frequency achieved by the clock divider, not the one requested.
    pub fn frequency(&self, sm: &StateMachine) -> Result<u32, Error> {
        self.with_active(sm, |active| active.setup.frequency)
    }

    /// Address the program was loaded at.
    pub fn offset(&self, sm: &StateMachine) -> Result<u8, Error> {
        self.with_active(sm, |active| active.program.offset)
    }

    pub fn pc(&self, sm: &StateMachine) -> Result<u8, Error> {
        self.with_active(sm, |_| ())?;
        Ok(self.hw.sm_pc(sm.id))
    }

    /// GPIOs owned by the state machine.
    pub fn pins(&self, sm: &StateMachine) -> Result<PinMask, Error> {
        self.with_active(sm, |active| active.pins)
    }

    /// Number of state machines running this state machine's copy of the program.
    pub fn program_users(&self, sm: &StateMachine) -> Result<usize, Error> {
        self.with_tables(|tables| {
            let program = tables
                .active(sm.id, sm.generation)
                .ok_or(Error::Deinitialized)?
                .program;
            Ok(tables.blocks[sm.id.block as usize].users(&program))
        })
    }

    /// Whether the handle still refers to a claimed state machine.
    pub fn is_active(&self, sm: &StateMachine) -> bool {
        self.with_active(sm, |_| ()).is_ok()
    }

    /// Instruction memory used by a block, one bit per address.
    pub fn used_instructions(&self, block: u8) -> u32 {
        self.with_tables(|tables| tables.blocks[block as usize].used_instructions)
    }

    /// Number of state machines currently using `pin`.
    pub fn pin_users(&self, pin: u8) -> u8 {
        self.with_tables(|tables| tables.pin_refs.get(pin as usize).copied().unwrap_or(0))
    }
}

/// Make the pin fields of `image` relative to a block based at `base`.
///
/// Groups that are not configured sit at 0, which every accepted base leaves
/// at 0.
fn windowed(mut image: SmConfig, base: u8) -> SmConfig {
    for field in [
        &mut image.out_base,
        &mut image.set_base,
        &mut image.side_set_base,
        &mut image.in_base,
        &mut image.jmp_pin,
    ] {
        *field = field.saturating_sub(base);
    }
    image
}
