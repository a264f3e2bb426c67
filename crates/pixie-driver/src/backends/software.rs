//! Behavioural model of a Pixie-16 host interface
//!
//! [`SoftwareModule`] is a [`DeviceModel`] for the [`SimulatedBus`] that
//! answers the protocols the driver speaks: FPGA clear/load status, the host
//! bus memory window, FIPPI registers, daughterboard offset DACs, the ADC
//! serial port and the gain latch. ADC traces are synthesised from the
//! offset DAC settings so fixture procedures (swap detection, offset
//! adjustment, ADC tests) run end to end without hardware.
//!
//! [`SimulatedBus`]: super::SimulatedBus

use super::sim::{DeviceModel, RegisterFile};
use crate::error::{PixieError, Result};
use crate::fixture::db10::{BITSLIP_BASE, BITSLIP_BITS, BITSLIP_SETTINGS};
use crate::fixture::MAX_DBS;
use crate::memory::IO_BUFFER_ADDR;
use crate::module::{Module, ModuleConfig, RunControl, OFFSET_DAC_MID};
use pixie_hw::adc::{ad9434, full_scale, TestMode};
use pixie_hw::fpga::{fippi_1_2, fippi_3_4, Controls};
use pixie_hw::{fippi, gain, regs, Address, AdcWord, Word};
use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Chip ID the modelled AD9434s report
pub const MODEL_CHIP_ID: u32 = 0x6a;

/// Chip grade the modelled AD9434s report
pub const MODEL_CHIP_GRADE: u32 = 0x0c;

const FIPPI_SPACE: Address = 1 << 23;
const FIELDS: Address =
    (fippi::SELECT_MASK << fippi::SELECT_BIT) | (fippi::SELECT_MASK << fippi::CHANNEL_SELECT_BIT);

const NOISE: [i64; 8] = [0, 1, -1, 2, -2, 0, 1, -1];
const PULSE_PERIOD: usize = 512;
const PULSE_HEIGHT: i64 = 500;

const FPGA_PAIRS: [(Controls, Controls); 2] = [
    (fippi_1_2::CLEAR, fippi_1_2::LOAD),
    (fippi_3_4::CLEAR, fippi_3_4::LOAD),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Cleared,
    Loading { words: usize },
}

#[derive(Debug, Clone, Copy)]
struct Fpga {
    phase: Phase,
    attempts: usize,
}

#[derive(Debug, Clone)]
struct ChannelModel {
    board: usize,
    offset: usize,
    base: usize,
    channels: usize,
    bits: u32,
    test_mode: TestMode,
    invert: bool,
}

#[derive(Debug)]
struct SoftwareState {
    channels: Vec<ChannelModel>,
    dacs: Vec<u32>,
    adcctrl: [Word; MAX_DBS],
    bitslip: [Word; MAX_DBS],
    frame: [Word; MAX_DBS],
    gain: [u16; MAX_DBS],
    swapped: BTreeSet<(usize, usize)>,
    bitslip_window: RangeInclusive<u32>,
    fpga: [Fpga; 2],
    fpga_pair: Option<usize>,
    done_on_attempt: usize,
    ctrlcs: Word,
    window: Address,
    selected: Option<usize>,
}

impl SoftwareState {
    fn new(config: &ModuleConfig) -> Self {
        let channels = config
            .channels
            .iter()
            .enumerate()
            .map(|(channel, chan)| {
                let board = config
                    .boards
                    .iter()
                    .find(|b| (b.base..b.base + b.channels).contains(&channel));
                ChannelModel {
                    board: board.map_or(0, |b| b.number),
                    offset: board.map_or(channel, |b| channel - b.base),
                    base: board.map_or(0, |b| b.base),
                    channels: board.map_or(config.channels.len(), |b| b.channels),
                    bits: chan.adc_bits,
                    test_mode: TestMode::Off,
                    invert: false,
                }
            })
            .collect::<Vec<_>>();
        Self {
            dacs: vec![OFFSET_DAC_MID; channels.len()],
            channels,
            adcctrl: [0; MAX_DBS],
            bitslip: [0; MAX_DBS],
            frame: [0; MAX_DBS],
            gain: [gain::LATCH_DEFAULT; MAX_DBS],
            swapped: BTreeSet::new(),
            bitslip_window: 0..=BITSLIP_SETTINGS - 1,
            fpga: [Fpga {
                phase: Phase::Idle,
                attempts: 0,
            }; 2],
            fpga_pair: None,
            done_on_attempt: 1,
            ctrlcs: 0,
            window: 0,
            selected: None,
        }
    }

    fn channel_at(&self, board: usize, offset: usize) -> Option<usize> {
        self.channels
            .iter()
            .position(|c| c.board == board && c.offset == offset)
    }

    // ── Host registers ──────────────────────────────────────────────────────

    fn write(&mut self, addr: Address, value: Word) {
        match addr {
            regs::CFG_CTRLCS => self.write_ctrlcs(value),
            regs::CFG_DATACS => {
                if let Some(pair) = self.fpga_pair {
                    if let Phase::Loading { words } = &mut self.fpga[pair].phase {
                        *words += 1;
                    }
                }
            }
            regs::CFG_DAC => self.write_cfg_dac(value),
            regs::EXT_MEM_TEST => self.window = value,
            regs::WRT_DSP_MMA => {
                let target = self.window;
                self.window = self.window.wrapping_add(1);
                if target & FIPPI_SPACE != 0 {
                    self.write_fippi(target, value);
                }
            }
            _ => {}
        }
    }

    fn read(&mut self, file: &RegisterFile, addr: Address) -> Word {
        match addr {
            regs::CFG_RDCS => self.fpga_status(),
            regs::WRT_DSP_MMA => {
                let target = self.window;
                self.window = self.window.wrapping_add(1);
                if target & FIPPI_SPACE == 0 {
                    self.read_dsp(target)
                } else {
                    self.read_fippi(target)
                }
            }
            _ => file.get(addr),
        }
    }

    fn write_ctrlcs(&mut self, value: Word) {
        self.ctrlcs = value;
        let set = value & 0xfff;
        for (pair, (clear, load)) in FPGA_PAIRS.iter().enumerate() {
            if set == clear.set {
                self.fpga_pair = Some(pair);
                self.fpga[pair].phase = Phase::Cleared;
            } else if set == load.set {
                self.fpga_pair = Some(pair);
                let fpga = &mut self.fpga[pair];
                fpga.attempts += 1;
                fpga.phase = Phase::Loading { words: 0 };
            }
        }
    }

    fn fpga_status(&self) -> Word {
        let Some(pair) = self.fpga_pair else {
            return 0;
        };
        let (clear, load) = FPGA_PAIRS[pair];
        let fpga = self.fpga[pair];
        match fpga.phase {
            Phase::Idle => 0,
            Phase::Loading { words } if words > 0 && fpga.attempts >= self.done_on_attempt => {
                clear.done | load.done
            }
            Phase::Cleared | Phase::Loading { .. } => clear.done,
        }
    }

    fn write_cfg_dac(&mut self, value: Word) {
        let port = (self.ctrlcs >> regs::port::SHIFT) & regs::port::MASK;
        let Some(board) = (port as usize).checked_sub(1) else {
            return;
        };
        let device = value >> 24;
        match device {
            0x20 | 0x22 => {
                let output = ((value >> 16) & 0xff).wrapping_sub(0x30);
                let offset = match output {
                    0 => 2,
                    1 => 0,
                    2 => 1,
                    3 => 3,
                    _ => return,
                } + if device == 0x20 { 4 } else { 0 };
                if let Some(channel) = self.channel_at(board, offset) {
                    self.dacs[channel] = value & 0xffff;
                }
            }
            gain::PIO_0 | gain::PIO_1 => {
                if let Some(latch) = self.gain.get_mut(board) {
                    let byte = ((value >> 16) & 0xff) as u16;
                    *latch = if device == gain::PIO_0 {
                        (*latch & 0xff00) | byte
                    } else {
                        (*latch & 0x00ff) | (byte << 8)
                    };
                }
            }
            _ => {}
        }
    }

    // ── FIPPI ───────────────────────────────────────────────────────────────

    fn decode(addr: Address) -> (usize, usize, Address) {
        let device = ((addr >> fippi::SELECT_BIT) & fippi::SELECT_MASK) as usize;
        let channel = ((addr >> fippi::CHANNEL_SELECT_BIT) & fippi::SELECT_MASK) as usize;
        (device, channel, addr & !FIELDS)
    }

    fn write_fippi(&mut self, addr: Address, value: Word) {
        let (device, channel, reg) = Self::decode(addr);
        if device >= MAX_DBS {
            return;
        }
        match reg {
            fippi::ADCCTRL => self.adcctrl[device] = value,
            fippi::BITSLIP => self.bitslip[device] = value,
            fippi::ADCSPI => self.adc_command(device, value),
            fippi::FIPPI_DAC => {
                if let Some(chan) = self.channel_at(device, channel) {
                    self.dacs[chan] = value >> 1;
                }
            }
            _ => {}
        }
    }

    fn read_fippi(&self, addr: Address) -> Word {
        let (device, _, reg) = Self::decode(addr);
        if device >= MAX_DBS {
            return 0;
        }
        match reg {
            fippi::ADCCTRL => self.adcctrl[device],
            fippi::BITSLIP => self.bitslip[device],
            fippi::ADCFRAME => self.frame[device],
            _ => 0,
        }
    }

    fn adc_command(&mut self, board: usize, cmd: Word) {
        let mask = cmd >> 24;
        let reg = (cmd >> 8) & 0xff;
        let value = cmd & 0xff;
        let read = cmd & crate::fixture::adc_spi::READ != 0;
        for offset in (0..8).filter(|bit| mask & (1 << bit) != 0) {
            let Some(channel) = self.channel_at(board, offset) else {
                continue;
            };
            if read {
                self.frame[board] = match reg {
                    ad9434::CHIP_ID => MODEL_CHIP_ID,
                    ad9434::CHIP_GRADE => MODEL_CHIP_GRADE,
                    _ => 0,
                };
                continue;
            }
            let adc = &mut self.channels[channel];
            match reg {
                ad9434::TEST_IO => {
                    adc.test_mode = TestMode::ALL
                        .iter()
                        .copied()
                        .find(|mode| ad9434::test_mode_value(*mode) == value)
                        .unwrap_or(TestMode::Off);
                }
                ad9434::OUTPUT_MODE => adc.invert = value & ad9434::INVERT != 0,
                _ => {}
            }
        }
    }

    // ── Traces ──────────────────────────────────────────────────────────────

    fn read_dsp(&self, addr: Address) -> Word {
        let Some(index) = addr.checked_sub(IO_BUFFER_ADDR) else {
            return 0;
        };
        let Some(channel) = self.selected else {
            return 0;
        };
        let first = index as usize * 2;
        let lo = Word::from(self.sample(channel, first));
        let hi = Word::from(self.sample(channel, first + 1));
        lo | (hi << 16)
    }

    fn channel_bitslip(&self, channel: usize) -> u32 {
        let model = &self.channels[channel];
        let base = BITSLIP_BASE.get(model.offset).copied().unwrap_or(0);
        (self.bitslip[model.board] >> base) & ((1 << BITSLIP_BITS) - 1)
    }

    fn source(&self, channel: usize) -> usize {
        let model = &self.channels[channel];
        let pair = model.offset / 2;
        let corrected = self.adcctrl[model.board] & (1 << pair) != 0;
        let crossed = self.swapped.contains(&(model.board, pair)) != corrected;
        let partner = model.offset ^ 1;
        if crossed && partner < model.channels {
            model.base + partner
        } else {
            channel
        }
    }

    fn sample(&self, channel: usize, index: usize) -> AdcWord {
        let model = &self.channels[channel];
        let full = full_scale(model.bits);
        if model.test_mode != TestMode::Off {
            // The AD9434 output is inverted unless the output mode says otherwise.
            let Some((w1, w2)) = model.test_mode.pattern(model.bits, !model.invert) else {
                #[allow(clippy::cast_possible_truncation)]
                return (index as AdcWord).wrapping_mul(0x9d) & full;
            };
            let word = if index % 2 == 0 { w1 } else { w2 };
            let slipped = model.test_mode == TestMode::Checkerboard
                && !self.bitslip_window.contains(&self.channel_bitslip(channel));
            return if slipped { (word ^ 0x3) & full } else { word };
        }
        let dac = self.dacs[self.source(channel)];
        let mut code = i64::from(dac >> (16 - model.bits.min(16)));
        code += NOISE[index % NOISE.len()];
        if index % PULSE_PERIOD == PULSE_PERIOD / 2 {
            code += PULSE_HEIGHT;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let sample = code.clamp(0, i64::from(full)) as AdcWord;
        sample
    }
}

/// Software model of one module's host interface
///
/// Clones share state: hand one to [`SimulatedBus::with_model`] and keep one
/// to drive run control and inspect the modelled hardware.
///
/// [`SimulatedBus::with_model`]: super::SimulatedBus::with_model
#[derive(Debug, Clone)]
pub struct SoftwareModule {
    state: Arc<Mutex<SoftwareState>>,
}

impl SoftwareModule {
    /// Model the module layout in `config`
    pub fn new(config: &ModuleConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(SoftwareState::new(config))),
        }
    }

    fn state(&self) -> MutexGuard<'_, SoftwareState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cross the ADCs of pair `pair` on `board`
    #[must_use]
    pub fn swap_pair(self, board: usize, pair: usize) -> Self {
        self.state().swapped.insert((board, pair));
        self
    }

    /// FPGA loads only complete from this attempt on
    #[must_use]
    pub fn with_fpga_done_on_attempt(self, attempt: usize) -> Self {
        self.state().done_on_attempt = attempt;
        self
    }

    /// Bitslip settings that capture the checkerboard pattern cleanly
    #[must_use]
    pub fn with_bitslip_window(self, window: RangeInclusive<u32>) -> Self {
        self.state().bitslip_window = window;
        self
    }

    /// Run control that captures traces from this model
    pub fn run_control(&self) -> SoftwareRunControl {
        SoftwareRunControl {
            state: Arc::clone(&self.state),
        }
    }

    /// Offset DAC value driving a channel
    pub fn dac(&self, channel: usize) -> Option<u32> {
        self.state().dacs.get(channel).copied()
    }

    /// Gain latch of a board
    pub fn gain_latch(&self, board: usize) -> Option<u16> {
        self.state().gain.get(board).copied()
    }

    /// `ADCCTRL` of a board
    pub fn adcctrl(&self, board: usize) -> Option<Word> {
        self.state().adcctrl.get(board).copied()
    }

    /// Test mode an ADC is in
    pub fn test_mode(&self, channel: usize) -> Option<TestMode> {
        self.state().channels.get(channel).map(|c| c.test_mode)
    }

    /// Bitslip a channel's input is set to
    pub fn bitslip(&self, channel: usize) -> Option<u32> {
        let state = self.state();
        (channel < state.channels.len()).then(|| state.channel_bitslip(channel))
    }

    /// Load attempts seen by a FIPPI pair, 0 for DB 1/2 and 1 for DB 3/4
    pub fn fpga_attempts(&self, pair: usize) -> usize {
        self.state().fpga.get(pair).map_or(0, |f| f.attempts)
    }
}

impl DeviceModel for SoftwareModule {
    fn write(&mut self, file: &mut RegisterFile, addr: Address, value: Word) {
        file.set(addr, value);
        self.state().write(addr, value);
    }

    fn read(&mut self, file: &mut RegisterFile, addr: Address) -> Word {
        self.state().read(file, addr)
    }
}

/// Run control backed by a [`SoftwareModule`]
#[derive(Debug, Clone)]
pub struct SoftwareRunControl {
    state: Arc<Mutex<SoftwareState>>,
}

impl RunControl for SoftwareRunControl {
    fn get_traces(&self, module: &Module, channel: usize) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if channel >= state.channels.len() {
            return Err(PixieError::invalid_value(format!("invalid channel: {channel}")));
        }
        debug!("{}: software: get-traces: channel={channel}", module.label());
        state.selected = Some(channel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SimulatedBus;
    use crate::bus::RegisterBus;
    use crate::fixture::BoardKind;

    fn bus(model: &SoftwareModule) -> SimulatedBus {
        SimulatedBus::with_model(model.clone())
    }

    #[test]
    fn fpga_done_after_data() {
        let config = ModuleConfig::rev_h(2, 0, &[BoardKind::Db04]);
        let model = SoftwareModule::new(&config);
        let bus = bus(&model);
        bus.write_word(regs::CFG_CTRLCS, fippi_1_2::CLEAR.set).expect("clear");
        assert_eq!(bus.read_word(regs::CFG_RDCS).expect("rdcs"), fippi_1_2::CLEAR.done);
        bus.write_word(regs::CFG_CTRLCS, fippi_1_2::LOAD.set).expect("load");
        assert!(!fippi_1_2::LOAD.is_done(bus.read_word(regs::CFG_RDCS).expect("rdcs")));
        bus.write_word(regs::CFG_DATACS, 1).expect("data");
        assert!(fippi_1_2::LOAD.is_done(bus.read_word(regs::CFG_RDCS).expect("rdcs")));
        assert_eq!(model.fpga_attempts(0), 1);
        assert_eq!(model.fpga_attempts(1), 0);
    }

    #[test]
    fn db04_dac_routing() {
        let config = ModuleConfig::rev_h(2, 0, &[BoardKind::Db04, BoardKind::Db04]);
        let model = SoftwareModule::new(&config);
        let bus = bus(&model);
        bus.write_word(regs::CFG_CTRLCS, 2 << 19).expect("port");
        bus.write_word(regs::CFG_DAC, 0x2233_1234).expect("dac");
        assert_eq!(model.dac(7), Some(0x1234));
        bus.write_word(regs::CFG_DAC, gain::pio_word(gain::PIO_1, 0xfb)).expect("pio");
        assert_eq!(model.gain_latch(1), Some(0xfbff));
    }

    #[test]
    fn traces_follow_dac() {
        let config = ModuleConfig::rev_h(2, 0, &[BoardKind::Db04]);
        let model = SoftwareModule::new(&config);
        let state = model.state();
        // 0x8000 on a 14 bit ADC is mid range.
        assert_eq!(state.sample(0, 0), 0x2000);
        assert_eq!(state.sample(0, 3), 0x2002);
        assert_eq!(state.sample(0, 256), 0x2000 + 500);
    }

    #[test]
    fn crossed_pair_reads_partner() {
        let config = ModuleConfig::rev_h(2, 0, &[BoardKind::Db04]);
        let model = SoftwareModule::new(&config).swap_pair(0, 1);
        {
            let mut state = model.state();
            state.dacs[2] = 0;
            assert_eq!(state.source(2), 3);
            assert_eq!(state.source(0), 0);
            state.adcctrl[0] = 1 << 1;
            assert_eq!(state.source(2), 2);
        }
    }

    #[test]
    fn adc_serial_port() {
        let config = ModuleConfig::rev_h(2, 0, &[BoardKind::Db10]);
        let model = SoftwareModule::new(&config).with_bitslip_window(4..=9);
        let mut state = model.state();
        let spi = fippi::addr(0, fippi::ADCSPI);
        state.write_fippi(spi, (1 << 25) | (ad9434::TEST_IO << 8) | 4);
        assert_eq!(state.channels[1].test_mode, TestMode::Checkerboard);
        state.write_fippi(spi, (1 << 25) | crate::fixture::adc_spi::READ | (ad9434::CHIP_ID << 8));
        assert_eq!(state.read_fippi(fippi::addr(0, fippi::ADCFRAME)), MODEL_CHIP_ID);
        let (w1, _) = TestMode::Checkerboard.pattern(12, true).expect("pattern");
        assert_ne!(state.sample(1, 0), w1);
        state.bitslip[0] = 5 << BITSLIP_BASE[1];
        assert_eq!(state.sample(1, 0), w1);
    }
}
