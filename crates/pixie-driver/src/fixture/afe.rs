//! Daughterboard analog front end assembly
//!
//! Rev H modules carry their front end on up to four daughterboards. The
//! assembly owns the boards and one channel fixture per module channel and
//! runs the module level procedures that need every channel at once:
//!
//! - ADC swap detection at boot. Some boards deliver the two ADCs of a pair
//!   crossed. Driving the even channels of each pair to the opposite rail
//!   shows which channels follow their own offset and which follow their
//!   partner's. Crossed pairs are corrected in the board FIPPI `ADCCTRL`.
//! - Offset adjustment. Each channel's offset DAC is walked until its
//!   baseline sits at the channel's target percentage of the ADC range.
//! - ADC tests: pattern check and bitslip sweet spot search on boards whose
//!   ADCs have test modes.

use super::db::{make_board, Board};
use super::{
    items, tests, Assembly, ChannelFixture, TestLog, MAX_DBS,
};
use crate::baseline::BaselineConfig;
use crate::error::{PixieError, Result};
use crate::memory::HostBus;
use crate::module::{Module, OFFSET_DAC_BITS};
use pixie_hw::adc::TestMode;
use pixie_hw::{fippi, AdcWord, Word};
use std::fmt::Write as _;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn, Level};

/// Offset adjustment gives up after this many capture rounds
pub const ADJUST_RUNS: usize = 30;

/// DAC step used while the first fit samples are collected
pub const FIT_STEP: i64 = 200;

/// Fit samples needed before interpolating
pub const FIT_SAMPLES: usize = 2;

/// Test modes the pattern check drives, in order
pub const PATTERN_MODES: [TestMode; 4] = [
    TestMode::FsPlus,
    TestMode::FsMinus,
    TestMode::Midscale,
    TestMode::Checkerboard,
];

/// Samples dumped around a pattern failure
const MEMDUMP_SAMPLES: usize = 32;

/// Least squares fit of `y = kx + c`
#[derive(Debug, Clone, Default)]
struct LinearFit {
    count: usize,
    first: [(i64, i64); 2],
    sx: f64,
    sy: f64,
    sxx: f64,
    sxy: f64,
}

impl LinearFit {
    #[allow(clippy::cast_precision_loss)]
    fn update(&mut self, x: i64, y: i64) {
        if let Some(slot) = self.first.get_mut(self.count) {
            *slot = (x, y);
        }
        self.count += 1;
        let (x, y) = (x as f64, y as f64);
        self.sx += x;
        self.sy += y;
        self.sxx += x * x;
        self.sxy += x * y;
    }

    /// Signs of the first two steps differ
    fn falling(&self) -> Option<bool> {
        if self.count < 2 {
            return None;
        }
        let [(x0, y0), (x1, y1)] = self.first;
        Some(((x1 - x0) < 0) != ((y1 - y0) < 0))
    }

    /// `(k, c)`, `None` while every sample has the same x
    #[allow(clippy::cast_precision_loss)]
    fn solve(&self) -> Option<(f64, f64)> {
        let n = self.count as f64;
        let divisor = self.sx * self.sx - n * self.sxx;
        if divisor.abs() < f64::EPSILON {
            return None;
        }
        let k = (self.sx * self.sy - n * self.sxy) / divisor;
        let c = (self.sx * self.sxy - self.sy * self.sxx) / divisor;
        Some((k, c))
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn y(&self, x: i64) -> Option<i64> {
        let (k, c) = self.solve()?;
        Some((k * x as f64 + c).round() as i64)
    }
}

/// First sample pair of `trace` that does not show `mode`'s pattern
///
/// The trace samples the ADC stream at the DSP rate, so the phase of a two
/// word pattern can drift through a trace. A pair holding either word of an
/// alternating pattern passes. Modes without a fixed pattern fail at 0.
pub fn trace_check(trace: &[AdcWord], mode: TestMode, adc_bits: u32, inverted: bool) -> Option<usize> {
    let Some((w1, w2)) = mode.pattern(adc_bits, inverted) else {
        return Some(0);
    };
    for (index, pair) in trace.chunks_exact(2).enumerate() {
        let (a, b) = (pair[0], pair[1]);
        if a == w1 && b == w2 {
            continue;
        }
        if w1 != w2 && [a, b].iter().any(|s| *s == w1 || *s == w2) {
            continue;
        }
        return Some(index * 2);
    }
    None
}

/// Hex dump of the samples around `offset`, one line per eight samples
pub fn trace_memdump(trace: &[AdcWord], offset: usize, label: &str) -> Vec<String> {
    let start = (offset & !7).saturating_sub(8);
    let end = (start + MEMDUMP_SAMPLES).min(trace.len());
    let mut lines = vec![label.to_string()];
    for (row, samples) in trace.get(start..end).unwrap_or_default().chunks(8).enumerate() {
        let mut line = format!("{:6}:", start + row * 8);
        for sample in samples {
            let _ = write!(line, " {sample:04x}");
        }
        lines.push(line);
    }
    lines
}

/// Longest run of `true`, as inclusive bounds. Ties go to the first run.
fn longest_run(results: &[bool]) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize)> = None;
    let mut start = None;
    for (index, good) in results.iter().copied().chain(std::iter::once(false)).enumerate() {
        match (good, start) {
            (true, None) => start = Some(index),
            (false, Some(first)) => {
                let run = (first, index - 1);
                if best.map_or(true, |(lo, hi)| run.1 - run.0 > hi - lo) {
                    best = Some(run);
                }
                start = None;
            }
            _ => {}
        }
    }
    best
}

/// Front end assembly of a daughterboard module
#[derive(Debug)]
pub struct AfeDbs {
    boards: Vec<Box<dyn Board>>,
    channels: Vec<Box<dyn ChannelFixture>>,
    adcctrl: [Word; MAX_DBS],
    baseline: BaselineConfig,
    swap_verify: bool,
}

impl Default for AfeDbs {
    fn default() -> Self {
        Self::new()
    }
}

impl AfeDbs {
    /// Create an assembly with no boards
    pub fn new() -> Self {
        Self {
            boards: Vec::new(),
            channels: Vec::new(),
            adcctrl: [0; MAX_DBS],
            baseline: BaselineConfig::default(),
            swap_verify: true,
        }
    }

    /// Skip the verification pass of swap detection
    #[must_use]
    pub fn without_swap_verify(mut self) -> Self {
        self.swap_verify = false;
        self
    }

    /// `ADCCTRL` value last written to each board
    pub fn adcctrl(&self) -> [Word; MAX_DBS] {
        self.adcctrl
    }

    /// Boards fitted
    pub fn boards(&self) -> &[Box<dyn Board>] {
        &self.boards
    }

    fn wait_dac_settle(&self, module: &Module) {
        let settle = self
            .channels
            .iter()
            .filter_map(|fixture| fixture.get_uint(items::DAC_SETTLE_PERIOD).ok())
            .max()
            .unwrap_or(0);
        debug!("{}: afe-dbs: dac-settle-wait: period={settle} msecs", module.label());
        module.wait(Duration::from_millis(u64::from(settle)));
    }

    /// Set the offset of every `step`th channel and wait for it to settle
    ///
    /// # Errors
    ///
    /// Returns error if a DAC write fails.
    pub fn set_channel_voffset(&mut self, module: &Module, volts: f64, step: usize) -> Result<()> {
        for channel in (0..self.channels.len()).step_by(step.max(1)) {
            module.set_voffset(channel, volts)?;
        }
        self.set_dacs(module)?;
        self.wait_dac_settle(module);
        Ok(())
    }

    fn detect_swaps(&mut self, module: &Module, candidates: &[usize]) -> Result<()> {
        self.set_channel_voffset(module, -1.5, 1)?;
        let same = self.analyze_channel_baselines(module, 1)?;
        self.set_channel_voffset(module, 1.5, 2)?;
        let moved = self.analyze_channel_baselines(module, 1)?;

        for &channel in candidates {
            let swapped = if channel % 2 == 0 {
                same[channel] == moved[channel]
            } else {
                same[channel] != moved[channel]
            };
            let fixture = &mut self.channels[channel];
            fixture.set_bool(module, items::ADC_SWAP, swapped)?;
            if !swapped {
                continue;
            }
            let db = fixture.get_uint(items::DB_NUMBER)? as usize;
            let offset = fixture.get_uint(items::DB_OFFSET)?;
            let Some(ctrl) = self.adcctrl.get_mut(db) else {
                return Err(PixieError::module_initialize(format!(
                    "invalid DB number for channel: {channel}"
                )));
            };
            let last = *ctrl;
            *ctrl |= 1 << (offset / 2);
            debug!(
                "{}: afe-dbs: boot: adc_swap: chan={channel} db={db} offset={offset} adcctrl={:#x}",
                module.label(),
                *ctrl
            );
            if *ctrl != last {
                HostBus::fippi(module).write(fippi::addr(db, fippi::ADCCTRL), *ctrl)?;
            }
        }

        let mut failed = false;
        if self.swap_verify {
            let verify = self.analyze_channel_baselines(module, 1)?;
            for &channel in candidates {
                let ok = if channel % 2 == 0 {
                    same[channel] != verify[channel]
                } else {
                    same[channel] == verify[channel]
                };
                if !ok {
                    error!("{}: afe-dbs: boot: ADC swap failed: {channel}", module.label());
                    failed = true;
                }
            }
        }

        self.set_channel_voffset(module, 0.0, 1)?;

        if failed {
            return Err(PixieError::module_initialize("DB AFE ADC swap failure"));
        }
        Ok(())
    }

    fn read_trace(&self, channel: usize) -> Result<Vec<AdcWord>> {
        let fixture = &self.channels[channel];
        let mut trace = vec![0; fixture.config().max_adc_trace_length];
        let samples = fixture.read_adc(&mut trace)?;
        trace.truncate(samples);
        Ok(trace)
    }

    fn set_test_mode(&mut self, module: &Module, channels: &[usize], mode: TestMode) -> Result<()> {
        for &channel in channels {
            self.channels[channel].set_uint(module, items::ADC_TEST_MODE, mode as u32)?;
        }
        Ok(())
    }

    fn adc_pattern_check(&mut self, module: &Module, out: &mut TestLog<'_>) -> Result<bool> {
        let tested: Vec<usize> = (0..self.channels.len())
            .filter(|&c| self.channels[c].has_feature(items::ADC_HAS_TEST_MODE))
            .collect();
        let mut result = true;
        for mode in PATTERN_MODES {
            self.set_test_mode(module, &tested, mode)?;
            self.get_traces(module)?;
            for &channel in &tested {
                let fixture = &self.channels[channel];
                // Later modes only recheck channels that are still passing.
                if mode != TestMode::FsPlus && !fixture.has_feature(items::ADC_TEST_MODE_RESULT_PASS) {
                    continue;
                }
                let trace = self.read_trace(channel)?;
                let fixture = &mut self.channels[channel];
                let inverted = fixture.has_feature(items::ADC_DEFAULT_INVERTED);
                let bits = fixture.config().adc_bits;
                let verdict = match trace_check(&trace, mode, bits, inverted) {
                    None => 0,
                    Some(offset) => {
                        result = false;
                        let label = format!(
                            "ADC Test: fail: channel={channel} db={}/{} test-mode={}",
                            fixture.get_uint(items::DB_NUMBER).unwrap_or(0),
                            fixture.get_uint(items::DB_OFFSET).unwrap_or(0),
                            mode.label()
                        );
                        for line in trace_memdump(&trace, offset, &label) {
                            out(&line, Level::DEBUG);
                        }
                        mode as u32
                    }
                };
                fixture.set_uint(module, items::ADC_TEST_MODE_RESULT, verdict)?;
            }
        }
        self.set_test_mode(module, &tested, TestMode::Off)?;
        Ok(result)
    }

    fn adc_sweet_spot(&mut self, module: &Module, out: &mut TestLog<'_>) -> Result<bool> {
        let mode = TestMode::Checkerboard;
        let settings: Vec<u32> = self
            .channels
            .iter()
            .map(|fixture| {
                if fixture.has_feature(items::ADC_HAS_TEST_MODE)
                    && fixture.has_feature(items::ADC_HAS_BITSLIP)
                {
                    fixture.get_uint(items::ADC_BITSLIP_BITS).unwrap_or(0)
                } else {
                    0
                }
            })
            .collect();
        let swept: Vec<usize> = (0..settings.len()).filter(|&c| settings[c] > 0).collect();
        let max_settings = settings.iter().copied().max().unwrap_or(0);
        if swept.is_empty() {
            return Ok(true);
        }

        self.set_test_mode(module, &swept, mode)?;
        let mut results = vec![vec![false; max_settings as usize]; settings.len()];
        for bit in 0..max_settings {
            for &channel in &swept {
                if bit < settings[channel] {
                    self.channels[channel].set_uint(module, items::ADC_BITSLIP, bit)?;
                }
            }
            module.wait(Duration::from_millis(1));
            self.get_traces(module)?;
            for &channel in &swept {
                if bit >= settings[channel] {
                    continue;
                }
                let trace = self.read_trace(channel)?;
                let fixture = &self.channels[channel];
                let inverted = fixture.has_feature(items::ADC_DEFAULT_INVERTED);
                let check = trace_check(&trace, mode, fixture.config().adc_bits, inverted);
                results[channel][bit as usize] = check.is_none();
                if let Some(offset) = check {
                    let label = format!("ADC Sweet Spot Test: channel={channel} bitslip={bit}");
                    for line in trace_memdump(&trace, offset, &label) {
                        debug!("{}: {line}", module.label());
                    }
                }
            }
        }
        self.set_test_mode(module, &swept, TestMode::Off)?;

        let mut result = true;
        out(" chan   bitslip          SS Range", Level::DEBUG);
        for &channel in &swept {
            let window = &results[channel][..settings[channel] as usize];
            let row: String = window.iter().map(|&good| if good { 'G' } else { '_' }).collect();
            match longest_run(window) {
                Some((low, high)) => {
                    let spot = low + (high - low) / 2;
                    self.channels[channel].set_uint(
                        module,
                        items::ADC_BITSLIP,
                        super::to_uint(items::ADC_BITSLIP, spot)?,
                    )?;
                    out(&format!("{channel:>5}   {row} {spot:>3} [{low},{high}]"), Level::DEBUG);
                }
                None => {
                    result = false;
                    out(&format!("{channel:>5}   {row}   - no good setting"), Level::ERROR);
                }
            }
        }
        Ok(result)
    }
}

impl Assembly for AfeDbs {
    fn label(&self) -> &str {
        "afe-dbs"
    }

    fn channels(&self) -> &[Box<dyn ChannelFixture>] {
        &self.channels
    }

    fn channels_mut(&mut self) -> &mut [Box<dyn ChannelFixture>] {
        &mut self.channels
    }

    fn init_channels(&mut self, module: &Module) -> Result<()> {
        info!("{}: fixture: afe-dbs: create", module.label());
        self.boards = module
            .config()
            .boards
            .iter()
            .map(|board| make_board(module, board))
            .collect::<Result<_>>()?;
        let mut slots: Vec<Option<Box<dyn ChannelFixture>>> =
            (0..module.num_channels()).map(|_| None).collect();
        for board in &self.boards {
            let config = board.config();
            for offset in 0..config.channels {
                let slot = slots.get_mut(config.base + offset).ok_or_else(|| {
                    PixieError::invalid_configuration(format!(
                        "DB {} channel {offset} out of range",
                        config.number
                    ))
                })?;
                *slot = Some(board.make_channel(module, offset)?);
            }
        }
        self.channels = slots
            .into_iter()
            .enumerate()
            .map(|(channel, slot)| {
                slot.ok_or_else(|| {
                    PixieError::invalid_configuration(format!("channel {channel} has no DB"))
                })
            })
            .collect::<Result<_>>()?;
        for fixture in &mut self.channels {
            fixture.open(module)?;
        }
        Ok(())
    }

    fn fpga_fippi_loaded(&mut self, _module: &Module) -> Result<()> {
        self.adcctrl = [0; MAX_DBS];
        for fixture in &mut self.channels {
            fixture.fpga_fippi_loaded();
        }
        Ok(())
    }

    fn boot(&mut self, module: &Module) -> Result<()> {
        let start = Instant::now();
        let candidates: Vec<usize> = self
            .channels
            .iter()
            .enumerate()
            .filter(|(_, fixture)| matches!(fixture.get_bool(items::ADC_SWAP_DISABLE), Ok(false)))
            .map(|(channel, _)| channel)
            .collect();
        if candidates.is_empty() {
            debug!("{}: afe-dbs: boot: adc_swap: disabled", module.label());
        } else {
            self.detect_swaps(module, &candidates)?;
        }
        for board in &self.boards {
            let config = board.config();
            let channels = self
                .channels
                .get_mut(config.base..config.base + config.channels)
                .ok_or_else(|| {
                    PixieError::module_initialize(format!("DB {} layout", config.number))
                })?;
            board.boot(module, channels)?;
        }
        debug!("{}: afe-dbs: boot: duration={:?}", module.label(), start.elapsed());
        Ok(())
    }

    fn set_dacs(&mut self, module: &Module) -> Result<()> {
        for channel in 0..self.channels.len() {
            if !self.channels[channel].has_feature(items::DAC_HAS_OFFSET) {
                continue;
            }
            let value = module.channel_params(channel)?.offset_dac;
            self.channels[channel].set_dac(module, value)?;
        }
        Ok(())
    }

    fn get_traces(&mut self, module: &Module) -> Result<()> {
        for fixture in &mut self.channels {
            fixture.acquire_adc(module)?;
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn adjust_offsets(&mut self, module: &Module) -> Result<()> {
        let start = Instant::now();
        debug!("{}: afe-dbs: adjust-offsets", module.label());
        self.set_channel_voffset(module, 0.0, 1)?;

        let count = self.channels.len();
        let has_dac: Vec<bool> = self
            .channels
            .iter()
            .map(|fixture| fixture.has_feature(items::DAC_HAS_OFFSET))
            .collect();
        let mut dacs = Vec::with_capacity(count);
        let mut percents = Vec::with_capacity(count);
        for channel in 0..count {
            let params = module.channel_params(channel)?;
            dacs.push(i64::from(params.offset_dac));
            percents.push(params.baseline_percent);
        }
        let mut fits = vec![LinearFit::default(); count];
        let mut inverted = vec![false; count];

        let mut run_again = true;
        let mut run = 0;
        while run_again && run < ADJUST_RUNS {
            debug!("{}: afe-dbs: adjust-offsets: run={run}", module.label());
            run_again = false;
            let baselines = self.analyze_channel_baselines(module, 1)?;
            for channel in (0..count).filter(|&c| has_dac[c]) {
                let bl = &baselines[channel];
                let Some(baseline) = bl.baseline() else {
                    warn!(
                        "{}: afe-dbs: adjust-offsets: channel={channel}: no baseline",
                        module.label()
                    );
                    continue;
                };
                let range = 1i64 << bl.adc_bits();
                let top_rail = range - 1;
                let rail_step = range / (ADJUST_RUNS as i64 - 5);
                #[allow(clippy::cast_precision_loss)]
                let target = (range as f64 * percents[channel] / 100.0) as i64;
                if *bl == target as i32 {
                    continue;
                }
                let baseline = i64::from(baseline);
                let mut dac = dacs[channel];
                let action;
                if baseline <= 0 || baseline >= top_rail {
                    // The code past a rail is unknown, keep it out of the fit.
                    action = "rail-hit";
                    let up = (baseline <= 0) != inverted[channel];
                    dac += if up { rail_step } else { -rail_step };
                } else {
                    let fit = &mut fits[channel];
                    fit.update(baseline, dac);
                    if fit.count == FIT_SAMPLES && fit.falling() == Some(true) && !inverted[channel] {
                        inverted[channel] = true;
                        info!(
                            "{}: afe-dbs: adjust-offsets: channel={channel} input signal may be inverted",
                            module.label()
                        );
                    }
                    let step = if inverted[channel] { -FIT_STEP } else { FIT_STEP };
                    let toward = if target > baseline { step } else { -step };
                    if fit.count < FIT_SAMPLES {
                        action = "linear-fit";
                        dac += toward;
                    } else if let Some(y) = fit.y(target) {
                        action = "interpolate";
                        dac = y;
                    } else {
                        action = "linear-fit";
                        dac += toward;
                    }
                }
                dac = dac.clamp(0, (1 << OFFSET_DAC_BITS) - 1);
                debug!(
                    "{}: afe-dbs: adjust-offsets: channel={channel} action={action} target={target} baseline={baseline} dac={} -> {dac}",
                    module.label(),
                    dacs[channel]
                );
                dacs[channel] = dac;
                let value = u32::try_from(dac)
                    .map_err(|_| PixieError::invalid_value(format!("offset DAC: {dac}")))?;
                self.channels[channel].set_dac(module, value)?;
                run_again = true;
            }
            if run_again {
                self.wait_dac_settle(module);
            }
            run += 1;
        }
        for channel in (0..count).filter(|&c| has_dac[c]) {
            let value = u32::try_from(dacs[channel])
                .map_err(|_| PixieError::invalid_value(format!("offset DAC: {}", dacs[channel])))?;
            module.set_offset_dac(channel, value)?;
        }
        debug!(
            "{}: afe-dbs: adjust-offsets: runs={run} duration={:?}",
            module.label(),
            start.elapsed()
        );
        Ok(())
    }

    fn baseline_config(&self) -> BaselineConfig {
        self.baseline
    }

    fn has_test(&self, test: &str) -> bool {
        match test {
            tests::ADC_PATTERN_CHECK => self
                .channels
                .iter()
                .any(|fixture| fixture.has_feature(items::ADC_HAS_TEST_MODE)),
            tests::ADC_SWEET_SPOT => self.channels.iter().any(|fixture| {
                fixture.has_feature(items::ADC_HAS_TEST_MODE)
                    && fixture.has_feature(items::ADC_HAS_BITSLIP)
            }),
            _ => false,
        }
    }

    fn run_test(&mut self, module: &Module, test: &str, out: &mut TestLog<'_>) -> Result<bool> {
        match test {
            tests::ADC_PATTERN_CHECK => self.adc_pattern_check(module, out),
            tests::ADC_SWEET_SPOT => self.adc_sweet_spot(module, out),
            _ => {
                out(&format!("invalid test: {test}"), Level::ERROR);
                Ok(false)
            }
        }
    }

    fn enable_mibs(&self) {
        for board in &self.boards {
            board.enable_mibs();
        }
        for fixture in &self.channels {
            fixture.enable_mibs();
        }
    }

    fn disable_mibs(&self) {
        for board in &self.boards {
            board.disable_mibs();
        }
        for fixture in &self.channels {
            fixture.disable_mibs();
        }
    }
}
