//! Module context
//!
//! A [`Module`] is the owning context for one instrument unit: its register
//! bus, identity, channel layout, channel parameters, persistent settings,
//! the optional MIB sink and run control collaborators, and the fixture tree.
//!
//! Register sequences against one module (CSR, HBR, FPGA load) are not
//! internally thread-safe. The module bus lock only covers the short
//! multi-word sequences that must never be split: host bus address/data
//! pairs and port-selected `CFG_DAC` writes. Shared-bus drivers inside the
//! fixture tree add their own per-transaction locks on top.

use crate::baseline;
use crate::bus::RegisterBus;
use crate::error::{PixieError, Result};
use crate::fixture::{self, Assembly, BoardConfig, BoardKind, ChannelConfig, ChannelFixture, TestLog};
use crate::mib::{self, MibSink};
use pixie_hw::{regs, Address, AdcWord, Word};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, trace};

/// Board revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Revision {
    /// Rev B
    B,
    /// Rev C
    C,
    /// Rev D
    D,
    /// Rev F
    F,
    /// Rev H, analog front end on daughterboards
    H,
}

impl Revision {
    /// True if the analog front end is on daughterboards
    pub const fn has_daughterboards(self) -> bool {
        matches!(self, Self::H)
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rev = match self {
            Self::B => 'B',
            Self::C => 'C',
            Self::D => 'D',
            Self::F => 'F',
            Self::H => 'H',
        };
        write!(f, "Rev{rev}")
    }
}

/// Wait scaling
///
/// Settle and clock-out periods are hardware facts. Simulations scale them
/// down, `scale == 0` skips them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
    scale: f64,
}

impl Timing {
    /// Real hardware waits
    pub const HARDWARE: Self = Self { scale: 1.0 };

    /// No waits
    pub const IMMEDIATE: Self = Self { scale: 0.0 };

    /// Waits multiplied by `scale`
    pub fn scaled(scale: f64) -> Self {
        Self {
            scale: scale.max(0.0),
        }
    }

    /// Scaled duration of `period`
    pub fn period(&self, period: Duration) -> Duration {
        if self.scale == 0.0 {
            Duration::ZERO
        } else {
            period.mul_f64(self.scale)
        }
    }

    /// Block for the scaled `period`
    pub fn wait(&self, period: Duration) {
        let period = self.period(period);
        if !period.is_zero() {
            std::thread::sleep(period);
        }
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self::HARDWARE
    }
}

/// Module layout and identity
#[derive(Debug, Clone)]
pub struct ModuleConfig {
    /// Crate slot
    pub slot: usize,
    /// Logical module number
    pub number: usize,
    /// Board revision
    pub revision: Revision,
    /// Per channel front end configuration
    pub channels: Vec<ChannelConfig>,
    /// Daughterboards fitted, empty for mainboard front ends
    pub boards: Vec<BoardConfig>,
    /// Wait scaling
    pub timing: Timing,
}

impl ModuleConfig {
    /// Channels per daughterboard on a Rev H module
    pub const DB_CHANNELS: usize = 4;

    /// A Rev H module with one daughterboard of each given kind
    pub fn rev_h(slot: usize, number: usize, boards: &[BoardKind]) -> Self {
        let mut channels = Vec::new();
        let mut layout = Vec::new();
        for (db, kind) in boards.iter().enumerate() {
            layout.push(BoardConfig {
                number: db,
                base: db * Self::DB_CHANNELS,
                channels: Self::DB_CHANNELS,
                kind: *kind,
            });
            channels.extend((0..Self::DB_CHANNELS).map(|_| ChannelConfig::new(*kind)));
        }
        Self {
            slot,
            number,
            revision: Revision::H,
            channels,
            boards: layout,
            timing: Timing::default(),
        }
    }

    /// A module with the front end on the mainboard
    pub fn mainboard(slot: usize, number: usize, revision: Revision, channels: usize) -> Self {
        Self {
            slot,
            number,
            revision,
            channels: (0..channels).map(|_| ChannelConfig::new(BoardKind::Mainboard)).collect(),
            boards: Vec::new(),
            timing: Timing::default(),
        }
    }

    /// Set the wait scaling
    #[must_use]
    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Set the ADC trace length of every channel
    #[must_use]
    pub fn with_trace_length(mut self, samples: usize) -> Self {
        for channel in &mut self.channels {
            channel.max_adc_trace_length = samples;
        }
        self
    }

    /// Set the ADC resolution of every channel
    #[must_use]
    pub fn with_adc_bits(mut self, bits: u32) -> Self {
        for channel in &mut self.channels {
            channel.adc_bits = bits;
        }
        self
    }

    /// Check the layout is consistent
    ///
    /// # Errors
    ///
    /// Returns error if the channel count, board count or a board's channel
    /// range is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() || self.channels.len() > pixie_hw::MAX_CHANNELS {
            return Err(PixieError::invalid_configuration(format!(
                "invalid channel count: {}",
                self.channels.len()
            )));
        }
        if self.boards.len() > fixture::MAX_DBS {
            return Err(PixieError::invalid_configuration(format!(
                "too many daughterboards: {}",
                self.boards.len()
            )));
        }
        for channel in &self.channels {
            channel.validate()?;
        }
        let mut owner = vec![None; self.channels.len()];
        for board in &self.boards {
            if board.number >= fixture::MAX_DBS {
                return Err(PixieError::invalid_configuration(format!(
                    "invalid DB number: {}",
                    board.number
                )));
            }
            for chan in board.base..board.base + board.channels {
                match owner.get_mut(chan) {
                    Some(slot @ None) => *slot = Some(board.number),
                    Some(Some(other)) => {
                        return Err(PixieError::invalid_configuration(format!(
                            "channel {chan} claimed by DB {other} and DB {}",
                            board.number
                        )))
                    }
                    None => {
                        return Err(PixieError::invalid_configuration(format!(
                            "DB {} channel {chan} out of range",
                            board.number
                        )))
                    }
                }
            }
        }
        Ok(())
    }
}

/// Channel parameters the fixtures act on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelParams {
    /// Offset DAC setting
    pub offset_dac: u32,
    /// Target baseline as a percentage of the ADC range
    pub baseline_percent: f64,
}

impl Default for ChannelParams {
    fn default() -> Self {
        Self {
            offset_dac: OFFSET_DAC_MID,
            baseline_percent: 10.0,
        }
    }
}

/// Offset DAC resolution in bits
pub const OFFSET_DAC_BITS: u32 = 16;

/// Offset DAC setting for 0 V
pub const OFFSET_DAC_MID: u32 = 1 << (OFFSET_DAC_BITS - 1);

/// Offset voltage span of the DAC in volts
pub const OFFSET_DAC_RANGE_VOLTS: f64 = 3.0;

/// Offset DAC setting for an offset voltage, clamped to the DAC range
#[must_use]
pub fn voffset_to_dac(volts: f64) -> u32 {
    let full = f64::from(1u32 << OFFSET_DAC_BITS);
    let dac = ((volts / OFFSET_DAC_RANGE_VOLTS + 0.5) * full).round();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let dac = dac.clamp(0.0, full - 1.0) as u32;
    dac
}

/// DSP run control
///
/// Starting DSP control tasks is outside this crate. The fixture framework
/// only needs one: capture an ADC trace for a channel into the DSP I/O
/// buffer, from where the channel fixture reads it over the host bus.
pub trait RunControl: Debug + Send + Sync {
    /// Capture an ADC trace of `channel` into the I/O buffer
    ///
    /// # Errors
    ///
    /// Returns error if the control task fails.
    fn get_traces(&self, module: &Module, channel: usize) -> Result<()>;
}

/// One instrument unit
#[derive(Debug)]
pub struct Module {
    config: ModuleConfig,
    bus: Arc<dyn RegisterBus>,
    ctrlcs: Mutex<Word>,
    params: Mutex<Vec<ChannelParams>>,
    persistent: Mutex<BTreeMap<String, String>>,
    mib: Option<Arc<dyn MibSink>>,
    run_control: Option<Arc<dyn RunControl>>,
    fixtures: Option<Box<dyn Assembly>>,
}

impl Module {
    /// Create a module on a bus
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid.
    pub fn new(config: ModuleConfig, bus: Arc<dyn RegisterBus>) -> Result<Self> {
        config.validate()?;
        info!(
            "module {} [slot {}]: {} {} channels on {} bus",
            config.number,
            config.slot,
            config.revision,
            config.channels.len(),
            bus.bus_type()
        );
        let params = vec![ChannelParams::default(); config.channels.len()];
        Ok(Self {
            config,
            bus,
            ctrlcs: Mutex::new(0),
            params: Mutex::new(params),
            persistent: Mutex::new(BTreeMap::new()),
            mib: None,
            run_control: None,
            fixtures: None,
        })
    }

    /// Attach a MIB sink
    #[must_use]
    pub fn with_mib(mut self, sink: Arc<dyn MibSink>) -> Self {
        self.mib = Some(sink);
        self
    }

    /// Attach a run control collaborator
    #[must_use]
    pub fn with_run_control(mut self, run_control: Arc<dyn RunControl>) -> Self {
        self.run_control = Some(run_control);
        self
    }

    // ── Identity ────────────────────────────────────────────────────────────

    /// Crate slot
    pub fn slot(&self) -> usize {
        self.config.slot
    }

    /// Logical module number
    pub fn number(&self) -> usize {
        self.config.number
    }

    /// Board revision
    pub fn revision(&self) -> Revision {
        self.config.revision
    }

    /// Layout and identity
    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    /// Number of channels
    pub fn num_channels(&self) -> usize {
        self.config.channels.len()
    }

    /// Channel configuration
    ///
    /// # Errors
    ///
    /// Returns error if the channel does not exist.
    pub fn channel_config(&self, channel: usize) -> Result<&ChannelConfig> {
        self.config
            .channels
            .get(channel)
            .ok_or_else(|| PixieError::invalid_value(format!("invalid channel: {channel}")))
    }

    /// Wait scaling
    pub fn timing(&self) -> Timing {
        self.config.timing
    }

    /// Log prefix for this module
    pub fn label(&self) -> String {
        format!("module {} [slot {}]", self.config.number, self.config.slot)
    }

    // ── Register access ─────────────────────────────────────────────────────

    /// Register bus
    pub fn bus(&self) -> &Arc<dyn RegisterBus> {
        &self.bus
    }

    /// Read a host register
    ///
    /// # Errors
    ///
    /// Returns error if the bus access fails.
    pub fn read_word(&self, addr: Address) -> Result<Word> {
        let value = self.bus.read_word(addr)?;
        trace!("{}: read {addr:#x} = {value:#x}", self.label());
        Ok(value)
    }

    /// Write a host register
    ///
    /// # Errors
    ///
    /// Returns error if the bus access fails.
    pub fn write_word(&self, addr: Address, value: Word) -> Result<()> {
        trace!("{}: write {addr:#x} = {value:#x}", self.label());
        self.bus.write_word(addr, value)
    }

    /// Hold the module bus lock
    ///
    /// The guard derefs to the shadow of `CFG_CTRLCS`.
    pub(crate) fn lock_bus(&self) -> MutexGuard<'_, Word> {
        self.ctrlcs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Select the I/O port `CFG_DAC` writes are routed to
    ///
    /// # Errors
    ///
    /// Returns error if the bus write fails.
    pub fn select_port(&self, port: u32) -> Result<()> {
        let mut ctrlcs = self.lock_bus();
        self.write_port(&mut ctrlcs, port)
    }

    fn write_port(&self, ctrlcs: &mut Word, port: u32) -> Result<()> {
        *ctrlcs = regs::with_port(*ctrlcs, port);
        debug!("{}: write: cfg_ctrlcs={:#x}", self.label(), *ctrlcs);
        self.write_word(regs::CFG_CTRLCS, *ctrlcs)
    }

    /// Select `port` and run `f` with the module bus held
    ///
    /// # Errors
    ///
    /// Returns error if the port select or `f` fails.
    pub fn port_transaction<T>(&self, port: u32, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        let mut ctrlcs = self.lock_bus();
        self.write_port(&mut ctrlcs, port)?;
        f(self)
    }

    /// Block for a hardware period, scaled by the module timing
    pub fn wait(&self, period: Duration) {
        self.config.timing.wait(period);
    }

    // ── Channel parameters ──────────────────────────────────────────────────

    fn params(&self) -> MutexGuard<'_, Vec<ChannelParams>> {
        self.params.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Parameters of a channel
    ///
    /// # Errors
    ///
    /// Returns error if the channel does not exist.
    pub fn channel_params(&self, channel: usize) -> Result<ChannelParams> {
        self.params()
            .get(channel)
            .copied()
            .ok_or_else(|| PixieError::invalid_value(format!("invalid channel: {channel}")))
    }

    /// Set the offset DAC parameter of a channel
    ///
    /// # Errors
    ///
    /// Returns error if the channel does not exist or the value is out of range.
    pub fn set_offset_dac(&self, channel: usize, value: u32) -> Result<()> {
        if value >= 1 << OFFSET_DAC_BITS {
            return Err(PixieError::invalid_value(format!(
                "invalid offset DAC: channel={channel} value={value}"
            )));
        }
        let mut params = self.params();
        let param = params
            .get_mut(channel)
            .ok_or_else(|| PixieError::invalid_value(format!("invalid channel: {channel}")))?;
        param.offset_dac = value;
        Ok(())
    }

    /// Set the offset DAC parameter of a channel from a voltage
    ///
    /// # Errors
    ///
    /// Returns error if the channel does not exist.
    pub fn set_voffset(&self, channel: usize, volts: f64) -> Result<()> {
        self.set_offset_dac(channel, voffset_to_dac(volts))
    }

    /// Set the target baseline percentage of a channel
    ///
    /// # Errors
    ///
    /// Returns error if the channel does not exist or the value is not a percentage.
    pub fn set_baseline_percent(&self, channel: usize, percent: f64) -> Result<()> {
        if !(0.0..=100.0).contains(&percent) {
            return Err(PixieError::invalid_value(format!(
                "invalid baseline percent: {percent}"
            )));
        }
        let mut params = self.params();
        let param = params
            .get_mut(channel)
            .ok_or_else(|| PixieError::invalid_value(format!("invalid channel: {channel}")))?;
        param.baseline_percent = percent;
        Ok(())
    }

    // ── Persistent settings ─────────────────────────────────────────────────

    fn persistent(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.persistent.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True if a persistent key is set
    pub fn persistent_has(&self, key: &str) -> bool {
        self.persistent().contains_key(key)
    }

    /// Value of a persistent key
    pub fn persistent_get(&self, key: &str) -> Option<String> {
        self.persistent().get(key).cloned()
    }

    /// Set a persistent key
    pub fn persistent_set(&self, key: &str, value: &str) {
        self.persistent().insert(key.to_string(), value.to_string());
    }

    // ── Collaborators ───────────────────────────────────────────────────────

    /// MIB sink, if one is attached
    pub fn mib_sink(&self) -> Option<Arc<dyn MibSink>> {
        self.mib.clone()
    }

    /// MIB key prefix for this module
    pub fn mib_base(&self) -> String {
        mib::key(&["module", &self.config.number.to_string()])
    }

    /// Run control
    ///
    /// # Errors
    ///
    /// Returns error if no run control is attached.
    pub fn run_control(&self) -> Result<&dyn RunControl> {
        self.run_control
            .as_deref()
            .ok_or_else(|| PixieError::invalid_configuration("no run control attached"))
    }

    // ── Fixtures ────────────────────────────────────────────────────────────

    /// Create the fixture tree for the module's revision and board layout
    ///
    /// # Errors
    ///
    /// Returns error if a channel fixture cannot be created.
    pub fn init_fixtures(&mut self) -> Result<()> {
        let mut assembly = fixture::make_assembly(&self.config);
        debug!("{}: fixture: {}: init-channels", self.label(), assembly.label());
        assembly.init_channels(self)?;
        self.fixtures = Some(assembly);
        Ok(())
    }

    /// The fixture tree
    ///
    /// # Errors
    ///
    /// Returns error if `init_fixtures` has not run.
    pub fn fixtures(&self) -> Result<&dyn Assembly> {
        self.fixtures.as_deref().ok_or(PixieError::NoFixture)
    }

    /// Run `f` with the fixture tree and the module
    ///
    /// # Errors
    ///
    /// Returns error if there is no fixture tree or `f` fails.
    pub fn with_fixtures<T>(
        &mut self,
        f: impl FnOnce(&mut dyn Assembly, &Self) -> Result<T>,
    ) -> Result<T> {
        let mut assembly = self.fixtures.take().ok_or(PixieError::NoFixture)?;
        let result = f(assembly.as_mut(), self);
        self.fixtures = Some(assembly);
        result
    }

    /// Run `f` with one channel fixture and the module
    ///
    /// # Errors
    ///
    /// Returns error if the channel does not exist or `f` fails.
    pub fn with_channel<T>(
        &mut self,
        channel: usize,
        f: impl FnOnce(&mut dyn ChannelFixture, &Self) -> Result<T>,
    ) -> Result<T> {
        self.with_fixtures(|assembly, module| {
            let fixture = assembly
                .channels_mut()
                .get_mut(channel)
                .ok_or_else(|| PixieError::invalid_value(format!("invalid channel: {channel}")))?;
            f(fixture.as_mut(), module)
        })
    }

    /// Tell the fixtures the FIPPI FPGAs have been loaded
    ///
    /// # Errors
    ///
    /// Returns error if the fixture hook fails.
    pub fn fpga_fippi_loaded(&mut self) -> Result<()> {
        self.with_fixtures(|assembly, module| assembly.fpga_fippi_loaded(module))
    }

    /// Run the fixture boot sequence
    ///
    /// # Errors
    ///
    /// Returns error if the fixture hook fails.
    pub fn boot_fixtures(&mut self) -> Result<()> {
        self.with_fixtures(|assembly, module| assembly.boot(module))
    }

    /// Write every channel's offset DAC parameter to the hardware
    ///
    /// # Errors
    ///
    /// Returns error if the fixture hook fails.
    pub fn set_dacs(&mut self) -> Result<()> {
        self.with_fixtures(|assembly, module| assembly.set_dacs(module))
    }

    /// Capture an ADC trace on every channel
    ///
    /// # Errors
    ///
    /// Returns error if the fixture hook fails.
    pub fn get_traces(&mut self) -> Result<()> {
        self.with_fixtures(|assembly, module| assembly.get_traces(module))
    }

    /// Adjust the offset DACs so baselines sit at their target percentage
    ///
    /// # Errors
    ///
    /// Returns error if the fixture hook fails.
    pub fn adjust_offsets(&mut self) -> Result<()> {
        self.with_fixtures(|assembly, module| assembly.adjust_offsets(module))
    }

    /// Capture an ADC trace on one channel
    ///
    /// # Errors
    ///
    /// Returns error if the channel does not exist or the capture fails.
    pub fn acquire_adc(&mut self, channel: usize) -> Result<()> {
        self.with_channel(channel, |fixture, module| fixture.acquire_adc(module))
    }

    /// Copy the last ADC trace of a channel
    ///
    /// # Errors
    ///
    /// Returns error if the channel does not exist.
    pub fn read_adc(&self, channel: usize, buffer: &mut [AdcWord]) -> Result<usize> {
        let fixture = self
            .fixtures()?
            .channels()
            .get(channel)
            .ok_or_else(|| PixieError::invalid_value(format!("invalid channel: {channel}")))?;
        fixture.read_adc(buffer)
    }

    /// Capture `traces` ADC traces per channel and estimate each baseline
    ///
    /// # Errors
    ///
    /// Returns error if a capture fails.
    pub fn analyze_channel_baselines(&mut self, traces: usize) -> Result<Vec<baseline::Channel>> {
        self.with_fixtures(|assembly, module| assembly.analyze_channel_baselines(module, traces))
    }

    /// True if the fixtures provide a named test
    pub fn has_test(&self, test: &str) -> bool {
        self.fixtures.as_deref().is_some_and(|f| f.has_test(test))
    }

    /// Run a named fixture test
    ///
    /// # Errors
    ///
    /// Returns error if a hardware access fails during the test.
    pub fn run_test(&mut self, test: &str, out: &mut TestLog<'_>) -> Result<bool> {
        self.with_fixtures(|assembly, module| assembly.run_test(module, test, out))
    }

    /// Publish live fixture state to the MIB sink
    pub fn enable_mibs(&self) {
        if let Some(fixtures) = self.fixtures.as_deref() {
            fixtures.enable_mibs();
        }
    }

    /// Stop publishing live fixture state
    pub fn disable_mibs(&self) {
        if let Some(fixtures) = self.fixtures.as_deref() {
            fixtures.disable_mibs();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SimulatedBus;

    fn module(config: ModuleConfig) -> (Arc<SimulatedBus>, Module) {
        let bus = Arc::new(SimulatedBus::new());
        let module = Module::new(config, bus.clone()).expect("module");
        (bus, module)
    }

    #[test]
    fn rev_h_layout() {
        let config = ModuleConfig::rev_h(2, 0, &[BoardKind::Db04, BoardKind::Db04]);
        assert_eq!(config.channels.len(), 8);
        assert_eq!(config.boards[1].base, 4);
        config.validate().expect("valid");
    }

    #[test]
    fn overlapping_boards_rejected() {
        let mut config = ModuleConfig::rev_h(2, 0, &[BoardKind::Db04, BoardKind::Db04]);
        config.boards[1].base = 2;
        assert!(matches!(
            config.validate(),
            Err(PixieError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn select_port_keeps_shadow() {
        let (bus, module) = module(ModuleConfig::mainboard(2, 0, Revision::F, 16));
        module.select_port(2).expect("port");
        module.select_port(5).expect("port");
        assert_eq!(bus.writes_to(regs::CFG_CTRLCS), vec![2 << 19, 5 << 19]);
    }

    #[test]
    fn voffset_conversion() {
        assert_eq!(voffset_to_dac(0.0), OFFSET_DAC_MID);
        assert_eq!(voffset_to_dac(-1.5), 0);
        assert_eq!(voffset_to_dac(1.5), 65535);
        assert_eq!(voffset_to_dac(9.0), 65535);
    }

    #[test]
    fn channel_params() {
        let (_bus, module) = module(ModuleConfig::mainboard(2, 0, Revision::F, 4));
        module.set_voffset(1, -1.5).expect("voffset");
        assert_eq!(module.channel_params(1).expect("params").offset_dac, 0);
        assert!(module.set_offset_dac(9, 0).is_err());
        module.set_offset_dac(2, 65535).expect("full scale");
        assert!(module.set_offset_dac(2, 1 << 16).is_err());
        assert_eq!(module.channel_params(2).expect("params").offset_dac, 65535);
        assert!(module.set_baseline_percent(0, 120.0).is_err());
    }

    #[test]
    fn persistent_store() {
        let (_bus, module) = module(ModuleConfig::mainboard(2, 0, Revision::F, 4));
        assert!(!module.persistent_has("k"));
        module.persistent_set("k", "true");
        assert_eq!(module.persistent_get("k").as_deref(), Some("true"));
    }

    #[test]
    fn fixtures_required() {
        let (_bus, mut module) = module(ModuleConfig::mainboard(2, 0, Revision::F, 4));
        assert!(matches!(module.boot_fixtures(), Err(PixieError::NoFixture)));
        module.init_fixtures().expect("fixtures");
        module.boot_fixtures().expect("boot is a no-op on the mainboard");
    }

    #[test]
    fn timing_scale() {
        assert_eq!(Timing::IMMEDIATE.period(Duration::from_millis(6)), Duration::ZERO);
        assert_eq!(
            Timing::scaled(0.5).period(Duration::from_millis(6)),
            Duration::from_millis(3)
        );
    }
}
