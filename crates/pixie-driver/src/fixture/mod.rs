//! Analog front end fixtures
//!
//! A module's analog front end is either on the mainboard or on up to
//! [`MAX_DBS`] daughterboards. Callers only see two capability interfaces:
//!
//! - [`ChannelFixture`]: one per module channel. Offset DAC, ADC trace
//!   capture, events and named items (`get_bool("dac.has.offset")`, ...).
//! - [`Assembly`]: one per module. Lifecycle hooks the module calls at fixed
//!   points (`fpga_fippi_loaded`, `boot`, `set_dacs`, ...), baseline
//!   analysis and named tests.
//!
//! Board variants are a closed set, [`BoardKind`]. Parts shared by the
//! channels of one board (ADC serial port, motherboard gain latch, FIPPI
//! registers) are drivers held in an `Arc` by every channel on that board,
//! each driver serialising its own transactions.

pub mod ad9434;
pub mod adc_spi;
pub mod afe;
pub mod dac8531;
pub mod db;
pub mod db04;
pub mod db10;
pub mod fippi_reg;
pub mod mb_gain;

use crate::baseline::{self, BaselineConfig};
use crate::error::{PixieError, Result};
use crate::mib;
use crate::module::{Module, ModuleConfig};
use pixie_hw::AdcWord;
use std::fmt::Debug;
use std::time::Duration;
use tracing::{debug, Level};

pub use afe::AfeDbs;

/// Most daughterboards a module carries
pub const MAX_DBS: usize = 4;

/// Sink for test progress lines
pub type TestLog<'a> = dyn FnMut(&str, Level) + 'a;

/// Named items
pub mod items {
    /// Board number
    pub const DB_NUMBER: &str = "db.number";
    /// Channel offset on the board
    pub const DB_OFFSET: &str = "db.offset";
    /// First module channel of the board
    pub const DB_BASE: &str = "db.base";
    /// DAC settle period in milliseconds
    pub const DAC_SETTLE_PERIOD: &str = "dac.settle-period";
    /// The channel has an offset DAC
    pub const DAC_HAS_OFFSET: &str = "dac.has.offset";
    /// ADC dual-edge swap is corrected
    pub const ADC_SWAP: &str = "adc.swap";
    /// ADC swap detection is disabled
    pub const ADC_SWAP_DISABLE: &str = "adc.swap.disable";
    /// The ADC has test modes
    pub const ADC_HAS_TEST_MODE: &str = "adc.has.test-mode";
    /// The ADC has a self test
    pub const ADC_HAS_SELF_TEST: &str = "adc.has.self-test";
    /// The ADC input has a bitslip control
    pub const ADC_HAS_BITSLIP: &str = "adc.has.bitslip";
    /// The ADC output is inverted by default
    pub const ADC_DEFAULT_INVERTED: &str = "adc.default.inverted";
    /// ADC test mode
    pub const ADC_TEST_MODE: &str = "adc.test-mode";
    /// ADC test result, 0 for pass or the failing test mode
    pub const ADC_TEST_MODE_RESULT: &str = "adc.test-mode.result";
    /// The last ADC test passed
    pub const ADC_TEST_MODE_RESULT_PASS: &str = "adc.test-mode.result.pass";
    /// ADC input bitslip
    pub const ADC_BITSLIP: &str = "adc.bitslip";
    /// Number of bitslip settings
    pub const ADC_BITSLIP_BITS: &str = "adc.bitslip.bits";
    /// Motherboard gain level
    pub const GAIN_LEVEL: &str = "gain.level";
}

/// Named tests
pub mod tests {
    /// Drive the ADC test patterns and check the captured traces
    pub const ADC_PATTERN_CHECK: &str = "adc.pattern-check";
    /// Sweep the ADC input bitslip and centre it in the good window
    pub const ADC_SWEET_SPOT: &str = "adc.sweet-spot";
}

/// Events
pub mod events {
    /// Bring the ADC to its operating configuration
    pub const ADC_INIT: &str = "adc.init";
}

/// Front end board variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoardKind {
    /// Front end on the mainboard
    Mainboard,
    /// Daughterboard with no board specific support
    Db,
    /// DB04/DB05, offset DACs on the I/O FPGA serial port
    Db04,
    /// DB10, AD9434 ADCs with serial control and FIPPI offset DACs
    Db10,
}

impl BoardKind {
    /// Variant for a board label
    ///
    /// # Errors
    ///
    /// Returns error for an unknown label.
    pub fn from_label(label: &str) -> Result<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "MB" | "MAINBOARD" => Ok(Self::Mainboard),
            "DB04" | "DB05" => Ok(Self::Db04),
            "DB10" => Ok(Self::Db10),
            "DB01" | "DB02" | "DB06" | "DB07" => Ok(Self::Db),
            _ => Err(PixieError::invalid_configuration(format!(
                "invalid board label: {label}"
            ))),
        }
    }

    /// Board label
    pub const fn label(self) -> &'static str {
        match self {
            Self::Mainboard => "motherboard",
            Self::Db => "DB",
            Self::Db04 => "DB04",
            Self::Db10 => "DB10",
        }
    }

    /// Timing of the board's parts
    pub const fn timing(self) -> BoardTiming {
        match self {
            Self::Mainboard | Self::Db => BoardTiming::NONE,
            Self::Db04 => BoardTiming {
                dac_settle: Duration::from_millis(250),
                dac_clock_out: Duration::from_millis(6),
                spi_clock_out: Duration::ZERO,
            },
            Self::Db10 => BoardTiming {
                dac_settle: Duration::from_millis(100),
                dac_clock_out: Duration::from_millis(6),
                spi_clock_out: Duration::from_millis(4),
            },
        }
    }
}

impl std::fmt::Display for BoardKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Timing of a board's parts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardTiming {
    /// Time the analog offset takes to settle after a DAC update
    pub dac_settle: Duration,
    /// Time a DAC word takes to clock out
    pub dac_clock_out: Duration,
    /// Time an ADC serial port command takes to clock out
    pub spi_clock_out: Duration,
}

impl BoardTiming {
    /// No waits
    pub const NONE: Self = Self {
        dac_settle: Duration::ZERO,
        dac_clock_out: Duration::ZERO,
        spi_clock_out: Duration::ZERO,
    };
}

/// Per channel front end configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// ADC resolution
    pub adc_bits: u32,
    /// ADC sample rate in MSPS
    pub adc_msps: u32,
    /// ADC trace length in samples
    pub max_adc_trace_length: usize,
    /// Board variant the channel is on
    pub fixture: BoardKind,
}

impl ChannelConfig {
    /// Default configuration for a channel on a board variant
    pub fn new(fixture: BoardKind) -> Self {
        let (adc_bits, adc_msps) = match fixture {
            BoardKind::Db10 => (12, 500),
            _ => (14, 250),
        };
        Self {
            adc_bits,
            adc_msps,
            max_adc_trace_length: pixie_hw::MAX_ADC_TRACE_LENGTH,
            fixture,
        }
    }

    /// Check the configuration is usable
    ///
    /// # Errors
    ///
    /// Returns error for an unsupported resolution or trace length.
    pub fn validate(&self) -> Result<()> {
        if !(1..=16).contains(&self.adc_bits) {
            return Err(PixieError::invalid_configuration(format!(
                "invalid ADC bits: {}",
                self.adc_bits
            )));
        }
        if self.max_adc_trace_length == 0
            || self.max_adc_trace_length % 2 != 0
            || self.max_adc_trace_length > pixie_hw::MAX_ADC_TRACE_LENGTH
        {
            return Err(PixieError::invalid_configuration(format!(
                "invalid ADC trace length: {}",
                self.max_adc_trace_length
            )));
        }
        Ok(())
    }
}

/// One daughterboard fitted to a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardConfig {
    /// Board number, also its FIPPI device and port select
    pub number: usize,
    /// First module channel on the board
    pub base: usize,
    /// Channels on the board
    pub channels: usize,
    /// Board variant
    pub kind: BoardKind,
}

/// MIB key prefix for a module channel
pub fn channel_mib_base(module: &Module, channel: usize) -> String {
    mib::key(&[&module.mib_base(), "channel", &channel.to_string()])
}

/// MIB key prefix for a daughterboard
pub fn board_mib_base(module: &Module, board: usize) -> String {
    mib::key(&[&module.mib_base(), "db", &board.to_string()])
}

pub(crate) fn unsupported(what: &str) -> PixieError {
    PixieError::invalid_item(what)
}

pub(crate) fn to_uint(item: &str, value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| PixieError::invalid_value(format!("{item}: {value}")))
}

/// One module channel's front end
pub trait ChannelFixture: Debug + Send + Sync {
    /// Fixture label, the board label for daughterboard channels
    fn label(&self) -> &str;

    /// Module channel number
    fn channel(&self) -> usize;

    /// Channel configuration
    fn config(&self) -> &ChannelConfig;

    /// Prepare the fixture for use
    ///
    /// # Errors
    ///
    /// Returns error if the fixture cannot be prepared.
    fn open(&mut self, _module: &Module) -> Result<()> {
        Ok(())
    }

    /// Release the fixture
    fn close(&mut self) {}

    /// The module has gone online
    ///
    /// # Errors
    ///
    /// Returns error if the fixture cannot be brought online.
    fn online(&mut self, _module: &Module) -> Result<()> {
        Ok(())
    }

    /// The FIPPI FPGAs have been (re)loaded
    fn fpga_fippi_loaded(&mut self) {}

    /// Write the offset DAC
    ///
    /// # Errors
    ///
    /// Returns error if the fixture has no host controlled offset DAC or the
    /// write fails.
    fn set_dac(&mut self, _module: &Module, _value: u32) -> Result<()> {
        Err(unsupported("set DAC is using the DSP"))
    }

    /// Adjust the offset DAC of this channel only
    ///
    /// # Errors
    ///
    /// Returns error if the fixture cannot adjust its offset.
    fn adjust_offsetdac(&mut self, _module: &Module) -> Result<()> {
        Err(unsupported("adjust offsetdac is using the DSP"))
    }

    /// Capture an ADC trace
    ///
    /// # Errors
    ///
    /// Returns error if the fixture cannot capture traces or the capture fails.
    fn acquire_adc(&mut self, _module: &Module) -> Result<()> {
        Err(unsupported("ADC acquire is using the DSP"))
    }

    /// Copy the last ADC trace, returning the samples copied
    ///
    /// # Errors
    ///
    /// Returns error if the fixture does not hold traces.
    fn read_adc(&self, _buffer: &mut [AdcWord]) -> Result<usize> {
        Err(unsupported("read ADC is using the DSP"))
    }

    /// Handle a named event
    ///
    /// # Errors
    ///
    /// Returns error for an unknown event or a failed hardware update.
    fn event(&mut self, _module: &Module, name: &str) -> Result<()> {
        Err(unsupported(&format!("event: {name}")))
    }

    /// Read a boolean item
    ///
    /// # Errors
    ///
    /// Returns [`PixieError::InvalidItem`] for an unknown item.
    fn get_bool(&self, item: &str) -> Result<bool> {
        Err(unsupported(&format!("no get support: bool: {item}")))
    }

    /// Read an unsigned item
    ///
    /// # Errors
    ///
    /// Returns [`PixieError::InvalidItem`] for an unknown item.
    fn get_uint(&self, item: &str) -> Result<u32> {
        Err(unsupported(&format!("no get support: uint: {item}")))
    }

    /// Read a real item
    ///
    /// # Errors
    ///
    /// Returns [`PixieError::InvalidItem`] for an unknown item.
    fn get_real(&self, item: &str) -> Result<f64> {
        Err(unsupported(&format!("no get support: real: {item}")))
    }

    /// Write a boolean item
    ///
    /// # Errors
    ///
    /// Returns error for an unknown item or a rejected value.
    fn set_bool(&mut self, _module: &Module, item: &str, _value: bool) -> Result<()> {
        Err(unsupported(&format!("no set support: bool: {item}")))
    }

    /// Write an unsigned item
    ///
    /// # Errors
    ///
    /// Returns error for an unknown item or a rejected value.
    fn set_uint(&mut self, _module: &Module, item: &str, _value: u32) -> Result<()> {
        Err(unsupported(&format!("no set support: uint: {item}")))
    }

    /// Write a real item
    ///
    /// # Errors
    ///
    /// Returns error for an unknown item or a rejected value.
    fn set_real(&mut self, _module: &Module, item: &str, _value: f64) -> Result<()> {
        Err(unsupported(&format!("no set support: real: {item}")))
    }

    /// Run the built-in hardware check
    ///
    /// The outcome is recorded, not returned. Errors are bus failures.
    ///
    /// # Errors
    ///
    /// Returns error if a hardware access fails.
    fn self_test(&mut self, _module: &Module) -> Result<()> {
        Ok(())
    }

    /// Publish live state to the MIB sink
    fn enable_mibs(&self) {}

    /// Stop publishing live state
    fn disable_mibs(&self) {}

    /// Key for a persistent setting of this channel
    fn persistent_key(&self, item: &str) -> String {
        format!("fixture.channel.{}.{}.{item}", self.channel(), self.label())
    }

    /// Feature probe: a boolean item that is `true`, unknown items are `false`
    fn has_feature(&self, item: &str) -> bool {
        self.get_bool(item).unwrap_or(false)
    }
}

/// A module's front end as a whole
///
/// Every hook has a no-op default.
pub trait Assembly: Debug + Send + Sync {
    /// Assembly label
    fn label(&self) -> &str;

    /// Channel fixtures, indexed by module channel
    fn channels(&self) -> &[Box<dyn ChannelFixture>];

    /// Channel fixtures, indexed by module channel
    fn channels_mut(&mut self) -> &mut [Box<dyn ChannelFixture>];

    /// Create the channel fixtures
    ///
    /// # Errors
    ///
    /// Returns error if a fixture cannot be created.
    fn init_channels(&mut self, _module: &Module) -> Result<()> {
        Ok(())
    }

    /// The FIPPI FPGAs have been loaded
    ///
    /// # Errors
    ///
    /// Returns error if the hook fails.
    fn fpga_fippi_loaded(&mut self, _module: &Module) -> Result<()> {
        Ok(())
    }

    /// The module has booted
    ///
    /// # Errors
    ///
    /// Returns error if the front end cannot be initialised.
    fn boot(&mut self, _module: &Module) -> Result<()> {
        Ok(())
    }

    /// Write every channel's offset DAC parameter to the hardware
    ///
    /// # Errors
    ///
    /// Returns error if a DAC write fails.
    fn set_dacs(&mut self, _module: &Module) -> Result<()> {
        Ok(())
    }

    /// Capture an ADC trace on every channel
    ///
    /// # Errors
    ///
    /// Returns error if a capture fails.
    fn get_traces(&mut self, _module: &Module) -> Result<()> {
        Ok(())
    }

    /// Bring every channel's baseline to its target
    ///
    /// # Errors
    ///
    /// Returns error if a capture or DAC write fails.
    fn adjust_offsets(&mut self, _module: &Module) -> Result<()> {
        Ok(())
    }

    /// Estimator tuning for baseline analysis
    fn baseline_config(&self) -> BaselineConfig {
        BaselineConfig::default()
    }

    /// Capture `traces` traces per channel and estimate each baseline
    ///
    /// # Errors
    ///
    /// Returns error if a capture fails.
    fn analyze_channel_baselines(
        &mut self,
        module: &Module,
        traces: usize,
    ) -> Result<Vec<baseline::Channel>> {
        let config = self.baseline_config();
        let mut baselines: Vec<_> = self
            .channels()
            .iter()
            .map(|fixture| {
                let mut baseline = baseline::Channel::new(config);
                baseline.start(fixture.channel(), fixture.config().adc_bits);
                baseline
            })
            .collect();
        for _ in 0..traces {
            self.get_traces(module)?;
            for (fixture, baseline) in self.channels().iter().zip(baselines.iter_mut()) {
                let mut trace = vec![0; fixture.config().max_adc_trace_length];
                let samples = fixture.read_adc(&mut trace)?;
                baseline.update(&trace[..samples]);
            }
        }
        for baseline in &mut baselines {
            baseline.end();
            debug!(
                "{}: analyze-baselines: channel={:?} baseline={:?}",
                module.label(),
                baseline.number(),
                baseline.baseline()
            );
        }
        Ok(baselines)
    }

    /// True if the assembly provides a named test
    fn has_test(&self, _test: &str) -> bool {
        false
    }

    /// Run a named test, returning its verdict
    ///
    /// # Errors
    ///
    /// Returns error if a hardware access fails during the test.
    fn run_test(&mut self, _module: &Module, test: &str, out: &mut TestLog<'_>) -> Result<bool> {
        out(&format!("invalid test: {test}"), Level::ERROR);
        Ok(false)
    }

    /// Publish live state to the MIB sink
    fn enable_mibs(&self) {
        for fixture in self.channels() {
            fixture.enable_mibs();
        }
    }

    /// Stop publishing live state
    fn disable_mibs(&self) {
        for fixture in self.channels() {
            fixture.disable_mibs();
        }
    }
}

/// Create the assembly for a module's revision
pub fn make_assembly(config: &ModuleConfig) -> Box<dyn Assembly> {
    if config.revision.has_daughterboards() {
        Box::new(AfeDbs::new())
    } else {
        Box::new(Mainboard::new())
    }
}

/// Mainboard front end channel
///
/// Offsets and traces are handled by the DSP on these modules.
#[derive(Debug)]
pub struct MainboardChannel {
    channel: usize,
    config: ChannelConfig,
}

impl MainboardChannel {
    /// Create a channel fixture
    pub fn new(channel: usize, config: ChannelConfig) -> Self {
        Self { channel, config }
    }
}

impl ChannelFixture for MainboardChannel {
    fn label(&self) -> &str {
        BoardKind::Mainboard.label()
    }

    fn channel(&self) -> usize {
        self.channel
    }

    fn config(&self) -> &ChannelConfig {
        &self.config
    }
}

/// Mainboard front end assembly
#[derive(Debug, Default)]
pub struct Mainboard {
    channels: Vec<Box<dyn ChannelFixture>>,
}

impl Mainboard {
    /// Create an empty assembly
    pub fn new() -> Self {
        Self::default()
    }
}

impl Assembly for Mainboard {
    fn label(&self) -> &str {
        "mainboard"
    }

    fn channels(&self) -> &[Box<dyn ChannelFixture>] {
        &self.channels
    }

    fn channels_mut(&mut self) -> &mut [Box<dyn ChannelFixture>] {
        &mut self.channels
    }

    fn init_channels(&mut self, module: &Module) -> Result<()> {
        self.channels = module
            .config()
            .channels
            .iter()
            .enumerate()
            .map(|(channel, config)| {
                Box::new(MainboardChannel::new(channel, config.clone())) as Box<dyn ChannelFixture>
            })
            .collect();
        for fixture in &mut self.channels {
            fixture.open(module)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;
    use crate::backends::SimulatedBus;
    use crate::module::Revision;
    use std::sync::Arc;

    #[test]
    fn labels_map_to_variants() {
        assert_eq!(BoardKind::from_label("DB04").expect("db04"), BoardKind::Db04);
        assert_eq!(BoardKind::from_label("db05").expect("db05"), BoardKind::Db04);
        assert_eq!(BoardKind::from_label("DB06").expect("db06"), BoardKind::Db);
        assert_eq!(BoardKind::from_label("DB10").expect("db10"), BoardKind::Db10);
        assert!(BoardKind::from_label("DB99").is_err());
    }

    #[test]
    fn board_timing() {
        assert_eq!(BoardKind::Db04.timing().dac_settle, Duration::from_millis(250));
        assert_eq!(BoardKind::Db10.timing().dac_settle, Duration::from_millis(100));
        assert_eq!(BoardKind::Db.timing(), BoardTiming::NONE);
    }

    #[test]
    fn mainboard_channel_ops_unsupported() {
        let bus = Arc::new(SimulatedBus::new());
        let config = ModuleConfig::mainboard(2, 0, Revision::F, 4);
        let mut module = Module::new(config, bus).expect("module");
        module.init_fixtures().expect("fixtures");
        assert!(matches!(
            module.acquire_adc(0),
            Err(PixieError::InvalidItem { .. })
        ));
        assert!(!module.has_test(tests::ADC_PATTERN_CHECK));
        let fixtures = module.fixtures().expect("fixtures");
        assert_eq!(fixtures.channels().len(), 4);
        assert!(!fixtures.channels()[0].has_feature(items::DAC_HAS_OFFSET));
        assert_eq!(
            fixtures.channels()[3].persistent_key("x"),
            "fixture.channel.3.motherboard.x"
        );
    }

    #[test]
    fn unknown_test_logs_error() {
        let bus = Arc::new(SimulatedBus::new());
        let config = ModuleConfig::mainboard(2, 0, Revision::F, 4);
        let mut module = Module::new(config, bus).expect("module");
        module.init_fixtures().expect("fixtures");
        let mut lines = Vec::new();
        let passed = module
            .run_test("nope", &mut |line: &str, level| lines.push((line.to_string(), level)))
            .expect("run");
        assert!(!passed);
        assert_eq!(lines[0].1, Level::ERROR);
    }
}
