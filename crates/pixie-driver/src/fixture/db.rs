//! Daughterboards
//!
//! A [`Board`] is one fitted daughterboard. It creates the channel fixtures
//! for its channels and owns the drivers they share. [`DbChannel`] carries
//! what every daughterboard channel has: its place on the board, the ADC
//! swap state and the trace buffer filled by `acquire_adc`. Board specific
//! channels wrap it and fall back to it for items they do not handle.

use super::{
    channel_mib_base, items, to_uint, unsupported, BoardConfig, BoardKind, BoardTiming,
    ChannelConfig, ChannelFixture,
};
use crate::error::{PixieError, Result};
use crate::memory::{HostBus, IO_BUFFER_ADDR};
use crate::mib::{MibNode, MibValue};
use crate::module::Module;
use pixie_hw::AdcWord;
use tracing::{debug, info};

/// Persistent setting holding the swap detection opt-out
pub const SWAP_DISABLED_KEY: &str = "adc_swap_disabled";

/// Dual-edge ADC sample order of a channel
///
/// Boot detection moves `Boot` to `Swapped` or `Unswapped`. A FIPPI reload
/// moves it back to `Boot`. `Disabled` is sticky until the opt-out is
/// cleared while still at `Boot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdcSwap {
    /// Detection is not run for this channel
    Disabled,
    /// Not yet detected
    Boot,
    /// Detected in order
    Unswapped,
    /// Detected swapped, corrected by the FIPPI
    Swapped,
}

impl AdcSwap {
    /// State label
    pub const fn label(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Boot => "boot",
            Self::Unswapped => "unswapped",
            Self::Swapped => "swapped",
        }
    }
}

/// One fitted daughterboard
pub trait Board: std::fmt::Debug + Send + Sync {
    /// Board layout
    fn config(&self) -> &BoardConfig;

    /// Create the fixture for board channel `offset`
    ///
    /// # Errors
    ///
    /// Returns error if the channel is not on the module.
    fn make_channel(&self, module: &Module, offset: usize) -> Result<Box<dyn ChannelFixture>>;

    /// Board boot, after swap detection. `channels` are this board's
    /// channel fixtures in offset order.
    ///
    /// # Errors
    ///
    /// Returns error if the board cannot be initialised.
    fn boot(&self, _module: &Module, _channels: &mut [Box<dyn ChannelFixture>]) -> Result<()> {
        Ok(())
    }

    /// Publish the state of shared drivers
    fn enable_mibs(&self) {}

    /// Stop publishing the state of shared drivers
    fn disable_mibs(&self) {}
}

/// Create the board for a layout entry
///
/// # Errors
///
/// Returns [`PixieError::InvalidConfiguration`] for a mainboard entry.
pub fn make_board(module: &Module, config: &BoardConfig) -> Result<Box<dyn Board>> {
    info!(
        "{}: fixture: db={} {} base={} channels={}",
        module.label(),
        config.number,
        config.kind,
        config.base,
        config.channels
    );
    match config.kind {
        BoardKind::Mainboard => Err(PixieError::invalid_configuration(format!(
            "invalid DB for afe-dbs: {}",
            config.kind
        ))),
        BoardKind::Db => Ok(Box::new(GenericDb::new(config.clone()))),
        BoardKind::Db04 => Ok(Box::new(super::db04::Db04::new(config.clone()))),
        BoardKind::Db10 => Ok(Box::new(super::db10::Db10::new(module, config.clone()))),
    }
}

/// Daughterboard with no board specific parts
#[derive(Debug)]
pub struct GenericDb {
    config: BoardConfig,
}

impl GenericDb {
    /// Create the board
    pub fn new(config: BoardConfig) -> Self {
        Self { config }
    }
}

impl Board for GenericDb {
    fn config(&self) -> &BoardConfig {
        &self.config
    }

    fn make_channel(&self, module: &Module, offset: usize) -> Result<Box<dyn ChannelFixture>> {
        Ok(Box::new(DbChannel::new(module, &self.config, offset)?))
    }
}

/// State common to every daughterboard channel
#[derive(Debug)]
pub struct DbChannel {
    channel: usize,
    config: ChannelConfig,
    board: usize,
    base: usize,
    offset: usize,
    timing: BoardTiming,
    swap: AdcSwap,
    swap_mib: MibNode,
    trace: Vec<AdcWord>,
    mib_base: String,
}

impl DbChannel {
    /// Fixture state for channel `offset` of a board
    ///
    /// # Errors
    ///
    /// Returns error if the channel is not on the module.
    pub fn new(module: &Module, board: &BoardConfig, offset: usize) -> Result<Self> {
        let channel = board.base + offset;
        let config = module.channel_config(channel)?.clone();
        let mib_base = channel_mib_base(module, channel);
        let mut db = Self {
            channel,
            config,
            board: board.number,
            base: board.base,
            offset,
            timing: board.kind.timing(),
            swap: AdcSwap::Boot,
            swap_mib: MibNode::new(module.mib_sink(), crate::mib::key(&[&mib_base, "adc-state"])),
            trace: Vec::new(),
            mib_base,
        };
        let disabled = module.persistent_get(&db.persistent_key(SWAP_DISABLED_KEY));
        if disabled.as_deref() == Some("true") {
            db.set_swap(AdcSwap::Disabled);
        } else {
            db.set_swap(AdcSwap::Boot);
        }
        Ok(db)
    }

    /// Board number
    pub fn board(&self) -> usize {
        self.board
    }

    /// First module channel of the board
    pub fn base(&self) -> usize {
        self.base
    }

    /// Channel offset on the board
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Board part timing
    pub fn timing(&self) -> BoardTiming {
        self.timing
    }

    /// MIB key prefix of the channel
    pub fn mib_base(&self) -> &str {
        &self.mib_base
    }

    /// ADC swap state
    pub fn swap(&self) -> AdcSwap {
        self.swap
    }

    /// Force the ADC swap state
    pub fn set_swap(&mut self, swap: AdcSwap) {
        self.swap = swap;
        self.swap_mib.set(MibValue::Text(swap.label().to_string()));
    }

    /// Last captured trace
    pub fn trace(&self) -> &[AdcWord] {
        &self.trace
    }
}

impl ChannelFixture for DbChannel {
    fn label(&self) -> &str {
        self.config.fixture.label()
    }

    fn channel(&self) -> usize {
        self.channel
    }

    fn config(&self) -> &ChannelConfig {
        &self.config
    }

    fn fpga_fippi_loaded(&mut self) {
        if matches!(self.swap, AdcSwap::Swapped | AdcSwap::Unswapped) {
            self.set_swap(AdcSwap::Boot);
        }
    }

    fn acquire_adc(&mut self, module: &Module) -> Result<()> {
        module.run_control()?.get_traces(module, self.channel)?;
        let size = self.config.max_adc_trace_length;
        let mut words = vec![0; size / 2];
        HostBus::dsp(module).read_block(IO_BUFFER_ADDR, &mut words)?;
        // Two samples per word, the earlier sample in the low half.
        self.trace.clear();
        self.trace.extend(words.iter().flat_map(|word| {
            let [b0, b1, b2, b3] = word.to_le_bytes();
            [AdcWord::from_le_bytes([b0, b1]), AdcWord::from_le_bytes([b2, b3])]
        }));
        debug!(
            "{}: db={} channel={}: acquired {} samples",
            module.label(),
            self.board,
            self.channel,
            self.trace.len()
        );
        Ok(())
    }

    fn read_adc(&self, buffer: &mut [AdcWord]) -> Result<usize> {
        let count = buffer.len().min(self.trace.len());
        buffer[..count].copy_from_slice(&self.trace[..count]);
        Ok(count)
    }

    fn get_bool(&self, item: &str) -> Result<bool> {
        match item {
            items::ADC_SWAP => Ok(self.swap == AdcSwap::Swapped),
            items::ADC_SWAP_DISABLE => Ok(self.swap == AdcSwap::Disabled),
            items::DAC_HAS_OFFSET => Ok(false),
            _ => Err(unsupported(&format!("no get support: bool: {item}"))),
        }
    }

    fn get_uint(&self, item: &str) -> Result<u32> {
        match item {
            items::DB_NUMBER => to_uint(item, self.board),
            items::DB_OFFSET => to_uint(item, self.offset),
            items::DB_BASE => to_uint(item, self.base),
            items::DAC_SETTLE_PERIOD => {
                u32::try_from(self.timing.dac_settle.as_millis()).map_err(|_| {
                    PixieError::invalid_value(format!("{item}: {:?}", self.timing.dac_settle))
                })
            }
            _ => Err(unsupported(&format!("no get support: uint: {item}"))),
        }
    }

    fn set_bool(&mut self, module: &Module, item: &str, value: bool) -> Result<()> {
        match item {
            items::ADC_SWAP_DISABLE => {
                if !matches!(self.swap, AdcSwap::Disabled | AdcSwap::Boot) {
                    return Err(PixieError::invalid_value(format!(
                        "{}: channel {}: DB swap state already set",
                        module.label(),
                        self.channel
                    )));
                }
                let key = self.persistent_key(SWAP_DISABLED_KEY);
                module.persistent_set(&key, if value { "true" } else { "false" });
                self.set_swap(if value { AdcSwap::Disabled } else { AdcSwap::Boot });
                Ok(())
            }
            items::ADC_SWAP => {
                if self.swap == AdcSwap::Boot {
                    self.set_swap(if value {
                        AdcSwap::Swapped
                    } else {
                        AdcSwap::Unswapped
                    });
                } else {
                    debug!(
                        "{}: channel {}: adc.swap ignored in state {}",
                        module.label(),
                        self.channel,
                        self.swap.label()
                    );
                }
                Ok(())
            }
            _ => Err(unsupported(&format!("no set support: bool: {item}"))),
        }
    }

    fn enable_mibs(&self) {
        self.swap_mib.enable();
    }

    fn disable_mibs(&self) {
        self.swap_mib.disable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SimulatedBus;
    use crate::module::{ModuleConfig, Timing};
    use std::sync::Arc;

    fn module() -> Module {
        let bus = Arc::new(SimulatedBus::new());
        let config = ModuleConfig::rev_h(2, 0, &[BoardKind::Db, BoardKind::Db])
            .with_timing(Timing::IMMEDIATE);
        Module::new(config, bus).expect("module")
    }

    #[test]
    fn identity_items() {
        let module = module();
        let board = module.config().boards[1].clone();
        let db = DbChannel::new(&module, &board, 2).expect("channel");
        assert_eq!(db.channel(), 6);
        assert_eq!(db.get_uint(items::DB_NUMBER).expect("number"), 1);
        assert_eq!(db.get_uint(items::DB_OFFSET).expect("offset"), 2);
        assert_eq!(db.get_uint(items::DB_BASE).expect("base"), 4);
        assert!(!db.has_feature(items::DAC_HAS_OFFSET));
        assert!(matches!(
            db.get_real("nope"),
            Err(PixieError::InvalidItem { .. })
        ));
    }

    #[test]
    fn swap_transitions() {
        let module = module();
        let board = module.config().boards[0].clone();
        let mut db = DbChannel::new(&module, &board, 0).expect("channel");
        assert_eq!(db.swap(), AdcSwap::Boot);
        db.set_bool(&module, items::ADC_SWAP, true).expect("swap");
        assert!(db.get_bool(items::ADC_SWAP).expect("swap"));
        // Once detected the state only changes on a FIPPI reload.
        db.set_bool(&module, items::ADC_SWAP, false).expect("ignored");
        assert_eq!(db.swap(), AdcSwap::Swapped);
        assert!(db.set_bool(&module, items::ADC_SWAP_DISABLE, true).is_err());
        db.fpga_fippi_loaded();
        assert_eq!(db.swap(), AdcSwap::Boot);
    }

    #[test]
    fn swap_disable_persists() {
        let module = module();
        let board = module.config().boards[0].clone();
        let mut db = DbChannel::new(&module, &board, 1).expect("channel");
        db.set_bool(&module, items::ADC_SWAP_DISABLE, true).expect("disable");
        assert_eq!(
            module.persistent_get("fixture.channel.1.DB.adc_swap_disabled").as_deref(),
            Some("true")
        );
        let again = DbChannel::new(&module, &board, 1).expect("channel");
        assert!(again.get_bool(items::ADC_SWAP_DISABLE).expect("disabled"));
        db.set_bool(&module, items::ADC_SWAP, true).expect("ignored");
        assert_eq!(db.swap(), AdcSwap::Disabled);
    }

    #[test]
    fn acquire_needs_run_control() {
        let module = module();
        let board = module.config().boards[0].clone();
        let mut db = DbChannel::new(&module, &board, 0).expect("channel");
        assert!(matches!(
            db.acquire_adc(&module),
            Err(PixieError::InvalidConfiguration { .. })
        ));
        let mut buffer = [0; 4];
        assert_eq!(db.read_adc(&mut buffer).expect("read"), 0);
    }
}
