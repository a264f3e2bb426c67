//! DB10 daughterboard
//!
//! AD9434 ADCs on a shared serial port, a DAC8531 offset DAC per channel,
//! the motherboard gain latch and a FIPPI bitslip register with a four bit
//! field per channel. The ADC sample order is fixed on this board so swap
//! detection never runs.

use super::ad9434::Ad9434;
use super::adc_spi::AdcSpiDriver;
use super::dac8531::Dac8531;
use super::db::{AdcSwap, Board, DbChannel};
use super::fippi_reg::FippiRegister;
use super::mb_gain::MbGainDriver;
use super::{events, items, BoardConfig, ChannelConfig, ChannelFixture};
use crate::error::{PixieError, Result};
use crate::mib::{MibNode, MibValue};
use crate::module::Module;
use pixie_hw::adc::TestMode;
use pixie_hw::{fippi, gain, AdcWord};
use std::sync::Arc;
use tracing::debug;

/// First bit of each board channel's bitslip field
pub const BITSLIP_BASE: [u32; 4] = [0, 4, 12, 8];

/// Width of a bitslip field
pub const BITSLIP_BITS: u32 = 4;

/// Bitslip settings a channel has
pub const BITSLIP_SETTINGS: u32 = 1 << BITSLIP_BITS;

/// DB10 board
#[derive(Debug)]
pub struct Db10 {
    config: BoardConfig,
    spi: Arc<AdcSpiDriver>,
    gain: Arc<MbGainDriver>,
    bitslip: Arc<FippiRegister>,
}

impl Db10 {
    /// Create the board and its shared drivers
    pub fn new(module: &Module, config: BoardConfig) -> Self {
        let timing = config.kind.timing();
        Self {
            spi: Arc::new(AdcSpiDriver::new(config.number, timing.spi_clock_out)),
            gain: Arc::new(MbGainDriver::new(module, config.number, timing.dac_clock_out)),
            bitslip: Arc::new(FippiRegister::new(module, "bitslip", config.number, fippi::BITSLIP)),
            config,
        }
    }
}

impl Board for Db10 {
    fn config(&self) -> &BoardConfig {
        &self.config
    }

    fn make_channel(&self, module: &Module, offset: usize) -> Result<Box<dyn ChannelFixture>> {
        let bitslip_base = BITSLIP_BASE.get(offset).copied().ok_or_else(|| {
            PixieError::invalid_configuration(format!("DB10: invalid channel offset: {offset}"))
        })?;
        let mut db = DbChannel::new(module, &self.config, offset)?;
        db.set_swap(AdcSwap::Disabled);
        let mib_base = db.mib_base().to_string();
        let timing = db.timing();
        let bitslip_mib = MibNode::new(module.mib_sink(), crate::mib::key(&[&mib_base, "bitslip"]));
        bitslip_mib.set(MibValue::Uint(0));
        let gain_mib = MibNode::new(module.mib_sink(), crate::mib::key(&[&mib_base, "gain", "level"]));
        gain_mib.set(MibValue::Uint(0));
        Ok(Box::new(Db10Channel {
            adc: Ad9434::new(module, Arc::clone(&self.spi), offset, &mib_base),
            dac: Dac8531::new(module, self.config.number, offset, timing.dac_clock_out, &mib_base),
            gain: Arc::clone(&self.gain),
            gain_level: 0,
            gain_mib,
            bitslip: Arc::clone(&self.bitslip),
            bitslip_base,
            bitslip_mib,
            db,
        }))
    }

    fn boot(&self, module: &Module, channels: &mut [Box<dyn ChannelFixture>]) -> Result<()> {
        for channel in channels {
            channel.event(module, events::ADC_INIT)?;
        }
        Ok(())
    }

    fn enable_mibs(&self) {
        self.gain.enable_mib();
        self.bitslip.enable_mib();
    }

    fn disable_mibs(&self) {
        self.gain.disable_mib();
        self.bitslip.disable_mib();
    }
}

/// DB10 channel
#[derive(Debug)]
pub struct Db10Channel {
    db: DbChannel,
    adc: Ad9434,
    dac: Dac8531,
    gain: Arc<MbGainDriver>,
    gain_level: u32,
    gain_mib: MibNode,
    bitslip: Arc<FippiRegister>,
    bitslip_base: u32,
    bitslip_mib: MibNode,
}

impl Db10Channel {
    /// ADC state string
    pub fn adc_state(&self) -> String {
        self.adc.state()
    }

    fn set_test_mode(&mut self, module: &Module, value: u32) -> Result<()> {
        let mode = TestMode::from_value(value).ok_or_else(|| {
            PixieError::invalid_value(format!(
                "{}: channel {}: invalid ADC test mode: {value}",
                module.label(),
                self.db.channel()
            ))
        })?;
        self.adc.set_test_mode(module, mode)
    }

    fn set_bitslip(&mut self, module: &Module, value: u32) -> Result<()> {
        let value = value & (BITSLIP_SETTINGS - 1);
        self.bitslip
            .write_field(module, value, self.bitslip_base, BITSLIP_BITS)?;
        self.bitslip_mib.set(MibValue::Uint(u64::from(value)));
        Ok(())
    }

    fn set_gain(&mut self, module: &Module, level: u32) -> Result<()> {
        if level >= gain::STEPS {
            return Err(PixieError::invalid_value(format!(
                "{}: channel {}: invalid gain level: {level}",
                module.label(),
                self.db.channel()
            )));
        }
        self.gain.set_gain(module, self.db.offset(), level)?;
        self.gain_level = level;
        self.gain_mib.set(MibValue::Uint(u64::from(level)));
        Ok(())
    }
}

impl ChannelFixture for Db10Channel {
    fn label(&self) -> &str {
        self.db.label()
    }

    fn channel(&self) -> usize {
        self.db.channel()
    }

    fn config(&self) -> &ChannelConfig {
        self.db.config()
    }

    fn set_dac(&mut self, module: &Module, value: u32) -> Result<()> {
        self.dac.set_dac(module, value)
    }

    fn acquire_adc(&mut self, module: &Module) -> Result<()> {
        self.db.acquire_adc(module)
    }

    fn read_adc(&self, buffer: &mut [AdcWord]) -> Result<usize> {
        self.db.read_adc(buffer)
    }

    fn event(&mut self, module: &Module, name: &str) -> Result<()> {
        match name {
            events::ADC_INIT => {
                debug!("{}: channel {}: adc init", module.label(), self.db.channel());
                self.adc.set_coupling(module, true)
            }
            _ => self.db.event(module, name),
        }
    }

    fn get_bool(&self, item: &str) -> Result<bool> {
        match item {
            items::DAC_HAS_OFFSET
            | items::ADC_HAS_TEST_MODE
            | items::ADC_HAS_SELF_TEST
            | items::ADC_HAS_BITSLIP
            | items::ADC_DEFAULT_INVERTED => Ok(true),
            items::ADC_TEST_MODE_RESULT_PASS => Ok(self.adc.self_test_pass()),
            _ => self.db.get_bool(item),
        }
    }

    fn get_uint(&self, item: &str) -> Result<u32> {
        match item {
            items::ADC_TEST_MODE => Ok(self.adc.test_mode() as u32),
            items::ADC_BITSLIP => self.bitslip.read_field(self.bitslip_base, BITSLIP_BITS),
            items::ADC_BITSLIP_BITS => Ok(BITSLIP_SETTINGS),
            items::GAIN_LEVEL => Ok(self.gain_level),
            _ => self.db.get_uint(item),
        }
    }

    fn set_bool(&mut self, module: &Module, item: &str, value: bool) -> Result<()> {
        match item {
            items::ADC_SWAP | items::ADC_SWAP_DISABLE => {
                debug!(
                    "{}: channel {}: DB10 has no ADC swap: {item}",
                    module.label(),
                    self.db.channel()
                );
                Ok(())
            }
            _ => self.db.set_bool(module, item, value),
        }
    }

    fn set_uint(&mut self, module: &Module, item: &str, value: u32) -> Result<()> {
        match item {
            items::ADC_TEST_MODE => self.set_test_mode(module, value),
            items::ADC_TEST_MODE_RESULT => {
                if value == 0 {
                    self.adc.set_test_result(None);
                } else {
                    let mode = TestMode::from_value(value).ok_or_else(|| {
                        PixieError::invalid_value(format!("invalid ADC test mode: {value}"))
                    })?;
                    self.adc.set_test_result(Some(mode));
                }
                Ok(())
            }
            items::ADC_BITSLIP => self.set_bitslip(module, value),
            items::GAIN_LEVEL => self.set_gain(module, value),
            _ => self.db.set_uint(module, item, value),
        }
    }

    fn self_test(&mut self, module: &Module) -> Result<()> {
        self.adc.self_test(module)
    }

    fn enable_mibs(&self) {
        self.db.enable_mibs();
        self.adc.enable_mib();
        self.dac.enable_mib();
        self.gain_mib.enable();
        self.bitslip_mib.enable();
    }

    fn disable_mibs(&self) {
        self.db.disable_mibs();
        self.adc.disable_mib();
        self.dac.disable_mib();
        self.gain_mib.disable();
        self.bitslip_mib.disable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SimulatedBus;
    use crate::fixture::BoardKind;
    use crate::module::{ModuleConfig, Timing};
    use pixie_hw::regs;

    fn setup() -> (Arc<SimulatedBus>, Module, Db10) {
        let bus = Arc::new(SimulatedBus::new());
        let config = ModuleConfig::rev_h(2, 0, &[BoardKind::Db10]).with_timing(Timing::IMMEDIATE);
        let module = Module::new(config, bus.clone()).expect("module");
        let board = Db10::new(&module, module.config().boards[0].clone());
        (bus, module, board)
    }

    #[test]
    fn swap_is_disabled() {
        let (_bus, module, board) = setup();
        let mut channel = board.make_channel(&module, 0).expect("channel");
        assert!(channel.get_bool(items::ADC_SWAP_DISABLE).expect("disabled"));
        channel.set_bool(&module, items::ADC_SWAP, true).expect("ignored");
        assert!(!channel.get_bool(items::ADC_SWAP).expect("swap"));
    }

    #[test]
    fn bitslip_fields_share_register() {
        let (bus, module, board) = setup();
        let mut ch2 = board.make_channel(&module, 2).expect("channel");
        let mut ch3 = board.make_channel(&module, 3).expect("channel");
        ch2.set_uint(&module, items::ADC_BITSLIP, 0x3).expect("bitslip");
        ch3.set_uint(&module, items::ADC_BITSLIP, 0x1f).expect("bitslip");
        assert_eq!(ch2.get_uint(items::ADC_BITSLIP).expect("bitslip"), 3);
        assert_eq!(ch3.get_uint(items::ADC_BITSLIP).expect("bitslip"), 0xf);
        assert_eq!(bus.writes_to(regs::WRT_DSP_MMA), vec![0x3000, 0x3f00]);
    }

    #[test]
    fn dac_through_fippi() {
        let (bus, module, board) = setup();
        let mut channel = board.make_channel(&module, 1).expect("channel");
        channel.set_dac(&module, 0x8000).expect("dac");
        assert_eq!(
            bus.writes_to(regs::EXT_MEM_TEST),
            vec![fippi::channel_addr(0, 1, fippi::FIPPI_DAC)]
        );
        assert_eq!(bus.writes_to(regs::WRT_DSP_MMA), vec![0x1_0000]);
        assert!(channel.set_dac(&module, (1 << 16) + 1).is_err());
    }

    #[test]
    fn test_mode_items() {
        let (_bus, module, board) = setup();
        let mut channel = board.make_channel(&module, 0).expect("channel");
        channel
            .set_uint(&module, items::ADC_TEST_MODE, TestMode::Checkerboard as u32)
            .expect("mode");
        assert_eq!(channel.get_uint(items::ADC_TEST_MODE).expect("mode"), 4);
        assert!(channel.set_uint(&module, items::ADC_TEST_MODE, 9).is_err());
        assert!(!channel.get_bool(items::ADC_TEST_MODE_RESULT_PASS).expect("pass"));
        channel
            .set_uint(&module, items::ADC_TEST_MODE_RESULT, 0)
            .expect("result");
        assert!(channel.get_bool(items::ADC_TEST_MODE_RESULT_PASS).expect("pass"));
    }

    #[test]
    fn gain_level_shared_latch() {
        let (bus, module, board) = setup();
        let mut ch0 = board.make_channel(&module, 0).expect("channel");
        let mut ch1 = board.make_channel(&module, 1).expect("channel");
        ch0.set_uint(&module, items::GAIN_LEVEL, 1).expect("gain");
        ch1.set_uint(&module, items::GAIN_LEVEL, 1).expect("gain");
        assert_eq!(board.gain.latch(), 0xffff & !(1 << 8) & !(1 << 10));
        assert_eq!(ch1.get_uint(items::GAIN_LEVEL).expect("level"), 1);
        assert!(ch0.set_uint(&module, items::GAIN_LEVEL, 2).is_err());
        assert_eq!(bus.writes_to(regs::CFG_DAC).len(), 2);
    }

    #[test]
    fn boot_dc_couples() {
        let (_bus, module, board) = setup();
        let mut channels: Vec<_> = (0..4)
            .map(|offset| board.make_channel(&module, offset).expect("channel"))
            .collect();
        board.boot(&module, &mut channels).expect("boot");
        assert!(channels.iter().all(|c| c.has_feature(items::ADC_HAS_TEST_MODE)));
    }
}
