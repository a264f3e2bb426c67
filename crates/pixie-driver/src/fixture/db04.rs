//! DB04 and DB05 daughterboards
//!
//! Offset DACs sit on the I/O FPGA serial port behind `CFG_DAC`, selected
//! per board with the port field of `CFG_CTRLCS`. One DAC serves board
//! channels 0..3 and a second 4..7.

use super::db::{Board, DbChannel};
use super::{items, BoardConfig, ChannelConfig, ChannelFixture};
use crate::error::{PixieError, Result};
use crate::module::{Module, OFFSET_DAC_BITS};
use pixie_hw::{regs, AdcWord, Word};
use tracing::debug;

/// `CFG_DAC` word setting the DAC output of board channel `offset`
///
/// The PCB routes the ADC inputs so DAC outputs A..D map onto channel
/// offsets 2, 0, 1, 3.
pub fn dac_word(offset: usize, value: u32) -> Word {
    let addr: Word = 0x20 | (Word::from(offset < 4) << 1);
    let output: Word = match offset % 4 {
        0 => 1,
        1 => 2,
        2 => 0,
        _ => 3,
    };
    (addr << 24) | ((0x30 + output) << 16) | (value & 0xffff)
}

/// DB04 board
#[derive(Debug)]
pub struct Db04 {
    config: BoardConfig,
}

impl Db04 {
    /// Create the board
    pub fn new(config: BoardConfig) -> Self {
        Self { config }
    }
}

impl Board for Db04 {
    fn config(&self) -> &BoardConfig {
        &self.config
    }

    fn make_channel(&self, module: &Module, offset: usize) -> Result<Box<dyn ChannelFixture>> {
        Ok(Box::new(Db04Channel {
            db: DbChannel::new(module, &self.config, offset)?,
        }))
    }
}

/// DB04 channel
#[derive(Debug)]
pub struct Db04Channel {
    db: DbChannel,
}

impl ChannelFixture for Db04Channel {
    fn label(&self) -> &str {
        self.db.label()
    }

    fn channel(&self) -> usize {
        self.db.channel()
    }

    fn config(&self) -> &ChannelConfig {
        self.db.config()
    }

    fn fpga_fippi_loaded(&mut self) {
        self.db.fpga_fippi_loaded();
    }

    fn set_dac(&mut self, module: &Module, value: u32) -> Result<()> {
        if value >= 1 << OFFSET_DAC_BITS {
            return Err(PixieError::invalid_value(format!(
                "DB04: invalid DAC offset: channel={} value={value}",
                self.db.channel()
            )));
        }
        let port = u32::try_from(self.db.board() + 1)
            .map_err(|_| PixieError::invalid_value(format!("invalid board: {}", self.db.board())))?;
        let word = dac_word(self.db.offset(), value);
        debug!(
            "{}: db04: db={} db-channel={} value={value:#x} write={word:#x}",
            module.label(),
            self.db.board(),
            self.db.offset()
        );
        let clock_out = self.db.timing().dac_clock_out;
        module.port_transaction(port, |module| {
            module.write_word(regs::CFG_DAC, word)?;
            module.wait(clock_out);
            Ok(())
        })
    }

    fn acquire_adc(&mut self, module: &Module) -> Result<()> {
        self.db.acquire_adc(module)
    }

    fn read_adc(&self, buffer: &mut [AdcWord]) -> Result<usize> {
        self.db.read_adc(buffer)
    }

    fn get_bool(&self, item: &str) -> Result<bool> {
        match item {
            items::DAC_HAS_OFFSET => Ok(true),
            _ => self.db.get_bool(item),
        }
    }

    fn get_uint(&self, item: &str) -> Result<u32> {
        self.db.get_uint(item)
    }

    fn set_bool(&mut self, module: &Module, item: &str, value: bool) -> Result<()> {
        self.db.set_bool(module, item, value)
    }

    fn enable_mibs(&self) {
        self.db.enable_mibs();
    }

    fn disable_mibs(&self) {
        self.db.disable_mibs();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SimulatedBus;
    use crate::fixture::BoardKind;
    use crate::module::{ModuleConfig, Timing};
    use std::sync::Arc;

    #[test]
    fn dac_routing() {
        assert_eq!(dac_word(0, 0x1234), 0x2231_1234);
        assert_eq!(dac_word(1, 0), 0x2232_0000);
        assert_eq!(dac_word(2, 0), 0x2230_0000);
        assert_eq!(dac_word(3, 0), 0x2233_0000);
        assert_eq!(dac_word(4, 0), 0x2031_0000);
    }

    #[test]
    fn set_dac_selects_board_port() {
        let bus = Arc::new(SimulatedBus::new());
        let config = ModuleConfig::rev_h(2, 0, &[BoardKind::Db04, BoardKind::Db04])
            .with_timing(Timing::IMMEDIATE);
        let module = Module::new(config, bus.clone()).expect("module");
        let board = Db04::new(module.config().boards[1].clone());
        let mut channel = board.make_channel(&module, 3).expect("channel");
        channel.set_dac(&module, 0x8000).expect("dac");
        assert_eq!(bus.writes_to(regs::CFG_CTRLCS), vec![2 << 19]);
        assert_eq!(bus.writes_to(regs::CFG_DAC), vec![0x2233_8000]);
        assert!(channel.set_dac(&module, 1 << 16).is_err());
        assert!(channel.has_feature(items::DAC_HAS_OFFSET));
        assert_eq!(channel.get_uint(items::DAC_SETTLE_PERIOD).expect("settle"), 250);
    }
}
