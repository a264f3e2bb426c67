//! ADC serial port
//!
//! The ADCs of a board share one serial port driven by the board's FIPPI.
//! A command word selects the target ADCs with a channel mask, the register
//! and the data byte. The FIPPI clocks the command out and, for reads,
//! leaves the returned byte in `ADCFRAME`.

use crate::error::{PixieError, Result};
use crate::memory::HostBus;
use crate::module::Module;
use pixie_hw::{fippi, Word};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Read flag of a command word
pub const READ: Word = 1 << 23;

/// Channels a command can address
pub const MAX_CHANNELS: usize = 8;

/// Command word for `value` to register `reg` of the ADC on `channel`
///
/// # Errors
///
/// Returns error if the channel is not on the port.
pub fn command(channel: usize, reg: u32, value: u32) -> Result<Word> {
    if channel >= MAX_CHANNELS {
        return Err(PixieError::invalid_value(format!(
            "invalid ADC SPI channel: {channel}"
        )));
    }
    Ok(((1 << channel) << 24) | ((reg & 0xff) << 8) | (value & 0xff))
}

/// Shared ADC serial port of one board
#[derive(Debug)]
pub struct AdcSpiDriver {
    board: usize,
    clock_out: Duration,
    lock: Mutex<()>,
}

impl AdcSpiDriver {
    /// Driver for the port on `board`
    pub fn new(board: usize, clock_out: Duration) -> Self {
        Self {
            board,
            clock_out,
            lock: Mutex::new(()),
        }
    }

    /// Board the port serves
    pub fn board(&self) -> usize {
        self.board
    }

    /// Write a register of the ADC on `channel`
    ///
    /// # Errors
    ///
    /// Returns error if the channel is invalid or the bus write fails.
    pub fn write(&self, module: &Module, channel: usize, reg: u32, value: u32) -> Result<()> {
        let cmd = command(channel, reg, value)?;
        let _port = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(
            "{}: adc-spi: db={} write: chan={channel} reg={reg:#x} value={value:#x}",
            module.label(),
            self.board
        );
        self.send(module, cmd)
    }

    /// Read a register of the ADC on `channel`
    ///
    /// # Errors
    ///
    /// Returns error if the channel is invalid or a bus access fails.
    pub fn read(&self, module: &Module, channel: usize, reg: u32) -> Result<u32> {
        let cmd = command(channel, reg, 0)? | READ;
        let _port = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.send(module, cmd)?;
        let value = HostBus::fippi(module).read(fippi::addr(self.board, fippi::ADCFRAME))? & 0xff;
        debug!(
            "{}: adc-spi: db={} read: chan={channel} reg={reg:#x} value={value:#x}",
            module.label(),
            self.board
        );
        Ok(value)
    }

    fn send(&self, module: &Module, cmd: Word) -> Result<()> {
        HostBus::fippi(module).write(fippi::addr(self.board, fippi::ADCSPI), cmd)?;
        module.wait(self.clock_out);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SimulatedBus;
    use crate::fixture::BoardKind;
    use crate::module::{ModuleConfig, Timing};
    use pixie_hw::regs;
    use std::sync::Arc;

    #[test]
    fn command_layout() {
        assert_eq!(command(2, 0x14, 0x104).expect("cmd"), 0x0400_1404);
        assert!(command(8, 0, 0).is_err());
    }

    #[test]
    fn read_sets_flag_and_reads_frame() {
        let bus = Arc::new(SimulatedBus::new());
        let config = ModuleConfig::rev_h(2, 0, &[BoardKind::Db10, BoardKind::Db10])
            .with_timing(Timing::IMMEDIATE);
        let module = Module::new(config, bus.clone()).expect("module");
        let spi = AdcSpiDriver::new(1, Duration::from_millis(4));
        spi.read(&module, 3, 0x01).expect("read");
        assert_eq!(
            bus.writes_to(regs::EXT_MEM_TEST),
            vec![fippi::addr(1, fippi::ADCSPI), fippi::addr(1, fippi::ADCFRAME)]
        );
        assert_eq!(bus.writes_to(regs::WRT_DSP_MMA), vec![0x0880_0100]);
    }
}
