//! DAC8531 offset DAC
//!
//! One per DB10 channel, written through the channel's FIPPI `FIPPI_DAC`
//! register. The FIPPI clocks the 24 bit frame out serially.

use crate::error::{PixieError, Result};
use crate::memory::HostBus;
use crate::mib::{MibNode, MibValue};
use crate::module::{Module, OFFSET_DAC_BITS};
use pixie_hw::{fippi, Address};
use std::time::Duration;
use tracing::debug;

/// Offset DAC of one DB10 channel
#[derive(Debug)]
pub struct Dac8531 {
    addr: Address,
    clock_out: Duration,
    value: Option<u32>,
    mib: MibNode,
}

impl Dac8531 {
    /// Driver for the DAC of board channel `offset` on `board`
    pub fn new(module: &Module, board: usize, offset: usize, clock_out: Duration, mib_base: &str) -> Self {
        Self {
            addr: fippi::channel_addr(board, offset, fippi::FIPPI_DAC),
            clock_out,
            value: None,
            mib: MibNode::new(module.mib_sink(), crate::mib::key(&[mib_base, "dac"])),
        }
    }

    /// Last value written
    pub fn value(&self) -> Option<u32> {
        self.value
    }

    /// Write the DAC
    ///
    /// # Errors
    ///
    /// Returns error if the value is out of range or the bus write fails.
    pub fn set_dac(&mut self, module: &Module, value: u32) -> Result<()> {
        if value > 1 << OFFSET_DAC_BITS {
            return Err(PixieError::invalid_value(format!(
                "invalid DAC offset: value={value}"
            )));
        }
        // PD1/PD0 zero: normal operation.
        let word = value << 1;
        debug!(
            "{}: dac8531: value={value:#x} write={word:#x} => {:#x}",
            module.label(),
            self.addr
        );
        HostBus::fippi(module).write(self.addr, word)?;
        self.value = Some(value);
        self.mib.set(MibValue::Uint(u64::from(value)));
        module.wait(self.clock_out);
        Ok(())
    }

    /// Publish the value
    pub fn enable_mib(&self) {
        self.mib.enable();
    }

    /// Stop publishing the value
    pub fn disable_mib(&self) {
        self.mib.disable();
    }
}
