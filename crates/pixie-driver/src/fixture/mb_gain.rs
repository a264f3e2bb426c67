//! Motherboard gain latch
//!
//! The latch is shared by every channel of a board. A gain change is a
//! read-modify-write of the latch under its lock followed by the `CFG_DAC`
//! writes of the bytes that changed, on the board's I/O port.

use crate::error::{PixieError, Result};
use crate::mib::{MibNode, MibValue};
use crate::module::Module;
use pixie_hw::{gain, regs};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Gain latch of one board
#[derive(Debug)]
pub struct MbGainDriver {
    board: usize,
    clock_out: Duration,
    latch: Mutex<u16>,
    mib: MibNode,
}

impl MbGainDriver {
    /// Driver for the latch behind `board`
    pub fn new(module: &Module, board: usize, clock_out: Duration) -> Self {
        let mib = MibNode::new(
            module.mib_sink(),
            crate::mib::key(&[&super::board_mib_base(module, board), "gain", "latch"]),
        );
        mib.set(MibValue::Uint(u64::from(gain::LATCH_DEFAULT)));
        Self {
            board,
            clock_out,
            latch: Mutex::new(gain::LATCH_DEFAULT),
            mib,
        }
    }

    /// Current latch value
    pub fn latch(&self) -> u16 {
        *self.latch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the gain level of a board channel
    ///
    /// # Errors
    ///
    /// Returns error if the channel or level is out of range or a bus write
    /// fails. The latch is unchanged on error.
    pub fn set_gain(&self, module: &Module, db_channel: usize, level: u32) -> Result<()> {
        let Some(clear) = gain::MASK[0].get(db_channel).copied() else {
            return Err(PixieError::invalid_value(format!(
                "invalid gain channel: {db_channel}"
            )));
        };
        let set = usize::try_from(level)
            .ok()
            .and_then(|step| gain::MASK.get(step))
            .map(|masks| masks[db_channel])
            .ok_or_else(|| PixieError::invalid_value(format!("invalid gain level: {level}")))?;

        let mut latch = self.latch.lock().unwrap_or_else(PoisonError::into_inner);
        let next = (*latch | clear) & !set;
        debug!(
            "{}: mb-gain: db={} chan={db_channel} level={level} latch={:#06x} -> {next:#06x}",
            module.label(),
            self.board,
            *latch
        );
        if next == *latch {
            return Ok(());
        }
        let [lo, hi] = next.to_le_bytes();
        let [cur_lo, cur_hi] = latch.to_le_bytes();
        let port = u32::try_from(self.board + 1)
            .map_err(|_| PixieError::invalid_value(format!("invalid board: {}", self.board)))?;
        module.port_transaction(port, |module| {
            if lo != cur_lo {
                module.write_word(regs::CFG_DAC, gain::pio_word(gain::PIO_0, lo))?;
                module.wait(self.clock_out);
            }
            if hi != cur_hi {
                module.write_word(regs::CFG_DAC, gain::pio_word(gain::PIO_1, hi))?;
                module.wait(self.clock_out);
            }
            Ok(())
        })?;
        *latch = next;
        self.mib.set(MibValue::Uint(u64::from(next)));
        Ok(())
    }

    /// Gain level a board channel is at, from the latch
    pub fn level(&self, db_channel: usize) -> Option<u32> {
        let latch = self.latch();
        (0..gain::STEPS).find(|&step| {
            usize::try_from(step)
                .ok()
                .and_then(|s| gain::MASK.get(s))
                .and_then(|masks| masks.get(db_channel))
                .is_some_and(|bit| latch & bit == 0)
        })
    }

    /// Publish the latch
    pub fn enable_mib(&self) {
        self.mib.enable();
    }

    /// Stop publishing the latch
    pub fn disable_mib(&self) {
        self.mib.disable();
    }
}
