//! Control and status register
//!
//! The CSR at `CSR` (0x48) gates run enable, DSP download, reset and the
//! external FIFO watermark. Read-modify-write helpers are not atomic across
//! callers; a module's CSR sequences run from one control thread.

use crate::error::{PixieError, Result};
use crate::module::Module;
use pixie_hw::regs::{self, csr};
use pixie_hw::Word;
use tracing::{debug, warn};

/// Default number of polls for [`fifo_ready_wait`]
pub const FIFO_READY_POLLS: usize = 1000;

/// Read the CSR
///
/// # Errors
///
/// Returns error if the bus read fails.
pub fn read(module: &Module) -> Result<Word> {
    module.read_word(regs::CSR)
}

/// Write the CSR unconditionally
///
/// # Errors
///
/// Returns error if the bus write fails.
pub fn write(module: &Module, value: Word) -> Result<()> {
    debug!("{}: csr: write {value:#x}", module.label());
    module.write_word(regs::CSR, value)
}

/// Set the bits in `mask`
///
/// # Errors
///
/// Returns error if the bus access fails.
pub fn set(module: &Module, mask: Word) -> Result<()> {
    let value = read(module)?;
    write(module, value | mask)
}

/// Clear the bits in `mask`
///
/// # Errors
///
/// Returns error if the bus access fails.
pub fn clear(module: &Module, mask: Word) -> Result<()> {
    let value = read(module)?;
    write(module, value & !mask)
}

/// Write the power-up default
///
/// # Errors
///
/// Returns error if the bus write fails.
pub fn reset(module: &Module) -> Result<()> {
    write(module, csr::DEFAULT)
}

/// Poll until the external FIFO passes its watermark
///
/// # Errors
///
/// Returns [`PixieError::HardwareTimeout`] if the watermark bit is not set
/// within `polls` reads.
pub fn fifo_ready_wait(module: &Module, polls: usize) -> Result<()> {
    for _ in 0..polls {
        if read(module)? & csr::EXTFIFO_WML != 0 {
            return Ok(());
        }
    }
    Err(PixieError::hardware_timeout("external FIFO watermark", polls))
}

/// Bits held set for the life of a scope
///
/// The mask is set on construction and cleared when the guard drops, on
/// every exit path. Guards with disjoint masks nest without clobbering each
/// other because each clear is a read-modify-write of its own bits.
#[derive(Debug)]
pub struct BitGuard<'a> {
    module: &'a Module,
    mask: Word,
}

impl<'a> BitGuard<'a> {
    /// Set `mask` and hold it until the guard drops
    ///
    /// # Errors
    ///
    /// Returns error if the bits cannot be set. Nothing is held then.
    pub fn new(module: &'a Module, mask: Word) -> Result<Self> {
        set(module, mask)?;
        Ok(Self { module, mask })
    }

    /// Bits held
    pub fn mask(&self) -> Word {
        self.mask
    }
}

impl Drop for BitGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = clear(self.module, self.mask) {
            warn!(
                "{}: csr: failed to clear {:#x}: {e}",
                self.module.label(),
                self.mask
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SimulatedBus;
    use crate::module::{ModuleConfig, Revision};
    use std::sync::Arc;

    fn module() -> (Arc<SimulatedBus>, Module) {
        let bus = Arc::new(SimulatedBus::new());
        let config = ModuleConfig::mainboard(2, 0, Revision::F, 16);
        let module = Module::new(config, bus.clone()).expect("module");
        (bus, module)
    }

    #[test]
    fn set_then_clear_restores() {
        let (bus, module) = module();
        bus.poke(regs::CSR, 0x1001);
        set(&module, csr::PCIACTIVE).expect("set");
        clear(&module, csr::PCIACTIVE).expect("clear");
        assert_eq!(bus.peek(regs::CSR), 0x1001);
    }

    #[test]
    fn guard_releases_on_error_path() {
        let (bus, module) = module();
        let run = || -> Result<()> {
            let _guard = BitGuard::new(&module, csr::DSPDOWNLOAD)?;
            assert_eq!(bus.peek(regs::CSR) & csr::DSPDOWNLOAD, csr::DSPDOWNLOAD);
            Err(PixieError::invalid_value("abort"))
        };
        assert!(run().is_err());
        assert_eq!(bus.peek(regs::CSR), 0);
    }

    #[test]
    fn reset_writes_default() {
        let (bus, module) = module();
        bus.poke(regs::CSR, 0xffff);
        reset(&module).expect("reset");
        assert_eq!(bus.peek(regs::CSR), csr::DEFAULT);
    }

    #[test]
    fn fifo_wait_times_out() {
        let (bus, module) = module();
        let err = fifo_ready_wait(&module, 7).expect_err("never ready");
        assert!(matches!(err, PixieError::HardwareTimeout { polls: 7, .. }));
        assert_eq!(bus.reads_of(regs::CSR), 7);
    }

    #[test]
    fn fifo_wait_ready() {
        let (bus, module) = module();
        bus.poke(regs::CSR, csr::EXTFIFO_WML);
        fifo_ready_wait(&module, FIFO_READY_POLLS).expect("ready");
        assert_eq!(bus.reads_of(regs::CSR), 1);
    }
}
