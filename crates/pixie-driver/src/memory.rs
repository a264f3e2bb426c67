//! Host bus memory access
//!
//! Module-internal memory is reached through a two register window: the
//! address is latched by writing `EXT_MEM_TEST` and data moves through
//! `WRT_DSP_MMA`, which auto-increments the latched address. DSP memory is
//! only reachable while the host bus is held. FIPPI registers sit on the FPGA
//! side of the bus and do not need it.
//!
//! Every transfer holds the module bus lock so the address latch and the data
//! accesses that depend on it are never split by another thread.

use crate::error::Result;
use crate::hbr::HostBusRequest;
use crate::module::Module;
use pixie_hw::{regs, Address, Word};
use tracing::debug;

/// DSP I/O buffer, where control tasks leave their results
pub const IO_BUFFER_ADDR: Address = 0x0005_0000;

/// Memory reached through the host bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// DSP internal memory, needs the host bus
    Dsp,
    /// FIPPI registers
    Fippi,
}

impl Target {
    fn hold(self) -> bool {
        matches!(self, Self::Dsp)
    }
}

/// Host bus window onto one kind of module memory
#[derive(Debug, Clone, Copy)]
pub struct HostBus<'a> {
    module: &'a Module,
    target: Target,
}

impl<'a> HostBus<'a> {
    /// Access DSP memory
    pub fn dsp(module: &'a Module) -> Self {
        Self {
            module,
            target: Target::Dsp,
        }
    }

    /// Access FIPPI registers
    pub fn fippi(module: &'a Module) -> Self {
        Self {
            module,
            target: Target::Fippi,
        }
    }

    /// Memory accessed
    pub fn target(&self) -> Target {
        self.target
    }

    /// Read one word
    ///
    /// # Errors
    ///
    /// Returns error if a bus access fails.
    pub fn read(&self, addr: Address) -> Result<Word> {
        let _bus = self.module.lock_bus();
        let _hbr = HostBusRequest::new(self.module, self.target.hold())?;
        self.module.write_word(regs::EXT_MEM_TEST, addr)?;
        self.module.read_word(regs::WRT_DSP_MMA)
    }

    /// Write one word
    ///
    /// # Errors
    ///
    /// Returns error if a bus access fails.
    pub fn write(&self, addr: Address, value: Word) -> Result<()> {
        let _bus = self.module.lock_bus();
        let _hbr = HostBusRequest::new(self.module, self.target.hold())?;
        self.module.write_word(regs::EXT_MEM_TEST, addr)?;
        self.module.write_word(regs::WRT_DSP_MMA, value)
    }

    /// Fill `buffer` from consecutive words starting at `addr`
    ///
    /// # Errors
    ///
    /// Returns error if a bus access fails.
    pub fn read_block(&self, addr: Address, buffer: &mut [Word]) -> Result<()> {
        debug!(
            "{}: {:?} read: addr={addr:#x} length={}",
            self.module.label(),
            self.target,
            buffer.len()
        );
        let _bus = self.module.lock_bus();
        let _hbr = HostBusRequest::new(self.module, self.target.hold())?;
        self.module.write_word(regs::EXT_MEM_TEST, addr)?;
        for word in buffer.iter_mut() {
            *word = self.module.read_word(regs::WRT_DSP_MMA)?;
        }
        Ok(())
    }

    /// Write `values` to consecutive words starting at `addr`
    ///
    /// # Errors
    ///
    /// Returns error if a bus access fails.
    pub fn write_block(&self, addr: Address, values: &[Word]) -> Result<()> {
        let _bus = self.module.lock_bus();
        let _hbr = HostBusRequest::new(self.module, self.target.hold())?;
        self.module.write_word(regs::EXT_MEM_TEST, addr)?;
        for value in values {
            self.module.write_word(regs::WRT_DSP_MMA, *value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SimulatedBus;
    use crate::module::{ModuleConfig, Revision};
    use pixie_hw::regs::hbr;
    use std::sync::Arc;

    fn module() -> (Arc<SimulatedBus>, Module) {
        let bus = Arc::new(SimulatedBus::new());
        let config = ModuleConfig::mainboard(2, 0, Revision::F, 16);
        let module = Module::new(config, bus.clone()).expect("module");
        (bus, module)
    }

    #[test]
    fn dsp_access_holds_the_bus() {
        let (bus, module) = module();
        HostBus::dsp(&module).write(0x4_0000, 7).expect("write");
        let writes: Vec<_> = bus
            .log()
            .into_iter()
            .filter(|r| r.access.is_write())
            .map(|r| r.access.addr())
            .collect();
        assert_eq!(
            writes,
            vec![
                regs::REQUEST_HBR,
                regs::EXT_MEM_TEST,
                regs::WRT_DSP_MMA,
                regs::HBR_DONE
            ]
        );
        assert_eq!(bus.writes_to(regs::HBR_DONE), vec![hbr::RELEASE]);
    }

    #[test]
    fn fippi_access_leaves_the_bus() {
        let (bus, module) = module();
        HostBus::fippi(&module).read(0x80_0404).expect("read");
        assert!(bus.writes_to(regs::REQUEST_HBR).is_empty());
        assert_eq!(bus.writes_to(regs::EXT_MEM_TEST), vec![0x80_0404]);
    }

    #[test]
    fn block_read_latches_once() {
        let (bus, module) = module();
        let mut buffer = [0; 16];
        HostBus::dsp(&module)
            .read_block(IO_BUFFER_ADDR, &mut buffer)
            .expect("read");
        assert_eq!(bus.writes_to(regs::EXT_MEM_TEST), vec![IO_BUFFER_ADDR]);
        assert_eq!(bus.reads_of(regs::WRT_DSP_MMA), 16);
    }

    #[test]
    fn block_write_streams_after_one_latch() {
        let (bus, module) = module();
        HostBus::dsp(&module)
            .write_block(0x4_0000, &[1, 2, 3])
            .expect("write");
        assert_eq!(bus.writes_to(regs::EXT_MEM_TEST), vec![0x4_0000]);
        assert_eq!(bus.writes_to(regs::WRT_DSP_MMA), vec![1, 2, 3]);
        assert_eq!(bus.writes_to(regs::REQUEST_HBR), vec![hbr::REQUEST]);
    }
}
