//! Shadowed FIPPI register
//!
//! Several channels share one FIPPI register, each owning a field of it. The
//! register is write-only from the host's point of view in normal operation,
//! so the driver keeps a shadow and updates fields with a read-modify-write
//! of the shadow under its lock.

use crate::error::{PixieError, Result};
use crate::memory::HostBus;
use crate::mib::{MibNode, MibValue};
use crate::module::Module;
use pixie_hw::{fippi, Address, Word};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// One FIPPI register shared by the channels of a board
#[derive(Debug)]
pub struct FippiRegister {
    name: String,
    addr: Address,
    shadow: Mutex<Word>,
    mib: MibNode,
}

impl FippiRegister {
    /// Driver for `reg` on FIPPI `device`
    pub fn new(module: &Module, name: &str, device: usize, reg: Address) -> Self {
        let mib_key = crate::mib::key(&[
            &super::board_mib_base(module, device),
            "fippi",
            name,
        ]);
        let mib = MibNode::new(module.mib_sink(), mib_key);
        mib.set(MibValue::Uint(0));
        Self {
            name: name.to_string(),
            addr: fippi::addr(device, reg),
            shadow: Mutex::new(0),
            mib,
        }
    }

    /// Register name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Host bus address
    pub fn addr(&self) -> Address {
        self.addr
    }

    /// Write the whole register
    ///
    /// # Errors
    ///
    /// Returns error if the bus write fails.
    pub fn write(&self, module: &Module, value: Word) -> Result<()> {
        let mut shadow = self.shadow.lock().unwrap_or_else(PoisonError::into_inner);
        self.store(module, &mut shadow, value)
    }

    /// Replace the bits in `mask` with those of `value`
    ///
    /// # Errors
    ///
    /// Returns error if the bus write fails.
    pub fn write_masked(&self, module: &Module, value: Word, mask: Word) -> Result<()> {
        let mut shadow = self.shadow.lock().unwrap_or_else(PoisonError::into_inner);
        let next = (*shadow & !mask) | (value & mask);
        self.store(module, &mut shadow, next)
    }

    /// Write a `bits` wide field starting at bit `base`
    ///
    /// # Errors
    ///
    /// Returns error if the field does not fit the register, the value does
    /// not fit the field or the bus write fails.
    pub fn write_field(&self, module: &Module, value: Word, base: u32, bits: u32) -> Result<()> {
        let mask = field_mask(base, bits)?;
        if value > mask >> base {
            return Err(PixieError::invalid_value(format!(
                "{}: field value too large: {value}",
                self.name
            )));
        }
        self.write_masked(module, value << base, mask)
    }

    /// Shadowed register value
    pub fn read(&self) -> Word {
        *self.shadow.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Shadowed value of a field
    ///
    /// # Errors
    ///
    /// Returns error if the field does not fit the register.
    pub fn read_field(&self, base: u32, bits: u32) -> Result<Word> {
        let mask = field_mask(base, bits)?;
        Ok((self.read() & mask) >> base)
    }

    /// Publish the shadow
    pub fn enable_mib(&self) {
        self.mib.enable();
    }

    /// Stop publishing the shadow
    pub fn disable_mib(&self) {
        self.mib.disable();
    }

    fn store(&self, module: &Module, shadow: &mut Word, value: Word) -> Result<()> {
        debug!(
            "{}: fippi: {}: write {:#x} = {value:#x}",
            module.label(),
            self.name,
            self.addr
        );
        HostBus::fippi(module).write(self.addr, value)?;
        *shadow = value;
        self.mib.set(MibValue::Uint(u64::from(value)));
        Ok(())
    }
}

fn field_mask(base: u32, bits: u32) -> Result<Word> {
    if bits == 0 || base + bits > Word::BITS {
        return Err(PixieError::invalid_value(format!(
            "invalid register field: base={base} bits={bits}"
        )));
    }
    Ok((Word::MAX >> (Word::BITS - bits)) << base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SimulatedBus;
    use crate::fixture::BoardKind;
    use crate::module::ModuleConfig;
    use pixie_hw::regs;
    use std::sync::Arc;

    #[test]
    fn fields_share_the_shadow() {
        let bus = Arc::new(SimulatedBus::new());
        let config = ModuleConfig::rev_h(2, 0, &[BoardKind::Db10]);
        let module = Module::new(config, bus.clone()).expect("module");
        let reg = FippiRegister::new(&module, "bitslip", 0, fippi::BITSLIP);
        reg.write_field(&module, 0x5, 4, 4).expect("field");
        reg.write_field(&module, 0xa, 12, 4).expect("field");
        assert_eq!(reg.read(), 0xa050);
        assert_eq!(reg.read_field(4, 4).expect("field"), 5);
        assert_eq!(
            bus.writes_to(regs::EXT_MEM_TEST),
            vec![fippi::BITSLIP, fippi::BITSLIP]
        );
        assert_eq!(bus.writes_to(regs::WRT_DSP_MMA), vec![0x0050, 0xa050]);
    }

    #[test]
    fn field_bounds() {
        assert!(field_mask(28, 8).is_err());
        assert!(field_mask(0, 0).is_err());
        assert_eq!(field_mask(0, 32).expect("mask"), Word::MAX);
        let bus = Arc::new(SimulatedBus::new());
        let config = ModuleConfig::rev_h(2, 0, &[BoardKind::Db10]);
        let module = Module::new(config, bus).expect("module");
        let reg = FippiRegister::new(&module, "adcctrl", 0, fippi::ADCCTRL);
        assert!(reg.write_field(&module, 16, 0, 4).is_err());
    }
}
