//! Host bus arbitration
//!
//! The host reaches the DSP's internal memory only while it holds the host
//! bus. Holding is requested by writing [`hbr::REQUEST`] to `REQUEST_HBR` and
//! given back by writing [`hbr::RELEASE`] to `HBR_DONE`. The protocol does not
//! arbitrate between modules.

use crate::error::Result;
use crate::module::Module;
use pixie_hw::regs::{self, hbr};
use tracing::warn;

/// A hold on a module's host bus for the life of a scope
///
/// The hold flag lives here. `request` and `release` only touch the bus
/// when the flag changes, or when forced. Dropping the request releases the
/// bus if it is held.
#[derive(Debug)]
pub struct HostBusRequest<'a> {
    module: &'a Module,
    holding: bool,
}

impl<'a> HostBusRequest<'a> {
    /// Create a request, taking the bus now if `hold`
    ///
    /// # Errors
    ///
    /// Returns error if the request write fails.
    pub fn new(module: &'a Module, hold: bool) -> Result<Self> {
        let mut request = Self {
            module,
            holding: false,
        };
        if hold {
            request.request(false)?;
        }
        Ok(request)
    }

    /// True while the bus is held
    pub fn is_holding(&self) -> bool {
        self.holding
    }

    /// Take the bus
    ///
    /// # Errors
    ///
    /// Returns error if the request write fails.
    pub fn request(&mut self, force: bool) -> Result<()> {
        if force || !self.holding {
            self.module.write_word(regs::REQUEST_HBR, hbr::REQUEST)?;
            self.holding = true;
        }
        Ok(())
    }

    /// Give the bus back
    ///
    /// # Errors
    ///
    /// Returns error if the release write fails.
    pub fn release(&mut self, force: bool) -> Result<()> {
        if force || self.holding {
            self.module.write_word(regs::HBR_DONE, hbr::RELEASE)?;
            self.holding = false;
        }
        Ok(())
    }
}

impl Drop for HostBusRequest<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.release(false) {
            warn!("{}: hbr: release failed: {e}", self.module.label());
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
    fn repeated_request_writes_once() {
        let (bus, module) = module();
        {
            let mut request = HostBusRequest::new(&module, true).expect("hbr");
            request.request(false).expect("request");
            request.request(false).expect("request");
            assert!(request.is_holding());
        }
        assert_eq!(bus.writes_to(regs::REQUEST_HBR), vec![hbr::REQUEST]);
        assert_eq!(bus.writes_to(regs::HBR_DONE), vec![hbr::RELEASE]);
    }

    #[test]
    fn forced_request_always_writes() {
        let (bus, module) = module();
        let mut request = HostBusRequest::new(&module, true).expect("hbr");
        request.request(true).expect("request");
        request.release(false).expect("release");
        request.release(false).expect("release");
        request.release(true).expect("release");
        drop(request);
        assert_eq!(bus.writes_to(regs::REQUEST_HBR).len(), 2);
        assert_eq!(bus.writes_to(regs::HBR_DONE).len(), 2);
    }

    #[test]
    fn no_hold_touches_nothing() {
        let (bus, module) = module();
        drop(HostBusRequest::new(&module, false).expect("hbr"));
        assert!(bus.log().is_empty());
    }
}
