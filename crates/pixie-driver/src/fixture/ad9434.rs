//! AD9434 ADC
//!
//! Control goes through the board's shared serial port. Settings are
//! shadowed inside the part and take effect when the transfer register is
//! written. The driver tracks what it last programmed as a state string,
//! `coupling:ac,fmt:offset-binary,invert:off,test-mode:off`, with a
//! `test:...` field appended once a test result is recorded.

use super::adc_spi::AdcSpiDriver;
use crate::error::Result;
use crate::mib::{MibNode, MibValue};
use crate::module::Module;
use pixie_hw::adc::{ad9434, TestMode};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Chip ID the part reports
pub const CHIP_ID: u32 = 0x6a;

/// Ordered `field:value` list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct States(Vec<(String, String)>);

impl States {
    fn update(&mut self, field: &str, value: &str) {
        match self.0.iter_mut().find(|(f, _)| f == field) {
            Some((_, v)) => *v = value.to_string(),
            None => self.0.push((field.to_string(), value.to_string())),
        }
    }

    fn get(&self, field: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v.as_str())
    }
}

impl std::fmt::Display for States {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (field, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{field}:{value}")?;
        }
        Ok(())
    }
}

/// ADC of one daughterboard channel
#[derive(Debug)]
pub struct Ad9434 {
    spi: Arc<AdcSpiDriver>,
    channel: usize,
    test_mode: TestMode,
    states: States,
    state: MibNode,
}

impl Ad9434 {
    /// Driver for the ADC on board channel `channel`
    pub fn new(module: &Module, spi: Arc<AdcSpiDriver>, channel: usize, mib_base: &str) -> Self {
        let mut states = States::default();
        states.update("coupling", "ac");
        states.update("fmt", "offset-binary");
        states.update("invert", "off");
        states.update("test-mode", TestMode::Off.label());
        let state = MibNode::new(module.mib_sink(), crate::mib::key(&[mib_base, "adc", "ad9434"]));
        state.set(MibValue::Text(states.to_string()));
        Self {
            spi,
            channel,
            test_mode: TestMode::Off,
            states,
            state,
        }
    }

    /// Current state string
    pub fn state(&self) -> String {
        self.states.to_string()
    }

    /// Test mode last programmed
    pub fn test_mode(&self) -> TestMode {
        self.test_mode
    }

    /// Read the chip identity registers and record the verdict
    ///
    /// A chip ID other than [`CHIP_ID`] records `test:fail:chip-id`, it is
    /// not an error.
    ///
    /// # Errors
    ///
    /// Returns error if a serial port access fails.
    pub fn self_test(&mut self, module: &Module) -> Result<()> {
        let chip_id = self.spi.read(module, self.channel, ad9434::CHIP_ID)?;
        let chip_grade = self.spi.read(module, self.channel, ad9434::CHIP_GRADE)?;
        if chip_id == CHIP_ID {
            info!(
                "{}: ad9434: db-channel={} chip-id={chip_id:#x} grade={chip_grade:#x}",
                module.label(),
                self.channel
            );
            self.set_state("test", "pass");
        } else {
            warn!(
                "{}: ad9434: db-channel={} self-test: bad chip-id={chip_id:#x} expected={CHIP_ID:#x}",
                module.label(),
                self.channel
            );
            self.set_state("test", "fail:chip-id");
        }
        Ok(())
    }

    /// True if the last recorded test passed
    pub fn self_test_pass(&self) -> bool {
        self.states.get("test") == Some("pass")
    }

    /// Record a test verdict, `None` for a pass or the failing mode
    pub fn set_test_result(&mut self, failed: Option<TestMode>) {
        let result = match failed {
            None => "pass".to_string(),
            Some(mode) => format!("fail:{}", mode.label()),
        };
        self.set_state("test", &result);
    }

    /// Select an output test mode
    ///
    /// # Errors
    ///
    /// Returns error if a serial port write fails.
    pub fn set_test_mode(&mut self, module: &Module, mode: TestMode) -> Result<()> {
        self.program(module, ad9434::TEST_IO, ad9434::test_mode_value(mode))?;
        self.test_mode = mode;
        self.set_state("test-mode", mode.label());
        Ok(())
    }

    /// Select AC or DC input coupling
    ///
    /// # Errors
    ///
    /// Returns error if a serial port write fails.
    pub fn set_coupling(&mut self, module: &Module, dc: bool) -> Result<()> {
        let value = if dc { ad9434::DC_COUPLED } else { 0 };
        self.program(module, ad9434::COUPLING, value)?;
        self.set_state("coupling", if dc { "dc" } else { "ac" });
        Ok(())
    }

    /// Invert the output or not
    ///
    /// # Errors
    ///
    /// Returns error if a serial port write fails.
    pub fn set_invert(&mut self, module: &Module, invert: bool) -> Result<()> {
        let value = if invert { ad9434::INVERT } else { 0 };
        self.program(module, ad9434::OUTPUT_MODE, value)?;
        self.set_state("invert", if invert { "on" } else { "off" });
        Ok(())
    }

    /// Publish the state string
    pub fn enable_mib(&self) {
        self.state.enable();
    }

    /// Stop publishing the state string
    pub fn disable_mib(&self) {
        self.state.disable();
    }

    fn program(&self, module: &Module, reg: u32, value: u32) -> Result<()> {
        self.spi.write(module, self.channel, reg, value)?;
        self.spi.write(module, self.channel, ad9434::TRANSFER, 1)
    }

    fn set_state(&mut self, field: &str, value: &str) {
        self.states.update(field, value);
        debug!("ad9434: db-channel={}: {}", self.channel, self.states);
        self.state.set(MibValue::Text(self.states.to_string()));
    }
}
