//! FPGA configuration loading
//!
//! An FPGA target is programmed through three host registers: control, status
//! read back and data. One load attempt is a full cycle:
//!
//! 1. **Clear**: drive the clear controls, settle, drive the load controls and
//!    poll the status until the device reports it is cleared.
//! 2. **Stream**: write the image as little-endian 32-bit words to the data
//!    register.
//! 3. **Done**: poll the status until the device reports it is configured.
//!
//! A failed poll uses up one attempt and the next attempt starts again at
//! Clear. Every failed attempt slows the bus down: after each write the
//! status register is read `backoff` times, and `backoff` grows by
//! [`BACKOFF_STEP`].

use crate::error::{LoadStage, PixieError, Result};
use crate::module::Module;
use bytes::Bytes;
use pixie_hw::fpga::{fippi_1_2, fippi_3_4, Controls, Regs};
use pixie_hw::{regs, Address, Word};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Backoff added after every failed attempt
pub const BACKOFF_STEP: usize = 2;

/// Load tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadConfig {
    /// Total attempts before giving up
    pub retries: usize,

    /// Status polls waiting for the device to clear
    pub clear_polls: usize,

    /// Status polls waiting for the device to report done
    pub done_polls: usize,

    /// Wait before each status poll
    pub poll_interval: Duration,

    /// Wait between the clear and load controls
    pub clear_settle: Duration,

    /// Log every attempt at `info`
    pub trace: bool,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            retries: 10,
            clear_polls: 25,
            done_polls: 25,
            poll_interval: Duration::from_millis(1),
            clear_settle: Duration::from_micros(100),
            trace: false,
        }
    }
}

impl LoadConfig {
    /// Defaults overridden by `PIXIE_FPGA_RETRIES` and `PIXIE_FPGA_TRACE`
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set to something unparsable.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(retries) = std::env::var("PIXIE_FPGA_RETRIES") {
            config.retries = retries.trim().parse().map_err(|_| {
                PixieError::invalid_configuration(format!("PIXIE_FPGA_RETRIES: {retries}"))
            })?;
        }
        if let Ok(trace) = std::env::var("PIXIE_FPGA_TRACE") {
            config.trace = matches!(trace.trim(), "1" | "true" | "yes" | "on");
        }
        config.validate()?;
        Ok(config)
    }

    /// Set the attempt count
    #[must_use]
    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    /// Poll without waiting
    #[must_use]
    pub fn immediate(mut self) -> Self {
        self.poll_interval = Duration::ZERO;
        self.clear_settle = Duration::ZERO;
        self
    }

    /// Check the tuning is usable
    ///
    /// # Errors
    ///
    /// Returns error if any count is zero.
    pub fn validate(&self) -> Result<()> {
        if self.retries == 0 || self.clear_polls == 0 || self.done_polls == 0 {
            return Err(PixieError::invalid_configuration(
                "FPGA load retries and polls must be non-zero",
            ));
        }
        Ok(())
    }
}

/// Configuration image for an FPGA target
///
/// Images are immutable and cheap to clone.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    name: String,
    data: Bytes,
    checksum: u32,
}

impl FirmwareImage {
    /// Create an image from raw bytes
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let checksum = data
            .iter()
            .fold(0u32, |acc, &byte| acc.wrapping_add(u32::from(byte)));
        let name = name.into();
        debug!("image {name}: {} bytes, checksum: 0x{checksum:08x}", data.len());
        Self {
            name,
            data,
            checksum,
        }
    }

    /// Read an image file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        Ok(Self::new(name, data))
    }

    /// Image name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Image bytes
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True for an image with no data
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Byte sum of the image
    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Image as little-endian words
    pub fn words(&self) -> impl Iterator<Item = Word> + '_ {
        self.data
            .chunks_exact(4)
            .map(|b| Word::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(PixieError::invalid_configuration(format!(
                "image {}: no image loaded",
                self.name
            )));
        }
        if self.len() % 4 != 0 {
            return Err(PixieError::invalid_configuration(format!(
                "image {}: length {} is not a whole number of words",
                self.name,
                self.len()
            )));
        }
        Ok(())
    }
}

/// Outcome of a successful load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    /// FPGA target name
    pub fpga: String,
    /// Attempts used, including the successful one
    pub attempts: usize,
    /// Words streamed per attempt
    pub words: usize,
    /// Backoff in force at the end of the load
    pub backoff: usize,
    /// Wall time of the load
    pub duration: Duration,
}

enum Attempt {
    Programmed,
    Failed(LoadStage),
}

/// Loader for one FPGA target
#[derive(Debug)]
pub struct FpgaControl<'a> {
    module: &'a Module,
    name: String,
    load_ctrl: Controls,
    clear_ctrl: Controls,
    regs: Regs,
    config: LoadConfig,
    backoff: usize,
}

impl<'a> FpgaControl<'a> {
    /// Create a loader for a target with the given control words
    pub fn new(
        module: &'a Module,
        name: impl Into<String>,
        load_ctrl: Controls,
        clear_ctrl: Controls,
        regs: Regs,
        config: LoadConfig,
    ) -> Self {
        Self {
            module,
            name: name.into(),
            load_ctrl,
            clear_ctrl,
            regs,
            config,
            backoff: 0,
        }
    }

    /// Target name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current write backoff
    pub fn backoff(&self) -> usize {
        self.backoff
    }

    /// Start from a backoff carried over from an earlier load
    #[must_use]
    pub fn with_backoff(mut self, backoff: usize) -> Self {
        self.backoff = backoff;
        self
    }

    /// True if the target reports it is configured
    ///
    /// # Errors
    ///
    /// Returns error if the status read fails.
    pub fn done(&self) -> Result<bool> {
        Ok(self.load_ctrl.is_done(self.bus_read(self.regs.rdcs)?))
    }

    /// Load an image
    ///
    /// # Errors
    ///
    /// Returns [`PixieError::InvalidConfiguration`] for an unusable image and
    /// [`PixieError::FirmwareLoadFailure`] when every attempt fails.
    pub fn load(&mut self, image: &FirmwareImage) -> Result<LoadReport> {
        info!(
            "fpga-{} [slot {}] load: image={} length={} retries={} \
             clear-controls: clear={:#x},set={:#x},done={:#x} \
             load-controls: clear={:#x},set={:#x},done={:#x}",
            self.name,
            self.module.slot(),
            image.name(),
            image.len(),
            self.config.retries,
            self.clear_ctrl.clear,
            self.clear_ctrl.set,
            self.clear_ctrl.done,
            self.load_ctrl.clear,
            self.load_ctrl.set,
            self.load_ctrl.done
        );

        image.validate()?;
        self.config.validate()?;

        let start = Instant::now();
        let words = image.len() / 4;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.attempt(image)? {
                Attempt::Programmed => {
                    debug!("fpga-{} [slot {}] done", self.name, self.module.slot());
                    self.trace(attempt, "programmed");
                    return Ok(LoadReport {
                        fpga: self.name.clone(),
                        attempts: attempt,
                        words,
                        backoff: self.backoff,
                        duration: start.elapsed(),
                    });
                }
                Attempt::Failed(stage) => {
                    self.trace(attempt, &format!("{stage} failure"));
                    if attempt >= self.config.retries {
                        return Err(PixieError::firmware_load_failure(
                            self.name.clone(),
                            attempt,
                            stage,
                        ));
                    }
                    self.backoff += BACKOFF_STEP;
                    debug!(
                        "fpga-{} [slot {}] retry: backoff={}",
                        self.name,
                        self.module.slot(),
                        self.backoff
                    );
                }
            }
        }
    }

    /// One clear, stream, done cycle
    fn attempt(&self, image: &FirmwareImage) -> Result<Attempt> {
        debug!("fpga-{} [slot {}] clearing", self.name, self.module.slot());

        let status = self.bus_read(self.regs.rdcs)?;
        self.bus_write(self.regs.ctrlcs, self.clear_ctrl.apply(status))?;
        self.module.wait(self.config.clear_settle);
        let status = self.bus_read(self.regs.rdcs)?;
        self.bus_write(self.regs.ctrlcs, self.load_ctrl.apply(status))?;

        if !self.poll(self.clear_ctrl, self.config.clear_polls)? {
            return Ok(Attempt::Failed(LoadStage::Clear));
        }

        debug!("fpga-{} [slot {}] programming", self.name, self.module.slot());
        for word in image.words() {
            self.bus_write(self.regs.datacs, word)?;
        }

        debug!(
            "fpga-{} [slot {}] waiting for done",
            self.name,
            self.module.slot()
        );
        if !self.poll(self.load_ctrl, self.config.done_polls)? {
            return Ok(Attempt::Failed(LoadStage::Programming));
        }

        Ok(Attempt::Programmed)
    }

    fn poll(&self, controls: Controls, polls: usize) -> Result<bool> {
        for _ in 0..polls {
            self.module.wait(self.config.poll_interval);
            if controls.is_done(self.bus_read(self.regs.rdcs)?) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn trace(&self, attempt: usize, outcome: &str) {
        if self.config.trace {
            info!(
                "fpga-{} [slot {}] attempt {attempt}/{}: {outcome}, backoff={}",
                self.name,
                self.module.slot(),
                self.config.retries,
                self.backoff
            );
        }
    }

    fn bus_write(&self, addr: Address, value: Word) -> Result<()> {
        self.module.write_word(addr, value)?;
        for _ in 0..self.backoff {
            self.bus_read(self.regs.rdcs)?;
        }
        Ok(())
    }

    fn bus_read(&self, addr: Address) -> Result<Word> {
        self.module.read_word(addr)
    }
}

/// Settle time after the FIPPI FPGAs load, before the clock managers reset
pub const FIPPI_SETTLE: Duration = Duration::from_millis(10);

/// Loader for the FIPPI FPGA pairs of a module
#[derive(Debug, Clone, Default)]
pub struct FippiLoader {
    config: LoadConfig,
}

impl FippiLoader {
    /// Create a loader
    pub fn new(config: LoadConfig) -> Self {
        Self { config }
    }

    /// Load both FIPPI pairs, reset the clock managers and notify the fixtures
    ///
    /// # Errors
    ///
    /// Returns error if either load fails or a fixture hook fails.
    pub fn boot(&self, module: &mut Module, image: &FirmwareImage) -> Result<Vec<LoadReport>> {
        let reports = self.load(module, image)?;
        module.wait(FIPPI_SETTLE);
        module.write_word(regs::CFG_DCMRST, 0)?;
        if module.fixtures().is_ok() {
            module.fpga_fippi_loaded()?;
        }
        Ok(reports)
    }

    fn load(&self, module: &Module, image: &FirmwareImage) -> Result<Vec<LoadReport>> {
        let mut first = FpgaControl::new(
            module,
            fippi_1_2::NAME,
            fippi_1_2::LOAD,
            fippi_1_2::CLEAR,
            Regs::HOST,
            self.config.clone(),
        );
        let first_report = first.load(image)?;
        let mut second = FpgaControl::new(
            module,
            fippi_3_4::NAME,
            fippi_3_4::LOAD,
            fippi_3_4::CLEAR,
            Regs::HOST,
            self.config.clone(),
        )
        .with_backoff(first.backoff());
        let second_report = second.load(image)?;
        Ok(vec![first_report, second_report])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SimulatedBus;
    use crate::module::{ModuleConfig, Revision, Timing};
    use std::sync::Arc;

    fn module(bus: &Arc<SimulatedBus>) -> Module {
        let config =
            ModuleConfig::mainboard(2, 0, Revision::F, 16).with_timing(Timing::IMMEDIATE);
        Module::new(config, bus.clone()).expect("module")
    }

    fn control(module: &Module) -> FpgaControl<'_> {
        FpgaControl::new(
            module,
            fippi_1_2::NAME,
            fippi_1_2::LOAD,
            fippi_1_2::CLEAR,
            Regs::HOST,
            LoadConfig::default().immediate().with_retries(3),
        )
    }

    #[test]
    fn empty_image_rejected() {
        let bus = Arc::new(SimulatedBus::new());
        let module = module(&bus);
        let err = control(&module)
            .load(&FirmwareImage::new("empty", Vec::new()))
            .expect_err("empty");
        assert!(matches!(err, PixieError::InvalidConfiguration { .. }));
        assert!(bus.log().is_empty());
    }

    #[test]
    fn ragged_image_rejected() {
        let bus = Arc::new(SimulatedBus::new());
        let module = module(&bus);
        let err = control(&module)
            .load(&FirmwareImage::new("ragged", vec![1u8, 2, 3, 4, 5]))
            .expect_err("ragged");
        assert!(matches!(err, PixieError::InvalidConfiguration { .. }));
    }

    #[test]
    fn words_are_little_endian() {
        let image = FirmwareImage::new("img", vec![0x78u8, 0x56, 0x34, 0x12]);
        assert_eq!(image.words().collect::<Vec<_>>(), vec![0x1234_5678]);
        assert_eq!(image.checksum(), 0x78 + 0x56 + 0x34 + 0x12);
    }

    #[test]
    fn never_cleared_fails_at_clear() {
        let bus = Arc::new(SimulatedBus::new());
        let module = module(&bus);
        let err = control(&module)
            .load(&FirmwareImage::new("img", vec![0u8; 8]))
            .expect_err("status never changes");
        assert!(matches!(
            err,
            PixieError::FirmwareLoadFailure {
                attempts: 3,
                stage: LoadStage::Clear,
                ..
            }
        ));
        assert!(bus.writes_to(regs::CFG_DATACS).is_empty());
    }

    #[test]
    fn status_already_done_loads_first_time() {
        let bus = Arc::new(SimulatedBus::new());
        bus.poke(regs::CFG_RDCS, 0xfff);
        let module = module(&bus);
        let report = control(&module)
            .load(&FirmwareImage::new("img", vec![1u8, 0, 0, 0, 2, 0, 0, 0]))
            .expect("load");
        assert_eq!(report.attempts, 1);
        assert_eq!(report.words, 2);
        assert_eq!(bus.writes_to(regs::CFG_DATACS), vec![1, 2]);
    }

    #[test]
    fn env_config() {
        std::env::remove_var("PIXIE_FPGA_RETRIES");
        std::env::remove_var("PIXIE_FPGA_TRACE");
        assert_eq!(LoadConfig::from_env().expect("config"), LoadConfig::default());
    }
}
