//! Hardware control core for the Pixie-16 digital pulse processor
//!
//! This crate drives one module through its host register window: the
//! control/status register, host bus arbitration, FPGA configuration and the
//! analog front end fixtures that sit on daughterboards.
//!
//! # Layers
//!
//! ```text
//! Module           identity, layout, channel parameters, fixture tree
//!   ├─ csr         CSR read/modify/write, BitGuard, FIFO ready wait
//!   ├─ hbr         HostBusRequest: hold the host bus for DSP memory
//!   ├─ memory      HostBus: DSP and FIPPI memory through the host window
//!   ├─ fpga        FpgaControl: clear, stream, done with bounded retries
//!   └─ fixture     Assembly + ChannelFixture: daughterboard front ends
//! RegisterBus      PciBar (sysfs BAR mmap) | SimulatedBus (+ SoftwareModule)
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use pixie_driver::{csr, BitGuard, Module, ModuleConfig, PciBar};
//! use pixie_driver::fixture::BoardKind;
//! use pixie_hw::regs::csr::RUNENA;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = Arc::new(PciBar::new("0000:05:0d.0", pixie_hw::pcie::REGISTER_BAR)?);
//! let config = ModuleConfig::rev_h(2, 0, &[BoardKind::Db04, BoardKind::Db04]);
//! let module = Module::new(config, bus)?;
//!
//! {
//!     let _run = BitGuard::new(&module, RUNENA)?;
//!     println!("csr={:#x}", csr::read(&module)?);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod backends;
pub mod baseline;
mod bus;
pub mod csr;
mod error;
pub mod fixture;
pub mod fpga;
pub mod hbr;
pub mod memory;
pub mod mib;
mod module;

pub use backends::{PciBar, SimulatedBus, SoftwareModule, SoftwareRunControl};
pub use bus::{select_bus, BusSelection, BusType, RegisterBus};
pub use csr::BitGuard;
pub use error::{LoadStage, PixieError, Result};
pub use fpga::{FippiLoader, FirmwareImage, FpgaControl, LoadConfig, LoadReport};
pub use hbr::HostBusRequest;
pub use memory::HostBus;
pub use mib::{MibNode, MibRegistry, MibSink, MibValue};
pub use module::{
    voffset_to_dac, ChannelParams, Module, ModuleConfig, Revision, RunControl, Timing,
    OFFSET_DAC_BITS, OFFSET_DAC_MID, OFFSET_DAC_RANGE_VOLTS,
};

/// Commonly used types.
pub mod prelude {
    pub use crate::fixture::{Assembly, BoardKind, ChannelFixture};
    pub use crate::{
        BitGuard, FippiLoader, FirmwareImage, HostBus, HostBusRequest, LoadConfig, Module,
        ModuleConfig, PixieError, Result, RunControl, SimulatedBus, SoftwareModule, Timing,
    };
}
