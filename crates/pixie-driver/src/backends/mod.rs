//! Register bus backends
//!
//! - [`mmap`]: the module's register BAR mapped through sysfs
//! - [`sim`]: in-memory register file with an access log
//! - [`software`]: a behavioural model of a Pixie-16 host interface for the
//!   simulated bus

pub mod mmap;
pub mod sim;
pub mod software;

pub use mmap::PciBar;
pub use sim::{Access, AccessRecord, DeviceModel, RegisterFile, SimulatedBus};
pub use software::{SoftwareModule, SoftwareRunControl};
