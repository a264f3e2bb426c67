//! Register bus abstraction
//!
//! Every hardware access in the driver goes through [`RegisterBus`]: one 32
//! bit word read or written at a host register address. Backends supply the
//! transport, the rest of the crate builds protocols on top of it.

use crate::backends::{PciBar, SimulatedBus};
use crate::error::Result;
use pixie_hw::{Address, Word};
use std::fmt::Debug;
use std::sync::Arc;

/// Word access to a module's host register window
///
/// Implementations must make each single access atomic. They do not
/// arbitrate multi-word sequences; that is the caller's concern.
pub trait RegisterBus: Debug + Send + Sync {
    /// Read one word
    ///
    /// # Errors
    ///
    /// Returns error if the address is outside the window or the transport fails.
    fn read_word(&self, addr: Address) -> Result<Word>;

    /// Write one word
    ///
    /// # Errors
    ///
    /// Returns error if the address is outside the window or the transport fails.
    fn write_word(&self, addr: Address, value: Word) -> Result<()>;

    /// Get bus type for debugging
    fn bus_type(&self) -> BusType;
}

/// Bus type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusType {
    /// Memory-mapped PCI BAR
    Pci,

    /// In-memory register file, no hardware required
    Simulated,
}

impl std::fmt::Display for BusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pci => write!(f, "PCI"),
            Self::Simulated => write!(f, "Simulated"),
        }
    }
}

/// Bus selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusSelection {
    /// Map the register BAR of the device at this PCI address
    Pci {
        /// PCI address (e.g. 0000:05:0d.0)
        address: String,
    },

    /// Simulated bus with the software module model
    Simulated,
}

/// Open the bus for a selection
///
/// # Errors
///
/// Returns error if the PCI register window cannot be mapped.
pub fn select_bus(selection: &BusSelection) -> Result<Arc<dyn RegisterBus>> {
    match selection {
        BusSelection::Pci { address } => {
            let bar = PciBar::new(address, pixie_hw::pcie::REGISTER_BAR)?;
            tracing::info!("Using PCI bus for {address}");
            Ok(Arc::new(bar))
        }
        BusSelection::Simulated => {
            tracing::info!("Using simulated bus");
            Ok(Arc::new(SimulatedBus::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_selection() {
        let bus = select_bus(&BusSelection::Simulated).expect("simulated bus");
        assert_eq!(bus.bus_type(), BusType::Simulated);
        bus.write_word(0x48, 0x11).expect("write");
        assert_eq!(bus.read_word(0x48).expect("read"), 0x11);
    }

    #[test]
    fn bus_type_display() {
        assert_eq!(BusType::Pci.to_string(), "PCI");
    }
}
