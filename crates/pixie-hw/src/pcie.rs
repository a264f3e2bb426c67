//! PCI identifiers
//!
//! The module's host interface is a PLX 9054 bridge. The host registers
//! and the FPGA/DSP host bus sit behind PCI BAR 2 (PLX local space 0).

/// PLX Technology vendor ID
pub const PLX_VENDOR_ID: u16 = 0x10B5;

/// PLX 9054 device ID
pub const PLX_9054_DEVICE_ID: u16 = 0x9054;

/// BAR carrying the host register window
pub const REGISTER_BAR: usize = 2;

/// Format a `vendor:device` string for use with `lspci -d`
#[must_use]
pub fn lspci_filter() -> String {
    format!("{PLX_VENDOR_ID:04x}:{PLX_9054_DEVICE_ID:04x}")
}
