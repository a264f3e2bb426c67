//! FIPPI register map
//!
//! Each FIPPI FPGA serves one daughterboard. Register addresses are per
//! device; [`addr`] and [`channel_addr`] compose the host bus address.

use crate::Address;

/// First bit of the device select field
pub const SELECT_BIT: u32 = 12;
/// First bit of the channel select field
pub const CHANNEL_SELECT_BIT: u32 = 6;
/// Select field mask
pub const SELECT_MASK: Address = 0xf;

// ── DSP visible registers ────────────────────────────────────────────────────

/// Control/status input
pub const CSRIN: Address = 0x0080_0400;
/// ADC control
///
/// One bit per ADC pair swaps the dual-edge sample order.
pub const ADCCTRL: Address = 0x0080_0404;
/// Host clear
pub const HOSTCLR: Address = 0x0080_0408;
/// ADC serial port command
pub const ADCSPI: Address = 0x0080_040a;
/// ADC input bitslip, four bits per channel
pub const BITSLIP: Address = 0x0080_040c;
/// ADC serial port read back frame
pub const ADCFRAME: Address = 0x0080_0428;

/// Low half of I/O register 3, the channel offset DAC
pub const FIPPI_DAC: Address = 0x0080_0007;

/// Host bus address of `reg` on FIPPI `device`
#[must_use]
pub const fn addr(device: usize, reg: Address) -> Address {
    #[allow(clippy::cast_possible_truncation)]
    let device = device as Address;
    reg | ((device & SELECT_MASK) << SELECT_BIT)
}

/// Host bus address of `reg` for `channel` on FIPPI `device`
#[must_use]
pub const fn channel_addr(device: usize, channel: usize, reg: Address) -> Address {
    #[allow(clippy::cast_possible_truncation)]
    let channel = channel as Address;
    addr(device, reg) | ((channel & SELECT_MASK) << CHANNEL_SELECT_BIT)
}
