//! Hardware model of the Pixie-16 digital pulse processing module
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure model of the board: host register addresses, CSR bit definitions,
//! the host bus request sentinels, the FIPPI register map, FPGA control
//! words and the register maps of the daughterboard parts.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`pcie`] | PLX 9054 vendor/device IDs, register BAR index |
//! | [`regs`] | Host register addresses, CSR bits, HBR sentinels |
//! | [`fippi`] | FIPPI register map and host bus address composition |
//! | [`fpga`] | FPGA configuration control words |
//! | [`adc`] | ADC test modes and the AD9434 register map |
//! | [`gain`] | Motherboard gain latch masks |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod adc;
pub mod fippi;
pub mod fpga;
pub mod gain;
pub mod pcie;
pub mod regs;

/// Host bus register address
pub type Address = u32;

/// Host bus data word
///
/// All host bus transfers are 32 bits wide.
pub type Word = u32;

/// A single ADC sample
///
/// ADC traces pack two samples per host word.
pub type AdcWord = u16;

/// Maximum number of channels a module can carry
pub const MAX_CHANNELS: usize = 32;

/// Maximum ADC trace length in samples
pub const MAX_ADC_TRACE_LENGTH: usize = 8192;
