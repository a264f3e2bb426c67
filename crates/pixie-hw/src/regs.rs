//! Host register map
//!
//! Addresses are offsets into the register BAR. Every access is one 32-bit
//! word.
//!
//! ```text
//! 0x00  CFG_DATACS    FPGA configuration data
//! 0x04  CFG_CTRLCS    FPGA configuration control, port select
//! 0x08  CFG_RDCS      FPGA configuration status read back
//! 0x0c  CFG_RDVER     Board version
//! 0x14  CFG_DCMRST    Clock manager reset
//! 0x18  CFG_DAC       I/O FPGA serial DAC/PIO shift register
//! 0x48  CSR           Host control/status register
//! 0x80  REQUEST_HBR   Host bus request
//! 0x84  HBR_DONE      Host bus release
//! 0xc4  EXT_MEM_TEST  Host bus address latch
//! 0xc8  WRT_DSP_MMA   Host bus data
//! ```

use crate::{Address, Word};

// ── FPGA configuration ───────────────────────────────────────────────────────

/// FPGA configuration data register
pub const CFG_DATACS: Address = 0x00;
/// FPGA configuration control register
pub const CFG_CTRLCS: Address = 0x04;
/// FPGA configuration status register
pub const CFG_RDCS: Address = 0x08;
/// Board version register
pub const CFG_RDVER: Address = 0x0c;
/// Clock manager reset
///
/// Written with 0 after the FIPPI FPGAs load.
pub const CFG_DCMRST: Address = 0x14;
/// Serial DAC and PIO shift register on the I/O FPGA
pub const CFG_DAC: Address = 0x18;

// ── Host control ─────────────────────────────────────────────────────────────

/// Host control/status register
pub const CSR: Address = 0x48;
/// Host bus request register
pub const REQUEST_HBR: Address = 0x80;
/// Host bus done register
pub const HBR_DONE: Address = 0x84;

// ── Host bus memory window ───────────────────────────────────────────────────

/// External memory write port
pub const WRT_EXT_MEM: Address = 0xc0;
/// Host bus address latch
///
/// Writing loads the DSP/FIPPI address.
pub const EXT_MEM_TEST: Address = 0xc4;
/// Host bus data port
///
/// Sequential accesses auto-increment the address.
pub const WRT_DSP_MMA: Address = 0xc8;

/// Port select field of `CFG_CTRLCS`
pub mod port {
    /// First bit of the port field
    pub const SHIFT: u32 = 19;
    /// Field mask, before shifting
    pub const MASK: u32 = 7;
}

/// Host CSR bit definitions
pub mod csr {
    use crate::Word;

    /// Enable run
    pub const RUNENA: Word = 1 << 0;
    /// Enable DSP code download
    pub const DSPDOWNLOAD: Word = 1 << 1;
    /// PCI I/O is active
    pub const PCIACTIVE: Word = 1 << 2;
    /// Pull-up control for the SYNC lines
    pub const PULLUP_CTRL: Word = 1 << 3;
    /// Reset the DSP
    pub const DSPRESET: Word = 1 << 4;
    /// External FIFO watermark level reached, data ready to read
    pub const EXTFIFO_WML: Word = 1 << 6;
    /// Run active
    pub const RUNACTIVE: Word = 1 << 13;
    /// Clearing external memory in progress
    pub const CLREXTMEM_ACTIVE: Word = 1 << 14;

    /// Power-up default value
    pub const DEFAULT: Word = 0;
}

/// Host bus request sentinels
pub mod hbr {
    use crate::Word;

    /// HBR asserted with DSP chip select 0
    pub const REQUEST: Word = 0xC;
    /// Bus released
    pub const RELEASE: Word = 0xD;
}

/// Compose a `CFG_CTRLCS` value selecting `port` while keeping the other bits
#[must_use]
pub const fn with_port(ctrlcs: Word, port: u32) -> Word {
    (ctrlcs & !(port::MASK << port::SHIFT)) | ((port & port::MASK) << port::SHIFT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hbr_sentinels() {
        assert_eq!(hbr::REQUEST, 0xC);
        assert_eq!(hbr::RELEASE, 0xD);
        assert_ne!(REQUEST_HBR, HBR_DONE);
    }

    #[test]
    fn port_select_keeps_other_bits() {
        let ctrlcs = 0xffff_ffff;
        assert_eq!(with_port(ctrlcs, 0), 0xffc7_ffff);
        assert_eq!(with_port(0, 3), 3 << 19);
        assert_eq!(with_port(2 << 19, 9), 1 << 19);
    }

    #[test]
    fn extfifo_bit() {
        assert_eq!(csr::EXTFIFO_WML, 0x40);
    }
}
