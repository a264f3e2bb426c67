//! FPGA configuration control words
//!
//! A load drives `CFG_CTRLCS` with `(CFG_RDCS & clear) | set` and waits for
//! `CFG_RDCS & done == done`. Each FPGA target has one word set to clear the
//! device and one to start programming.

use crate::{regs, Address, Word};

/// Control word set for one configuration step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controls {
    /// Mask applied to the status read back before `set` is merged in
    pub clear: Word,
    /// Bits asserted for this step
    pub set: Word,
    /// Bits that must all read back set when the step completes
    pub done: Word,
}

impl Controls {
    /// Create a control word set
    pub const fn new(clear: Word, set: Word, done: Word) -> Self {
        Self { clear, set, done }
    }

    /// Control value to write given the current status read back
    #[must_use]
    pub const fn apply(&self, status: Word) -> Word {
        (status & self.clear) | self.set
    }

    /// True when `status` shows every `done` bit
    #[must_use]
    pub const fn is_done(&self, status: Word) -> bool {
        status & self.done == self.done
    }
}

/// Registers an FPGA target is programmed through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Regs {
    /// Data register the image is streamed into
    pub datacs: Address,
    /// Control register
    pub ctrlcs: Address,
    /// Status read back register
    pub rdcs: Address,
}

impl Regs {
    /// The host configuration registers used by every on-board FPGA
    pub const HOST: Self = Self {
        datacs: regs::CFG_DATACS,
        ctrlcs: regs::CFG_CTRLCS,
        rdcs: regs::CFG_RDCS,
    };
}

/// FIPPI FPGAs serving daughterboards 1 and 2
pub mod fippi_1_2 {
    use super::Controls;

    /// Target name used in logs and errors
    pub const NAME: &str = "fippi-1-2";
    /// Start programming
    pub const LOAD: Controls = Controls::new(0xffff_f000, 0x0000_00f2, 0x0a3);
    /// Clear the configuration
    pub const CLEAR: Controls = Controls::new(0xffff_f000, 0x0000_0052, 0x053);
}

/// FIPPI FPGAs serving daughterboards 3 and 4
pub mod fippi_3_4 {
    use super::Controls;

    /// Target name used in logs and errors
    pub const NAME: &str = "fippi-3-4";
    /// Start programming
    pub const LOAD: Controls = Controls::new(0xffff_f000, 0x0000_0fa2, 0xaa3);
    /// Clear the configuration
    pub const CLEAR: Controls = Controls::new(0xffff_f000, 0x0000_05a2, 0x5a3);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_keeps_upper_status_bits() {
        assert_eq!(fippi_1_2::CLEAR.apply(0xabcd_efff), 0xabcd_e052);
        assert_eq!(fippi_3_4::LOAD.apply(0), 0xfa2);
    }

    #[test]
    fn done_requires_all_bits() {
        assert!(fippi_1_2::LOAD.is_done(0x0a3));
        assert!(fippi_1_2::LOAD.is_done(0xfff));
        assert!(!fippi_1_2::LOAD.is_done(0x0a1));
    }
}
