//! ADC test modes and the AD9434 register map

use crate::AdcWord;

/// Built-in ADC output test patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TestMode {
    /// Normal conversion
    Off = 0,
    /// Positive full scale
    FsPlus = 1,
    /// Negative full scale
    FsMinus = 2,
    /// Mid scale
    Midscale = 3,
    /// Alternating `0101`/`1010` words
    Checkerboard = 4,
    /// PN23 pseudo random sequence
    Pn23 = 5,
    /// PN9 pseudo random sequence
    Pn9 = 6,
    /// Alternating all ones and all zeros
    OneZero = 7,
}

impl TestMode {
    /// Every mode, in numeric order
    pub const ALL: [Self; 8] = [
        Self::Off,
        Self::FsPlus,
        Self::FsMinus,
        Self::Midscale,
        Self::Checkerboard,
        Self::Pn23,
        Self::Pn9,
        Self::OneZero,
    ];

    /// Mode for a numeric item value
    #[must_use]
    pub fn from_value(value: u32) -> Option<Self> {
        Self::ALL.get(usize::try_from(value).ok()?).copied()
    }

    /// Short label used in state strings
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::FsPlus => "+FS",
            Self::FsMinus => "-FS",
            Self::Midscale => "midscale",
            Self::Checkerboard => "checkerboard",
            Self::Pn23 => "pn23",
            Self::Pn9 => "pn9",
            Self::OneZero => "one/zero",
        }
    }

    /// The two alternating words a trace shows in this mode
    ///
    /// `None` for modes without a fixed pattern.
    #[must_use]
    pub fn pattern(self, adc_bits: u32, inverted: bool) -> Option<(AdcWord, AdcWord)> {
        let mask = full_scale(adc_bits);
        let (w1, w2) = match self {
            Self::FsPlus => (mask, mask),
            Self::FsMinus => (0, 0),
            Self::Midscale => {
                let mid = 1 << adc_bits.saturating_sub(1);
                (mid, mid)
            }
            Self::Checkerboard => (0x5555 & mask, 0xaaaa & mask),
            Self::OneZero => (mask, 0),
            Self::Off | Self::Pn23 | Self::Pn9 => return None,
        };
        if inverted {
            Some((!w1 & mask, !w2 & mask))
        } else {
            Some((w1, w2))
        }
    }
}

/// Largest code an ADC of `adc_bits` produces
#[must_use]
pub fn full_scale(adc_bits: u32) -> AdcWord {
    match adc_bits {
        0 => 0,
        1..=15 => (1 << adc_bits) - 1,
        _ => AdcWord::MAX,
    }
}

/// AD9434 serial port register map
pub mod ad9434 {
    /// Chip ID
    pub const CHIP_ID: u32 = 0x01;
    /// Chip grade
    pub const CHIP_GRADE: u32 = 0x02;
    /// Test mode select
    pub const TEST_IO: u32 = 0x0d;
    /// Output mode, bit 2 inverts the output
    pub const OUTPUT_MODE: u32 = 0x14;
    /// Input coupling, bit 2 selects DC coupling
    pub const COUPLING: u32 = 0x2c;
    /// Transfer register
    ///
    /// Writing 1 latches the shadowed settings.
    pub const TRANSFER: u32 = 0xff;

    /// Output invert bit of [`OUTPUT_MODE`]
    pub const INVERT: u32 = 1 << 2;
    /// DC coupling bit of [`COUPLING`]
    pub const DC_COUPLED: u32 = 1 << 2;

    /// Register value selecting a test mode
    #[must_use]
    pub const fn test_mode_value(mode: super::TestMode) -> u32 {
        use super::TestMode;
        match mode {
            TestMode::Off => 0,
            TestMode::Midscale => 1,
            TestMode::FsPlus => 2,
            TestMode::FsMinus => 3,
            TestMode::Checkerboard => 4,
            TestMode::Pn23 => 5,
            TestMode::Pn9 => 6,
            TestMode::OneZero => 7,
        }
    }
}
