//! Motherboard gain latch
//!
//! Two PCF8574 style PIO expanders on the I/O FPGA serial port hold a 16 bit
//! latch. Each daughterboard channel owns one latch bit per gain step.

/// Gain steps supported by the latch
pub const STEPS: u32 = 2;

/// Latch value at power up
pub const LATCH_DEFAULT: u16 = 0xffff;

/// PIO expander holding latch bits 0..7
pub const PIO_0: u32 = 0x44;
/// PIO expander holding latch bits 8..15
pub const PIO_1: u32 = 0x48;

/// Latch bit per `[step][db channel]`
pub const MASK: [[u16; 4]; 2] = [
    [1 << 0, 1 << 11, 1 << 2, 1 << 5],
    [1 << 8, 1 << 10, 1 << 4, 1 << 6],
];

/// `CFG_DAC` word writing one latch byte to a PIO expander
#[must_use]
pub const fn pio_word(pio: u32, byte: u8) -> u32 {
    let b = byte as u32;
    (pio << 24) | (b << 16) | (b << 8) | b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_are_distinct() {
        let mut all = 0u16;
        for step in MASK {
            for bit in step {
                assert_eq!(all & bit, 0);
                all |= bit;
            }
        }
    }

    #[test]
    fn pio_word_layout() {
        assert_eq!(pio_word(PIO_0, 0xa5), 0x44a5_a5a5);
    }
}
