//! CRC32 shared by the image header, the attached loader binary and GPT.
//!
//! The register is shifted MSB-first with the normal form of the polynomial,
//! so every input byte is bit-reflected before it is folded in and the final
//! register is complemented and reflected as a whole. The result is the same
//! value zlib and UEFI firmware produce, which lets the same engine check
//! both our own images and real GPT disks.
//!
//! To checksum a stream of unknown length, start from `SPL_CRC32_INIT`, feed
//! each byte through `crc32_acc`, and finish with `crc32_end`. `Crc32` wraps
//! that sequence for callers that prefer a running value.

pub const SPL_CRC32_INIT: u32 = 0xFFFF_FFFF;
pub const SPL_CRC32_POLYNOMIAL: u32 = 0x04C1_1DB7;

/// Reverses the order of all 32 bits in `num`.
pub const fn reverse32(num: u32) -> u32 {
    num.reverse_bits()
}

/// Fold a single byte into a running CRC register.
pub const fn crc32_acc(data: u8, crc: u32) -> u32 {
    let mut crc = crc ^ ((data.reverse_bits() as u32) << 24);
    let mut bit = 0;
    while bit < 8 {
        crc = if crc & 0x8000_0000 != 0 {
            (crc << 1) ^ SPL_CRC32_POLYNOMIAL
        } else {
            crc << 1
        };
        bit += 1;
    }
    crc
}

/// Conclude a calculation started with `SPL_CRC32_INIT` and continued with
/// `crc32_acc`.
pub const fn crc32_end(crc: u32) -> u32 {
    reverse32(!crc)
}

/// Calculate the CRC32 checksum of an entire buffer.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = SPL_CRC32_INIT;
    for byte in data {
        crc = crc32_acc(*byte, crc);
    }
    crc32_end(crc)
}

/// Represents a running CRC32 computation
#[derive(Copy, Clone, Debug)]
pub struct Crc32(u32);

impl Crc32 {
    pub const fn new() -> Self {
        Self(SPL_CRC32_INIT)
    }

    pub fn add(&mut self, data: u8) {
        self.0 = crc32_acc(data, self.0);
    }

    pub fn add_slice(&mut self, data: &[u8]) {
        for byte in data {
            self.add(*byte);
        }
    }

    /// Add `count` zero bytes, used to stand in for a checksum field that is
    /// excluded from its own computation
    pub fn add_zeroes(&mut self, count: usize) {
        for _ in 0..count {
            self.add(0);
        }
    }

    /// Compute the final checksum. The running value is left untouched, so
    /// more data may still be added afterwards.
    pub fn compute(&self) -> u32 {
        crc32_end(self.0)
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(b"The quick brown fox jumps over the lazy dog"), 0x414F_A339);
    }

    #[test]
    fn empty_buffer() {
        assert_eq!(crc32(&[]), 0);
        assert_eq!(crc32_end(SPL_CRC32_INIT), 0);
    }

    #[test]
    fn reverse_bits() {
        assert_eq!(reverse32(0x0000_0001), 0x8000_0000);
        assert_eq!(reverse32(0x0000_00F0), 0x0F00_0000);
        assert_eq!(reverse32(0x1234_5678), 0x1E6A_2C48);
        assert_eq!(reverse32(reverse32(0xDEAD_BEEF)), 0xDEAD_BEEF);
    }

    #[test]
    fn streaming_matches_whole_buffer() {
        let data: Vec<u8> = (0..600u32).map(|i| (i.wrapping_mul(31) ^ (i >> 3)) as u8).collect();
        for len in 0..data.len() {
            let slice = &data[..len];
            let folded = slice.iter().fold(SPL_CRC32_INIT, |crc, b| crc32_acc(*b, crc));
            assert_eq!(crc32_end(folded), crc32(slice), "length {}", len);

            let mut running = Crc32::new();
            running.add_slice(slice);
            assert_eq!(running.compute(), crc32(slice));
        }
    }

    #[test]
    fn single_bit_flip_changes_checksum() {
        let data: Vec<u8> = (0..64u8).collect();
        let original = crc32(&data);
        for byte in 0..data.len() {
            for bit in 0..8 {
                let mut flipped = data.clone();
                flipped[byte] ^= 1 << bit;
                assert_ne!(crc32(&flipped), original, "byte {} bit {}", byte, bit);
            }
        }
    }

    #[test]
    fn zero_padding_matches_explicit_zeroes() {
        let mut padded = Crc32::new();
        padded.add_slice(b"SPL");
        padded.add_zeroes(4);
        assert_eq!(padded.compute(), crc32(b"SPL\0\0\0\0"));
    }
}
