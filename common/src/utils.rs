//! Common Utilities
//! 
//! Hex dumps, MSB-first bit packing and alignment helpers shared by the
//! fronthaul codecs

use bytes::{BufMut, Bytes, BytesMut};

/// Convert a byte slice to hex string for debugging
pub fn bytes_to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Round `len` up to the next multiple of `align` (a power of two)
pub fn align_up(len: usize, align: usize) -> usize {
    (len + align - 1) & !(align - 1)
}

/// Sign-extend the low `bits` bits of `value`
pub fn sign_extend(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

/// MSB-first bit writer
///
/// Fields narrower than a byte are packed back to back; `finish` pads the
/// final partial byte with zeros.
#[derive(Debug, Default)]
pub struct BitWriter {
    buf: BytesMut,
    acc: u64,
    nbits: u32,
}

impl BitWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with a byte capacity hint
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(bytes),
            ..Self::default()
        }
    }

    /// Append the low `bits` bits of `value` (bits <= 32)
    pub fn write(&mut self, value: u32, bits: u32) {
        debug_assert!(bits <= 32);
        if bits == 0 {
            return;
        }
        let mask = if bits == 32 { u32::MAX } else { (1u32 << bits) - 1 };
        self.acc = (self.acc << bits) | (value & mask) as u64;
        self.nbits += bits;
        while self.nbits >= 8 {
            self.nbits -= 8;
            self.buf.put_u8((self.acc >> self.nbits) as u8);
        }
        self.acc &= (1u64 << self.nbits) - 1;
    }

    /// Append a signed value as a `bits`-wide two's complement field
    pub fn write_signed(&mut self, value: i32, bits: u32) {
        self.write(value as u32, bits);
    }

    /// Number of bits written so far
    pub fn bit_len(&self) -> usize {
        self.buf.len() * 8 + self.nbits as usize
    }

    /// Pad to a byte boundary and return the packed bytes
    pub fn finish(mut self) -> Bytes {
        if self.nbits > 0 {
            let pad = 8 - self.nbits;
            self.write(0, pad);
        }
        self.buf.freeze()
    }
}

/// MSB-first bit reader over a byte slice
#[derive(Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    /// Create a reader positioned at the first bit
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Read `bits` bits (bits <= 32), or `None` past the end of data
    pub fn read(&mut self, bits: u32) -> Option<u32> {
        debug_assert!(bits <= 32);
        if self.pos + bits as usize > self.data.len() * 8 {
            return None;
        }
        let mut value = 0u32;
        for _ in 0..bits {
            let byte = self.data[self.pos / 8];
            let bit = (byte >> (7 - (self.pos % 8))) & 1;
            value = (value << 1) | bit as u32;
            self.pos += 1;
        }
        Some(value)
    }

    /// Read a `bits`-wide two's complement field
    pub fn read_signed(&mut self, bits: u32) -> Option<i32> {
        self.read(bits).map(|v| sign_extend(v, bits))
    }

    /// Bytes consumed, counting a partial byte as consumed
    pub fn bytes_consumed(&self) -> usize {
        (self.pos + 7) / 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_bytes_to_hex() {
        let data = vec![0x12, 0x34, 0xAB, 0xCD];
        assert_eq!(bytes_to_hex(&data), "12 34 ab cd");
    }
    
    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 4), 0);
        assert_eq!(align_up(5, 4), 8);
        assert_eq!(align_up(8, 4), 8);
    }
    
    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(0xFFFFFF, 24), -1);
        assert_eq!(sign_extend(0x7FFFFF, 24), 0x7FFFFF);
        assert_eq!(sign_extend(0x800000, 24), -0x800000);
    }
    
    #[test]
    fn test_bit_packing() {
        let mut writer = BitWriter::new();
        writer.write(0b101, 3);
        writer.write(0b01, 2);
        writer.write(0b1, 1);
        assert_eq!(writer.bit_len(), 6);
        let packed = writer.finish();
        assert_eq!(packed.as_ref(), &[0b1010_1100]);
        
        let mut reader = BitReader::new(&packed);
        assert_eq!(reader.read(3), Some(0b101));
        assert_eq!(reader.read(2), Some(0b01));
        assert_eq!(reader.read(1), Some(1));
        assert_eq!(reader.bytes_consumed(), 1);
    }
    
    #[test]
    fn test_signed_fields() {
        let mut writer = BitWriter::new();
        writer.write_signed(-3, 9);
        writer.write_signed(200, 9);
        let packed = writer.finish();
        assert_eq!(packed.len(), 3);
        
        let mut reader = BitReader::new(&packed);
        assert_eq!(reader.read_signed(9), Some(-3));
        assert_eq!(reader.read_signed(9), Some(200));
        assert_eq!(reader.read(8), None);
    }
}
