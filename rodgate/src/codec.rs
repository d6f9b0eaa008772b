use serde::Deserialize;

/// Number of registers used to encode an analog value
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Width {
    /// single register, two's-complement signed 16-bit
    I16,
    /// two consecutive registers, high word first, two's-complement signed 32-bit
    I32,
}

impl Width {
    /// number of registers that must be read to decode a value of this width
    pub fn register_count(self) -> u16 {
        match self {
            Width::I16 => 1,
            Width::I32 => 2,
        }
    }

    /// Decode the value from the first `register_count()` words of `words`
    ///
    /// Returns `None` if too few words are present
    pub fn decode(self, words: &[u16]) -> Option<i32> {
        match (self, words) {
            (Width::I16, [word, ..]) => Some(i32::from(decode_i16(*word))),
            (Width::I32, [hi, lo, ..]) => Some(decode_i32(*hi, *lo)),
            _ => None,
        }
    }
}

/// Reinterpret a register as a two's-complement signed 16-bit value
pub fn decode_i16(word: u16) -> i16 {
    i16::from_be_bytes(word.to_be_bytes())
}

/// Combine two registers (high word first) into a two's-complement signed 32-bit value
///
/// Every one of the 2^32 bit patterns maps to exactly one value. When bit 31 is set
/// the result is negative.
pub fn decode_i32(hi: u16, lo: u16) -> i32 {
    let raw = (u32::from(hi) << 16) | u32::from(lo);
    i32::from_be_bytes(raw.to_be_bytes())
}

/// Split a signed 32-bit value into the (high, low) register pair that [`decode_i32`] reverses
pub fn encode_i32(value: i32) -> (u16, u16) {
    let [a, b, c, d] = value.to_be_bytes();
    (u16::from_be_bytes([a, b]), u16::from_be_bytes([c, d]))
}

/// Decode a bit read from a coil or discrete input
///
/// Active-low points (e.g. a push button wired to pull the input down) report `true`
/// when the raw bit is clear.
pub fn decode_bool(bit: bool, active_low: bool) -> bool {
    bit != active_low
}
