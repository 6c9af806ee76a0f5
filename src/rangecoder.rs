//! Binary range coder with an adaptive 11-bit probability model.
//!
//! This is the bit-level arithmetic coder underneath the LZMA2 chunk
//! payloads. Unlike a symbol-oriented range coder, every call codes a
//! single binary decision against a caller-owned probability counter;
//! the counters live in the probability model (`model`) and are passed
//! in by reference so that encoder and decoder share one layout.
//!
//! **Encoder:**
//! - 33-bit `low` register (the extra bit is the pending carry) plus a
//!   32-bit `range`, renormalized a byte at a time.
//! - Carry propagation is handled by caching the last settled byte and
//!   counting the run of 0xFF bytes behind it.
//! - `flush` emits five trailing bytes so the decoder can always
//!   normalize without reading past the payload.
//!
//! **Decoder:**
//! - `code`/`range` registers over a complete chunk payload slice.
//! - Initialization consumes five bytes; the first must be zero.
//! - Reading past the end of the payload is a corruption signal rather
//!   than an implicit zero-fill.

use crate::{Flz2Error, Flz2Result};

/// Renormalization threshold: a byte is settled once `range` drops below this.
pub const TOP: u32 = 1 << 24;

/// Number of bits in a probability counter.
pub const BIT_MODEL_TOTAL_BITS: u32 = 11;
/// Probability scale (2^11).
pub const BIT_MODEL_TOTAL: u32 = 1 << BIT_MODEL_TOTAL_BITS;
/// Neutral initial probability (p = 0.5).
pub const PROB_INIT: u16 = (BIT_MODEL_TOTAL >> 1) as u16;
/// Adaptation shift for probability updates.
pub const MOVE_BITS: u32 = 5;

/// Upper bound on the bytes the decoder may need to finish any single
/// operation once started. Streaming callers can suspend safely whenever
/// at least this much input remains buffered.
pub const REQUIRED_INPUT_MAX: usize = 20;

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// Range encoder writing to an owned byte buffer.
///
/// Encoding cannot fail; output size is bounded by the caller's chunk
/// accounting.
pub struct RangeEncoder {
    low: u64,
    range: u32,
    cache: u8,
    cache_size: u64,
    out: Vec<u8>,
}

impl RangeEncoder {
    pub fn new() -> Self {
        RangeEncoder {
            low: 0,
            range: u32::MAX,
            cache: 0,
            cache_size: 1,
            out: Vec::new(),
        }
    }

    /// Number of payload bytes emitted so far (excluding bytes still held
    /// in the carry cache).
    #[inline]
    pub fn len(&self) -> usize {
        self.out.len()
    }

    /// Total bytes this stream will occupy once flushed.
    #[inline]
    pub fn pending_len(&self) -> usize {
        // cache byte + carry run + four more flush bytes
        self.out.len() + self.cache_size as usize + 4
    }

    #[inline]
    fn shift_low(&mut self) {
        if (self.low as u32) < 0xFF00_0000 || (self.low >> 32) != 0 {
            let carry = (self.low >> 32) as u8;
            let mut byte = self.cache;
            loop {
                self.out.push(byte.wrapping_add(carry));
                byte = 0xFF;
                self.cache_size -= 1;
                if self.cache_size == 0 {
                    break;
                }
            }
            self.cache = (self.low >> 24) as u8;
        }
        self.cache_size += 1;
        self.low = (self.low as u32 as u64) << 8;
    }

    /// Encode one bit against an adaptive probability counter.
    #[inline]
    pub fn encode_bit(&mut self, prob: &mut u16, bit: u32) {
        let bound = (self.range >> BIT_MODEL_TOTAL_BITS) * (*prob as u32);
        if bit == 0 {
            *prob += ((BIT_MODEL_TOTAL - *prob as u32) >> MOVE_BITS) as u16;
            self.range = bound;
        } else {
            *prob -= *prob >> MOVE_BITS;
            self.low += bound as u64;
            self.range -= bound;
        }
        while self.range < TOP {
            self.range <<= 8;
            self.shift_low();
        }
    }

    /// Encode `num_bits` of `value` without a probability model
    /// (equiprobable halves).
    pub fn encode_direct_bits(&mut self, value: u32, num_bits: u32) {
        for i in (0..num_bits).rev() {
            self.range >>= 1;
            if (value >> i) & 1 != 0 {
                self.low += self.range as u64;
            }
            while self.range < TOP {
                self.range <<= 8;
                self.shift_low();
            }
        }
    }

    /// Encode `symbol` through a bit tree, most significant bit first.
    pub fn encode_bit_tree(&mut self, probs: &mut [u16], num_bits: u32, symbol: u32) {
        let mut m = 1usize;
        for i in (0..num_bits).rev() {
            let bit = (symbol >> i) & 1;
            self.encode_bit(&mut probs[m], bit);
            m = (m << 1) | bit as usize;
        }
    }

    /// Encode `symbol` through a bit tree, least significant bit first.
    pub fn encode_bit_tree_reverse(&mut self, probs: &mut [u16], num_bits: u32, symbol: u32) {
        let mut m = 1usize;
        for i in 0..num_bits {
            let bit = (symbol >> i) & 1;
            self.encode_bit(&mut probs[m], bit);
            m = (m << 1) | bit as usize;
        }
    }

    /// Flush the carry cache and return the finished payload.
    pub fn finish(mut self) -> Vec<u8> {
        for _ in 0..5 {
            self.shift_low();
        }
        self.out
    }
}

impl Default for RangeEncoder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Range decoder over a complete chunk payload.
pub struct RangeDecoder<'a> {
    code: u32,
    range: u32,
    input: &'a [u8],
    pos: usize,
}

impl<'a> RangeDecoder<'a> {
    /// Initialize over `input`. Requires at least five bytes; the first
    /// byte of a valid stream is always zero.
    pub fn new(input: &'a [u8]) -> Flz2Result<Self> {
        if input.len() < 5 || input[0] != 0 {
            return Err(Flz2Error::CorruptionDetected);
        }
        let mut code = 0u32;
        for &b in &input[1..5] {
            code = (code << 8) | b as u32;
        }
        Ok(RangeDecoder {
            code,
            range: u32::MAX,
            input,
            pos: 5,
        })
    }

    /// Bytes consumed from the payload so far.
    #[inline]
    pub fn consumed(&self) -> usize {
        self.pos
    }

    #[inline]
    fn next_byte(&mut self) -> Flz2Result<u32> {
        let b = *self
            .input
            .get(self.pos)
            .ok_or(Flz2Error::CorruptionDetected)?;
        self.pos += 1;
        Ok(b as u32)
    }

    #[inline]
    fn normalize(&mut self) -> Flz2Result<()> {
        if self.range < TOP {
            self.range <<= 8;
            self.code = (self.code << 8) | self.next_byte()?;
        }
        Ok(())
    }

    /// Decode one bit against an adaptive probability counter.
    #[inline]
    pub fn decode_bit(&mut self, prob: &mut u16) -> Flz2Result<u32> {
        let bound = (self.range >> BIT_MODEL_TOTAL_BITS) * (*prob as u32);
        let bit = if self.code < bound {
            *prob += ((BIT_MODEL_TOTAL - *prob as u32) >> MOVE_BITS) as u16;
            self.range = bound;
            0
        } else {
            *prob -= *prob >> MOVE_BITS;
            self.code -= bound;
            self.range -= bound;
            1
        };
        self.normalize()?;
        Ok(bit)
    }

    /// Decode `num_bits` equiprobable bits.
    pub fn decode_direct_bits(&mut self, num_bits: u32) -> Flz2Result<u32> {
        let mut result = 0u32;
        for _ in 0..num_bits {
            self.range >>= 1;
            self.code = self.code.wrapping_sub(self.range);
            let t = 0u32.wrapping_sub(self.code >> 31);
            self.code = self.code.wrapping_add(self.range & t);
            if self.code == self.range {
                return Err(Flz2Error::CorruptionDetected);
            }
            self.normalize()?;
            result = (result << 1).wrapping_add(t.wrapping_add(1));
        }
        Ok(result)
    }

    /// Decode a symbol through a bit tree, most significant bit first.
    pub fn decode_bit_tree(&mut self, probs: &mut [u16], num_bits: u32) -> Flz2Result<u32> {
        let mut m = 1usize;
        for _ in 0..num_bits {
            m = (m << 1) | self.decode_bit(&mut probs[m])? as usize;
        }
        Ok(m as u32 - (1 << num_bits))
    }

    /// Decode a symbol through a bit tree, least significant bit first.
    pub fn decode_bit_tree_reverse(&mut self, probs: &mut [u16], num_bits: u32) -> Flz2Result<u32> {
        let mut m = 1usize;
        let mut symbol = 0u32;
        for i in 0..num_bits {
            let bit = self.decode_bit(&mut probs[m])?;
            m = (m << 1) | bit as usize;
            symbol |= bit << i;
        }
        Ok(symbol)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
