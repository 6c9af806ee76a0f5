//! LZMA2 decoder: a resumable state machine over the framed stream.
//!
//! [`Lzma2Decoder`] consumes bytes incrementally. Header fields are
//! collected one byte at a time; a compressed payload is buffered until
//! complete (payloads are bounded by the packed chunk limit) and then
//! decoded in one pass into the dictionary, which is the decoded frame
//! output itself. The decoder suspends by returning whenever input runs
//! out, preserving every bit of state for the next call.
//!
//! [`DCtx`] wraps the state machine for one-shot use and owns the
//! running XXH64 digest that verifies the optional frame trailer.

use xxhash_rust::xxh64::Xxh64;

use crate::frame::{parse_dict_prop, ChunkHeader, ResetMode, HASH_TRAILER_LEN};
use crate::model::{
    len_to_pos_state, state_after_literal, state_after_match, state_after_rep,
    state_after_short_rep, state_is_literal, Probs, END_POS_MODEL_INDEX, NUM_ALIGN_BITS,
};
use crate::rangecoder::RangeDecoder;
use crate::{Flz2Error, Flz2Result};

/// Longest chunk header: control, two size fields, properties byte.
const MAX_HEADER_LEN: usize = 6;

/// Decoder stages. Chunk header fields accumulate in `Header`; `Raw`
/// streams an uncompressed chunk; `Data` buffers a compressed payload
/// (re-entered until complete); `Trailer` collects the hash bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Props,
    Header,
    Raw { remaining: usize },
    Data { unpacked: usize, packed: usize },
    Trailer,
    Finished,
    Failed,
}

/// Resumable LZMA2 frame decoder.
pub struct Lzma2Decoder {
    stage: Stage,
    dict_size: u64,
    hashed: bool,
    hasher: Xxh64,
    probs: Option<Probs>,
    state: usize,
    reps: [u32; 4],
    /// Decoded frame output; doubles as the match dictionary.
    out: Vec<u8>,
    /// Match distances may not reach before this output index.
    dict_base: usize,
    header_buf: [u8; MAX_HEADER_LEN],
    header_len: usize,
    chunk_buf: Vec<u8>,
    trailer_buf: [u8; HASH_TRAILER_LEN],
    trailer_len: usize,
}

impl Lzma2Decoder {
    pub fn new() -> Self {
        Lzma2Decoder {
            stage: Stage::Props,
            dict_size: 0,
            hashed: false,
            hasher: Xxh64::new(0),
            probs: None,
            state: 0,
            reps: [0; 4],
            out: Vec::new(),
            dict_base: 0,
            header_buf: [0; MAX_HEADER_LEN],
            header_len: 0,
            chunk_buf: Vec::new(),
            trailer_buf: [0; HASH_TRAILER_LEN],
            trailer_len: 0,
        }
    }

    /// Restore the initial state for a new frame.
    pub fn reset(&mut self) {
        self.stage = Stage::Props;
        self.dict_size = 0;
        self.hashed = false;
        self.hasher = Xxh64::new(0);
        self.probs = None;
        self.state = 0;
        self.reps = [0; 4];
        self.out.clear();
        self.dict_base = 0;
        self.header_len = 0;
        self.chunk_buf.clear();
        self.trailer_len = 0;
    }

    /// Whether the frame (including any trailer) decoded completely.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.stage == Stage::Finished
    }

    /// Decoded output so far.
    #[inline]
    pub fn output(&self) -> &[u8] {
        &self.out
    }

    /// Take the decoded output, leaving the decoder finished but empty.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.out)
    }

    /// Consume bytes from `input`, advancing the state machine as far as
    /// possible. Returns the number of bytes consumed; anything less
    /// than `input.len()` means the frame finished first.
    pub fn feed(&mut self, input: &[u8]) -> Flz2Result<usize> {
        if self.stage == Stage::Failed {
            return Err(Flz2Error::StageWrong);
        }
        match self.feed_inner(input) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.stage = Stage::Failed;
                Err(e)
            }
        }
    }

    fn feed_inner(&mut self, input: &[u8]) -> Flz2Result<usize> {
        let mut pos = 0usize;
        loop {
            match self.stage {
                Stage::Props => {
                    let Some(&byte) = input.get(pos) else { break };
                    let (dict_size, hashed) = parse_dict_prop(byte)?;
                    self.dict_size = dict_size;
                    self.hashed = hashed;
                    pos += 1;
                    self.stage = Stage::Header;
                }
                Stage::Header => {
                    // Collect header bytes one at a time until the
                    // control byte's class settles the field count.
                    let header = loop {
                        match ChunkHeader::parse(&self.header_buf[..self.header_len])? {
                            Some((header, consumed)) => {
                                debug_assert_eq!(consumed, self.header_len);
                                break Some(header);
                            }
                            None => {
                                let Some(&byte) = input.get(pos) else { break None };
                                self.header_buf[self.header_len] = byte;
                                self.header_len += 1;
                                pos += 1;
                            }
                        }
                    };
                    let Some(header) = header else { break };
                    self.header_len = 0;
                    self.begin_chunk(header)?;
                }
                Stage::Raw { remaining } => {
                    let n = remaining.min(input.len() - pos);
                    let bytes = &input[pos..pos + n];
                    self.out.extend_from_slice(bytes);
                    if self.hashed {
                        self.hasher.update(bytes);
                    }
                    pos += n;
                    if n == remaining {
                        self.stage = Stage::Header;
                    } else {
                        self.stage = Stage::Raw { remaining: remaining - n };
                        break;
                    }
                }
                Stage::Data { unpacked, packed } => {
                    let need = packed - self.chunk_buf.len();
                    let n = need.min(input.len() - pos);
                    self.chunk_buf.extend_from_slice(&input[pos..pos + n]);
                    pos += n;
                    if n < need {
                        break;
                    }
                    let produced_from = self.out.len();
                    let payload = std::mem::take(&mut self.chunk_buf);
                    let result = self.decode_chunk(&payload, unpacked);
                    self.chunk_buf = payload;
                    self.chunk_buf.clear();
                    result?;
                    if self.hashed {
                        self.hasher.update(&self.out[produced_from..]);
                    }
                    self.stage = Stage::Header;
                }
                Stage::Trailer => {
                    let need = HASH_TRAILER_LEN - self.trailer_len;
                    let n = need.min(input.len() - pos);
                    self.trailer_buf[self.trailer_len..self.trailer_len + n]
                        .copy_from_slice(&input[pos..pos + n]);
                    self.trailer_len += n;
                    pos += n;
                    if n < need {
                        break;
                    }
                    let expected = u64::from_le_bytes(self.trailer_buf);
                    if self.hasher.digest() != expected {
                        return Err(Flz2Error::ChecksumWrong);
                    }
                    self.stage = Stage::Finished;
                }
                Stage::Finished => break,
                Stage::Failed => return Err(Flz2Error::StageWrong),
            }
        }
        Ok(pos)
    }

    fn begin_chunk(&mut self, header: ChunkHeader) -> Flz2Result<()> {
        match header {
            ChunkHeader::EndOfFrame => {
                self.stage = if self.hashed { Stage::Trailer } else { Stage::Finished };
            }
            ChunkHeader::Uncompressed { reset_dict, unpacked } => {
                if reset_dict {
                    self.dict_base = self.out.len();
                }
                self.stage = Stage::Raw { remaining: unpacked };
            }
            ChunkHeader::Compressed { reset, unpacked, packed, props } => {
                match reset {
                    ResetMode::ResetAll => {
                        // Fresh properties and coding state. The
                        // dictionary is governed separately by the
                        // uncompressed reset chunk, so slice-initial
                        // resets keep earlier output reachable.
                        let props = props.ok_or(Flz2Error::CorruptionDetected)?;
                        match &mut self.probs {
                            Some(p) => p.reset(props),
                            None => self.probs = Some(Probs::new(props)),
                        }
                        self.state = 0;
                        self.reps = [0; 4];
                    }
                    ResetMode::ResetState => {
                        let probs = self.probs.as_mut().ok_or(Flz2Error::CorruptionDetected)?;
                        let props = probs.props();
                        probs.reset(props);
                        self.state = 0;
                        self.reps = [0; 4];
                    }
                    ResetMode::Keep | ResetMode::KeepNoProps => {
                        if self.probs.is_none() {
                            return Err(Flz2Error::CorruptionDetected);
                        }
                    }
                }
                self.chunk_buf.clear();
                self.stage = Stage::Data { unpacked, packed };
            }
        }
        Ok(())
    }

    /// Decode one complete compressed payload into the dictionary.
    fn decode_chunk(&mut self, payload: &[u8], unpacked: usize) -> Flz2Result<()> {
        let Lzma2Decoder {
            probs,
            state,
            reps,
            out,
            dict_base,
            dict_size,
            ..
        } = self;
        let probs = probs.as_mut().ok_or(Flz2Error::CorruptionDetected)?;
        let pb_mask = probs.props().pb_mask();

        let mut rd = RangeDecoder::new(payload)?;
        let target = out.len() + unpacked;

        while out.len() < target {
            let pos_state = out.len() & pb_mask;

            if rd.decode_bit(&mut probs.is_match[*state][pos_state])? == 0 {
                // Literal.
                let prev = out.last().copied().unwrap_or(0);
                let mb = if !state_is_literal(*state) {
                    let dist = reps[0] as usize + 1;
                    if dist > out.len() - *dict_base {
                        return Err(Flz2Error::CorruptionDetected);
                    }
                    Some(out[out.len() - dist])
                } else {
                    None
                };
                let byte = probs.decode_literal(&mut rd, out.len() as u64, prev, mb)?;
                out.push(byte);
                *state = state_after_literal(*state);
                continue;
            }

            let len;
            if rd.decode_bit(&mut probs.is_rep[*state])? == 0 {
                // Normal match: length, then distance.
                len = probs.len.decode(&mut rd, pos_state)?;
                let slot = rd.decode_bit_tree(&mut probs.pos_slot[len_to_pos_state(len)], 6)?;
                let dist_val = if slot < 4 {
                    slot
                } else {
                    let direct_bits = (slot >> 1) - 1;
                    let mut d = (2 | (slot & 1)) << direct_bits;
                    if (slot as usize) < END_POS_MODEL_INDEX {
                        d += rd.decode_bit_tree_reverse(
                            &mut probs.spec_pos[(d - slot) as usize..],
                            direct_bits,
                        )?;
                    } else {
                        d += rd.decode_direct_bits(direct_bits - NUM_ALIGN_BITS)?
                            << NUM_ALIGN_BITS;
                        d += rd.decode_bit_tree_reverse(&mut probs.align, NUM_ALIGN_BITS)?;
                    }
                    d
                };
                reps[3] = reps[2];
                reps[2] = reps[1];
                reps[1] = reps[0];
                reps[0] = dist_val;
                *state = state_after_match(*state);
            } else if rd.decode_bit(&mut probs.is_rep_g0[*state])? == 0 {
                if rd.decode_bit(&mut probs.is_rep0_long[*state][pos_state])? == 0 {
                    // Short rep: one byte at the most recent distance.
                    let dist = reps[0] as usize + 1;
                    if dist > out.len() - *dict_base {
                        return Err(Flz2Error::CorruptionDetected);
                    }
                    let byte = out[out.len() - dist];
                    out.push(byte);
                    *state = state_after_short_rep(*state);
                    continue;
                }
                len = probs.rep_len.decode(&mut rd, pos_state)?;
                *state = state_after_rep(*state);
            } else {
                // Older rep distance moves to the front.
                let dist = if rd.decode_bit(&mut probs.is_rep_g1[*state])? == 0 {
                    let d = reps[1];
                    reps[1] = reps[0];
                    d
                } else if rd.decode_bit(&mut probs.is_rep_g2[*state])? == 0 {
                    let d = reps[2];
                    reps[2] = reps[1];
                    reps[1] = reps[0];
                    d
                } else {
                    let d = reps[3];
                    reps[3] = reps[2];
                    reps[2] = reps[1];
                    reps[1] = reps[0];
                    d
                };
                reps[0] = dist;
                len = probs.rep_len.decode(&mut rd, pos_state)?;
                *state = state_after_rep(*state);
            }

            // Copy the match.
            let dist = reps[0] as u64 + 1;
            if dist > (out.len() - *dict_base) as u64 || dist > *dict_size {
                return Err(Flz2Error::CorruptionDetected);
            }
            if out.len() + len > target {
                return Err(Flz2Error::CorruptionDetected);
            }
            let start = out.len() - dist as usize;
            for i in 0..len {
                let byte = out[start + i];
                out.push(byte);
            }
        }

        debug_assert!(rd.consumed() <= payload.len());
        Ok(())
    }
}

impl Default for Lzma2Decoder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// One-shot decompression context
// ---------------------------------------------------------------------------

/// Reusable decompression context.
pub struct DCtx {
    dec: Lzma2Decoder,
}

impl DCtx {
    pub fn new() -> Self {
        DCtx {
            dec: Lzma2Decoder::new(),
        }
    }

    /// Decompress a complete frame. The input must contain exactly one
    /// frame; missing bytes (or trailing garbage) report `SrcSizeWrong`.
    pub fn decompress(&mut self, src: &[u8]) -> Flz2Result<Vec<u8>> {
        self.dec.reset();
        let consumed = self.dec.feed(src)?;
        if !self.dec.is_finished() || consumed != src.len() {
            self.dec.reset();
            return Err(Flz2Error::SrcSizeWrong);
        }
        Ok(self.dec.take_output())
    }

    /// Decompress into a caller buffer, returning the decoded length.
    /// The buffer is untouched unless the whole frame fits.
    pub fn decompress_into(&mut self, src: &[u8], dst: &mut [u8]) -> Flz2Result<usize> {
        let decoded = self.decompress(src)?;
        if decoded.len() > dst.len() {
            return Err(Flz2Error::DstSizeTooSmall);
        }
        dst[..decoded.len()].copy_from_slice(&decoded);
        Ok(decoded.len())
    }
}

impl Default for DCtx {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{ChunkEncoder, EncoderParams, Strategy};
    use crate::frame::{dict_prop_byte, CTRL_END};
    use crate::model::Props;
    use crate::rmf::RadixMatchFinder;

    /// Build a minimal single-slice frame around the chunk encoder.
    fn make_frame(data: &[u8], strategy: Strategy, hashed: bool) -> Vec<u8> {
        let mut out = vec![dict_prop_byte(20, hashed)];
        if !data.is_empty() {
            let mut rmf = RadixMatchFinder::new(1 << 20, 42, false);
            rmf.build(data);
            let mut enc = ChunkEncoder::new(Props::default());
            let params = EncoderParams {
                props: Props::default(),
                strategy,
                fast_length: 64,
                optimal_window: 64,
            };
            enc.encode_slice(data, 0, data.len(), 0, 0, &rmf, &params, true, &mut out);
        }
        out.push(CTRL_END);
        if hashed {
            out.extend_from_slice(&xxhash_rust::xxh64::xxh64(data, 0).to_le_bytes());
        }
        out
    }

    fn round_trip(data: &[u8], strategy: Strategy) {
        for hashed in [false, true] {
            let frame = make_frame(data, strategy, hashed);
            let mut ctx = DCtx::new();
            let decoded = ctx.decompress(&frame).unwrap();
            assert_eq!(decoded, data, "round-trip failed ({:?})", strategy);
        }
    }

    #[test]
    fn test_round_trip_empty() {
        round_trip(b"", Strategy::Fast);
    }

    #[test]
    fn test_round_trip_single_byte() {
        round_trip(b"x", Strategy::Fast);
        round_trip(b"x", Strategy::Normal);
    }

    #[test]
    fn test_round_trip_text() {
        let data = b"the quick brown fox jumps over the lazy dog. ".repeat(50);
        round_trip(&data, Strategy::Fast);
        round_trip(&data, Strategy::Normal);
        round_trip(&data, Strategy::Best);
    }

    #[test]
    fn test_round_trip_all_zeros() {
        round_trip(&vec![0u8; 100], Strategy::Fast);
        round_trip(&vec![0u8; 70_000], Strategy::Normal);
    }

    #[test]
    fn test_round_trip_periodic() {
        let two: Vec<u8> = [0xAB, 0xCD].iter().copied().cycle().take(10_000).collect();
        let four: Vec<u8> = [1u8, 2, 3, 4].iter().copied().cycle().take(10_000).collect();
        round_trip(&two, Strategy::Fast);
        round_trip(&two, Strategy::Normal);
        round_trip(&four, Strategy::Fast);
        round_trip(&four, Strategy::Normal);
    }

    #[test]
    fn test_round_trip_binary_ramp() {
        let data: Vec<u8> = (0..150_000u32).map(|i| (i % 251) as u8).collect();
        round_trip(&data, Strategy::Fast);
        round_trip(&data, Strategy::Normal);
    }

    #[test]
    fn test_round_trip_incompressible() {
        let mut state = 0xDEAD_BEEFu32;
        let data: Vec<u8> = (0..50_000)
            .map(|_| {
                state = state.wrapping_mul(1103515245).wrapping_add(12345);
                (state >> 16) as u8
            })
            .collect();
        round_trip(&data, Strategy::Fast);
        round_trip(&data, Strategy::Normal);
    }

    #[test]
    fn test_feed_one_byte_at_a_time() {
        let data = b"incremental decoding with single byte feeds".repeat(20);
        let frame = make_frame(&data, Strategy::Normal, true);

        let mut dec = Lzma2Decoder::new();
        for &byte in &frame {
            let used = dec.feed(std::slice::from_ref(&byte)).unwrap();
            assert_eq!(used, 1);
        }
        assert!(dec.is_finished());
        assert_eq!(dec.output(), &data[..]);
    }

    #[test]
    fn test_truncated_frame_is_src_size_wrong() {
        let data = b"some reasonably compressible data ".repeat(100);
        let frame = make_frame(&data, Strategy::Fast, false);
        let mut ctx = DCtx::new();
        let err = ctx.decompress(&frame[..frame.len() - 1]).unwrap_err();
        assert_eq!(err, Flz2Error::SrcSizeWrong);
    }

    #[test]
    fn test_trailing_garbage_is_src_size_wrong() {
        let data = b"payload".repeat(10);
        let mut frame = make_frame(&data, Strategy::Fast, false);
        frame.push(0x55);
        let mut ctx = DCtx::new();
        assert_eq!(ctx.decompress(&frame).unwrap_err(), Flz2Error::SrcSizeWrong);
    }

    #[test]
    fn test_checksum_mismatch() {
        let data = b"hash protected payload".repeat(30);
        let mut frame = make_frame(&data, Strategy::Fast, true);
        let n = frame.len();
        frame[n - 1] ^= 0x01;
        let mut ctx = DCtx::new();
        assert_eq!(ctx.decompress(&frame).unwrap_err(), Flz2Error::ChecksumWrong);
    }

    #[test]
    fn test_bad_dict_prop_rejected() {
        let mut ctx = DCtx::new();
        assert_eq!(
            ctx.decompress(&[0x7F, CTRL_END]).unwrap_err(),
            Flz2Error::CorruptionDetected
        );
    }

    #[test]
    fn test_decompress_into_too_small() {
        let data = b"destination sizing check".repeat(10);
        let frame = make_frame(&data, Strategy::Fast, false);
        let mut ctx = DCtx::new();
        let mut small = vec![0u8; 4];
        assert_eq!(
            ctx.decompress_into(&frame, &mut small).unwrap_err(),
            Flz2Error::DstSizeTooSmall
        );
        let mut big = vec![0u8; data.len() + 16];
        assert_eq!(ctx.decompress_into(&frame, &mut big).unwrap(), data.len());
        assert_eq!(&big[..data.len()], &data[..]);
    }

    #[test]
    fn test_failed_decoder_reports_stage_wrong() {
        let mut dec = Lzma2Decoder::new();
        assert!(dec.feed(&[0x7F]).is_err());
        assert_eq!(dec.feed(&[0x00]).unwrap_err(), Flz2Error::StageWrong);
    }
}
